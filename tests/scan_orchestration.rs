mod common;

use anyhow::Result;
use common::{Corpus, QuietVcs, csproj, default_limits};
use reposcope::IndexError;
use reposcope::indexer::csharp::DotnetExtractor;
use reposcope::indexer::extract::{ProjectExtract, SourceExtractor};
use reposcope::indexer::{CancelToken, ProjectState, ScanMode};
use reposcope::Workspace;
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn add_project(corpus: &Corpus, repo: &str, assembly: &str, types: &[&str]) {
    corpus.repo(repo);
    corpus.write(repo, &format!("{assembly}.csproj"), &csproj(&[]));
    let mut source = format!("namespace {assembly};\n\n");
    for name in types {
        source.push_str(&format!("public class {name} {{ }}\n"));
    }
    corpus.write(repo, "Types.cs", &source);
}

fn project_names(workspace: &Workspace) -> Vec<String> {
    workspace
        .list_projects()
        .unwrap()
        .items
        .into_iter()
        .map(|p| p.name)
        .collect()
}

#[test]
fn malformed_descriptor_fails_only_its_project() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.good", "Acme.Good", &["GoodService"]);
    corpus.repo("acme.bad");
    corpus.write("acme.bad", "Acme.Bad.csproj", "<Project><PropertyGroup></Project>");
    corpus.write("acme.bad", "Bad.cs", "public class BadService { }");

    let workspace = corpus.workspace();
    let summary = workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].project, "acme.bad");
    assert!(summary.failures[0].message.contains("no readable build descriptor"));
    assert_eq!(project_names(&workspace), vec!["acme.good"]);
}

#[test]
fn incremental_scan_skips_unchanged_projects() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.orders", "Acme.Orders", &["OrderService"]);
    add_project(&corpus, "acme.billing", "Acme.Billing", &["InvoiceService"]);
    let workspace = corpus.workspace();
    let cancel = CancelToken::new();

    let first = workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert_eq!(first.scanned, 2);
    assert_eq!(first.types_indexed, 2);

    let second = workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(second.skipped_unchanged, 2);

    corpus.write(
        "acme.orders",
        "Types.cs",
        "namespace Acme.Orders;\npublic class OrderService { }\npublic class OrderValidator { }\n",
    );
    let third = workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert_eq!(third.scanned, 1);
    assert_eq!(third.skipped_unchanged, 1);
    let orders = third
        .outcomes
        .iter()
        .find(|o| o.project == "acme.orders")
        .unwrap();
    assert_eq!(orders.state, ProjectState::Scanned);
    assert_eq!(orders.types, 2);

    let full = workspace.scan(ScanMode::Full, &cancel).unwrap();
    assert_eq!(full.scanned, 2);
    assert_eq!(full.skipped_unchanged, 0);
}

#[test]
fn rescan_replaces_previous_rows() {
    let corpus = Corpus::new();
    add_project(
        &corpus,
        "acme.caching",
        "Acme.Caching",
        &["CoherentCache", "LegacyCacheAdapter"],
    );
    add_project(&corpus, "acme.web", "Acme.Web", &["HomeController"]);
    let workspace = corpus.workspace();
    let cancel = CancelToken::new();
    workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert_eq!(
        workspace.search_types("LegacyCache", None, None).unwrap().len(),
        1
    );

    corpus.write(
        "acme.caching",
        "Types.cs",
        "namespace Acme.Caching;\npublic class CoherentCache { }\n",
    );
    let summary = workspace.rescan_project("acme.caching", &cancel).unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.skipped_unchanged, 1);

    assert!(
        workspace
            .search_types("LegacyCache", None, None)
            .unwrap()
            .is_empty()
    );
    assert_eq!(workspace.describe_type("CoherentCache").unwrap().len(), 1);
}

#[test]
fn rescan_of_unchanged_project_still_extracts_it() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.orders", "Acme.Orders", &["OrderService"]);
    let workspace = corpus.workspace();
    let cancel = CancelToken::new();
    workspace.scan(ScanMode::Incremental, &cancel).unwrap();

    let summary = workspace.rescan_project("acme.orders", &cancel).unwrap();
    assert_eq!(summary.scanned, 1);
    assert!(workspace.rescan_project("acme.missing", &cancel).is_err());
}

#[test]
fn directories_without_version_control_are_skipped() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.orders", "Acme.Orders", &["OrderService"]);
    corpus.write("notes", "Scratch.csproj", &csproj(&[]));
    corpus.write("notes", "Scratch.cs", "public class Scratch { }");

    let workspace = corpus.workspace();
    let summary = workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();
    let notes = summary
        .outcomes
        .iter()
        .find(|o| o.project == "notes")
        .unwrap();
    assert_eq!(notes.state, ProjectState::SkippedNotRepo);
    assert_eq!(project_names(&workspace), vec!["acme.orders"]);
}

#[test]
fn vanished_projects_are_reported_until_forgotten() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.gone", "Acme.Gone", &["GoneService"]);
    add_project(&corpus, "acme.kept", "Acme.Kept", &["KeptService"]);
    let workspace = corpus.workspace();
    let cancel = CancelToken::new();
    workspace.scan(ScanMode::Incremental, &cancel).unwrap();

    fs::remove_dir_all(corpus.root().join("acme.gone")).unwrap();
    let summary = workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert_eq!(summary.stale_projects, vec!["acme.gone"]);
    assert_eq!(project_names(&workspace), vec!["acme.gone", "acme.kept"]);

    assert!(workspace.forget_project("acme.gone").unwrap());
    assert!(!workspace.forget_project("acme.gone").unwrap());
    assert_eq!(project_names(&workspace), vec!["acme.kept"]);
    let summary = workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert!(summary.stale_projects.is_empty());
}

#[test]
fn rebuild_starts_from_an_empty_index() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.orders", "Acme.Orders", &["OrderService"]);
    add_project(&corpus, "acme.old", "Acme.Old", &["OldService"]);
    let workspace = corpus.workspace();
    let cancel = CancelToken::new();
    workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    fs::remove_dir_all(corpus.root().join("acme.old")).unwrap();

    let summary = workspace.scan(ScanMode::Rebuild, &cancel).unwrap();
    assert_eq!(summary.mode, ScanMode::Rebuild);
    assert_eq!(summary.scanned, 1);
    assert!(summary.stale_projects.is_empty());
    assert_eq!(project_names(&workspace), vec!["acme.orders"]);
}

#[test]
fn cancelled_before_start_is_an_error() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.orders", "Acme.Orders", &["OrderService"]);
    let workspace = corpus.workspace();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = workspace.scan(ScanMode::Incremental, &cancel).unwrap_err();
    assert!(matches!(IndexError::find(&err), Some(IndexError::Cancelled)));
}

/// Cancels the shared token as soon as the first project is extracted.
struct CancelAfterFirst {
    cancel: CancelToken,
}

impl SourceExtractor for CancelAfterFirst {
    fn extract(&self, project_root: &Path) -> Result<ProjectExtract> {
        let extract = DotnetExtractor.extract(project_root);
        self.cancel.cancel();
        extract
    }
}

#[test]
fn cancellation_mid_run_keeps_committed_projects() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.a", "Acme.A", &["AService"]);
    add_project(&corpus, "acme.b", "Acme.B", &["BService"]);
    add_project(&corpus, "acme.c", "Acme.C", &["CService"]);
    let cancel = CancelToken::new();
    let mut limits = default_limits();
    limits.scan_workers = 1;
    let workspace = Workspace::builder(corpus.root().to_path_buf())
        .extractor(Arc::new(CancelAfterFirst {
            cancel: cancel.clone(),
        }))
        .vcs(Arc::new(QuietVcs))
        .limits(limits)
        .build();

    let summary = workspace.scan(ScanMode::Incremental, &cancel).unwrap();
    assert!(summary.cancelled);
    assert!(!summary.success);
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.not_started, 2);
    assert_eq!(project_names(&workspace), vec!["acme.a"]);
}

#[test]
fn readers_never_see_a_half_replaced_project() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.a", "Acme.A", &["One", "Two"]);
    let workspace = corpus.workspace();
    workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();
    add_project(&corpus, "acme.a", "Acme.A", &["One", "Two", "Three"]);

    let observed = std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            (0..50)
                .map(|_| workspace.overview().unwrap().types)
                .collect::<Vec<_>>()
        });
        workspace.scan(ScanMode::Full, &CancelToken::new()).unwrap();
        reader.join().unwrap()
    });
    assert!(observed.iter().all(|types| *types == 2 || *types == 3));
    assert_eq!(workspace.overview().unwrap().types, 3);
}

/// Panics while extracting one named repository.
struct PanicsOn {
    repo: &'static str,
}

impl SourceExtractor for PanicsOn {
    fn extract(&self, project_root: &Path) -> Result<ProjectExtract> {
        if project_root.file_name().is_some_and(|name| name == self.repo) {
            panic!("parser blew up");
        }
        DotnetExtractor.extract(project_root)
    }
}

#[test]
fn extraction_panic_fails_only_its_project() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.a", "Acme.A", &["AService"]);
    add_project(&corpus, "acme.bad", "Acme.Bad", &["BadService"]);
    add_project(&corpus, "acme.c", "Acme.C", &["CService"]);
    let workspace = Workspace::builder(corpus.root().to_path_buf())
        .extractor(Arc::new(PanicsOn { repo: "acme.bad" }))
        .vcs(Arc::new(QuietVcs))
        .limits(default_limits())
        .build();

    let summary = workspace.scan(ScanMode::Full, &CancelToken::new()).unwrap();
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].project, "acme.bad");
    assert!(summary.failures[0].message.contains("parser blew up"));
    assert_eq!(project_names(&workspace), vec!["acme.a", "acme.c"]);
}

#[test]
fn internal_references_hold_steady_during_a_full_rescan() {
    let corpus = Corpus::new();
    add_project(&corpus, "acme.core", "Acme.Core", &["CoreService"]);
    for idx in 0..12 {
        let repo = format!("acme.consumer{idx:02}");
        corpus.repo(&repo);
        corpus.write(&repo, "Consumer.csproj", &csproj(&[("Acme.Core", "1.0.0")]));
    }
    let workspace = corpus.workspace();
    workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();
    assert_eq!(workspace.overview().unwrap().internal_package_references, 12);

    let observed = std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            (0..50)
                .map(|_| workspace.overview().unwrap().internal_package_references)
                .collect::<Vec<_>>()
        });
        workspace.scan(ScanMode::Full, &CancelToken::new()).unwrap();
        reader.join().unwrap()
    });
    assert!(observed.iter().all(|count| *count == 12));
    assert_eq!(workspace.overview().unwrap().internal_package_references, 12);
}
