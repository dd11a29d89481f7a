mod common;

use common::{Corpus, csproj};
use reposcope::graph::{ImpactOutcome, ImpactReport, MismatchSeverity, PatternKind};
use reposcope::indexer::{CancelToken, ScanMode};
use reposcope::model::{EndpointKind, RelationKind};
use reposcope::rpc;
use reposcope::{IndexError, Workspace};
use serde_json::{Value, json};

const CACHE_INTERFACE: &str = r#"
namespace Acme.Caching;

/// <summary>Distributed cache kept coherent across nodes.</summary>
public interface ICoherentCache
{
    Task<string> GetAsync(string key);
}
"#;

const EVICTION_HANDLER: &str = r#"
namespace Acme.Caching;

public class CacheEvictionHandler
{
    public CacheEvictionHandler(ICoherentCache cache) { }
}
"#;

const CONTENT_CONTROLLER: &str = r#"
namespace Acme.Web.Api.Controllers;

[ApiController]
[Route("api/[controller]")]
public class ContentController : ControllerBase
{
    public ContentController(ICoherentCache cache) { }

    [HttpGet("{id}")]
    public IActionResult Get(int id) => Ok();
}
"#;

const REDIS_CACHE: &str = r#"
namespace Acme.Cache.Redis;

public class RedisCoherentCache : ICoherentCache
{
    public Task<string> GetAsync(string key) => Task.FromResult(key);
}
"#;

/// acme.caching owns the interface and an injector; acme.web.api consumes
/// its package and injects the interface too.
fn caching_corpus() -> Corpus {
    let corpus = Corpus::new();
    corpus.repo("acme.caching");
    corpus.write(
        "acme.caching",
        "src/Acme.Caching/Acme.Caching.csproj",
        &csproj(&[("Newtonsoft.Json", "13.0.1")]),
    );
    corpus.write("acme.caching", "src/Acme.Caching/ICoherentCache.cs", CACHE_INTERFACE);
    corpus.write(
        "acme.caching",
        "src/Acme.Caching/CacheEvictionHandler.cs",
        EVICTION_HANDLER,
    );

    corpus.repo("acme.web.api");
    corpus.write(
        "acme.web.api",
        "Acme.Web.Api.csproj",
        &csproj(&[("Acme.Caching", "1.2.0"), ("Newtonsoft.Json", "13.0.3")]),
    );
    corpus.write(
        "acme.web.api",
        "Controllers/ContentController.cs",
        CONTENT_CONTROLLER,
    );
    corpus
}

fn scanned(corpus: &Corpus) -> Workspace {
    let workspace = corpus.workspace();
    let summary = workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();
    assert!(summary.success);
    assert_eq!(summary.failed, 0);
    workspace
}

fn report(outcome: ImpactOutcome) -> ImpactReport {
    match outcome {
        ImpactOutcome::Report(report) => report,
        ImpactOutcome::NotFound { type_name } => panic!("{type_name} not found"),
    }
}

#[test]
fn trace_flow_reaches_implementors_and_injectors() {
    let corpus = caching_corpus();
    corpus.repo("acme.cache.redis");
    corpus.write(
        "acme.cache.redis",
        "Acme.Cache.Redis.csproj",
        &csproj(&[("Acme.Caching", "1.2.0")]),
    );
    corpus.write("acme.cache.redis", "RedisCoherentCache.cs", REDIS_CACHE);
    let workspace = scanned(&corpus);

    let result = workspace.trace_flow("ICoherentCache", Some(1)).unwrap();
    assert!(!result.no_connections);
    let mut edges: Vec<_> = result
        .edges
        .iter()
        .map(|e| (e.to.as_str(), e.relation.as_str(), e.depth, e.project.as_str()))
        .collect();
    edges.sort();
    assert_eq!(
        edges,
        vec![
            ("CacheEvictionHandler", "injects", 1, "acme.caching"),
            ("ContentController", "injects", 1, "acme.web.api"),
            ("RedisCoherentCache", "implements", 1, "acme.cache.redis"),
        ]
    );
    assert_eq!(result.visited[0], "ICoherentCache");

    // names match case-insensitively when tracing
    let lower = workspace.trace_flow("icoherentcache", None).unwrap();
    assert_eq!(lower.edges.len(), 3);

    let isolated = workspace.trace_flow("IUnusedThing", None).unwrap();
    assert!(isolated.no_connections);
}

#[test]
fn impact_counts_references_and_projects() {
    let corpus = caching_corpus();
    let workspace = scanned(&corpus);

    let report = report(workspace.analyze_impact("ICoherentCache").unwrap());
    assert_eq!(report.home_projects, vec!["acme.caching"]);
    assert_eq!(report.direct_reference_count, 2);
    assert!(
        report
            .direct_references
            .iter()
            .all(|r| r.relation == RelationKind::Injects)
    );
    assert_eq!(report.direct_projects, vec!["acme.caching", "acme.web.api"]);
    assert_eq!(report.transitive_project_count, 0);
    assert_eq!(report.total_blast_radius, 4);

    assert!(matches!(
        workspace.analyze_impact("IMissing").unwrap(),
        ImpactOutcome::NotFound { .. }
    ));
}

#[test]
fn impact_follows_internal_packages_transitively() {
    let corpus = caching_corpus();
    corpus.repo("acme.portal");
    corpus.write(
        "acme.portal",
        "Acme.Portal.csproj",
        &csproj(&[("Acme.Web.Api", "3.0.0")]),
    );
    corpus.write(
        "acme.portal",
        "Portal.cs",
        "namespace Acme.Portal;\npublic class Portal { }\n",
    );
    let workspace = scanned(&corpus);

    let report = report(workspace.analyze_impact("ICoherentCache").unwrap());
    assert_eq!(report.transitive_project_count, 1);
    let hop = &report.transitive_projects[0];
    assert_eq!(hop.project, "acme.portal");
    assert_eq!(hop.depth, 1);
    assert_eq!(hop.via_project, "acme.web.api");
    assert_eq!(hop.via_package, "Acme.Web.Api");
    assert_eq!(report.total_blast_radius, 5);

    let deps = workspace.project_dependencies("ACME.PORTAL").unwrap().unwrap();
    assert_eq!(deps.project, "acme.portal");
    let providers: Vec<_> = deps
        .dependencies
        .iter()
        .map(|h| (h.project.as_str(), h.depth))
        .collect();
    assert_eq!(providers, vec![("acme.web.api", 1), ("acme.caching", 2)]);
    assert!(deps.dependents.is_empty());
    assert!(workspace.project_dependencies("acme.nowhere").unwrap().is_none());
}

#[test]
fn version_mismatches_flag_minor_drift() {
    let corpus = caching_corpus();
    let workspace = scanned(&corpus);

    let mismatches = workspace.version_mismatches(None).unwrap();
    assert_eq!(mismatches.len(), 1);
    let newtonsoft = &mismatches[0];
    assert_eq!(newtonsoft.package, "Newtonsoft.Json");
    assert_eq!(newtonsoft.severity, MismatchSeverity::Minor);
    assert!(!newtonsoft.is_internal);
    let versions: Vec<_> = newtonsoft
        .versions
        .iter()
        .map(|v| (v.version.as_str(), v.projects.clone()))
        .collect();
    assert_eq!(
        versions,
        vec![
            ("13.0.1", vec!["acme.caching".to_string()]),
            ("13.0.3", vec!["acme.web.api".to_string()]),
        ]
    );
    assert!(workspace.version_mismatches(Some("Serilog")).unwrap().is_empty());
}

#[test]
fn internal_packages_are_resolved_after_scan() {
    let corpus = caching_corpus();
    let workspace = corpus.workspace();
    let summary = workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();
    assert_eq!(summary.internal_references, 1);

    let overview = workspace.overview().unwrap();
    assert_eq!(overview.projects, 2);
    assert_eq!(overview.package_references, 3);
    assert_eq!(overview.internal_package_references, 1);
    assert_eq!(overview.types, 3);
    assert_eq!(overview.endpoints, 1);
    assert!(overview.last_scan.is_some());
}

#[test]
fn endpoints_and_type_details_round_out_the_index() {
    let corpus = caching_corpus();
    let workspace = scanned(&corpus);

    let endpoints = workspace.list_endpoints(None, None).unwrap();
    assert_eq!(endpoints.len(), 1);
    let endpoint = &endpoints.items[0];
    assert_eq!(endpoint.kind, EndpointKind::Rest);
    assert_eq!(endpoint.verb, "GET");
    assert_eq!(endpoint.route, "/api/Content/{id}");
    assert_eq!(endpoint.type_name, "ContentController");
    assert_eq!(endpoint.project, "acme.web.api");

    let details = workspace.describe_type("ICoherentCache").unwrap();
    assert_eq!(details.len(), 1);
    let detail = &details[0];
    assert_eq!(detail.type_ref.assembly, "Acme.Caching");
    assert_eq!(
        detail.summary.as_deref(),
        Some("Distributed cache kept coherent across nodes.")
    );
    assert_eq!(detail.methods[0].name, "GetAsync");

    let implementations = workspace.find_implementations("ICoherentCache", None).unwrap();
    assert!(implementations.is_empty());
    let found = workspace.search_types("coherent", None, None).unwrap();
    assert_eq!(found.items[0].name, "ICoherentCache");
}

#[test]
fn cached_reads_see_the_next_scan() {
    let corpus = caching_corpus();
    let workspace = scanned(&corpus);
    assert!(workspace.search_types("Redis", None, None).unwrap().is_empty());
    assert!(workspace.search_types("Redis", None, None).unwrap().is_empty());
    assert!(workspace.cache_stats().hits >= 1);

    corpus.write("acme.caching", "src/Acme.Caching/RedisCoherentCache.cs", REDIS_CACHE);
    workspace
        .scan(ScanMode::Incremental, &CancelToken::new())
        .unwrap();

    let found = workspace.search_types("Redis", None, None).unwrap();
    assert_eq!(found.len(), 1);
    let implementations = workspace.find_implementations("ICoherentCache", None).unwrap();
    assert_eq!(implementations.items[0].name, "RedisCoherentCache");
}

#[test]
fn patterns_flag_repositories_and_heavy_constructors() {
    let corpus = Corpus::new();
    corpus.repo("acme.orders");
    corpus.write("acme.orders", "Acme.Orders.csproj", &csproj(&[]));
    corpus.write(
        "acme.orders",
        "Orders.cs",
        r#"
namespace Acme.Orders;

public interface IOrderRepository { }

public class SqlOrderRepository : IOrderRepository { }

public class CheckoutCoordinator
{
    public CheckoutCoordinator(IOrderRepository orders, IPaymentGateway payments,
        IInventory inventory, IShipping shipping, INotifier notifier) { }
}
"#,
    );
    let workspace = scanned(&corpus);

    let report = workspace.detect_patterns(Some("acme.orders")).unwrap();
    let repository = report
        .findings
        .iter()
        .find(|f| f.kind == PatternKind::Repository)
        .unwrap();
    assert_eq!(repository.subject, "IOrderRepository");
    assert_eq!(repository.types, vec!["SqlOrderRepository"]);
    let coupling = report
        .findings
        .iter()
        .find(|f| f.kind == PatternKind::HighCoupling)
        .unwrap();
    assert_eq!(coupling.subject, "CheckoutCoordinator");

    let elsewhere = workspace.detect_patterns(Some("acme.nowhere")).unwrap();
    assert!(elsewhere.is_empty());
}

#[test]
fn queries_before_any_scan_report_the_missing_index() {
    let corpus = caching_corpus();
    let workspace = corpus.workspace();

    let err = workspace.list_projects().unwrap_err();
    assert!(matches!(
        IndexError::find(&err),
        Some(IndexError::Unavailable { .. })
    ));
    assert!(workspace.forget_project("acme.caching").is_err());

    let line = rpc::call(&workspace, "trace_flow".to_string(), r#"{"type_name":"ICoherentCache"}"#, "1")
        .unwrap();
    let response: Value = serde_json::from_str(&line).unwrap();
    assert!(
        response["error"]["message"]
            .as_str()
            .unwrap()
            .ends_with("run a scan first")
    );
}

#[test]
fn rpc_answers_in_every_format() {
    let corpus = caching_corpus();
    let workspace = scanned(&corpus);

    let json_value = rpc::handle_method(
        &workspace,
        "analyze_impact",
        json!({ "type_name": "ICoherentCache" }),
    )
    .unwrap();
    assert_eq!(json_value["total_blast_radius"], json!(4));

    let envelope = rpc::handle_method(
        &workspace,
        "search_types",
        json!({ "query": "Cache", "format": "envelope" }),
    )
    .unwrap();
    assert_eq!(envelope["result_count"], json!(2));
    assert_eq!(envelope["truncated"], json!(false));
    assert!(envelope["content"].as_str().unwrap().contains("ICoherentCache"));

    let text = rpc::handle_method(
        &workspace,
        "list_projects",
        json!({ "format": "text" }),
    )
    .unwrap();
    let text = text.as_str().unwrap();
    assert!(text.contains("acme.caching"));
    assert!(text.contains("acme.web.api"));
}
