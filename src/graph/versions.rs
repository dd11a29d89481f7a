use super::types::{MismatchSeverity, VersionMismatch, VersionUsage};
use crate::db::StoreReader;
use crate::model::PackageUsage;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

/// Packages referenced at more than one version across the corpus, optionally
/// limited to one package name. References without a version are ignored.
pub fn version_mismatches(
    reader: &StoreReader<'_>,
    package: Option<&str>,
) -> Result<Vec<VersionMismatch>> {
    Ok(find_mismatches(reader.package_usages(package)?))
}

pub fn find_mismatches(usages: Vec<PackageUsage>) -> Vec<VersionMismatch> {
    // lowercased package -> (display name, internal, version -> projects)
    let mut grouped: BTreeMap<String, (String, bool, BTreeMap<String, BTreeSet<String>>)> =
        BTreeMap::new();
    for usage in usages {
        let Some(version) = usage.version.filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        let entry = grouped
            .entry(usage.package.to_lowercase())
            .or_insert_with(|| (usage.package.clone(), false, BTreeMap::new()));
        entry.1 |= usage.is_internal;
        entry
            .2
            .entry(version.trim().to_string())
            .or_default()
            .insert(usage.project);
    }

    let mut mismatches: Vec<VersionMismatch> = grouped
        .into_values()
        .filter(|(_, _, versions)| versions.len() > 1)
        .map(|(package, is_internal, versions)| {
            let severity = classify(versions.keys().map(String::as_str));
            VersionMismatch {
                package,
                severity,
                is_internal,
                versions: versions
                    .into_iter()
                    .map(|(version, projects)| VersionUsage {
                        version,
                        projects: projects.into_iter().collect(),
                    })
                    .collect(),
            }
        })
        .collect();
    mismatches.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.package.to_lowercase().cmp(&b.package.to_lowercase()))
    });
    mismatches
}

/// `Major` when the leading version components differ, `Minor` otherwise.
pub fn classify<'a>(versions: impl IntoIterator<Item = &'a str>) -> MismatchSeverity {
    let leading: BTreeSet<String> = versions.into_iter().map(leading_component).collect();
    if leading.len() > 1 {
        MismatchSeverity::Major
    } else {
        MismatchSeverity::Minor
    }
}

/// Leading numeric component, ignoring range brackets and a `v` prefix.
/// Non-numeric versions compare by their first dotted segment.
fn leading_component(version: &str) -> String {
    let trimmed = version
        .trim()
        .trim_start_matches(['[', '('])
        .trim_start_matches(['v', 'V']);
    let first = trimmed.split(['.', ',', '-', ')', ']']).next().unwrap_or("");
    match first.trim().parse::<u64>() {
        Ok(number) => number.to_string(),
        Err(_) => first.trim().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(project: &str, package: &str, version: Option<&str>) -> PackageUsage {
        PackageUsage {
            project: project.to_string(),
            assembly: project.to_string(),
            package: package.to_string(),
            version: version.map(str::to_string),
            is_internal: false,
        }
    }

    #[test]
    fn test_same_leading_component_is_minor() {
        let found = find_mismatches(vec![
            usage("acme.web.api", "Newtonsoft.Json", Some("13.0.3")),
            usage("acme.caching", "Newtonsoft.Json", Some("13.0.1")),
        ]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].severity, MismatchSeverity::Minor);
        assert_eq!(found[0].versions[0].version, "13.0.1");
        assert_eq!(found[0].versions[0].projects, vec!["acme.caching"]);
    }

    #[test]
    fn test_different_leading_component_is_major() {
        assert_eq!(classify(["13.9.0", "14.0.0"]), MismatchSeverity::Major);
        assert_eq!(classify(["[13.0.1,14)", "13.2.0"]), MismatchSeverity::Minor);
        assert_eq!(classify(["v2.1", "2.0"]), MismatchSeverity::Minor);
        assert_eq!(classify(["013.1", "13.2"]), MismatchSeverity::Minor);
    }

    #[test]
    fn test_consistent_and_unversioned_references_are_ignored() {
        let found = find_mismatches(vec![
            usage("a", "Serilog", Some("3.0.0")),
            usage("b", "serilog", Some("3.0.0")),
            usage("c", "Serilog", None),
            usage("d", "Polly", None),
        ]);
        assert!(found.is_empty());
    }

    #[test]
    fn test_package_names_group_case_insensitively() {
        let found = find_mismatches(vec![
            usage("a", "Acme.Core", Some("1.2.0")),
            usage("b", "acme.core", Some("2.0.0")),
            usage("c", "Dapper", Some("2.0.1")),
            usage("d", "Dapper", Some("2.1.0")),
        ]);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].package, "Acme.Core");
        assert_eq!(found[0].severity, MismatchSeverity::Major);
        assert_eq!(found[1].package, "Dapper");
    }
}
