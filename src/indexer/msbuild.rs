//! Build descriptor (`.csproj`) reading.
//!
//! Only the handful of properties the index stores are read. The descriptor
//! is checked for balanced tags first so a truncated or hand-broken file is
//! reported instead of silently yielding an empty unit.

use super::extract::{AssemblyInput, PackageInput};
use anyhow::{Result, bail};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->|<!\[CDATA\[.*?\]\]>").unwrap());

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(/?)([A-Za-z_][\w.:-]*)((?:[^>"]|"[^"]*")*?)(/?)>"#).unwrap()
});

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_][\w.:-]*)\s*=\s*"([^"]*)""#).unwrap());

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<PackageReference\b((?:[^>"]|"[^"]*")*?)(?:/>|>(.*?)</PackageReference\s*>)"#)
        .unwrap()
});

static PROJECT_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<ProjectReference\b((?:[^>"]|"[^"]*")*?)/?>"#).unwrap()
});

static CHILD_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Version>\s*(.*?)\s*</Version>").unwrap());

const TEST_PACKAGES: &[&str] = &[
    "microsoft.net.test.sdk",
    "xunit",
    "nunit",
    "mstest.testframework",
];

const TEST_NAME_SUFFIXES: &[&str] = &[".tests", ".test", ".unittests", ".integrationtests"];

/// Parses one descriptor. `descriptor_path` is relative to the project root
/// and its file stem is the fallback unit name.
pub fn parse_descriptor(descriptor_path: &str, content: &str) -> Result<AssemblyInput> {
    let content = COMMENT_RE.replace_all(content, "");
    check_well_formed(&content)?;

    let stem = descriptor_stem(descriptor_path);
    let name = property(&content, "AssemblyName")
        .filter(|value| !value.contains("$("))
        .unwrap_or_else(|| stem.to_string());

    let mut assembly = AssemblyInput::new(descriptor_path, &name);
    assembly.target_framework =
        property(&content, "TargetFramework").or_else(|| property(&content, "TargetFrameworks"));
    assembly.output_kind = property(&content, "OutputType");
    assembly.packages = package_references(&content);
    assembly.project_references = PROJECT_REF_RE
        .captures_iter(&content)
        .filter_map(|caps| attributes(&caps[1]).remove("include"))
        .map(|path| path.replace('\\', "/"))
        .collect();

    let explicit_test = property(&content, "IsTestProject")
        .map(|value| value.eq_ignore_ascii_case("true"));
    assembly.is_test = explicit_test.unwrap_or_else(|| {
        let lowered = name.to_ascii_lowercase();
        TEST_NAME_SUFFIXES.iter().any(|suffix| lowered.ends_with(suffix))
            || assembly
                .packages
                .iter()
                .any(|pkg| TEST_PACKAGES.contains(&pkg.name.to_ascii_lowercase().as_str()))
    });
    Ok(assembly)
}

fn descriptor_stem(descriptor_path: &str) -> &str {
    let file = descriptor_path.rsplit('/').next().unwrap_or(descriptor_path);
    match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    }
}

fn check_well_formed(content: &str) -> Result<()> {
    let mut stack: Vec<&str> = Vec::new();
    let mut saw_root = false;
    for caps in TAG_RE.captures_iter(content) {
        let closing = !caps[1].is_empty();
        let self_closing = !caps[4].is_empty();
        let tag = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if stack.is_empty() && !closing {
            if saw_root {
                bail!("malformed build descriptor: content after root element");
            }
            if tag != "Project" {
                bail!("malformed build descriptor: root element is <{tag}>, expected <Project>");
            }
            saw_root = true;
        }
        if closing {
            match stack.pop() {
                Some(open) if open == tag => {}
                Some(open) => bail!("malformed build descriptor: </{tag}> closes <{open}>"),
                None => bail!("malformed build descriptor: unexpected </{tag}>"),
            }
        } else if !self_closing {
            stack.push(tag);
        }
    }
    if !saw_root {
        bail!("malformed build descriptor: no <Project> element");
    }
    if let Some(open) = stack.last() {
        bail!("malformed build descriptor: <{open}> is never closed");
    }
    Ok(())
}

/// First non-empty value of `<Name>value</Name>`.
fn property(content: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?s)<{name}(?:\s[^>]*)?>\s*(.*?)\s*</{name}\s*>")).ok()?;
    re.captures_iter(content)
        .map(|caps| caps[1].to_string())
        .find(|value| !value.is_empty())
}

/// Attribute map with lowercased keys.
fn attributes(raw: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(raw)
        .map(|caps| (caps[1].to_ascii_lowercase(), caps[2].trim().to_string()))
        .collect()
}

fn package_references(content: &str) -> Vec<PackageInput> {
    let mut packages = Vec::new();
    for caps in PACKAGE_RE.captures_iter(content) {
        let mut attrs = attributes(&caps[1]);
        // `Update` items tweak packages declared elsewhere
        let Some(name) = attrs.remove("include") else {
            continue;
        };
        let version = attrs
            .remove("version")
            .or_else(|| {
                caps.get(2)
                    .and_then(|body| CHILD_VERSION_RE.captures(body.as_str()))
                    .map(|child| child[1].to_string())
            })
            .filter(|value| !value.is_empty());
        packages.push(PackageInput {
            name,
            version,
            is_internal: false,
        });
    }
    packages
}
