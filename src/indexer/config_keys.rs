use super::extract::ConfigEntryInput;
use crate::model::ConfigSource;
use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Environment\.GetEnvironmentVariable\(\s*"([^"]+)"\s*[,)]"#).unwrap()
});

static INDEXER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b\w*[Cc]onfig\w*\s*\[\s*"([^"]+)"\s*\]"#).unwrap());

static GET_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.GetValue(?:<[^>]+>)?\(\s*"([^"]+)"\s*(?:,\s*([^)]+?))?\s*\)"#).unwrap()
});

static GET_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\.(?:GetSection|GetRequiredSection)\(\s*"([^"]+)"\s*\)"#).unwrap()
});

pub fn is_config_file(file_name: &str) -> bool {
    let lowered = file_name.to_ascii_lowercase();
    lowered.starts_with("appsettings") && lowered.ends_with(".json")
}

/// Flattens a settings file into `Section:Key` entries. Fails on invalid
/// JSON so the caller can skip the file with a warning.
pub fn scan_config_file(rel_path: &str, content: &str) -> Result<Vec<ConfigEntryInput>> {
    let value: Value = serde_json::from_str(content.trim_start_matches('\u{feff}'))
        .with_context(|| format!("parse {rel_path}"))?;
    let mut out = Vec::new();
    flatten(&value, String::new(), rel_path, &mut out);
    Ok(out)
}

fn flatten(value: &Value, prefix: String, rel_path: &str, out: &mut Vec<ConfigEntryInput>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}:{key}")
        }
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(child, join(key), rel_path, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(child, join(&idx.to_string()), rel_path, out);
            }
        }
        leaf if !prefix.is_empty() => out.push(ConfigEntryInput {
            source: ConfigSource::File,
            key: prefix,
            default_value: match leaf {
                Value::Null => None,
                Value::String(text) => Some(text.clone()),
                other => Some(other.to_string()),
            },
            file_path: rel_path.to_string(),
        }),
        _ => {}
    }
}

/// Keys read from code: environment variables and configuration lookups.
pub fn scan_source(rel_path: &str, content: &str) -> Vec<ConfigEntryInput> {
    let mut out = Vec::new();
    let mut push = |source: ConfigSource, key: &str, default_value: Option<String>| {
        let entry = ConfigEntryInput {
            source,
            key: key.to_string(),
            default_value,
            file_path: rel_path.to_string(),
        };
        if !out.iter().any(|existing: &ConfigEntryInput| {
            existing.key == entry.key && existing.source == entry.source
        }) {
            out.push(entry);
        }
    };

    for caps in ENV_VAR_RE.captures_iter(content) {
        push(ConfigSource::EnvVar, &caps[1], None);
    }
    for caps in INDEXER_RE.captures_iter(content) {
        push(ConfigSource::IndexerCall, &caps[1], None);
    }
    for caps in GET_VALUE_RE.captures_iter(content) {
        let default_value = caps.get(2).map(|m| unquote(m.as_str()));
        push(ConfigSource::IndexerCall, &caps[1], default_value);
    }
    for caps in GET_SECTION_RE.captures_iter(content) {
        push(ConfigSource::IndexerCall, &caps[1], None);
    }
    out
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}
