//! Entity shapes shared by the store, the graph engine and the renderers.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeKind {
    #[serde(rename = "class")]
    Class,
    #[serde(rename = "interface")]
    Interface,
    #[serde(rename = "struct")]
    Struct,
    #[serde(rename = "enum")]
    Enum,
    #[serde(rename = "record")]
    Record,
    #[serde(rename = "record struct")]
    RecordStruct,
}

impl TypeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Struct => "struct",
            TypeKind::Enum => "enum",
            TypeKind::Record => "record",
            TypeKind::RecordStruct => "record struct",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "class" => Some(TypeKind::Class),
            "interface" => Some(TypeKind::Interface),
            "struct" => Some(TypeKind::Struct),
            "enum" => Some(TypeKind::Enum),
            "record" | "record class" => Some(TypeKind::Record),
            "record struct" | "record_struct" => Some(TypeKind::RecordStruct),
            _ => None,
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Internal,
    Protected,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Internal => "internal",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "public" => Visibility::Public,
            "protected" => Visibility::Protected,
            "private" => Visibility::Private,
            _ => Visibility::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Rest,
    GraphQl,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Rest => "rest",
            EndpointKind::GraphQl => "graphql",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "graphql" {
            EndpointKind::GraphQl
        } else {
            EndpointKind::Rest
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSource {
    File,
    EnvVar,
    IndexerCall,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::File => "file",
            ConfigSource::EnvVar => "env-var",
            ConfigSource::IndexerCall => "indexer-call",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "env-var" => ConfigSource::EnvVar,
            "indexer-call" => ConfigSource::IndexerCall,
            _ => ConfigSource::File,
        }
    }
}

/// How a type refers to the one being analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Implements,
    Injects,
    Inherits,
}

impl RelationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Implements => "implements",
            RelationKind::Injects => "injects",
            RelationKind::Inherits => "inherits",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct ProjectSummary {
    pub name: String,
    pub path: String,
    pub solution: Option<String>,
    pub remote_url: Option<String>,
    pub default_branch: Option<String>,
    pub assembly_count: usize,
    pub type_count: usize,
    pub scanned_at: i64,
}

/// A type as located in the corpus.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    pub namespace: String,
    pub assembly: String,
    pub project: String,
    pub file_path: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ParameterDetail {
    pub name: String,
    pub type_name: String,
    pub ordinal: usize,
}

#[derive(Debug, Serialize, Clone)]
pub struct EndpointRecord {
    pub kind: EndpointKind,
    pub verb: String,
    pub route: String,
    pub type_name: String,
    pub method_name: String,
    pub project: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct MethodDetail {
    pub name: String,
    pub return_type: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub parameters: Vec<ParameterDetail>,
    pub endpoints: Vec<EndpointRecord>,
}

#[derive(Debug, Serialize, Clone)]
pub struct TypeDetail {
    #[serde(flatten)]
    pub type_ref: TypeRef,
    pub base_type: Option<String>,
    pub summary: Option<String>,
    pub implements: Vec<String>,
    pub injects: Vec<String>,
    pub methods: Vec<MethodDetail>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ConfigEntryRecord {
    pub project: String,
    pub source: ConfigSource,
    pub key: String,
    pub default_value: Option<String>,
    pub file_path: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct PackageUsage {
    pub project: String,
    pub assembly: String,
    pub package: String,
    pub version: Option<String>,
    pub is_internal: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub project: String,
    pub hash: String,
    pub scanned_at: i64,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct IndexOverview {
    pub projects: usize,
    pub assemblies: usize,
    pub package_references: usize,
    pub internal_package_references: usize,
    pub types: usize,
    pub methods: usize,
    pub endpoints: usize,
    pub config_entries: usize,
    pub last_scan: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_kind_round_trips_through_storage_names() {
        for kind in [
            TypeKind::Class,
            TypeKind::Interface,
            TypeKind::Struct,
            TypeKind::Enum,
            TypeKind::Record,
            TypeKind::RecordStruct,
        ] {
            assert_eq!(TypeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TypeKind::parse("delegate"), None);
    }

    #[test]
    fn record_struct_serializes_with_space() {
        let json = serde_json::to_string(&TypeKind::RecordStruct).unwrap();
        assert_eq!(json, "\"record struct\"");
        let json = serde_json::to_string(&ConfigSource::IndexerCall).unwrap();
        assert_eq!(json, "\"indexer-call\"");
    }
}
