use crate::model::{ConfigSource, EndpointKind, TypeKind, Visibility};
use anyhow::Result;
use std::path::Path;

/// One buildable unit as read from its build descriptor.
#[derive(Debug, Clone)]
pub struct AssemblyInput {
    /// Descriptor path relative to the project root.
    pub descriptor_path: String,
    pub name: String,
    pub target_framework: Option<String>,
    pub output_kind: Option<String>,
    pub is_test: bool,
    pub packages: Vec<PackageInput>,
    pub project_references: Vec<String>,
}

impl AssemblyInput {
    pub fn new(descriptor_path: &str, name: &str) -> Self {
        Self {
            descriptor_path: descriptor_path.to_string(),
            name: name.to_string(),
            target_framework: None,
            output_kind: None,
            is_test: false,
            packages: Vec::new(),
            project_references: Vec::new(),
        }
    }

    /// Unit for sources that sit under no build descriptor.
    pub fn synthetic(name: &str) -> Self {
        Self::new("", name)
    }

    pub fn with_package(mut self, name: &str, version: Option<&str>) -> Self {
        self.packages.push(PackageInput {
            name: name.to_string(),
            version: version.map(str::to_string),
            is_internal: false,
        });
        self
    }

    /// Directory holding the descriptor, `""` for the project root.
    pub fn descriptor_dir(&self) -> &str {
        match self.descriptor_path.rfind('/') {
            Some(idx) => &self.descriptor_path[..idx],
            None => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInput {
    pub name: String,
    pub version: Option<String>,
    /// Set by the scan when the name matches an assembly in the corpus.
    pub is_internal: bool,
}

#[derive(Debug, Clone)]
pub struct TypeInput {
    pub namespace: String,
    pub name: String,
    pub kind: TypeKind,
    pub visibility: Visibility,
    /// Source path relative to the project root.
    pub file_path: String,
    pub base_type: Option<String>,
    pub summary: Option<String>,
    pub implements: Vec<String>,
    pub injects: Vec<String>,
    pub methods: Vec<MethodInput>,
}

impl TypeInput {
    pub fn new(namespace: &str, name: &str, kind: TypeKind, file_path: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            kind,
            visibility: Visibility::Public,
            file_path: file_path.to_string(),
            base_type: None,
            summary: None,
            implements: Vec::new(),
            injects: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_implements(mut self, names: &[&str]) -> Self {
        self.implements.extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn with_injects(mut self, names: &[&str]) -> Self {
        self.injects.extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn with_base_type(mut self, name: &str) -> Self {
        self.base_type = Some(name.to_string());
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MethodInput {
    pub name: String,
    pub return_type: String,
    pub visibility: Visibility,
    pub is_static: bool,
    /// In declaration order; the position is the stored ordinal.
    pub parameters: Vec<ParameterInput>,
    pub endpoints: Vec<EndpointInput>,
}

#[derive(Debug, Clone)]
pub struct ParameterInput {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone)]
pub struct EndpointInput {
    pub kind: EndpointKind,
    /// HTTP verb or query-language operation (`Query`, `Mutation`, ...).
    pub verb: String,
    /// Route template or operation name.
    pub route: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntryInput {
    pub source: ConfigSource,
    pub key: String,
    pub default_value: Option<String>,
    pub file_path: String,
}

/// Everything an extractor found in one project.
#[derive(Debug, Default)]
pub struct ProjectExtract {
    pub assemblies: Vec<AssemblyInput>,
    pub types: Vec<TypeInput>,
    pub config_entries: Vec<ConfigEntryInput>,
    /// Malformed inputs that were skipped; they never fail the project.
    pub warnings: Vec<String>,
}

/// Turns a project directory into entity records.
pub trait SourceExtractor: Send + Sync {
    fn extract(&self, project_root: &Path) -> Result<ProjectExtract>;
}
