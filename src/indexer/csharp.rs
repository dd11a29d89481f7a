use crate::indexer::config_keys;
use crate::indexer::extract::{
    AssemblyInput, EndpointInput, MethodInput, ParameterInput, ProjectExtract, SourceExtractor,
    TypeInput,
};
use crate::indexer::msbuild;
use crate::indexer::scan::{FileKind, scan_project_files};
use crate::model::{EndpointKind, TypeKind, Visibility};
use crate::util;
use anyhow::{Result, bail};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

const GLOBAL_NAMESPACE: &str = "global";
const HTTP_VERBS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];
const HTTP_ANY: &str = "ANY";

static SEE_CREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<see(?:also)?\s+(?:c?ref|langword)="(?:\w:)?([^"]+)"\s*/>"#).unwrap());
static XML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<summary>(.*?)</summary>").unwrap());

#[derive(Clone, Default)]
struct Context {
    namespace_stack: Vec<String>,
    /// Enclosing types are all public.
    public_scope: bool,
    nested: bool,
    in_interface: bool,
}

/// Query-language operation a class contributes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Query,
    Mutation,
    Subscription,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Query => "Query",
            Operation::Mutation => "Mutation",
            Operation::Subscription => "Subscription",
        }
    }
}

/// Per-thread C# reader. `tree_sitter::Parser` is not `Sync`, so the shared
/// extractor builds one for every project it reads.
pub struct CSharpParser {
    parser: Parser,
}

impl CSharpParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_c_sharp::LANGUAGE;
        parser.set_language(&language.into())?;
        Ok(Self { parser })
    }

    /// Type records declared in one file. A file the grammar cannot parse
    /// at all yields nothing.
    pub fn parse_file(&mut self, rel_path: &str, source: &str) -> Vec<TypeInput> {
        let mut output = Vec::new();
        let Some(tree) = self.parser.parse(source, None) else {
            warn!("failed to parse {rel_path}");
            return output;
        };
        let root = tree.root_node();
        let ctx = Context {
            public_scope: true,
            ..Context::default()
        };
        if root.kind() == "compilation_unit" {
            walk_compilation_unit(root, &ctx, rel_path, source, &mut output);
        } else {
            walk_node(root, &ctx, rel_path, source, &mut output);
        }
        output
    }
}

fn walk_compilation_unit(
    node: Node<'_>,
    ctx: &Context,
    rel_path: &str,
    source: &str,
    output: &mut Vec<TypeInput>,
) {
    let mut next_ctx = ctx.clone();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "file_scoped_namespace_declaration" {
            if let Some(name) = namespace_name(child, source) {
                next_ctx.namespace_stack = namespace_parts(&name);
            }
            break;
        }
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "file_scoped_namespace_declaration" {
            // older grammars nest the following declarations inside it
            walk_declaration_list(child, &next_ctx, rel_path, source, output);
            continue;
        }
        walk_node(child, &next_ctx, rel_path, source, output);
    }
}

fn walk_node(
    node: Node<'_>,
    ctx: &Context,
    rel_path: &str,
    source: &str,
    output: &mut Vec<TypeInput>,
) {
    match node.kind() {
        "namespace_declaration" => handle_namespace(node, ctx, rel_path, source, output),
        "class_declaration" => handle_type(node, ctx, rel_path, source, output, TypeKind::Class),
        "struct_declaration" => handle_type(node, ctx, rel_path, source, output, TypeKind::Struct),
        "interface_declaration" => {
            handle_type(node, ctx, rel_path, source, output, TypeKind::Interface)
        }
        "enum_declaration" => handle_type(node, ctx, rel_path, source, output, TypeKind::Enum),
        "record_struct_declaration" => {
            handle_type(node, ctx, rel_path, source, output, TypeKind::RecordStruct)
        }
        "record_declaration" => {
            let kind = if has_token(node, "struct") {
                TypeKind::RecordStruct
            } else {
                TypeKind::Record
            };
            handle_type(node, ctx, rel_path, source, output, kind)
        }
        "method_declaration" | "local_function_statement" | "block" => {}
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                walk_node(child, ctx, rel_path, source, output);
            }
        }
    }
}

fn walk_declaration_list(
    node: Node<'_>,
    ctx: &Context,
    rel_path: &str,
    source: &str,
    output: &mut Vec<TypeInput>,
) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_node(child, ctx, rel_path, source, output);
    }
}

fn handle_namespace(
    node: Node<'_>,
    ctx: &Context,
    rel_path: &str,
    source: &str,
    output: &mut Vec<TypeInput>,
) {
    let Some(name) = namespace_name(node, source) else {
        return;
    };
    let mut next_ctx = ctx.clone();
    next_ctx.namespace_stack.extend(namespace_parts(&name));
    if let Some(body) = node.child_by_field_name("body") {
        walk_declaration_list(body, &next_ctx, rel_path, source, output);
    }
}

fn handle_type(
    node: Node<'_>,
    ctx: &Context,
    rel_path: &str,
    source: &str,
    output: &mut Vec<TypeInput>,
    kind: TypeKind,
) {
    let Some(name_node) = node.child_by_field_name("name") else {
        return;
    };
    let name = node_text(name_node, source);
    if name.is_empty() {
        return;
    }
    let namespace = if ctx.namespace_stack.is_empty() {
        GLOBAL_NAMESPACE.to_string()
    } else {
        ctx.namespace_stack.join(".")
    };

    let modifiers = collect_modifiers(node, source);
    let default_visibility = if ctx.in_interface {
        Visibility::Public
    } else if ctx.nested {
        Visibility::Private
    } else {
        Visibility::Internal
    };
    let visibility = visibility_from_modifiers(&modifiers, default_visibility);

    let mut record = TypeInput::new(&namespace, &name, kind, rel_path).with_visibility(visibility);
    record.summary = doc_summary(node, source);
    apply_base_list(&mut record, node, source);

    if kind != TypeKind::Enum {
        record.injects = constructor_injects(node, kind, &name, source);
    }

    let exposed = ctx.public_scope && visibility == Visibility::Public;
    if exposed && kind != TypeKind::Enum {
        let route_prefix = route_prefix_from_attributes(node, source)
            .map(|template| expand_route_tokens(&template, &name, None));
        let operation = (kind == TypeKind::Class)
            .then(|| graphql_operation(node, &name, source))
            .flatten();
        if let Some(body) = node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                if member.kind() != "method_declaration" {
                    continue;
                }
                if let Some(method) = read_method(
                    member,
                    kind == TypeKind::Interface,
                    &name,
                    route_prefix.as_deref(),
                    operation,
                    source,
                ) {
                    record.methods.push(method);
                }
            }
        }
    }
    output.push(record);

    if let Some(body) = node.child_by_field_name("body") {
        let mut next_ctx = ctx.clone();
        next_ctx.public_scope = exposed;
        next_ctx.nested = true;
        next_ctx.in_interface = kind == TypeKind::Interface;
        walk_declaration_list(body, &next_ctx, rel_path, source, output);
    }
}

fn read_method(
    node: Node<'_>,
    in_interface: bool,
    type_name: &str,
    route_prefix: Option<&str>,
    operation: Option<Operation>,
    source: &str,
) -> Option<MethodInput> {
    let name = node_text(node.child_by_field_name("name")?, source);
    if name.is_empty() {
        return None;
    }
    // explicit interface implementations are reachable only through the interface
    if has_named_child(node, "explicit_interface_specifier") {
        return None;
    }
    let modifiers = collect_modifiers(node, source);
    let default_visibility = if in_interface {
        Visibility::Public
    } else {
        Visibility::Private
    };
    let visibility = visibility_from_modifiers(&modifiers, default_visibility);
    if visibility != Visibility::Public {
        return None;
    }
    let return_type = node
        .child_by_field_name("returns")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| normalize_type_name(&node_text(n, source)))
        .unwrap_or_else(|| "void".to_string());
    let parameters = node
        .child_by_field_name("parameters")
        .map(|list| read_parameters(list, source))
        .unwrap_or_default();

    let mut endpoints = rest_endpoints(node, type_name, &name, route_prefix, source);
    if let Some(operation) = operation {
        endpoints.push(EndpointInput {
            kind: EndpointKind::GraphQl,
            verb: operation.as_str().to_string(),
            route: graphql_field_name(&name),
        });
    }

    Some(MethodInput {
        name,
        return_type,
        visibility,
        is_static: modifiers.iter().any(|m| m == "static"),
        parameters,
        endpoints,
    })
}

fn read_parameters(list: Node<'_>, source: &str) -> Vec<ParameterInput> {
    let mut out = Vec::new();
    let mut cursor = list.walk();
    for param in list.named_children(&mut cursor) {
        if param.kind() != "parameter" {
            continue;
        }
        let Some(name_node) = param.child_by_field_name("name") else {
            continue;
        };
        let type_name = param
            .child_by_field_name("type")
            .map(|n| normalize_type_name(&node_text(n, source)))
            .unwrap_or_default();
        out.push(ParameterInput {
            name: node_text(name_node, source),
            type_name,
        });
    }
    out
}

/// Dependency type names taken from constructor parameters. Record primary
/// constructors declare data, not dependencies, and are left out.
fn constructor_injects(node: Node<'_>, kind: TypeKind, type_name: &str, source: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |params: Vec<ParameterInput>| {
        for param in params {
            if param.type_name.is_empty() || out.contains(&param.type_name) {
                continue;
            }
            out.push(param.type_name);
        }
    };

    if matches!(kind, TypeKind::Class | TypeKind::Struct) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "parameter_list" {
                push(read_parameters(child, source));
            }
        }
    }
    if let Some(body) = node.child_by_field_name("body") {
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if member.kind() != "constructor_declaration" {
                continue;
            }
            if collect_modifiers(member, source).iter().any(|m| m == "static") {
                continue;
            }
            let same_name = member
                .child_by_field_name("name")
                .map(|n| node_text(n, source) == type_name)
                .unwrap_or(true);
            if !same_name {
                continue;
            }
            if let Some(list) = member.child_by_field_name("parameters") {
                push(read_parameters(list, source));
            }
        }
    }
    out
}

/// Splits the declared bases into an optional base class and interface names.
/// Without semantic information the `I` + uppercase naming convention decides.
fn apply_base_list(record: &mut TypeInput, node: Node<'_>, source: &str) {
    let mut bases = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "base_list" {
            bases.extend(base_list_types(child, source));
        }
    }
    match record.kind {
        TypeKind::Enum => {}
        TypeKind::Class | TypeKind::Record => {
            let mut iter = bases.into_iter().peekable();
            if let Some(first) = iter.peek() {
                if !looks_like_interface(first) {
                    record.base_type = iter.next();
                }
            }
            record.implements.extend(iter);
        }
        TypeKind::Interface | TypeKind::Struct | TypeKind::RecordStruct => {
            record.implements.extend(bases);
        }
    }
}

fn base_list_types(node: Node<'_>, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let name = match child.kind() {
            "argument_list" => continue,
            "primary_constructor_base_type" => child
                .child_by_field_name("type")
                .map(|type_node| node_text(type_node, source))
                .unwrap_or_else(|| {
                    let text = node_text(child, source);
                    text.split('(').next().unwrap_or("").trim().to_string()
                }),
            _ => node_text(child, source),
        };
        let name = normalize_type_name(&name);
        if !name.is_empty() {
            out.push(name);
        }
    }
    out
}

pub fn looks_like_interface(name: &str) -> bool {
    let simple = name.rsplit('.').next().unwrap_or(name);
    let mut chars = simple.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some('I'), Some(second)) if second.is_ascii_uppercase()
    )
}

fn rest_endpoints(
    node: Node<'_>,
    type_name: &str,
    method_name: &str,
    route_prefix: Option<&str>,
    source: &str,
) -> Vec<EndpointInput> {
    let attrs = attributes_for_node(node, source);
    let mut route_template = None;
    let mut saw_route_attr = false;
    let mut verbs: Vec<(String, Option<String>)> = Vec::new();
    for attr in &attrs {
        let name = normalize_attribute_name(&attr.name);
        if name == "Route" {
            saw_route_attr = true;
            if route_template.is_none() {
                route_template = attr.first_string_arg(source);
            }
            continue;
        }
        if name == "AcceptVerbs" {
            for verb in attr.string_args(source) {
                if let Some(verb) = normalize_verb(&verb) {
                    verbs.push((verb, None));
                }
            }
            continue;
        }
        if let Some(verb) = http_verb_from_attribute(&name) {
            verbs.push((verb, attr.first_string_arg(source)));
        }
    }

    if verbs.is_empty() && saw_route_attr {
        verbs.push((HTTP_ANY.to_string(), None));
    }
    let mut out = Vec::new();
    for (verb, template) in verbs {
        let template = template.or_else(|| route_template.clone());
        let Some(route) = combine_route(route_prefix, template.as_deref()) else {
            continue;
        };
        out.push(EndpointInput {
            kind: EndpointKind::Rest,
            verb,
            route: expand_route_tokens(&route, type_name, Some(method_name)),
        });
    }
    out
}

fn route_prefix_from_attributes(node: Node<'_>, source: &str) -> Option<String> {
    attributes_for_node(node, source)
        .iter()
        .filter(|attr| matches!(normalize_attribute_name(&attr.name).as_str(), "Route" | "RoutePrefix"))
        .find_map(|attr| attr.first_string_arg(source))
}

/// Templates starting with `/` or `~/` ignore the controller prefix.
fn combine_route(prefix: Option<&str>, template: Option<&str>) -> Option<String> {
    match (prefix, template) {
        (_, Some(path)) if path.starts_with('/') || path.starts_with("~/") => {
            Some(join_paths(path.trim_start_matches('~'), ""))
        }
        (Some(prefix), Some(path)) => Some(join_paths(prefix, path)),
        (Some(prefix), None) => Some(join_paths(prefix, "")),
        (None, Some(path)) => Some(join_paths("", path)),
        (None, None) => None,
    }
}

fn join_paths(prefix: &str, suffix: &str) -> String {
    let left = prefix.trim().trim_matches('/');
    let right = suffix.trim().trim_matches('/');
    match (left.is_empty(), right.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{right}"),
        (false, true) => format!("/{left}"),
        (false, false) => format!("/{left}/{right}"),
    }
}

fn expand_route_tokens(route: &str, type_name: &str, method_name: Option<&str>) -> String {
    let controller = type_name.strip_suffix("Controller").unwrap_or(type_name);
    let mut expanded = route.replace("[controller]", controller);
    if let Some(method) = method_name {
        expanded = expanded.replace("[action]", method);
    }
    expanded
}

fn graphql_operation(node: Node<'_>, type_name: &str, source: &str) -> Option<Operation> {
    for attr in attributes_for_node(node, source) {
        match normalize_attribute_name(&attr.name).as_str() {
            "QueryType" => return Some(Operation::Query),
            "MutationType" => return Some(Operation::Mutation),
            "SubscriptionType" => return Some(Operation::Subscription),
            "ExtendObjectType" => {
                let target = attr
                    .args
                    .iter()
                    .map(|arg| node_text(*arg, source))
                    .collect::<Vec<_>>()
                    .join(" ");
                return Some(if target.contains("Mutation") {
                    Operation::Mutation
                } else if target.contains("Subscription") {
                    Operation::Subscription
                } else {
                    Operation::Query
                });
            }
            _ => {}
        }
    }
    if type_name.ends_with("Mutation") || type_name.ends_with("Mutations") {
        Some(Operation::Mutation)
    } else if type_name.ends_with("Subscription") || type_name.ends_with("Subscriptions") {
        Some(Operation::Subscription)
    } else if type_name.ends_with("Query") || type_name.ends_with("Queries") {
        Some(Operation::Query)
    } else {
        None
    }
}

/// Resolver methods are exposed without `Get` and `Async` and in camel case.
fn graphql_field_name(method_name: &str) -> String {
    let mut name = method_name.strip_suffix("Async").unwrap_or(method_name);
    if let Some(rest) = name.strip_prefix("Get") {
        if rest.chars().next().is_some_and(|ch| ch.is_ascii_uppercase()) {
            name = rest;
        }
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

struct AttributeInfo<'a> {
    name: String,
    args: Vec<Node<'a>>,
}

impl AttributeInfo<'_> {
    fn first_string_arg(&self, source: &str) -> Option<String> {
        self.args
            .iter()
            .find_map(|arg| extract_string_literal(*arg, source))
    }

    fn string_args(&self, source: &str) -> Vec<String> {
        self.args
            .iter()
            .filter_map(|arg| extract_string_literal(*arg, source))
            .collect()
    }
}

fn attributes_for_node<'a>(node: Node<'a>, source: &str) -> Vec<AttributeInfo<'a>> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() != "attribute_list" {
            continue;
        }
        let mut list_cursor = child.walk();
        for attr in child.named_children(&mut list_cursor) {
            if attr.kind() != "attribute" {
                continue;
            }
            let Some(name_node) = attr.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, source);
            if name.is_empty() {
                continue;
            }
            out.push(AttributeInfo {
                name,
                args: attribute_argument_exprs(attr),
            });
        }
    }
    out
}

fn attribute_argument_exprs(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() != "attribute_argument_list" {
            continue;
        }
        let mut arg_cursor = child.walk();
        for arg in child.named_children(&mut arg_cursor) {
            if arg.kind() != "attribute_argument" {
                continue;
            }
            // the expression is the last named child, after any `Name =` part
            let mut expr_cursor = arg.walk();
            if let Some(expr) = arg.named_children(&mut expr_cursor).last() {
                out.push(expr);
            }
        }
    }
    out
}

fn normalize_attribute_name(raw: &str) -> String {
    let name = raw.rsplit('.').next().unwrap_or(raw);
    name.strip_suffix("Attribute").unwrap_or(name).to_string()
}

fn http_verb_from_attribute(name: &str) -> Option<String> {
    let rest = name.strip_prefix("Http")?;
    if rest.is_empty() {
        return None;
    }
    normalize_verb(rest)
}

fn normalize_verb(raw: &str) -> Option<String> {
    let upper = raw.trim().trim_matches('"').to_ascii_uppercase();
    HTTP_VERBS.contains(&upper.as_str()).then_some(upper)
}

fn extract_string_literal(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string_literal" | "verbatim_string_literal" | "raw_string_literal" => {
            unquote_string_literal(&node_text(node, source))
        }
        _ => None,
    }
}

fn unquote_string_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("@\"") {
        return rest
            .strip_suffix('"')
            .map(|value| value.replace("\"\"", "\""));
    }
    let quote_count = trimmed.chars().take_while(|ch| *ch == '"').count();
    if quote_count >= 3 && trimmed.len() >= quote_count * 2 {
        return Some(trimmed[quote_count..trimmed.len() - quote_count].trim().to_string());
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return Some(trimmed[1..trimmed.len() - 1].to_string());
    }
    None
}

/// `///` lines directly above a declaration, reduced to their summary text.
fn doc_summary(node: Node<'_>, source: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if sibling.kind() != "comment" {
            break;
        }
        let text = node_text(sibling, source);
        let Some(doc) = text.strip_prefix("///") else {
            break;
        };
        lines.push(doc.trim().to_string());
        current = sibling.prev_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let joined = lines.join(" ");
    let body = SUMMARY_RE
        .captures(&joined)
        .map(|caps| caps[1].to_string())
        .unwrap_or(joined);
    let body = SEE_CREF_RE.replace_all(&body, "$1");
    let body = XML_TAG_RE.replace_all(&body, "");
    let summary = body.split_whitespace().collect::<Vec<_>>().join(" ");
    (!summary.is_empty()).then_some(summary)
}

fn collect_modifiers(node: Node<'_>, source: &str) -> Vec<String> {
    let mut modifiers = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "modifier" {
            modifiers.push(node_text(child, source));
        }
    }
    modifiers
}

fn visibility_from_modifiers(modifiers: &[String], default: Visibility) -> Visibility {
    if modifiers.iter().any(|m| m == "public") {
        Visibility::Public
    } else if modifiers.iter().any(|m| m == "protected") {
        Visibility::Protected
    } else if modifiers.iter().any(|m| m == "private") {
        Visibility::Private
    } else if modifiers.iter().any(|m| m == "internal") {
        Visibility::Internal
    } else {
        default
    }
}

fn has_token(node: Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token);
    found
}

fn has_named_child(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).any(|child| child.kind() == kind);
    found
}

fn namespace_name(node: Node<'_>, source: &str) -> Option<String> {
    node.child_by_field_name("name")
        .map(|n| node_text(n, source))
        .filter(|value| !value.is_empty())
}

fn namespace_parts(name: &str) -> Vec<String> {
    name.replace("::", ".")
        .split('.')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Collapses whitespace so `IRepository< Order >` and `IRepository<Order>`
/// produce the same relation name.
fn normalize_type_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for part in raw.split_whitespace() {
        let prev = out.chars().last();
        let next = part.chars().next();
        let glue = matches!(prev, Some('<' | '.' | '(' | '['))
            || matches!(next, Some('<' | '>' | ',' | '.' | ')' | ']' | '?' | '['));
        if !out.is_empty() && !glue {
            out.push(' ');
        }
        out.push_str(part);
    }
    out.replace(",", ", ").replace(",  ", ", ")
}

fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Reads .NET projects: build descriptors, C# sources and settings files.
pub struct DotnetExtractor;

impl SourceExtractor for DotnetExtractor {
    fn extract(&self, project_root: &Path) -> Result<ProjectExtract> {
        let files = scan_project_files(project_root)?;
        let mut extract = ProjectExtract::default();
        let mut parser = CSharpParser::new()?;

        let mut descriptor_errors = Vec::new();
        let mut descriptor_count = 0usize;
        for file in &files {
            let is_project_file = file.kind == FileKind::Descriptor
                && file.rel_path.to_ascii_lowercase().ends_with(".csproj");
            match file.kind {
                FileKind::Descriptor if is_project_file => {
                    descriptor_count += 1;
                    let parsed = util::read_to_string(&file.abs_path)
                        .and_then(|content| msbuild::parse_descriptor(&file.rel_path, &content));
                    match parsed {
                        Ok(assembly) => extract.assemblies.push(assembly),
                        Err(err) => {
                            warn!("skipping descriptor {}: {err:#}", file.rel_path);
                            extract.warnings.push(format!("{}: {err:#}", file.rel_path));
                            descriptor_errors.push(format!("{}: {err:#}", file.rel_path));
                        }
                    }
                }
                FileKind::Config => {
                    let scanned = util::read_to_string(&file.abs_path)
                        .and_then(|content| config_keys::scan_config_file(&file.rel_path, &content));
                    match scanned {
                        Ok(entries) => extract.config_entries.extend(entries),
                        Err(err) => {
                            warn!("skipping settings file {}: {err:#}", file.rel_path);
                            extract.warnings.push(format!("{}: {err:#}", file.rel_path));
                        }
                    }
                }
                FileKind::Source => {
                    let content = match util::read_to_string(&file.abs_path) {
                        Ok(content) => content,
                        Err(err) => {
                            warn!("skipping source {}: {err:#}", file.rel_path);
                            extract.warnings.push(format!("{}: {err:#}", file.rel_path));
                            continue;
                        }
                    };
                    extract.types.extend(parser.parse_file(&file.rel_path, &content));
                    extract
                        .config_entries
                        .extend(config_keys::scan_source(&file.rel_path, &content));
                }
                FileKind::Descriptor | FileKind::Solution => {}
            }
        }

        if descriptor_count > 0 && extract.assemblies.is_empty() {
            bail!(
                "no readable build descriptor ({} malformed): {}",
                descriptor_count,
                descriptor_errors.join("; ")
            );
        }
        debug!(
            "extracted {} assemblies, {} types, {} config keys from {}",
            extract.assemblies.len(),
            extract.types.len(),
            extract.config_entries.len(),
            project_root.display()
        );
        Ok(extract)
    }
}

/// Index of the unit owning `rel_path`: the deepest descriptor directory that
/// contains the file. `None` when no descriptor covers it.
pub fn owning_assembly(assemblies: &[AssemblyInput], rel_path: &str) -> Option<usize> {
    assemblies
        .iter()
        .enumerate()
        .filter(|(_, assembly)| !assembly.descriptor_path.is_empty())
        .filter(|(_, assembly)| {
            let dir = assembly.descriptor_dir();
            dir.is_empty()
                || rel_path
                    .strip_prefix(dir)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
        .max_by_key(|(_, assembly)| assembly.descriptor_dir().len())
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_naming_convention() {
        assert!(looks_like_interface("ICache"));
        assert!(looks_like_interface("Acme.Core.IRepository<Order>"));
        assert!(!looks_like_interface("Index"));
        assert!(!looks_like_interface("ControllerBase"));
    }

    #[test]
    fn test_route_joining() {
        assert_eq!(combine_route(Some("api/[controller]"), Some("{id}")).unwrap(), "/api/[controller]/{id}");
        assert_eq!(combine_route(Some("api/items"), None).unwrap(), "/api/items");
        assert_eq!(combine_route(Some("api/items"), Some("/health")).unwrap(), "/health");
        assert_eq!(combine_route(None, None), None);
        assert_eq!(
            expand_route_tokens("/api/[controller]/[action]", "ContentController", Some("Publish")),
            "/api/Content/Publish"
        );
    }

    #[test]
    fn test_graphql_field_names() {
        assert_eq!(graphql_field_name("GetOrdersAsync"), "orders");
        assert_eq!(graphql_field_name("Getaway"), "getaway");
        assert_eq!(graphql_field_name("PlaceOrder"), "placeOrder");
    }

    #[test]
    fn test_unquote_literals() {
        assert_eq!(unquote_string_literal("\"api/items\"").as_deref(), Some("api/items"));
        assert_eq!(unquote_string_literal("@\"a\"\"b\"").as_deref(), Some("a\"b"));
        assert_eq!(unquote_string_literal("\"\"\"raw\"\"\"").as_deref(), Some("raw"));
        assert_eq!(unquote_string_literal("name"), None);
    }

    #[test]
    fn test_type_names_are_normalized() {
        assert_eq!(normalize_type_name("IRepository< Order >"), "IRepository<Order>");
        assert_eq!(normalize_type_name("IDictionary<string,int>"), "IDictionary<string, int>");
        assert_eq!(normalize_type_name("ILogger<CacheService>"), "ILogger<CacheService>");
    }

    #[test]
    fn test_owning_assembly_prefers_deepest_descriptor() {
        let assemblies = vec![
            AssemblyInput::new("Root.csproj", "Root"),
            AssemblyInput::new("src/Api/Api.csproj", "Api"),
            AssemblyInput::new("src/Api.Tests/Api.Tests.csproj", "Api.Tests"),
        ];
        assert_eq!(owning_assembly(&assemblies, "src/Api/Controllers/A.cs"), Some(1));
        assert_eq!(owning_assembly(&assemblies, "src/Api.Tests/ATests.cs"), Some(2));
        assert_eq!(owning_assembly(&assemblies, "tools/Gen.cs"), Some(0));
        assert_eq!(owning_assembly(&assemblies[1..], "tools/Gen.cs"), None);
    }
}
