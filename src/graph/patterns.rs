//! Naming-convention pattern rules.
//!
//! Each rule is an independent predicate over the same type facts; none looks
//! at another's output. The conventions are heuristics and will miss or
//! over-report some code.

use super::types::{PatternFinding, PatternKind, PatternReport};
use crate::db::{StoreReader, TypeFacts};
use crate::model::TypeKind;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

const HANDLER_INTERFACES: &[&str] = &[
    "ICommandHandler",
    "IQueryHandler",
    "IRequestHandler",
    "INotificationHandler",
];
const EVENT_SUFFIXES: &[&str] = &["DomainEvent", "EventStore", "EventHandler"];
const OPTIONS_WRAPPERS: &[&str] = &["IOptions<", "IOptionsSnapshot<", "IOptionsMonitor<"];

#[derive(Debug, Clone, Copy)]
pub struct PatternSettings {
    /// Distinct injected dependencies at which a type is flagged.
    pub high_coupling_threshold: usize,
}

type Rule = fn(&[TypeFacts], &PatternSettings) -> Vec<PatternFinding>;

const RULES: &[(PatternKind, Rule)] = &[
    (PatternKind::Repository, repository),
    (PatternKind::Decorator, decorator),
    (PatternKind::Cqrs, cqrs),
    (PatternKind::Factory, factory),
    (PatternKind::EventSourcing, event_sourcing),
    (PatternKind::Options, options),
    (PatternKind::ServiceLayer, service_layer),
    (PatternKind::HighCoupling, high_coupling),
    (PatternKind::UnitOfWork, unit_of_work),
];

/// Runs every rule over the types of `project` (all projects when `None`).
pub fn detect_patterns(
    reader: &StoreReader<'_>,
    project: Option<&str>,
    settings: &PatternSettings,
) -> Result<PatternReport> {
    let facts = reader.type_facts(project)?;
    let findings = RULES
        .iter()
        .flat_map(|(_, rule)| rule(&facts, settings))
        .collect();
    Ok(PatternReport {
        project: project.map(str::to_string),
        findings,
    })
}

/// `IRepository<Order>` -> `IRepository`, `Acme.Data.IRepo` -> `IRepo`.
fn simple_name(name: &str) -> &str {
    let without_generics = name.split('<').next().unwrap_or(name).trim();
    without_generics
        .rsplit('.')
        .next()
        .unwrap_or(without_generics)
}

fn sorted_names<'a>(types: impl IntoIterator<Item = &'a TypeFacts>) -> Vec<String> {
    types
        .into_iter()
        .map(|facts| facts.type_ref.name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Single project of a group of types, if they share one.
fn common_project<'a>(types: impl IntoIterator<Item = &'a TypeFacts>) -> Option<String> {
    let projects: BTreeSet<&str> = types
        .into_iter()
        .map(|facts| facts.type_ref.project.as_str())
        .collect();
    match projects.len() {
        1 => projects.into_iter().next().map(str::to_string),
        _ => None,
    }
}

fn per_type(
    facts: &[TypeFacts],
    kind: PatternKind,
    matches: impl Fn(&TypeFacts) -> Option<String>,
) -> Vec<PatternFinding> {
    facts
        .iter()
        .filter_map(|type_facts| {
            matches(type_facts).map(|detail| PatternFinding {
                kind,
                subject: type_facts.type_ref.name.clone(),
                project: Some(type_facts.type_ref.project.clone()),
                detail,
                types: vec![type_facts.type_ref.name.clone()],
            })
        })
        .collect()
}

fn repository(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    let mut implementors: BTreeMap<String, Vec<&TypeFacts>> = BTreeMap::new();
    for type_facts in facts {
        for iface in &type_facts.implements {
            if simple_name(iface).ends_with("Repository") {
                implementors
                    .entry(simple_name(iface).to_string())
                    .or_default()
                    .push(type_facts);
            }
        }
    }
    implementors
        .into_iter()
        .map(|(iface, types)| PatternFinding {
            kind: PatternKind::Repository,
            detail: format!("{} implementation(s) of {iface}", types.len()),
            project: common_project(types.iter().copied()),
            types: sorted_names(types.iter().copied()),
            subject: iface,
        })
        .collect()
}

fn decorator(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::Decorator, |type_facts| {
        type_facts
            .implements
            .iter()
            .find(|iface| {
                type_facts
                    .injects
                    .iter()
                    .any(|dep| dep.eq_ignore_ascii_case(iface))
            })
            .map(|iface| format!("implements and wraps {iface}"))
    })
}

fn cqrs(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::Cqrs, |type_facts| {
        let name = simple_name(&type_facts.type_ref.name);
        if name.ends_with("CommandHandler") {
            return Some("command handler".to_string());
        }
        if name.ends_with("QueryHandler") {
            return Some("query handler".to_string());
        }
        type_facts
            .implements
            .iter()
            .find(|iface| HANDLER_INTERFACES.contains(&simple_name(iface)))
            .map(|iface| format!("handles {iface}"))
    })
}

fn factory(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::Factory, |type_facts| {
        simple_name(&type_facts.type_ref.name)
            .ends_with("Factory")
            .then(|| format!("{} factory", type_facts.type_ref.kind))
    })
}

fn event_sourcing(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::EventSourcing, |type_facts| {
        let name = simple_name(&type_facts.type_ref.name);
        EVENT_SUFFIXES
            .iter()
            .find(|suffix| name.ends_with(*suffix))
            .map(|suffix| format!("{suffix} convention"))
    })
}

fn options(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::Options, |type_facts| {
        let bound: Vec<&str> = type_facts
            .injects
            .iter()
            .filter(|dep| OPTIONS_WRAPPERS.iter().any(|wrapper| dep.starts_with(wrapper)))
            .map(String::as_str)
            .collect();
        (!bound.is_empty()).then(|| format!("binds {}", bound.join(", ")))
    })
}

/// One aggregate finding: how many classes implement `*Service` interfaces.
fn service_layer(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    let services: Vec<&TypeFacts> = facts
        .iter()
        .filter(|type_facts| type_facts.type_ref.kind == TypeKind::Class)
        .filter(|type_facts| {
            type_facts
                .implements
                .iter()
                .any(|iface| simple_name(iface).ends_with("Service"))
        })
        .collect();
    if services.is_empty() {
        return Vec::new();
    }
    vec![PatternFinding {
        kind: PatternKind::ServiceLayer,
        subject: "*Service".to_string(),
        project: common_project(services.iter().copied()),
        detail: format!("{} class(es) implement service interfaces", services.len()),
        types: sorted_names(services.iter().copied()),
    }]
}

fn high_coupling(facts: &[TypeFacts], settings: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::HighCoupling, |type_facts| {
        let distinct: BTreeSet<String> = type_facts
            .injects
            .iter()
            .map(|dep| dep.to_lowercase())
            .collect();
        (distinct.len() >= settings.high_coupling_threshold).then(|| {
            format!(
                "{} injected dependencies (threshold {})",
                distinct.len(),
                settings.high_coupling_threshold
            )
        })
    })
}

fn unit_of_work(facts: &[TypeFacts], _: &PatternSettings) -> Vec<PatternFinding> {
    per_type(facts, PatternKind::UnitOfWork, |type_facts| {
        if simple_name(&type_facts.type_ref.name).ends_with("UnitOfWork") {
            return Some("unit of work type".to_string());
        }
        type_facts
            .implements
            .iter()
            .find(|iface| simple_name(iface) == "IUnitOfWork")
            .map(|_| "implements IUnitOfWork".to_string())
    })
}
