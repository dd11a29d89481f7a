use crate::model::{
    ConfigEntryRecord, ConfigSource, EndpointKind, EndpointRecord, Fingerprint, IndexOverview,
    MethodDetail, PackageUsage, ParameterDetail, ProjectSummary, TypeDetail, TypeKind, TypeRef,
    Visibility,
};
use crate::util::escape_like;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::HashMap;

/// Name comparison used by relation lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Exact,
    IgnoreCase,
}

impl NameMatch {
    fn collate(self) -> &'static str {
        match self {
            NameMatch::Exact => "",
            NameMatch::IgnoreCase => " COLLATE NOCASE",
        }
    }
}

/// A type with its outgoing name-keyed relations, as consumed by the
/// pattern rules.
#[derive(Debug, Clone)]
pub struct TypeFacts {
    pub type_ref: TypeRef,
    pub implements: Vec<String>,
    pub injects: Vec<String>,
}

const TYPE_REF_COLUMNS: &str =
    "t.id, t.name, t.kind, t.visibility, t.namespace, t.assembly, t.project, t.file_path";

/// Read queries over one connection. Built by [`super::Db::read`] so all
/// calls share a snapshot.
pub struct StoreReader<'a> {
    conn: &'a Connection,
}

impl<'a> StoreReader<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn fingerprints(&self) -> Result<Vec<Fingerprint>> {
        let mut stmt = self.conn.prepare(
            "SELECT project_name, hash, scanned_at FROM scan_fingerprints ORDER BY project_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Fingerprint {
                project: row.get(0)?,
                hash: row.get(1)?,
                scanned_at: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn project_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM projects ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every assembly name in the store, with the owning project.
    pub fn assembly_names(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name, a.name FROM assemblies a
             JOIN projects p ON p.id = a.project_id
             ORDER BY p.name, a.name",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Canonical project name for a case-insensitive lookup.
    pub fn find_project(&self, name: &str) -> Result<Option<String>> {
        let found = self
            .conn
            .query_row(
                "SELECT name FROM projects WHERE name = ? COLLATE NOCASE ORDER BY name LIMIT 1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found)
    }

    pub fn project_summaries(&self, limit: usize) -> Result<Vec<ProjectSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name, p.path, p.solution, p.remote_url, p.default_branch, p.scanned_at,
                    (SELECT COUNT(*) FROM assemblies a WHERE a.project_id = p.id),
                    (SELECT COUNT(*) FROM type_view t WHERE t.project_id = p.id)
             FROM projects p
             ORDER BY p.name
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ProjectSummary {
                name: row.get(0)?,
                path: row.get(1)?,
                solution: row.get(2)?,
                remote_url: row.get(3)?,
                default_branch: row.get(4)?,
                scanned_at: row.get(5)?,
                assembly_count: row.get::<_, i64>(6)? as usize,
                type_count: row.get::<_, i64>(7)? as usize,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Case-insensitive substring search over type names.
    pub fn search_types(
        &self,
        query: &str,
        project: Option<&str>,
        kind: Option<TypeKind>,
        limit: usize,
    ) -> Result<Vec<TypeRef>> {
        let pattern = format!("%{}%", escape_like(query));
        let sql = format!(
            "SELECT {TYPE_REF_COLUMNS} FROM type_view t
             WHERE t.name LIKE ?1 ESCAPE '\\'
               AND (?2 IS NULL OR t.project = ?2 COLLATE NOCASE)
               AND (?3 IS NULL OR t.kind = ?3)
             ORDER BY (lower(t.name) = lower(?4)) DESC, length(t.name), t.name, t.project
             LIMIT ?5"
        );
        self.type_refs(
            &sql,
            params![pattern, project, kind.map(TypeKind::as_str), query, limit as i64],
        )
    }

    /// Types declaring `interface`, optionally within one project.
    pub fn implementations(
        &self,
        interface: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TypeRef>> {
        let sql = format!(
            "SELECT DISTINCT {TYPE_REF_COLUMNS} FROM type_view t
             JOIN type_implements i ON i.type_id = t.id
             WHERE i.interface_name = ?1 COLLATE NOCASE
               AND (?2 IS NULL OR t.project = ?2 COLLATE NOCASE)
             ORDER BY t.project, t.name
             LIMIT ?3"
        );
        self.type_refs(&sql, params![interface, project, limit as i64])
    }

    pub fn implementors_of(&self, name: &str, matching: NameMatch) -> Result<Vec<TypeRef>> {
        let sql = format!(
            "SELECT DISTINCT {TYPE_REF_COLUMNS} FROM type_view t
             JOIN type_implements i ON i.type_id = t.id
             WHERE i.interface_name = ?1{}
             ORDER BY t.project, t.name, t.id",
            matching.collate()
        );
        self.type_refs(&sql, params![name])
    }

    pub fn injectors_of(&self, name: &str, matching: NameMatch) -> Result<Vec<TypeRef>> {
        let sql = format!(
            "SELECT DISTINCT {TYPE_REF_COLUMNS} FROM type_view t
             JOIN type_injects d ON d.type_id = t.id
             WHERE d.dependency_name = ?1{}
             ORDER BY t.project, t.name, t.id",
            matching.collate()
        );
        self.type_refs(&sql, params![name])
    }

    /// Exact base-type string match.
    pub fn inheritors_of(&self, name: &str) -> Result<Vec<TypeRef>> {
        let sql = format!(
            "SELECT {TYPE_REF_COLUMNS} FROM type_view t
             WHERE t.base_type = ?1
             ORDER BY t.project, t.name, t.id"
        );
        self.type_refs(&sql, params![name])
    }

    pub fn public_types_named(&self, name: &str) -> Result<Vec<TypeRef>> {
        let sql = format!(
            "SELECT {TYPE_REF_COLUMNS} FROM type_view t
             WHERE t.name = ?1 AND t.visibility = 'public'
             ORDER BY t.project, t.id"
        );
        self.type_refs(&sql, params![name])
    }

    pub fn non_test_assembly_names(&self, project: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT a.name FROM assemblies a
             JOIN projects p ON p.id = a.project_id
             WHERE p.name = ? AND a.is_test = 0
             ORDER BY a.name",
        )?;
        let rows = stmt.query_map(params![project], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Projects holding an internal package reference to `package`, as
    /// `(project, referenced package name)`.
    pub fn internal_consumers(&self, package: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT p.name, pr.name FROM package_references pr
             JOIN assemblies a ON a.id = pr.assembly_id
             JOIN projects p ON p.id = a.project_id
             WHERE pr.is_internal = 1 AND pr.name = ? COLLATE NOCASE
             ORDER BY p.name",
        )?;
        let rows = stmt.query_map(params![package], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Projects producing the internal packages `project` consumes, as
    /// `(producing project, package name)`.
    pub fn internal_providers(&self, project: &str) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT p2.name, pr.name FROM package_references pr
             JOIN assemblies a ON a.id = pr.assembly_id
             JOIN projects p ON p.id = a.project_id
             JOIN assemblies a2 ON a2.name = pr.name COLLATE NOCASE AND a2.is_test = 0
             JOIN projects p2 ON p2.id = a2.project_id
             WHERE p.name = ? AND pr.is_internal = 1 AND p2.id <> p.id
             ORDER BY p2.name, pr.name",
        )?;
        let rows = stmt.query_map(params![project], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every type (optionally of one project) with its implements and
    /// injects lists.
    pub fn type_facts(&self, project: Option<&str>) -> Result<Vec<TypeFacts>> {
        let sql = format!(
            "SELECT {TYPE_REF_COLUMNS} FROM type_view t
             WHERE ?1 IS NULL OR t.project = ?1 COLLATE NOCASE
             ORDER BY t.project, t.name, t.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((row.get::<_, i64>(0)?, type_ref_from_row(row)?))
        })?;
        let mut types = Vec::new();
        for row in rows {
            types.push(row?);
        }

        let mut implements = self.relation_map(
            "SELECT i.type_id, i.interface_name FROM type_implements i
             JOIN type_view t ON t.id = i.type_id
             WHERE ?1 IS NULL OR t.project = ?1 COLLATE NOCASE
             ORDER BY i.interface_name",
            project,
        )?;
        let mut injects = self.relation_map(
            "SELECT d.type_id, d.dependency_name FROM type_injects d
             JOIN type_view t ON t.id = d.type_id
             WHERE ?1 IS NULL OR t.project = ?1 COLLATE NOCASE
             ORDER BY d.dependency_name",
            project,
        )?;

        Ok(types
            .into_iter()
            .map(|(id, type_ref)| TypeFacts {
                type_ref,
                implements: implements.remove(&id).unwrap_or_default(),
                injects: injects.remove(&id).unwrap_or_default(),
            })
            .collect())
    }

    fn relation_map(&self, sql: &str, project: Option<&str>) -> Result<HashMap<i64, Vec<String>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![project], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            let (type_id, name) = row?;
            map.entry(type_id).or_default().push(name);
        }
        Ok(map)
    }

    pub fn package_usages(&self, package: Option<&str>) -> Result<Vec<PackageUsage>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.name, a.name, pr.name, pr.version, pr.is_internal
             FROM package_references pr
             JOIN assemblies a ON a.id = pr.assembly_id
             JOIN projects p ON p.id = a.project_id
             WHERE ?1 IS NULL OR pr.name = ?1 COLLATE NOCASE
             ORDER BY lower(pr.name), p.name, a.name",
        )?;
        let rows = stmt.query_map(params![package], |row| {
            Ok(PackageUsage {
                project: row.get(0)?,
                assembly: row.get(1)?,
                package: row.get(2)?,
                version: row.get(3)?,
                is_internal: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every type named `name` (case-insensitive) with its members.
    pub fn type_details(&self, name: &str) -> Result<Vec<TypeDetail>> {
        let sql = format!(
            "SELECT {TYPE_REF_COLUMNS}, t.base_type, t.summary FROM type_view t
             WHERE t.name = ?1 COLLATE NOCASE
             ORDER BY t.project, t.namespace, t.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![name], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                type_ref_from_row(row)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
            ))
        })?;
        let mut found = Vec::new();
        for row in rows {
            found.push(row?);
        }

        let mut out = Vec::with_capacity(found.len());
        for (type_id, type_ref, base_type, summary) in found {
            let implements = self.names_for_type(
                "SELECT interface_name FROM type_implements WHERE type_id = ? ORDER BY interface_name",
                type_id,
            )?;
            let injects = self.names_for_type(
                "SELECT dependency_name FROM type_injects WHERE type_id = ? ORDER BY dependency_name",
                type_id,
            )?;
            let methods = self.methods_for_type(type_id, &type_ref)?;
            out.push(TypeDetail {
                type_ref,
                base_type,
                summary,
                implements,
                injects,
                methods,
            });
        }
        Ok(out)
    }

    fn names_for_type(&self, sql: &str, type_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![type_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn methods_for_type(&self, type_id: i64, type_ref: &TypeRef) -> Result<Vec<MethodDetail>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, name, return_type, visibility, is_static FROM methods
             WHERE type_id = ? ORDER BY id",
        )?;
        let rows = stmt.query_map(params![type_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;
        let mut methods = Vec::new();
        for row in rows {
            methods.push(row?);
        }

        let mut param_stmt = self.conn.prepare_cached(
            "SELECT name, type_name, ordinal FROM parameters WHERE method_id = ? ORDER BY ordinal",
        )?;
        let mut endpoint_stmt = self.conn.prepare_cached(
            "SELECT kind, verb, route FROM endpoints WHERE method_id = ? ORDER BY id",
        )?;
        let mut out = Vec::with_capacity(methods.len());
        for (method_id, name, return_type, visibility, is_static) in methods {
            let parameters = param_stmt
                .query_map(params![method_id], |row| {
                    Ok(ParameterDetail {
                        name: row.get(0)?,
                        type_name: row.get(1)?,
                        ordinal: row.get::<_, i64>(2)? as usize,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            let endpoints = endpoint_stmt
                .query_map(params![method_id], |row| {
                    Ok(EndpointRecord {
                        kind: EndpointKind::parse(&row.get::<_, String>(0)?),
                        verb: row.get(1)?,
                        route: row.get(2)?,
                        type_name: type_ref.name.clone(),
                        method_name: name.clone(),
                        project: type_ref.project.clone(),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(MethodDetail {
                name,
                return_type,
                visibility: Visibility::parse(&visibility),
                is_static,
                parameters,
                endpoints,
            });
        }
        Ok(out)
    }

    /// Endpoints whose route, verb or owning type contains `query`.
    pub fn endpoints(
        &self,
        project: Option<&str>,
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EndpointRecord>> {
        let pattern = query.map(|q| format!("%{}%", escape_like(q)));
        let mut stmt = self.conn.prepare(
            "SELECT e.kind, e.verb, e.route, t.name, m.name, t.project
             FROM endpoints e
             JOIN methods m ON m.id = e.method_id
             JOIN type_view t ON t.id = e.type_id
             WHERE (?1 IS NULL OR t.project = ?1 COLLATE NOCASE)
               AND (?2 IS NULL OR e.route LIKE ?2 ESCAPE '\\' OR e.verb LIKE ?2 ESCAPE '\\'
                    OR t.name LIKE ?2 ESCAPE '\\')
             ORDER BY t.project, e.route, e.verb
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![project, pattern, limit as i64], |row| {
            Ok(EndpointRecord {
                kind: EndpointKind::parse(&row.get::<_, String>(0)?),
                verb: row.get(1)?,
                route: row.get(2)?,
                type_name: row.get(3)?,
                method_name: row.get(4)?,
                project: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn config_entries(
        &self,
        query: &str,
        project: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ConfigEntryRecord>> {
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = self.conn.prepare(
            "SELECT project_name, source, key, default_value, file_path FROM config_entries
             WHERE key LIKE ?1 ESCAPE '\\'
               AND (?2 IS NULL OR project_name = ?2 COLLATE NOCASE)
             ORDER BY key, project_name, source, file_path
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![pattern, project, limit as i64], |row| {
            Ok(ConfigEntryRecord {
                project: row.get(0)?,
                source: ConfigSource::parse(&row.get::<_, String>(1)?),
                key: row.get(2)?,
                default_value: row.get(3)?,
                file_path: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn overview(&self) -> Result<IndexOverview> {
        let count = |sql: &str| -> Result<usize> {
            let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(value as usize)
        };
        let last_scan: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'last_scan'", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(IndexOverview {
            projects: count("SELECT COUNT(*) FROM projects")?,
            assemblies: count("SELECT COUNT(*) FROM assemblies")?,
            package_references: count("SELECT COUNT(*) FROM package_references")?,
            internal_package_references: count(
                "SELECT COUNT(*) FROM package_references WHERE is_internal = 1",
            )?,
            types: count("SELECT COUNT(*) FROM types")?,
            methods: count("SELECT COUNT(*) FROM methods")?,
            endpoints: count("SELECT COUNT(*) FROM endpoints")?,
            config_entries: count("SELECT COUNT(*) FROM config_entries")?,
            last_scan: last_scan.and_then(|value| value.parse().ok()),
        })
    }

    fn type_refs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<TypeRef>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, type_ref_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Reads the `TYPE_REF_COLUMNS` layout; column 0 is the type id.
fn type_ref_from_row(row: &Row<'_>) -> rusqlite::Result<TypeRef> {
    let kind: String = row.get(2)?;
    let visibility: String = row.get(3)?;
    Ok(TypeRef {
        name: row.get(1)?,
        kind: TypeKind::parse(&kind).unwrap_or(TypeKind::Class),
        visibility: Visibility::parse(&visibility),
        namespace: row.get(4)?,
        assembly: row.get(5)?,
        project: row.get(6)?,
        file_path: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::db::tests::create_test_db;
    use crate::db::{NameMatch, ProjectRecord, ProjectSnapshot};
    use crate::indexer::extract::{AssemblyInput, TypeInput};
    use crate::model::{TypeKind, Visibility};

    fn seed(db: &crate::db::Db) {
        db.replace_project(
            &ProjectSnapshot::new(ProjectRecord::new("acme.caching", "acme.caching")).with_unit(
                AssemblyInput::new("Acme.Caching.csproj", "Acme.Caching"),
                vec![
                    TypeInput::new("Acme.Caching", "ICoherentCache", TypeKind::Interface, "a.cs"),
                    TypeInput::new("Acme.Caching", "CoherentCacheService", TypeKind::Class, "b.cs")
                        .with_implements(&["ICoherentCache"]),
                    TypeInput::new("Acme.Caching", "CacheEvictionHandler", TypeKind::Class, "c.cs")
                        .with_injects(&["icoherentcache"]),
                    TypeInput::new("Acme.Caching", "InternalHelper", TypeKind::Class, "d.cs")
                        .with_visibility(Visibility::Internal),
                ],
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_relation_lookup_honours_match_mode() {
        let (db, _temp) = create_test_db();
        seed(&db);
        db.read(|reader| {
            assert_eq!(reader.injectors_of("ICoherentCache", NameMatch::Exact)?.len(), 0);
            let injectors = reader.injectors_of("ICoherentCache", NameMatch::IgnoreCase)?;
            assert_eq!(injectors[0].name, "CacheEvictionHandler");
            assert_eq!(
                reader.implementors_of("ICoherentCache", NameMatch::Exact)?[0].name,
                "CoherentCacheService"
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_search_types_prefers_exact_name() {
        let (db, _temp) = create_test_db();
        seed(&db);
        let hits = db
            .read(|reader| reader.search_types("coherentcache", None, None, 10))
            .unwrap();
        assert_eq!(hits.len(), 2);
        let hits = db
            .read(|reader| reader.search_types("Cache", None, Some(TypeKind::Interface), 10))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "ICoherentCache");
    }

    #[test]
    fn test_public_types_skip_internal() {
        let (db, _temp) = create_test_db();
        seed(&db);
        let found = db
            .read(|reader| reader.public_types_named("InternalHelper"))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_type_facts_scoped_to_project() {
        let (db, _temp) = create_test_db();
        seed(&db);
        let facts = db.read(|reader| reader.type_facts(Some("ACME.CACHING"))).unwrap();
        assert_eq!(facts.len(), 4);
        let service = facts
            .iter()
            .find(|f| f.type_ref.name == "CoherentCacheService")
            .unwrap();
        assert_eq!(service.implements, vec!["ICoherentCache"]);
        assert!(db.read(|reader| reader.type_facts(Some("other"))).unwrap().is_empty());
    }
}
