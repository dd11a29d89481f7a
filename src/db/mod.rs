use crate::config::Config;
use crate::error::IndexError;
use crate::indexer::extract::{AssemblyInput, ConfigEntryInput, TypeInput};
use crate::model::Fingerprint;
use crate::util::{ensure_parent_dir, now_secs};
use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

mod migrations;
mod reader;

pub use migrations::SCHEMA_VERSION;
pub use reader::{NameMatch, StoreReader, TypeFacts};

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// Project row metadata.
#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub name: String,
    pub path: String,
    pub solution: Option<String>,
    pub remote_url: Option<String>,
    pub default_branch: Option<String>,
}

impl ProjectRecord {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            solution: None,
            remote_url: None,
            default_branch: None,
        }
    }
}

/// An assembly together with the types attributed to it.
#[derive(Debug, Clone)]
pub struct AssemblyUnit {
    pub assembly: AssemblyInput,
    pub types: Vec<TypeInput>,
}

/// Everything written for one project in one atomic replace.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub project: ProjectRecord,
    pub units: Vec<AssemblyUnit>,
    pub config_entries: Vec<ConfigEntryInput>,
    /// Upserted in the same transaction when present.
    pub fingerprint: Option<String>,
}

impl ProjectSnapshot {
    pub fn new(project: ProjectRecord) -> Self {
        Self {
            project,
            units: Vec::new(),
            config_entries: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn with_unit(mut self, assembly: AssemblyInput, types: Vec<TypeInput>) -> Self {
        self.units.push(AssemblyUnit { assembly, types });
        self
    }

    pub fn type_count(&self) -> usize {
        self.units.iter().map(|unit| unit.types.len()).sum()
    }

    /// Flags package references whose lowercased name is in `assemblies`.
    /// Returns how many were flagged.
    pub fn mark_internal_packages(&mut self, assemblies: &HashSet<String>) -> usize {
        let mut flagged = 0;
        for package in self
            .units
            .iter_mut()
            .flat_map(|unit| unit.assembly.packages.iter_mut())
        {
            package.is_internal = assemblies.contains(&package.name.to_lowercase());
            flagged += usize::from(package.is_internal);
        }
        flagged
    }
}

/// Child-to-parent delete sequence for one project. `?1` is the project id,
/// `?2` the project name.
const PROJECT_CASCADE: &[(&str, &str)] = &[
    (
        "endpoints",
        "DELETE FROM endpoints WHERE type_id IN
            (SELECT id FROM type_view WHERE project_id = ?1)",
    ),
    (
        "parameters",
        "DELETE FROM parameters WHERE method_id IN
            (SELECT m.id FROM methods m JOIN type_view t ON t.id = m.type_id
             WHERE t.project_id = ?1)",
    ),
    (
        "methods",
        "DELETE FROM methods WHERE type_id IN
            (SELECT id FROM type_view WHERE project_id = ?1)",
    ),
    (
        "type_injects",
        "DELETE FROM type_injects WHERE type_id IN
            (SELECT id FROM type_view WHERE project_id = ?1)",
    ),
    (
        "type_implements",
        "DELETE FROM type_implements WHERE type_id IN
            (SELECT id FROM type_view WHERE project_id = ?1)",
    ),
    (
        "types",
        "DELETE FROM types WHERE namespace_id IN
            (SELECT n.id FROM namespaces n JOIN assemblies a ON a.id = n.assembly_id
             WHERE a.project_id = ?1)",
    ),
    (
        "namespaces",
        "DELETE FROM namespaces WHERE assembly_id IN
            (SELECT id FROM assemblies WHERE project_id = ?1)",
    ),
    (
        "package_references",
        "DELETE FROM package_references WHERE assembly_id IN
            (SELECT id FROM assemblies WHERE project_id = ?1)",
    ),
    (
        "project_references",
        "DELETE FROM project_references WHERE assembly_id IN
            (SELECT id FROM assemblies WHERE project_id = ?1)",
    ),
    ("assemblies", "DELETE FROM assemblies WHERE project_id = ?1"),
    ("projects", "DELETE FROM projects WHERE id = ?1"),
];

pub struct Db {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Db {
    /// Opens an index that must already exist.
    ///
    /// A missing file is [`IndexError::Unavailable`]; a file that cannot be
    /// read as a current-schema index is [`IndexError::Corrupt`]. Neither case
    /// falls back to creating a new store.
    pub fn open_existing(db_path: &Path) -> Result<Self> {
        if !db_path.is_file() {
            return Err(IndexError::Unavailable {
                path: db_path.to_path_buf(),
            }
            .into());
        }
        let write_conn = open_write_conn(db_path).map_err(|err| corrupt(db_path, err))?;
        match migrations::stored_schema_version(&write_conn) {
            Ok(Some(version)) if version == SCHEMA_VERSION => {}
            Ok(Some(version)) => {
                return Err(corrupt(
                    db_path,
                    format!(
                        "schema version {version}, expected {SCHEMA_VERSION}; rebuild with `scan --rebuild`"
                    ),
                ));
            }
            Ok(None) => return Err(corrupt(db_path, "not a reposcope index")),
            Err(err) => return Err(corrupt(db_path, err)),
        }
        Self::with_write_conn(db_path, write_conn)
    }

    /// Opens the index for writing, creating it when absent.
    ///
    /// A file left by another schema version is stale and gets replaced. A
    /// file SQLite cannot read is surfaced as [`IndexError::Corrupt`].
    pub fn create(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Self::create_fresh(db_path);
        }
        let write_conn = open_write_conn(db_path).map_err(|err| corrupt(db_path, err))?;
        let stale = match migrations::stored_schema_version(&write_conn) {
            Ok(Some(version)) => version != SCHEMA_VERSION,
            Ok(None) => has_foreign_tables(&write_conn).map_err(|err| corrupt(db_path, err))?,
            Err(err) => return Err(corrupt(db_path, err)),
        };
        if stale {
            warn!(path = %db_path.display(), "discarding stale index");
            drop(write_conn);
            return Self::create_fresh(db_path);
        }
        migrations::migrate(&write_conn).map_err(|err| corrupt(db_path, err))?;
        Self::with_write_conn(db_path, write_conn)
    }

    /// Discards whatever is at `db_path` and creates an empty index.
    pub fn create_fresh(db_path: &Path) -> Result<Self> {
        ensure_parent_dir(db_path)?;
        remove_store_files(db_path)?;
        info!(path = %db_path.display(), "creating index");
        let write_conn = open_write_conn(db_path)?;
        migrations::migrate(&write_conn)?;
        Self::with_write_conn(db_path, write_conn)
    }

    fn with_write_conn(db_path: &Path, write_conn: Connection) -> Result<Self> {
        let config = Config::get();
        debug!(
            pool_size = config.pool_size,
            min_idle = config.pool_min_idle,
            "initializing read pool"
        );

        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .min_idle(Some(config.pool_min_idle.min(config.pool_size)))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .with_context(|| "create connection pool")?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    /// Get the database file path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .with_context(|| "get read connection from pool")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.write_conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` inside one read transaction so every query it makes sees the
    /// same snapshot.
    pub fn read<T>(&self, f: impl FnOnce(&StoreReader<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.read_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&StoreReader::new(&tx))?;
        tx.commit()?;
        Ok(out)
    }

    pub fn upsert_project(&self, project: &ProjectRecord) -> Result<i64> {
        let conn = self.conn();
        upsert_project_row(&conn, project)
    }

    /// Writes the assembly row and replaces its package and project
    /// references. New package references always start external.
    pub fn upsert_assembly(&self, project_id: i64, assembly: &AssemblyInput) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let id = upsert_assembly_row(&tx, project_id, assembly)?;
        tx.commit()?;
        Ok(id)
    }

    /// Idempotent: the same (assembly, name) pair always yields one row.
    pub fn ensure_namespace(&self, assembly_id: i64, name: &str) -> Result<i64> {
        let conn = self.conn();
        ensure_namespace_row(&conn, assembly_id, name)
    }

    /// Bulk insert of types with their methods, parameters, endpoints and
    /// name-keyed relations for one assembly.
    pub fn insert_entities(&self, assembly_id: i64, types: &[TypeInput]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = insert_entity_rows(&tx, assembly_id, types)?;
        tx.commit()?;
        Ok(inserted)
    }

    pub fn insert_config_entries(
        &self,
        project_name: &str,
        entries: &[ConfigEntryInput],
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let inserted = insert_config_rows(&tx, project_name, entries)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Removes a project and its whole subtree in one transaction. Returns
    /// whether a project row existed.
    pub fn delete_project(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existed = delete_project_rows(&tx, name)?;
        tx.commit()?;
        Ok(existed)
    }

    /// Delete-then-insert of one project as a single atomic unit. Readers see
    /// either the previous subtree or the new one.
    pub fn replace_project(&self, snapshot: &ProjectSnapshot) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let name = &snapshot.project.name;
        if delete_project_rows(&tx, name)? {
            debug!(project = %name, "replacing previous index rows");
        }
        let project_id = upsert_project_row(&tx, &snapshot.project)?;
        let mut types = 0;
        for unit in &snapshot.units {
            let assembly_id = upsert_assembly_row(&tx, project_id, &unit.assembly)?;
            types += insert_entity_rows(&tx, assembly_id, &unit.types)?;
        }
        insert_config_rows(&tx, name, &snapshot.config_entries)?;
        if let Some(hash) = &snapshot.fingerprint {
            upsert_fingerprint_row(&tx, name, hash)?;
        }
        promote_internal_rows(&tx)?;
        tx.commit()?;
        Ok(types)
    }

    /// Flags every package reference whose name matches an assembly name
    /// anywhere in the corpus (case-insensitive) and clears the flag on the
    /// rest. Returns the number of internal references.
    pub fn resolve_internal_packages(&self) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE package_references
             SET is_internal = CASE WHEN EXISTS (
                 SELECT 1 FROM assemblies a WHERE a.name = package_references.name COLLATE NOCASE
             ) THEN 1 ELSE 0 END",
            [],
        )?;
        let internal: i64 = tx.query_row(
            "SELECT COUNT(*) FROM package_references WHERE is_internal = 1",
            [],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(internal as usize)
    }

    /// Full fingerprint table keyed by project name; empty on a fresh store.
    pub fn read_fingerprints(&self) -> Result<HashMap<String, Fingerprint>> {
        self.read(|reader| {
            Ok(reader
                .fingerprints()?
                .into_iter()
                .map(|fp| (fp.project.clone(), fp))
                .collect())
        })
    }

    pub fn upsert_fingerprint(&self, project_name: &str, hash: &str) -> Result<()> {
        let conn = self.conn();
        upsert_fingerprint_row(&conn, project_name, hash)
    }

    pub fn clear_fingerprint(&self, project_name: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM scan_fingerprints WHERE project_name = ?",
            params![project_name],
        )?;
        Ok(removed > 0)
    }

    /// Explicit removal: the subtree and its fingerprint go together.
    pub fn forget_project(&self, name: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let existed = delete_project_rows(&tx, name)?;
        let had_fingerprint = tx.execute(
            "DELETE FROM scan_fingerprints WHERE project_name = ?",
            params![name],
        )? > 0;
        tx.commit()?;
        Ok(existed || had_fingerprint)
    }

    pub fn get_meta_i64(&self, key: &str) -> Result<Option<i64>> {
        let value: Option<String> = self
            .read_conn()?
            .query_row(
                "SELECT value FROM meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse::<i64>().ok()))
    }

    pub fn set_meta_i64(&self, key: &str, value: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value.to_string()],
        )?;
        Ok(())
    }
}

fn open_write_conn(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
    conn.busy_timeout(Duration::from_secs(30))?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(conn)
}

fn corrupt(db_path: &Path, reason: impl std::fmt::Display) -> anyhow::Error {
    IndexError::Corrupt {
        path: db_path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

/// True when an unversioned file already holds tables, i.e. it was not
/// created by us.
fn has_foreign_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn remove_store_files(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut os = db_path.as_os_str().to_owned();
        os.push(suffix);
        let path = PathBuf::from(os);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

fn upsert_project_row(conn: &Connection, project: &ProjectRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO projects (name, path, solution, remote_url, default_branch, scanned_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET
             path = excluded.path,
             solution = excluded.solution,
             remote_url = excluded.remote_url,
             default_branch = excluded.default_branch,
             scanned_at = excluded.scanned_at",
        params![
            &project.name,
            &project.path,
            project.solution.as_deref(),
            project.remote_url.as_deref(),
            project.default_branch.as_deref(),
            now_secs(),
        ],
    )?;
    let id = conn.query_row(
        "SELECT id FROM projects WHERE name = ?",
        params![&project.name],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Sets the internal flag on references that now match a stored assembly.
/// Never clears a flag; the corpus-wide pass after a scan does that.
fn promote_internal_rows(conn: &Connection) -> Result<usize> {
    let promoted = conn.execute(
        "UPDATE package_references SET is_internal = 1
         WHERE is_internal = 0 AND EXISTS (
             SELECT 1 FROM assemblies a WHERE a.name = package_references.name COLLATE NOCASE
         )",
        [],
    )?;
    Ok(promoted)
}

fn upsert_assembly_row(conn: &Connection, project_id: i64, assembly: &AssemblyInput) -> Result<i64> {
    conn.execute(
        "INSERT INTO assemblies
         (project_id, descriptor_path, name, target_framework, output_kind, is_test)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(project_id, descriptor_path) DO UPDATE SET
             name = excluded.name,
             target_framework = excluded.target_framework,
             output_kind = excluded.output_kind,
             is_test = excluded.is_test",
        params![
            project_id,
            &assembly.descriptor_path,
            &assembly.name,
            assembly.target_framework.as_deref(),
            assembly.output_kind.as_deref(),
            assembly.is_test,
        ],
    )?;
    let assembly_id: i64 = conn.query_row(
        "SELECT id FROM assemblies WHERE project_id = ? AND descriptor_path = ?",
        params![project_id, &assembly.descriptor_path],
        |row| row.get(0),
    )?;

    conn.execute(
        "DELETE FROM package_references WHERE assembly_id = ?",
        params![assembly_id],
    )?;
    conn.execute(
        "DELETE FROM project_references WHERE assembly_id = ?",
        params![assembly_id],
    )?;
    {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO package_references (assembly_id, name, version, is_internal)
             VALUES (?, ?, ?, ?)",
        )?;
        for package in &assembly.packages {
            stmt.execute(params![
                assembly_id,
                &package.name,
                package.version.as_deref(),
                package.is_internal,
            ])?;
        }
    }
    {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO project_references (assembly_id, referenced_path) VALUES (?, ?)",
        )?;
        for reference in &assembly.project_references {
            stmt.execute(params![assembly_id, reference])?;
        }
    }
    Ok(assembly_id)
}

fn ensure_namespace_row(conn: &Connection, assembly_id: i64, name: &str) -> Result<i64> {
    conn.prepare_cached("INSERT OR IGNORE INTO namespaces (assembly_id, name) VALUES (?, ?)")?
        .execute(params![assembly_id, name])?;
    let id = conn
        .prepare_cached("SELECT id FROM namespaces WHERE assembly_id = ? AND name = ?")?
        .query_row(params![assembly_id, name], |row| row.get(0))?;
    Ok(id)
}

fn insert_entity_rows(conn: &Connection, assembly_id: i64, types: &[TypeInput]) -> Result<usize> {
    let mut type_stmt = conn.prepare_cached(
        "INSERT INTO types
         (namespace_id, name, kind, visibility, file_path, base_type, summary)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    let mut implements_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO type_implements (type_id, interface_name) VALUES (?, ?)",
    )?;
    let mut injects_stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO type_injects (type_id, dependency_name) VALUES (?, ?)",
    )?;
    let mut method_stmt = conn.prepare_cached(
        "INSERT INTO methods (type_id, name, return_type, visibility, is_static)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    let mut param_stmt = conn.prepare_cached(
        "INSERT INTO parameters (method_id, name, type_name, ordinal) VALUES (?, ?, ?, ?)",
    )?;
    let mut endpoint_stmt = conn.prepare_cached(
        "INSERT INTO endpoints (type_id, method_id, verb, route, kind) VALUES (?, ?, ?, ?, ?)",
    )?;

    for ty in types {
        let namespace_id = ensure_namespace_row(conn, assembly_id, &ty.namespace)?;
        type_stmt.execute(params![
            namespace_id,
            &ty.name,
            ty.kind.as_str(),
            ty.visibility.as_str(),
            &ty.file_path,
            ty.base_type.as_deref(),
            ty.summary.as_deref(),
        ])?;
        let type_id = conn.last_insert_rowid();
        for interface in &ty.implements {
            implements_stmt.execute(params![type_id, interface])?;
        }
        for dependency in &ty.injects {
            injects_stmt.execute(params![type_id, dependency])?;
        }
        for method in &ty.methods {
            method_stmt.execute(params![
                type_id,
                &method.name,
                &method.return_type,
                method.visibility.as_str(),
                method.is_static,
            ])?;
            let method_id = conn.last_insert_rowid();
            for (ordinal, param) in method.parameters.iter().enumerate() {
                param_stmt.execute(params![method_id, &param.name, &param.type_name, ordinal as i64])?;
            }
            for endpoint in &method.endpoints {
                endpoint_stmt.execute(params![
                    type_id,
                    method_id,
                    &endpoint.verb,
                    &endpoint.route,
                    endpoint.kind.as_str(),
                ])?;
            }
        }
    }
    Ok(types.len())
}

fn insert_config_rows(
    conn: &Connection,
    project_name: &str,
    entries: &[ConfigEntryInput],
) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO config_entries
         (project_name, source, key, default_value, file_path)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    let mut inserted = 0;
    for entry in entries {
        inserted += stmt.execute(params![
            project_name,
            entry.source.as_str(),
            &entry.key,
            entry.default_value.as_deref(),
            &entry.file_path,
        ])?;
    }
    Ok(inserted)
}

fn delete_project_rows(conn: &Connection, name: &str) -> Result<bool> {
    let project_id: Option<i64> = conn
        .query_row(
            "SELECT id FROM projects WHERE name = ?",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    conn.execute(
        "DELETE FROM config_entries WHERE project_name = ?",
        params![name],
    )?;
    let Some(project_id) = project_id else {
        return Ok(false);
    };
    for (table, sql) in PROJECT_CASCADE {
        let removed = conn
            .execute(sql, params![project_id])
            .with_context(|| format!("delete {table} of project {name}"))?;
        debug!(project = %name, table, removed, "cascade delete");
    }
    Ok(true)
}

fn upsert_fingerprint_row(conn: &Connection, project_name: &str, hash: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_fingerprints (project_name, hash, scanned_at) VALUES (?, ?, ?)
         ON CONFLICT(project_name) DO UPDATE SET
             hash = excluded.hash,
             scanned_at = excluded.scanned_at",
        params![project_name, hash, now_secs()],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::indexer::extract::{EndpointInput, MethodInput, ParameterInput};
    use crate::model::{ConfigSource, EndpointKind, TypeKind, Visibility};
    use tempfile::TempDir;

    pub(crate) fn create_test_db() -> (Db, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("memory").join("test.sqlite");
        let db = Db::create(&db_path).unwrap();
        (db, temp_dir)
    }

    fn controller() -> TypeInput {
        let mut ty = TypeInput::new(
            "Acme.Web.Api.Controllers",
            "ContentController",
            TypeKind::Class,
            "src/Acme.Web.Api/Controllers/ContentController.cs",
        )
        .with_implements(&["IDisposable"])
        .with_injects(&["ICoherentCache", "ILogger<ContentController>"]);
        ty.methods.push(MethodInput {
            name: "Get".to_string(),
            return_type: "Task<IActionResult>".to_string(),
            visibility: Visibility::Public,
            is_static: false,
            parameters: vec![
                ParameterInput {
                    name: "id".to_string(),
                    type_name: "int".to_string(),
                },
                ParameterInput {
                    name: "ct".to_string(),
                    type_name: "CancellationToken".to_string(),
                },
            ],
            endpoints: vec![EndpointInput {
                kind: EndpointKind::Rest,
                verb: "GET".to_string(),
                route: "api/content/{id}".to_string(),
            }],
        });
        ty
    }

    fn web_snapshot() -> ProjectSnapshot {
        let mut snapshot = ProjectSnapshot::new(ProjectRecord::new("acme.web.api", "acme.web.api"))
            .with_unit(
                AssemblyInput::new("src/Acme.Web.Api/Acme.Web.Api.csproj", "Acme.Web.Api")
                    .with_package("Acme.Caching", Some("2.1.0"))
                    .with_package("Newtonsoft.Json", Some("13.0.3")),
                vec![controller()],
            );
        snapshot.config_entries.push(ConfigEntryInput {
            source: ConfigSource::File,
            key: "Cache:Ttl".to_string(),
            default_value: Some("30".to_string()),
            file_path: "appsettings.json".to_string(),
        });
        snapshot.fingerprint = Some("abc".to_string());
        snapshot
    }

    fn caching_snapshot() -> ProjectSnapshot {
        ProjectSnapshot::new(ProjectRecord::new("acme.caching", "acme.caching")).with_unit(
            AssemblyInput::new("src/Acme.Caching/Acme.Caching.csproj", "Acme.Caching"),
            vec![
                TypeInput::new("Acme.Caching", "ICoherentCache", TypeKind::Interface, "ICoherentCache.cs"),
                TypeInput::new("Acme.Caching", "CoherentCacheService", TypeKind::Class, "CoherentCacheService.cs")
                    .with_implements(&["ICoherentCache"]),
            ],
        )
    }

    fn count(db: &Db, sql: &str) -> i64 {
        db.read_conn().unwrap().query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_namespace_insert_is_idempotent() {
        let (db, _temp) = create_test_db();
        let project_id = db.upsert_project(&ProjectRecord::new("acme.caching", "acme.caching")).unwrap();
        let assembly_id = db
            .upsert_assembly(project_id, &AssemblyInput::new("Acme.Caching.csproj", "Acme.Caching"))
            .unwrap();

        let first = db.ensure_namespace(assembly_id, "Acme.Caching").unwrap();
        let second = db.ensure_namespace(assembly_id, "Acme.Caching").unwrap();

        assert_eq!(first, second);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM namespaces"), 1);
    }

    #[test]
    fn test_insert_entities_writes_full_subtree() {
        let (db, _temp) = create_test_db();
        let project_id = db.upsert_project(&ProjectRecord::new("acme.web.api", "acme.web.api")).unwrap();
        let assembly_id = db
            .upsert_assembly(project_id, &AssemblyInput::new("Api.csproj", "Acme.Web.Api"))
            .unwrap();

        let inserted = db.insert_entities(assembly_id, &[controller()]).unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM methods"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM endpoints"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM type_injects"), 2);
        assert_eq!(
            count(&db, "SELECT ordinal FROM parameters WHERE name = 'ct'"),
            1
        );
    }

    #[test]
    fn test_delete_project_cascades_completely() {
        let (db, _temp) = create_test_db();
        db.replace_project(&web_snapshot()).unwrap();
        db.replace_project(&caching_snapshot()).unwrap();

        assert!(db.delete_project("acme.web.api").unwrap());

        for table in [
            "endpoints",
            "parameters",
            "methods",
            "type_injects",
            "package_references",
            "config_entries",
        ] {
            assert_eq!(count(&db, &format!("SELECT COUNT(*) FROM {table}")), 0, "{table}");
        }
        assert_eq!(count(&db, "SELECT COUNT(*) FROM projects"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM types"), 2);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM type_implements"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM assemblies"), 1);
        // fingerprints belong to the scan history, not the subtree
        assert_eq!(count(&db, "SELECT COUNT(*) FROM scan_fingerprints"), 1);
    }

    #[test]
    fn test_delete_missing_project_is_noop() {
        let (db, _temp) = create_test_db();
        assert!(!db.delete_project("nope").unwrap());
    }

    #[test]
    fn test_replace_project_does_not_duplicate() {
        let (db, _temp) = create_test_db();
        db.replace_project(&web_snapshot()).unwrap();
        db.replace_project(&web_snapshot()).unwrap();

        assert_eq!(count(&db, "SELECT COUNT(*) FROM types"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM config_entries"), 1);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM package_references"), 2);
    }

    #[test]
    fn test_config_entries_ignore_duplicates() {
        let (db, _temp) = create_test_db();
        let entry = ConfigEntryInput {
            source: ConfigSource::EnvVar,
            key: "CACHE_REGION".to_string(),
            default_value: None,
            file_path: "Startup.cs".to_string(),
        };
        let inserted = db
            .insert_config_entries("acme.caching", &[entry.clone(), entry])
            .unwrap();
        assert_eq!(inserted, 1);

        let found = db
            .read(|r| r.config_entries("region", Some("ACME.CACHING"), 10))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, ConfigSource::EnvVar);
    }

    #[test]
    fn test_resolve_internal_packages_is_case_insensitive_and_order_free() {
        let (db, _temp) = create_test_db();
        // consumer written before the producing project exists
        db.replace_project(&web_snapshot()).unwrap();
        assert_eq!(db.resolve_internal_packages().unwrap(), 0);

        let mut caching = caching_snapshot();
        caching.units[0].assembly.name = "ACME.CACHING".to_string();
        db.replace_project(&caching).unwrap();
        assert_eq!(db.resolve_internal_packages().unwrap(), 1);

        let internal: String = db
            .read_conn()
            .unwrap()
            .query_row(
                "SELECT name FROM package_references WHERE is_internal = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(internal, "Acme.Caching");

        // the producer disappearing makes the reference external again
        db.delete_project("acme.caching").unwrap();
        assert_eq!(db.resolve_internal_packages().unwrap(), 0);
    }

    fn internal_reference_count(db: &Db) -> i64 {
        db.read_conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM package_references WHERE is_internal = 1",
                [],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_replace_project_keeps_internal_flags_without_a_resolve_pass() {
        let (db, _temp) = create_test_db();
        db.replace_project(&web_snapshot()).unwrap();
        assert_eq!(internal_reference_count(&db), 0);

        // committing the producer promotes the consumer's reference in the same transaction
        db.replace_project(&caching_snapshot()).unwrap();
        assert_eq!(internal_reference_count(&db), 1);

        // a consumer replaced with a pre-marked reference stays internal
        let mut web = web_snapshot();
        let assemblies = HashSet::from(["acme.caching".to_string()]);
        assert_eq!(web.mark_internal_packages(&assemblies), 1);
        db.replace_project(&web).unwrap();
        assert_eq!(internal_reference_count(&db), 1);
    }

    #[test]
    fn test_fingerprints_empty_then_upserted() {
        let (db, _temp) = create_test_db();
        assert!(db.read_fingerprints().unwrap().is_empty());

        db.upsert_fingerprint("acme.caching", "h1").unwrap();
        db.upsert_fingerprint("acme.caching", "h2").unwrap();
        let fingerprints = db.read_fingerprints().unwrap();
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints["acme.caching"].hash, "h2");

        assert!(db.clear_fingerprint("acme.caching").unwrap());
        assert!(db.read_fingerprints().unwrap().is_empty());
    }

    #[test]
    fn test_open_existing_missing_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let err = Db::open_existing(&temp_dir.path().join("memory").join("none.sqlite"))
            .err()
            .unwrap();
        assert!(matches!(
            IndexError::find(&err),
            Some(IndexError::Unavailable { .. })
        ));
        assert!(!temp_dir.path().join("memory").exists());
    }

    #[test]
    fn test_garbage_file_is_corrupt_for_open_and_create() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.sqlite");
        std::fs::write(&path, "this is not a database ".repeat(512)).unwrap();

        let err = Db::open_existing(&path).err().unwrap();
        assert!(matches!(IndexError::find(&err), Some(IndexError::Corrupt { .. })));
        let err = Db::create(&path).err().unwrap();
        assert!(matches!(IndexError::find(&err), Some(IndexError::Corrupt { .. })));
    }

    #[test]
    fn test_create_replaces_stale_schema() {
        let (db, temp) = create_test_db();
        db.replace_project(&web_snapshot()).unwrap();
        db.set_meta_i64("schema_version", SCHEMA_VERSION + 100).unwrap();
        let path = db.db_path().to_path_buf();
        drop(db);

        let err = Db::open_existing(&path).err().unwrap();
        assert!(matches!(IndexError::find(&err), Some(IndexError::Corrupt { .. })));

        let db = Db::create(&path).unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM projects"), 0);
        assert_eq!(db.get_meta_i64("schema_version").unwrap(), Some(SCHEMA_VERSION));
        drop(temp);
    }

    #[test]
    fn test_forget_project_clears_fingerprint() {
        let (db, _temp) = create_test_db();
        db.replace_project(&web_snapshot()).unwrap();
        assert!(db.forget_project("acme.web.api").unwrap());
        assert!(db.read_fingerprints().unwrap().is_empty());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM projects"), 0);
    }
}
