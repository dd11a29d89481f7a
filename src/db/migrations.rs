use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            solution TEXT,
            remote_url TEXT,
            default_branch TEXT,
            scanned_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS assemblies (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL,
            descriptor_path TEXT NOT NULL,
            name TEXT NOT NULL,
            target_framework TEXT,
            output_kind TEXT,
            is_test INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE,
            UNIQUE(project_id, descriptor_path)
        );

        CREATE INDEX IF NOT EXISTS idx_assemblies_name ON assemblies(name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS package_references (
            id INTEGER PRIMARY KEY,
            assembly_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            version TEXT,
            is_internal INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(assembly_id) REFERENCES assemblies(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_package_references_name
            ON package_references(name COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_package_references_assembly
            ON package_references(assembly_id);

        CREATE TABLE IF NOT EXISTS project_references (
            id INTEGER PRIMARY KEY,
            assembly_id INTEGER NOT NULL,
            referenced_path TEXT NOT NULL,
            FOREIGN KEY(assembly_id) REFERENCES assemblies(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS namespaces (
            id INTEGER PRIMARY KEY,
            assembly_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(assembly_id) REFERENCES assemblies(id) ON DELETE CASCADE,
            UNIQUE(assembly_id, name)
        );

        CREATE TABLE IF NOT EXISTS types (
            id INTEGER PRIMARY KEY,
            namespace_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            visibility TEXT NOT NULL,
            file_path TEXT NOT NULL,
            base_type TEXT,
            summary TEXT,
            FOREIGN KEY(namespace_id) REFERENCES namespaces(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_types_name ON types(name);
        CREATE INDEX IF NOT EXISTS idx_types_namespace ON types(namespace_id);
        CREATE INDEX IF NOT EXISTS idx_types_base_type ON types(base_type);

        CREATE TABLE IF NOT EXISTS type_implements (
            type_id INTEGER NOT NULL,
            interface_name TEXT NOT NULL,
            FOREIGN KEY(type_id) REFERENCES types(id) ON DELETE CASCADE,
            UNIQUE(type_id, interface_name)
        );

        CREATE INDEX IF NOT EXISTS idx_type_implements_name
            ON type_implements(interface_name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS type_injects (
            type_id INTEGER NOT NULL,
            dependency_name TEXT NOT NULL,
            FOREIGN KEY(type_id) REFERENCES types(id) ON DELETE CASCADE,
            UNIQUE(type_id, dependency_name)
        );

        CREATE INDEX IF NOT EXISTS idx_type_injects_name
            ON type_injects(dependency_name COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS methods (
            id INTEGER PRIMARY KEY,
            type_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            return_type TEXT NOT NULL,
            visibility TEXT NOT NULL,
            is_static INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(type_id) REFERENCES types(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_methods_type ON methods(type_id);

        CREATE TABLE IF NOT EXISTS parameters (
            id INTEGER PRIMARY KEY,
            method_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            type_name TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            FOREIGN KEY(method_id) REFERENCES methods(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_parameters_method ON parameters(method_id);

        CREATE TABLE IF NOT EXISTS endpoints (
            id INTEGER PRIMARY KEY,
            type_id INTEGER NOT NULL,
            method_id INTEGER NOT NULL,
            verb TEXT NOT NULL,
            route TEXT NOT NULL,
            kind TEXT NOT NULL,
            FOREIGN KEY(type_id) REFERENCES types(id) ON DELETE CASCADE,
            FOREIGN KEY(method_id) REFERENCES methods(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_endpoints_method ON endpoints(method_id);

        CREATE TABLE IF NOT EXISTS config_entries (
            id INTEGER PRIMARY KEY,
            project_name TEXT NOT NULL,
            source TEXT NOT NULL,
            key TEXT NOT NULL,
            default_value TEXT,
            file_path TEXT NOT NULL,
            UNIQUE(project_name, key, source, file_path)
        );

        CREATE INDEX IF NOT EXISTS idx_config_entries_key
            ON config_entries(key COLLATE NOCASE);

        CREATE TABLE IF NOT EXISTS scan_fingerprints (
            project_name TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            scanned_at INTEGER NOT NULL
        );

        CREATE VIEW IF NOT EXISTS type_view AS
            SELECT t.id AS id,
                   t.name AS name,
                   t.kind AS kind,
                   t.visibility AS visibility,
                   t.file_path AS file_path,
                   t.base_type AS base_type,
                   t.summary AS summary,
                   n.name AS namespace,
                   a.id AS assembly_id,
                   a.name AS assembly,
                   a.is_test AS is_test,
                   p.id AS project_id,
                   p.name AS project
            FROM types t
            JOIN namespaces n ON n.id = t.namespace_id
            JOIN assemblies a ON a.id = n.assembly_id
            JOIN projects p ON p.id = a.project_id;
        COMMIT;
        ",
    )?;

    if stored_schema_version(conn)?.is_none() {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}

/// Version recorded in `meta`, `None` for a file that has never been
/// migrated.
pub fn stored_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let has_meta: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta')",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Ok(None);
    }
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.map(|v| v.parse::<i64>().unwrap_or(0)))
}
