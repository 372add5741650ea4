//! SQL schema for the Strata SQLite store.
//!
//! Executed once at connection startup; `PRAGMA user_version` records the
//! layout revision.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_containers (
    container_id  TEXT PRIMARY KEY,
    kind          TEXT NOT NULL,       -- 'schema' | 'microschema'
    latest_index  INTEGER NOT NULL,
    created_at    TEXT NOT NULL
);

-- Lineage arena. Rows are appended; only next_index is ever filled in later.
CREATE TABLE IF NOT EXISTS schema_versions (
    version_id     TEXT PRIMARY KEY,
    container_id   TEXT NOT NULL REFERENCES schema_containers(container_id),
    arena_index    INTEGER NOT NULL,
    snapshot_json  TEXT NOT NULL,
    previous_index INTEGER,
    next_index     INTEGER,
    changes_json   TEXT NOT NULL DEFAULT '[]',
    created_at     TEXT NOT NULL,
    UNIQUE (container_id, arena_index)
);

CREATE TABLE IF NOT EXISTS projects (
    project_id  TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    branch_id   TEXT PRIMARY KEY,
    project_id  TEXT NOT NULL REFERENCES projects(project_id),
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS branch_schema_versions (
    branch_id     TEXT NOT NULL REFERENCES branches(branch_id),
    container_id  TEXT NOT NULL REFERENCES schema_containers(container_id),
    version_id    TEXT NOT NULL REFERENCES schema_versions(version_id),
    PRIMARY KEY (branch_id, container_id)
);

CREATE TABLE IF NOT EXISTS nodes (
    node_id           TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL REFERENCES projects(project_id),
    schema_container  TEXT NOT NULL REFERENCES schema_containers(container_id),
    parent_id         TEXT REFERENCES nodes(node_id),
    created_at        TEXT NOT NULL
);

-- Content containers are copy-on-write: never updated, never deleted.
CREATE TABLE IF NOT EXISTS containers (
    container_id    TEXT PRIMARY KEY,
    node_id         TEXT NOT NULL REFERENCES nodes(node_id),
    language        TEXT NOT NULL,
    branch_id       TEXT NOT NULL REFERENCES branches(branch_id),
    schema_version  TEXT NOT NULL REFERENCES schema_versions(version_id),
    version         TEXT NOT NULL,     -- 'major.minor'
    previous_id     TEXT REFERENCES containers(container_id),
    fields_json     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    editor          TEXT
);

-- Micronodes embedded in each container, for microschema target lookup.
CREATE TABLE IF NOT EXISTS container_micronodes (
    container_id         TEXT NOT NULL REFERENCES containers(container_id),
    micronode_id         TEXT NOT NULL,
    microschema_version  TEXT NOT NULL,
    PRIMARY KEY (container_id, micronode_id)
);

-- The only mutable state: draft and published pointers.
CREATE TABLE IF NOT EXISTS heads (
    node_id       TEXT NOT NULL REFERENCES nodes(node_id),
    language      TEXT NOT NULL,
    branch_id     TEXT NOT NULL REFERENCES branches(branch_id),
    draft_id      TEXT REFERENCES containers(container_id),
    published_id  TEXT REFERENCES containers(container_id),
    PRIMARY KEY (node_id, language, branch_id)
);

CREATE INDEX IF NOT EXISTS versions_container_idx   ON schema_versions(container_id);
CREATE INDEX IF NOT EXISTS containers_schema_idx    ON containers(schema_version);
CREATE INDEX IF NOT EXISTS micronodes_version_idx   ON container_micronodes(microschema_version);
CREATE INDEX IF NOT EXISTS heads_branch_idx         ON heads(branch_id);

PRAGMA user_version = 1;
";
