//! Versioned DDL for `state.db`, tracked with `PRAGMA user_version`.

pub const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA busy_timeout = 5000;
    PRAGMA synchronous = NORMAL;
";

/// Applied in order; entry `i` upgrades the file to version `i + 1`.
pub const MIGRATIONS: &[&str] = &["
    CREATE TABLE kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
"];

pub fn current_version() -> u32 {
    MIGRATIONS.len() as u32
}
