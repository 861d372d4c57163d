//! SQL migration definitions for the completion ledger database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: completion_markers",
        sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (tag, article) that was saved successfully
CREATE TABLE IF NOT EXISTS completion_markers (
    tag        TEXT NOT NULL,
    article_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (tag, article_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
