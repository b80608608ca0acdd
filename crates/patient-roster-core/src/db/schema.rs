//! SQLite schema definition.

/// Complete database schema for client-local state.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Client State (session credentials and other small string values)
-- ============================================================================

CREATE TABLE IF NOT EXISTS client_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
