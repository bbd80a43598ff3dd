//! SQL schema for the Tally SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per subject, namespaced by owner.
-- Counters only ever change through a single UPDATE ... SET x = x + ?,
-- so concurrent increments from several clients add up.
CREATE TABLE IF NOT EXISTS subjects (
    owner_id          TEXT    NOT NULL,
    subject_id        TEXT    NOT NULL,
    code              TEXT    NOT NULL,
    classes_held      INTEGER NOT NULL DEFAULT 0 CHECK (classes_held >= 0),
    present           INTEGER NOT NULL DEFAULT 0 CHECK (present >= 0),
    absent            INTEGER NOT NULL DEFAULT 0 CHECK (absent >= 0),
    required_percent  REAL    NOT NULL CHECK (required_percent BETWEEN 0 AND 100),
    created_at        TEXT    NOT NULL,   -- ISO 8601 UTC; server-assigned
    updated_at        TEXT    NOT NULL,
    PRIMARY KEY (owner_id, subject_id)
);

CREATE INDEX IF NOT EXISTS subjects_owner_created_idx
    ON subjects(owner_id, created_at);

PRAGMA user_version = 1;
";
