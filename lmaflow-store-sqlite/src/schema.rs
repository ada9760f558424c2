//! Table definitions.
//!
//! `weight_ticket_lines` and `waste_streams` belong to the administration
//! application; they are only created here when missing so a fresh database
//! is usable.

use rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS weight_ticket_lines (
    waste_stream_number TEXT NOT NULL,
    weight_kg           INTEGER NOT NULL,
    carrier             TEXT NOT NULL,
    weighed_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS waste_streams (
    number                 TEXT PRIMARY KEY,
    name                   TEXT NOT NULL,
    eural_code             TEXT NOT NULL,
    processing_method_code TEXT NOT NULL,
    consignor_party        TEXT NOT NULL,
    processor_party        TEXT NOT NULL,
    pickup_location        TEXT
);

CREATE TABLE IF NOT EXISTS lma_declarations (
    id                  TEXT PRIMARY KEY,
    waste_stream_number TEXT NOT NULL,
    period              TEXT NOT NULL,
    transporters        TEXT NOT NULL,
    total_weight        INTEGER NOT NULL,
    total_shipments     INTEGER NOT NULL,
    type                TEXT NOT NULL,
    status              TEXT NOT NULL,
    amice_uuid          TEXT,
    errors              TEXT,
    created_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS lma_declarations_stream_period
    ON lma_declarations (waste_stream_number, period);

CREATE TABLE IF NOT EXISTS lma_declaration_sessions (
    id              TEXT PRIMARY KEY,
    declaration_ids TEXT NOT NULL,
    type            TEXT NOT NULL,
    status          TEXT NOT NULL,
    errors          TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monthly_waste_declaration_jobs (
    id         TEXT PRIMARY KEY,
    job_type   TEXT NOT NULL,
    year_month TEXT NOT NULL,
    status     TEXT NOT NULL,
    created    TEXT NOT NULL,
    fulfilled  TEXT
);

CREATE TABLE IF NOT EXISTS lma_declaration_id_sequence (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    next_value INTEGER NOT NULL
);

INSERT OR IGNORE INTO lma_declaration_id_sequence (id, next_value) VALUES (1, 1);
";

/// Create every table the store needs, leaving existing ones untouched.
pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
