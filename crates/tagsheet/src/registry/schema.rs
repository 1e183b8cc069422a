//! `SQLite` schema for the tag registry.

/// SQL statement to create the QR code table.
///
/// Timestamps are fixed-width RFC 3339 strings in UTC, so text ordering
/// matches chronological ordering.
pub const CREATE_QR_CODES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS qr_codes (
    id TEXT PRIMARY KEY NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    name TEXT,
    email TEXT,
    address TEXT,
    phone_number TEXT,
    created_at TEXT NOT NULL,
    activated_at TEXT
)
";

/// Index for newest-first and oldest-first listings.
pub const CREATE_CREATED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_qr_codes_created ON qr_codes(created_at)
";

/// Index for picking inactive codes to print.
pub const CREATE_ACTIVE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_qr_codes_active ON qr_codes(is_active, created_at)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_QR_CODES_TABLE,
    CREATE_CREATED_INDEX,
    CREATE_ACTIVE_INDEX,
    CREATE_METADATA_TABLE,
];
