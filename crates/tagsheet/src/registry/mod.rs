//! Tag registry.
//!
//! This module provides `SQLite`-based storage for issued QR codes and the
//! owner details attached to them when a tag is activated.

pub mod migrations;
pub mod schema;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::label::is_valid_id;

/// Attempts allowed per requested id before giving up on a batch.
const ATTEMPTS_PER_ID: usize = 32;

/// Longest id the registry will generate.
pub const MAX_ID_LENGTH: usize = 64;

const SELECT_COLUMNS: &str =
    "SELECT id, is_active, name, email, address, phone_number, created_at, activated_at FROM qr_codes";

/// One issued QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrRecord {
    /// Tag id printed on the label.
    pub id: String,
    /// Whether an owner has claimed the tag.
    pub is_active: bool,
    /// Owner name.
    pub name: Option<String>,
    /// Owner email.
    pub email: Option<String>,
    /// Owner postal address.
    pub address: Option<String>,
    /// Owner phone number.
    pub phone_number: Option<String>,
    /// When the code was issued.
    pub created_at: DateTime<Utc>,
    /// When the code was first activated.
    pub activated_at: Option<DateTime<Utc>>,
}

impl QrRecord {
    /// A fresh, inactive record.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_active: false,
            name: None,
            email: None,
            address: None,
            phone_number: None,
            created_at: Utc::now(),
            activated_at: None,
        }
    }
}

/// Contact details an owner attaches to a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerDetails {
    /// Owner name.
    pub name: Option<String>,
    /// Owner email.
    pub email: Option<String>,
    /// Owner postal address.
    pub address: Option<String>,
    /// Owner phone number.
    pub phone_number: Option<String>,
}

/// One page of a newest-first listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryPage {
    /// Records on this page.
    pub records: Vec<QrRecord>,
    /// Total records in the registry.
    pub total: i64,
    /// Zero-based page index.
    pub page: usize,
    /// Number of pages at this page size.
    pub total_pages: usize,
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Total number of codes.
    pub total: i64,
    /// Codes with an owner.
    pub active: i64,
    /// Codes not yet claimed.
    pub inactive: i64,
    /// Issue time of the oldest code.
    pub oldest: Option<DateTime<Utc>>,
    /// Issue time of the newest code.
    pub newest: Option<DateTime<Utc>>,
}

/// Store of issued QR codes.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    conn: Connection,
}

impl Registry {
    /// Open or create a registry database at the given path.
    ///
    /// Creates the parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening registry at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Registry opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issue `count` new inactive codes with random alphanumeric ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdSpaceExhausted`] if unused ids cannot be found, or
    /// [`Error::ConfigValidation`] for an unusable id length.
    pub fn generate_batch(&self, count: usize, id_len: usize) -> Result<Vec<QrRecord>> {
        self.generate_batch_with(&mut rand::thread_rng(), count, id_len)
    }

    /// [`generate_batch`](Self::generate_batch) with a caller-supplied RNG.
    ///
    /// # Errors
    ///
    /// See [`generate_batch`](Self::generate_batch).
    pub fn generate_batch_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
        id_len: usize,
    ) -> Result<Vec<QrRecord>> {
        if id_len == 0 || id_len > MAX_ID_LENGTH {
            return Err(Error::ConfigValidation {
                message: format!("id length must be between 1 and {MAX_ID_LENGTH}, got {id_len}"),
            });
        }

        let budget = count.saturating_mul(ATTEMPTS_PER_ID);
        let mut attempts = 0;
        let mut chosen = HashSet::with_capacity(count);
        let mut ids = Vec::with_capacity(count);

        while ids.len() < count {
            if attempts >= budget {
                return Err(Error::IdSpaceExhausted { attempts });
            }
            attempts += 1;

            let id: String = (0..id_len)
                .map(|_| char::from(rng.sample(Alphanumeric)))
                .collect();
            if chosen.contains(&id) || self.exists(&id)? {
                debug!("Id collision on {}, retrying", id);
                continue;
            }
            chosen.insert(id.clone());
            ids.push(id);
        }

        let created_at = Utc::now();
        let records: Vec<QrRecord> = ids
            .into_iter()
            .map(|id| QrRecord {
                created_at,
                ..QrRecord::new(id)
            })
            .collect();

        let tx = self.conn.unchecked_transaction()?;
        for record in &records {
            insert_record(&tx, record)?;
        }
        tx.commit()?;

        info!("Generated {} QR code(s) in {} attempt(s)", records.len(), attempts);
        Ok(records)
    }

    /// Insert a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelection`] if the id is malformed or already
    /// registered.
    pub fn insert(&self, record: &QrRecord) -> Result<()> {
        if !is_valid_id(&record.id) {
            return Err(Error::invalid_selection(format!(
                "'{}' is not a valid tag id",
                record.id
            )));
        }
        if self.exists(&record.id)? {
            return Err(Error::invalid_selection(format!(
                "tag id '{}' is already registered",
                record.id
            )));
        }
        insert_record(&self.conn, record)?;
        debug!("Inserted QR code {}", record.id);
        Ok(())
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let found: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM qr_codes WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, id: &str) -> Result<Option<QrRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Get the records for `ids`, in the order given. Unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<QrRecord>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = stmt
                .query_row([id.as_ref()], Self::row_to_record)
                .optional()?
            {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// List records newest first, `size` per page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelection`] for a zero page size.
    pub fn list_page(&self, page: usize, size: usize) -> Result<RegistryPage> {
        if size == 0 {
            return Err(Error::invalid_selection("page size must be at least 1"));
        }
        let total = self.count()?;
        let total_usize = usize::try_from(total).unwrap_or(0);

        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let limit = i64::try_from(size).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.saturating_mul(size)).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit, offset], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RegistryPage {
            records,
            total,
            page,
            total_pages: total_usize.div_ceil(size),
        })
    }

    /// The `limit` oldest inactive records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_inactive(&self, limit: usize) -> Result<Vec<QrRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE is_active = 0 ORDER BY created_at ASC, rowid ASC LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Attach owner details and activate the code.
    ///
    /// `activated_at` is stamped on first activation only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if no record has this id.
    pub fn update_owner(&self, id: &str, owner: &OwnerDetails) -> Result<QrRecord> {
        let affected = self.conn.execute(
            r"
            UPDATE qr_codes
            SET name = ?2, email = ?3, address = ?4, phone_number = ?5,
                is_active = 1, activated_at = COALESCE(activated_at, ?6)
            WHERE id = ?1
            ",
            params![
                id,
                owner.name,
                owner.email,
                owner.address,
                owner.phone_number,
                timestamp(&Utc::now()),
            ],
        )?;
        if affected == 0 {
            return Err(Error::RecordNotFound { id: id.to_string() });
        }
        info!("Activated QR code {}", id);
        self.get(id)?
            .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })
    }

    /// Activate or deactivate a code without touching owner details.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if no record has this id.
    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let affected = if active {
            self.conn.execute(
                "UPDATE qr_codes SET is_active = 1, activated_at = COALESCE(activated_at, ?2) WHERE id = ?1",
                params![id, timestamp(&Utc::now())],
            )?
        } else {
            self.conn
                .execute("UPDATE qr_codes SET is_active = 0 WHERE id = ?1", [id])?
        };
        if affected == 0 {
            return Err(Error::RecordNotFound { id: id.to_string() });
        }
        debug!("Set QR code {} active={}", id, active);
        Ok(())
    }

    /// Delete a record.
    ///
    /// Returns `true` if a record was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM qr_codes WHERE id = ?1", [id])?;
        Ok(affected > 0)
    }

    /// Count all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM qr_codes", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get registry statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<RegistryStats> {
        let (total, active, oldest, newest): (i64, i64, Option<String>, Option<String>) =
            self.conn.query_row(
                r"
                SELECT COUNT(*), COALESCE(SUM(is_active), 0), MIN(created_at), MAX(created_at)
                FROM qr_codes
                ",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        Ok(RegistryStats {
            total,
            active,
            inactive: total - active,
            oldest: oldest.as_deref().and_then(parse_timestamp),
            newest: newest.as_deref().and_then(parse_timestamp),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<QrRecord> {
        let created_at: String = row.get(6)?;
        let activated_at: Option<String> = row.get(7)?;

        let created_at = parse_timestamp(&created_at).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("invalid created_at timestamp: {created_at}").into(),
            )
        })?;

        Ok(QrRecord {
            id: row.get(0)?,
            is_active: row.get(1)?,
            name: row.get(2)?,
            email: row.get(3)?,
            address: row.get(4)?,
            phone_number: row.get(5)?,
            created_at,
            activated_at: activated_at.as_deref().and_then(parse_timestamp),
        })
    }
}

fn insert_record(conn: &Connection, record: &QrRecord) -> Result<()> {
    conn.execute(
        r"
        INSERT INTO qr_codes
            (id, is_active, name, email, address, phone_number, created_at, activated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ",
        params![
            record.id,
            record.is_active,
            record.name,
            record.email,
            record.address,
            record.phone_number,
            timestamp(&record.created_at),
            record.activated_at.as_ref().map(timestamp),
        ],
    )?;
    Ok(())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
