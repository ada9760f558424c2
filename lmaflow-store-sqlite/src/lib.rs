//! SQLite implementation of the lmaflow storage ports.
//!
//! One connection is shared behind a mutex. Every mutating port method runs
//! in a single transaction; list columns are stored as JSON text and enum
//! columns as their upper-case codes.

mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use rusqlite::{Connection, Error as SqliteError, ErrorCode, Params, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use lmaflow_core::{
    model::{
        DeclarationId, DeclarationStatus, JobStatus, JobType, LmaDeclaration,
        LmaDeclarationSession, SessionStatus, StatusCode, WasteDeclarationJob, WasteStream,
        WasteStreamNumber, WeightTicketLine,
    },
    period::Period,
    ports::{
        DeclarationStore, DetectionWrite, JobStore, SessionStore, StoreError, WasteStreams,
        WeightTicketLines,
    },
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const LINE_COLUMNS: &str = "waste_stream_number, weight_kg, carrier, weighed_at";
const WASTE_STREAM_COLUMNS: &str = "number, name, eural_code, processing_method_code, \
    consignor_party, processor_party, pickup_location";
const DECLARATION_COLUMNS: &str = "id, waste_stream_number, period, transporters, total_weight, \
    total_shipments, type, status, amice_uuid, errors, created_at";
const SESSION_COLUMNS: &str = "id, declaration_ids, type, status, errors, created_at";
const JOB_COLUMNS: &str = "id, job_type, year_month, status, created, fulfilled";

/// Storage ports backed by one SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and create missing tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(backend)?;
        debug!(path = %path.display(), "sqlite database opened");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory().map_err(backend)?)
    }

    /// Wrap an existing connection, creating missing tables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the connection cannot be configured.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(backend)?;
        schema::migrate(&conn).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backend(err: SqliteError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn write_error(err: SqliteError) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::Conflict(err.to_string()),
        _ => backend(err),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Corrupt(err.to_string()))
}

/// Empty lists are stored as NULL.
fn optional_list(items: &[String]) -> Result<Option<String>, StoreError> {
    if items.is_empty() {
        return Ok(None);
    }
    to_json(items).map(Some)
}

fn from_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Corrupt(format!("{column}: {err}")))
}

fn decode_code<T: StatusCode>(raw: &str, column: &str) -> Result<T, StoreError> {
    T::from_code(raw).ok_or_else(|| StoreError::Corrupt(format!("{column}: unknown code {raw}")))
}

fn decode_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Corrupt(format!("uuid {raw}: {err}")))
}

fn period_start(period: Period) -> NaiveDateTime {
    period.first_day().and_time(NaiveTime::MIN)
}

/// A table row read as stored, decoded outside the rusqlite callback.
trait Record: Sized {
    type Output;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn decode(self) -> Result<Self::Output, StoreError>;
}

fn query<R: Record, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<R::Output>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let rows = stmt
        .query_map(params, R::read)
        .map_err(backend)?
        .collect::<Result<Vec<R>, SqliteError>>()
        .map_err(backend)?;
    rows.into_iter().map(R::decode).collect()
}

struct LineRow(WeightTicketLine);

impl Record for LineRow {
    type Output = WeightTicketLine;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(WeightTicketLine {
            waste_stream_number: WasteStreamNumber(row.get(0)?),
            weight_kg: row.get(1)?,
            carrier: row.get(2)?,
            weighed_at: row.get(3)?,
        }))
    }

    fn decode(self) -> Result<WeightTicketLine, StoreError> {
        Ok(self.0)
    }
}

struct WasteStreamRow(WasteStream);

impl Record for WasteStreamRow {
    type Output = WasteStream;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self(WasteStream {
            number: WasteStreamNumber(row.get(0)?),
            name: row.get(1)?,
            eural_code: row.get(2)?,
            processing_method_code: row.get(3)?,
            consignor_party: row.get(4)?,
            processor_party: row.get(5)?,
            pickup_location: row.get(6)?,
        }))
    }

    fn decode(self) -> Result<WasteStream, StoreError> {
        Ok(self.0)
    }
}

struct DeclarationRow {
    id: String,
    waste_stream_number: String,
    period: String,
    transporters: String,
    total_weight: i64,
    total_shipments: u32,
    declaration_type: String,
    status: String,
    amice_uuid: Option<String>,
    errors: Option<String>,
    created_at: DateTime<Utc>,
}

impl Record for DeclarationRow {
    type Output = LmaDeclaration;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            waste_stream_number: row.get(1)?,
            period: row.get(2)?,
            transporters: row.get(3)?,
            total_weight: row.get(4)?,
            total_shipments: row.get(5)?,
            declaration_type: row.get(6)?,
            status: row.get(7)?,
            amice_uuid: row.get(8)?,
            errors: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> Result<LmaDeclaration, StoreError> {
        Ok(LmaDeclaration {
            id: DeclarationId(self.id),
            waste_stream_number: WasteStreamNumber(self.waste_stream_number),
            period: self.period,
            transporters: from_json(&self.transporters, "transporters")?,
            total_weight: self.total_weight,
            total_shipments: self.total_shipments,
            declaration_type: decode_code(&self.declaration_type, "type")?,
            status: decode_code(&self.status, "status")?,
            amice_uuid: self.amice_uuid.as_deref().map(decode_uuid).transpose()?,
            errors: match self.errors {
                Some(raw) => from_json(&raw, "errors")?,
                None => Vec::new(),
            },
            created_at: self.created_at,
        })
    }
}

struct SessionRow {
    id: String,
    declaration_ids: String,
    session_type: String,
    status: String,
    errors: Option<String>,
    created_at: DateTime<Utc>,
}

impl Record for SessionRow {
    type Output = LmaDeclarationSession;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            declaration_ids: row.get(1)?,
            session_type: row.get(2)?,
            status: row.get(3)?,
            errors: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<LmaDeclarationSession, StoreError> {
        Ok(LmaDeclarationSession {
            id: decode_uuid(&self.id)?,
            declaration_ids: from_json(&self.declaration_ids, "declaration_ids")?,
            session_type: decode_code(&self.session_type, "type")?,
            status: decode_code(&self.status, "status")?,
            created_at: self.created_at,
            errors: match self.errors {
                Some(raw) => from_json(&raw, "errors")?,
                None => Vec::new(),
            },
        })
    }
}

struct JobRow {
    id: String,
    job_type: String,
    year_month: String,
    status: String,
    created: DateTime<Utc>,
    fulfilled: Option<DateTime<Utc>>,
}

impl Record for JobRow {
    type Output = WasteDeclarationJob;

    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_type: row.get(1)?,
            year_month: row.get(2)?,
            status: row.get(3)?,
            created: row.get(4)?,
            fulfilled: row.get(5)?,
        })
    }

    fn decode(self) -> Result<WasteDeclarationJob, StoreError> {
        let period = Period::parse_year_month(&self.year_month).map_err(|err| {
            StoreError::Corrupt(format!("year_month {}: {err}", self.year_month))
        })?;
        Ok(WasteDeclarationJob {
            id: decode_uuid(&self.id)?,
            job_type: decode_code(&self.job_type, "job_type")?,
            period,
            status: decode_code(&self.status, "status")?,
            created: self.created,
            fulfilled: self.fulfilled,
        })
    }
}

fn upsert_declaration(conn: &Connection, declaration: &LmaDeclaration) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO lma_declarations ({DECLARATION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            declaration.id.0,
            declaration.waste_stream_number.0,
            declaration.period,
            to_json(&declaration.transporters)?,
            declaration.total_weight,
            declaration.total_shipments,
            declaration.declaration_type.code(),
            declaration.status.code(),
            declaration.amice_uuid.map(|uuid| uuid.to_string()),
            optional_list(&declaration.errors)?,
            declaration.created_at,
        ],
    )
    .map_err(write_error)?;
    Ok(())
}

fn upsert_session(conn: &Connection, session: &LmaDeclarationSession) -> Result<(), StoreError> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO lma_declaration_sessions ({SESSION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![
            session.id.to_string(),
            to_json(&session.declaration_ids)?,
            session.session_type.code(),
            session.status.code(),
            optional_list(&session.errors)?,
            session.created_at,
        ],
    )
    .map_err(write_error)?;
    Ok(())
}

impl WeightTicketLines for SqliteStore {
    fn lines_weighed_until(&self, period: Period) -> Result<Vec<WeightTicketLine>, StoreError> {
        query::<LineRow, _>(
            &self.conn(),
            &format!(
                "SELECT {LINE_COLUMNS} FROM weight_ticket_lines \
                 WHERE weighed_at < ?1 ORDER BY weighed_at, rowid"
            ),
            params![period_start(period.next())],
        )
    }

    fn lines_in_period(&self, period: Period) -> Result<Vec<WeightTicketLine>, StoreError> {
        query::<LineRow, _>(
            &self.conn(),
            &format!(
                "SELECT {LINE_COLUMNS} FROM weight_ticket_lines \
                 WHERE weighed_at >= ?1 AND weighed_at < ?2 ORDER BY weighed_at, rowid"
            ),
            params![period_start(period), period_start(period.next())],
        )
    }
}

impl WasteStreams for SqliteStore {
    fn find(&self, number: &WasteStreamNumber) -> Result<Option<WasteStream>, StoreError> {
        let found = query::<WasteStreamRow, _>(
            &self.conn(),
            &format!("SELECT {WASTE_STREAM_COLUMNS} FROM waste_streams WHERE number = ?1"),
            params![number.0],
        )?;
        Ok(found.into_iter().next())
    }
}

impl DeclarationStore for SqliteStore {
    fn find(&self, id: &DeclarationId) -> Result<Option<LmaDeclaration>, StoreError> {
        let found = query::<DeclarationRow, _>(
            &self.conn(),
            &format!("SELECT {DECLARATION_COLUMNS} FROM lma_declarations WHERE id = ?1"),
            params![id.0],
        )?;
        Ok(found.into_iter().next())
    }

    fn find_many(&self, ids: &[DeclarationId]) -> Result<Vec<LmaDeclaration>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {DECLARATION_COLUMNS} FROM lma_declarations WHERE id = ?1");
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            found.extend(query::<DeclarationRow, _>(&conn, &sql, params![id.0])?);
        }
        Ok(found)
    }

    fn find_by_key(
        &self,
        waste_stream_number: &WasteStreamNumber,
        period: Period,
    ) -> Result<Vec<LmaDeclaration>, StoreError> {
        query::<DeclarationRow, _>(
            &self.conn(),
            &format!(
                "SELECT {DECLARATION_COLUMNS} FROM lma_declarations \
                 WHERE waste_stream_number = ?1 AND period = ?2 ORDER BY created_at, id"
            ),
            params![waste_stream_number.0, period.to_string()],
        )
    }

    fn has_completed(&self, waste_stream_number: &WasteStreamNumber) -> Result<bool, StoreError> {
        self.conn()
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM lma_declarations \
                 WHERE waste_stream_number = ?1 AND status = ?2)",
                params![waste_stream_number.0, DeclarationStatus::Completed.code()],
                |row| row.get(0),
            )
            .map_err(backend)
    }

    fn next_declaration_id(&self) -> Result<DeclarationId, StoreError> {
        let value: i64 = self
            .conn()
            .query_row(
                "UPDATE lma_declaration_id_sequence SET next_value = next_value + 1 \
                 WHERE id = 1 RETURNING next_value - 1",
                [],
                |row| row.get(0),
            )
            .map_err(backend)?;
        let sequence = u64::try_from(value)
            .map_err(|err| StoreError::Corrupt(format!("declaration sequence {value}: {err}")))?;
        Ok(DeclarationId::from_sequence(sequence))
    }

    fn apply_detection(&self, writes: &[DetectionWrite]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(backend)?;
        for write in writes {
            for superseded in &write.superseded {
                tx.execute("DELETE FROM lma_declarations WHERE id = ?1", params![superseded.0])
                    .map_err(write_error)?;
            }
            upsert_declaration(&tx, &write.declaration)?;
        }
        tx.commit().map_err(backend)?;
        debug!(writes = writes.len(), "detection applied");
        Ok(())
    }

    fn save_all(&self, declarations: &[LmaDeclaration]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(backend)?;
        for declaration in declarations {
            upsert_declaration(&tx, declaration)?;
        }
        tx.commit().map_err(backend)
    }
}

impl SessionStore for SqliteStore {
    fn pending(&self) -> Result<Vec<LmaDeclarationSession>, StoreError> {
        query::<SessionRow, _>(
            &self.conn(),
            &format!(
                "SELECT {SESSION_COLUMNS} FROM lma_declaration_sessions \
                 WHERE status = ?1 ORDER BY created_at, id"
            ),
            params![SessionStatus::Pending.code()],
        )
    }

    fn find(&self, id: Uuid) -> Result<Option<LmaDeclarationSession>, StoreError> {
        let found = query::<SessionRow, _>(
            &self.conn(),
            &format!("SELECT {SESSION_COLUMNS} FROM lma_declaration_sessions WHERE id = ?1"),
            params![id.to_string()],
        )?;
        Ok(found.into_iter().next())
    }

    fn save(&self, session: &LmaDeclarationSession) -> Result<(), StoreError> {
        upsert_session(&self.conn(), session)
    }

    fn save_with_declarations(
        &self,
        session: &LmaDeclarationSession,
        declarations: &[LmaDeclaration],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(backend)?;
        for declaration in declarations {
            upsert_declaration(&tx, declaration)?;
        }
        upsert_session(&tx, session)?;
        tx.commit().map_err(backend)
    }
}

impl JobStore for SqliteStore {
    fn pending(&self) -> Result<Vec<WasteDeclarationJob>, StoreError> {
        query::<JobRow, _>(
            &self.conn(),
            &format!(
                "SELECT {JOB_COLUMNS} FROM monthly_waste_declaration_jobs \
                 WHERE status = ?1 ORDER BY created, rowid"
            ),
            params![JobStatus::Pending.code()],
        )
    }

    fn exists(
        &self,
        job_type: JobType,
        period: Period,
        status: Option<JobStatus>,
    ) -> Result<bool, StoreError> {
        self.conn()
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM monthly_waste_declaration_jobs \
                 WHERE job_type = ?1 AND year_month = ?2 AND (?3 IS NULL OR status = ?3))",
                params![job_type.code(), period.year_month(), status.map(StatusCode::code)],
                |row| row.get(0),
            )
            .map_err(backend)
    }

    fn insert(&self, job: &WasteDeclarationJob) -> Result<(), StoreError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO monthly_waste_declaration_jobs ({JOB_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    job.id.to_string(),
                    job.job_type.code(),
                    job.period.year_month(),
                    job.status.code(),
                    job.created,
                    job.fulfilled,
                ],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn save(&self, job: &WasteDeclarationJob) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE monthly_waste_declaration_jobs \
                 SET job_type = ?2, year_month = ?3, status = ?4, created = ?5, fulfilled = ?6 \
                 WHERE id = ?1",
                params![
                    job.id.to_string(),
                    job.job_type.code(),
                    job.period.year_month(),
                    job.status.code(),
                    job.created,
                    job.fulfilled,
                ],
            )
            .map_err(write_error)?;
        if changed == 0 {
            return Err(StoreError::Conflict(format!("job {} does not exist", job.id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
