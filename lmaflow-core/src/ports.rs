//! Traits describing the collaborators of the pipeline and shared helper types.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use serde::{Deserialize, Serialize};
use tokio::time;
use uuid::Uuid;

use crate::mapping::{FirstReceivalMessage, MonthlyReceivalMessage};
use crate::model::{
    DeclarationId, JobStatus, JobType, LmaDeclaration, LmaDeclarationSession, WasteDeclarationJob,
    WasteStream, WasteStreamNumber, WeightTicketLine,
};
use crate::period::Period;

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to the waste registry.
pub enum PortError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// The registry did not answer in time.
    #[error("Registry did not answer within {0:?}")]
    Timeout(Duration),
    /// The registry answered with something that could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(thiserror::Error, Debug)]
/// Errors raised by the storage adapters.
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),
    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    /// A write conflicted with existing data.
    #[error("Conflicting write: {0}")]
    Conflict(String),
}

/// Read access to the weight tickets kept by the administration application.
pub trait WeightTicketLines: Send + Sync {
    /// All lines weighed on or before the last day of `period`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn lines_weighed_until(&self, period: Period) -> Result<Vec<WeightTicketLine>, StoreError>;

    /// All lines weighed inside `period`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn lines_in_period(&self, period: Period) -> Result<Vec<WeightTicketLine>, StoreError>;
}

/// Lookup of registered waste streams.
pub trait WasteStreams: Send + Sync {
    /// Find a waste stream by its number.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn find(&self, number: &WasteStreamNumber) -> Result<Option<WasteStream>, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
/// One insert produced by a detection run, replacing zero or more waiting rows.
pub struct DetectionWrite {
    /// Waiting-for-approval rows removed in favour of `declaration`.
    pub superseded: Vec<DeclarationId>,
    /// Freshly aggregated declaration.
    pub declaration: LmaDeclaration,
}

/// Storage of declarations. Every mutating method is a single transaction.
pub trait DeclarationStore: Send + Sync {
    /// Find one declaration.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn find(&self, id: &DeclarationId) -> Result<Option<LmaDeclaration>, StoreError>;

    /// Find several declarations; unknown ids are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn find_many(&self, ids: &[DeclarationId]) -> Result<Vec<LmaDeclaration>, StoreError>;

    /// All declarations for the stream and period, in any status.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn find_by_key(
        &self,
        waste_stream_number: &WasteStreamNumber,
        period: Period,
    ) -> Result<Vec<LmaDeclaration>, StoreError>;

    /// Whether any completed declaration exists for the stream.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn has_completed(&self, waste_stream_number: &WasteStreamNumber) -> Result<bool, StoreError>;

    /// Allocate a fresh declaration id, never handed out before.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the sequence cannot be advanced.
    fn next_declaration_id(&self) -> Result<DeclarationId, StoreError>;

    /// Apply all writes of one detection run atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the transaction fails; nothing is written then.
    fn apply_detection(&self, writes: &[DetectionWrite]) -> Result<(), StoreError>;

    /// Insert or replace the given declarations atomically.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the transaction fails.
    fn save_all(&self, declarations: &[LmaDeclaration]) -> Result<(), StoreError>;
}

/// Storage of submission sessions.
pub trait SessionStore: Send + Sync {
    /// All sessions still waiting for a registry result.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn pending(&self) -> Result<Vec<LmaDeclarationSession>, StoreError>;

    /// Find one session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn find(&self, id: Uuid) -> Result<Option<LmaDeclarationSession>, StoreError>;

    /// Insert or replace the session alone.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails.
    fn save(&self, session: &LmaDeclarationSession) -> Result<(), StoreError>;

    /// Insert or replace the session together with its declarations in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the transaction fails; nothing is written then.
    fn save_with_declarations(
        &self,
        session: &LmaDeclarationSession,
        declarations: &[LmaDeclaration],
    ) -> Result<(), StoreError>;
}

/// Storage of periodic declaration jobs.
pub trait JobStore: Send + Sync {
    /// All jobs in [`JobStatus::Pending`], oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn pending(&self) -> Result<Vec<WasteDeclarationJob>, StoreError>;

    /// Whether a job of the type exists for the period, optionally restricted to a status.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend query fails.
    fn exists(
        &self,
        job_type: JobType,
        period: Period,
        status: Option<JobStatus>,
    ) -> Result<bool, StoreError>;

    /// Insert a new job.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails.
    fn insert(&self, job: &WasteDeclarationJob) -> Result<(), StoreError>;

    /// Replace an existing job.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails.
    fn save(&self, job: &WasteDeclarationJob) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Error or notice reported by the registry.
pub struct RegistryMessage {
    /// Registry error code.
    pub code: String,
    /// Human readable description.
    pub description: String,
}

impl RegistryMessage {
    /// Build a message from code and description.
    #[must_use]
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for RegistryMessage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}: {}", self.code, self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Outcome of a single declaration inside a processed session.
pub struct ItemResult {
    /// Reference the declarer attached on submission; our declaration id.
    pub declarer_reference: String,
    /// Registry identifier, present when the declaration was registered.
    pub amice_uuid: Option<Uuid>,
    /// Whether the item passed the registry's structural and business checks.
    pub technically_accepted: bool,
    /// Item-level validation errors.
    pub errors: Vec<RegistryMessage>,
}

impl ItemResult {
    /// Whether the item counts as accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.technically_accepted && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Per-declaration-type result collection of a processed session.
pub enum ResultCollection {
    /// Results of first receival declarations.
    FirstReceivals(Vec<ItemResult>),
    /// Results of monthly receival declarations.
    MonthlyReceivals(Vec<ItemResult>),
    /// Results of discharge declarations.
    Discharges(Vec<ItemResult>),
}

impl ResultCollection {
    /// Items of the collection regardless of its type.
    #[must_use]
    pub fn items(&self) -> &[ItemResult] {
        match self {
            Self::FirstReceivals(items)
            | Self::MonthlyReceivals(items)
            | Self::Discharges(items) => items,
        }
    }

    /// Short name of the collection, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FirstReceivals(_) => "first_receivals",
            Self::MonthlyReceivals(_) => "monthly_receivals",
            Self::Discharges(_) => "discharges",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Status block of a retrieval response.
pub struct StatusDetails {
    /// The registry has not processed every declaration of the session yet.
    pub not_all_processed: bool,
    /// Request-level errors.
    pub errors: Vec<RegistryMessage>,
    /// Populated result collections.
    pub collections: Vec<ResultCollection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Answer to a session retrieval request.
pub struct RetrievalResponse {
    /// Status block; absent when the registry returned nothing useful.
    pub details: Option<StatusDetails>,
}

#[async_trait]
/// Trait for the national waste registry (LMA, reached through AMICE).
pub trait AmiceRegistry: Send + Sync {
    /// Open a session declaring the given first receivals.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the submission is not accepted for processing.
    async fn declare_first_receivals(
        &self,
        items: Vec<FirstReceivalMessage>,
    ) -> Result<Uuid, PortError>;

    /// Open a session declaring the given monthly receivals.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the submission is not accepted for processing.
    async fn declare_monthly_receivals(
        &self,
        items: Vec<MonthlyReceivalMessage>,
    ) -> Result<Uuid, PortError>;

    /// Retrieve the processing result of a session.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the registry cannot be reached.
    async fn retrieve(&self, session_id: Uuid) -> Result<RetrievalResponse, PortError>;
}

/// Run a registry call, turning an overrun of `limit` into [`PortError::Timeout`].
///
/// # Errors
///
/// Returns the call's own [`PortError`], or [`PortError::Timeout`] when it did
/// not finish in time.
pub async fn within<T, F>(limit: Duration, call: F) -> Result<T, PortError>
where
    F: Future<Output = Result<T, PortError>>,
{
    time::timeout(limit, call)
        .await
        .map_err(|_elapsed| PortError::Timeout(limit))?
}
