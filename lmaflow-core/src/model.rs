//! Domain data structures for weight tickets, declarations, sessions, and jobs.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::period::Period;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Registered number of a waste stream (afvalstroomnummer).
pub struct WasteStreamNumber(pub String);

impl fmt::Display for WasteStreamNumber {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Twelve digit identifier of a declaration, also used as the declarer reference.
pub struct DeclarationId(pub String);

impl DeclarationId {
    /// Format a sequence number as a zero-padded twelve digit id.
    #[must_use]
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("{sequence:012}"))
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A single weighed shipment as recorded on a weight ticket.
pub struct WeightTicketLine {
    /// Waste stream the shipment was weighed under.
    pub waste_stream_number: WasteStreamNumber,
    /// Net weight in kilograms.
    pub weight_kg: i64,
    /// Identifier of the carrier that transported the load.
    pub carrier: String,
    /// Moment of weighing.
    pub weighed_at: NaiveDateTime,
}

impl WeightTicketLine {
    /// Period the line is reported in.
    #[must_use]
    pub fn period(&self) -> Period {
        Period::from_timestamp(self.weighed_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Registered waste stream with the parties needed for a first receival message.
pub struct WasteStream {
    /// Registered number.
    pub number: WasteStreamNumber,
    /// Usual name of the waste.
    pub name: String,
    /// EURAL classification code.
    pub eural_code: String,
    /// Processing method code, e.g. `R05`.
    pub processing_method_code: String,
    /// Party disposing of the waste.
    pub consignor_party: String,
    /// Party receiving and processing the waste.
    pub processor_party: String,
    /// Location the waste is picked up from, absent for route collections.
    pub pickup_location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Kind of receival being declared.
pub enum DeclarationType {
    /// First declaration ever made for a waste stream.
    FirstReceival,
    /// Recurring monthly declaration.
    MonthlyReceival,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Lifecycle state of a declaration.
pub enum DeclarationStatus {
    /// Detected and waiting for an operator to approve submission.
    WaitingApproval,
    /// Submitted; the registry has not reported the outcome yet.
    Pending,
    /// Accepted by the registry.
    Completed,
    /// Rejected locally or by the registry.
    Failed,
}

impl DeclarationStatus {
    /// Whether no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Aggregated report of one waste stream over one period.
pub struct LmaDeclaration {
    /// Twelve digit identifier.
    pub id: DeclarationId,
    /// Declared waste stream.
    pub waste_stream_number: WasteStreamNumber,
    /// Reported period in `MMyyyy` form. Kept raw; it is validated on approval.
    pub period: String,
    /// Distinct carriers involved, in first-seen order.
    pub transporters: Vec<String>,
    /// Sum of the line weights in kilograms.
    pub total_weight: i64,
    /// Number of weighed shipments.
    pub total_shipments: u32,
    /// First or monthly receival.
    pub declaration_type: DeclarationType,
    /// Current lifecycle state.
    pub status: DeclarationStatus,
    /// Registry reference, set once the declaration is completed.
    pub amice_uuid: Option<Uuid>,
    /// Reasons for failure, set once the declaration failed.
    pub errors: Vec<String>,
    /// Moment the declaration was created.
    pub created_at: DateTime<Utc>,
}

impl LmaDeclaration {
    /// Whether the declaration reports the given stream and period.
    #[must_use]
    pub fn covers(&self, waste_stream_number: &WasteStreamNumber, period: Period) -> bool {
        self.waste_stream_number == *waste_stream_number && self.period == period.to_string()
    }

    /// Whether two declarations report the same figures.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.waste_stream_number == other.waste_stream_number
            && self.period == other.period
            && self.transporters == other.transporters
            && self.total_weight == other.total_weight
            && self.total_shipments == other.total_shipments
            && self.declaration_type == other.declaration_type
    }

    /// Move to [`DeclarationStatus::Failed`] with the given reasons.
    pub fn fail<I, S>(&mut self, errors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status = DeclarationStatus::Failed;
        self.amice_uuid = None;
        self.errors = errors.into_iter().map(Into::into).collect();
    }

    /// Return a submitted declaration to [`DeclarationStatus::WaitingApproval`].
    pub fn reopen(&mut self) {
        self.status = DeclarationStatus::WaitingApproval;
        self.amice_uuid = None;
        self.errors.clear();
    }

    /// Move to [`DeclarationStatus::Completed`] with the registry reference.
    pub fn complete(&mut self, amice_uuid: Uuid) {
        self.status = DeclarationStatus::Completed;
        self.amice_uuid = Some(amice_uuid);
        self.errors.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Kind of periodic declaration job.
pub enum JobType {
    /// Declare first receivals of streams active in the period.
    FirstReceivals,
    /// Declare monthly receivals for the period.
    MonthlyReceivals,
    /// Sweep weight tickets that were not declared in time.
    LateWeightTickets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// State of a declaration job.
pub enum JobStatus {
    /// Waiting to be drained.
    Pending,
    /// Drained; never reopened.
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Scheduling record for one periodic declaration sweep.
pub struct WasteDeclarationJob {
    /// Unique identifier.
    pub id: Uuid,
    /// What the job does when drained.
    pub job_type: JobType,
    /// Period the job targets.
    pub period: Period,
    /// Current state.
    pub status: JobStatus,
    /// Moment the job was scheduled.
    pub created: DateTime<Utc>,
    /// Moment the job was drained.
    pub fulfilled: Option<DateTime<Utc>>,
}

impl WasteDeclarationJob {
    /// New pending job for the period.
    #[must_use]
    pub fn pending(job_type: JobType, period: Period, created: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            period,
            status: JobStatus::Pending,
            created,
            fulfilled: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// State of a submission session.
pub enum SessionStatus {
    /// Submitted; results are polled.
    Pending,
    /// Every declaration was accepted.
    Completed,
    /// At least one declaration or the session itself failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Declarations submitted to the registry in one call.
pub struct LmaDeclarationSession {
    /// Session identifier assigned by the registry.
    pub id: Uuid,
    /// Declarations in submission order.
    pub declaration_ids: Vec<DeclarationId>,
    /// Type shared by all declarations of the session.
    pub session_type: DeclarationType,
    /// Current state.
    pub status: SessionStatus,
    /// Moment of submission.
    pub created_at: DateTime<Utc>,
    /// Session-level problems reported while resolving.
    pub errors: Vec<String>,
}

impl LmaDeclarationSession {
    /// New pending session.
    #[must_use]
    pub fn pending(
        id: Uuid,
        declaration_ids: Vec<DeclarationId>,
        session_type: DeclarationType,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            declaration_ids,
            session_type,
            status: SessionStatus::Pending,
            created_at,
            errors: Vec::new(),
        }
    }

    /// Move to [`SessionStatus::Failed`], appending the reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = SessionStatus::Failed;
        self.errors.push(reason.into());
    }

    /// Whether the declaration was submitted in this session.
    #[must_use]
    pub fn tracks(&self, id: &DeclarationId) -> bool {
        self.declaration_ids.contains(id)
    }
}

/// Stable upper-case codes used when the enums are stored as text.
pub trait StatusCode: Sized + Copy + 'static {
    /// All variants.
    const ALL: &'static [Self];

    /// Upper-case code of the variant.
    fn code(self) -> &'static str;

    /// Variant for a stored code.
    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|variant| variant.code() == code)
    }
}

impl StatusCode for DeclarationType {
    const ALL: &'static [Self] = &[Self::FirstReceival, Self::MonthlyReceival];

    fn code(self) -> &'static str {
        match self {
            Self::FirstReceival => "FIRST_RECEIVAL",
            Self::MonthlyReceival => "MONTHLY_RECEIVAL",
        }
    }
}

impl StatusCode for DeclarationStatus {
    const ALL: &'static [Self] = &[
        Self::WaitingApproval,
        Self::Pending,
        Self::Completed,
        Self::Failed,
    ];

    fn code(self) -> &'static str {
        match self {
            Self::WaitingApproval => "WAITING_APPROVAL",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl StatusCode for JobType {
    const ALL: &'static [Self] = &[
        Self::FirstReceivals,
        Self::MonthlyReceivals,
        Self::LateWeightTickets,
    ];

    fn code(self) -> &'static str {
        match self {
            Self::FirstReceivals => "FIRST_RECEIVALS",
            Self::MonthlyReceivals => "MONTHLY_RECEIVALS",
            Self::LateWeightTickets => "LATE_WEIGHT_TICKETS",
        }
    }
}

impl StatusCode for JobStatus {
    const ALL: &'static [Self] = &[Self::Pending, Self::Completed];

    fn code(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl StatusCode for SessionStatus {
    const ALL: &'static [Self] = &[Self::Pending, Self::Completed, Self::Failed];

    fn code(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_ids_are_twelve_digits() {
        assert_eq!(DeclarationId::from_sequence(42).0, "000000000042");
    }

    #[test]
    fn status_codes_round_trip() {
        for status in DeclarationStatus::ALL {
            assert_eq!(DeclarationStatus::from_code(status.code()), Some(*status));
        }
        for job_type in JobType::ALL {
            assert_eq!(JobType::from_code(job_type.code()), Some(*job_type));
        }
        assert_eq!(SessionStatus::from_code("UNKNOWN"), None);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!DeclarationStatus::WaitingApproval.is_terminal());
        assert!(!DeclarationStatus::Pending.is_terminal());
        assert!(DeclarationStatus::Completed.is_terminal());
        assert!(DeclarationStatus::Failed.is_terminal());
    }
}
