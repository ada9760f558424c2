//! Submission of a single approved declaration to the registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::mapping;
use crate::model::{
    DeclarationId, DeclarationStatus, DeclarationType, LmaDeclaration, LmaDeclarationSession,
    StatusCode, WasteStream,
};
use crate::period::Period;
use crate::ports::{
    self, AmiceRegistry, DeclarationStore, SessionStore, StoreError, WasteStreams,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Why an approval did not lead to a submission.
pub enum ApprovalFailureKind {
    /// No declaration with the id exists.
    NotFound,
    /// The declaration is not waiting for approval.
    NotAwaitingApproval,
    /// The stored period is not a valid `MMyyyy` value.
    InvalidPeriod,
    /// The declared waste stream is unknown.
    UnknownWasteStream,
    /// Mapping or submitting the declaration failed.
    Submission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Failure reported to the operator, with a message in Dutch.
pub struct ApprovalFailure {
    /// Category of the failure.
    pub kind: ApprovalFailureKind,
    /// Human readable message.
    pub message: String,
}

impl fmt::Display for ApprovalFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Result of approving a declaration.
pub enum ApprovalOutcome {
    /// The declaration was handed to the registry and is now pending.
    Submitted {
        /// The approved declaration.
        declaration_id: DeclarationId,
        /// Session opened by the registry.
        session_id: Uuid,
    },
    /// The declaration was not submitted.
    Rejected(ApprovalFailure),
}

impl ApprovalOutcome {
    fn rejected(kind: ApprovalFailureKind, message: String) -> Self {
        Self::Rejected(ApprovalFailure { kind, message })
    }
}

/// Validates an approved declaration and submits it as a one-item session.
pub struct DeclarationApprovalService {
    declarations: Arc<dyn DeclarationStore>,
    sessions: Arc<dyn SessionStore>,
    waste_streams: Arc<dyn WasteStreams>,
    registry: Arc<dyn AmiceRegistry>,
    registry_timeout: Duration,
}

impl DeclarationApprovalService {
    /// Create the service over the given ports.
    #[must_use]
    pub fn new(
        declarations: Arc<dyn DeclarationStore>,
        sessions: Arc<dyn SessionStore>,
        waste_streams: Arc<dyn WasteStreams>,
        registry: Arc<dyn AmiceRegistry>,
        registry_timeout: Duration,
    ) -> Self {
        Self {
            declarations,
            sessions,
            waste_streams,
            registry,
            registry_timeout,
        }
    }

    /// Approve a waiting declaration and submit it.
    ///
    /// Business failures are reported as [`ApprovalOutcome::Rejected`]. The
    /// registry is only contacted once the status, period, and waste stream
    /// checks passed. On success the declaration is pending, never completed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub async fn approve(
        &self,
        declaration_id: &DeclarationId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let Some(mut declaration) = self.declarations.find(declaration_id)? else {
            return Ok(ApprovalOutcome::rejected(
                ApprovalFailureKind::NotFound,
                format!("Melding niet gevonden: {declaration_id}"),
            ));
        };

        if declaration.status != DeclarationStatus::WaitingApproval {
            return Ok(ApprovalOutcome::rejected(
                ApprovalFailureKind::NotAwaitingApproval,
                format!(
                    "Melding {declaration_id} staat niet op goedkeuring wachten (status {})",
                    declaration.status.code()
                ),
            ));
        }

        let period = match Period::parse(&declaration.period) {
            Ok(period) => period,
            Err(err) => {
                let message = format!("Ongeldige periode '{}': {err}", declaration.period);
                return self.reject(declaration, ApprovalFailureKind::InvalidPeriod, message);
            }
        };

        let Some(waste_stream) = self.waste_streams.find(&declaration.waste_stream_number)? else {
            let message = format!(
                "Afvalstroom niet gevonden: {}",
                declaration.waste_stream_number
            );
            return self.reject(declaration, ApprovalFailureKind::UnknownWasteStream, message);
        };

        match self.submit(&declaration, &waste_stream, period).await {
            Ok(session_id) => {
                declaration.status = DeclarationStatus::Pending;
                let session = LmaDeclarationSession::pending(
                    session_id,
                    vec![declaration.id.clone()],
                    declaration.declaration_type,
                    now,
                );
                self.sessions
                    .save_with_declarations(&session, &[declaration])?;

                info!(%declaration_id, %session_id, "declaration submitted");
                Ok(ApprovalOutcome::Submitted {
                    declaration_id: declaration_id.clone(),
                    session_id,
                })
            }
            Err(reason) => {
                let message = format!("Fout bij het indienen van de melding: {reason}");
                self.reject(declaration, ApprovalFailureKind::Submission, message)
            }
        }
    }

    async fn submit(
        &self,
        declaration: &LmaDeclaration,
        waste_stream: &WasteStream,
        period: Period,
    ) -> Result<Uuid, String> {
        let submission = match declaration.declaration_type {
            DeclarationType::FirstReceival => {
                let message = mapping::first_receival(declaration, waste_stream, period)
                    .map_err(|err| err.to_string())?;
                ports::within(
                    self.registry_timeout,
                    self.registry.declare_first_receivals(vec![message]),
                )
                .await
            }
            DeclarationType::MonthlyReceival => {
                ports::within(
                    self.registry_timeout,
                    self.registry
                        .declare_monthly_receivals(vec![mapping::monthly_receival(declaration)]),
                )
                .await
            }
        };

        submission.map_err(|err| err.to_string())
    }

    fn reject(
        &self,
        mut declaration: LmaDeclaration,
        kind: ApprovalFailureKind,
        message: String,
    ) -> Result<ApprovalOutcome, StoreError> {
        warn!(declaration_id = %declaration.id, %message, "declaration approval failed");
        declaration.fail([message.clone()]);
        self.declarations.save_all(&[declaration])?;
        Ok(ApprovalOutcome::rejected(kind, message))
    }
}
