//! Batched submission of first receivals for streams that were never declared.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::compatibility;
use crate::detector::LineTotals;
use crate::mapping::{self, FirstReceivalMessage};
use crate::model::{
    DeclarationId, DeclarationStatus, DeclarationType, LmaDeclaration, LmaDeclarationSession,
    WasteStream,
};
use crate::period::Period;
use crate::ports::{self, AmiceRegistry, DeclarationStore, SessionStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
/// A waste stream with its activity in one period, ready to be declared.
pub struct ReceivalCandidate {
    /// The stream to declare.
    pub waste_stream: WasteStream,
    /// Period of the activity.
    pub period: Period,
    /// Aggregated lines of the stream in the period.
    pub totals: LineTotals,
}

#[async_trait]
/// Something that declares first receivals for a set of candidates.
pub trait ReceivalDeclarator: Send + Sync {
    /// Declare the candidates and return the ids of the opened sessions.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when persisting the outcome fails.
    async fn declare(
        &self,
        candidates: Vec<ReceivalCandidate>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;
}

/// Declares first receivals in batches of compatible waste streams.
pub struct FirstReceivalDeclarator {
    declarations: Arc<dyn DeclarationStore>,
    sessions: Arc<dyn SessionStore>,
    registry: Arc<dyn AmiceRegistry>,
    registry_timeout: Duration,
}

impl FirstReceivalDeclarator {
    /// Create the declarator over the given ports.
    #[must_use]
    pub fn new(
        declarations: Arc<dyn DeclarationStore>,
        sessions: Arc<dyn SessionStore>,
        registry: Arc<dyn AmiceRegistry>,
        registry_timeout: Duration,
    ) -> Self {
        Self {
            declarations,
            sessions,
            registry,
            registry_timeout,
        }
    }

    fn declaration_for(
        id: DeclarationId,
        candidate: &ReceivalCandidate,
        now: DateTime<Utc>,
    ) -> LmaDeclaration {
        LmaDeclaration {
            id,
            waste_stream_number: candidate.waste_stream.number.clone(),
            period: candidate.period.to_string(),
            transporters: candidate.totals.transporters.clone(),
            total_weight: candidate.totals.total_weight,
            total_shipments: candidate.totals.total_shipments,
            declaration_type: DeclarationType::FirstReceival,
            status: DeclarationStatus::Pending,
            amice_uuid: None,
            errors: Vec::new(),
            created_at: now,
        }
    }

    async fn submit(&self, messages: Vec<FirstReceivalMessage>) -> Result<Uuid, String> {
        ports::within(
            self.registry_timeout,
            self.registry.declare_first_receivals(messages),
        )
        .await
        .map_err(|err| err.to_string())
    }

    async fn declare_batch(
        &self,
        batch: &[ReceivalCandidate],
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut declarations = Vec::with_capacity(batch.len());
        let mut messages = Vec::with_capacity(batch.len());
        let mut mapping_failure = None;

        for candidate in batch {
            let declaration =
                Self::declaration_for(self.declarations.next_declaration_id()?, candidate, now);
            match mapping::first_receival(&declaration, &candidate.waste_stream, candidate.period) {
                Ok(message) => messages.push(message),
                Err(err) => {
                    mapping_failure.get_or_insert_with(|| err.to_string());
                }
            }
            declarations.push(declaration);
        }

        let submission = match mapping_failure {
            Some(reason) => Err(reason),
            None => self.submit(messages).await,
        };

        match submission {
            Ok(session_id) => {
                let ids = declarations.iter().map(|declaration| declaration.id.clone()).collect();
                let session = LmaDeclarationSession::pending(
                    session_id,
                    ids,
                    DeclarationType::FirstReceival,
                    now,
                );
                self.sessions.save_with_declarations(&session, &declarations)?;
                info!(%session_id, declarations = declarations.len(), "first receivals submitted");
                Ok(Some(session_id))
            }
            Err(reason) => {
                let message = format!("Fout bij het indienen van de melding: {reason}");
                warn!(declarations = declarations.len(), %message, "first receival batch failed");
                for declaration in &mut declarations {
                    declaration.fail([message.clone()]);
                }
                self.declarations.save_all(&declarations)?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ReceivalDeclarator for FirstReceivalDeclarator {
    async fn declare(
        &self,
        candidates: Vec<ReceivalCandidate>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let batches = compatibility::partition_compatible(candidates, |candidate| {
            &candidate.waste_stream
        });

        let mut opened = Vec::new();
        for batch in &batches {
            if let Some(session_id) = self.declare_batch(batch, now).await? {
                opened.push(session_id);
            }
        }
        Ok(opened)
    }
}
