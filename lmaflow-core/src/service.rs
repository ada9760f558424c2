//! High-level service facade serializing every pipeline entry point.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::PipelineAdapters;
use crate::approval::{ApprovalOutcome, DeclarationApprovalService};
use crate::declarator::FirstReceivalDeclarator;
use crate::detector::{DeclarationDetector, DetectionReport};
use crate::model::{DeclarationId, DeclarationStatus, WasteDeclarationJob};
use crate::ports::{DeclarationStore, SessionStore, StoreError};
use crate::resolver::{ReopenOutcome, ResolveOutcome, SessionResultResolver};
use crate::scheduler::{JobRunReport, JobScheduler};
use crate::state_store::ExpiringStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Tunables of the pipeline.
pub struct PipelineSettings {
    /// Upper bound for every registry call.
    pub registry_timeout: Duration,
    /// How long an approval token stays valid.
    pub approval_ttl: TimeDelta,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            registry_timeout: Duration::from_secs(30),
            approval_ttl: TimeDelta::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Tally of one pass over the open sessions.
pub struct ResolutionReport {
    /// Sessions the registry is still processing.
    pub retried: usize,
    /// Sessions that completed.
    pub completed: usize,
    /// Sessions that failed.
    pub failed: usize,
    /// Sessions that could not be resolved because of a storage error.
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Everything one scheduler tick did.
pub struct TickReport {
    /// Monthly jobs created.
    pub scheduled: Vec<WasteDeclarationJob>,
    /// Late weight ticket sweep created, if any.
    pub late_sweep: Option<WasteDeclarationJob>,
    /// Outcome of draining the job queue.
    pub jobs: JobRunReport,
    /// Outcome of resolving open sessions.
    pub sessions: ResolutionReport,
}

/// Public entry point for the external periodic trigger and the operator.
///
/// Entry points run one at a time, so two runs never work on the same
/// declaration or session concurrently.
pub struct LmaService {
    declarations: Arc<dyn DeclarationStore>,
    sessions: Arc<dyn SessionStore>,
    detector: Arc<DeclarationDetector>,
    approval: DeclarationApprovalService,
    resolver: SessionResultResolver,
    scheduler: JobScheduler,
    approvals: ExpiringStateStore<DeclarationId>,
    writer: Mutex<()>,
}

impl LmaService {
    /// Wire the pipeline components over the given adapters.
    #[must_use]
    pub fn new(adapters: PipelineAdapters, settings: PipelineSettings) -> Self {
        let detector = Arc::new(DeclarationDetector::new(
            Arc::clone(&adapters.lines),
            Arc::clone(&adapters.declarations),
        ));
        let declarator = Arc::new(FirstReceivalDeclarator::new(
            Arc::clone(&adapters.declarations),
            Arc::clone(&adapters.sessions),
            Arc::clone(&adapters.registry),
            settings.registry_timeout,
        ));
        let approval = DeclarationApprovalService::new(
            Arc::clone(&adapters.declarations),
            Arc::clone(&adapters.sessions),
            Arc::clone(&adapters.waste_streams),
            Arc::clone(&adapters.registry),
            settings.registry_timeout,
        );
        let resolver = SessionResultResolver::new(
            Arc::clone(&adapters.declarations),
            Arc::clone(&adapters.sessions),
            Arc::clone(&adapters.registry),
            settings.registry_timeout,
        );
        let scheduler = JobScheduler::new(
            adapters.jobs,
            adapters.lines,
            Arc::clone(&adapters.declarations),
            adapters.waste_streams,
            Arc::clone(&detector),
            declarator,
        );

        Self {
            declarations: adapters.declarations,
            sessions: adapters.sessions,
            detector,
            approval,
            resolver,
            scheduler,
            approvals: ExpiringStateStore::new(settings.approval_ttl),
            writer: Mutex::new(()),
        }
    }

    /// Create or refresh waiting declarations for undeclared weight tickets.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading or writing fails.
    pub async fn detect(&self, now: DateTime<Utc>) -> Result<DetectionReport, StoreError> {
        let _guard = self.writer.lock().await;
        self.detector.detect_and_create_for_late_weight_tickets(now)
    }

    /// Approve a waiting declaration and submit it to the registry.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub async fn approve(
        &self,
        declaration_id: &DeclarationId,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome, StoreError> {
        let _guard = self.writer.lock().await;
        self.approval.approve(declaration_id, now).await
    }

    /// Reserve a waiting declaration for approval and hand out a single-use
    /// confirmation token. Returns `None` when the declaration does not exist
    /// or is not waiting for approval.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the lookup fails.
    pub fn prepare_approval(
        &self,
        declaration_id: &DeclarationId,
    ) -> Result<Option<Uuid>, StoreError> {
        self.approvals.evict_expired();
        let waiting = self
            .declarations
            .find(declaration_id)?
            .is_some_and(|declaration| declaration.status == DeclarationStatus::WaitingApproval);
        Ok(waiting.then(|| self.approvals.issue(declaration_id.clone())))
    }

    /// Approve the declaration reserved under `token`. Returns `None` when the
    /// token is unknown, was used before, or expired.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub async fn confirm_approval(
        &self,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ApprovalOutcome>, StoreError> {
        let Some(declaration_id) = self.approvals.take(token) else {
            warn!(%token, "unknown or expired approval token");
            return Ok(None);
        };
        self.approve(&declaration_id, now).await.map(Some)
    }

    /// Poll one session by id. Returns `None` for an unknown session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub async fn process_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ResolveOutcome>, StoreError> {
        let _guard = self.writer.lock().await;
        let Some(session) = self.sessions.find(session_id)? else {
            return Ok(None);
        };
        self.resolver.process_session(session).await.map(Some)
    }

    /// Return the pending declarations of a failed session to waiting for
    /// approval. Returns `None` for an unknown session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub async fn reopen_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<ReopenOutcome>, StoreError> {
        let _guard = self.writer.lock().await;
        let Some(session) = self.sessions.find(session_id)? else {
            return Ok(None);
        };
        self.resolver.reopen(session).map(Some)
    }

    /// Poll every pending session.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the pending sessions cannot be listed.
    pub async fn resolve_open_sessions(&self) -> Result<ResolutionReport, StoreError> {
        let _guard = self.writer.lock().await;
        self.resolve_pending().await
    }

    /// Schedule the monthly jobs for the previous month.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading or inserting jobs fails.
    pub async fn schedule_monthly_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WasteDeclarationJob>, StoreError> {
        let _guard = self.writer.lock().await;
        self.scheduler.schedule_monthly_jobs(now)
    }

    /// Schedule a late weight ticket sweep when undeclared lines exist.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading or inserting fails.
    pub async fn trigger_late_declarations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<WasteDeclarationJob>, StoreError> {
        let _guard = self.writer.lock().await;
        self.scheduler.trigger_late_declarations(now)
    }

    /// Run every pending job.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the job queue cannot be read or updated.
    pub async fn process_pending_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<JobRunReport, StoreError> {
        let _guard = self.writer.lock().await;
        self.scheduler.process_pending_jobs(now).await
    }

    /// One full scheduler tick: schedule jobs, trigger a late sweep, drain the
    /// job queue, and resolve open sessions.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`] that stops the tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let _guard = self.writer.lock().await;
        let scheduled = self.scheduler.schedule_monthly_jobs(now)?;
        let late_sweep = self.scheduler.trigger_late_declarations(now)?;
        let jobs = self.scheduler.process_pending_jobs(now).await?;
        let sessions = self.resolve_pending().await?;

        info!(
            scheduled = scheduled.len(),
            late_sweep = late_sweep.is_some(),
            jobs_completed = jobs.completed,
            jobs_failed = jobs.failed,
            sessions_completed = sessions.completed,
            sessions_failed = sessions.failed,
            "tick finished"
        );

        Ok(TickReport {
            scheduled,
            late_sweep,
            jobs,
            sessions,
        })
    }

    async fn resolve_pending(&self) -> Result<ResolutionReport, StoreError> {
        let mut report = ResolutionReport::default();

        for session in self.sessions.pending()? {
            let session_id = session.id;
            match self.resolver.process_session(session).await {
                Ok(ResolveOutcome::Retry) => report.retried += 1,
                Ok(ResolveOutcome::Completed) => report.completed += 1,
                Ok(ResolveOutcome::Failed(_)) => report.failed += 1,
                Ok(ResolveOutcome::AlreadyFinal(_)) => {}
                Err(err) => {
                    warn!(%session_id, error = %err, "resolving session failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}
