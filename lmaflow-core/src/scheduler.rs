//! Scheduling and draining of the periodic declaration jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::declarator::{ReceivalCandidate, ReceivalDeclarator};
use crate::detector::{self, DeclarationDetector};
use crate::model::{JobStatus, JobType, WasteDeclarationJob};
use crate::period::{self, Period};
use crate::ports::{DeclarationStore, JobStore, StoreError, WasteStreams, WeightTicketLines};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Tally of one drain of the job queue.
pub struct JobRunReport {
    /// Jobs that ran and were marked completed.
    pub completed: usize,
    /// Jobs that failed and stay pending.
    pub failed: usize,
}

/// Creates declaration jobs and executes the pending ones.
pub struct JobScheduler {
    jobs: Arc<dyn JobStore>,
    lines: Arc<dyn WeightTicketLines>,
    declarations: Arc<dyn DeclarationStore>,
    waste_streams: Arc<dyn WasteStreams>,
    detector: Arc<DeclarationDetector>,
    declarator: Arc<dyn ReceivalDeclarator>,
}

impl JobScheduler {
    /// Create a scheduler over the given ports and components.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        lines: Arc<dyn WeightTicketLines>,
        declarations: Arc<dyn DeclarationStore>,
        waste_streams: Arc<dyn WasteStreams>,
        detector: Arc<DeclarationDetector>,
        declarator: Arc<dyn ReceivalDeclarator>,
    ) -> Self {
        Self {
            jobs,
            lines,
            declarations,
            waste_streams,
            detector,
            declarator,
        }
    }

    /// Create the first and monthly receival jobs for the month before `now`.
    ///
    /// A job type that already has a job for that period, in any status, is
    /// not scheduled again.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading or inserting jobs fails.
    pub fn schedule_monthly_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WasteDeclarationJob>, StoreError> {
        let target = Period::from_date(now.date_naive()).previous();
        let mut scheduled = Vec::new();

        for job_type in [JobType::FirstReceivals, JobType::MonthlyReceivals] {
            if self.jobs.exists(job_type, target, None)? {
                debug!(?job_type, period = %target, "job already scheduled");
                continue;
            }
            let job = WasteDeclarationJob::pending(job_type, target, now);
            self.jobs.insert(&job)?;
            info!(job_id = %job.id, ?job_type, period = %target, "job scheduled");
            scheduled.push(job);
        }

        Ok(scheduled)
    }

    /// Schedule a late weight ticket sweep when undeclared lines exist up to
    /// the cutoff period.
    ///
    /// Returns the new job, or `None` when there is nothing to declare or a
    /// pending sweep for the cutoff period already exists.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when reading or inserting fails.
    pub fn trigger_late_declarations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<WasteDeclarationJob>, StoreError> {
        let cutoff = period::cutoff(now.date_naive());

        if !self.detector.plan(now)?.has_changes() {
            debug!(%cutoff, "no late weight tickets");
            return Ok(None);
        }

        if self
            .jobs
            .exists(JobType::LateWeightTickets, cutoff, Some(JobStatus::Pending))?
        {
            debug!(%cutoff, "late weight ticket sweep already pending");
            return Ok(None);
        }

        let job = WasteDeclarationJob::pending(JobType::LateWeightTickets, cutoff, now);
        self.jobs.insert(&job)?;
        info!(job_id = %job.id, period = %cutoff, "late weight ticket sweep scheduled");
        Ok(Some(job))
    }

    /// Run every pending job once.
    ///
    /// A job that fails is logged and left pending for the next drain; the
    /// remaining jobs still run.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the job queue cannot be read or a job
    /// cannot be marked completed.
    pub async fn process_pending_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> Result<JobRunReport, StoreError> {
        let mut report = JobRunReport::default();

        for mut job in self.jobs.pending()? {
            if job.status != JobStatus::Pending {
                continue;
            }

            if let Err(err) = self.run(&job, now).await {
                warn!(
                    job_id = %job.id,
                    job_type = ?job.job_type,
                    error = %err,
                    "job failed, left pending"
                );
                report.failed += 1;
                continue;
            }

            job.status = JobStatus::Completed;
            job.fulfilled = Some(now);
            self.jobs.save(&job)?;
            info!(
                job_id = %job.id,
                job_type = ?job.job_type,
                period = %job.period,
                "job completed"
            );
            report.completed += 1;
        }

        Ok(report)
    }

    async fn run(&self, job: &WasteDeclarationJob, now: DateTime<Utc>) -> Result<(), StoreError> {
        match job.job_type {
            JobType::FirstReceivals => {
                let candidates = self.first_receival_candidates(job.period)?;
                if candidates.is_empty() {
                    info!(period = %job.period, "no first receivals to declare");
                    return Ok(());
                }
                let sessions = self.declarator.declare(candidates, now).await?;
                info!(period = %job.period, sessions = sessions.len(), "first receivals declared");
            }
            JobType::MonthlyReceivals => {
                info!(
                    period = %job.period,
                    "monthly receival declaration is not automated, completing job"
                );
            }
            JobType::LateWeightTickets => {
                self.detector.detect_and_create_for_late_weight_tickets(now)?;
            }
        }
        Ok(())
    }

    /// Streams without a completed declaration, with their lines weighed in `period`.
    ///
    /// Streams that already have any declaration for the period are left to
    /// the approval flow.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when a lookup fails.
    pub fn first_receival_candidates(
        &self,
        period: Period,
    ) -> Result<Vec<ReceivalCandidate>, StoreError> {
        let lines = self.lines.lines_in_period(period)?;
        let mut candidates = Vec::new();

        for ((number, line_period), totals) in detector::aggregate_lines(&lines) {
            if line_period != period || self.declarations.has_completed(&number)? {
                continue;
            }
            if !self.declarations.find_by_key(&number, period)?.is_empty() {
                debug!(waste_stream_number = %number, %period, "stream already has a declaration");
                continue;
            }
            let Some(waste_stream) = self.waste_streams.find(&number)? else {
                warn!(waste_stream_number = %number, "weighed stream is not registered");
                continue;
            };
            candidates.push(ReceivalCandidate {
                waste_stream,
                period,
                totals,
            });
        }

        Ok(candidates)
    }
}
