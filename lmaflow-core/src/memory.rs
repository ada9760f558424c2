//! In-memory adapters for every port, used by tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use uuid::Uuid;

use crate::mapping::{FirstReceivalMessage, MonthlyReceivalMessage};
use crate::model::{
    DeclarationId, DeclarationStatus, JobStatus, JobType, LmaDeclaration, LmaDeclarationSession,
    SessionStatus, WasteDeclarationJob, WasteStream, WasteStreamNumber, WeightTicketLine,
};
use crate::period::Period;
use crate::ports::{
    AmiceRegistry, DeclarationStore, DetectionWrite, JobStore, PortError, RetrievalResponse,
    SessionStore, StatusDetails, StoreError, WasteStreams, WeightTicketLines,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StoreState {
    lines: Vec<WeightTicketLine>,
    waste_streams: HashMap<WasteStreamNumber, WasteStream>,
    declarations: BTreeMap<DeclarationId, LmaDeclaration>,
    sessions: Vec<LmaDeclarationSession>,
    jobs: Vec<WasteDeclarationJob>,
    sequence: u64,
    writes: usize,
}

/// Every storage port backed by one mutex-guarded state.
///
/// Each mutating call holds the lock for its whole duration, which gives the
/// same all-or-nothing behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    /// Add a weighed line.
    pub fn add_line(&self, line: WeightTicketLine) {
        self.state().lines.push(line);
    }

    /// Register a waste stream.
    pub fn add_waste_stream(&self, waste_stream: WasteStream) {
        self.state()
            .waste_streams
            .insert(waste_stream.number.clone(), waste_stream);
    }

    /// Seed a declaration without counting it as a write.
    pub fn seed_declaration(&self, declaration: LmaDeclaration) {
        self.state()
            .declarations
            .insert(declaration.id.clone(), declaration);
    }

    /// Seed a session without counting it as a write.
    pub fn seed_session(&self, session: LmaDeclarationSession) {
        upsert_session(&mut self.state().sessions, session);
    }

    /// Seed a job without counting it as a write.
    pub fn seed_job(&self, job: WasteDeclarationJob) {
        self.state().jobs.push(job);
    }

    /// Snapshot of all declarations ordered by id.
    #[must_use]
    pub fn declarations(&self) -> Vec<LmaDeclaration> {
        self.state().declarations.values().cloned().collect()
    }

    /// One declaration by id.
    #[must_use]
    pub fn declaration(&self, id: &DeclarationId) -> Option<LmaDeclaration> {
        self.state().declarations.get(id).cloned()
    }

    /// Snapshot of all sessions in insertion order.
    #[must_use]
    pub fn sessions(&self) -> Vec<LmaDeclarationSession> {
        self.state().sessions.clone()
    }

    /// Snapshot of all jobs in insertion order.
    #[must_use]
    pub fn jobs(&self) -> Vec<WasteDeclarationJob> {
        self.state().jobs.clone()
    }

    /// Number of mutating calls made through the ports.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

fn upsert_session(sessions: &mut Vec<LmaDeclarationSession>, session: LmaDeclarationSession) {
    match sessions.iter_mut().find(|current| current.id == session.id) {
        Some(current) => *current = session,
        None => sessions.push(session),
    }
}

impl WeightTicketLines for MemoryStore {
    fn lines_weighed_until(&self, period: Period) -> Result<Vec<WeightTicketLine>, StoreError> {
        Ok(self
            .state()
            .lines
            .iter()
            .filter(|line| line.period() <= period)
            .cloned()
            .collect())
    }

    fn lines_in_period(&self, period: Period) -> Result<Vec<WeightTicketLine>, StoreError> {
        Ok(self
            .state()
            .lines
            .iter()
            .filter(|line| line.period() == period)
            .cloned()
            .collect())
    }
}

impl WasteStreams for MemoryStore {
    fn find(&self, number: &WasteStreamNumber) -> Result<Option<WasteStream>, StoreError> {
        Ok(self.state().waste_streams.get(number).cloned())
    }
}

impl DeclarationStore for MemoryStore {
    fn find(&self, id: &DeclarationId) -> Result<Option<LmaDeclaration>, StoreError> {
        Ok(self.declaration(id))
    }

    fn find_many(&self, ids: &[DeclarationId]) -> Result<Vec<LmaDeclaration>, StoreError> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.declarations.get(id).cloned())
            .collect())
    }

    fn find_by_key(
        &self,
        waste_stream_number: &WasteStreamNumber,
        period: Period,
    ) -> Result<Vec<LmaDeclaration>, StoreError> {
        Ok(self
            .state()
            .declarations
            .values()
            .filter(|declaration| declaration.covers(waste_stream_number, period))
            .cloned()
            .collect())
    }

    fn has_completed(&self, waste_stream_number: &WasteStreamNumber) -> Result<bool, StoreError> {
        Ok(self.state().declarations.values().any(|declaration| {
            declaration.waste_stream_number == *waste_stream_number
                && declaration.status == DeclarationStatus::Completed
        }))
    }

    fn next_declaration_id(&self) -> Result<DeclarationId, StoreError> {
        let mut state = self.state();
        state.sequence += 1;
        Ok(DeclarationId::from_sequence(state.sequence))
    }

    fn apply_detection(&self, writes: &[DetectionWrite]) -> Result<(), StoreError> {
        let mut state = self.state();
        for write in writes {
            for superseded in &write.superseded {
                state.declarations.remove(superseded);
            }
            state
                .declarations
                .insert(write.declaration.id.clone(), write.declaration.clone());
        }
        state.writes += 1;
        Ok(())
    }

    fn save_all(&self, declarations: &[LmaDeclaration]) -> Result<(), StoreError> {
        let mut state = self.state();
        for declaration in declarations {
            state
                .declarations
                .insert(declaration.id.clone(), declaration.clone());
        }
        state.writes += 1;
        Ok(())
    }
}

impl SessionStore for MemoryStore {
    fn pending(&self) -> Result<Vec<LmaDeclarationSession>, StoreError> {
        Ok(self
            .state()
            .sessions
            .iter()
            .filter(|session| session.status == SessionStatus::Pending)
            .cloned()
            .collect())
    }

    fn find(&self, id: Uuid) -> Result<Option<LmaDeclarationSession>, StoreError> {
        Ok(self
            .state()
            .sessions
            .iter()
            .find(|session| session.id == id)
            .cloned())
    }

    fn save(&self, session: &LmaDeclarationSession) -> Result<(), StoreError> {
        let mut state = self.state();
        upsert_session(&mut state.sessions, session.clone());
        state.writes += 1;
        Ok(())
    }

    fn save_with_declarations(
        &self,
        session: &LmaDeclarationSession,
        declarations: &[LmaDeclaration],
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        for declaration in declarations {
            state
                .declarations
                .insert(declaration.id.clone(), declaration.clone());
        }
        upsert_session(&mut state.sessions, session.clone());
        state.writes += 1;
        Ok(())
    }
}

impl JobStore for MemoryStore {
    fn pending(&self) -> Result<Vec<WasteDeclarationJob>, StoreError> {
        let mut jobs: Vec<WasteDeclarationJob> = self
            .state()
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created);
        Ok(jobs)
    }

    fn exists(
        &self,
        job_type: JobType,
        period: Period,
        status: Option<JobStatus>,
    ) -> Result<bool, StoreError> {
        Ok(self.state().jobs.iter().any(|job| {
            job.job_type == job_type
                && job.period == period
                && status.is_none_or(|wanted| job.status == wanted)
        }))
    }

    fn insert(&self, job: &WasteDeclarationJob) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.jobs.iter().any(|current| current.id == job.id) {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        state.jobs.push(job.clone());
        state.writes += 1;
        Ok(())
    }

    fn save(&self, job: &WasteDeclarationJob) -> Result<(), StoreError> {
        let mut state = self.state();
        let Some(current) = state.jobs.iter_mut().find(|current| current.id == job.id) else {
            return Err(StoreError::Conflict(format!("job {} does not exist", job.id)));
        };
        *current = job.clone();
        state.writes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    first_receivals: Vec<Vec<FirstReceivalMessage>>,
    monthly_receivals: Vec<Vec<MonthlyReceivalMessage>>,
    opened: Vec<Uuid>,
    responses: HashMap<Uuid, RetrievalResponse>,
    retrievals: usize,
    submission_failure: Option<String>,
    retrieval_failure: Option<String>,
    delay: Option<Duration>,
}

/// Scripted registry that records every call.
///
/// Sessions without a scripted response report that processing is still in
/// progress.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    /// Registry accepting every submission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        lock(&self.state)
    }

    /// Reject every following submission with `reason`.
    pub fn fail_submissions(&self, reason: impl Into<String>) {
        self.state().submission_failure = Some(reason.into());
    }

    /// Fail every following retrieval with `reason`.
    pub fn fail_retrievals(&self, reason: impl Into<String>) {
        self.state().retrieval_failure = Some(reason.into());
    }

    /// Delay every following call by `delay`.
    pub fn delay_calls(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Answer retrievals of `session_id` with `response`.
    pub fn respond(&self, session_id: Uuid, response: RetrievalResponse) {
        self.state().responses.insert(session_id, response);
    }

    /// Batches submitted as first receivals.
    #[must_use]
    pub fn first_receivals(&self) -> Vec<Vec<FirstReceivalMessage>> {
        self.state().first_receivals.clone()
    }

    /// Batches submitted as monthly receivals.
    #[must_use]
    pub fn monthly_receivals(&self) -> Vec<Vec<MonthlyReceivalMessage>> {
        self.state().monthly_receivals.clone()
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn opened_sessions(&self) -> Vec<Uuid> {
        self.state().opened.clone()
    }

    /// Total number of submissions and retrievals.
    #[must_use]
    pub fn calls(&self) -> usize {
        let state = self.state();
        state.first_receivals.len() + state.monthly_receivals.len() + state.retrievals
    }

    async fn pause(&self) {
        let delay = self.state().delay;
        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
    }

    fn open(&self) -> Result<Uuid, PortError> {
        let mut state = self.state();
        if let Some(reason) = &state.submission_failure {
            return Err(PortError::Protocol(reason.clone()));
        }
        let session_id = Uuid::new_v4();
        state.opened.push(session_id);
        Ok(session_id)
    }
}

#[async_trait]
impl AmiceRegistry for MemoryRegistry {
    async fn declare_first_receivals(
        &self,
        items: Vec<FirstReceivalMessage>,
    ) -> Result<Uuid, PortError> {
        self.state().first_receivals.push(items);
        self.pause().await;
        self.open()
    }

    async fn declare_monthly_receivals(
        &self,
        items: Vec<MonthlyReceivalMessage>,
    ) -> Result<Uuid, PortError> {
        self.state().monthly_receivals.push(items);
        self.pause().await;
        self.open()
    }

    async fn retrieve(&self, session_id: Uuid) -> Result<RetrievalResponse, PortError> {
        self.state().retrievals += 1;
        self.pause().await;

        let state = self.state();
        if let Some(reason) = &state.retrieval_failure {
            return Err(PortError::Protocol(reason.clone()));
        }
        Ok(state
            .responses
            .get(&session_id)
            .cloned()
            .unwrap_or_else(|| RetrievalResponse {
                details: Some(StatusDetails {
                    not_all_processed: true,
                    ..StatusDetails::default()
                }),
            }))
    }
}
