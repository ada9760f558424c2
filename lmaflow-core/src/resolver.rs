//! Reconciliation of registry session results into declaration and session state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::{
    DeclarationId, DeclarationStatus, LmaDeclaration, LmaDeclarationSession, SessionStatus,
};
use crate::ports::{
    self, AmiceRegistry, DeclarationStore, ItemResult, RetrievalResponse, SessionStore, StoreError,
};

/// Session-level reason when the registry sent no status block.
pub const MISSING_DETAILS: &str = "response details are null";
/// Session-level reason when the status block lists no result collection.
pub const NO_RESULTS: &str = "no meldingen found";
/// Declaration-level reason when an accepted item carries no registry reference.
pub const MISSING_REFERENCE: &str = "accepted without registry reference";

#[derive(Debug, Clone, PartialEq, Eq)]
/// What polling a session led to.
pub enum ResolveOutcome {
    /// The registry is still processing; nothing was changed.
    Retry,
    /// Every declaration of the session was accepted.
    Completed,
    /// The session failed; declarations that were accepted stay completed.
    Failed(Vec<String>),
    /// The session was already final and was not polled.
    AlreadyFinal(SessionStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What reopening a session led to.
pub enum ReopenOutcome {
    /// These declarations wait for approval again.
    Reopened(Vec<DeclarationId>),
    /// Only failed sessions are reopened.
    NotFailed(SessionStatus),
}

/// Interpretation of a retrieval response before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Retry,
    Reject(String),
    Items(Vec<ItemResult>),
}

fn interpret(response: RetrievalResponse) -> Verdict {
    let Some(details) = response.details else {
        return Verdict::Reject(MISSING_DETAILS.to_owned());
    };

    if details.not_all_processed {
        return Verdict::Retry;
    }

    if !details.errors.is_empty() {
        let reasons: Vec<String> = details.errors.iter().map(ToString::to_string).collect();
        return Verdict::Reject(reasons.join("; "));
    }

    if details.collections.is_empty() {
        return Verdict::Reject(NO_RESULTS.to_owned());
    }

    Verdict::Items(
        details
            .collections
            .into_iter()
            .flat_map(|collection| {
                debug!(
                    kind = collection.kind(),
                    items = collection.items().len(),
                    "session result collection"
                );
                collection.items().to_vec()
            })
            .collect(),
    )
}

fn item_errors(item: &ItemResult) -> Vec<String> {
    if item.errors.is_empty() {
        vec!["declaration was not technically accepted".to_owned()]
    } else {
        item.errors.iter().map(ToString::to_string).collect()
    }
}

/// Polls open sessions and finalizes their declarations.
pub struct SessionResultResolver {
    declarations: Arc<dyn DeclarationStore>,
    sessions: Arc<dyn SessionStore>,
    registry: Arc<dyn AmiceRegistry>,
    registry_timeout: Duration,
}

impl SessionResultResolver {
    /// Create the resolver over the given ports.
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

    /// Poll one session and apply its result.
    ///
    /// A "not yet processed" answer leaves every row untouched so the next
    /// poll is a true retry. A transport failure fails the session only.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub async fn process_session(
        &self,
        mut session: LmaDeclarationSession,
    ) -> Result<ResolveOutcome, StoreError> {
        if session.status != SessionStatus::Pending {
            return Ok(ResolveOutcome::AlreadyFinal(session.status));
        }

        let response =
            match ports::within(self.registry_timeout, self.registry.retrieve(session.id)).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(
                        session_id = %session.id,
                        error = %err,
                        "retrieving session result failed, declarations stay pending"
                    );
                    session.fail(err.to_string());
                    self.sessions.save(&session)?;
                    return Ok(ResolveOutcome::Failed(session.errors));
                }
            };

        match interpret(response) {
            Verdict::Retry => {
                debug!(session_id = %session.id, "session not fully processed yet");
                Ok(ResolveOutcome::Retry)
            }
            Verdict::Reject(reason) => {
                warn!(session_id = %session.id, %reason, "session rejected by registry");
                session.fail(reason);
                self.sessions.save(&session)?;
                Ok(ResolveOutcome::Failed(session.errors))
            }
            Verdict::Items(items) => self.finalize(session, &items),
        }
    }

    /// Return the declarations a failed session left pending to
    /// [`DeclarationStatus::WaitingApproval`]. Detection refreshes them and an
    /// operator can approve them again. The session stays failed.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when loading or persisting state fails.
    pub fn reopen(&self, mut session: LmaDeclarationSession) -> Result<ReopenOutcome, StoreError> {
        if session.status != SessionStatus::Failed {
            return Ok(ReopenOutcome::NotFailed(session.status));
        }

        let mut stranded: Vec<LmaDeclaration> = self
            .declarations
            .find_many(&session.declaration_ids)?
            .into_iter()
            .filter(|declaration| declaration.status == DeclarationStatus::Pending)
            .collect();
        if stranded.is_empty() {
            debug!(session_id = %session.id, "failed session has no pending declarations");
            return Ok(ReopenOutcome::Reopened(Vec::new()));
        }

        for declaration in &mut stranded {
            declaration.reopen();
        }
        let reopened: Vec<DeclarationId> = stranded
            .iter()
            .map(|declaration| declaration.id.clone())
            .collect();
        session.errors.push(format!("{} declarations reopened for approval", reopened.len()));
        self.sessions.save_with_declarations(&session, &stranded)?;

        info!(session_id = %session.id, reopened = reopened.len(), "session reopened");
        Ok(ReopenOutcome::Reopened(reopened))
    }

    fn finalize(
        &self,
        mut session: LmaDeclarationSession,
        items: &[ItemResult],
    ) -> Result<ResolveOutcome, StoreError> {
        let mut declarations = self.declarations.find_many(&session.declaration_ids)?;
        let mut resolved: HashSet<DeclarationId> = HashSet::new();
        let mut session_errors = Vec::new();

        for item in items {
            let id = DeclarationId(item.declarer_reference.clone());
            let matched = if session.tracks(&id) {
                declarations
                    .iter_mut()
                    .find(|declaration| declaration.id == id)
            } else {
                None
            };

            let Some(declaration) = matched else {
                session_errors.push(format!("declaration not found: {}", item.declarer_reference));
                continue;
            };

            if resolved.contains(&id) || declaration.status.is_terminal() {
                warn!(declaration_id = %id, "ignoring repeated registry result");
                session_errors.push(format!("duplicate result for declaration: {id}"));
                continue;
            }

            match (item.is_accepted(), item.amice_uuid) {
                (true, Some(amice_uuid)) => declaration.complete(amice_uuid),
                (true, None) => declaration.fail([MISSING_REFERENCE]),
                (false, _) => declaration.fail(item_errors(item)),
            }
            resolved.insert(id);
        }

        for declaration in &mut declarations {
            if !resolved.contains(&declaration.id) && !declaration.status.is_terminal() {
                declaration.fail(["no result returned by registry"]);
            }
        }

        for id in &session.declaration_ids {
            if !declarations.iter().any(|declaration| declaration.id == *id) {
                session_errors.push(format!("declaration not found: {id}"));
            }
        }

        let completed = declarations
            .iter()
            .filter(|declaration| declaration.status == DeclarationStatus::Completed)
            .count();
        let all_completed = completed == session.declaration_ids.len() && session_errors.is_empty();

        session.errors.extend(session_errors);
        if all_completed {
            session.status = SessionStatus::Completed;
        } else {
            session.fail(format!(
                "{completed} of {} declarations completed",
                session.declaration_ids.len()
            ));
        }

        self.sessions.save_with_declarations(&session, &declarations)?;

        info!(
            session_id = %session.id,
            completed,
            total = session.declaration_ids.len(),
            status = ?session.status,
            "session resolved"
        );

        if all_completed {
            Ok(ResolveOutcome::Completed)
        } else {
            Ok(ResolveOutcome::Failed(session.errors))
        }
    }
}
