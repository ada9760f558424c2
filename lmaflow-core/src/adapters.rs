//! Bundle of the adapters one deployment of the pipeline runs on.

use std::sync::Arc;

use crate::ports::{
    AmiceRegistry, DeclarationStore, JobStore, SessionStore, WasteStreams, WeightTicketLines,
};

/// Collection of ports implementing the pipeline's collaborators.
pub struct PipelineAdapters {
    /// Weight tickets of the administration application.
    pub lines: Arc<dyn WeightTicketLines>,
    /// Registered waste streams.
    pub waste_streams: Arc<dyn WasteStreams>,
    /// Declaration storage.
    pub declarations: Arc<dyn DeclarationStore>,
    /// Session storage.
    pub sessions: Arc<dyn SessionStore>,
    /// Job storage.
    pub jobs: Arc<dyn JobStore>,
    /// The national waste registry.
    pub registry: Arc<dyn AmiceRegistry>,
}

impl PipelineAdapters {
    /// Use one store for every storage port.
    #[must_use]
    pub fn from_store<S>(store: &Arc<S>, registry: Arc<dyn AmiceRegistry>) -> Self
    where
        S: WeightTicketLines + WasteStreams + DeclarationStore + SessionStore + JobStore + 'static,
    {
        Self {
            lines: Arc::<S>::clone(store),
            waste_streams: Arc::<S>::clone(store),
            declarations: Arc::<S>::clone(store),
            sessions: Arc::<S>::clone(store),
            jobs: Arc::<S>::clone(store),
            registry,
        }
    }
}
