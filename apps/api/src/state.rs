use std::sync::Arc;

use crate::credits::CreditLedger;
use crate::extraction::DocumentExtractor;
use crate::generation::GenerationService;
use crate::jobs::Dispatcher;
use crate::notifications::BroadcastHub;
use crate::storage::ArtifactRepository;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub ledger: Arc<dyn CreditLedger>,
    /// Used directly only by the synchronous keyword endpoint; everything else goes through jobs.
    pub generation: GenerationService,
    pub dispatcher: Dispatcher,
    pub hub: Arc<BroadcastHub>,
    pub extractor: DocumentExtractor,
}
