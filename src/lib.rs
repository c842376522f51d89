// src/lib.rs
// Public library surface for integration tests (and the host application).

pub mod chunker;
pub mod completion;
pub mod config;
pub mod dedup;
pub mod enrich;
pub mod fact;
pub mod flights;
pub mod grouping;
pub mod import_data;
pub mod jobs;
pub mod normalize;
pub mod orchestrator;
pub mod resolve;

// Stage 1 extraction pipeline (prompts, parse boundary, post-processing)
pub mod extract;

// ---- Re-exports for stable public API ----
pub use crate::completion::{build_completion_client, CompletionClient, DynCompletionClient};
pub use crate::fact::{
    ExtractedFact, FactResolution, FactStatus, FactType, FactValue, ImportFact, ResolutionState,
    Section, Source, SourceScope,
};
pub use crate::import_data::{ConfidenceEntry, ConfidenceMap, ImportData};
pub use crate::jobs::{
    should_process_in_background, ImportJobRecord, ImportWorker, InMemoryJobStore, JobStatus,
    JobStore,
};
pub use crate::orchestrator::run_import;
