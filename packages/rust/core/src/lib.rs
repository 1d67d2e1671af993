//! Processing engine and model-backed services for the research pipeline.
//!
//! The [`ProcessingEngine`] drives one nine-step run over injected
//! collaborators: sources, summarizer, insight extractor, link processor,
//! storage and exporters. Progress is tracked in a [`ProcessingState`] and
//! broadcast to subscribers as [`StateEvent`]s.

pub mod collaborators;
pub mod engine;
pub mod insights;
pub mod llm;
pub mod state;
pub mod summarizer;

pub use collaborators::{
    ContentProvider, Exporter, FallbackProvider, InsightExtractor, LinkProcessor, LinkService,
    ResultStore, Summarizer, UnavailableSources,
};
pub use engine::{
    CancellationFlag, Collaborators, ConfigurationReport, EngineOptions, ProcessingEngine,
    RunResults, SourceCheck, TOTAL_STEPS, WeeklyDecision,
};
pub use insights::LlmInsightExtractor;
pub use llm::LlmClient;
pub use state::{
    EventKind, LogEntry, LogLevel, ProcessingState, RunStatus, StateEvent, StateSnapshot,
};
pub use summarizer::LlmSummarizer;
