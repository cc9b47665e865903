pub mod aggregator;
pub mod feature_extractor;
pub mod llm_service;
pub mod persistence;
pub mod prompt_catalog;
pub mod reply_parser;
pub mod retry;
pub mod scoring_client;

pub use aggregator::{aggregate, aggregate_with, AuditSummary};
pub use feature_extractor::{BrowserSnapshotSource, FeatureExtractor, SnapshotSource};
pub use llm_service::{ChatMessage, ChatRole, CompletionBackend, CompletionRequest, LlmService};
pub use persistence::{open_store, FileJobStore, JobStore, MemoryJobStore};
pub use prompt_catalog::PromptCatalog;
pub use retry::RetryPolicy;
pub use scoring_client::{ScoringClient, ScoringSettings};
