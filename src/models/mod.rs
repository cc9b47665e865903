pub mod analysis_type;
pub mod category;
pub mod job;
pub mod prompt;
pub mod report;
pub mod snapshot;

pub use analysis_type::AnalysisType;
pub use category::{Category, CategoryResult, CategoryStatus, Issue, Severity};
pub use job::{AnalysisJob, JobFailure, JobId, JobStatus};
pub use prompt::{CategoryPrompt, PromptTemplate};
pub use report::{AuditReport, ScoreBreakdown, ScoreColor};
pub use snapshot::{Heading, LoadTiming, PageSnapshot};
