//! Batch orchestration engine for UltraVision.
//!
//! Discovery and planning, resume filtering, bounded-concurrency dispatch
//! with retry and ordered fan-in, and the output/failure writers.

pub mod dispatcher;
pub mod failure;
pub mod planner;
pub mod reorder;
pub mod resume;
pub mod retry;
pub mod run;
pub mod writer;

pub use dispatcher::{BatchSource, DispatchStats, RetryingDispatcher};
pub use failure::{FailureRecord, FailureSink, DEFAULT_FAILURE_LOG};
pub use planner::{discover_candidates, failed_candidates, BatchPlanner, PatternSet, PlanStats, DEFAULT_PATTERNS};
pub use reorder::ReorderBuffer;
pub use resume::ResumeIndex;
pub use retry::{RetryPolicy, RetryState};
pub use run::{BatchRun, InputSource, RunOptions, RunSummary};
pub use writer::{default_output_path, OutputRecord, ResultWriter};
