//! Recommendation pipeline: input validation, feature lookup, elasticity prediction, price grid
//! optimization, business policy enforcement and output validation.
//!
//! Per-row stages return `Result<T, StageFailure>`. A row that fails a stage keeps its failure
//! and skips every later per-row stage; batch-wide passes may still demote a successful row.

pub mod config;
pub mod features;
pub mod optimizer;
pub mod orchestrator;
pub mod output;
pub mod policy;
pub mod predictor;

pub use orchestrator::MarkdownPipeline;

use crate::domain::recommendation::ReasonCode;
use std::fmt;

/// Row-level failure: the reason code reported to the caller plus the remark explaining it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub code: ReasonCode,
    pub remark: String,
}

impl StageFailure {
    pub fn new(code: ReasonCode, remark: impl Into<String>) -> Self {
        Self {
            code,
            remark: remark.into(),
        }
    }

    pub fn from_remarks(code: ReasonCode, remarks: &[String]) -> Self {
        Self::new(code, remarks.join("; "))
    }

    pub fn unexpected(remark: impl Into<String>) -> Self {
        Self::new(ReasonCode::UnexpectedError, remark)
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.remark)
    }
}

impl std::error::Error for StageFailure {}
