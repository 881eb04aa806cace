use std::fmt;
use thiserror::Error;

/// Step of a request a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Classification,
    Generation,
    Execution,
    Synthesis,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Classification => "classification",
            Phase::Generation => "generation",
            Phase::Execution => "execution",
            Phase::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Failed to classify intent: {0}")]
    Classification(String),

    #[error("Failed to generate SQL query: {0}")]
    Generation(String),

    #[error("Query submission failed: {0}")]
    Submission(String),

    /// Status check or result fetch did not reach the warehouse.
    #[error("Error checking query status: {0}")]
    Poll(String),

    /// The warehouse reported FAILED or ABORTED. Carries its message verbatim.
    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Query execution timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Malformed warehouse payload: {0}")]
    Transform(String),

    #[error("Failed to generate insights: {0}")]
    Synthesis(String),

    #[error("Request cancelled during {0}")]
    Cancelled(Phase),
}

impl QueryError {
    pub fn phase(&self) -> Phase {
        match self {
            QueryError::Classification(_) => Phase::Classification,
            QueryError::Generation(_) => Phase::Generation,
            QueryError::Submission(_)
            | QueryError::Poll(_)
            | QueryError::Execution(_)
            | QueryError::Timeout { .. }
            | QueryError::Transform(_) => Phase::Execution,
            QueryError::Synthesis(_) => Phase::Synthesis,
            QueryError::Cancelled(phase) => *phase,
        }
    }

    /// Failures a caller may reasonably retry as a whole request. Nothing in
    /// the engine retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::Poll(_))
    }
}
