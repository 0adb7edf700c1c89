use thiserror::Error;

/// Failures raised by the extraction engine.
///
/// Only [`ExtractError::Auth`] is fatal for a run. Everything else is
/// contained at the page, report job, or entity that produced it.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("token refresh failed: {0}")]
    Auth(String),

    #[error("{operation} failed{}: {message}", http_status(.status))]
    Transport {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("report submission failed: {0}")]
    Submission(String),

    #[error("report generation failed: {0}")]
    ReportGeneration(String),

    #[error("report generation timed out after {0} seconds")]
    ReportTimeout(u64),

    #[error("could not decode report payload: {0}")]
    Decode(String),
}

impl ExtractError {
    pub fn transport(operation: &str, err: reqwest::Error) -> Self {
        ExtractError::Transport {
            operation: operation.to_string(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    pub fn status(operation: &str, status: reqwest::StatusCode, body: String) -> Self {
        ExtractError::Transport {
            operation: operation.to_string(),
            status: Some(status.as_u16()),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        }
    }
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

pub type ExtractResult<T> = std::result::Result<T, ExtractError>;
