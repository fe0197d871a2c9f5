//! Error types for lockstep-sync.

use thiserror::Error;

/// Failures talking to the external package tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The configured argv template is empty.
    #[error("no command configured for {purpose}")]
    EmptyCommand { purpose: &'static str },

    /// The process could not be started at all.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran but exited unsuccessfully.
    #[error("`{program}` exited with status {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The process output could not be decoded.
    #[error("unexpected output from `{program}`: {source}")]
    Output {
        program: String,
        #[source]
        source: serde_json::Error,
    },
}
