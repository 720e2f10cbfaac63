//! CLI commands implementation

pub mod ask;
pub mod create;
pub mod init;
pub mod status;

pub use ask::*;
pub use create::*;
pub use init::*;
pub use status::*;

use crate::error::{Error, ErrorKind};

/// What the CLI prints for a failed command.
///
/// Only the safe [`ErrorReport`](crate::error::ErrorReport) is rendered; with
/// `json` it becomes `{"error": {"kind", "message"}}` for stdout, otherwise a
/// short text for stderr.
pub fn render_error(err: &Error, json: bool) -> String {
    let report = err.to_report();
    if json {
        let body = serde_json::json!({ "error": report });
        return serde_json::to_string_pretty(&body)
            .unwrap_or_else(|_| format!("{{\"error\": {{\"message\": {:?}}}}}", report.message));
    }

    let mut text = format!("Error: {}", report.message);
    if report.kind == ErrorKind::Internal {
        text.push_str("\nRun with --verbose for details.");
    }
    text
}
