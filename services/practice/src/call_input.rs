//! Keyboard control of a running call.

use rehearse_core::{CallController, CallOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallCommand {
    /// Enter or `q`: end the call and save it.
    End,
    /// `x`: discard the call, after confirmation.
    Discard,
    Unknown(String),
}

impl CallCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "" | "q" => CallCommand::End,
            "x" => CallCommand::Discard,
            other => CallCommand::Unknown(other.to_string()),
        }
    }
}

/// Ends and saves the call on its own task. The caller keeps reading input, so a
/// discard can still cancel the save while the backend is slow.
pub fn spawn_end_call(controller: &Arc<CallController>) -> JoinHandle<Option<CallOutcome>> {
    let controller = controller.clone();
    tokio::spawn(async move {
        match controller.end_call().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("cannot end call: {}", e);
                None
            }
        }
    })
}
