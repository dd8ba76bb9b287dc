use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::DocId;

/// Progress notifications emitted by [`crate::batch::BatchRenderer`] while a batch is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    /// Total queued documents, worker count
    Started(usize, usize),
    /// Document rendered, attempts used
    Rendered(DocId, u32),
    /// Document attempt failed and will be retried: attempt, error message
    Retrying(DocId, u32, String),
    /// Document failed for good, last error message
    Failed(DocId, String),
    /// Document abandoned because the batch deadline elapsed
    Skipped(DocId),
    /// succeeded, failed, skipped
    Finished(usize, usize, usize),
}

impl Display for BatchEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchEvent::Started(total, workers) => {
                write!(f, "started: {total} documents on {workers} workers")
            }
            BatchEvent::Rendered(id, attempts) => {
                write!(f, "rendered {id} (attempts: {attempts})")
            }
            BatchEvent::Retrying(id, attempt, msg) => {
                write!(f, "retrying {id} after attempt {attempt}: {msg}")
            }
            BatchEvent::Failed(id, msg) => write!(f, "failed {id}: {msg}"),
            BatchEvent::Skipped(id) => write!(f, "skipped {id}"),
            BatchEvent::Finished(ok, failed, skipped) => write!(
                f,
                "finished: {ok} succeeded, {failed} failed, {skipped} skipped"
            ),
        }
    }
}
