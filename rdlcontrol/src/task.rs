//! Control requests and the per-request completion envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ControlError;

/// Completion of one control request: a variant-typed result or an error,
/// never both.
pub type TaskReply = Result<Value, ControlError>;

/// The control verbs a bus caller can direct at a published renderer path.
///
/// Times are microseconds on this surface and "H:MM:SS" strings on the wire.
/// Serializable so a bus binding can marshal verbs straight into requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskKind {
    GetProp { interface: String, prop: String },
    SetProp { interface: String, prop: String, value: Value },
    GetAllProps { interface: String },
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
    OpenUri { uri: String },
    Seek { offset: i64 },
    SetPosition { position: i64 },
    HostUri { file_path: String },
    RemoveUri { file_path: String },
}

/// One control request as it lands at the façade.
pub struct ControlRequest {
    /// Published object path the request is directed at.
    pub path: String,
    /// Bus-level identity of the caller, used by the hosting verbs.
    pub sender: String,
    pub kind: TaskKind,
    /// Reply slot; the façade sends exactly one [`TaskReply`].
    pub reply: oneshot::Sender<TaskReply>,
    /// Caller-supplied cancellation. Level-triggered and idempotent.
    pub cancel: CancellationToken,
}

impl ControlRequest {
    /// Build a request plus the receiver its completion arrives on.
    pub fn new(
        path: impl Into<String>,
        sender: impl Into<String>,
        kind: TaskKind,
        cancel: CancellationToken,
    ) -> (Self, oneshot::Receiver<TaskReply>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                path: path.into(),
                sender: sender.into(),
                kind,
                reply,
                cancel,
            },
            rx,
        )
    }
}

/// Per-request state needed to complete one asynchronous action.
///
/// Completion consumes the envelope, so the reply slot fires exactly once by
/// construction; there is no flag to forget to check.
pub(crate) struct TaskEnvelope {
    pub path: String,
    pub sender: String,
    pub kind: TaskKind,
    pub cancel: CancellationToken,
    reply: oneshot::Sender<TaskReply>,
}

impl From<ControlRequest> for TaskEnvelope {
    fn from(request: ControlRequest) -> Self {
        Self {
            path: request.path,
            sender: request.sender,
            kind: request.kind,
            cancel: request.cancel,
            reply: request.reply,
        }
    }
}

impl TaskEnvelope {
    pub fn complete(self, reply: TaskReply) {
        if self.reply.send(reply).is_err() {
            debug!("completion for {} dropped, caller went away", self.path);
        }
    }
}

/// What a task worker reports back to the façade loop.
pub(crate) enum TaskOutcome {
    Done {
        value: Value,
        cache: crate::device::CacheUpdate,
    },
    Failed(ControlError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_reaches_the_reply_slot_once() {
        let (request, rx) = ControlRequest::new(
            "/org/renderlink/server/0",
            "test-client",
            TaskKind::Play,
            CancellationToken::new(),
        );

        let envelope = TaskEnvelope::from(request);
        envelope.complete(Ok(Value::Null));

        assert_eq!(rx.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn completion_with_dead_caller_is_harmless() {
        let (request, rx) = ControlRequest::new(
            "/org/renderlink/server/0",
            "test-client",
            TaskKind::Stop,
            CancellationToken::new(),
        );
        drop(rx);

        TaskEnvelope::from(request).complete(Err(ControlError::Cancelled));
    }
}
