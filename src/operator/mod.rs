//! The human operator who supplies one-time codes on request.

mod terminal;

pub use terminal::TerminalOperator;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Operator's answer to a code request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeResponse {
    Code(String),
    Aborted,
}

/// Something that can supply a one-time code or decline to.
///
/// The returned future may be dropped at any point (session closed, timeout);
/// implementations must tolerate that.
#[async_trait]
pub trait CodeSource: Send + Sync {
    /// `attempt` counts code requests on the current session, starting at 1.
    async fn request_code(&self, attempt: usize) -> CodeResponse;
}

/// A pending code request handed to another task, e.g. a UI event loop.
pub struct CodeRequest {
    pub attempt: usize,
    pub response_tx: oneshot::Sender<CodeResponse>,
}

/// Operator that forwards requests over a channel and awaits the reply.
///
/// A closed channel or a dropped responder counts as an abort.
pub struct ChannelOperator {
    request_tx: mpsc::Sender<CodeRequest>,
}

impl ChannelOperator {
    #[must_use]
    pub fn new(request_tx: mpsc::Sender<CodeRequest>) -> Self {
        Self { request_tx }
    }

    /// Operator plus the receiving end for the UI side.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CodeRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl CodeSource for ChannelOperator {
    async fn request_code(&self, attempt: usize) -> CodeResponse {
        let (tx, rx) = oneshot::channel();
        let request = CodeRequest {
            attempt,
            response_tx: tx,
        };

        if self.request_tx.send(request).await.is_err() {
            return CodeResponse::Aborted;
        }

        rx.await.unwrap_or(CodeResponse::Aborted)
    }
}
