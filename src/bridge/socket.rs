use axum::extract::ws::{CloseFrame, Message};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum SocketError {
    #[error("socket closed")]
    Closed,
    #[error("outbound buffer full")]
    Full,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub(crate) struct ClientSocket {
    tx: mpsc::Sender<Message>,
}

impl ClientSocket {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub(crate) fn send_frame<T: Serialize>(&self, frame: &T) -> Result<(), SocketError> {
        let text = serde_json::to_string(frame)?;
        self.push(Message::Text(text.into()))
    }

    pub(crate) fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        // Close reasons are limited to 123 bytes on the wire.
        let reason: String = reason.chars().take(123).collect();
        self.push(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
    }

    fn push(&self, message: Message) -> Result<(), SocketError> {
        self.tx.try_send(message).map_err(|error| match error {
            TrySendError::Full(_) => SocketError::Full,
            TrySendError::Closed(_) => SocketError::Closed,
        })
    }
}
