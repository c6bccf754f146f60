use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{sync::oneshot, time::timeout};
use tracing::{debug, warn};

use super::{
    error::BridgeError,
    frame::{ResponseFrame, ServerFrame},
    pending::PendingRequestTable,
    registry::SessionRegistry,
};

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CorrelatorStats {
    pub(crate) pending_count: usize,
}

pub(crate) struct RequestCorrelator {
    registry: Arc<SessionRegistry>,
    pending: PendingRequestTable,
    request_timeout: Duration,
}

struct PendingGuard<'a> {
    table: &'a PendingRequestTable,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.table.take(&self.request_id);
    }
}

impl RequestCorrelator {
    pub(crate) fn new(registry: Arc<SessionRegistry>, request_timeout: Duration) -> Self {
        Self {
            registry,
            pending: PendingRequestTable::new(),
            request_timeout,
        }
    }

    pub(crate) async fn send_request(
        &self,
        session_id: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value, BridgeError> {
        self.send_request_with_timeout(session_id, action, payload, self.request_timeout)
            .await
    }

    pub(crate) async fn send_request_with_timeout(
        &self,
        session_id: &str,
        action: &str,
        payload: Value,
        wait: Duration,
    ) -> Result<Value, BridgeError> {
        let Some(session) = self.registry.get(session_id) else {
            return Err(BridgeError::NotConnected);
        };
        if !session.socket.is_open() {
            return Err(BridgeError::Disconnected);
        }

        // Registered before the frame goes out so an immediate response finds it.
        let (request_id, mut rx) = self.arm(session_id, action)?;
        let _guard = PendingGuard {
            table: &self.pending,
            request_id: request_id.clone(),
        };

        let frame = ServerFrame::Request {
            id: request_id.clone(),
            action: action.to_string(),
            payload,
        };
        if let Err(error) = session.socket.send_frame(&frame) {
            let _ = self.pending.take(&request_id);
            warn!(session_id, request_id = %request_id, action, error = %error, "failed to send request frame");
            return Err(error.into());
        }
        debug!(session_id, request_id = %request_id, action, "request sent");

        match timeout(wait, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Disconnected),
            Err(_) => {
                if self.pending.take(&request_id).is_some() {
                    warn!(
                        session_id,
                        request_id = %request_id,
                        action,
                        timeout_ms = wait.as_millis() as u64,
                        "request timed out"
                    );
                    return Err(BridgeError::Timeout(wait));
                }
                // A response claimed the entry as the timer fired; its result is already queued.
                rx.await.unwrap_or(Err(BridgeError::Disconnected))
            }
        }
    }

    // Re-checked after the insert: a teardown may have swept the session in between.
    fn arm(
        &self,
        session_id: &str,
        action: &str,
    ) -> Result<(String, oneshot::Receiver<Result<Value, BridgeError>>), BridgeError> {
        let (request_id, rx) = self.pending.insert(session_id, action);
        if !self.registry.has(session_id) {
            let _ = self.pending.take(&request_id);
            return Err(BridgeError::Disconnected);
        }
        Ok((request_id, rx))
    }

    pub(crate) fn handle_response(&self, session_id: &str, frame: ResponseFrame) -> bool {
        let Some(pending) = self.pending.take_owned_by(&frame.id, session_id) else {
            debug!(request_id = %frame.id, "discarding response for unknown or settled request");
            return false;
        };

        let result = if frame.success {
            Ok(frame.data.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::RemoteFailure(
                frame.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        };

        debug!(
            session_id = %pending.session_id,
            request_id = %frame.id,
            action = %pending.action,
            success = frame.success,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "response received"
        );

        if pending.responder.send(result).is_err() {
            debug!(request_id = %frame.id, "caller stopped waiting before response arrived");
        }
        true
    }

    pub(crate) fn fail_session(&self, session_id: &str) -> usize {
        let drained = self.pending.take_for_session(session_id);
        let count = drained.len();
        for (request_id, pending) in drained {
            debug!(session_id, request_id = %request_id, action = %pending.action, "rejecting request for closed session");
            let _ = pending.responder.send(Err(BridgeError::Disconnected));
        }
        count
    }

    pub(crate) fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            pending_count: self.pending.len(),
        }
    }
}
