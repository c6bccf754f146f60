use std::{collections::HashMap, time::Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::error::BridgeError;

pub(crate) type Completion = oneshot::Sender<Result<Value, BridgeError>>;

pub(crate) struct PendingRequest {
    pub(crate) session_id: String,
    pub(crate) action: String,
    pub(crate) responder: Completion,
    pub(crate) created_at: Instant,
}

#[derive(Default)]
pub(crate) struct PendingRequestTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingRequestTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &self,
        session_id: &str,
        action: &str,
    ) -> (String, oneshot::Receiver<Result<Value, BridgeError>>) {
        let (responder, rx) = oneshot::channel();
        let request_id = Uuid::new_v4().to_string();
        self.entries.lock().insert(
            request_id.clone(),
            PendingRequest {
                session_id: session_id.to_string(),
                action: action.to_string(),
                responder,
                created_at: Instant::now(),
            },
        );
        (request_id, rx)
    }

    pub(crate) fn take(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.lock().remove(request_id)
    }

    pub(crate) fn take_owned_by(&self, request_id: &str, session_id: &str) -> Option<PendingRequest> {
        let mut entries = self.entries.lock();
        if entries.get(request_id)?.session_id != session_id {
            return None;
        }
        entries.remove(request_id)
    }

    pub(crate) fn take_for_session(&self, session_id: &str) -> Vec<(String, PendingRequest)> {
        let mut entries = self.entries.lock();
        let ids = entries
            .iter()
            .filter(|(_, pending)| pending.session_id == session_id)
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        ids.into_iter()
            .filter_map(|id| entries.remove(&id).map(|pending| (id, pending)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, request_id: &str) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
