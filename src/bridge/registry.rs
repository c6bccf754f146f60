use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::socket::ClientSocket;

#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub(crate) id: String,
    pub(crate) user_id: u64,
    #[allow(dead_code)]
    pub(crate) credential: String,
    pub(crate) socket: ClientSocket,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegistryStats {
    pub(crate) connection_count: usize,
}

pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    session_ttl: TimeDelta,
}

impl SessionRegistry {
    pub(crate) fn new(session_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            session_ttl: TimeDelta::from_std(session_ttl).unwrap_or_else(|_| TimeDelta::days(365)),
        }
    }

    pub(crate) fn register(
        &self,
        socket: ClientSocket,
        user_id: u64,
        credential: impl Into<String>,
    ) -> String {
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(self.session_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let id = Uuid::new_v4().to_string();

        let session = Session {
            id: id.clone(),
            user_id,
            credential: credential.into(),
            socket,
            created_at,
            expires_at,
        };
        self.sessions.lock().insert(id.clone(), session);
        id
    }

    pub(crate) fn has(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub(crate) fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub(crate) fn unregister(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().remove(session_id)
    }

    pub(crate) fn expired(&self, now: DateTime<Utc>) -> Vec<String> {
        self.sessions
            .lock()
            .values()
            .filter(|session| session.expires_at <= now)
            .map(|session| session.id.clone())
            .collect()
    }

    pub(crate) fn stats(&self) -> RegistryStats {
        RegistryStats {
            connection_count: self.sessions.lock().len(),
        }
    }
}
