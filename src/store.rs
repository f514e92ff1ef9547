use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Error, Session};

/// Durable, device-local storage for established sessions.
///
/// Keyed by recipient identifier with at most one session per recipient.
/// Implementations are synchronous and share state across clones (typically
/// via `Arc`), so one store instance can serve concurrent callers. Writes
/// for the same recipient are serialized by the message cipher's
/// recipient-keyed lock; the store itself only needs to make each
/// individual operation atomic.
///
/// Production backends wrap a platform keystore that encrypts at rest;
/// [`MemorySessionStore`] backs tests and short-lived processes.
pub trait SessionStore: Clone + Send + Sync + 'static {
    /// Persists `session` under its recipient id, replacing any previous
    /// session for that recipient.
    fn save(&self, session: &Session) -> Result<(), Error>;

    /// Loads the session for `recipient_id`, or `None` if none exists.
    fn load(&self, recipient_id: &str) -> Result<Option<Session>, Error>;

    /// Removes the session for `recipient_id`. Removing a missing session
    /// is not an error.
    fn delete(&self, recipient_id: &str) -> Result<(), Error>;
}

/// In-memory session store.
///
/// Keeps sessions in their serialized keystore form so the persistence
/// path is exercised even in tests.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> Result<(), Error> {
        let bytes = session.serialize()?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Store("Session store lock poisoned".to_string()))?;
        inner.insert(session.recipient_id().to_string(), bytes);
        Ok(())
    }

    fn load(&self, recipient_id: &str) -> Result<Option<Session>, Error> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| Error::Store("Session store lock poisoned".to_string()))?;
        inner
            .get(recipient_id)
            .map(|bytes| Session::deserialize(bytes))
            .transpose()
    }

    fn delete(&self, recipient_id: &str) -> Result<(), Error> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::Store("Session store lock poisoned".to_string()))?;
        inner.remove(recipient_id);
        Ok(())
    }
}
