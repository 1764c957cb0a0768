use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};

use crate::{
    connection::{Connection, ConnectionSlot},
    error::RegistryError,
    pipeline::{OutputFormat, PipelineFactory},
    session::{Session, SessionStatus},
};

/// How long Stop/replace waits for a session's execution unit to emit its
/// terminal event before aborting it.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

struct Entry {
    session: Arc<Session>,
    task: JoinHandle<()>,
}

/// Owns every live session, at most one per id.
pub struct Registry {
    sessions: RwLock<HashMap<String, Entry>>,
    /// Last stopped session per id, kept for status queries until the id is
    /// played again.
    retired: RwLock<HashMap<String, Arc<Session>>>,
    /// Serializes `start_playback` so a replacement never overlaps another
    /// start for the same id. The session table is not held while waiting.
    starting: Mutex<()>,
    connection: ConnectionSlot,
    factory: Arc<dyn PipelineFactory>,
}

impl Registry {
    pub fn new(connection: ConnectionSlot, factory: Arc<dyn PipelineFactory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            retired: RwLock::new(HashMap::new()),
            starting: Mutex::new(()),
            connection,
            factory,
        }
    }

    /// Start (or replace) the session for `id`. The previous session under
    /// `id`, if any, is fully stopped before the new one is created. Returns
    /// once the new session is registered; playback runs in its own task.
    pub async fn start_playback(&self, id: &str, url: &str, format: OutputFormat) -> Arc<Session> {
        let _starting = self.starting.lock().await;

        let old = self.sessions.write().await.remove(id);
        if let Some(old) = old {
            log::info!("Registry: replacing session {}", id);
            retire(old).await;
        }

        let mut sessions = self.sessions.write().await;
        // only starts insert, and they are serialized, so `id` is still free
        self.retired.write().await.remove(id);

        let (session, signals) = Session::new(id, url, format, self.factory.as_ref());
        let task = tokio::spawn(Arc::clone(&session).run(signals, self.connection.clone()));
        sessions.insert(
            id.to_string(),
            Entry {
                session: Arc::clone(&session),
                task,
            },
        );
        log::info!("Registry: session {} registered for {}", id, url);
        session
    }

    pub async fn stop(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let session = Arc::clone(&entry.session);
        retire(entry).await;
        self.retired.write().await.insert(id.to_string(), session);
        Ok(())
    }

    /// Pausing an already paused or finished session succeeds as a no-op.
    pub async fn pause(&self, id: &str) -> Result<(), RegistryError> {
        let session = self.require(id).await?;
        if !session.pause() {
            log::debug!("Registry: pause {} is a no-op", id);
        }
        Ok(())
    }

    /// Resuming a session that is not paused succeeds as a no-op.
    pub async fn resume(&self, id: &str) -> Result<(), RegistryError> {
        let session = self.require(id).await?;
        if !session.resume() {
            log::debug!("Registry: resume {} is a no-op", id);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.session))
    }

    pub async fn status(&self, id: &str) -> Result<SessionStatus, RegistryError> {
        if let Some(session) = self.get(id).await {
            return Ok(session.status());
        }
        self.retired
            .read()
            .await
            .get(id)
            .map(|s| s.status())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn stop_all(&self) {
        let drained: Vec<(String, Entry)> = self.sessions.write().await.drain().collect();
        for (id, entry) in drained {
            log::info!("Registry: stopping session {}", id);
            retire(entry).await;
        }
    }

    pub async fn set_connection(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.connection.set(conn).await
    }

    pub async fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.get().await
    }

    pub fn connection_slot(&self) -> &ConnectionSlot {
        &self.connection
    }

    async fn require(&self, id: &str) -> Result<Arc<Session>, RegistryError> {
        self.get(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }
}

async fn retire(entry: Entry) {
    let Entry { session, mut task } = entry;
    session.stop();
    if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
        log::warn!(
            "Registry: session {} did not stop within {:?}, aborting",
            session.id(),
            STOP_GRACE
        );
        task.abort();
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod registry_test;
