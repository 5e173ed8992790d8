use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use codex_bridge_backend::{Agent, Thread, ThreadOptions};
use tokio::sync::OnceCell;

use crate::session_store::SessionStore;

/// Where a resolved thread came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOrigin {
    Cached,
    Resumed,
    Started,
}

#[derive(Debug, Clone)]
pub struct ResolvedThread {
    pub thread: Thread,
    pub origin: ThreadOrigin,
}

/// Maps session ids to live backend threads.
///
/// Threads live for the whole process. Persisted bindings from the
/// [`SessionStore`] are resumed lazily on first use.
#[derive(Debug)]
pub struct ThreadRegistry {
    agent: Agent,
    store: Arc<SessionStore>,
    threads: Mutex<HashMap<String, Arc<OnceCell<Thread>>>>,
}

impl ThreadRegistry {
    pub fn new(agent: Agent, store: Arc<SessionStore>) -> Self {
        Self {
            agent,
            store,
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Live thread for `session_id`, resuming or starting one when needed.
    ///
    /// Concurrent callers for the same new session share one thread.
    pub async fn get_or_create(&self, session_id: &str, options: ThreadOptions) -> ResolvedThread {
        let cell = {
            let mut threads = self
                .threads
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            threads
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut origin = ThreadOrigin::Cached;
        let thread = cell
            .get_or_init(|| async {
                let (thread, created) = self.open(session_id, options);
                origin = created;
                thread
            })
            .await
            .clone();
        ResolvedThread { thread, origin }
    }

    /// Thread for a request without a session id. Never cached.
    pub fn start_ephemeral(&self, options: ThreadOptions) -> ResolvedThread {
        ResolvedThread {
            thread: self.agent.start_thread(options),
            origin: ThreadOrigin::Started,
        }
    }

    /// Stores the session's thread id once the backend has assigned one.
    pub async fn persist(&self, session_id: &str, thread: &Thread) {
        if let Some(thread_id) = thread.id() {
            self.store.persist_if_changed(session_id, &thread_id).await;
        }
    }

    /// Replaces a resumed thread the backend refused to run with a fresh
    /// thread using the same options.
    ///
    /// If another request already replaced `rejected`, that replacement is
    /// returned instead so the session keeps a single thread.
    pub fn restart(&self, session_id: &str, rejected: &Thread) -> Thread {
        let mut threads = self
            .threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(current) = threads.get(session_id).and_then(|cell| cell.get()) {
            if !current.same_handle(rejected) {
                return current.clone();
            }
        }
        tracing::warn!(
            session_id,
            thread_id = ?rejected.id(),
            "resumed thread could not run, starting a new one"
        );
        let thread = self.agent.start_thread(rejected.options().clone());
        threads.insert(
            session_id.to_string(),
            Arc::new(OnceCell::new_with(Some(thread.clone()))),
        );
        thread
    }

    fn open(&self, session_id: &str, options: ThreadOptions) -> (Thread, ThreadOrigin) {
        if let Some(thread_id) = self.store.get(session_id) {
            match self.agent.resume_thread(&thread_id, options.clone()) {
                Ok(thread) => {
                    tracing::info!(session_id, thread_id, "resumed persisted thread");
                    return (thread, ThreadOrigin::Resumed);
                }
                Err(err) => {
                    tracing::warn!(
                        session_id,
                        thread_id,
                        error = %err,
                        "failed to resume thread, starting a new one"
                    );
                }
            }
        }
        tracing::debug!(session_id, "starting new thread");
        (self.agent.start_thread(options), ThreadOrigin::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_bridge_backend::MockConfig;

    fn registry(config: MockConfig, store: SessionStore) -> Arc<ThreadRegistry> {
        Arc::new(ThreadRegistry::new(Agent::mock(config), Arc::new(store)))
    }

    #[tokio::test]
    async fn same_session_gets_same_handle() {
        let registry = registry(MockConfig::default(), SessionStore::in_memory());
        let first = registry.get_or_create("alice", ThreadOptions::default()).await;
        let second = registry.get_or_create("alice", ThreadOptions::default()).await;
        assert_eq!(first.origin, ThreadOrigin::Started);
        assert_eq!(second.origin, ThreadOrigin::Cached);
        assert!(first.thread.same_handle(&second.thread));

        let other = registry.get_or_create("bob", ThreadOptions::default()).await;
        assert!(!other.thread.same_handle(&first.thread));
    }

    #[tokio::test]
    async fn concurrent_first_requests_share_one_thread() {
        let registry = registry(MockConfig::default(), SessionStore::in_memory());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .get_or_create("race", ThreadOptions::default())
                        .await
                        .thread
                })
            })
            .collect();
        let mut threads = Vec::new();
        for task in tasks {
            threads.push(task.await.unwrap());
        }
        assert!(threads.iter().all(|thread| thread.same_handle(&threads[0])));
        let backend = registry.agent().mock_backend().unwrap();
        assert_eq!(backend.threads_started(), 1);
    }

    #[tokio::test]
    async fn persisted_binding_is_resumed() {
        let store = SessionStore::in_memory();
        store.persist_if_changed("alice", "thread-from-disk").await;
        let registry = registry(MockConfig::default(), store);

        let resolved = registry.get_or_create("alice", ThreadOptions::default()).await;
        assert_eq!(resolved.origin, ThreadOrigin::Resumed);
        assert_eq!(resolved.thread.id().as_deref(), Some("thread-from-disk"));
    }

    #[tokio::test]
    async fn rejected_resume_starts_fresh_thread() {
        let store = SessionStore::in_memory();
        store.persist_if_changed("alice", "stale").await;
        let registry = registry(
            MockConfig {
                reject_resume: true,
                ..MockConfig::default()
            },
            store,
        );

        let resolved = registry.get_or_create("alice", ThreadOptions::default()).await;
        assert_eq!(resolved.origin, ThreadOrigin::Started);
        assert_eq!(resolved.thread.id(), None);
    }

    #[tokio::test]
    async fn restart_replaces_rejected_thread_once() {
        let store = SessionStore::in_memory();
        store.persist_if_changed("alice", "forgotten").await;
        let registry = registry(MockConfig::default(), store);

        let resumed = registry.get_or_create("alice", ThreadOptions::default()).await;
        assert_eq!(resumed.origin, ThreadOrigin::Resumed);

        let fresh = registry.restart("alice", &resumed.thread);
        assert!(!fresh.same_handle(&resumed.thread));
        assert_eq!(fresh.id(), None);

        // A second caller holding the stale handle gets the same replacement.
        let again = registry.restart("alice", &resumed.thread);
        assert!(again.same_handle(&fresh));

        let cached = registry.get_or_create("alice", ThreadOptions::default()).await;
        assert_eq!(cached.origin, ThreadOrigin::Cached);
        assert!(cached.thread.same_handle(&fresh));
        let backend = registry.agent().mock_backend().unwrap();
        assert_eq!(backend.threads_started(), 1);
    }

    #[tokio::test]
    async fn ephemeral_threads_are_not_cached() {
        let registry = registry(MockConfig::default(), SessionStore::in_memory());
        let first = registry.start_ephemeral(ThreadOptions::default());
        let second = registry.start_ephemeral(ThreadOptions::default());
        assert!(!first.thread.same_handle(&second.thread));
        assert!(registry.store().is_empty());
    }
}
