use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    sessions: BTreeMap<String, String>,
}

/// Session id to backend thread id bindings, mirrored to a JSON file.
#[derive(Debug)]
pub struct SessionStore {
    path: Option<PathBuf>,
    sessions: RwLock<BTreeMap<String, String>>,
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            sessions: RwLock::new(BTreeMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Loads bindings from `path`. A missing or unreadable file yields an
    /// empty store that will write to `path`.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sessions = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<PersistedState>(&raw) {
                Ok(state) => state.sessions,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable session state");
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read session state");
                BTreeMap::new()
            }
        };
        tracing::debug!(path = %path.display(), sessions = sessions.len(), "loaded session state");
        Self {
            path: Some(path),
            sessions: RwLock::new(sessions),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, session_id: &str) -> Option<String> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records a binding and writes the file when it changed.
    ///
    /// Returns whether the binding changed. Write failures are logged, never
    /// returned.
    pub async fn persist_if_changed(&self, session_id: &str, thread_id: &str) -> bool {
        {
            let mut sessions = self
                .sessions
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if sessions.get(session_id).map(String::as_str) == Some(thread_id) {
                return false;
            }
            sessions.insert(session_id.to_string(), thread_id.to_string());
        }

        if let Some(path) = &self.path {
            let _write = self.write_lock.lock().await;
            let snapshot = PersistedState {
                sessions: self
                    .sessions
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone(),
            };
            match write_snapshot(path, &snapshot).await {
                Ok(()) => tracing::debug!(session_id, thread_id, "persisted session binding"),
                Err(err) => tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "failed to persist thread ids"
                ),
            }
        }
        true
    }
}

async fn write_snapshot(path: &Path, state: &PersistedState) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_string_pretty(state).map_err(io::Error::other)?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);
    tokio::fs::write(&temp, payload).await?;
    tokio::fs::rename(&temp, path).await
}
