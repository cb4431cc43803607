use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    courier_config::CourierConfig,
    tracing::{debug, warn},
};

use crate::{
    Result,
    lock::{FileLock, LockOptions},
    metadata::SessionEntry,
};

type Entries = BTreeMap<String, SessionEntry>;

/// JSON document mapping session key to [`SessionEntry`], one per agent
/// workspace.
///
/// Every operation takes the sibling lock file for its whole
/// read-modify-write, so several processes can share one store. Writes go
/// to a temp file and are renamed over the target.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: Arc<PathBuf>,
    lock: LockOptions,
}

struct Document {
    entries: Entries,
    corrupt: bool,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: LockOptions::default(),
        }
    }

    /// `<workspace>/sessions/sessions.json`
    pub fn for_workspace(workspace: &Path) -> Self {
        Self::new(workspace.join("sessions").join("sessions.json"))
    }

    #[must_use]
    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch one entry. A missing key or missing file is `None`.
    pub async fn get(&self, key: &str) -> Result<Option<SessionEntry>> {
        let key = key.to_string();
        self.locked(move |path| Ok(read_document(path)?.entries.remove(&key)))
            .await
    }

    /// Insert or replace one entry.
    pub async fn put(&self, key: &str, entry: SessionEntry) -> Result<()> {
        let key = key.to_string();
        self.locked(move |path| {
            let mut doc = read_document(path)?;
            doc.entries.insert(key, entry);
            write_document(path, &doc)
        })
        .await
    }

    /// Read-modify-write one entry under a single lock acquisition.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<SessionEntry>
    where
        F: FnOnce(Option<SessionEntry>) -> SessionEntry + Send + 'static,
    {
        let key = key.to_string();
        self.locked(move |path| {
            let mut doc = read_document(path)?;
            let next = f(doc.entries.remove(&key));
            doc.entries.insert(key, next.clone());
            write_document(path, &doc)?;
            Ok(next)
        })
        .await
    }

    /// All entries, most recently updated first.
    pub async fn list(&self) -> Result<Vec<(String, SessionEntry)>> {
        let mut entries: Vec<_> = self
            .locked(|path| Ok(read_document(path)?.entries))
            .await?
            .into_iter()
            .collect();
        entries.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        Ok(entries)
    }

    /// Delete one entry (manual reset). Returns the removed entry.
    pub async fn remove(&self, key: &str) -> Result<Option<SessionEntry>> {
        let key = key.to_string();
        self.locked(move |path| {
            let mut doc = read_document(path)?;
            let removed = doc.entries.remove(&key);
            if removed.is_some() {
                write_document(path, &doc)?;
            }
            Ok(removed)
        })
        .await
    }

    async fn locked<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let path = Arc::clone(&self.path);
        let options = self.lock.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = FileLock::acquire(&path, &options)?;
            f(&path)
        })
        .await?
    }
}

/// Per-agent stores, each under its agent's workspace.
#[derive(Debug, Clone)]
pub struct SessionStores {
    config: Arc<CourierConfig>,
    lock: LockOptions,
}

impl SessionStores {
    pub fn new(config: Arc<CourierConfig>) -> Self {
        Self {
            config,
            lock: LockOptions::default(),
        }
    }

    #[must_use]
    pub fn with_lock_options(mut self, lock: LockOptions) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn for_agent(&self, agent_id: &str) -> SessionStore {
        SessionStore::for_workspace(&self.config.agent_workspace(agent_id))
            .with_lock_options(self.lock.clone())
    }

    /// Most recently updated entry across every known agent that matches
    /// `filter`, with its agent id and key. Unreadable stores are skipped.
    pub async fn latest_matching<F>(&self, filter: F) -> Option<(String, String, SessionEntry)>
    where
        F: Fn(&SessionEntry) -> bool,
    {
        let mut best: Option<(String, String, SessionEntry)> = None;
        for agent_id in self.config.agent_ids() {
            let entries = match self.for_agent(&agent_id).list().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "failed to read session store");
                    continue;
                },
            };
            if let Some((key, entry)) = entries.into_iter().find(|(_, e)| filter(e))
                && best
                    .as_ref()
                    .is_none_or(|(_, _, b)| entry.updated_at > b.updated_at)
            {
                best = Some((agent_id.clone(), key, entry));
            }
        }
        best
    }
}

fn read_document(path: &Path) -> Result<Document> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(Document {
                entries: Entries::new(),
                corrupt: false,
            });
        },
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Document {
            entries: Entries::new(),
            corrupt: false,
        });
    }
    match serde_json::from_str(&raw) {
        Ok(entries) => Ok(Document {
            entries,
            corrupt: false,
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "session store is corrupt, treating as empty");
            Ok(Document {
                entries: Entries::new(),
                corrupt: true,
            })
        },
    }
}

fn write_document(path: &Path, doc: &Document) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if doc.corrupt {
        let aside = sibling(path, ".corrupt");
        warn!(path = %path.display(), aside = %aside.display(), "moving corrupt session store aside");
        fs::rename(path, &aside)?;
    }

    let data = serde_json::to_string_pretty(&doc.entries)?;
    let tmp = sibling(path, &format!(".tmp-{}", std::process::id()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data.as_bytes())?;
        file.sync_all()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        warn!(tmp = %tmp.display(), path = %path.display(), error = %e, "failed to replace session store");
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    debug!(path = %path.display(), entries = doc.entries.len(), "session store written");
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
