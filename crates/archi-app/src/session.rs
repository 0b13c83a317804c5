use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use archi_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

/// Bearer token for the generation service.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
}

/// Holds the live credential and records every change on disk.
///
/// Each change also bumps a session epoch published on a watch channel, which
/// active pollers use to stop work started under an older credential.
pub struct SessionContext {
    credential: RwLock<Option<Credential>>,
    path: Option<PathBuf>,
    epoch: watch::Sender<u64>,
}

impl SessionContext {
    /// Session that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_state(None, None)
    }

    /// Restore the credential persisted at `path`, if any.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let credential = match load(&path) {
            Ok(credential) => credential,
            Err(e) => {
                warn!("Ignoring unreadable session file {}: {}", path.display(), e);
                None
            }
        };
        if credential.is_some() {
            info!("Restored session from {}", path.display());
        }
        Self::with_state(credential, Some(path))
    }

    fn with_state(credential: Option<Credential>, path: Option<PathBuf>) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            credential: RwLock::new(credential),
            path,
            epoch,
        }
    }

    /// Credential at the time of the call. Never fails.
    pub fn current(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Replace the credential. The in-memory value changes even if the disk
    /// write fails, in which case `Error::Storage` is returned.
    pub fn set_credential(&self, token: impl Into<String>) -> Result<()> {
        let credential = Credential::new(token);
        let persisted = self.persist(Some(&credential));
        self.swap(Some(credential));
        persisted
    }

    /// Forget the credential, on disk as well.
    pub fn clear(&self) -> Result<()> {
        let persisted = self.persist(None);
        self.swap(None);
        persisted
    }

    /// Watch the session epoch; it changes whenever the credential does.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    fn swap(&self, credential: Option<Credential>) {
        *self
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credential;
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    fn persist(&self, credential: Option<&Credential>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let written = match credential {
            Some(credential) => store(path, credential),
            None => remove(path),
        };
        written.map_err(|e| {
            warn!("Failed to persist session to {}: {}", path.display(), e);
            Error::Storage(format!("{}: {}", path.display(), e))
        })
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.is_authenticated())
            .field("path", &self.path)
            .field("epoch", &self.epoch())
            .finish()
    }
}

fn load(path: &Path) -> io::Result<Option<Credential>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let stored: StoredSession = serde_json::from_str(&raw)?;
    Ok(Some(Credential::new(stored.access_token)))
}

fn store(path: &Path, credential: &Credential) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec(&StoredSession {
        access_token: credential.token().to_string(),
    })?;

    // Write then rename so a crash never leaves a half-written file behind.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)
}

fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
