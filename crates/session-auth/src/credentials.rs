//! Credential store for the signed-in session
//!
//! `Session` owns the access/refresh/CSRF credentials of one user. It is
//! created at application start, handed to the client as `Arc<Session>`, and
//! written only by login, a successful refresh, and session termination.
//!
//! In cookie mode the access and refresh tokens live in HTTP-only cookies the
//! transport manages; they are never held here or written to disk. Only the
//! CSRF token, which the server deliberately exposes to client code, is kept.
//!
//! Every successful `store()` bumps a generation counter. Requests record the
//! generation they were stamped with so a 401 caused by credentials that have
//! already been replaced can be replayed instead of triggering a new refresh.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// How authorization material reaches the server. Fixed at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// `Authorization: Bearer <access token>` on every call
    #[default]
    Bearer,
    /// HTTP-only auth cookies plus an echoed `x-csrf-token` header
    Cookie,
}

impl AuthMode {
    pub fn label(&self) -> &'static str {
        match self {
            AuthMode::Bearer => "bearer",
            AuthMode::Cookie => "cookie",
        }
    }
}

/// Tokens obtained from login or refresh.
///
/// `refresh` is optional because the server may or may not rotate it; a
/// missing value keeps the currently stored refresh token.
#[derive(Debug, Clone, Default)]
pub struct Tokens {
    pub access: Option<Secret<String>>,
    pub refresh: Option<Secret<String>>,
}

impl Tokens {
    pub fn new(access: impl Into<String>, refresh: Option<String>) -> Self {
        Self {
            access: Some(Secret::new(access.into())),
            refresh: refresh.map(Secret::new),
        }
    }
}

/// Point-in-time copy of the session, used to stamp requests.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub mode: AuthMode,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub csrf_token: Option<String>,
    pub generation: u64,
}

impl Credentials {
    pub fn anonymous(mode: AuthMode) -> Self {
        Self {
            mode,
            access_token: None,
            refresh_token: None,
            csrf_token: None,
            generation: 0,
        }
    }

    /// Whether there is anything to authenticate with.
    ///
    /// Cookie mode cannot see its auth cookies, so the CSRF token stands in.
    pub fn is_authenticated(&self) -> bool {
        match self.mode {
            AuthMode::Bearer => self.access_token.is_some(),
            AuthMode::Cookie => self.csrf_token.is_some(),
        }
    }
}

#[derive(Debug, Default)]
struct CredentialSet {
    access_token: Option<Secret<String>>,
    refresh_token: Option<Secret<String>>,
    csrf_token: Option<String>,
}

/// On-disk shape of the credential file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCredentials {
    mode: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    csrf_token: Option<String>,
}

pub struct Session {
    mode: AuthMode,
    path: Option<PathBuf>,
    state: RwLock<CredentialSet>,
    generation: AtomicU64,
}

impl Session {
    /// In-memory session, signed out.
    pub fn new(mode: AuthMode) -> Self {
        Self {
            mode,
            path: None,
            state: RwLock::new(CredentialSet::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Session persisted to a JSON file.
    ///
    /// A missing file is created empty (signed out). A file written under the
    /// other auth mode is ignored rather than trusted.
    pub async fn load(mode: AuthMode, path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let persisted: PersistedCredentials = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;

            if persisted.mode != mode {
                warn!(
                    path = %path.display(),
                    stored = persisted.mode.label(),
                    configured = mode.label(),
                    "credential file was written for another auth mode, starting signed out"
                );
                CredentialSet::default()
            } else {
                info!(path = %path.display(), mode = mode.label(), "loaded credentials");
                from_persisted(mode, persisted)
            }
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            let empty = PersistedCredentials {
                mode,
                ..Default::default()
            };
            write_atomic(&path, &empty).await?;
            CredentialSet::default()
        };

        Ok(Self {
            mode,
            path: Some(path),
            state: RwLock::new(state),
            generation: AtomicU64::new(0),
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Number of successful `store()` calls so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> Credentials {
        let state = self.state.read().await;
        Credentials {
            mode: self.mode,
            access_token: state.access_token.clone(),
            refresh_token: state.refresh_token.clone(),
            csrf_token: state.csrf_token.clone(),
            generation: self.generation(),
        }
    }

    pub async fn refresh_token(&self) -> Option<Secret<String>> {
        self.state.read().await.refresh_token.clone()
    }

    pub async fn csrf_token(&self) -> Option<String> {
        self.state.read().await.csrf_token.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.snapshot().await.is_authenticated()
    }

    /// Replace credentials after login or refresh. Returns the new generation.
    ///
    /// The in-memory update always happens; an error only means persisting it
    /// to disk failed.
    pub async fn store(&self, tokens: Tokens) -> Result<u64> {
        let mut state = self.state.write().await;
        match self.mode {
            AuthMode::Bearer => {
                if let Some(access) = tokens.access {
                    state.access_token = Some(access);
                }
                if let Some(refresh) = tokens.refresh {
                    state.refresh_token = Some(refresh);
                }
            }
            AuthMode::Cookie => {
                if tokens.access.is_some() || tokens.refresh.is_some() {
                    debug!("cookie mode: auth tokens stay in HTTP-only cookies");
                }
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, mode = self.mode.label(), "stored credentials");
        self.persist(&state).await?;
        Ok(generation)
    }

    /// Record the CSRF token echoed from the server's readable cookie.
    /// No-op in bearer mode.
    pub async fn set_csrf_token(&self, token: String) -> Result<()> {
        if self.mode != AuthMode::Cookie {
            return Ok(());
        }
        let mut state = self.state.write().await;
        if state.csrf_token.as_deref() == Some(token.as_str()) {
            return Ok(());
        }
        state.csrf_token = Some(token);
        debug!("csrf token updated");
        self.persist(&state).await
    }

    /// Drop every credential (logout or unrecoverable auth failure).
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        *state = CredentialSet::default();
        info!(mode = self.mode.label(), "session cleared");
        self.persist(&state).await
    }

    async fn persist(&self, state: &CredentialSet) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = match self.mode {
            AuthMode::Bearer => PersistedCredentials {
                mode: self.mode,
                access_token: state.access_token.as_ref().map(|s| s.expose().clone()),
                refresh_token: state.refresh_token.as_ref().map(|s| s.expose().clone()),
                csrf_token: None,
            },
            AuthMode::Cookie => PersistedCredentials {
                mode: self.mode,
                access_token: None,
                refresh_token: None,
                csrf_token: state.csrf_token.clone(),
            },
        };
        write_atomic(path, &persisted).await
    }
}

fn from_persisted(mode: AuthMode, persisted: PersistedCredentials) -> CredentialSet {
    match mode {
        AuthMode::Bearer => CredentialSet {
            access_token: persisted.access_token.map(Secret::new),
            refresh_token: persisted.refresh_token.map(Secret::new),
            csrf_token: None,
        },
        AuthMode::Cookie => {
            if persisted.access_token.is_some() || persisted.refresh_token.is_some() {
                warn!("ignoring auth tokens found in cookie-mode credential file");
            }
            CredentialSet {
                access_token: None,
                refresh_token: None,
                csrf_token: persisted.csrf_token,
            }
        }
    }
}

/// Write the credential file via temp file + rename, mode 0600.
async fn write_atomic(path: &Path, data: &PersistedCredentials) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => return Err(Error::Io("credential path has no parent directory".into())),
    };
    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, &json)
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("replacing credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
