//! Session management for Telegram client
//!
//! Provides:
//! - File-based session locking so only one collector talks to Telegram
//! - Session file validation
//! - Client creation, interactive sign-in and logout

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use grammers_client::{Client, SignInError};
use grammers_mtsender::{SenderPool, SenderPoolHandle};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Session lock guard that ensures exclusive access to the Telegram session.
pub struct SessionLock {
    path: PathBuf,
    lock_file: Option<File>,
}

impl SessionLock {
    /// Acquire an exclusive lock next to the configured session.
    pub fn acquire(config: &Config) -> Result<Self> {
        Self::acquire_at(config.lock_file())
    }

    pub fn acquire_at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::LockError(format!("Failed to open lock file: {}", e)))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                lock_file: Some(lock_file),
            }),
            Err(_) => {
                warn!(
                    "Session lock {} is held by another process, wait for it to finish",
                    path.display()
                );
                Err(Error::SessionLocked)
            }
        }
    }

    /// Release the lock manually
    pub fn release(&mut self) {
        if let Some(ref file) = self.lock_file {
            let _ = file.unlock();
        }
        if self.lock_file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Check if the session file exists.
pub fn check_session_exists(session_file: &Path) -> Result<()> {
    if !session_file.exists() {
        warn!(
            "Session file '{}' not found, run `member_collector init-session` first",
            session_file.display()
        );
        return Err(Error::SessionNotFound(session_file.display().to_string()));
    }
    Ok(())
}

/// Open (or create) the SQLite session file.
pub fn open_session(session_file: &Path) -> Result<Arc<SqliteSession>> {
    let session = SqliteSession::open(session_file)
        .map_err(|e| Error::SessionNotFound(format!("Failed to open session: {}", e)))?;
    Ok(Arc::new(session))
}

/// Holder for SenderPool components and Client
pub struct TelegramClient {
    pub client: Client,
    pub handle: SenderPoolHandle,
    _runner_handle: tokio::task::JoinHandle<()>,
}

impl TelegramClient {
    pub async fn connect(session: Arc<SqliteSession>, api_id: i32) -> Result<Self> {
        let pool = SenderPool::new(session, api_id);

        // Create client from pool (need reference to whole pool)
        let client = Client::new(&pool);

        let SenderPool { runner, handle, .. } = pool;

        let runner_handle = tokio::spawn(async move {
            runner.run().await;
        });

        Ok(Self {
            client,
            handle,
            _runner_handle: runner_handle,
        })
    }
}

impl std::ops::Deref for TelegramClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Connect with an existing, authorized session.
pub async fn connect(config: &Config) -> Result<TelegramClient> {
    config.validate_telegram()?;
    let session_file = config.session_file();
    check_session_exists(&session_file)?;
    let session = open_session(&session_file)?;
    let client = TelegramClient::connect(session, config.api_id).await?;

    if !client.is_authorized().await? {
        return Err(Error::SessionNotFound(format!(
            "{} is not signed in",
            session_file.display()
        )));
    }
    Ok(client)
}

/// Connect without requiring a session file (first sign-in).
pub async fn connect_for_init(config: &Config) -> Result<TelegramClient> {
    config.validate_telegram()?;
    let session = open_session(&config.session_file())?;
    TelegramClient::connect(session, config.api_id).await
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Interactive sign-in with code and optional 2FA password.
pub async fn sign_in_interactive(client: &Client, config: &Config) -> Result<()> {
    if client.is_authorized().await? {
        info!("Session is already authorized");
        return Ok(());
    }

    let phone = if config.phone.is_empty() {
        prompt("Phone number (international format): ")?
    } else {
        config.phone.clone()
    };

    let token = client
        .request_login_code(&phone, &config.api_hash)
        .await
        .map_err(|e| Error::from_invocation(&e))?;
    let code = prompt("Code from Telegram: ")?;

    match client.sign_in(&token, &code).await {
        Ok(_) => {}
        Err(SignInError::PasswordRequired(password_token)) => {
            let password = prompt("2FA password: ")?;
            client
                .check_password(password_token, password)
                .await
                .map_err(|e| Error::Unknown(format!("Password check failed: {}", e)))?;
        }
        Err(e) => return Err(Error::Unknown(format!("Sign in failed: {}", e))),
    }

    info!("Signed in, session stored in {}", config.session_file().display());
    Ok(())
}

/// Terminate the authorization on Telegram and delete the local session file.
pub async fn logout(config: &Config) -> Result<()> {
    let session_file = config.session_file();
    if session_file.exists() {
        match connect(config).await {
            Ok(client) => {
                if let Err(e) = client.invoke(&tl::functions::auth::LogOut {}).await {
                    warn!("Remote logout failed: {}", e);
                }
            }
            Err(e) => warn!("Could not connect for logout: {}", e),
        }
    }
    remove_session_file(&session_file)
}

/// Delete a session file; a missing file is not an error.
pub fn remove_session_file(session_file: &Path) -> Result<()> {
    match std::fs::remove_file(session_file) {
        Ok(()) => {
            info!("Removed session file {}", session_file.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
