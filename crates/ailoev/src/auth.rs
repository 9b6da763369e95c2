//! Session detection and login.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::config::KonnectorConfig;
use crate::konnector::KonnectorError;
use crate::poll::{poll_until, wait_for};
use crate::site;
use crate::types::Credentials;
use crate::worker::WorkerHandle;

/// Regional portal account numbers: exactly seven digits.
static REGIONAL_ACCOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{7}$").expect("Invalid regex"));

/// Rejects logins that belong to the regional portal before any network use.
pub fn ensure_supported_account(login: &str) -> Result<(), KonnectorError> {
    if REGIONAL_ACCOUNT.is_match(login.trim()) {
        log::error!("Login {} looks like a regional portal account", login);
        return Err(KonnectorError::UnsupportedAccount(login.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedIn,
    LoginForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    Reused,
    Credentials,
    Interactive,
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginMethod::Reused => write!(f, "existing session"),
            LoginMethod::Credentials => write!(f, "stored credentials"),
            LoginMethod::Interactive => write!(f, "interactive login"),
        }
    }
}

/// Proof of an authenticated portal session. Only [`Authenticator`] makes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    method: LoginMethod,
}

impl Session {
    pub fn method(&self) -> LoginMethod {
        self.method
    }

    #[cfg(test)]
    pub(crate) fn assumed() -> Self {
        Session {
            method: LoginMethod::Reused,
        }
    }
}

/// Host-provided login UI for when automatic login is not possible.
#[async_trait]
pub trait Host: Send + Sync {
    async fn show_login(&self) -> Result<(), KonnectorError>;
    async fn is_authenticated(&self) -> Result<bool, KonnectorError>;
    async fn hide_login(&self);
}

pub struct Authenticator<'a> {
    worker: &'a WorkerHandle,
    config: &'a KonnectorConfig,
    host: Option<&'a dyn Host>,
}

impl<'a> Authenticator<'a> {
    pub fn new(worker: &'a WorkerHandle, config: &'a KonnectorConfig, host: Option<&'a dyn Host>) -> Self {
        Self {
            worker,
            config,
            host,
        }
    }

    pub async fn authenticate(&self, credentials: Option<&Credentials>) -> Result<Session, KonnectorError> {
        self.worker
            .goto(&site::url(&self.config.base_url, site::HOME_PATH))
            .await?;

        if self.detect_session().await? == SessionState::LoggedIn {
            if self.config.reuse_session {
                log::info!("Reusing existing portal session");
                return Ok(Session {
                    method: LoginMethod::Reused,
                });
            }
            self.logout().await?;
        }

        if let Some(credentials) = credentials {
            match self.auto_login(credentials).await {
                Ok(()) => {
                    log::info!("Logged in as {}", credentials.login);
                    return Ok(Session {
                        method: LoginMethod::Credentials,
                    });
                }
                Err(KonnectorError::LoginFailed(reason)) if self.host.is_some() => {
                    log::warn!("Automatic login rejected ({}), asking the user", reason);
                }
                Err(e) => return Err(e),
            }
        }

        self.interactive_login().await
    }

    /// Waits until the home page shows either the logged-in marker or the
    /// login form.
    pub async fn detect_session(&self) -> Result<SessionState, KonnectorError> {
        let worker = self.worker;
        let state = poll_until("login form or session", &self.config.poll, || async move {
            if worker.exists(site::LOGGED_IN_MARKER).await? {
                return Ok::<_, KonnectorError>(Some(SessionState::LoggedIn));
            }
            if worker.exists(site::LOGIN_FORM).await? {
                return Ok(Some(SessionState::LoginForm));
            }
            Ok(None)
        })
        .await?;
        log::debug!("Session state: {:?}", state);
        Ok(state)
    }

    pub async fn logout(&self) -> Result<(), KonnectorError> {
        log::info!("Found a previous session, logging out");
        self.worker.click(site::DISCONNECT).await?;
        let worker = self.worker;
        wait_for("login form after logout", &self.config.poll, || async move {
            Ok::<_, KonnectorError>(worker.exists(site::LOGIN_FORM).await?)
        })
        .await
    }

    pub async fn auto_login(&self, credentials: &Credentials) -> Result<(), KonnectorError> {
        let worker = self.worker;
        worker.fill(site::LOGIN_USERNAME, &credentials.login).await?;
        worker.fill(site::LOGIN_PASSWORD, &credentials.password).await?;

        if worker.exists(site::CAPTCHA_SOLUTION).await? {
            self.solve_captcha().await?;
        }

        worker.submit(site::LOGIN_FORM).await?;

        let accepted = poll_until("login outcome", &self.config.poll, || async move {
            if worker.exists(site::LOGGED_IN_MARKER).await? {
                return Ok::<_, KonnectorError>(Some(true));
            }
            if worker.exists(site::LOGIN_ERROR).await? {
                return Ok(Some(false));
            }
            Ok(None)
        })
        .await?;

        if accepted {
            return Ok(());
        }
        let reason = worker.text(site::LOGIN_ERROR).await?;
        log::error!("Portal rejected the login: {}", reason);
        Err(KonnectorError::LoginFailed(reason))
    }

    async fn solve_captcha(&self) -> Result<(), KonnectorError> {
        let worker = self.worker;
        if worker.exists(site::CAPTCHA_TRIGGER).await? {
            log::debug!("Starting CAPTCHA widget");
            worker.click(site::CAPTCHA_TRIGGER).await?;
        }
        let heuristic = &self.config.captcha;
        wait_for("CAPTCHA completion", &self.config.poll, || async move {
            let solution = worker.value(site::CAPTCHA_SOLUTION).await?;
            Ok::<_, KonnectorError>(heuristic.is_solved(&solution))
        })
        .await
    }

    async fn interactive_login(&self) -> Result<Session, KonnectorError> {
        let Some(host) = self.host else {
            return Err(KonnectorError::LoginFailed(
                "no credentials and no interactive login available".to_string(),
            ));
        };

        log::info!("Waiting for the user to log in");
        host.show_login().await?;
        let outcome = wait_for("interactive login", &self.config.interactive, || {
            host.is_authenticated()
        })
        .await;
        host.hide_login().await;
        outcome?;

        Ok(Session {
            method: LoginMethod::Interactive,
        })
    }
}
