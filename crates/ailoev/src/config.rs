use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::poll::PollOptions;
use crate::types::{Credentials, Document};

pub const DEFAULT_BASE_URL: &str = "https://www.service.eau.veolia.fr";

/// Decides when the CAPTCHA widget has produced a usable solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CaptchaHeuristic {
    /// The solution field holds at least this many characters.
    MinLength(usize),
    /// The solution field is non-empty and does not start with this marker.
    /// The widget writes placeholders such as `.UNSTARTED` or `.FETCHING`
    /// while it works.
    NotPrefixed(String),
}

impl CaptchaHeuristic {
    pub fn is_solved(&self, solution: &str) -> bool {
        let solution = solution.trim();
        match self {
            CaptchaHeuristic::MinLength(min) => solution.chars().count() >= *min,
            CaptchaHeuristic::NotPrefixed(marker) => {
                !solution.is_empty() && !solution.starts_with(marker.as_str())
            }
        }
    }
}

impl Default for CaptchaHeuristic {
    fn default() -> Self {
        CaptchaHeuristic::MinLength(100)
    }
}

/// Identity key used to skip documents already saved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// The portal reference, tagged `-F` for bills and `-C` for notices.
    #[default]
    VendorRef,
    Filename,
}

impl DedupKey {
    pub fn key_of(&self, document: &Document) -> String {
        match self {
            DedupKey::VendorRef => document
                .vendor_ref
                .clone()
                .unwrap_or_else(|| document.filename.clone()),
            DedupKey::Filename => document.filename.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KonnectorConfig {
    pub base_url: String,
    /// Page transitions, CAPTCHA completion and table growth.
    pub poll: PollOptions,
    /// How long the user gets to log in by hand.
    pub interactive: PollOptions,
    pub captcha: CaptchaHeuristic,
    pub dedup_key: DedupKey,
    /// Keep a session found on the home page instead of logging out first.
    pub reuse_session: bool,
    /// Save credentials typed into the login form.
    pub remember_credentials: bool,
    /// Fetch the PDFs in addition to writing the manifests.
    pub download: bool,
}

impl Default for KonnectorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll: PollOptions::default(),
            interactive: PollOptions::new(Duration::from_secs(1), Duration::from_secs(300)),
            captcha: CaptchaHeuristic::default(),
            dedup_key: DedupKey::default(),
            reuse_session: false,
            remember_credentials: false,
            download: false,
        }
    }
}

impl KonnectorConfig {
    pub fn validate(self) -> Result<Self, String> {
        Url::parse(&self.base_url)
            .map_err(|e| format!("Invalid base URL ({}): {e}", self.base_url))?;
        for (label, options) in [("poll", &self.poll), ("interactive", &self.interactive)] {
            if options.interval.is_zero() {
                return Err(format!("{label} interval must be greater than 0"));
            }
            if options.interval > options.timeout {
                return Err(format!(
                    "{label} interval ({:?}) cannot exceed its timeout ({:?})",
                    options.interval, options.timeout
                ));
            }
        }
        if self.captcha == CaptchaHeuristic::MinLength(0) {
            return Err("CAPTCHA minimum length must be greater than 0".to_string());
        }
        if let CaptchaHeuristic::NotPrefixed(marker) = &self.captcha
            && marker.is_empty()
        {
            return Err("CAPTCHA placeholder marker cannot be empty".to_string());
        }
        Ok(self)
    }
}

/// Account fields supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fields {
    pub login: Option<String>,
    pub password: Option<String>,
    pub folder_path: Option<PathBuf>,
}

impl Fields {
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) if !login.is_empty() && !password.is_empty() => {
                Some(Credentials::new(login.clone(), password.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Local development file, `{"fields": {...}, "konnector": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    pub fields: Fields,
    pub konnector: KonnectorConfig,
}

impl DevConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}
