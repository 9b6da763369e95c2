//! Where a run's results go.
//!
//! [`FolderSink`] keeps one JSON manifest per record kind in the target
//! folder and, when given an HTTP client, downloads each new PDF next to it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::config::DedupKey;
use crate::types::{Credentials, Document, Identity};

pub const BILLS_MANIFEST: &str = "bills.json";
pub const FILES_MANIFEST: &str = "files.json";
pub const IDENTITY_FILE: &str = "identity.json";
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed manifest {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Download of {url} failed: {source}")]
    Download { url: String, source: reqwest::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    pub content_type: String,
    pub qualification: String,
    pub dedup_key: DedupKey,
}

impl SaveOptions {
    pub fn water_invoice(dedup_key: DedupKey) -> Self {
        Self {
            content_type: "application/pdf".to_string(),
            qualification: "water_invoice".to_string(),
            dedup_key,
        }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Returns how many documents were new.
    async fn save_bills(&self, bills: &[Document], options: &SaveOptions) -> Result<usize, SinkError>;
    /// Returns how many documents were new.
    async fn save_files(&self, files: &[Document], options: &SaveOptions) -> Result<usize, SinkError>;
    async fn save_identity(&self, identity: &Identity) -> Result<(), SinkError>;
    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub document: Document,
    pub content_type: String,
    pub qualification: String,
}

#[derive(Debug, Clone)]
pub struct FolderSink {
    folder: PathBuf,
    client: Option<Client>,
}

impl FolderSink {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            client: None,
        }
    }

    /// Downloads each new document with `client`, which should share the
    /// portal session's cookie jar.
    pub fn with_downloads(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    async fn ensure_folder(&self) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|source| SinkError::Io {
                path: self.folder.clone(),
                source,
            })
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, SinkError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SinkError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| SinkError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), SinkError> {
        let json = serde_json::to_string_pretty(value).map_err(|source| SinkError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| SinkError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn download(&self, client: &Client, document: &Document) -> Result<(), SinkError> {
        let failed = |source| SinkError::Download {
            url: document.file_url.clone(),
            source,
        };
        let bytes = client
            .get(&document.file_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?
            .bytes()
            .await
            .map_err(failed)?;

        let path = self.folder.join(&document.filename);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| SinkError::Io { path, source })?;
        log::debug!("Saved {} ({} bytes)", document.filename, bytes.len());
        Ok(())
    }

    async fn save_documents(
        &self,
        manifest: &str,
        documents: &[Document],
        options: &SaveOptions,
    ) -> Result<usize, SinkError> {
        self.ensure_folder().await?;
        let path = self.folder.join(manifest);
        let mut entries: Vec<ManifestEntry> = self.read_json(&path).await?.unwrap_or_default();

        let mut seen: HashSet<String> = entries
            .iter()
            .map(|e| options.dedup_key.key_of(&e.document))
            .collect();

        let mut added = 0;
        for document in documents {
            if !seen.insert(options.dedup_key.key_of(document)) {
                log::debug!("Skipping already saved {}", document.filename);
                continue;
            }
            if let Some(client) = &self.client {
                self.download(client, document).await?;
            }
            entries.push(ManifestEntry {
                document: document.clone(),
                content_type: options.content_type.clone(),
                qualification: options.qualification.clone(),
            });
            added += 1;
        }

        self.write_json(&path, &entries).await?;
        log::info!(
            "{}: {} new, {} total",
            path.display(),
            added,
            entries.len()
        );
        Ok(added)
    }
}

#[async_trait]
impl Sink for FolderSink {
    async fn save_bills(&self, bills: &[Document], options: &SaveOptions) -> Result<usize, SinkError> {
        self.save_documents(BILLS_MANIFEST, bills, options).await
    }

    async fn save_files(&self, files: &[Document], options: &SaveOptions) -> Result<usize, SinkError> {
        self.save_documents(FILES_MANIFEST, files, options).await
    }

    async fn save_identity(&self, identity: &Identity) -> Result<(), SinkError> {
        self.ensure_folder().await?;
        self.write_json(&self.folder.join(IDENTITY_FILE), identity).await
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), SinkError> {
        self.ensure_folder().await?;
        self.write_json(&self.folder.join(CREDENTIALS_FILE), credentials)
            .await
    }
}
