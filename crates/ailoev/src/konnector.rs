use std::fmt;
use std::sync::Arc;

use reqwest::cookie::Jar;
use reqwest::{Client, Url};

use crate::auth::{Authenticator, Host, LoginMethod, Session, ensure_supported_account};
use crate::config::KonnectorConfig;
use crate::extract::Extractor;
use crate::navigator::Navigator;
use crate::normalize::Harvest;
use crate::page::{HtmlPage, Page, PageError, ReqwestTransport, session_client};
use crate::parser::ParseError;
use crate::poll::Timeout;
use crate::sink::{SaveOptions, Sink, SinkError};
use crate::types::{ContractPath, Credentials, Identity};
use crate::worker::{self, LoginFields, WorkerError, WorkerEvent, WorkerEvents, WorkerHandle};

#[derive(Debug, thiserror::Error)]
pub enum KonnectorError {
    #[error("Account {0} belongs to a regional portal and cannot log in here")]
    UnsupportedAccount(String),
    #[error("Login failed: {0}")]
    LoginFailed(String),
    #[error(transparent)]
    Timeout(#[from] Timeout),
    #[error("Page error: {0}")]
    Worker(#[from] WorkerError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Save failed: {0}")]
    Sink(#[from] SinkError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<PageError> for KonnectorError {
    fn from(e: PageError) -> Self {
        KonnectorError::Worker(WorkerError::Page(e))
    }
}

impl KonnectorError {
    /// Stable reason reported as the run's outcome.
    pub fn code(&self) -> &'static str {
        match self {
            KonnectorError::UnsupportedAccount(_) => "USER_ACTION_NEEDED.ACCOUNT_UNSUPPORTED",
            KonnectorError::LoginFailed(_) => "LOGIN_FAILED",
            KonnectorError::Timeout(_) => "VENDOR_DOWN.TIMEOUT",
            KonnectorError::Worker(WorkerError::Page(PageError::Http(_) | PageError::NotFound(_))) => {
                "VENDOR_DOWN"
            }
            KonnectorError::Worker(WorkerError::Disconnected | WorkerError::UnexpectedReply { .. }) => {
                "UNKNOWN_ERROR"
            }
            KonnectorError::Worker(WorkerError::Page(_)) | KonnectorError::Parse(_) => {
                "UNKNOWN_ERROR.PAGE_CHANGED"
            }
            KonnectorError::Sink(_) => "SAVE_FAILED",
            KonnectorError::Config(_) => "CONFIG_INVALID",
        }
    }
}

/// Outcome of a successful [`Konnector::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub method: LoginMethod,
    pub contracts: usize,
    pub bills: usize,
    pub files: usize,
    pub new_bills: usize,
    pub new_files: usize,
    pub identity: String,
    pub credentials_saved: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nRun summary:")?;
        writeln!(f, "  Login:      {}", self.method)?;
        writeln!(f, "  Account:    {}", self.identity)?;
        writeln!(f, "  Contracts:  {}", self.contracts)?;
        writeln!(f, "  Bills:      {} ({} new)", self.bills, self.new_bills)?;
        writeln!(f, "  Documents:  {} ({} new)", self.files, self.new_files)?;
        write!(
            f,
            "  Credentials saved: {}",
            if self.credentials_saved { "yes" } else { "no" }
        )
    }
}

/// Pilot side of a run: sequences login, navigation, extraction and saving
/// while the worker task drives the page.
pub struct Konnector {
    worker: WorkerHandle,
    events: WorkerEvents,
    config: KonnectorConfig,
    base_url: Url,
    host: Option<Box<dyn Host>>,
    captured: Option<Credentials>,
    jar: Option<Arc<Jar>>,
}

impl Konnector {
    pub fn new<P: Page + 'static>(page: P, config: KonnectorConfig) -> Result<Self, KonnectorError> {
        let config = config.validate().map_err(KonnectorError::Config)?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| KonnectorError::Config(format!("{}: {e}", config.base_url)))?;
        let (worker, events) = worker::spawn(page, LoginFields::default());

        Ok(Self {
            worker,
            events,
            config,
            base_url,
            host: None,
            captured: None,
            jar: None,
        })
    }

    /// Drives the portal over HTTP with a fresh cookie jar.
    pub fn over_http(config: KonnectorConfig) -> Result<Self, KonnectorError> {
        let jar = Arc::new(Jar::default());
        let transport = ReqwestTransport::new(Arc::clone(&jar))?;
        let page = HtmlPage::new(transport, &config.base_url)?;
        let mut konnector = Self::new(page, config)?;
        konnector.jar = Some(jar);
        Ok(konnector)
    }

    /// Client sharing the portal session cookies, for downloading documents.
    /// `None` when the page is not driven over HTTP.
    pub fn session_client(&self) -> Result<Option<Client>, KonnectorError> {
        self.jar
            .as_ref()
            .map(|jar| session_client(Arc::clone(jar)))
            .transpose()
            .map_err(KonnectorError::from)
    }

    pub fn with_host(mut self, host: Box<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    /// Handle for hosts that need to drive the page themselves.
    pub fn worker(&self) -> WorkerHandle {
        self.worker.clone()
    }

    pub fn config(&self) -> &KonnectorConfig {
        &self.config
    }

    /// Credentials the user typed into the login form during this run.
    pub fn captured_credentials(&self) -> Option<&Credentials> {
        self.captured.as_ref()
    }

    fn collect_events(&mut self) -> Result<(), KonnectorError> {
        for event in self.events.drain() {
            match event {
                WorkerEvent::CredentialsCaptured(credentials) => {
                    ensure_supported_account(&credentials.login)?;
                    log::debug!("Worker captured credentials for {}", credentials.login);
                    self.captured = Some(credentials);
                }
            }
        }
        Ok(())
    }

    pub async fn login(&mut self, credentials: Option<&Credentials>) -> Result<Session, KonnectorError> {
        if let Some(credentials) = credentials {
            ensure_supported_account(&credentials.login)?;
        }
        let session = Authenticator::new(&self.worker, &self.config, self.host.as_deref())
            .authenticate(credentials)
            .await?;
        self.collect_events()?;
        Ok(session)
    }

    /// Bills and other documents of every contract on the account.
    pub async fn documents(&self, session: &Session) -> Result<(Vec<ContractPath>, Harvest), KonnectorError> {
        let navigator = Navigator::new(&self.worker, &self.config, session);
        let extractor = Extractor::new(&self.worker, &self.config, self.base_url.clone(), session);

        navigator.open_bills().await?;
        let contracts = navigator.contracts().await?;

        if contracts.is_empty() {
            let contract = extractor.current_contract().await?;
            log::info!("Single contract account ({})", contract.id);
            let harvest = extractor.listing(&contract).await?;
            return Ok((vec![contract], harvest));
        }

        let mut harvest = Harvest::default();
        for contract in &contracts {
            navigator.open_contract(contract).await?;
            harvest.extend(extractor.listing(contract).await?);
        }
        Ok((contracts, harvest))
    }

    pub async fn identity(&self, session: &Session) -> Result<Identity, KonnectorError> {
        Extractor::new(&self.worker, &self.config, self.base_url.clone(), session)
            .identity()
            .await
    }

    /// Full run. Each step consumes what the previous one returned; the
    /// saves start together once everything has been collected.
    pub async fn run(&mut self, credentials: Option<&Credentials>, sink: &dyn Sink) -> Result<RunReport, KonnectorError> {
        let session = self.login(credentials).await?;
        let (contracts, harvest) = self.documents(&session).await?;
        let identity = self.identity(&session).await?;
        self.collect_events()?;

        let remembered = self
            .config
            .remember_credentials
            .then(|| self.captured.clone())
            .flatten();
        let options = SaveOptions::water_invoice(self.config.dedup_key);

        let (new_bills, new_files, (), ()) = futures::try_join!(
            sink.save_bills(&harvest.bills, &options),
            sink.save_files(&harvest.files, &options),
            sink.save_identity(&identity),
            async {
                match &remembered {
                    Some(credentials) => sink.save_credentials(credentials).await,
                    None => Ok(()),
                }
            },
        )?;

        Ok(RunReport {
            method: session.method(),
            contracts: contracts.len(),
            bills: harvest.bills.len(),
            files: harvest.files.len(),
            new_bills,
            new_files,
            identity: identity.name.full_name,
            credentials_saved: remembered.is_some(),
        })
    }
}
