use std::path::PathBuf;
use std::process;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use tokio::io::{AsyncBufReadExt, BufReader};

use ailoev::auth::Host;
use ailoev::config::{CaptchaHeuristic, DedupKey, DevConfig};
use ailoev::site;
use ailoev::types::{Credentials, DocumentClass};
use ailoev::utils::{DocumentFilter, DocumentStats};
use ailoev::worker::WorkerHandle;
use ailoev::{FolderSink, Konnector, KonnectorConfig, KonnectorError};

#[derive(Parser)]
#[command(name = "ailoev")]
#[command(about = "Fetch bills and notices from the Veolia Eau customer portal", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        short = 'c',
        long = "config",
        env = "AILOEV_CONFIG",
        global = true,
        value_name = "FILE",
        help = "JSON file with account fields and connector settings"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DedupArg {
    VendorRef,
    Filename,
}

impl From<DedupArg> for DedupKey {
    fn from(arg: DedupArg) -> Self {
        match arg {
            DedupArg::VendorRef => DedupKey::VendorRef,
            DedupArg::Filename => DedupKey::Filename,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Bill,
    File,
}

impl From<KindArg> for DocumentClass {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Bill => DocumentClass::Bill,
            KindArg::File => DocumentClass::File,
        }
    }
}

#[derive(Args, Debug)]
struct AuthArgs {
    #[arg(long, env = "AILOEV_LOGIN", help = "Portal login (e-mail address)")]
    login: Option<String>,

    #[arg(
        long,
        env = "AILOEV_PASSWORD",
        hide_env_values = true,
        help = "Portal password"
    )]
    password: Option<String>,

    #[arg(long, help = "Keep an existing portal session instead of logging out")]
    reuse_session: bool,

    #[arg(long, help = "Prompt for credentials when automatic login is not possible")]
    interactive: bool,

    #[arg(
        long,
        value_name = "CHARS",
        conflicts_with = "captcha_placeholder",
        help = "Treat the CAPTCHA as solved once its solution has this many characters"
    )]
    captcha_min_length: Option<usize>,

    #[arg(
        long,
        value_name = "PREFIX",
        help = "Treat the CAPTCHA as solved once its solution no longer starts with PREFIX"
    )]
    captcha_placeholder: Option<String>,

    #[arg(long, value_name = "URL", help = "Portal base URL")]
    base_url: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Upper bound for each page wait"
    )]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, collect every contract's documents and the account identity, then save them
    Run {
        #[command(flatten)]
        auth: AuthArgs,

        #[arg(long, env = "AILOEV_FOLDER", value_name = "DIR", help = "Destination folder")]
        folder: Option<PathBuf>,

        #[arg(long, value_enum, help = "Key used to skip already saved documents")]
        dedup_key: Option<DedupArg>,

        #[arg(long, help = "Save credentials typed during interactive login")]
        remember_credentials: bool,

        #[arg(long, help = "Download the PDFs, not only their metadata")]
        download: bool,
    },
    /// Check that the account can log in
    Login {
        #[command(flatten)]
        auth: AuthArgs,
    },
    /// List bills and notices without saving anything
    Documents {
        #[command(flatten)]
        auth: AuthArgs,

        #[arg(
            long,
            help = "Maximum number of results to return",
            value_parser = clap::value_parser!(u16).range(1..)
        )]
        limit: Option<u16>,

        #[arg(
            long,
            help = "Number of results to skip from the newest"
        )]
        offset: Option<u16>,

        #[arg(
            long,
            value_name = "YYYY-MM-DD",
            help = "Only documents from this date onwards",
            value_parser = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| e.to_string()),
        )]
        start_date: Option<NaiveDate>,

        #[arg(
            long,
            value_name = "YYYY-MM-DD",
            help = "Only documents up to this date",
            value_parser = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| e.to_string()),
        )]
        end_date: Option<NaiveDate>,

        #[arg(long, value_enum, help = "Only bills or only other documents")]
        kind: Option<KindArg>,

        #[arg(long, value_name = "ID", help = "Only documents of this contract")]
        contract: Option<String>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Show the account holder's identity
    Identity {
        #[command(flatten)]
        auth: AuthArgs,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

/// Asks for credentials on the terminal and types them into the portal's
/// login form.
struct TerminalHost {
    worker: WorkerHandle,
}

#[async_trait]
impl Host for TerminalHost {
    async fn show_login(&self) -> Result<(), KonnectorError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let unreadable = |e: std::io::Error| KonnectorError::LoginFailed(e.to_string());

        eprint!("Veolia login: ");
        let login = lines.next_line().await.map_err(unreadable)?.unwrap_or_default();
        eprint!("Password: ");
        let password = lines.next_line().await.map_err(unreadable)?.unwrap_or_default();

        self.worker.fill(site::LOGIN_USERNAME, login.trim()).await?;
        // `next_line` already drops the line ending; spaces belong to the password.
        self.worker.fill(site::LOGIN_PASSWORD, &password).await?;
        self.worker.submit(site::LOGIN_FORM).await?;
        Ok(())
    }

    async fn is_authenticated(&self) -> Result<bool, KonnectorError> {
        Ok(self.worker.exists(site::LOGGED_IN_MARKER).await?)
    }

    async fn hide_login(&self) {
        log::debug!("Interactive login finished");
    }
}

fn fail(context: &str, e: KonnectorError) -> ! {
    log::error!("{}: {} [{}]", context, e, e.code());
    process::exit(1);
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

/// Dev config first, then command line flags and environment on top.
fn settings(dev: &DevConfig, auth: &AuthArgs) -> (KonnectorConfig, Option<Credentials>) {
    let mut config = dev.konnector.clone();
    if let Some(base_url) = &auth.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(seconds) = auth.timeout {
        config.poll.timeout = Duration::from_secs(seconds);
    }
    if let Some(min) = auth.captcha_min_length {
        config.captcha = CaptchaHeuristic::MinLength(min);
    }
    if let Some(prefix) = &auth.captcha_placeholder {
        config.captcha = CaptchaHeuristic::NotPrefixed(prefix.clone());
    }
    config.reuse_session |= auth.reuse_session;

    let mut fields = dev.fields.clone();
    if auth.login.is_some() {
        fields.login = auth.login.clone();
    }
    if auth.password.is_some() {
        fields.password = auth.password.clone();
    }
    (config, fields.credentials())
}

fn connect(config: KonnectorConfig, interactive: bool) -> Konnector {
    let konnector = Konnector::over_http(config).unwrap_or_else(|e| fail("Invalid settings", e));
    if interactive {
        let host = TerminalHost {
            worker: konnector.worker(),
        };
        konnector.with_host(Box::new(host))
    } else {
        konnector
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let dev = match &cli.config {
        Some(path) => DevConfig::from_file(path).unwrap_or_else(|e| {
            log::error!("Error loading config: {}", e);
            process::exit(1);
        }),
        None => DevConfig::default(),
    };

    match cli.command {
        Commands::Run {
            auth,
            folder,
            dedup_key,
            remember_credentials,
            download,
        } => {
            let (mut config, credentials) = settings(&dev, &auth);
            if let Some(key) = dedup_key {
                config.dedup_key = key.into();
            }
            config.remember_credentials |= remember_credentials;
            config.download |= download;

            let Some(folder) = folder.or_else(|| dev.fields.folder_path.clone()) else {
                log::error!("Invalid args: a destination folder is required (--folder or folderPath)");
                process::exit(1);
            };

            let download = config.download;
            let mut konnector = connect(config, auth.interactive);
            let mut sink = FolderSink::new(&folder);
            if download {
                match konnector.session_client() {
                    Ok(Some(client)) => sink = sink.with_downloads(client),
                    Ok(None) => log::warn!("Downloads need an HTTP session, saving metadata only"),
                    Err(e) => fail("Error creating download client", e),
                }
            }

            log::info!("Saving into {}...", folder.display());
            let report = konnector
                .run(credentials.as_ref(), &sink)
                .await
                .unwrap_or_else(|e| fail("Run failed", e));
            println!("{}", report);
        }

        Commands::Login { auth } => {
            let (config, credentials) = settings(&dev, &auth);
            let mut konnector = connect(config, auth.interactive);
            let session = konnector
                .login(credentials.as_ref())
                .await
                .unwrap_or_else(|e| fail("Login failed", e));
            println!("Logged in with {}.", session.method());
        }

        Commands::Documents {
            auth,
            limit,
            offset,
            start_date,
            end_date,
            kind,
            contract,
            format,
        } => {
            let filter = DocumentFilter {
                start_date,
                end_date,
                class: kind.map(Into::into),
                contract,
                limit: limit.map(usize::from),
                offset: offset.map(usize::from),
            };
            let filter = filter.validate().unwrap_or_else(|e| {
                log::error!("Invalid args: {e}");
                process::exit(1);
            });

            let (config, credentials) = settings(&dev, &auth);
            let mut konnector = connect(config, auth.interactive);
            let session = konnector
                .login(credentials.as_ref())
                .await
                .unwrap_or_else(|e| fail("Login failed", e));

            log::info!("Fetching documents...");
            let (_, harvest) = konnector
                .documents(&session)
                .await
                .unwrap_or_else(|e| fail("Error fetching documents", e));

            let mut documents = harvest.bills;
            documents.extend(harvest.files);
            let documents = filter.apply(documents);

            match format {
                OutputFormat::Json => serialize_json(&documents),
                OutputFormat::Text => {
                    if documents.is_empty() {
                        println!("No documents to display.");
                    } else {
                        for (i, document) in documents.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, document);
                        }
                        print!("{}", DocumentStats::from_documents(&documents));
                    }
                }
            }
        }

        Commands::Identity { auth, format } => {
            let (config, credentials) = settings(&dev, &auth);
            let mut konnector = connect(config, auth.interactive);
            let session = konnector
                .login(credentials.as_ref())
                .await
                .unwrap_or_else(|e| fail("Login failed", e));

            let identity = konnector
                .identity(&session)
                .await
                .unwrap_or_else(|e| fail("Error fetching identity", e));

            match format {
                OutputFormat::Json => serialize_json(&identity),
                OutputFormat::Text => println!("{}", identity),
            }
        }
    }
}
