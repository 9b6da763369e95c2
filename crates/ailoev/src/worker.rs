//! Pilot/worker split.
//!
//! The worker task owns the [`Page`] and executes [`Command`]s sent through a
//! [`WorkerHandle`], answering each on its own oneshot channel. Events the
//! worker notices on its own (credentials typed in the login form) are
//! pushed on a bounded channel the pilot drains between steps.

use std::fmt;

use tokio::sync::{mpsc, oneshot};

use crate::page::{Page, PageError};
use crate::site;
use crate::types::Credentials;

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 8;

#[derive(Clone)]
pub enum Command {
    Goto(String),
    Location,
    Exists(String),
    Count(String),
    Text(String),
    Attr { selector: String, name: String },
    AttrAll { selector: String, name: String },
    Value(String),
    Fill { selector: String, value: String },
    Click(String),
    Submit(String),
    OuterHtml(String),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Goto(_) => "goto",
            Command::Location => "location",
            Command::Exists(_) => "exists",
            Command::Count(_) => "count",
            Command::Text(_) => "text",
            Command::Attr { .. } => "attr",
            Command::AttrAll { .. } => "attr_all",
            Command::Value(_) => "value",
            Command::Fill { .. } => "fill",
            Command::Click(_) => "click",
            Command::Submit(_) => "submit",
            Command::OuterHtml(_) => "outer_html",
        }
    }
}

// Filled values never reach the logs.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Location => write!(f, "location"),
            Command::Goto(target)
            | Command::Exists(target)
            | Command::Count(target)
            | Command::Text(target)
            | Command::Value(target)
            | Command::Click(target)
            | Command::Submit(target)
            | Command::OuterHtml(target) => write!(f, "{} {}", self.name(), target),
            Command::Attr { selector, name } | Command::AttrAll { selector, name } => {
                write!(f, "{} {}[{}]", self.name(), selector, name)
            }
            Command::Fill { selector, .. } => write!(f, "fill {}", selector),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Flag(bool),
    Count(usize),
    Text(String),
    MaybeText(Option<String>),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    CredentialsCaptured(Credentials),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Page(#[from] PageError),
    #[error("Worker is no longer running")]
    Disconnected,
    #[error("Unexpected reply to {command}: {reply:?}")]
    UnexpectedReply { command: &'static str, reply: Reply },
}

/// Selectors the worker watches to capture typed credentials.
#[derive(Debug, Clone)]
pub struct LoginFields {
    pub form: String,
    pub login: String,
    pub password: String,
}

impl Default for LoginFields {
    fn default() -> Self {
        Self {
            form: site::LOGIN_FORM.to_string(),
            login: site::LOGIN_USERNAME.to_string(),
            password: site::LOGIN_PASSWORD.to_string(),
        }
    }
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<Reply, PageError>>,
}

pub async fn dispatch<P: Page + ?Sized>(page: &mut P, command: Command) -> Result<Reply, PageError> {
    Ok(match command {
        Command::Goto(url) => {
            page.goto(&url).await?;
            Reply::Done
        }
        Command::Location => Reply::Text(page.location().await?),
        Command::Exists(selector) => Reply::Flag(page.exists(&selector).await?),
        Command::Count(selector) => Reply::Count(page.count(&selector).await?),
        Command::Text(selector) => Reply::Text(page.text(&selector).await?),
        Command::Attr { selector, name } => Reply::MaybeText(page.attr(&selector, &name).await?),
        Command::AttrAll { selector, name } => Reply::List(page.attr_all(&selector, &name).await?),
        Command::Value(selector) => Reply::Text(page.value(&selector).await?),
        Command::Fill { selector, value } => {
            page.fill(&selector, &value).await?;
            Reply::Done
        }
        Command::Click(selector) => {
            page.click(&selector).await?;
            Reply::Done
        }
        Command::Submit(selector) => {
            page.submit(&selector).await?;
            Reply::Done
        }
        Command::OuterHtml(selector) => Reply::Text(page.outer_html(&selector).await?),
    })
}

struct Worker<P> {
    page: P,
    login_fields: LoginFields,
    events: mpsc::Sender<WorkerEvent>,
    last_captured: Option<Credentials>,
}

impl<P: Page> Worker<P> {
    async fn run(mut self, mut commands: mpsc::Receiver<Envelope>) {
        while let Some(Envelope { command, reply }) = commands.recv().await {
            log::debug!("worker <- {}", command);

            // Clicks and submits usually leave the login page, so read the
            // form before running them.
            let navigates = matches!(command, Command::Click(_) | Command::Submit(_));
            let fills = matches!(command, Command::Fill { .. });
            if navigates {
                self.capture_credentials().await;
            }

            let result = dispatch(&mut self.page, command).await;
            if fills && result.is_ok() {
                self.capture_credentials().await;
            }

            if reply.send(result).is_err() {
                log::debug!("Pilot dropped the reply channel");
            }
        }
        log::debug!("Worker stopped: no more pilots");
    }

    async fn read_field(&self, selector: &str) -> Option<String> {
        let value = self.page.value(selector).await.ok()?;
        let placeholder = self
            .page
            .attr(selector, "placeholder")
            .await
            .ok()
            .flatten();
        let shown = value.trim();
        if shown.is_empty() || placeholder.as_deref().map(str::trim) == Some(shown) {
            return None;
        }
        Some(value)
    }

    async fn capture_credentials(&mut self) {
        if !self.page.exists(&self.login_fields.form).await.unwrap_or(false) {
            return;
        }
        let Some(login) = self.read_field(&self.login_fields.login).await else {
            return;
        };
        let Some(password) = self.read_field(&self.login_fields.password).await else {
            return;
        };

        let credentials = Credentials::new(login, password);
        if self.last_captured.as_ref() == Some(&credentials) {
            return;
        }
        log::debug!("Captured credentials for {}", credentials.login);
        match self
            .events
            .try_send(WorkerEvent::CredentialsCaptured(credentials.clone()))
        {
            Ok(()) => self.last_captured = Some(credentials),
            Err(e) => log::warn!("Dropped worker event: {}", e),
        }
    }
}

/// Pilot-side receiver of worker events.
#[derive(Debug)]
pub struct WorkerEvents {
    rx: mpsc::Receiver<WorkerEvent>,
}

impl WorkerEvents {
    /// Takes every event queued so far without waiting.
    pub fn drain(&mut self) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[derive(Debug, Clone)]
pub struct WorkerHandle {
    commands: mpsc::Sender<Envelope>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope({})", self.command)
    }
}

/// Starts the worker task on the current runtime.
pub fn spawn<P: Page + 'static>(page: P, login_fields: LoginFields) -> (WorkerHandle, WorkerEvents) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let worker = Worker {
        page,
        login_fields,
        events: event_tx,
        last_captured: None,
    };
    tokio::spawn(worker.run(command_rx));

    (
        WorkerHandle {
            commands: command_tx,
        },
        WorkerEvents { rx: event_rx },
    )
}

impl WorkerHandle {
    pub async fn call(&self, command: Command) -> Result<Reply, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Envelope {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::Disconnected)?;
        Ok(reply_rx.await.map_err(|_| WorkerError::Disconnected)??)
    }

    async fn call_done(&self, command: Command) -> Result<(), WorkerError> {
        let name = command.name();
        match self.call(command).await? {
            Reply::Done => Ok(()),
            reply => Err(WorkerError::UnexpectedReply {
                command: name,
                reply,
            }),
        }
    }

    async fn call_text(&self, command: Command) -> Result<String, WorkerError> {
        let name = command.name();
        match self.call(command).await? {
            Reply::Text(text) => Ok(text),
            reply => Err(WorkerError::UnexpectedReply {
                command: name,
                reply,
            }),
        }
    }

    pub async fn goto(&self, url: &str) -> Result<(), WorkerError> {
        self.call_done(Command::Goto(url.to_string())).await
    }

    pub async fn location(&self) -> Result<String, WorkerError> {
        self.call_text(Command::Location).await
    }

    pub async fn exists(&self, selector: &str) -> Result<bool, WorkerError> {
        match self.call(Command::Exists(selector.to_string())).await? {
            Reply::Flag(found) => Ok(found),
            reply => Err(WorkerError::UnexpectedReply {
                command: "exists",
                reply,
            }),
        }
    }

    pub async fn count(&self, selector: &str) -> Result<usize, WorkerError> {
        match self.call(Command::Count(selector.to_string())).await? {
            Reply::Count(n) => Ok(n),
            reply => Err(WorkerError::UnexpectedReply {
                command: "count",
                reply,
            }),
        }
    }

    pub async fn text(&self, selector: &str) -> Result<String, WorkerError> {
        self.call_text(Command::Text(selector.to_string())).await
    }

    pub async fn attr(&self, selector: &str, name: &str) -> Result<Option<String>, WorkerError> {
        let command = Command::Attr {
            selector: selector.to_string(),
            name: name.to_string(),
        };
        match self.call(command).await? {
            Reply::MaybeText(value) => Ok(value),
            reply => Err(WorkerError::UnexpectedReply {
                command: "attr",
                reply,
            }),
        }
    }

    pub async fn attr_all(&self, selector: &str, name: &str) -> Result<Vec<String>, WorkerError> {
        let command = Command::AttrAll {
            selector: selector.to_string(),
            name: name.to_string(),
        };
        match self.call(command).await? {
            Reply::List(values) => Ok(values),
            reply => Err(WorkerError::UnexpectedReply {
                command: "attr_all",
                reply,
            }),
        }
    }

    pub async fn value(&self, selector: &str) -> Result<String, WorkerError> {
        self.call_text(Command::Value(selector.to_string())).await
    }

    pub async fn fill(&self, selector: &str, value: &str) -> Result<(), WorkerError> {
        self.call_done(Command::Fill {
            selector: selector.to_string(),
            value: value.to_string(),
        })
        .await
    }

    pub async fn click(&self, selector: &str) -> Result<(), WorkerError> {
        self.call_done(Command::Click(selector.to_string())).await
    }

    pub async fn submit(&self, form_selector: &str) -> Result<(), WorkerError> {
        self.call_done(Command::Submit(form_selector.to_string())).await
    }

    pub async fn outer_html(&self, selector: &str) -> Result<String, WorkerError> {
        self.call_text(Command::OuterHtml(selector.to_string())).await
    }
}
