//! Test doubles: a fixture-backed portal, a scripted page and an in-memory sink.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;

use crate::page::{Fetched, Page, PageError, Transport};
use crate::site;
use crate::sink::{SaveOptions, Sink, SinkError};
use crate::types::{Credentials, Document, Identity};

pub const BASE: &str = "https://www.service.eau.veolia.fr";
pub const CONTRACT_A: &str = "871234567";
pub const CONTRACT_B: &str = "877654321";

pub fn fixture(name: &str) -> String {
    fs::read_to_string(format!("fixtures/{}", name)).expect("Failed to read fixture")
}

#[derive(Debug, Default)]
struct PortalState {
    logged_in: bool,
    contract: Option<String>,
    requests: Vec<String>,
}

/// In-process stand-in for the portal, serving the files under `fixtures/`.
#[derive(Debug, Clone)]
pub struct FixturePortal {
    login: String,
    password: String,
    state: Arc<Mutex<PortalState>>,
}

impl FixturePortal {
    pub fn new(login: &str, password: &str) -> Self {
        Self {
            login: login.to_string(),
            password: password.to_string(),
            state: Arc::default(),
        }
    }

    /// Starts with a live session cookie.
    pub fn logged_in(self) -> Self {
        self.state.lock().unwrap().logged_in = true;
        self
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.lock().unwrap().logged_in
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn respond(url: Url, fixture_name: &str) -> Fetched {
        Fetched {
            url,
            body: fixture(fixture_name),
        }
    }

    fn at(path: &str) -> Url {
        Url::parse(BASE).unwrap().join(path).unwrap()
    }

    fn listing(contract: Option<&str>, expanded: bool) -> &'static str {
        match (contract, expanded) {
            (Some(CONTRACT_B), false) => "bills_contract_b.html",
            (Some(CONTRACT_B), true) => "bills_contract_b_all.html",
            _ => "bills_contract_a.html",
        }
    }
}

#[async_trait]
impl Transport for FixturePortal {
    async fn get(&self, url: &Url) -> Result<Fetched, PageError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(format!("GET {}", url));

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let path = url.path();

        if path == "/home.logout.do" {
            state.logged_in = false;
            return Ok(Self::respond(Self::at(site::HOME_PATH), "login.html"));
        }
        if path == "/home/espace-client/telecharger.do" {
            return Ok(Fetched {
                url: url.clone(),
                body: "%PDF-1.4 fixture".to_string(),
            });
        }
        if !state.logged_in {
            return Ok(Self::respond(Self::at(site::HOME_PATH), "login.html"));
        }

        match path {
            site::HOME_PATH => Ok(Self::respond(url.clone(), "dashboard.html")),
            site::BILLS_PATH => {
                let expanded = query.get("voirPlus").map(String::as_str) == Some("true");
                let name = Self::listing(state.contract.as_deref(), expanded);
                Ok(Self::respond(url.clone(), name))
            }
            "/home/espace-client/vos-factures-et-correspondances.setContrat.do" => {
                state.contract = query.get("idContrat").cloned();
                let name = Self::listing(state.contract.as_deref(), false);
                Ok(Self::respond(Self::at(site::BILLS_PATH), name))
            }
            site::PROFILE_PATH => Ok(Self::respond(url.clone(), "profile.html")),
            _ => Err(PageError::NotFound(url.to_string())),
        }
    }

    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<Fetched, PageError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(format!("POST {}", url));

        if url.path() != "/home.loginAction.do" {
            return Err(PageError::NotFound(url.to_string()));
        }

        let fields: HashMap<&str, &str> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let accepted = fields.get("veolia_username") == Some(&self.login.as_str())
            && fields.get("veolia_password") == Some(&self.password.as_str())
            && fields.get("login") == Some(&"OK")
            && fields.get("token").is_some_and(|t| !t.is_empty());

        if accepted {
            state.logged_in = true;
            Ok(Self::respond(Self::at(site::HOME_PATH), "dashboard.html"))
        } else {
            Ok(Self::respond(url.clone(), "login_error.html"))
        }
    }
}

type Effect = Box<dyn Fn(&mut PageState) + Send + Sync>;

/// Mutable view of a [`ScriptedPage`], shared with the test for assertions.
#[derive(Debug, Default)]
pub struct PageState {
    pub location: String,
    pub present: HashSet<String>,
    pub texts: HashMap<String, String>,
    pub html: HashMap<String, String>,
    pub attrs: HashMap<(String, String), Vec<String>>,
    /// Successive values returned by `value`; the last one sticks.
    pub values: HashMap<String, VecDeque<String>>,
    /// Successive row counts returned by `count`; the last one sticks.
    pub counts: HashMap<String, VecDeque<usize>>,
    pub actions: Vec<String>,
}

impl PageState {
    pub fn show(&mut self, selector: &str) {
        self.present.insert(selector.to_string());
    }

    pub fn hide(&mut self, selector: &str) {
        self.present.remove(selector);
    }

    fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Page whose DOM is a handful of scripted answers. Effects registered with
/// [`ScriptedPage::on`] run when the matching selector is clicked or
/// submitted, or the matching URL is visited.
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
    effects: HashMap<String, Effect>,
}

impl Default for ScriptedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            effects: HashMap::new(),
        }
    }

    pub fn state(&self) -> Arc<Mutex<PageState>> {
        Arc::clone(&self.state)
    }

    fn edit(self, f: impl FnOnce(&mut PageState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn at(self, location: &str) -> Self {
        self.edit(|s| s.location = location.to_string())
    }

    pub fn with(self, selector: &str) -> Self {
        self.edit(|s| s.show(selector))
    }

    pub fn with_text(self, selector: &str, text: &str) -> Self {
        self.edit(|s| {
            s.show(selector);
            s.texts.insert(selector.to_string(), text.to_string());
        })
    }

    pub fn with_html(self, selector: &str, html: &str) -> Self {
        self.edit(|s| {
            s.show(selector);
            s.html.insert(selector.to_string(), html.to_string());
        })
    }

    pub fn with_attr(self, selector: &str, name: &str, value: &str) -> Self {
        self.edit(|s| {
            s.show(selector);
            s.attrs
                .entry((selector.to_string(), name.to_string()))
                .or_default()
                .push(value.to_string());
        })
    }

    pub fn with_values(self, selector: &str, values: &[&str]) -> Self {
        self.edit(|s| {
            s.show(selector);
            s.values.insert(
                selector.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            );
        })
    }

    pub fn with_counts(self, selector: &str, counts: &[usize]) -> Self {
        self.edit(|s| {
            s.show(selector);
            s.counts
                .insert(selector.to_string(), counts.iter().copied().collect());
        })
    }

    pub fn on(
        mut self,
        trigger: &str,
        effect: impl Fn(&mut PageState) + Send + Sync + 'static,
    ) -> Self {
        self.effects.insert(trigger.to_string(), Box::new(effect));
        self
    }

    fn act(&self, action: &str, target: &str) {
        let mut state = self.state.lock().unwrap();
        state.actions.push(format!("{} {}", action, target));
        if let Some(effect) = self.effects.get(target) {
            effect(&mut state);
        }
    }

    fn require(&self, selector: &str) -> Result<(), PageError> {
        if self.state.lock().unwrap().present.contains(selector) {
            Ok(())
        } else {
            Err(PageError::MissingElement(selector.to_string()))
        }
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn goto(&mut self, url: &str) -> Result<(), PageError> {
        self.state.lock().unwrap().location = url.to_string();
        self.act("goto", url);
        Ok(())
    }

    async fn location(&self) -> Result<String, PageError> {
        Ok(self.state.lock().unwrap().location.clone())
    }

    async fn exists(&self, selector: &str) -> Result<bool, PageError> {
        Ok(self.state.lock().unwrap().present.contains(selector))
    }

    async fn count(&self, selector: &str) -> Result<usize, PageError> {
        let mut state = self.state.lock().unwrap();
        let present = state.present.contains(selector);
        Ok(state
            .counts
            .get_mut(selector)
            .and_then(PageState::next)
            .unwrap_or(usize::from(present)))
    }

    async fn text(&self, selector: &str) -> Result<String, PageError> {
        self.state
            .lock()
            .unwrap()
            .texts
            .get(selector)
            .cloned()
            .ok_or_else(|| PageError::MissingElement(selector.to_string()))
    }

    async fn attr(&self, selector: &str, name: &str) -> Result<Option<String>, PageError> {
        self.require(selector)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .attrs
            .get(&(selector.to_string(), name.to_string()))
            .and_then(|values| values.first().cloned()))
    }

    async fn attr_all(&self, selector: &str, name: &str) -> Result<Vec<String>, PageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .attrs
            .get(&(selector.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn value(&self, selector: &str) -> Result<String, PageError> {
        self.require(selector)?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .values
            .get_mut(selector)
            .and_then(PageState::next)
            .unwrap_or_default())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), PageError> {
        self.require(selector)?;
        let mut state = self.state.lock().unwrap();
        state.actions.push(format!("fill {}", selector));
        state
            .values
            .insert(selector.to_string(), VecDeque::from([value.to_string()]));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), PageError> {
        self.require(selector)?;
        self.act("click", selector);
        Ok(())
    }

    async fn submit(&mut self, form_selector: &str) -> Result<(), PageError> {
        self.require(form_selector)?;
        self.act("submit", form_selector);
        Ok(())
    }

    async fn outer_html(&self, selector: &str) -> Result<String, PageError> {
        self.state
            .lock()
            .unwrap()
            .html
            .get(selector)
            .cloned()
            .ok_or_else(|| PageError::MissingElement(selector.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct Saved {
    pub bills: Vec<Document>,
    pub files: Vec<Document>,
    pub identity: Option<Identity>,
    pub credentials: Option<Credentials>,
    pub options: Vec<SaveOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub saved: Arc<Mutex<Saved>>,
}

#[async_trait]
impl Sink for MemorySink {
    async fn save_bills(&self, bills: &[Document], options: &SaveOptions) -> Result<usize, SinkError> {
        let mut saved = self.saved.lock().unwrap();
        saved.bills.extend_from_slice(bills);
        saved.options.push(options.clone());
        Ok(bills.len())
    }

    async fn save_files(&self, files: &[Document], options: &SaveOptions) -> Result<usize, SinkError> {
        let mut saved = self.saved.lock().unwrap();
        saved.files.extend_from_slice(files);
        saved.options.push(options.clone());
        Ok(files.len())
    }

    async fn save_identity(&self, identity: &Identity) -> Result<(), SinkError> {
        self.saved.lock().unwrap().identity = Some(identity.clone());
        Ok(())
    }

    async fn save_credentials(&self, credentials: &Credentials) -> Result<(), SinkError> {
        self.saved.lock().unwrap().credentials = Some(credentials.clone());
        Ok(())
    }
}
