//! Worker-side page primitives.
//!
//! [`Page`] is the set of in-page operations the worker executes on behalf
//! of the pilot. [`HtmlPage`] implements it over plain HTTP: navigation is a
//! GET, clicking a link follows its href, and clicking a submit control
//! posts the enclosing form with every filled value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Page not found: {0}")]
    NotFound(String),
    #[error("Invalid URL {url}: {reason}")]
    Url { url: String, reason: String },
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
    #[error("No element matches {0}")]
    MissingElement(String),
    #[error("Element {0} is not a form field")]
    NotAField(String),
    #[error("No form encloses {0}")]
    NoForm(String),
    #[error("No page loaded yet")]
    NoDocument,
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&mut self, url: &str) -> Result<(), PageError>;
    async fn location(&self) -> Result<String, PageError>;
    async fn exists(&self, selector: &str) -> Result<bool, PageError>;
    async fn count(&self, selector: &str) -> Result<usize, PageError>;
    /// Whitespace-normalized text of the first match.
    async fn text(&self, selector: &str) -> Result<String, PageError>;
    /// Attribute of the first match; `None` when the element lacks it.
    async fn attr(&self, selector: &str, name: &str) -> Result<Option<String>, PageError>;
    /// Attribute of every match, in document order.
    async fn attr_all(&self, selector: &str, name: &str) -> Result<Vec<String>, PageError>;
    /// Current value of a form field, including values filled in this page.
    async fn value(&self, selector: &str) -> Result<String, PageError>;
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), PageError>;
    async fn click(&mut self, selector: &str) -> Result<(), PageError>;
    async fn submit(&mut self, form_selector: &str) -> Result<(), PageError>;
    async fn outer_html(&self, selector: &str) -> Result<String, PageError>;
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: Url,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Fetched, PageError>;
    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<Fetched, PageError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a client sharing `jar`, so downloads made elsewhere with the
    /// same jar reuse the session cookies (`JSESSIONID`, `AWSELB`).
    pub fn new(jar: Arc<Jar>) -> Result<Self, PageError> {
        Ok(Self {
            client: session_client(jar)?,
        })
    }

    async fn read(response: reqwest::Response) -> Result<Fetched, PageError> {
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PageError::NotFound(response.url().to_string()));
        }
        let response = response.error_for_status()?;
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))?;
        Ok(Fetched { url, body })
    }
}

pub fn session_client(jar: Arc<Jar>) -> Result<Client, PageError> {
    Ok(Client::builder()
        .cookie_provider(jar)
        .timeout(Duration::from_secs(30))
        .user_agent(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ))
        .build()?)
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url) -> Result<Fetched, PageError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;
        Self::read(response).await
    }

    async fn post_form(&self, url: &Url, fields: &[(String, String)]) -> Result<Fetched, PageError> {
        let mut encoded = url.clone();
        encoded.query_pairs_mut().clear().extend_pairs(fields.iter());
        let body = encoded.query().unwrap_or_default().to_string();

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;
        Self::read(response).await
    }
}

enum Navigation {
    Get(Url),
    Post(Url, Vec<(String, String)>),
    Stay,
}

/// Static HTML page driven through a [`Transport`].
pub struct HtmlPage<T> {
    transport: T,
    base_url: Url,
    current: Option<Fetched>,
    filled: HashMap<String, String>,
}

impl<T: Transport> HtmlPage<T> {
    pub fn new(transport: T, base_url: &str) -> Result<Self, PageError> {
        Ok(Self {
            transport,
            base_url: parse_url(base_url)?,
            current: None,
            filled: HashMap::new(),
        })
    }

    fn current(&self) -> Result<&Fetched, PageError> {
        self.current.as_ref().ok_or(PageError::NoDocument)
    }

    fn with_document<R>(
        &self,
        selector: &str,
        f: impl FnOnce(Vec<ElementRef<'_>>) -> Result<R, PageError>,
    ) -> Result<R, PageError> {
        let selector_parsed = parse_selector(selector)?;
        let document = Html::parse_document(&self.current()?.body);
        let matches: Vec<ElementRef<'_>> = document.select(&selector_parsed).collect();
        f(matches)
    }

    fn with_first<R>(
        &self,
        selector: &str,
        f: impl FnOnce(ElementRef<'_>) -> Result<R, PageError>,
    ) -> Result<R, PageError> {
        self.with_document(selector, |matches| {
            let first = matches
                .into_iter()
                .next()
                .ok_or_else(|| PageError::MissingElement(selector.to_string()))?;
            f(first)
        })
    }

    fn resolve(&self, href: &str) -> Result<Url, PageError> {
        let base = self
            .current
            .as_ref()
            .map(|c| &c.url)
            .unwrap_or(&self.base_url);
        base.join(href).map_err(|e| PageError::Url {
            url: href.to_string(),
            reason: e.to_string(),
        })
    }

    fn field_value(&self, element: ElementRef<'_>) -> Option<String> {
        let name = element.value().attr("name")?;
        self.filled
            .get(name)
            .cloned()
            .or_else(|| element.value().attr("value").map(str::to_string))
    }

    fn form_navigation(
        &self,
        form: ElementRef<'_>,
        submitter: Option<ElementRef<'_>>,
    ) -> Result<Navigation, PageError> {
        let mut fields = Vec::new();
        let input_sel = parse_selector("input, select, textarea")?;
        for input in form.select(&input_sel) {
            let Some(name) = input.value().attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let input_type = input.value().attr("type").unwrap_or("text").to_lowercase();
            if matches!(input_type.as_str(), "submit" | "image" | "button") {
                continue;
            }
            if matches!(input_type.as_str(), "radio" | "checkbox")
                && input.value().attr("checked").is_none()
            {
                continue;
            }
            let value = self.field_value(input).unwrap_or_default();
            fields.push((name.to_string(), value));
        }

        if let Some(submitter) = submitter
            && let Some(name) = submitter.value().attr("name")
        {
            let value = submitter.value().attr("value").unwrap_or_default();
            fields.push((name.to_string(), value.to_string()));
        }

        let action = form.value().attr("action").unwrap_or("");
        let mut url = self.resolve(action)?;
        url.set_fragment(None);

        let method = form.value().attr("method").unwrap_or("get");
        if method.eq_ignore_ascii_case("post") {
            Ok(Navigation::Post(url, fields))
        } else {
            url.query_pairs_mut().clear().extend_pairs(fields.iter());
            Ok(Navigation::Get(url))
        }
    }

    fn click_navigation(&self, selector: &str) -> Result<Navigation, PageError> {
        self.with_first(selector, |element| {
            let name = element.value().name();
            if name == "a"
                && let Some(href) = element.value().attr("href")
            {
                if href.starts_with('#') || href.starts_with("javascript:") {
                    return Ok(Navigation::Stay);
                }
                return Ok(Navigation::Get(self.resolve(href)?));
            }

            let input_type = element.value().attr("type").unwrap_or("");
            let submits = (name == "button" && !input_type.eq_ignore_ascii_case("button"))
                || (name == "input"
                    && matches!(input_type.to_lowercase().as_str(), "submit" | "image"));
            if submits {
                let form = enclosing_form(element)
                    .ok_or_else(|| PageError::NoForm(selector.to_string()))?;
                return self.form_navigation(form, Some(element));
            }

            log::debug!("Click on {} has no navigation effect", selector);
            Ok(Navigation::Stay)
        })
    }

    async fn navigate(&mut self, navigation: Navigation) -> Result<(), PageError> {
        let fetched = match navigation {
            Navigation::Stay => return Ok(()),
            Navigation::Get(url) => {
                log::debug!("GET {}", url);
                self.transport.get(&url).await?
            }
            Navigation::Post(url, fields) => {
                log::debug!("POST {} ({} fields)", url, fields.len());
                self.transport.post_form(&url, &fields).await?
            }
        };
        self.current = Some(fetched);
        self.filled.clear();
        Ok(())
    }
}

fn enclosing_form(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "form")
}

fn parse_selector(selector: &str) -> Result<Selector, PageError> {
    Selector::parse(selector).map_err(|_| PageError::InvalidSelector(selector.to_string()))
}

fn parse_url(url: &str) -> Result<Url, PageError> {
    Url::parse(url).map_err(|e| PageError::Url {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl<T: Transport> Page for HtmlPage<T> {
    async fn goto(&mut self, url: &str) -> Result<(), PageError> {
        let url = self.resolve(url)?;
        self.navigate(Navigation::Get(url)).await
    }

    async fn location(&self) -> Result<String, PageError> {
        Ok(self.current()?.url.to_string())
    }

    async fn exists(&self, selector: &str) -> Result<bool, PageError> {
        self.with_document(selector, |matches| Ok(!matches.is_empty()))
    }

    async fn count(&self, selector: &str) -> Result<usize, PageError> {
        self.with_document(selector, |matches| Ok(matches.len()))
    }

    async fn text(&self, selector: &str) -> Result<String, PageError> {
        self.with_first(selector, |element| {
            Ok(crate::parser::normalize_whitespace(
                &element.text().collect::<String>(),
            ))
        })
    }

    async fn attr(&self, selector: &str, name: &str) -> Result<Option<String>, PageError> {
        self.with_first(selector, |element| {
            Ok(element.value().attr(name).map(str::to_string))
        })
    }

    async fn attr_all(&self, selector: &str, name: &str) -> Result<Vec<String>, PageError> {
        self.with_document(selector, |matches| {
            Ok(matches
                .into_iter()
                .filter_map(|e| e.value().attr(name).map(str::to_string))
                .collect())
        })
    }

    async fn value(&self, selector: &str) -> Result<String, PageError> {
        self.with_first(selector, |element| {
            if element.value().attr("name").is_none() {
                return Err(PageError::NotAField(selector.to_string()));
            }
            Ok(self.field_value(element).unwrap_or_default())
        })
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), PageError> {
        let name = self.with_first(selector, |element| {
            element
                .value()
                .attr("name")
                .map(str::to_string)
                .ok_or_else(|| PageError::NotAField(selector.to_string()))
        })?;
        self.filled.insert(name, value.to_string());
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), PageError> {
        let navigation = self.click_navigation(selector)?;
        self.navigate(navigation).await
    }

    async fn submit(&mut self, form_selector: &str) -> Result<(), PageError> {
        let navigation = self.with_first(form_selector, |form| {
            if form.value().name() != "form" {
                return Err(PageError::NoForm(form_selector.to_string()));
            }
            self.form_navigation(form, None)
        })?;
        self.navigate(navigation).await
    }

    async fn outer_html(&self, selector: &str) -> Result<String, PageError> {
        self.with_first(selector, |element| Ok(element.html()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixturePortal;
    use crate::site;

    const BASE: &str = "https://www.service.eau.veolia.fr";

    fn page() -> HtmlPage<FixturePortal> {
        HtmlPage::new(FixturePortal::new("jeanne.dupont@example.org", "hunter22"), BASE).unwrap()
    }

    #[tokio::test]
    async fn test_queries_before_navigation_fail() {
        let page = page();
        assert!(matches!(page.location().await, Err(PageError::NoDocument)));
        assert!(matches!(page.exists("body").await, Err(PageError::NoDocument)));
    }

    #[tokio::test]
    async fn test_goto_and_query() {
        let mut page = page();
        page.goto(site::HOME_PATH).await.unwrap();

        assert_eq!(page.location().await.unwrap(), format!("{}{}", BASE, site::HOME_PATH));
        assert!(page.exists(site::LOGIN_FORM).await.unwrap());
        assert!(!page.exists(site::LOGGED_IN_MARKER).await.unwrap());
        assert_eq!(
            page.attr(site::LOGIN_USERNAME, "placeholder").await.unwrap().as_deref(),
            Some("Votre adresse e-mail")
        );
        assert!(matches!(
            page.text(".does-not-exist").await,
            Err(PageError::MissingElement(_))
        ));
        assert!(matches!(
            page.exists("[[broken").await,
            Err(PageError::InvalidSelector(_))
        ));
    }

    #[tokio::test]
    async fn test_fill_then_value() {
        let mut page = page();
        page.goto(site::HOME_PATH).await.unwrap();

        assert_eq!(page.value(site::LOGIN_USERNAME).await.unwrap(), "");
        page.fill(site::LOGIN_USERNAME, "jeanne.dupont@example.org").await.unwrap();
        assert_eq!(
            page.value(site::LOGIN_USERNAME).await.unwrap(),
            "jeanne.dupont@example.org"
        );
        assert!(matches!(
            page.fill("header a.logo", "x").await,
            Err(PageError::NotAField(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_posts_filled_form() {
        let mut page = page();
        page.goto(site::HOME_PATH).await.unwrap();
        page.fill(site::LOGIN_USERNAME, "jeanne.dupont@example.org").await.unwrap();
        page.fill(site::LOGIN_PASSWORD, "hunter22").await.unwrap();
        page.click("#loginBoxform_identification button[type='submit']")
            .await
            .unwrap();

        assert!(page.exists(site::LOGGED_IN_MARKER).await.unwrap());
        page.goto(site::HOME_PATH).await.unwrap();
        assert!(page.exists(site::LOGGED_IN_MARKER).await.unwrap());
    }

    #[tokio::test]
    async fn test_click_link_follows_href() {
        let mut page = page();
        page.goto(site::HOME_PATH).await.unwrap();
        page.fill(site::LOGIN_USERNAME, "jeanne.dupont@example.org").await.unwrap();
        page.fill(site::LOGIN_PASSWORD, "hunter22").await.unwrap();
        page.submit(site::LOGIN_FORM).await.unwrap();

        page.click(site::BILLS_LINK).await.unwrap();
        assert_eq!(
            page.location().await.unwrap(),
            format!("{}{}", BASE, site::BILLS_PATH)
        );
        assert_eq!(page.count(site::RESULT_ROWS).await.unwrap(), 3);
        assert_eq!(page.attr_all(site::CONTRACT_LINKS, "href").await.unwrap().len(), 2);
    }
}
