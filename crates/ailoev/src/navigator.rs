use reqwest::Url;

use crate::auth::Session;
use crate::config::KonnectorConfig;
use crate::konnector::KonnectorError;
use crate::page::PageError;
use crate::parser::parse_contract_paths;
use crate::poll::wait_for;
use crate::site;
use crate::types::ContractPath;
use crate::worker::WorkerHandle;

/// Drives the worker to the bills listing and loads every row.
pub struct Navigator<'a> {
    worker: &'a WorkerHandle,
    config: &'a KonnectorConfig,
}

impl<'a> Navigator<'a> {
    /// Listing pages are only reachable once logged in, hence the session.
    pub fn new(worker: &'a WorkerHandle, config: &'a KonnectorConfig, _session: &Session) -> Self {
        Self { worker, config }
    }

    pub fn bills_url(&self) -> String {
        site::url(&self.config.base_url, site::BILLS_PATH)
    }

    pub async fn open_bills(&self) -> Result<(), KonnectorError> {
        if self.worker.exists(site::BILLS_LINK).await? {
            self.worker.click(site::BILLS_LINK).await?;
        } else {
            log::debug!("No bills link on this page, navigating directly");
            self.worker.goto(&self.bills_url()).await?;
        }
        self.wait_for_listing(&[self.bills_url().as_str()]).await?;
        self.load_all().await?;
        Ok(())
    }

    /// Contracts offered by the listing's contract switcher, deduplicated.
    pub async fn contracts(&self) -> Result<Vec<ContractPath>, KonnectorError> {
        let hrefs = self
            .worker
            .attr_all(site::CONTRACT_LINKS, "href")
            .await?;
        let contracts = parse_contract_paths(&hrefs)?;
        log::info!("Found {} contract(s)", contracts.len());
        Ok(contracts)
    }

    pub async fn open_contract(&self, contract: &ContractPath) -> Result<(), KonnectorError> {
        log::info!("Opening {}", contract);
        let url = self.resolve(&self.bills_url(), &contract.path)?;
        self.worker.goto(&url).await?;
        // The portal may answer the switch in place or redirect to the listing.
        let bills_url = self.bills_url();
        self.wait_for_listing(&[url.as_str(), bills_url.as_str()]).await?;
        self.load_all().await?;
        Ok(())
    }

    /// Clicks "load more" when offered and waits for the expanded table.
    /// Returns whether the table was expanded.
    pub async fn load_all(&self) -> Result<bool, KonnectorError> {
        let Some(href) = self.load_more_href().await? else {
            log::debug!("No load more control, listing is complete");
            return Ok(false);
        };

        let expanded_url = self.resolve(&self.worker.location().await?, &href)?;
        log::debug!("Loading the full listing from {}", expanded_url);
        self.worker.click(site::LOAD_MORE).await?;
        self.wait_for_listing(&[expanded_url.as_str()]).await?;

        // Same URL pattern and DOM as the short page: only the row count
        // tells them apart.
        let worker = self.worker;
        wait_for("expanded results table", &self.config.poll, || async move {
            let rows = worker.count(site::RESULT_ROWS).await?;
            Ok::<_, KonnectorError>(rows > site::BASELINE_PAGE_SIZE)
        })
        .await?;
        Ok(true)
    }

    async fn load_more_href(&self) -> Result<Option<String>, KonnectorError> {
        if !self.worker.exists(site::LOAD_MORE).await? {
            return Ok(None);
        }
        Ok(self.worker.attr(site::LOAD_MORE, "href").await?)
    }

    async fn wait_for_listing(&self, expected_urls: &[&str]) -> Result<(), KonnectorError> {
        let worker = self.worker;
        wait_for("bills listing", &self.config.poll, || async move {
            let location = worker.location().await?;
            let at_listing = expected_urls.contains(&location.as_str());
            Ok::<_, KonnectorError>(at_listing && worker.exists(site::RESULTS_TABLE).await?)
        })
        .await
    }

    fn resolve(&self, base: &str, href: &str) -> Result<String, KonnectorError> {
        let invalid = |reason: String| PageError::Url {
            url: href.to_string(),
            reason,
        };
        let base = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
        let url = base.join(href).map_err(|e| invalid(e.to_string()))?;
        Ok(url.to_string())
    }
}
