//! Reads the loaded listing and profile pages through the worker and turns
//! them into normalized records.

use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::auth::Session;
use crate::config::{DedupKey, KonnectorConfig};
use crate::konnector::KonnectorError;
use crate::normalize::{Harvest, RowContext, build_harvest};
use crate::parser::{parse_address_section, parse_contact_section, parse_rows};
use crate::poll::wait_for;
use crate::site;
use crate::types::{ContractPath, Identity};
use crate::worker::WorkerHandle;

pub struct Extractor<'a> {
    worker: &'a WorkerHandle,
    config: &'a KonnectorConfig,
    base_url: Url,
    import_date: DateTime<Utc>,
}

impl<'a> Extractor<'a> {
    pub fn new(
        worker: &'a WorkerHandle,
        config: &'a KonnectorConfig,
        base_url: Url,
        _session: &Session,
    ) -> Self {
        Self {
            worker,
            config,
            base_url,
            import_date: Utc::now(),
        }
    }

    /// Documents of the listing currently shown. The contract reference
    /// used in filenames is read from the page, not from `contract`.
    pub async fn listing(&self, contract: &ContractPath) -> Result<Harvest, KonnectorError> {
        let contract_ref = self.worker.text(site::CONTRACT_REF).await?;
        if contract_ref != contract.id {
            log::warn!(
                "Listing shows contract {} while {} was requested",
                contract_ref,
                contract.id
            );
        }

        let table = self.worker.outer_html(site::RESULTS_TABLE).await?;
        let rows = parse_rows(&table)?;
        log::debug!("{} row(s) for contract {}", rows.len(), contract.id);

        let ctx = RowContext {
            base_url: &self.base_url,
            vendor: site::VENDOR,
            contract_id: &contract.id,
            contract_ref: &contract_ref,
            tag_vendor_ref: self.config.dedup_key == DedupKey::VendorRef,
            import_date: self.import_date,
        };
        let harvest = build_harvest(rows, &ctx)?;
        log::info!(
            "Contract {}: {} bill(s), {} other document(s)",
            contract.id,
            harvest.bills.len(),
            harvest.files.len()
        );
        Ok(harvest)
    }

    /// Contract shown by a listing without a contract switcher.
    pub async fn current_contract(&self) -> Result<ContractPath, KonnectorError> {
        let id = self.worker.text(site::CONTRACT_REF).await?;
        Ok(ContractPath {
            path: site::BILLS_PATH.to_string(),
            id,
        })
    }

    pub async fn identity(&self) -> Result<Identity, KonnectorError> {
        self.worker
            .goto(&site::url(&self.config.base_url, site::PROFILE_PATH))
            .await?;
        let worker = self.worker;
        wait_for("profile page", &self.config.poll, || async move {
            Ok::<_, KonnectorError>(
                worker.exists(site::PROFILE_CONTACT).await?
                    && worker.exists(site::PROFILE_ADDRESS).await?,
            )
        })
        .await?;

        let contact = parse_contact_section(&worker.outer_html(site::PROFILE_CONTACT).await?)?;
        let address = parse_address_section(&worker.outer_html(site::PROFILE_ADDRESS).await?)?;
        let identity = Identity::merge(contact, address);
        log::info!("Identity: {}", identity.name.full_name);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::page::HtmlPage;
    use crate::testing::{BASE, CONTRACT_A, FixturePortal, ScriptedPage};
    use crate::types::PhoneType;
    use crate::worker::{self, LoginFields};

    fn base() -> Url {
        Url::parse(BASE).unwrap()
    }

    #[tokio::test]
    async fn test_listing_from_fixture_portal() {
        let portal = FixturePortal::new("jeanne.dupont@example.org", "hunter22").logged_in();
        let page = HtmlPage::new(portal, BASE).unwrap();
        let (worker, _events) = worker::spawn(page, LoginFields::default());
        worker.goto(site::BILLS_PATH).await.unwrap();

        let config = KonnectorConfig::default();
        let session = Session::assumed();
        let extractor = Extractor::new(&worker, &config, base(), &session);
        let contract = extractor.current_contract().await.unwrap();
        assert_eq!(contract.id, CONTRACT_A);

        let harvest = extractor.listing(&contract).await.unwrap();
        assert_eq!(harvest.bills.len(), 2);
        assert_eq!(harvest.files.len(), 1);

        let bill = &harvest.bills[0];
        assert_eq!(bill.filename, "20210305-VEOLIA-1234567-Facture_42.10EUR.pdf");
        assert_eq!(
            bill.file_url,
            format!("{}/home/espace-client/telecharger.do?idFacture=FA0001", BASE)
        );
        assert_eq!(bill.vendor_ref.as_deref(), Some("FA0001-F"));
        assert_eq!(harvest.files[0].vendor_ref.as_deref(), Some("CO0042-C"));
    }

    #[tokio::test]
    async fn test_listing_without_tagging() {
        let table = r#"<table><tbody><tr>
            <td>05 / 03 / 2021</td><td>Facture</td><td>FA0001</td><td>42,10 €</td>
            <td><a href="/home/espace-client/telecharger.do?idFacture=FA0001">PDF</a></td>
        </tr></tbody></table>"#;
        let page = ScriptedPage::new()
            .with_text(site::CONTRACT_REF, CONTRACT_A)
            .with_html(site::RESULTS_TABLE, table);
        let (worker, _events) = worker::spawn(page, LoginFields::default());

        let config = KonnectorConfig {
            dedup_key: DedupKey::Filename,
            ..Default::default()
        };
        let session = Session::assumed();
        let extractor = Extractor::new(&worker, &config, base(), &session);
        let harvest = extractor
            .listing(&ContractPath {
                path: site::BILLS_PATH.to_string(),
                id: CONTRACT_A.to_string(),
            })
            .await
            .unwrap();

        assert_eq!(harvest.bills[0].vendor_ref.as_deref(), Some("FA0001"));
    }

    #[tokio::test]
    async fn test_missing_table_fails_loudly() {
        let page = ScriptedPage::new().with_text(site::CONTRACT_REF, CONTRACT_A);
        let (worker, _events) = worker::spawn(page, LoginFields::default());
        let config = KonnectorConfig::default();
        let session = Session::assumed();
        let extractor = Extractor::new(&worker, &config, base(), &session);

        let err = extractor
            .listing(&ContractPath {
                path: site::BILLS_PATH.to_string(),
                id: CONTRACT_A.to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains(site::RESULTS_TABLE));
    }

    #[tokio::test]
    async fn test_identity_merges_sections() {
        let portal = FixturePortal::new("jeanne.dupont@example.org", "hunter22").logged_in();
        let page = HtmlPage::new(portal, BASE).unwrap();
        let (worker, _events) = worker::spawn(page, LoginFields::default());
        let config = KonnectorConfig {
            base_url: BASE.to_string(),
            ..Default::default()
        };
        let session = Session::assumed();

        let identity = Extractor::new(&worker, &config, base(), &session)
            .identity()
            .await
            .unwrap();

        assert_eq!(identity.name.full_name, "Jeanne DUPONT");
        assert_eq!(identity.email.as_deref(), Some("jeanne.dupont@example.org"));
        assert_eq!(identity.address.len(), 1);
        assert_eq!(identity.address[0].formatted_address, "12 rue des Lilas 69003 LYON");
        assert_eq!(identity.phone.len(), 2);
        assert_eq!(identity.phone[0].kind, PhoneType::Mobile);
    }
}
