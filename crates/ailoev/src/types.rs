use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"********")
            .finish()
    }
}

/// A contract link as listed on the bills page, e.g.
/// `/home/espace-client/vos-factures-et-correspondances.setContrat.do?idContrat=1234567`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPath {
    pub path: String,
    pub id: String,
}

impl Display for ContractPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "contract {} ({})", self.id, self.path)
    }
}

/// One results-table row, as scraped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub date: String,
    pub document_type: String,
    pub vendor_ref: Option<String>,
    pub raw_amount: String,
    pub href: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentClass {
    Bill,
    File,
}

impl DocumentClass {
    pub const BILL_TYPE: &'static str = "Facture";

    pub fn of(document_type: &str) -> Self {
        if document_type == Self::BILL_TYPE {
            DocumentClass::Bill
        } else {
            DocumentClass::File
        }
    }

    pub fn vendor_ref_suffix(&self) -> &'static str {
        match self {
            DocumentClass::Bill => "-F",
            DocumentClass::File => "-C",
        }
    }
}

impl Display for DocumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentClass::Bill => write!(f, "bill"),
            DocumentClass::File => write!(f, "file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amount {
    pub amount: f64,
    pub currency: String,
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub import_date: DateTime<Utc>,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub date: NaiveDate,
    pub document_type: String,
    pub class: DocumentClass,
    pub vendor_ref: Option<String>,
    #[serde(flatten)]
    pub amount: Option<Amount>,
    pub file_url: String,
    pub filename: String,
    pub vendor: String,
    pub contract_id: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn is_bill(&self) -> bool {
        self.class == DocumentClass::Bill
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} — {}", self.class, self.date, self.document_type)?;
        if let Some(vendor_ref) = &self.vendor_ref {
            write!(f, " #{}", vendor_ref)?;
        }
        if let Some(amount) = &self.amount {
            write!(f, " · {}", amount)?;
        }
        write!(f, "\n   File: {}", self.filename)?;
        write!(f, "\n   URL:  {}", self.file_url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneType {
    Mobile,
    Home,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid phone type '{0}'. Accepted values: 'mobile', 'home'")]
pub struct PhoneTypeParseError(String);

impl FromStr for PhoneType {
    type Err = PhoneTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mobile" | "portable" => Ok(PhoneType::Mobile),
            "home" | "fixe" | "domicile" => Ok(PhoneType::Home),
            _ => Err(PhoneTypeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phone {
    #[serde(rename = "type")]
    pub kind: PhoneType,
    pub number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub post_code: String,
    pub city: String,
    pub formatted_address: String,
}

/// Contact block of the profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactSection {
    pub name: PersonName,
    pub email: Option<String>,
    pub phone: Vec<Phone>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: PersonName,
    pub address: Vec<PostalAddress>,
    pub email: Option<String>,
    pub phone: Vec<Phone>,
}

impl Identity {
    pub fn merge(contact: ContactSection, address: PostalAddress) -> Self {
        Self {
            name: contact.name,
            address: vec![address],
            email: contact.email,
            phone: contact.phone,
        }
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name.full_name)?;
        for address in &self.address {
            write!(f, "\n      Address: {}", address.formatted_address)?;
        }
        if let Some(email) = &self.email {
            write!(f, "\n      Email:   {}", email)?;
        }
        for phone in &self.phone {
            let label = match phone.kind {
                PhoneType::Mobile => "Mobile",
                PhoneType::Home => "Home",
            };
            write!(f, "\n      {:<8} {}", format!("{label}:"), phone.number)?;
        }
        Ok(())
    }
}
