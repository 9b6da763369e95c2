use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{ContactSection, ContractPath, PersonName, Phone, PostalAddress, RawRow};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse URL: {0}")]
    UrlParse(String),
    #[error("Failed to parse date: {0}")]
    DateParse(String),
    #[error("Failed to parse amount: {0}")]
    AmountParse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Unexpected shape for table row {row}: {reason}")]
    RowShape { row: usize, reason: String },
}

static RE_CONTRACT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"idContrat=([A-Za-z0-9]+)").expect("invalid regex: contract id")
});

macro_rules! selector {
    ($name:ident, $css:literal) => {
        static $name: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse($css).expect(concat!("invalid selector: ", $css)));
    };
}

selector!(SEL_ANCHOR, "a");
selector!(SEL_ROWS, "tbody tr");
selector!(SEL_FIRST_NAME, ".prenom");
selector!(SEL_LAST_NAME, ".nom");
selector!(SEL_EMAIL, ".email");
selector!(SEL_PHONE, ".telephone");
selector!(SEL_STREET, ".adresse-rue");
selector!(SEL_POST_CODE, ".adresse-cp");
selector!(SEL_CITY, ".adresse-ville");

const TEXT_CELLS: usize = 4;

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_text(scope: ElementRef, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(|e| normalize_whitespace(&elem_text(e)))
        .filter(|s| !s.is_empty())
}

fn required_text(scope: ElementRef, selector: &Selector, field: &str) -> Result<String, ParseError> {
    first_text(scope, selector).ok_or_else(|| ParseError::MissingField(field.to_string()))
}

pub fn contract_id_from_path(path: &str) -> Result<String, ParseError> {
    RE_CONTRACT_ID
        .captures(path)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| ParseError::UrlParse(format!("No idContrat in contract path: {}", path)))
}

/// Builds the contract list from the hrefs of the bills page contract links,
/// keeping page order.
pub fn parse_contract_paths(hrefs: &[String]) -> Result<Vec<ContractPath>, ParseError> {
    let mut contracts: Vec<ContractPath> = Vec::with_capacity(hrefs.len());
    for href in hrefs {
        let id = contract_id_from_path(href)?;
        if contracts.iter().any(|c| c.id == id) {
            log::debug!("Skipping duplicate contract link {}", href);
            continue;
        }
        contracts.push(ContractPath {
            path: href.clone(),
            id,
        });
    }
    Ok(contracts)
}

/// A cell wrapping exactly one element is the download cell.
fn link_cell_target(cell: ElementRef) -> Option<Option<String>> {
    let mut children = cell.children().filter_map(ElementRef::wrap);
    let only = children.next()?;
    if children.next().is_some() {
        return None;
    }

    let href = if only.value().name() == "a" {
        only.value().attr("href")
    } else {
        only.select(&SEL_ANCHOR)
            .find_map(|a| a.value().attr("href"))
    };
    Some(href.map(str::to_string))
}

fn parse_row(index: usize, row: ElementRef) -> Result<RawRow, ParseError> {
    let mut texts = Vec::with_capacity(TEXT_CELLS);
    let mut href = None;

    for cell in row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "td")
    {
        if let Some(target) = link_cell_target(cell) {
            href = Some(target.ok_or_else(|| ParseError::RowShape {
                row: index,
                reason: "download cell has no link target".to_string(),
            })?);
            break;
        }
        texts.push(normalize_whitespace(&elem_text(cell)));
    }

    let href = href.ok_or_else(|| ParseError::RowShape {
        row: index,
        reason: "no download cell".to_string(),
    })?;

    let [date, document_type, vendor_ref, raw_amount]: [String; TEXT_CELLS] =
        texts.try_into().map_err(|texts: Vec<String>| ParseError::RowShape {
            row: index,
            reason: format!(
                "expected {} text cells before the download cell, found {}",
                TEXT_CELLS,
                texts.len()
            ),
        })?;

    if date.is_empty() {
        return Err(ParseError::MissingField(format!("date of row {}", index)));
    }
    if document_type.is_empty() {
        return Err(ParseError::MissingField(format!(
            "document type of row {}",
            index
        )));
    }

    Ok(RawRow {
        date,
        document_type,
        vendor_ref: Some(vendor_ref).filter(|r| !r.is_empty()),
        raw_amount,
        href,
    })
}

/// Parses the results table (outer HTML of the table element).
pub fn parse_rows(table_html: &str) -> Result<Vec<RawRow>, ParseError> {
    let fragment = Html::parse_fragment(table_html);
    fragment
        .select(&SEL_ROWS)
        .enumerate()
        .map(|(index, row)| parse_row(index, row))
        .collect()
}

pub fn parse_contact_section(section_html: &str) -> Result<ContactSection, ParseError> {
    let fragment = Html::parse_fragment(section_html);
    let root = fragment.root_element();

    let first_name = required_text(root, &SEL_FIRST_NAME, "first name")?;
    let last_name = required_text(root, &SEL_LAST_NAME, "last name")?;
    let full_name = format!("{} {}", first_name, last_name);

    let email = first_text(root, &SEL_EMAIL);

    let phone = root
        .select(&SEL_PHONE)
        .filter_map(|e| {
            let number = normalize_whitespace(&elem_text(e));
            if number.is_empty() {
                return None;
            }
            let kind = e.value().attr("data-type").unwrap_or("mobile");
            match kind.parse() {
                Ok(kind) => Some(Phone { kind, number }),
                Err(err) => {
                    log::warn!("Skipping phone number: {}", err);
                    None
                }
            }
        })
        .collect();

    Ok(ContactSection {
        name: PersonName {
            first_name,
            last_name,
            full_name,
        },
        email,
        phone,
    })
}

pub fn parse_address_section(section_html: &str) -> Result<PostalAddress, ParseError> {
    let fragment = Html::parse_fragment(section_html);
    let root = fragment.root_element();

    let street = required_text(root, &SEL_STREET, "street")?;
    let post_code = required_text(root, &SEL_POST_CODE, "post code")?;
    let city = required_text(root, &SEL_CITY, "city")?;
    let formatted_address = format!("{} {} {}", street, post_code, city);

    Ok(PostalAddress {
        street,
        post_code,
        city,
        formatted_address,
    })
}
