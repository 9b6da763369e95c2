use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;

use crate::parser::ParseError;
use crate::types::{Amount, Document, DocumentClass, DocumentMetadata, RawRow};

pub const METADATA_VERSION: u32 = 1;

/// `"05 / 03 / 2021"` -> `"2021/03/05"`.
pub fn canonical_date(raw: &str) -> Result<String, ParseError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let parts: Vec<&str> = compact.split('/').collect();
    let [day, month, year] = parts[..] else {
        return Err(ParseError::DateParse(format!("Expected DD/MM/YYYY, got: {}", raw)));
    };
    if day.is_empty() || month.is_empty() || year.len() != 4 {
        return Err(ParseError::DateParse(format!("Expected DD/MM/YYYY, got: {}", raw)));
    }
    Ok(format!("{}/{:0>2}/{:0>2}", year, month, day))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ParseError> {
    let canonical = canonical_date(raw)?;
    NaiveDate::parse_from_str(&canonical, "%Y/%m/%d")
        .map_err(|e| ParseError::DateParse(format!("Invalid date {}: {}", raw, e)))
}

pub fn currency_code(symbol: &str) -> String {
    match symbol {
        "€" => "EUR".to_string(),
        other => other.to_string(),
    }
}

/// Splits `"1 038,75 €"` into the amount and its currency code. An empty
/// cell has no amount.
pub fn parse_amount(raw: &str) -> Result<Option<Amount>, ParseError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let end_of_number = text
        .rfind(|c: char| c.is_ascii_digit())
        .map(|i| i + 1)
        .ok_or_else(|| ParseError::AmountParse(format!("No digits in amount: {}", raw)))?;
    let (number, symbol) = text.split_at(end_of_number);

    let mut tokens = symbol.split_whitespace();
    let symbol = match tokens.next() {
        Some(symbol) => symbol,
        None => {
            log::warn!("Amount '{}' has no currency symbol, assuming €", raw);
            "€"
        }
    };
    let trailing: Vec<&str> = tokens.collect();
    if !trailing.is_empty() {
        log::warn!("Ignoring '{}' after currency in amount '{}'", trailing.join(" "), raw);
    }

    let number: String = number
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let amount: f64 = number
        .parse()
        .map_err(|_| ParseError::AmountParse(format!("Invalid amount: {}", raw)))?;
    if !amount.is_finite() {
        return Err(ParseError::AmountParse(format!("Non-finite amount: {}", raw)));
    }

    Ok(Some(Amount {
        amount,
        currency: currency_code(symbol),
    }))
}

/// The page shows the contract reference with a two-character prefix that
/// is not part of the reference printed on documents.
pub fn contract_ref_suffix(reference: &str) -> String {
    reference.trim().chars().skip(2).collect()
}

fn filename_component(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace('/', "-")
}

pub fn document_filename(
    date: NaiveDate,
    vendor: &str,
    contract_suffix: &str,
    document_type: &str,
    amount: Option<&Amount>,
) -> String {
    let mut name = format!(
        "{}-{}-{}-{}",
        date.format("%Y%m%d"),
        vendor.to_uppercase(),
        contract_suffix,
        filename_component(document_type)
    );
    if let Some(amount) = amount {
        name.push_str(&format!("_{:.2}{}", amount.amount, amount.currency));
    }
    name.push_str(".pdf");
    name
}

/// Page-level values shared by every row of one contract's table.
#[derive(Debug, Clone)]
pub struct RowContext<'a> {
    pub base_url: &'a Url,
    pub vendor: &'a str,
    pub contract_id: &'a str,
    pub contract_ref: &'a str,
    pub tag_vendor_ref: bool,
    pub import_date: DateTime<Utc>,
}

pub fn build_document(row: RawRow, ctx: &RowContext<'_>) -> Result<Document, ParseError> {
    let date = parse_date(&row.date)?;
    let amount = parse_amount(&row.raw_amount)?;
    let class = DocumentClass::of(&row.document_type);

    let file_url = ctx
        .base_url
        .join(&row.href)
        .map_err(|e| ParseError::UrlParse(format!("{}: {}", row.href, e)))?
        .to_string();

    let suffix = contract_ref_suffix(ctx.contract_ref);
    let filename = document_filename(
        date,
        ctx.vendor,
        &suffix,
        &row.document_type,
        amount.as_ref(),
    );

    let vendor_ref = if ctx.tag_vendor_ref {
        row.vendor_ref
            .map(|r| format!("{}{}", r, class.vendor_ref_suffix()))
    } else {
        row.vendor_ref
    };

    Ok(Document {
        date,
        document_type: row.document_type,
        class,
        vendor_ref,
        amount,
        file_url,
        filename,
        vendor: ctx.vendor.to_string(),
        contract_id: ctx.contract_id.to_string(),
        metadata: DocumentMetadata {
            import_date: ctx.import_date,
            version: METADATA_VERSION,
        },
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Harvest {
    pub bills: Vec<Document>,
    pub files: Vec<Document>,
}

impl Harvest {
    pub fn push(&mut self, document: Document) {
        match document.class {
            DocumentClass::Bill => self.bills.push(document),
            DocumentClass::File => self.files.push(document),
        }
    }

    pub fn extend(&mut self, other: Harvest) {
        self.bills.extend(other.bills);
        self.files.extend(other.files);
    }

    pub fn len(&self) -> usize {
        self.bills.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.bills.iter().chain(self.files.iter())
    }
}

pub fn build_harvest(rows: Vec<RawRow>, ctx: &RowContext<'_>) -> Result<Harvest, ParseError> {
    let mut harvest = Harvest::default();
    for row in rows {
        harvest.push(build_document(row, ctx)?);
    }
    Ok(harvest)
}
