use std::collections::BTreeMap;

use crate::types::{Document, DocumentClass};

use chrono::NaiveDate;

#[derive(Debug, Default)]
pub struct DocumentFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub class: Option<DocumentClass>,
    pub contract: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl DocumentFilter {
    pub fn apply(self, mut documents: Vec<Document>) -> Vec<Document> {
        if let Some(start) = self.start_date {
            documents.retain(|d| d.date >= start);
        }
        if let Some(end) = self.end_date {
            documents.retain(|d| d.date <= end);
        }
        if let Some(class) = self.class {
            documents.retain(|d| d.class == class);
        }
        if let Some(contract) = &self.contract {
            documents.retain(|d| &d.contract_id == contract);
        }
        documents.sort_by(|a, b| b.date.cmp(&a.date));
        if let Some(off) = self.offset {
            documents = documents.into_iter().skip(off).collect();
        }
        if let Some(lim) = self.limit {
            documents.truncate(lim);
        }
        documents
    }

    pub fn validate(self) -> Result<Self, String> {
        if let Some(start) = self.start_date
            && let Some(end) = self.end_date
            && start > end
        {
            return Err(format!(
                "Start date ({start}) cannot be after end date ({end})"
            ));
        }
        if self.limit.is_some_and(|l| l == 0) {
            return Err("Limit must be greater than 0".to_string());
        }
        Ok(self)
    }
}

#[derive(Debug)]
pub struct DocumentStats {
    pub bills: usize,
    pub files: usize,
    pub total: usize,
    /// Billed amount per currency code.
    pub billed: BTreeMap<String, f64>,
}

impl DocumentStats {
    pub fn from_documents(documents: &[Document]) -> DocumentStats {
        let mut billed = BTreeMap::new();
        for amount in documents
            .iter()
            .filter(|d| d.is_bill())
            .filter_map(|d| d.amount.as_ref())
        {
            *billed.entry(amount.currency.clone()).or_insert(0.0) += amount.amount;
        }
        DocumentStats {
            bills: documents.iter().filter(|d| d.is_bill()).count(),
            files: documents.iter().filter(|d| !d.is_bill()).count(),
            total: documents.len(),
            billed,
        }
    }
}

impl std::fmt::Display for DocumentStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nStatistics:")?;
        writeln!(f, "  Bills:           {}", self.bills)?;
        writeln!(f, "  Other documents: {}", self.files)?;
        writeln!(f, "  Total:           {}", self.total)?;
        for (currency, amount) in &self.billed {
            writeln!(f, "  Billed ({currency}):    {amount:.2}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::types::{Amount, DocumentMetadata};

    fn document(date: (i32, u32, u32), class: DocumentClass, amount: Option<f64>) -> Document {
        let date = NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap();
        Document {
            date,
            document_type: match class {
                DocumentClass::Bill => "Facture".to_string(),
                DocumentClass::File => "Courrier".to_string(),
            },
            class,
            vendor_ref: None,
            amount: amount.map(|amount| Amount {
                amount,
                currency: "EUR".to_string(),
            }),
            file_url: "https://www.service.eau.veolia.fr/doc.pdf".to_string(),
            filename: format!("{}.pdf", date.format("%Y%m%d")),
            vendor: "veolia".to_string(),
            contract_id: "871234567".to_string(),
            metadata: DocumentMetadata {
                import_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                version: 1,
            },
        }
    }

    fn sample() -> Vec<Document> {
        vec![
            document((2020, 9, 5), DocumentClass::Bill, Some(1038.75)),
            document((2021, 3, 5), DocumentClass::Bill, Some(42.10)),
            document((2021, 1, 12), DocumentClass::File, None),
        ]
    }

    #[test]
    fn test_filter_by_date_and_class() {
        let filter = DocumentFilter {
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1),
            class: Some(DocumentClass::Bill),
            ..Default::default()
        };
        let result = filter.apply(sample());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].filename, "20210305.pdf");
    }

    #[test]
    fn test_filter_sorts_newest_first_then_pages() {
        let filter = DocumentFilter {
            offset: Some(1),
            limit: Some(1),
            ..Default::default()
        };
        let result = filter.apply(sample());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].filename, "20210112.pdf");
    }

    #[test]
    fn test_validate() {
        let filter = DocumentFilter {
            start_date: NaiveDate::from_ymd_opt(2021, 2, 1),
            end_date: NaiveDate::from_ymd_opt(2021, 1, 1),
            ..Default::default()
        };
        assert!(filter.validate().is_err());
        assert!(
            DocumentFilter {
                limit: Some(0),
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_zero_offset_is_a_no_op() {
        let filter = DocumentFilter {
            offset: Some(0),
            ..Default::default()
        }
        .validate()
        .expect("Offset 0 skips nothing");
        assert_eq!(filter.apply(sample()).len(), 3);
    }

    #[test]
    fn test_stats() {
        let stats = DocumentStats::from_documents(&sample());
        assert_eq!(stats.bills, 2);
        assert_eq!(stats.files, 1);
        assert_eq!(stats.total, 3);
        assert!((stats.billed["EUR"] - 1080.85).abs() < 1e-9);
        assert!(stats.to_string().contains("1080.85"));
    }
}
