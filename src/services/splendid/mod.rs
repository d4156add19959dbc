//! Splendid Accounts reporting API.
//!
//! Report definitions are fixed at startup; each one names a single upstream
//! query (endpoint, branch set, ordering) and is addressed by its identifier.

pub mod api;
#[cfg(test)]
pub mod mock;
pub mod parser;

use crate::config::UpstreamConfig;
use crate::error::SalesfeedError;
use crate::services::splendid::parser::{product_date_wise_sale, FieldMapping};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifier of the product date-wise sale report
pub const PRODUCT_DATE_WISE_SALE: &str = "ProductDateWiseSale";

/// Branches included in the product date-wise sale report
const PRODUCT_SALE_BRANCH_IDS: &[u64] = &[
    2248, 2249, 5574, 5701, 7965, 13468, 13469, 21578, 24709, 24710, 24711, 25762, 2994, 23405,
    12721, 26777, 26778, 26779, 26780, 26781,
];

/// One fixed upstream query configuration
#[derive(Debug, Clone)]
pub struct ReportDefinition {
    pub id: String,
    pub url: String,
    pub branch_ids: Vec<u64>,
    pub order_by: String,
    pub ascending: bool,
    pub mapping: FieldMapping,
}

impl ReportDefinition {
    pub fn product_date_wise_sale(base_url: &str) -> Self {
        Self {
            id: PRODUCT_DATE_WISE_SALE.to_string(),
            url: format!(
                "{}/Reports/ProductDateWiseSaleReport",
                base_url.trim_end_matches('/')
            ),
            branch_ids: PRODUCT_SALE_BRANCH_IDS.to_vec(),
            order_by: "Date".to_string(),
            ascending: true,
            mapping: product_date_wise_sale,
        }
    }
}

/// Immutable set of reports known to this process
#[derive(Debug, Clone)]
pub struct ReportRegistry {
    reports: Arc<BTreeMap<String, ReportDefinition>>,
}

impl ReportRegistry {
    pub fn new(reports: impl IntoIterator<Item = ReportDefinition>) -> Self {
        Self {
            reports: Arc::new(reports.into_iter().map(|r| (r.id.clone(), r)).collect()),
        }
    }

    /// Registry with the built-in reports
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self::new([ReportDefinition::product_date_wise_sale(&config.base_url)])
    }

    pub fn get(&self, id: &str) -> Result<&ReportDefinition, SalesfeedError> {
        self.reports
            .get(id)
            .ok_or_else(|| SalesfeedError::UnknownReport(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.reports.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.reports.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = ReportRegistry::new([ReportDefinition::product_date_wise_sale(
            "https://example.test/api/",
        )]);

        let report = registry.get(PRODUCT_DATE_WISE_SALE).unwrap();
        assert_eq!(
            report.url,
            "https://example.test/api/Reports/ProductDateWiseSaleReport"
        );
        assert_eq!(report.order_by, "Date");
        assert!(report.ascending);
        assert!(!report.branch_ids.is_empty());

        assert!(matches!(
            registry.get("StockReport"),
            Err(SalesfeedError::UnknownReport(_))
        ));
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![PRODUCT_DATE_WISE_SALE]);
    }
}
