//! Report row types served to dashboards.

use serde::{Deserialize, Serialize};

/// One row of the product date-wise sales report.
///
/// Field names on the wire are the business column names the dashboards
/// read, not the upstream JSON keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    #[serde(rename = "Date")]
    pub date: String,

    #[serde(rename = "Month")]
    pub month: String,

    #[serde(rename = "Branch")]
    pub branch: String,

    #[serde(rename = "Code")]
    pub code: String,

    #[serde(rename = "Product Name")]
    pub product_name: String,

    #[serde(rename = "Category")]
    pub category: String,

    #[serde(rename = "SOLD QTY")]
    pub sold_qty: f64,

    /// Type/symbol tag as reported upstream
    #[serde(rename = "Type")]
    pub kind: String,

    /// Tax-inclusive sales amount
    #[serde(rename = "Total Sales")]
    pub total_sales: f64,
}
