use crate::error::SalesfeedError;
use crate::model::SaleRecord;
use serde_json::Value;

/// Transform from one upstream report row into a [`SaleRecord`].
///
/// The mapping is report specific and swappable; the client only requires
/// that every array element produces exactly one record.
pub type FieldMapping = fn(&Value) -> SaleRecord;

/// Mapping for the product date-wise sale report
pub fn product_date_wise_sale(item: &Value) -> SaleRecord {
    SaleRecord {
        date: text_field(item, "date"),
        month: text_field(item, "monthName"),
        branch: text_field(item, "branchName"),
        code: text_field(item, "productCode"),
        product_name: text_field(item, "productName"),
        category: text_field(item, "productCategoryName"),
        sold_qty: number_field(item, "soldQuantity"),
        kind: text_field(item, "symbol"),
        total_sales: number_field(item, "includingTaxAmount"),
    }
}

/// Parse an upstream response body into records.
///
/// Only a JSON array is accepted; an empty array is a valid, empty report.
pub fn parse_report_body(body: &str, mapping: FieldMapping) -> Result<Vec<SaleRecord>, SalesfeedError> {
    let json: Value = serde_json::from_str(body)?;

    match json {
        Value::Array(items) => Ok(items.iter().map(mapping).collect()),
        other => Err(SalesfeedError::Malformed(format!(
            "expected a JSON array, got {}",
            json_kind(&other)
        ))),
    }
}

fn text_field(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        // Product codes occasionally arrive as bare numbers
        Some(other) => other.to_string(),
    }
}

fn number_field(item: &Value, key: &str) -> f64 {
    match item.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
