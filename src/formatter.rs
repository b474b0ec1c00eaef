//! Result formatting
//!
//! Stitches branch outcomes into the single response payload: exactly one
//! of TABLE, TEXT, or ERROR, always carrying the lossless structured data
//! next to the rendered view. Table branches precede narrative branches.

use crate::dispatch::DispatchOutcome;
use crate::error::ErrorCode;
use crate::models::ErrorBody;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultKind {
    Table,
    Text,
    Error,
}

/// The unified payload shape for every successful (or partially successful)
/// query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedResult {
    pub kind: ResultKind,
    /// Rendered view: markdown table, narrative text, or error message.
    pub text: String,
    /// Lossless structured payload, per branch.
    pub data: Value,
    /// Failures of individual branches inside a composite route.
    pub branch_errors: Vec<ErrorBody>,
}

//
// ================= Column typing =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Number,
    Money,
    Percent,
    Date,
}

lazy_static! {
    /// Explicit column name to type table; substring heuristics only run
    /// for names not listed here.
    static ref COLUMN_TYPES: HashMap<&'static str, ColumnType> = {
        let mut m = HashMap::new();
        for name in ["close", "open", "high", "low", "pre_close", "vol", "volume"] {
            m.insert(name, ColumnType::Number);
        }
        for name in [
            "amount", "net_amount", "net_mf_amount", "buy_lg_amount", "total_mv",
            "circ_mv", "market_cap", "revenue", "net_profit", "income",
        ] {
            m.insert(name, ColumnType::Money);
        }
        for name in ["pct_chg", "turnover_rate", "roe", "roa", "gross_margin"] {
            m.insert(name, ColumnType::Percent);
        }
        for name in ["trade_date", "ann_date", "end_date", "list_date"] {
            m.insert(name, ColumnType::Date);
        }
        m
    };
}

/// Preferred leading columns in rendered tables.
const PRIORITY_COLUMNS: &[&str] = &[
    "name", "ts_code", "code", "trade_date", "close", "pct_chg", "amount", "net_amount",
];

fn column_type(name: &str) -> Option<ColumnType> {
    if let Some(ty) = COLUMN_TYPES.get(name) {
        return Some(*ty);
    }
    let lower = name.to_lowercase();
    if ["amount", "income", "revenue", "profit", "_mv"]
        .iter()
        .any(|s| lower.contains(s))
    {
        return Some(ColumnType::Money);
    }
    if ["pct", "rate", "ratio"].iter().any(|s| lower.contains(s)) {
        return Some(ColumnType::Percent);
    }
    if ["date", "time"].iter().any(|s| lower.contains(s)) {
        return Some(ColumnType::Date);
    }
    None
}

//
// ================= Public entry points =================
//

/// Build the payload for a dispatch outcome with at least one successful
/// branch.
pub fn format_outcome(outcome: &DispatchOutcome) -> FormattedResult {
    let mut table_sections: Vec<String> = Vec::new();
    let mut text_sections: Vec<String> = Vec::new();
    let mut branch_errors: Vec<ErrorBody> = Vec::new();

    for branch in &outcome.branches {
        if !branch.success {
            branch_errors.push(ErrorBody {
                code: branch.error_code.unwrap_or(ErrorCode::HandlerFailed),
                message: format!(
                    "{}: {}",
                    branch.handler.name(),
                    branch.error.as_deref().unwrap_or("处理失败")
                ),
                suggestion: None,
            });
            continue;
        }
        match branch.data.as_ref().and_then(tabular_rows) {
            Some(rows) => table_sections.push(render_markdown_table(&rows)),
            None => {
                if let Some(data) = &branch.data {
                    text_sections.push(render_narrative(data));
                }
            }
        }
    }

    let kind = if !table_sections.is_empty() {
        ResultKind::Table
    } else if !text_sections.is_empty() {
        ResultKind::Text
    } else {
        ResultKind::Error
    };

    // Tables first, narrative after.
    let mut sections = table_sections;
    sections.extend(text_sections);
    if sections.is_empty() {
        sections.extend(branch_errors.iter().map(|e| e.message.clone()));
    }

    FormattedResult {
        kind,
        text: sections.join("\n\n"),
        data: serde_json::to_value(&outcome.branches).unwrap_or(Value::Null),
        branch_errors,
    }
}

/// Build the payload for a terminal error.
pub fn format_error(body: &ErrorBody) -> FormattedResult {
    let text = match &body.suggestion {
        Some(suggestion) => format!("{}（{}）", body.message, suggestion),
        None => body.message.clone(),
    };
    FormattedResult {
        kind: ResultKind::Error,
        text,
        data: serde_json::to_value(body).unwrap_or(Value::Null),
        branch_errors: Vec::new(),
    }
}

//
// ================= Table rendering =================
//

/// Rows when the value is tabular: an array of objects, or an object
/// carrying a "rows" array of objects.
fn tabular_rows(data: &Value) -> Option<Vec<serde_json::Map<String, Value>>> {
    let array = match data {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("rows") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    if array.is_empty() {
        return None;
    }
    let mut rows = Vec::with_capacity(array.len());
    for item in array {
        match item {
            Value::Object(map) => rows.push(map.clone()),
            _ => return None,
        }
    }
    Some(rows)
}

fn render_markdown_table(rows: &[serde_json::Map<String, Value>]) -> String {
    let columns = ordered_columns(rows);
    let mut out = String::new();

    out.push('|');
    for col in &columns {
        out.push_str(&format!(" {} |", col));
    }
    out.push_str("\n|");
    for _ in &columns {
        out.push_str(" --- |");
    }
    for row in rows {
        out.push_str("\n|");
        for col in &columns {
            let cell = row
                .get(col)
                .map(|v| render_cell(col, v))
                .unwrap_or_default();
            out.push_str(&format!(" {} |", cell));
        }
    }
    out
}

/// Priority columns in fixed order, then the rest in key order.
fn ordered_columns(rows: &[serde_json::Map<String, Value>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for priority in PRIORITY_COLUMNS {
        if rows[0].contains_key(*priority) {
            columns.push((*priority).to_string());
        }
    }
    for key in rows[0].keys() {
        if !columns.contains(key) {
            columns.push(key.clone());
        }
    }
    columns
}

fn render_cell(column: &str, value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    match column_type(column) {
        Some(ColumnType::Money) => match value.as_f64() {
            Some(n) => render_money(n),
            None => fallback_cell(value),
        },
        Some(ColumnType::Percent) => match value.as_f64() {
            Some(n) => format!("{:.2}%", n),
            None => fallback_cell(value),
        },
        Some(ColumnType::Date) => render_date(value),
        Some(ColumnType::Number) | None => fallback_cell(value),
    }
}

/// Large money values rescale to 亿/万 for readability.
fn render_money(n: f64) -> String {
    let abs = n.abs();
    if abs >= 1e8 {
        format!("{:.2}亿", n / 1e8)
    } else if abs >= 1e4 {
        format!("{:.2}万", n / 1e4)
    } else {
        format!("{:.2}", n)
    }
}

/// `YYYYMMDD` compact dates gain dashes; everything else passes through.
fn render_date(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}-{}-{}", &raw[..4], &raw[4..6], &raw[6..8])
    } else {
        raw
    }
}

fn fallback_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.abs() >= 10_000 {
                    return thousands(i);
                }
                return i.to_string();
            }
            match n.as_f64() {
                Some(f) => format!("{:.2}", f),
                None => n.to_string(),
            }
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn thousands(n: i64) -> String {
    let digits = n.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

//
// ================= Narrative rendering =================
//

fn render_narrative(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            for key in ["text", "summary", "analysis", "answer"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return s.clone();
                }
            }
            serde_json::to_string_pretty(data).unwrap_or_default()
        }
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BranchOutcome, HandlerKind};
    use serde_json::json;

    fn ok_branch(handler: HandlerKind, data: Value) -> BranchOutcome {
        BranchOutcome {
            handler,
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            elapsed_ms: 3,
        }
    }

    fn failed_branch(handler: HandlerKind) -> BranchOutcome {
        BranchOutcome {
            handler,
            success: false,
            data: None,
            error: Some("后端不可用".to_string()),
            error_code: Some(ErrorCode::HandlerFailed),
            elapsed_ms: 3,
        }
    }

    #[test]
    fn test_money_rescaling() {
        assert_eq!(render_money(1_234_000_000.0), "12.34亿");
        assert_eq!(render_money(56_780.0), "5.68万");
        assert_eq!(render_money(123.456), "123.46");
        assert_eq!(render_money(-250_000_000.0), "-2.50亿");
    }

    #[test]
    fn test_date_and_percent_cells() {
        assert_eq!(render_cell("trade_date", &json!("20250711")), "2025-07-11");
        assert_eq!(render_cell("pct_chg", &json!(5.234)), "5.23%");
    }

    #[test]
    fn test_thousands_separator() {
        assert_eq!(thousands(1234567), "1,234,567");
        assert_eq!(thousands(-9876), "-9,876");
    }

    #[test]
    fn test_table_render_with_typed_columns() {
        let rows = json!([
            {"name": "贵州茅台", "trade_date": "20250711", "close": 1835.0, "amount": 2_340_000_000.0}
        ]);
        let outcome = DispatchOutcome {
            branches: vec![ok_branch(HandlerKind::StructuredData, rows)],
        };
        let result = format_outcome(&outcome);
        assert_eq!(result.kind, ResultKind::Table);
        assert!(result.text.contains("| 贵州茅台 |"));
        assert!(result.text.contains("2025-07-11"));
        assert!(result.text.contains("23.40亿"));
    }

    #[test]
    fn test_table_precedes_narrative() {
        let outcome = DispatchOutcome {
            branches: vec![
                ok_branch(
                    HandlerKind::DocumentRetrieval,
                    json!({"text": "近期发布半年度业绩预告。"}),
                ),
                ok_branch(
                    HandlerKind::StructuredData,
                    json!([{"close": 1835.0}]),
                ),
            ],
        };
        let result = format_outcome(&outcome);
        assert_eq!(result.kind, ResultKind::Table);
        let table_pos = result.text.find("| close |").unwrap();
        let text_pos = result.text.find("业绩预告").unwrap();
        assert!(table_pos < text_pos);
    }

    #[test]
    fn test_partial_failure_embeds_branch_error() {
        let outcome = DispatchOutcome {
            branches: vec![
                ok_branch(HandlerKind::StructuredData, json!([{"close": 10.0}])),
                failed_branch(HandlerKind::DocumentRetrieval),
            ],
        };
        let result = format_outcome(&outcome);
        assert_eq!(result.kind, ResultKind::Table);
        assert_eq!(result.branch_errors.len(), 1);
        assert!(result.branch_errors[0].message.contains("document_retrieval"));
    }

    #[test]
    fn test_error_payload() {
        let body = ErrorBody {
            code: ErrorCode::EntityNotFound,
            message: "未找到股票'茅台'".to_string(),
            suggestion: Some("贵州茅台".to_string()),
        };
        let result = format_error(&body);
        assert_eq!(result.kind, ResultKind::Error);
        assert!(result.text.contains("贵州茅台"));
    }
}
