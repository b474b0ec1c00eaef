//! Core data models for the query engine
//!
//! Everything here is created per incoming query and discarded once the
//! response is produced; nothing is persisted.

use crate::error::ErrorCode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Canonical Records =================
//

/// A canonical stock identity: the single authoritative (name, code) pair
/// every valid input naming that company resolves to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockRecord {
    /// Full registered company name, e.g. "贵州茅台"
    pub name: String,
    /// Exchange-qualified code, e.g. "600519.SH"
    pub code: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SectorKind {
    Industry,
    Concept,
    Region,
}

impl SectorKind {
    /// The descriptive suffix required on the echoed form of the name.
    pub fn suffix(&self) -> &'static str {
        match self {
            SectorKind::Industry => "板块",
            SectorKind::Concept => "概念",
            SectorKind::Region => "地域",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectorRecord {
    /// Canonical name without suffix, e.g. "银行"
    pub name: String,
    /// Board code, e.g. "BK0475.DC"
    pub code: String,
    pub kind: SectorKind,
}

/// A resolved sector reference as carried in extracted parameters.
/// `display_name` always carries the type suffix ("银行板块").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectorRef {
    pub display_name: String,
    pub code: String,
    pub kind: SectorKind,
}

//
// ================= Time =================
//

/// A resolved temporal expression. Points name exactly one trading session;
/// ranges are ordered pairs (start <= end).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TimeExpression {
    Point { date: NaiveDate },
    Range { start: NaiveDate, end: NaiveDate },
}

//
// ================= Extracted Parameters =================
//

/// Sort direction for ranking queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// A non-fatal extraction problem carried inside the parameter bag.
/// The validator turns it fatal only when the active route needs the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionError {
    pub code: ErrorCode,
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ExtractionError {
    pub fn from_engine(err: &crate::error::EngineError, field: &str) -> Self {
        Self {
            code: err.code(),
            field: field.to_string(),
            message: err.to_string(),
            suggestion: err.suggestion(),
        }
    }
}

/// The structured parameter bag produced from raw query text.
///
/// Invariants: `stocks` and `stock_names` are index-aligned;
/// `date` and `date_range` are never both set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedParams {
    pub stocks: Vec<String>,
    pub stock_names: Vec<String>,
    pub sector: Option<SectorRef>,
    pub date: Option<NaiveDate>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub limit: Option<u32>,
    pub sort: Option<SortSpec>,
    pub raw_query: String,
    pub error: Option<ExtractionError>,
}

impl ExtractedParams {
    pub fn new(raw_query: &str) -> Self {
        Self {
            raw_query: raw_query.to_string(),
            ..Default::default()
        }
    }

    /// True when at least one entity (stock or sector) resolved.
    pub fn has_entity(&self) -> bool {
        !self.stocks.is_empty() || self.sector.is_some()
    }

    pub fn time_expression(&self) -> Option<TimeExpression> {
        if let Some(date) = self.date {
            Some(TimeExpression::Point { date })
        } else {
            self.date_range
                .map(|(start, end)| TimeExpression::Range { start, end })
        }
    }
}

//
// ================= Routing =================
//

/// Query category decided by the classifier. One per query, deterministic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SqlOnly,
    RagOnly,
    Financial,
    MoneyFlow,
    SqlFirst,
    RagFirst,
    Parallel,
    Complex,
    Unknown,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryType::SqlOnly => "sql_only",
            QueryType::RagOnly => "rag_only",
            QueryType::Financial => "financial",
            QueryType::MoneyFlow => "money_flow",
            QueryType::SqlFirst => "sql_first",
            QueryType::RagFirst => "rag_first",
            QueryType::Parallel => "parallel",
            QueryType::Complex => "complex",
            QueryType::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Downstream handler identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    StructuredData,
    DocumentRetrieval,
    StatementAnalysis,
    FundFlowAnalysis,
}

impl HandlerKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::StructuredData => "structured_data",
            HandlerKind::DocumentRetrieval => "document_retrieval",
            HandlerKind::StatementAnalysis => "statement_analysis",
            HandlerKind::FundFlowAnalysis => "fund_flow_analysis",
        }
    }
}

/// How the targets of a route are executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    /// One handler, result passed through unchanged.
    Single,
    /// Two handlers in order; the first's output feeds the second's context.
    Sequential,
    /// All handlers fan out concurrently and join on every branch.
    Concurrent,
}

/// The routing decision for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub category: QueryType,
    pub targets: Vec<HandlerKind>,
    pub mode: CompositionMode,
    /// Short diagnostic tag naming the rule that fired.
    pub reasoning: &'static str,
}

impl RouteDecision {
    pub fn single(category: QueryType, target: HandlerKind, reasoning: &'static str) -> Self {
        Self {
            category,
            targets: vec![target],
            mode: CompositionMode::Single,
            reasoning,
        }
    }
}

//
// ================= Validation =================
//

/// Closed set of validation failure codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    MissingRequiredStock,
    MissingRequiredSector,
    MissingRequiredEntity,
    MissingSectorSuffix,
    MissingRequiredLimit,
    LimitOutOfRange,
    TooManyStocks,
    RankingOnSingleEntity,
    DateConflict,
    FutureDate,
    InvalidDateRange,
    DateRangeTooLarge,
    ExtractionFailed,
}

impl ValidationCode {
    /// The wire-level error code this validation failure surfaces as.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ValidationCode::MissingRequiredStock
            | ValidationCode::MissingRequiredSector
            | ValidationCode::MissingRequiredEntity
            | ValidationCode::MissingSectorSuffix
            | ValidationCode::MissingRequiredLimit => ErrorCode::MissingRequiredField,
            ValidationCode::LimitOutOfRange
            | ValidationCode::TooManyStocks
            | ValidationCode::InvalidDateRange
            | ValidationCode::DateRangeTooLarge => ErrorCode::OutOfRange,
            ValidationCode::FutureDate => ErrorCode::FutureDate,
            ValidationCode::RankingOnSingleEntity | ValidationCode::DateConflict => {
                ErrorCode::CrossFieldConflict
            }
            ValidationCode::ExtractionFailed => ErrorCode::InvalidInput,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error_code: Option<ValidationCode>,
    pub detail: Option<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            is_valid: true,
            error_code: None,
            detail: None,
            warnings: Vec::new(),
        }
    }

    pub fn fail(code: ValidationCode, detail: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_code: Some(code),
            detail: Some(detail.into()),
            warnings: Vec::new(),
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

//
// ================= Handler I/O =================
//

/// Request handed to a downstream domain handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerRequest {
    pub query: String,
    pub params: ExtractedParams,
    /// Output of an earlier handler on sequential routes.
    pub context: Option<serde_json::Value>,
}

/// Raw reply from a downstream handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerReply {
    pub success: bool,
    pub data: serde_json::Value,
    pub error: Option<String>,
}

/// Outcome of one branch inside a composite route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchOutcome {
    pub handler: HandlerKind,
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub elapsed_ms: u64,
}

//
// ================= Engine Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub query_id: Uuid,
    pub route_reasoning: String,
    pub elapsed_ms: u64,
}

/// The single unified response shape produced for every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub route_type: QueryType,
    pub payload: Option<crate::formatter::FormattedResult>,
    pub error: Option<ErrorBody>,
    pub diagnostics: Diagnostics,
}
