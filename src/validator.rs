//! Route-aware parameter validation
//!
//! Declares per-route requirements and checks the extracted parameters
//! against them before anything is dispatched. Extraction errors recorded
//! by earlier stages turn fatal here when the active route needed the
//! field they describe.

use crate::error::ErrorCode;
use crate::models::{
    ExtractedParams, QueryType, RouteDecision, ValidationCode, ValidationResult,
};
use chrono::NaiveDate;
use tracing::debug;

pub const MAX_LIMIT: u32 = 1000;
pub const MAX_STOCKS_PER_QUERY: usize = 10;
/// Widest accepted explicit range, in calendar days.
pub const MAX_RANGE_DAYS: i64 = 1825;
/// Past this many stocks the comparison output gets unwieldy.
const STOCK_COUNT_WARNING_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct RouteRequirements {
    /// Route needs a resolved stock or sector (unless it is a ranking).
    pub needs_entity: bool,
}

pub fn requirements(category: QueryType) -> RouteRequirements {
    match category {
        QueryType::Financial | QueryType::MoneyFlow => RouteRequirements { needs_entity: true },
        _ => RouteRequirements { needs_entity: false },
    }
}

/// Validate `params` against the requirements of `decision`.
/// `latest_session` is the most recent trading session with data.
pub fn validate(
    decision: &RouteDecision,
    params: &ExtractedParams,
    latest_session: NaiveDate,
) -> ValidationResult {
    let reqs = requirements(decision.category);
    let is_ranking = params.limit.is_some() || params.sort.is_some();

    // Hard extraction failures are fatal regardless of route: the user
    // explicitly wrote something unparseable.
    if let Some(err) = &params.error {
        if matches!(
            err.code,
            ErrorCode::UnresolvableExpression | ErrorCode::InvalidCodeFormat
        ) {
            return ValidationResult::fail(ValidationCode::ExtractionFailed, err.message.clone());
        }
    }

    if let Some(limit) = params.limit {
        if limit < 1 || limit > MAX_LIMIT {
            return ValidationResult::fail(
                ValidationCode::LimitOutOfRange,
                format!("数量{}超出范围，应在1到{}之间", limit, MAX_LIMIT),
            );
        }
    }

    if params.stocks.len() > MAX_STOCKS_PER_QUERY {
        return ValidationResult::fail(
            ValidationCode::TooManyStocks,
            format!(
                "单次查询最多支持{}只股票，当前{}只",
                MAX_STOCKS_PER_QUERY,
                params.stocks.len()
            ),
        );
    }

    if is_ranking && params.stocks.len() == 1 && params.sector.is_none() {
        return ValidationResult::fail(
            ValidationCode::RankingOnSingleEntity,
            "排名查询不能只针对单只股票".to_string(),
        );
    }

    if params.date.is_some() && params.date_range.is_some() {
        return ValidationResult::fail(
            ValidationCode::DateConflict,
            "日期和日期范围不能同时指定".to_string(),
        );
    }

    if let Some(date) = params.date {
        if date > latest_session {
            return ValidationResult::fail(
                ValidationCode::FutureDate,
                format!("{}晚于最近交易日{}", date, latest_session),
            );
        }
    }

    if let Some((start, end)) = params.date_range {
        if start > end {
            return ValidationResult::fail(
                ValidationCode::InvalidDateRange,
                format!("起始日期{}晚于结束日期{}", start, end),
            );
        }
        if (end - start).num_days() > MAX_RANGE_DAYS {
            return ValidationResult::fail(
                ValidationCode::DateRangeTooLarge,
                format!("日期范围超过{}天上限", MAX_RANGE_DAYS),
            );
        }
    }

    if reqs.needs_entity && !params.has_entity() && !is_ranking {
        // A recorded near-miss explains the gap better than a generic
        // "missing entity".
        if let Some(err) = &params.error {
            let code = if err.field == "sector"
                && err.code == ErrorCode::MissingRequiredField
            {
                ValidationCode::MissingSectorSuffix
            } else {
                ValidationCode::ExtractionFailed
            };
            return ValidationResult::fail(code, err.message.clone());
        }
        return ValidationResult::fail(
            ValidationCode::MissingRequiredEntity,
            "该查询需要指定股票或板块".to_string(),
        );
    }

    if params.sort.is_some() && params.limit.is_none() {
        return ValidationResult::fail(
            ValidationCode::MissingRequiredLimit,
            "排序查询需要指定数量".to_string(),
        );
    }

    let mut result = ValidationResult::ok();
    if let Some(err) = &params.error {
        // Non-fatal on this route; keep it visible.
        result.add_warning(err.message.clone());
    }
    if params.stocks.len() > STOCK_COUNT_WARNING_THRESHOLD {
        result.add_warning(format!("一次对比{}只股票，结果可能较长", params.stocks.len()));
    }
    debug!(warnings = result.warnings.len(), "validation passed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ExtractionError, HandlerKind, SectorKind, SectorRef, SortDirection, SortSpec,
    };

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn latest() -> NaiveDate {
        d(2025, 7, 11)
    }

    fn money_flow_route() -> RouteDecision {
        RouteDecision::single(
            QueryType::MoneyFlow,
            HandlerKind::FundFlowAnalysis,
            "test",
        )
    }

    fn sql_route() -> RouteDecision {
        RouteDecision::single(QueryType::SqlOnly, HandlerKind::StructuredData, "test")
    }

    #[test]
    fn test_zero_limit_is_out_of_range() {
        let mut params = ExtractedParams::new("主力净流入前0只的股票");
        params.limit = Some(0);
        let result = validate(&money_flow_route(), &params, latest());
        assert!(!result.is_valid);
        assert_eq!(result.error_code, Some(ValidationCode::LimitOutOfRange));
        assert_eq!(
            ValidationCode::LimitOutOfRange.error_code(),
            ErrorCode::OutOfRange
        );
    }

    #[test]
    fn test_oversized_limit_is_out_of_range() {
        let mut params = ExtractedParams::new("涨幅前2000的股票");
        params.limit = Some(2000);
        let result = validate(&sql_route(), &params, latest());
        assert_eq!(result.error_code, Some(ValidationCode::LimitOutOfRange));
    }

    #[test]
    fn test_missing_sector_suffix_is_fatal_on_flow_route() {
        let mut params = ExtractedParams::new("银行的主力资金");
        params.error = Some(ExtractionError {
            code: ErrorCode::MissingRequiredField,
            field: "sector".to_string(),
            message: "板块名称缺少类型后缀".to_string(),
            suggestion: Some("银行板块".to_string()),
        });
        let result = validate(&money_flow_route(), &params, latest());
        assert!(!result.is_valid);
        assert_eq!(result.error_code, Some(ValidationCode::MissingSectorSuffix));
    }

    #[test]
    fn test_entity_near_miss_is_fatal_when_entity_needed() {
        let mut params = ExtractedParams::new("茅台的财务健康度");
        params.error = Some(ExtractionError {
            code: ErrorCode::EntityNotFound,
            field: "stock".to_string(),
            message: "'茅台'是简称，不能直接使用".to_string(),
            suggestion: Some("贵州茅台".to_string()),
        });
        let route = RouteDecision::single(
            QueryType::Financial,
            HandlerKind::StatementAnalysis,
            "test",
        );
        let result = validate(&route, &params, latest());
        assert!(!result.is_valid);
        assert_eq!(result.error_code, Some(ValidationCode::ExtractionFailed));
    }

    #[test]
    fn test_near_miss_is_warning_when_entity_not_needed() {
        let mut params = ExtractedParams::new("涨幅前10");
        params.limit = Some(10);
        params.error = Some(ExtractionError {
            code: ErrorCode::EntityNotFound,
            field: "stock".to_string(),
            message: "未找到股票".to_string(),
            suggestion: None,
        });
        let result = validate(&sql_route(), &params, latest());
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_future_date_rejected() {
        let mut params = ExtractedParams::new("贵州茅台2025-12-01的股价");
        params.stocks = vec!["600519.SH".to_string()];
        params.stock_names = vec!["贵州茅台".to_string()];
        params.date = Some(d(2025, 12, 1));
        let result = validate(&sql_route(), &params, latest());
        assert_eq!(result.error_code, Some(ValidationCode::FutureDate));
    }

    #[test]
    fn test_ranking_on_single_stock_conflicts() {
        let mut params = ExtractedParams::new("贵州茅台市值排名");
        params.stocks = vec!["600519.SH".to_string()];
        params.stock_names = vec!["贵州茅台".to_string()];
        params.limit = Some(10);
        params.sort = Some(SortSpec {
            field: "total_mv".to_string(),
            direction: SortDirection::Desc,
        });
        let result = validate(&sql_route(), &params, latest());
        assert_eq!(
            result.error_code,
            Some(ValidationCode::RankingOnSingleEntity)
        );
    }

    #[test]
    fn test_too_many_stocks() {
        let mut params = ExtractedParams::new("十一只股票");
        params.stocks = (0..11).map(|i| format!("60000{}.SH", i)).collect();
        params.stock_names = (0..11).map(|i| format!("股票{}", i)).collect();
        let result = validate(&sql_route(), &params, latest());
        assert_eq!(result.error_code, Some(ValidationCode::TooManyStocks));
    }

    #[test]
    fn test_sector_scoped_flow_query_passes() {
        let mut params = ExtractedParams::new("银行板块的主力资金流向");
        params.sector = Some(SectorRef {
            display_name: "银行板块".to_string(),
            code: "BK0475.DC".to_string(),
            kind: SectorKind::Industry,
        });
        let result = validate(&money_flow_route(), &params, latest());
        assert!(result.is_valid);
    }
}
