//! End-to-end pipeline tests against fixture data sources and scripted
//! handlers.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stock_query_engine::{
    dispatch::{HandlerRegistry, QueryHandler},
    engine::QueryEngine,
    handlers::{FailingHandler, StaticHandler},
    models::{HandlerKind, HandlerReply, HandlerRequest, QueryType, SectorKind, SectorRecord, StockRecord},
    reference::{CalendarCache, FixedCalendarSource, InMemoryReferenceSource, ReferenceCache},
    ErrorCode, Result, ResultKind,
};

const TTL: Duration = Duration::from_secs(3600);

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn today() -> NaiveDate {
    // A Friday trading session in the fixture calendar.
    d(2025, 7, 11)
}

/// Reflects the extracted parameters back so tests can observe what the
/// pipeline resolved.
struct ParamsEcho(HandlerKind);

#[async_trait]
impl QueryHandler for ParamsEcho {
    fn kind(&self) -> HandlerKind {
        self.0
    }

    async fn handle(&self, request: HandlerRequest) -> Result<HandlerReply> {
        Ok(HandlerReply {
            success: true,
            data: json!({ "params": request.params }),
            error: None,
        })
    }
}

fn reference() -> Arc<ReferenceCache> {
    let stocks = vec![
        StockRecord {
            name: "贵州茅台".to_string(),
            code: "600519.SH".to_string(),
        },
        StockRecord {
            name: "五粮液".to_string(),
            code: "000858.SZ".to_string(),
        },
        StockRecord {
            name: "平安银行".to_string(),
            code: "000001.SZ".to_string(),
        },
        StockRecord {
            name: "中国平安".to_string(),
            code: "601318.SH".to_string(),
        },
    ];
    let sectors = vec![SectorRecord {
        name: "银行".to_string(),
        code: "BK0475.DC".to_string(),
        kind: SectorKind::Industry,
    }];
    Arc::new(ReferenceCache::new(
        Arc::new(InMemoryReferenceSource::new(stocks, sectors)),
        TTL,
    ))
}

fn calendar() -> Arc<CalendarCache> {
    Arc::new(CalendarCache::new(
        Arc::new(FixedCalendarSource::weekdays(d(2024, 1, 1), d(2025, 7, 11))),
        TTL,
    ))
}

fn echo_engine() -> QueryEngine {
    let mut registry = HandlerRegistry::new();
    for kind in [
        HandlerKind::StructuredData,
        HandlerKind::DocumentRetrieval,
        HandlerKind::StatementAnalysis,
        HandlerKind::FundFlowAnalysis,
    ] {
        registry.register(Arc::new(ParamsEcho(kind)));
    }
    QueryEngine::new(reference(), calendar(), registry)
}

#[tokio::test]
async fn scenario_latest_price_resolves_code_and_session() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("贵州茅台的最新股价", today())
        .await;

    assert!(response.success);
    assert_eq!(response.route_type, QueryType::SqlOnly);

    let payload = response.payload.unwrap();
    let params = &payload.data[0]["data"]["params"];
    assert_eq!(params["stocks"], json!(["600519.SH"]));
    assert_eq!(params["stock_names"], json!(["贵州茅台"]));
    // Today trades, so "最新" is today, never an earlier session.
    assert_eq!(params["date"], json!("2025-07-11"));
}

#[tokio::test]
async fn scenario_bare_sector_is_rejected_with_suffix_hint() {
    let engine = echo_engine();
    let response = engine.resolve_and_route_at("银行的主力资金", today()).await;

    assert!(!response.success);
    assert_eq!(response.route_type, QueryType::MoneyFlow);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::MissingRequiredField);
    assert_eq!(error.suggestion.as_deref(), Some("银行板块"));
}

#[tokio::test]
async fn scenario_nickname_is_rejected_with_full_name() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("茅台的财务健康度", today())
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::EntityNotFound);
    assert_eq!(error.suggestion.as_deref(), Some("贵州茅台"));
}

#[tokio::test]
async fn scenario_zero_limit_is_out_of_range() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("主力净流入前0只的股票", today())
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::OutOfRange);
}

#[tokio::test]
async fn ambiguous_span_is_never_silently_picked() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("分析平安的财务状况", today())
        .await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::EntityAmbiguous);
    let suggestion = error.suggestion.unwrap();
    assert!(suggestion.contains("平安银行"));
    assert!(suggestion.contains("中国平安"));
}

#[tokio::test]
async fn composite_query_routes_both_branches() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("贵州茅台的股价和最新研报", today())
        .await;

    assert!(response.success);
    assert_eq!(response.route_type, QueryType::Parallel);
    let payload = response.payload.unwrap();
    assert_eq!(payload.data.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn partial_branch_failure_is_still_a_success() {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(StaticHandler::new(
        HandlerKind::StructuredData,
        json!([{ "name": "贵州茅台", "close": 1835.0 }]),
    )));
    registry.register(Arc::new(FailingHandler::new(
        HandlerKind::DocumentRetrieval,
        "检索后端不可用",
    )));
    let engine = QueryEngine::new(reference(), calendar(), registry);

    let response = engine
        .resolve_and_route_at("贵州茅台的股价和最新研报", today())
        .await;

    assert!(response.success);
    let payload = response.payload.unwrap();
    assert_eq!(payload.kind, ResultKind::Table);
    assert_eq!(payload.branch_errors.len(), 1);
    assert!(payload.branch_errors[0].message.contains("document_retrieval"));
}

#[tokio::test]
async fn all_branches_failed_is_an_aggregate_error() {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(FailingHandler::new(
        HandlerKind::StructuredData,
        "数据后端不可用",
    )));
    let engine = QueryEngine::new(reference(), calendar(), registry);

    let response = engine
        .resolve_and_route_at("贵州茅台的最新股价", today())
        .await;

    assert!(!response.success);
    assert_eq!(response.error.unwrap().code, ErrorCode::AllBranchesFailed);
    // Per-branch detail remains available.
    assert!(response.payload.is_some());
}

#[tokio::test]
async fn point_and_range_expressions_stay_distinct() {
    let engine = echo_engine();

    let response = engine
        .resolve_and_route_at("贵州茅台昨天的股价", today())
        .await;
    let payload = response.payload.unwrap();
    let params = &payload.data[0]["data"]["params"];
    assert_eq!(params["date"], json!("2025-07-10"));
    assert_eq!(params["date_range"], json!(null));

    // Saturday reference date: the 5-session window ends the day before.
    let response = engine
        .resolve_and_route_at("贵州茅台最近一周的走势", d(2025, 7, 12))
        .await;
    let payload = response.payload.unwrap();
    let params = &payload.data[0]["data"]["params"];
    assert_eq!(params["date"], json!(null));
    assert_eq!(params["date_range"], json!(["2025-07-07", "2025-07-11"]));
}

#[tokio::test]
async fn decimal_amounts_are_not_mistaken_for_codes() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("成交额超过123456.78元的股票涨幅", today())
        .await;

    assert!(response.success);
    assert_eq!(response.route_type, QueryType::SqlOnly);
    assert!(response.error.is_none());
}

#[tokio::test]
async fn unknown_query_is_rejected_not_dispatched() {
    let engine = echo_engine();
    let response = engine
        .resolve_and_route_at("今天天气怎么样", today())
        .await;

    assert!(!response.success);
    assert_eq!(response.route_type, QueryType::Unknown);
    assert_eq!(response.error.unwrap().code, ErrorCode::UnknownQuery);
}

#[tokio::test]
async fn empty_and_contentless_input_rejected() {
    let engine = echo_engine();

    let response = engine.resolve_and_route_at("   ", today()).await;
    assert_eq!(response.error.unwrap().code, ErrorCode::EmptyInput);

    let response = engine.resolve_and_route_at("？？？", today()).await;
    assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn same_query_same_outcome() {
    let engine = echo_engine();
    let first = engine
        .resolve_and_route_at("对比贵州茅台和五粮液的营收", today())
        .await;
    for _ in 0..3 {
        let again = engine
            .resolve_and_route_at("对比贵州茅台和五粮液的营收", today())
            .await;
        assert_eq!(again.success, first.success);
        assert_eq!(again.route_type, first.route_type);
    }
}
