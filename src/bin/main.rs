use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use stock_query_engine::{
    dispatch::HandlerRegistry,
    engine::QueryEngine,
    handlers::StaticHandler,
    models::{HandlerKind, SectorKind, SectorRecord, StockRecord},
    reference::{CalendarCache, FixedCalendarSource, InMemoryReferenceSource, ReferenceCache},
};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CACHE_TTL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Stock Query Engine demo starting");

    let engine = build_demo_engine();
    let today = NaiveDate::from_ymd_opt(2025, 7, 11).unwrap_or_default();

    let queries = [
        "贵州茅台的最新股价",
        "银行板块的主力资金流向",
        "茅台的财务健康度",
        "主力净流入前0只的股票",
        "贵州茅台今天涨幅这么大的原因是什么，有相关公告吗",
    ];

    for query in queries {
        let response = engine.resolve_and_route_at(query, today).await;
        println!("\n=== {} ===", query);
        println!("route: {} | success: {}", response.route_type, response.success);
        if let Some(payload) = &response.payload {
            println!("{}", payload.text);
        }
        if let Some(error) = &response.error {
            println!(
                "error[{:?}]: {}{}",
                error.code,
                error.message,
                error
                    .suggestion
                    .as_deref()
                    .map(|s| format!("（建议：{}）", s))
                    .unwrap_or_default()
            );
        }
    }

    Ok(())
}

/// Fixture-backed engine: a small reference table, a weekday calendar, and
/// scripted handlers standing in for the real backends.
fn build_demo_engine() -> QueryEngine {
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
            name: "建设银行".to_string(),
            code: "601939.SH".to_string(),
        },
    ];
    let sectors = vec![SectorRecord {
        name: "银行".to_string(),
        code: "BK0475.DC".to_string(),
        kind: SectorKind::Industry,
    }];

    let reference = Arc::new(ReferenceCache::new(
        Arc::new(InMemoryReferenceSource::new(stocks, sectors)),
        CACHE_TTL,
    ));
    let calendar = Arc::new(CalendarCache::new(
        Arc::new(FixedCalendarSource::weekdays(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            NaiveDate::from_ymd_opt(2025, 7, 11).unwrap_or_default(),
        )),
        CACHE_TTL,
    ));

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(StaticHandler::new(
        HandlerKind::StructuredData,
        json!([{
            "name": "贵州茅台",
            "ts_code": "600519.SH",
            "trade_date": "20250711",
            "close": 1835.0,
            "pct_chg": 5.2,
            "amount": 2_340_000_000.0,
        }]),
    )));
    registry.register(Arc::new(StaticHandler::new(
        HandlerKind::DocumentRetrieval,
        json!({"text": "公司于近期发布半年度业绩预告，营收同比增长约18%。"}),
    )));
    registry.register(Arc::new(StaticHandler::new(
        HandlerKind::StatementAnalysis,
        json!({"summary": "盈利能力稳健，现金流充裕，负债率处于行业低位。"}),
    )));
    registry.register(Arc::new(StaticHandler::new(
        HandlerKind::FundFlowAnalysis,
        json!([{
            "name": "银行",
            "trade_date": "20250711",
            "net_amount": 1_560_000_000.0,
        }]),
    )));

    QueryEngine::new(reference, calendar, registry)
}
