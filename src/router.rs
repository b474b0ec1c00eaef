//! Query classification and routing
//!
//! A stateless ordered rule cascade over the query text and extracted
//! parameters. Composite detection runs first: single-domain patterns match
//! a strict subset of composite text, so checking them earlier would
//! misroute multi-aspect queries. Same input always produces the same
//! decision.

use crate::models::{
    CompositionMode, ExtractedParams, HandlerKind, QueryType, RouteDecision,
};
use tracing::debug;

//
// ================= Keyword tables =================
//

const MONEY_FLOW_KEYWORDS: &[&str] = &[
    "资金流向", "主力资金", "资金流入", "资金流出", "主力净流入", "净流入",
    "净流出", "大单", "超大单", "北向资金", "南向资金",
];

const FINANCIAL_ANALYSIS_KEYWORDS: &[&str] = &[
    "财务健康", "健康度", "盈利能力", "偿债能力", "偿债", "成长性", "杜邦",
    "现金流质量", "经营状况", "财务状况", "财务评级", "财务分析",
];

const FINANCIAL_METRIC_KEYWORDS: &[&str] = &[
    "营收", "净利润", "净利率", "毛利率", "负债率", "ROE", "ROA", "现金流",
    "财报", "利润",
];

const DOCUMENT_KEYWORDS: &[&str] = &[
    "公告", "年报", "研报", "半年报", "季报", "新闻", "消息", "解读",
    "发生了什么", "事件",
];

const MARKET_DATA_KEYWORDS: &[&str] = &[
    "股价", "收盘", "开盘", "最高价", "最低价", "涨幅", "跌幅", "涨跌",
    "成交量", "成交额", "市值", "换手率", "K线", "市盈率", "市净率", "排名",
    "排行", "走势", "龙虎榜",
];

/// Patterns that are market-data queries beyond doubt.
const MARKET_EXCLUSIVE_PATTERNS: &[&str] = &[
    "最新股价", "今日股价", "收盘价", "开盘价", "K线", "市值排名", "涨幅前",
    "跌幅前", "成交量排名", "换手率排名",
];

/// "data, then explain it" cues that force sequential composition.
const EXPLANATION_CUES: &[&str] = &["为什么", "原因", "怎么回事", "什么情况"];

/// "document, then quantify the impact" cues.
const IMPACT_CUES: &[&str] = &["影响", "对股价", "带来什么"];

/// Verbs that push a gated domain toward its analysis handler.
const ANALYTICAL_VERBS: &[&str] = &["分析", "评估", "怎么样", "如何", "诊断", "解析"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Domain {
    Market,
    Financial,
    MoneyFlow,
    Document,
}

impl Domain {
    fn handler(self) -> HandlerKind {
        match self {
            Domain::Market => HandlerKind::StructuredData,
            Domain::Financial => HandlerKind::StatementAnalysis,
            Domain::MoneyFlow => HandlerKind::FundFlowAnalysis,
            Domain::Document => HandlerKind::DocumentRetrieval,
        }
    }
}

/// Classify one query. Pure function of (text, params).
pub fn classify(text: &str, params: &ExtractedParams) -> RouteDecision {
    let decision = classify_inner(text, params);
    debug!(
        category = %decision.category,
        targets = ?decision.targets,
        reasoning = decision.reasoning,
        "query classified"
    );
    decision
}

fn classify_inner(text: &str, params: &ExtractedParams) -> RouteDecision {
    let domains = detect_domains(text);

    // Step 1: composite intent.
    if domains.len() >= 2 {
        return composite_route(text, &domains);
    }

    // Step 2: a lone data domain with causal phrasing still needs the
    // document branch to explain the numbers.
    if let Some(domain) = domains.first().filter(|d| **d != Domain::Document) {
        if EXPLANATION_CUES.iter().any(|c| text.contains(c)) {
            return RouteDecision {
                category: QueryType::SqlFirst,
                targets: vec![domain.handler(), HandlerKind::DocumentRetrieval],
                mode: CompositionMode::Sequential,
                reasoning: "data cue with explanation request",
            };
        }
    }

    // Step 3: exclusive market-data patterns.
    if MARKET_EXCLUSIVE_PATTERNS.iter().any(|p| text.contains(p)) {
        return RouteDecision::single(
            QueryType::SqlOnly,
            HandlerKind::StructuredData,
            "exclusive market-data pattern",
        );
    }

    // Step 4/5: single gated domain.
    match domains.first() {
        Some(Domain::MoneyFlow) => RouteDecision::single(
            QueryType::MoneyFlow,
            HandlerKind::FundFlowAnalysis,
            "money-flow vocabulary",
        ),
        Some(Domain::Financial) => {
            // Analytical intent gets the statement analyzer; a plain metric
            // question is a cheap structured lookup.
            let analytical = FINANCIAL_ANALYSIS_KEYWORDS.iter().any(|k| text.contains(k))
                || (ANALYTICAL_VERBS.iter().any(|v| text.contains(v)) && params.has_entity());
            if analytical {
                RouteDecision::single(
                    QueryType::Financial,
                    HandlerKind::StatementAnalysis,
                    "financial analysis vocabulary",
                )
            } else {
                RouteDecision::single(
                    QueryType::SqlOnly,
                    HandlerKind::StructuredData,
                    "financial metric lookup",
                )
            }
        }
        Some(Domain::Document) => RouteDecision::single(
            QueryType::RagOnly,
            HandlerKind::DocumentRetrieval,
            "document vocabulary",
        ),
        Some(Domain::Market) => RouteDecision::single(
            QueryType::SqlOnly,
            HandlerKind::StructuredData,
            "market-data vocabulary",
        ),
        None => RouteDecision {
            category: QueryType::Unknown,
            targets: Vec::new(),
            mode: CompositionMode::Single,
            reasoning: "no domain cue matched",
        },
    }
}

/// Domains with at least one cue in the text, in fixed order.
fn detect_domains(text: &str) -> Vec<Domain> {
    let mut domains = Vec::new();

    if MONEY_FLOW_KEYWORDS.iter().any(|k| text.contains(k)) {
        domains.push(Domain::MoneyFlow);
    }
    if FINANCIAL_ANALYSIS_KEYWORDS
        .iter()
        .chain(FINANCIAL_METRIC_KEYWORDS.iter())
        .any(|k| text.contains(k))
    {
        domains.push(Domain::Financial);
    }
    if DOCUMENT_KEYWORDS.iter().any(|k| text.contains(k)) {
        domains.push(Domain::Document);
    }
    if MARKET_DATA_KEYWORDS.iter().any(|k| text.contains(k)) {
        domains.push(Domain::Market);
    }

    domains.sort_unstable();
    domains
}

fn composite_route(text: &str, domains: &[Domain]) -> RouteDecision {
    let has_document = domains.contains(&Domain::Document);
    let has_data = domains.iter().any(|d| *d != Domain::Document);

    // Causal phrasing orders the branches explicitly.
    if has_data && EXPLANATION_CUES.iter().any(|c| text.contains(c)) {
        let data_target = domains
            .iter()
            .find(|d| **d != Domain::Document)
            .map(|d| d.handler())
            .unwrap_or(HandlerKind::StructuredData);
        return RouteDecision {
            category: QueryType::SqlFirst,
            targets: vec![data_target, HandlerKind::DocumentRetrieval],
            mode: CompositionMode::Sequential,
            reasoning: "data cue with explanation request",
        };
    }
    if has_document && IMPACT_CUES.iter().any(|c| text.contains(c)) {
        return RouteDecision {
            category: QueryType::RagFirst,
            targets: vec![HandlerKind::DocumentRetrieval, HandlerKind::StructuredData],
            mode: CompositionMode::Concurrent,
            reasoning: "document cue with quantitative impact request",
        };
    }

    // Structured targets lead so table output precedes narrative.
    let mut targets: Vec<HandlerKind> = domains.iter().map(|d| d.handler()).collect();
    targets.sort_by_key(|t| match t {
        HandlerKind::StructuredData => 0,
        HandlerKind::FundFlowAnalysis => 1,
        HandlerKind::StatementAnalysis => 2,
        HandlerKind::DocumentRetrieval => 3,
    });
    targets.dedup();

    if targets.len() == 2 {
        RouteDecision {
            category: QueryType::Parallel,
            targets,
            mode: CompositionMode::Concurrent,
            reasoning: "cues from two domains",
        }
    } else {
        RouteDecision {
            category: QueryType::Complex,
            targets,
            mode: CompositionMode::Concurrent,
            reasoning: "cues from three or more domains",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedParams;

    fn params(text: &str) -> ExtractedParams {
        ExtractedParams::new(text)
    }

    #[test]
    fn test_market_data_routes_sql_only() {
        let text = "贵州茅台的最新股价";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::SqlOnly);
        assert_eq!(d.targets, vec![HandlerKind::StructuredData]);
        assert_eq!(d.mode, CompositionMode::Single);
    }

    #[test]
    fn test_money_flow_routes_fund_flow() {
        let text = "银行板块的主力资金流向";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::MoneyFlow);
        assert_eq!(d.targets, vec![HandlerKind::FundFlowAnalysis]);
    }

    #[test]
    fn test_financial_analysis_routes_statement_analyzer() {
        let text = "分析贵州茅台的财务健康度";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::Financial);
        assert_eq!(d.targets, vec![HandlerKind::StatementAnalysis]);
    }

    #[test]
    fn test_plain_metric_is_cheap_lookup() {
        let text = "贵州茅台的营收";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::SqlOnly);
        assert_eq!(d.targets, vec![HandlerKind::StructuredData]);
    }

    #[test]
    fn test_document_routes_rag_only() {
        let text = "贵州茅台的最新公告";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::RagOnly);
        assert_eq!(d.targets, vec![HandlerKind::DocumentRetrieval]);
    }

    #[test]
    fn test_composite_beats_single_domain() {
        // Price cue plus document cue must never collapse to SqlOnly.
        let text = "贵州茅台的股价和最新研报";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::Parallel);
        assert_eq!(d.mode, CompositionMode::Concurrent);
        assert_eq!(
            d.targets,
            vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval]
        );
    }

    #[test]
    fn test_explanation_request_is_sequential() {
        let text = "贵州茅台今天涨幅这么大的原因是什么，有相关公告吗";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::SqlFirst);
        assert_eq!(d.mode, CompositionMode::Sequential);
        assert_eq!(
            d.targets,
            vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval]
        );
    }

    #[test]
    fn test_explanation_without_document_cue_still_sequential() {
        // No announcement vocabulary, but the causal phrasing demands a
        // document branch after the data lookup.
        let text = "贵州茅台涨幅这么大的原因";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::SqlFirst);
        assert_eq!(d.mode, CompositionMode::Sequential);
        assert_eq!(
            d.targets,
            vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval]
        );
    }

    #[test]
    fn test_three_domains_is_complex() {
        let text = "贵州茅台的股价、主力资金流向和最新公告";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::Complex);
        assert_eq!(d.targets.len(), 3);
        assert_eq!(d.targets[0], HandlerKind::StructuredData);
    }

    #[test]
    fn test_unmatched_text_is_unknown() {
        let text = "今天天气怎么样";
        let d = classify(text, &params(text));
        assert_eq!(d.category, QueryType::Unknown);
        assert!(d.targets.is_empty());
    }

    #[test]
    fn test_same_input_same_decision() {
        let text = "对比贵州茅台和五粮液的营收";
        let first = classify(text, &params(text));
        for _ in 0..5 {
            let again = classify(text, &params(text));
            assert_eq!(again.category, first.category);
            assert_eq!(again.targets, first.targets);
        }
    }
}
