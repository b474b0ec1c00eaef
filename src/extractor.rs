//! Parameter extraction pipeline
//!
//! Turns raw query text into the structured parameter bag. Stages run in a
//! fixed order: stocks, sector, date, limit, sort. A stage that cannot
//! resolve its field attaches a non-fatal extraction error; the validator
//! decides later whether the active route actually needed it.

use crate::calendar::DateResolver;
use crate::error::Result;
use crate::models::{ExtractedParams, ExtractionError, SortDirection, SortSpec, TimeExpression};
use crate::numerals;
use crate::reference::{CalendarCache, ReferenceCache};
use crate::resolver::{sector, stock};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

/// Applied when a ranking cue appears without an explicit count.
pub const DEFAULT_RANKING_LIMIT: u32 = 10;

/// Phrases marking a ranking query. "最新" is deliberately absent.
const RANKING_CUES: &[&str] = &[
    "排名", "排行", "榜单", "榜", "TOP", "top", "最大", "最小", "最高", "最低",
    "最多", "最少",
];

/// (cue, sort field, direction) in match priority order.
const SORT_CUES: &[(&str, &str, SortDirection)] = &[
    ("主力净流入", "net_amount", SortDirection::Desc),
    ("净流入", "net_amount", SortDirection::Desc),
    ("净流出", "net_amount", SortDirection::Asc),
    ("涨幅", "pct_chg", SortDirection::Desc),
    ("跌幅", "pct_chg", SortDirection::Asc),
    ("成交量", "vol", SortDirection::Desc),
    ("成交额", "amount", SortDirection::Desc),
    ("换手率", "turnover_rate", SortDirection::Desc),
    ("市值", "total_mv", SortDirection::Desc),
];

/// Temporal unit markers whose preceding digits must never be read as a
/// count qualifier.
const TEMPORAL_MARKERS: &[&str] = &[
    "个交易日前", "交易日前", "个交易日", "交易日", "个季度", "个星期", "个月",
    "天前", "日前", "年", "月", "日", "天", "周",
];

pub struct ParameterExtractor {
    reference: Arc<ReferenceCache>,
    dates: DateResolver,
}

impl ParameterExtractor {
    pub fn new(reference: Arc<ReferenceCache>, calendar: Arc<CalendarCache>) -> Self {
        Self {
            reference,
            dates: DateResolver::new(calendar),
        }
    }

    pub async fn extract(&self, text: &str, today: NaiveDate) -> Result<ExtractedParams> {
        let snap = self.reference.snapshot().await?;
        let mut params = ExtractedParams::new(text);

        // Stocks
        let stocks = stock::extract_stocks(&snap, text);
        params.stocks = stocks.codes;
        params.stock_names = stocks.names;
        let mut error: Option<ExtractionError> = stocks.error;

        // Sector
        let sector_out = sector::extract_sector(&snap, text);
        params.sector = sector_out.sector;
        if error.is_none() {
            error = sector_out.error;
        }
        if error.is_none() && !params.has_entity() {
            error = sector::detect_bare_sector(&snap, text);
        }

        // Date / range
        match self.dates.resolve(text, today).await {
            Ok(Some(TimeExpression::Point { date })) => params.date = Some(date),
            Ok(Some(TimeExpression::Range { start, end })) => {
                params.date_range = Some((start, end))
            }
            Ok(None) => {}
            Err(err) => {
                if error.is_none() {
                    error = Some(ExtractionError::from_engine(&err, "date"));
                }
            }
        }

        // Limit. Year literals and temporal counts are masked first so
        // "2024年" or "最近3个月" never read as counts.
        let masked = mask_temporal_digits(text);
        params.limit = numerals::extract_limit(&masked);
        let has_ranking_cue = RANKING_CUES.iter().any(|cue| text.contains(cue));
        if params.limit.is_none() && has_ranking_cue {
            params.limit = Some(DEFAULT_RANKING_LIMIT);
        }

        // Sort spec, only meaningful on ranking queries.
        if has_ranking_cue || params.limit.is_some() {
            params.sort = SORT_CUES
                .iter()
                .find(|(cue, _, _)| text.contains(cue))
                .map(|(_, field, direction)| SortSpec {
                    field: (*field).to_string(),
                    direction: *direction,
                });
        }

        params.error = error;
        debug!(
            stocks = ?params.stocks,
            sector = ?params.sector.as_ref().map(|s| &s.display_name),
            date = ?params.date,
            range = ?params.date_range,
            limit = params.limit,
            "parameters extracted"
        );
        Ok(params)
    }
}

/// Blank out digit runs that belong to temporal expressions: "<digits><unit>"
/// for every temporal unit marker, plus 4-digit year literals.
fn mask_temporal_digits(text: &str) -> String {
    let normalized = numerals::normalize_quantities(text);
    let bytes = normalized.as_bytes();
    let mut masked: Vec<(usize, usize)> = Vec::new();

    for marker in TEMPORAL_MARKERS {
        let mut from = 0;
        while let Some(rel) = normalized[from..].find(marker) {
            let pos = from + rel;
            let digit_len = normalized[..pos]
                .bytes()
                .rev()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digit_len > 0 {
                masked.push((pos - digit_len, pos + marker.len()));
            }
            from = pos + marker.len();
        }
    }

    // Standalone 4-digit year-like runs ("2024-01-01" halves).
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let run = bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
            if run == 4 {
                if let Ok(value) = normalized[i..i + run].parse::<u32>() {
                    if (1990..=2100).contains(&value) {
                        masked.push((i, i + run));
                    }
                }
            }
            i += run;
        } else {
            i += 1;
        }
    }

    let mut out = String::with_capacity(normalized.len());
    for (idx, c) in normalized.char_indices() {
        if masked.iter().any(|(s, e)| idx >= *s && idx < *e) {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SectorKind, SectorRecord, StockRecord};
    use crate::reference::{FixedCalendarSource, InMemoryReferenceSource};
    use std::time::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn extractor() -> ParameterExtractor {
        let stocks = vec![
            StockRecord {
                name: "贵州茅台".to_string(),
                code: "600519.SH".to_string(),
            },
            StockRecord {
                name: "五粮液".to_string(),
                code: "000858.SZ".to_string(),
            },
        ];
        let sectors = vec![SectorRecord {
            name: "银行".to_string(),
            code: "BK0475.DC".to_string(),
            kind: SectorKind::Industry,
        }];
        let reference = Arc::new(ReferenceCache::new(
            Arc::new(InMemoryReferenceSource::new(stocks, sectors)),
            Duration::from_secs(3600),
        ));
        let calendar = Arc::new(CalendarCache::new(
            Arc::new(FixedCalendarSource::weekdays(d(2024, 1, 1), d(2025, 7, 11))),
            Duration::from_secs(3600),
        ));
        ParameterExtractor::new(reference, calendar)
    }

    #[tokio::test]
    async fn test_full_extraction() {
        let ex = extractor();
        let params = ex
            .extract("贵州茅台的最新股价", d(2025, 7, 11))
            .await
            .unwrap();
        assert_eq!(params.stocks, vec!["600519.SH"]);
        assert_eq!(params.date, Some(d(2025, 7, 11)));
        assert_eq!(params.limit, None);
        assert!(params.error.is_none());
    }

    #[tokio::test]
    async fn test_ranking_default_limit() {
        let ex = extractor();
        let params = ex.extract("涨幅排名的股票", d(2025, 7, 11)).await.unwrap();
        assert_eq!(params.limit, Some(DEFAULT_RANKING_LIMIT));
        let sort = params.sort.unwrap();
        assert_eq!(sort.field, "pct_chg");
        assert_eq!(sort.direction, SortDirection::Desc);
    }

    #[tokio::test]
    async fn test_explicit_limit_beats_default() {
        let ex = extractor();
        let params = ex
            .extract("市值排名前20的股票", d(2025, 7, 11))
            .await
            .unwrap();
        assert_eq!(params.limit, Some(20));
    }

    #[tokio::test]
    async fn test_year_literal_is_not_a_limit() {
        let ex = extractor();
        let params = ex
            .extract("贵州茅台2024年的营收", d(2025, 7, 11))
            .await
            .unwrap();
        assert_eq!(params.limit, None);
        assert_eq!(params.date_range, Some((d(2024, 1, 1), d(2024, 12, 31))));
    }

    #[tokio::test]
    async fn test_temporal_count_is_not_a_limit() {
        let ex = extractor();
        let params = ex
            .extract("贵州茅台最近3个月的走势", d(2025, 7, 11))
            .await
            .unwrap();
        assert_eq!(params.limit, None);
        assert!(params.date_range.is_some());
    }

    #[tokio::test]
    async fn test_zero_limit_survives_to_validation() {
        let ex = extractor();
        let params = ex
            .extract("主力净流入前0只的股票", d(2025, 7, 11))
            .await
            .unwrap();
        assert_eq!(params.limit, Some(0));
    }

    #[tokio::test]
    async fn test_bare_sector_attaches_suffix_error() {
        let ex = extractor();
        let params = ex.extract("银行的主力资金", d(2025, 7, 11)).await.unwrap();
        assert!(params.sector.is_none());
        let err = params.error.unwrap();
        assert_eq!(err.field, "sector");
        assert_eq!(err.suggestion.as_deref(), Some("银行板块"));
    }

    #[tokio::test]
    async fn test_date_and_range_never_both_set() {
        let ex = extractor();
        let params = ex
            .extract("贵州茅台最近一周的走势", d(2025, 7, 11))
            .await
            .unwrap();
        assert!(params.date.is_none());
        assert!(params.date_range.is_some());
    }
}
