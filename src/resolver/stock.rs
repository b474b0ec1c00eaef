//! Stock identity resolution
//!
//! Three accepted input forms: full registered name, bare 6-digit code,
//! exchange-qualified code `DDDDDD.{SH|SZ|BJ}` with the suffix in exact
//! upper case. Everything else gets a typed rejection with a suggestion;
//! nicknames are never silently expanded.

use crate::error::{EngineError, Result};
use crate::models::{ExtractionError, StockRecord};
use crate::reference::ReferenceSnapshot;
use crate::resolver::sector;
use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::debug;

pub const VALID_EXCHANGE_SUFFIXES: &[&str] = &["SH", "SZ", "BJ"];

/// Per-query stock cap lives in the validator; this is only the candidate
/// list cap for ambiguity messages.
const MAX_LISTED_CANDIDATES: usize = 5;

const INPUT_FORMAT_HINT: &str =
    "请输入：1) 6位股票代码（如600519）2) 证券代码（如600519.SH）3) 完整股票名称（如贵州茅台）";

lazy_static! {
    /// Colloquial short names mapped to full registered names. Ambiguous
    /// nicknames ("平安" could be three different companies) are deliberately
    /// absent; those fall through to substring detection instead.
    static ref SHORT_NAMES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("茅台", "贵州茅台");
        m.insert("万科", "万科A");
        m.insert("格力", "格力电器");
        m.insert("美的", "美的集团");
        m.insert("建行", "建设银行");
        m.insert("工行", "工商银行");
        m.insert("农行", "农业银行");
        m.insert("中行", "中国银行");
        m.insert("招行", "招商银行");
        m.insert("中石油", "中国石油");
        m.insert("中石化", "中国石化");
        m
    };

    /// Query vocabulary stripped from a segment before span detection,
    /// longest first so compound phrases go before their parts.
    static ref SPAN_STOP_WORDS: Vec<&'static str> = {
        let mut words = vec![
            "财务健康度", "资金流向", "最新股价", "主力资金", "净流入", "净流出",
            "市盈率", "市净率", "成交量", "成交额", "涨跌幅", "怎么样", "为什么",
            "分析", "查询", "查看", "对比", "比较", "财务", "健康", "状况",
            "如何", "股价", "年报", "公告", "涨幅", "跌幅", "走势", "资金",
            "流向", "主力", "原因", "研报", "评估", "研究", "最近", "今天",
            "昨天", "最新", "排名", "排行", "板块", "行业", "概念",
            "前", "的", "和", "与", "及",
        ];
        words.sort_by_key(|w| std::cmp::Reverse(w.len()));
        words
    };
}

/// Connectors separating entities in multi-entity queries.
const ENTITY_CONNECTORS: &[&str] = &["和", "与", "及", "、", "，", ",", "VS", "vs"];

/// Result of extracting stocks from free query text. `codes` and `names`
/// are index-aligned and ordered by first appearance.
#[derive(Debug, Default)]
pub struct StockExtraction {
    pub codes: Vec<String>,
    pub names: Vec<String>,
    pub error: Option<ExtractionError>,
}

//
// ================= Single-span resolution =================
//

/// Resolve one explicit span to its canonical record.
pub fn resolve_span(snap: &ReferenceSnapshot, span: &str) -> Result<StockRecord> {
    let span = span.trim();
    if span.is_empty() {
        return Err(EngineError::EmptyInput);
    }

    if span.starts_with(|c: char| c.is_ascii_digit()) {
        return resolve_code(snap, span);
    }

    if let Some(record) = snap.stock_by_name(span) {
        return Ok(record.clone());
    }

    if let Some(full) = SHORT_NAMES.get(span) {
        if snap.stock_by_name(full).is_some() {
            return Err(EngineError::EntityNotFound {
                span: span.to_string(),
                suggestion: Some((*full).to_string()),
            });
        }
    }

    if span.chars().count() >= 2 {
        let candidates = snap.stock_names_containing(span);
        match candidates.len() {
            0 => {}
            1 => {
                return Err(EngineError::EntityNotFound {
                    span: span.to_string(),
                    suggestion: Some(candidates[0].to_string()),
                })
            }
            _ => {
                return Err(EngineError::EntityAmbiguous {
                    span: span.to_string(),
                    candidates: candidates
                        .into_iter()
                        .take(MAX_LISTED_CANDIDATES)
                        .map(str::to_string)
                        .collect(),
                })
            }
        }
    }

    Err(EngineError::EntityNotFound {
        span: span.to_string(),
        suggestion: Some(INPUT_FORMAT_HINT.to_string()),
    })
}

fn resolve_code(snap: &ReferenceSnapshot, token: &str) -> Result<StockRecord> {
    match token.split_once('.') {
        Some((digits, suffix)) => {
            if !digits.bytes().all(|b| b.is_ascii_digit()) || digits.len() != 6 {
                return Err(EngineError::InvalidCodeFormat {
                    detail: format!("代码数字部分为{}位，应为6位", digits.len()),
                    suggestion: Some(INPUT_FORMAT_HINT.to_string()),
                });
            }
            if suffix.is_empty() {
                return Err(EngineError::InvalidCodeFormat {
                    detail: format!("证券代码 {}. 缺少交易所后缀", digits),
                    suggestion: Some(format!("正确格式如：{}.SH", digits)),
                });
            }
            let upper = suffix.to_uppercase();
            if VALID_EXCHANGE_SUFFIXES.contains(&upper.as_str()) {
                if suffix != upper {
                    return Err(EngineError::InvalidCodeFormat {
                        detail: format!("后缀'{}'大小写错误", suffix),
                        suggestion: Some(format!("{}.{}", digits, upper)),
                    });
                }
            } else {
                return Err(EngineError::InvalidCodeFormat {
                    detail: format!("未知交易所后缀'{}'", suffix),
                    suggestion: Some("有效后缀为 SH、SZ、BJ".to_string()),
                });
            }
            snap.stock_by_code(token).cloned().ok_or_else(|| {
                EngineError::EntityNotFound {
                    span: token.to_string(),
                    suggestion: None,
                }
            })
        }
        None => {
            if !token.bytes().all(|b| b.is_ascii_digit()) {
                return Err(EngineError::InvalidCodeFormat {
                    detail: format!("无法解析的代码形式'{}'", token),
                    suggestion: Some(INPUT_FORMAT_HINT.to_string()),
                });
            }
            if token.len() != 6 {
                return Err(EngineError::InvalidCodeFormat {
                    detail: format!("股票代码为{}位，应为6位", token.len()),
                    suggestion: Some(INPUT_FORMAT_HINT.to_string()),
                });
            }
            snap.stock_by_bare_code(token).cloned().ok_or_else(|| {
                EngineError::EntityNotFound {
                    span: token.to_string(),
                    suggestion: None,
                }
            })
        }
    }
}

//
// ================= Free-text extraction =================
//

/// Extract every stock mentioned in `text`, de-duplicated by canonical code
/// in first-appearance order. Recoverable problems (nicknames, ambiguous
/// spans, malformed codes) are attached as a non-fatal extraction error.
pub fn extract_stocks(snap: &ReferenceSnapshot, text: &str) -> StockExtraction {
    let mut hits: Vec<(usize, usize, StockRecord)> = Vec::new();
    let mut error: Option<ExtractionError> = None;

    scan_code_tokens(snap, text, &mut hits, &mut error);

    for record in &snap.stocks {
        if let Some(pos) = text.find(&record.name) {
            hits.push((pos, record.name.len(), record.clone()));
        }
    }

    // Longest match at each position wins; overlapping shorter names drop.
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    let mut kept: Vec<(usize, usize, StockRecord)> = Vec::new();
    for hit in hits {
        let overlaps = kept
            .iter()
            .any(|k| hit.0 < k.0 + k.1 && k.0 < hit.0 + hit.1);
        if !overlaps {
            kept.push(hit);
        }
    }

    let mut extraction = StockExtraction::default();
    for (_, _, record) in &kept {
        if !extraction.codes.contains(&record.code) {
            extraction.codes.push(record.code.clone());
            extraction.names.push(record.name.clone());
        }
    }

    if extraction.codes.is_empty() && error.is_none() {
        error = detect_near_miss(snap, text);
    }
    if !extraction.codes.is_empty() {
        debug!(codes = ?extraction.codes, "stocks extracted");
    }
    extraction.error = error;
    extraction
}

/// Split multi-entity text on the standard connectors.
pub fn split_entities(text: &str) -> Vec<String> {
    let mut normalized = text.to_string();
    for connector in ENTITY_CONNECTORS {
        normalized = normalized.replace(connector, "\n");
    }
    normalized
        .split('\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scan for code-shaped tokens: 6 digits, optionally followed by a dot and
/// an alphabetic suffix. Malformed tokens become extraction errors; plain
/// decimals ("3.5") are left alone.
fn scan_code_tokens(
    snap: &ReferenceSnapshot,
    text: &str,
    hits: &mut Vec<(usize, usize, StockRecord)>,
    error: &mut Option<ExtractionError>,
) {
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let digit_len = bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
        let after = i + digit_len;
        let has_dot = bytes.get(after) == Some(&b'.');
        let suffix_len = if has_dot {
            bytes[after + 1..]
                .iter()
                .take_while(|b| b.is_ascii_alphabetic())
                .count()
        } else {
            0
        };

        // A fractional part means a plain decimal ("123456.78"), never a
        // malformed code.
        if has_dot
            && suffix_len == 0
            && bytes.get(after + 1).map_or(false, |b| b.is_ascii_digit())
        {
            let frac_len = bytes[after + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            i = after + 1 + frac_len;
            continue;
        }

        let code_shaped = digit_len == 6 || (has_dot && suffix_len > 0);
        if code_shaped {
            let token_end = if has_dot && (suffix_len > 0 || digit_len == 6) {
                after + 1 + suffix_len
            } else {
                after
            };
            let token = &text[i..token_end];
            match resolve_code(snap, token) {
                Ok(record) => hits.push((i, token_end - i, record)),
                Err(err) => {
                    if error.is_none() {
                        *error = Some(ExtractionError::from_engine(&err, "stock"));
                    }
                }
            }
            i = token_end;
            continue;
        }
        i = after;
    }
}

/// When nothing resolved, look for the reasons: a known nickname, or a span
/// that is a substring of one or more canonical names.
fn detect_near_miss(snap: &ReferenceSnapshot, text: &str) -> Option<ExtractionError> {
    for (short, full) in SHORT_NAMES.iter() {
        if text.contains(short) && snap.stock_by_name(full).is_some() {
            return Some(ExtractionError {
                code: crate::error::ErrorCode::EntityNotFound,
                field: "stock".to_string(),
                message: format!("'{}'是简称，不能直接使用", short),
                suggestion: Some((*full).to_string()),
            });
        }
    }

    for segment in split_entities(text) {
        let Some(span) = candidate_span(&segment) else {
            continue;
        };
        // Sector vocabulary is owned by the sector resolver.
        if sector::is_sector_word(snap, &span) {
            continue;
        }
        let candidates = snap.stock_names_containing(&span);
        match candidates.len() {
            1 => {
                return Some(ExtractionError {
                    code: crate::error::ErrorCode::EntityNotFound,
                    field: "stock".to_string(),
                    message: format!("未找到股票'{}'", span),
                    suggestion: Some(candidates[0].to_string()),
                })
            }
            n if n >= 2 => {
                let listed: Vec<&str> = candidates
                    .into_iter()
                    .take(MAX_LISTED_CANDIDATES)
                    .collect();
                return Some(ExtractionError {
                    code: crate::error::ErrorCode::EntityAmbiguous,
                    field: "stock".to_string(),
                    message: format!("'{}'可能指多只股票", span),
                    suggestion: Some(format!("请使用完整名称明确指定：{}", listed.join("、"))),
                });
            }
            _ => {}
        }
    }

    None
}

/// The longest remaining CJK run (2-6 chars) after stripping query
/// vocabulary from a segment.
fn candidate_span(segment: &str) -> Option<String> {
    let mut cleaned = segment.to_string();
    for word in SPAN_STOP_WORDS.iter() {
        cleaned = cleaned.replace(word, " ");
    }

    let mut best: Option<String> = None;
    let mut run = String::new();
    for c in cleaned.chars().chain(std::iter::once(' ')) {
        if is_cjk(c) {
            run.push(c);
            continue;
        }
        let len = run.chars().count();
        if (2..=6).contains(&len)
            && best.as_ref().map_or(true, |b| len > b.chars().count())
        {
            best = Some(run.clone());
        }
        run.clear();
    }
    best
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}
