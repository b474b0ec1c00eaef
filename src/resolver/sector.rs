//! Sector span detection and canonicalization
//!
//! Two stages: (a) find the span the user most plausibly meant, anchored on
//! the 板块/行业/概念 suffix keywords and scored by a small additive model;
//! (b) canonicalize it through the alias table into the sector snapshot.
//! The echoed name always carries the canonical type suffix.

use crate::error::ErrorCode;
use crate::models::{ExtractionError, SectorRecord, SectorRef};
use crate::reference::ReferenceSnapshot;
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const SUFFIX_KEYWORDS: &[&str] = &["板块", "行业", "概念"];

// Score deltas for span candidates. Empirically tuned; only the ordering
// they induce matters.
const SCORE_BASE: i32 = 1;
const SCORE_KNOWN_SECTOR: i32 = 5;
const SCORE_ALIAS_HIT: i32 = 3;
const SCORE_GOOD_LENGTH: i32 = 2;
const SCORE_TOO_LONG: i32 = -1;
const SCORE_VERB_CONTAMINATION: i32 = -3;
const SCORE_AT_START: i32 = 1;
const SCORE_AFTER_DELIMITER: i32 = 2;
const MIN_ACCEPT_SCORE: i32 = 1;

const ACTION_VERBS: &[&str] = &[
    "分析", "评估", "研究", "查询", "查看", "了解", "评价", "判断", "解析",
    "看", "追踪", "关注", "监控", "统计", "计算",
];

const DELIMITERS: &[char] = &[' ', '　', '，', '。', '！', '？', '、', '的', '和', '与', '及'];

lazy_static! {
    /// Colloquial sector names mapped to canonical board names.
    static ref SECTOR_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("房地产", "房地产开发");
        m.insert("地产", "房地产开发");
        m.insert("房产", "房地产开发");
        m.insert("券商", "证券");
        m.insert("酒类", "白酒");
        m.insert("酿酒", "白酒");
        m.insert("医药", "医药生物");
        m.insert("生物医药", "医药生物");
        m.insert("芯片", "半导体");
        m.insert("新能源汽车", "新能源车");
        m
    };

    /// High-frequency sector names worth a large score boost even before
    /// the snapshot lookup.
    static ref KNOWN_SECTORS: HashSet<&'static str> = {
        [
            "银行", "证券", "保险", "白酒", "医药", "新能源", "半导体", "钢铁",
            "煤炭", "有色", "汽车", "家电", "食品", "建筑", "电力", "交通",
            "通信", "计算机", "传媒", "化工", "农业", "房地产", "石油", "军工",
            "旅游", "零售", "纺织", "造纸", "水泥", "玻璃", "光伏设备",
            "医疗器械", "房地产开发", "新能源车",
        ]
        .into_iter()
        .collect()
    };
}

#[derive(Debug, Default)]
pub struct SectorExtraction {
    pub sector: Option<SectorRef>,
    pub error: Option<ExtractionError>,
}

/// True when `span` belongs to sector vocabulary (canonical name, alias, or
/// high-frequency sector word). Used by the stock resolver to keep sector
/// words out of stock ambiguity detection.
pub fn is_sector_word(snap: &ReferenceSnapshot, span: &str) -> bool {
    snap.sector_by_name(span).is_some()
        || SECTOR_ALIASES.contains_key(span)
        || KNOWN_SECTORS.contains(span)
}

/// Extract the sector referenced in `text`, if any.
pub fn extract_sector(snap: &ReferenceSnapshot, text: &str) -> SectorExtraction {
    // Direct board codes take priority over name detection.
    if let Some(result) = extract_by_code(snap, text) {
        return result;
    }

    if let Some((span, score)) = best_candidate(text) {
        debug!(span = %span, score, "sector span selected");
        return match canonicalize(snap, &span) {
            Some(record) => SectorExtraction {
                sector: Some(to_ref(&record)),
                error: None,
            },
            None => SectorExtraction {
                sector: None,
                error: Some(ExtractionError {
                    code: ErrorCode::EntityNotFound,
                    field: "sector".to_string(),
                    message: format!("未找到板块'{}'", span),
                    suggestion: None,
                }),
            },
        };
    }

    // Long canonical names the 2-6 char window misses.
    for record in &snap.sectors {
        for keyword in SUFFIX_KEYWORDS {
            let suffixed = format!("{}{}", record.name, keyword);
            if text.contains(&suffixed) {
                return SectorExtraction {
                    sector: Some(to_ref(record)),
                    error: None,
                };
            }
        }
    }

    SectorExtraction::default()
}

/// Detect a known sector name used without its type suffix. Only consulted
/// when neither a stock nor a suffixed sector resolved: a bare sector word
/// is then the best explanation for the query, and the user is asked to
/// qualify it.
pub fn detect_bare_sector(snap: &ReferenceSnapshot, text: &str) -> Option<ExtractionError> {
    let mut hit: Option<(usize, String)> = None;

    for record in &snap.sectors {
        if let Some(pos) = text.find(&record.name) {
            let suggestion = format!("{}{}", record.name, record.kind.suffix());
            if hit.as_ref().map_or(true, |(p, _)| pos < *p) {
                hit = Some((pos, suggestion));
            }
        }
    }
    for (alias, canonical) in SECTOR_ALIASES.iter() {
        if let Some(pos) = text.find(alias) {
            if let Some(record) = snap.sector_by_name(canonical) {
                let suggestion = format!("{}{}", record.name, record.kind.suffix());
                if hit.as_ref().map_or(true, |(p, _)| pos < *p) {
                    hit = Some((pos, suggestion));
                }
            }
        }
    }

    hit.map(|(_, suggestion)| ExtractionError {
        code: ErrorCode::MissingRequiredField,
        field: "sector".to_string(),
        message: "板块名称缺少类型后缀".to_string(),
        suggestion: Some(suggestion),
    })
}

fn to_ref(record: &SectorRecord) -> SectorRef {
    SectorRef {
        display_name: format!("{}{}", record.name, record.kind.suffix()),
        code: record.code.clone(),
        kind: record.kind,
    }
}

//
// ================= Board codes =================
//

/// `BKdddd.DC` board codes reverse-resolve to the canonical name.
fn extract_by_code(snap: &ReferenceSnapshot, text: &str) -> Option<SectorExtraction> {
    let pos = text.find("BK")?;
    let after = &text[pos + 2..];
    let digit_len = after.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digit_len != 4 || !after[digit_len..].starts_with(".DC") {
        return None;
    }
    let code = &text[pos..pos + 2 + digit_len + 3];

    Some(match snap.sector_by_code(code) {
        Some(record) => SectorExtraction {
            sector: Some(to_ref(record)),
            error: None,
        },
        None => SectorExtraction {
            sector: None,
            error: Some(ExtractionError {
                code: ErrorCode::EntityNotFound,
                field: "sector".to_string(),
                message: format!("未找到板块代码{}", code),
                suggestion: None,
            }),
        },
    })
}

//
// ================= Span scoring =================
//

/// Enumerate CJK runs of 2-6 chars ending at each suffix keyword and pick
/// the highest-scoring one. Ties go to the leftmost, then the longest.
fn best_candidate(text: &str) -> Option<(String, i32)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut best: Option<(String, i32, usize)> = None;

    for keyword in SUFFIX_KEYWORDS {
        let mut search_from = 0;
        while let Some(rel) = text[search_from..].find(keyword) {
            let kw_byte = search_from + rel;
            let kw_idx = chars.iter().position(|(b, _)| *b == kw_byte);
            if let Some(kw_idx) = kw_idx {
                for span_len in 2..=6usize {
                    if span_len > kw_idx {
                        break;
                    }
                    let start_idx = kw_idx - span_len;
                    let span: String = chars[start_idx..kw_idx].iter().map(|(_, c)| c).collect();
                    if !span.chars().all(is_cjk) {
                        break;
                    }
                    let score = score_candidate(&span, start_idx, &chars);
                    let start_byte = chars[start_idx].0;
                    let better = match &best {
                        None => score >= MIN_ACCEPT_SCORE,
                        Some((b_span, b_score, b_start)) => {
                            score > *b_score
                                || (score == *b_score && start_byte < *b_start)
                                || (score == *b_score
                                    && start_byte == *b_start
                                    && span.len() > b_span.len())
                        }
                    };
                    if better && score >= MIN_ACCEPT_SCORE {
                        best = Some((span, score, start_byte));
                    }
                }
            }
            search_from = kw_byte + keyword.len();
        }
    }

    best.map(|(span, score, _)| (span, score))
}

fn score_candidate(span: &str, start_idx: usize, chars: &[(usize, char)]) -> i32 {
    let mut score = SCORE_BASE;

    if ACTION_VERBS.iter().any(|v| span.contains(v)) {
        score += SCORE_VERB_CONTAMINATION;
    }

    let len = span.chars().count();
    if (2..=4).contains(&len) {
        score += SCORE_GOOD_LENGTH;
    } else if len > 4 {
        score += SCORE_TOO_LONG;
    }

    if KNOWN_SECTORS.contains(span) {
        score += SCORE_KNOWN_SECTOR;
    }
    if SECTOR_ALIASES.contains_key(span) {
        score += SCORE_ALIAS_HIT;
    }

    if start_idx == 0 {
        score += SCORE_AT_START;
    } else if DELIMITERS.contains(&chars[start_idx - 1].1) {
        score += SCORE_AFTER_DELIMITER;
    }

    score
}

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

//
// ================= Canonicalization =================
//

fn canonicalize(snap: &ReferenceSnapshot, span: &str) -> Option<SectorRecord> {
    if let Some(record) = snap.sector_by_name(span) {
        return Some(record.clone());
    }
    if let Some(canonical) = SECTOR_ALIASES.get(span) {
        return snap.sector_by_name(canonical).cloned();
    }
    // Span still carrying a suffix keyword ("银行板块" fed directly).
    for keyword in SUFFIX_KEYWORDS {
        if let Some(stripped) = span.strip_suffix(keyword) {
            if let Some(record) = snap.sector_by_name(stripped) {
                return Some(record.clone());
            }
            if let Some(canonical) = SECTOR_ALIASES.get(stripped) {
                return snap.sector_by_name(canonical).cloned();
            }
        }
    }
    None
}
