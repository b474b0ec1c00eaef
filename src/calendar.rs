//! Trading-calendar date resolution
//!
//! Maps relative temporal phrases ("昨天", "最近一周", "去年同期") and
//! explicit dates to concrete trading sessions. Every resolution goes
//! through the calendar snapshot; there is no weekday arithmetic shortcut,
//! holidays are simply absent from the session list.

use crate::error::{EngineError, Result};
use crate::models::TimeExpression;
use crate::numerals;
use crate::reference::{CalendarCache, CalendarSnapshot};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use tracing::debug;

// Fixed session counts per calendar unit. Conventions, not derivations:
// downstream comparisons only need the window width to be stable.
pub const SESSIONS_PER_WEEK: usize = 5;
pub const SESSIONS_PER_MONTH: usize = 21;
pub const SESSIONS_PER_QUARTER: usize = 61;
pub const SESSIONS_PER_HALF_YEAR: usize = 120;
pub const SESSIONS_PER_YEAR: usize = 250;

/// Phrases that signal temporal intent. When one of these appears but no
/// resolution rule fires, the expression is rejected rather than guessed.
const TEMPORAL_CUES: &[&str] = &[
    "最近", "天前", "日前", "交易日", "昨天", "前天", "本月", "上月",
    "上个月", "本季度", "上季度", "今年", "去年", "同期",
];

/// An explicit date-ish token found in query text.
enum ExplicitToken {
    Day(NaiveDate),
    Month(i32, u32),
    Year(i32),
}

pub struct DateResolver {
    calendar: Arc<CalendarCache>,
}

impl DateResolver {
    pub fn new(calendar: Arc<CalendarCache>) -> Self {
        Self { calendar }
    }

    /// Resolve the temporal expression in `raw`, relative to `today`.
    ///
    /// Returns `Ok(None)` when the text carries no temporal cue. A cue that
    /// matches no pattern is an error, never a default guess.
    pub async fn resolve(&self, raw: &str, today: NaiveDate) -> Result<Option<TimeExpression>> {
        let text = numerals::normalize_quantities(raw);
        let snap = self.calendar.snapshot().await?;

        if let Some(expr) = explicit_expression(&text)? {
            debug!(?expr, "resolved explicit date expression");
            return Ok(Some(expr));
        }

        // "去年同期" before the plain "去年" rule: its text is a superset.
        if text.contains("去年同期") || text.contains("同期") {
            let shifted = shift_year(today, -1);
            let snapped = snap.next_on_or_after(shifted).ok_or_else(|| {
                EngineError::UnresolvableExpression(format!(
                    "去年同期 {} 超出交易日历范围",
                    shifted
                ))
            })?;
            return Ok(Some(TimeExpression::Point { date: snapped }));
        }

        if let Some(expr) = recent_range(&text, &snap, today)? {
            return Ok(Some(expr));
        }

        if let Some(expr) = relative_point(&text, &snap, today)? {
            return Ok(Some(expr));
        }

        if let Some(expr) = calendar_period(&text, today) {
            return Ok(Some(expr));
        }

        if TEMPORAL_CUES.iter().any(|cue| text.contains(cue)) {
            return Err(EngineError::UnresolvableExpression(raw.to_string()));
        }

        Ok(None)
    }
}

//
// ================= Explicit dates =================
//

fn explicit_expression(text: &str) -> Result<Option<TimeExpression>> {
    let tokens = scan_explicit_tokens(text)?;

    let days: Vec<NaiveDate> = tokens
        .iter()
        .filter_map(|t| match t {
            ExplicitToken::Day(d) => Some(*d),
            _ => None,
        })
        .collect();

    if days.len() >= 2 {
        let (start, end) = (days[0], days[1]);
        if start > end {
            return Err(EngineError::UnresolvableExpression(format!(
                "时间范围起止顺序错误: {} 晚于 {}",
                start, end
            )));
        }
        return Ok(Some(TimeExpression::Range { start, end }));
    }
    if let Some(&date) = days.first() {
        return Ok(Some(TimeExpression::Point { date }));
    }

    for token in &tokens {
        match token {
            ExplicitToken::Month(y, m) => {
                let (start, end) = month_bounds(*y, *m).ok_or_else(|| {
                    EngineError::UnresolvableExpression(format!("{}年{}月", y, m))
                })?;
                return Ok(Some(TimeExpression::Range { start, end }));
            }
            ExplicitToken::Year(y) => {
                let (start, end) = year_bounds(*y).ok_or_else(|| {
                    EngineError::UnresolvableExpression(format!("{}年", y))
                })?;
                return Ok(Some(TimeExpression::Range { start, end }));
            }
            ExplicitToken::Day(_) => {}
        }
    }

    Ok(None)
}

/// Scan for `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY年[M月[D日]]` tokens.
fn scan_explicit_tokens(text: &str) -> Result<Vec<ExplicitToken>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let run_len = bytes[i..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if run_len == 4 {
            if let Some((token, consumed)) = parse_token_at(&text[i..])? {
                out.push(token);
                i += consumed;
                continue;
            }
        }
        i += run_len;
    }

    Ok(out)
}

/// Parse one explicit token at the start of `s` (which begins with exactly
/// four digits). Returns the token and the byte length consumed.
fn parse_token_at(s: &str) -> Result<Option<(ExplicitToken, usize)>> {
    let year: i32 = match s[..4].parse() {
        Ok(y) => y,
        Err(_) => return Ok(None),
    };
    if !(1990..=2100).contains(&year) {
        return Ok(None);
    }
    let rest = &s[4..];

    // ISO / slash form
    if let Some(sep) = rest.chars().next().filter(|c| *c == '-' || *c == '/') {
        let sep_len = sep.len_utf8();
        if let Some((month, mlen)) = ascii_number(&rest[sep_len..]) {
            let after_month = &rest[sep_len + mlen..];
            if after_month.starts_with(sep) {
                if let Some((day, dlen)) = ascii_number(&after_month[sep_len..]) {
                    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
                        EngineError::UnresolvableExpression(format!(
                            "{}{}{}{}{}",
                            year, sep, month, sep, day
                        ))
                    })?;
                    let consumed = 4 + sep_len + mlen + sep_len + dlen;
                    return Ok(Some((ExplicitToken::Day(date), consumed)));
                }
            }
        }
        return Ok(None);
    }

    // Chinese form
    if !rest.starts_with('年') {
        return Ok(None);
    }
    let after_year = &rest['年'.len_utf8()..];
    let Some((month, mlen)) = ascii_number(after_year) else {
        return Ok(Some((ExplicitToken::Year(year), 4 + '年'.len_utf8())));
    };
    let after_mnum = &after_year[mlen..];
    if !after_mnum.starts_with('月') {
        // Digits after "年" that are not a month ("2024年10只") — year only,
        // consuming just the year token.
        return Ok(Some((ExplicitToken::Year(year), 4 + '年'.len_utf8())));
    }
    if !(1..=12).contains(&month) {
        return Err(EngineError::UnresolvableExpression(format!(
            "{}年{}月",
            year, month
        )));
    }
    let mut consumed = 4 + '年'.len_utf8() + mlen + '月'.len_utf8();
    let after_month = &after_mnum['月'.len_utf8()..];
    let Some((day, dlen)) = ascii_number(after_month) else {
        return Ok(Some((ExplicitToken::Month(year, month), consumed)));
    };
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        EngineError::UnresolvableExpression(format!("{}年{}月{}日", year, month, day))
    })?;
    consumed += dlen;
    let after_day = &after_month[dlen..];
    for marker in ['日', '号'] {
        if after_day.starts_with(marker) {
            consumed += marker.len_utf8();
            break;
        }
    }
    Ok(Some((ExplicitToken::Day(date), consumed)))
}

/// Leading ASCII digit run as (value, byte length).
fn ascii_number(s: &str) -> Option<(u32, usize)> {
    let len = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 || len > 4 {
        return None;
    }
    s[..len].parse().ok().map(|n| (n, len))
}

//
// ================= Relative expressions =================
//

fn latest_session(snap: &CalendarSnapshot, today: NaiveDate) -> Result<NaiveDate> {
    snap.latest_on_or_before(today).ok_or_else(|| {
        EngineError::ReferenceUnavailable(format!("{} 之前没有任何交易日", today))
    })
}

fn sessions_back_checked(
    snap: &CalendarSnapshot,
    from: NaiveDate,
    n: usize,
    phrase: &str,
) -> Result<NaiveDate> {
    snap.sessions_back(from, n)
        .ok_or_else(|| EngineError::UnresolvableExpression(format!("{} 超出交易日历范围", phrase)))
}

fn relative_point(
    text: &str,
    snap: &CalendarSnapshot,
    today: NaiveDate,
) -> Result<Option<TimeExpression>> {
    // The latest session with data. When today itself is a session it is
    // returned as-is, never an earlier one.
    for cue in ["今天", "今日", "最新", "当前", "现在"] {
        if text.contains(cue) {
            let date = latest_session(snap, today)?;
            return Ok(Some(TimeExpression::Point { date }));
        }
    }

    if text.contains("前天") {
        let date = sessions_back_checked(snap, latest_session(snap, today)?, 2, "前天")?;
        return Ok(Some(TimeExpression::Point { date }));
    }
    if text.contains("昨天") || text.contains("上个交易日") || text.contains("上一交易日") {
        let date = sessions_back_checked(snap, latest_session(snap, today)?, 1, "昨天")?;
        return Ok(Some(TimeExpression::Point { date }));
    }

    // "N天前" / "N个交易日前"
    for marker in ["个交易日前", "交易日前", "天前", "日前"] {
        if let Some(pos) = text.find(marker) {
            if let Some(n) = digits_before(text, pos) {
                let date = sessions_back_checked(
                    snap,
                    latest_session(snap, today)?,
                    n as usize,
                    &format!("{}{}", n, marker),
                )?;
                return Ok(Some(TimeExpression::Point { date }));
            }
        }
    }

    Ok(None)
}

/// ASCII digit run ending exactly at byte offset `end`.
fn digits_before(text: &str, end: usize) -> Option<u32> {
    let head = &text.as_bytes()[..end];
    let len = head.iter().rev().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    text[end - len..end].parse().ok()
}

/// "最近N<unit>" session-bounded windows.
fn recent_range(
    text: &str,
    snap: &CalendarSnapshot,
    today: NaiveDate,
) -> Result<Option<TimeExpression>> {
    let Some(pos) = text.find("最近") else {
        return Ok(None);
    };
    let after = &text[pos + "最近".len()..];

    if after.starts_with("半年") {
        return last_n_sessions(snap, today, SESSIONS_PER_HALF_YEAR, "最近半年").map(Some);
    }

    let Some((n, nlen)) = ascii_number(after) else {
        return Ok(None);
    };
    if n == 0 {
        let unit: String = after[nlen..].chars().take(3).collect();
        return Err(EngineError::UnresolvableExpression(format!("最近0{}", unit)));
    }
    let unit = &after[nlen..];
    let sessions = if unit.starts_with("个交易日") || unit.starts_with("交易日") {
        n as usize
    } else if unit.starts_with('天') || unit.starts_with('日') {
        n as usize
    } else if unit.starts_with('周') || unit.starts_with("个星期") || unit.starts_with("星期") {
        n as usize * SESSIONS_PER_WEEK
    } else if unit.starts_with("个月") || unit.starts_with('月') {
        n as usize * SESSIONS_PER_MONTH
    } else if unit.starts_with("个季度") || unit.starts_with("季度") {
        n as usize * SESSIONS_PER_QUARTER
    } else if unit.starts_with('年') {
        n as usize * SESSIONS_PER_YEAR
    } else {
        return Ok(None);
    };

    last_n_sessions(snap, today, sessions, &text[pos..]).map(Some)
}

/// The last `n` sessions ending at the latest session. Windows reaching past
/// recorded history clamp to the earliest session.
fn last_n_sessions(
    snap: &CalendarSnapshot,
    today: NaiveDate,
    n: usize,
    phrase: &str,
) -> Result<TimeExpression> {
    if n == 0 {
        return Err(EngineError::UnresolvableExpression(phrase.to_string()));
    }
    let end = latest_session(snap, today)?;
    let start = snap
        .sessions_back(end, n - 1)
        .or_else(|| snap.sessions.first().copied())
        .ok_or_else(|| EngineError::ReferenceUnavailable("交易日历为空".to_string()))?;
    Ok(TimeExpression::Range { start, end })
}

//
// ================= Calendar-bounded periods =================
//

fn calendar_period(text: &str, today: NaiveDate) -> Option<TimeExpression> {
    let (y, m) = (today.year(), today.month());

    let bounds = if text.contains("本月") || text.contains("这个月") {
        month_bounds(y, m)
    } else if text.contains("上个月") || text.contains("上月") {
        let (py, pm) = if m == 1 { (y - 1, 12) } else { (y, m - 1) };
        month_bounds(py, pm)
    } else if text.contains("本季度") || text.contains("这个季度") {
        quarter_bounds(y, quarter_of(m))
    } else if text.contains("上季度") || text.contains("上个季度") {
        let q = quarter_of(m);
        if q == 1 {
            quarter_bounds(y - 1, 4)
        } else {
            quarter_bounds(y, q - 1)
        }
    } else if text.contains("今年") || text.contains("本年") {
        year_bounds(y)
    } else if text.contains("去年") {
        year_bounds(y - 1)
    } else {
        None
    };

    bounds.map(|(start, end)| TimeExpression::Range { start, end })
}

fn quarter_of(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next.pred_opt()?))
}

fn quarter_bounds(year: i32, quarter: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first_month = (quarter - 1) * 3 + 1;
    let (start, _) = month_bounds(year, first_month)?;
    let (_, end) = month_bounds(year, first_month + 2)?;
    Some((start, end))
}

fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

fn shift_year(date: NaiveDate, delta: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year() + delta, date.month(), date.day())
        // Feb 29 shifts to Feb 28 on non-leap years.
        .or_else(|| NaiveDate::from_ymd_opt(date.year() + delta, date.month(), 28))
        .unwrap_or(date)
}
