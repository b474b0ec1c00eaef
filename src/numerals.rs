//! Chinese numeral handling
//!
//! Converts spelled-out quantities ("前十", "TOP二十", "最近三十天") to
//! integers before any date or limit arithmetic runs.

/// Digit value of a single numeral character, if it is one.
fn digit_value(c: char) -> Option<u32> {
    match c {
        '零' | '〇' => Some(0),
        '一' | '壹' => Some(1),
        '二' | '贰' | '两' | '俩' => Some(2),
        '三' | '叁' => Some(3),
        '四' | '肆' => Some(4),
        '五' | '伍' => Some(5),
        '六' | '陆' => Some(6),
        '七' | '柒' => Some(7),
        '八' | '捌' => Some(8),
        '九' | '玖' => Some(9),
        _ => c.to_digit(10),
    }
}

/// Unit multiplier of a single numeral character, if it is one.
fn unit_value(c: char) -> Option<u32> {
    match c {
        '十' | '拾' => Some(10),
        '百' | '佰' => Some(100),
        '千' | '仟' => Some(1000),
        '万' | '萬' => Some(10_000),
        _ => None,
    }
}

pub fn is_numeral_char(c: char) -> bool {
    digit_value(c).is_some() || unit_value(c).is_some()
}

/// Convert a run of Chinese (or mixed Arabic) numeral characters to an
/// integer. "二十三" → 23, "一百零五" → 105, "十" → 10.
pub fn numeral_to_int(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    if text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok();
    }

    let mut result: u64 = 0;
    let mut pending: u64 = 0;
    let mut saw_any = false;

    for c in text.chars() {
        if let Some(unit) = unit_value(c) {
            // Bare leading unit: "十" means 1 * 10.
            let factor = if pending == 0 { 1 } else { pending };
            result += factor * unit as u64;
            pending = 0;
            saw_any = true;
        } else if let Some(d) = digit_value(c) {
            pending = pending * 10 + d as u64;
            saw_any = true;
        } else {
            return None;
        }
    }

    if !saw_any {
        return None;
    }
    u32::try_from(result + pending).ok()
}

/// Extract the leading numeral run starting at byte offset `start`,
/// returning (value, byte length consumed).
pub fn leading_numeral(text: &str) -> Option<(u32, usize)> {
    let mut end = 0;
    for (idx, c) in text.char_indices() {
        if is_numeral_char(c) {
            end = idx + c.len_utf8();
        } else {
            break;
        }
    }
    if end == 0 {
        return None;
    }
    numeral_to_int(&text[..end]).map(|n| (n, end))
}

/// Extract a count qualifier ("前N", "TOP N", "N只/名/个/家") from query
/// text. Returns None when no explicit count appears.
pub fn extract_limit(text: &str) -> Option<u32> {
    // "前N" / "TOPN" prefixes
    for prefix in ["前", "TOP", "top", "Top"] {
        let mut search = text;
        while let Some(pos) = search.find(prefix) {
            let after = search[pos + prefix.len()..].trim_start();
            if let Some((n, _)) = leading_numeral(after) {
                return Some(n);
            }
            search = &search[pos + prefix.len()..];
        }
    }

    // "N只" / "N名" / "N个" / "N家" suffixes
    for suffix in ["只", "名", "个", "家"] {
        if let Some(pos) = text.find(suffix) {
            let before = &text[..pos];
            // Walk back over the trailing numeral run.
            let run_start = before
                .char_indices()
                .rev()
                .take_while(|(_, c)| is_numeral_char(*c))
                .map(|(i, _)| i)
                .last();
            if let Some(start) = run_start {
                if let Some(n) = numeral_to_int(&before[start..]) {
                    return Some(n);
                }
            }
        }
    }

    None
}

/// Rewrite every spelled-out numeral run in the text to Arabic digits so
/// downstream pattern matching only ever sees integers. The rewrite is
/// text-wide, numerals inside names included ("万科A" → "10000科A"); entity
/// extraction runs on the original text and never sees this form.
pub fn normalize_quantities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if is_numeral_char(c) && !c.is_ascii_digit() {
            if let Some((n, len)) = leading_numeral(rest) {
                out.push_str(&n.to_string());
                rest = &rest[len..];
                continue;
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}
