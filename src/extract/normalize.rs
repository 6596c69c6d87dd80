use crate::error::{CrawlError, CrawlResult};

const CURRENCY_TOKENS: [&str; 4] = ["KRW", "원", "₩", "￦"];
const SEPARATORS: [char; 3] = [',', '\'', '\u{00a0}'];

/// Parse a currency string such as `"516,000원"` or `"₩ 1,161,400"` into won.
///
/// A leading `-` or `−` marks a discount on the page and is ignored.
/// Anything left after stripping currency tokens and separators must be
/// ASCII digits; there is no fallback to zero.
pub fn parse_amount(raw: &str) -> CrawlResult<u64> {
    let mut text = raw.trim().to_string();
    for token in CURRENCY_TOKENS {
        text = text.replace(token, "");
    }

    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && !SEPARATORS.contains(c))
        .collect();
    let digits = digits.trim_start_matches(['-', '\u{2212}']);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CrawlError::parse("amount", raw));
    }

    digits.parse::<u64>().map_err(|_| CrawlError::parse("amount", raw))
}

/// Render an amount the way the storefront shows it, e.g. `516,000원`
pub fn format_amount(amount: u64) -> String {
    let digits = amount.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped.push('원');
    grouped
}

/// Cells that stand for "no amount" rather than a malformed one
pub fn is_blank_amount(raw: &str) -> bool {
    matches!(raw.trim(), "" | "-" | "–" | "—" | "0원")
}
