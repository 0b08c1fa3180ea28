//! A1-notation helpers.

use std::sync::LazyLock;

use regex::Regex;

/// Matches the first cell reference after the `!` of an A1 range.
static FIRST_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\$?[A-Za-z]+\$?(\d+)").expect("static regex"));

/// Column letter for a zero-based column index (0 -> A, 26 -> AA).
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Quote a tab name for use in a range (`Jobs` -> `'Jobs'`, `O'Neil` -> `'O''Neil'`).
pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

/// Full-height range covering the first `width` columns of `tab`.
pub fn columns_range(tab: &str, width: usize) -> String {
    format!(
        "{}!A:{}",
        quote_tab(tab),
        column_letter(width.saturating_sub(1))
    )
}

/// Single-row range (`row` is 1-based) covering the first `width` columns.
pub fn row_range(tab: &str, row: u32, width: usize) -> String {
    format!(
        "{}!A{row}:{}{row}",
        quote_tab(tab),
        column_letter(width.saturating_sub(1))
    )
}

/// First row number of a range such as `'Jobs'!A5:W7`. `None` for whole-column ranges.
pub fn first_row(range: &str) -> Option<u32> {
    FIRST_CELL
        .captures(range)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
