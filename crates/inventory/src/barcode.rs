//! Barcode allocation rules: `PREFIX-NNNN`.
//!
//! The prefix is derived from the item name; the number comes from a
//! per-tenant, per-prefix monotonic counter owned by the store.

use stockroom_core::{Barcode, DomainResult};

/// Prefix used when a name yields no letters or digits.
pub const FALLBACK_PREFIX: &str = "ITM";

/// Derive a 1–3 character prefix from the first letters of up to three words.
///
/// - one word: its first three characters
/// - two words: two from the first, one from the second
/// - three or more: the first character of each of the first three
pub fn derive_prefix(name: &str) -> String {
    let words: Vec<Vec<char>> = name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.chars().flat_map(char::to_uppercase).collect())
        .collect();

    let take = |word: &Vec<char>, n: usize| word.iter().take(n).collect::<String>();

    let prefix = match words.as_slice() {
        [] => String::new(),
        [only] => take(only, 3),
        [first, second] => format!("{}{}", take(first, 2), take(second, 1)),
        [first, second, third, ..] => {
            format!("{}{}{}", take(first, 1), take(second, 1), take(third, 1))
        }
    };

    if prefix.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        prefix
    }
}

/// Render an allocated barcode, zero-padded to four digits.
pub fn format_barcode(prefix: &str, sequence: u64) -> DomainResult<Barcode> {
    Barcode::parse(format!("{prefix}-{sequence:04}"))
}

/// Highest numeric suffix already used with `prefix`, or 0.
pub fn highest_sequence<'a>(prefix: &str, barcodes: impl IntoIterator<Item = &'a Barcode>) -> u64 {
    barcodes
        .into_iter()
        .filter_map(Barcode::sequence_parts)
        .filter(|(p, _)| *p == prefix)
        .map(|(_, n)| n)
        .max()
        .unwrap_or(0)
}
