//! `$readmemh`-style hex tables: one word per line, `//` comments.

use std::path::Path;

use crate::error::QfabError;
use crate::Result;

/// Parse one hex word per non-empty, non-comment line.
pub fn parse_words(text: &str) -> Result<Vec<u32>> {
    let mut words = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = match raw.find("//") {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let digits = line.trim_start_matches("0x").replace('_', "");
        let word = u32::from_str_radix(&digits, 16).map_err(|e| QfabError::HexParse {
            line: i + 1,
            msg: format!("'{}': {}", line, e),
        })?;
        words.push(word);
    }
    Ok(words)
}

/// Parse and require exactly `expected` words.
pub fn parse_table(name: &str, text: &str, expected: usize) -> Result<Vec<u32>> {
    let words = parse_words(text)?;
    if words.len() != expected {
        return Err(QfabError::TableSize {
            table: name.to_string(),
            expected,
            got: words.len(),
        });
    }
    Ok(words)
}

pub fn read_table(path: &Path, expected: usize) -> Result<Vec<u32>> {
    let text = std::fs::read_to_string(path)?;
    parse_table(&path.display().to_string(), &text, expected)
}

/// Reinterpret the low `bits` bits of `word` as two's complement.
#[inline]
pub fn sign_extend(word: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((word << shift) as i32) >> shift
}

/// Render words as zero-padded lowercase hex, `digits` wide, one per line.
///
/// Negative values are written in two's complement truncated to the width.
pub fn format_words<I>(words: I, digits: usize) -> String
where
    I: IntoIterator<Item = i64>,
{
    let bits = (digits * 4) as u32;
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let mut out = String::new();
    for w in words {
        out.push_str(&format!("{:0width$x}\n", (w as u64) & mask, width = digits));
    }
    out
}
