//! Script-aware tokenizer shared by the BM25 index and the comment boost.
//!
//! Anything that is not a CJK ideograph, a Latin letter or an ASCII digit
//! becomes a separator. Latin words are kept whole and lowercased; CJK
//! runs are segmented with the jieba dictionary plus its HMM for words the
//! dictionary does not know.

use ahash::AHashSet;
use jieba_rs::Jieba;
use std::sync::OnceLock;

static SEGMENTER: OnceLock<Jieba> = OnceLock::new();

// The default dictionary takes a while to load; do it once per process.
fn segmenter() -> &'static Jieba {
    SEGMENTER.get_or_init(Jieba::new)
}

#[inline]
fn is_cjk_ideograph(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

// Basic Latin, Latin-1 Supplement and Latin Extended-A/B letters
#[inline]
fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic()
        || (matches!(c, '\u{00C0}'..='\u{024F}') && c != '\u{00D7}' && c != '\u{00F7}')
}

#[inline]
fn is_token_char(c: char) -> bool {
    c.is_ascii_digit() || is_latin_letter(c) || is_cjk_ideograph(c)
}

/// Split text into lowercase tokens, dropping empties
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .flat_map(|c| {
            let c = if is_token_char(c) { c } else { ' ' };
            c.to_lowercase()
        })
        .collect();

    let mut tokens = Vec::new();
    for word in cleaned.split_whitespace() {
        let mut rest = word;
        while let Some(first) = rest.chars().next() {
            let cjk = is_cjk_ideograph(first);
            let end = rest
                .char_indices()
                .find(|&(_, c)| is_cjk_ideograph(c) != cjk)
                .map_or(rest.len(), |(i, _)| i);
            let (run, tail) = rest.split_at(end);
            if cjk {
                tokens.extend(
                    segmenter()
                        .cut(run, true)
                        .into_iter()
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                );
            } else {
                tokens.push(run.to_string());
            }
            rest = tail;
        }
    }
    tokens
}

/// Distinct tokens of a text
pub fn token_set(text: &str) -> AHashSet<String> {
    tokenize(text).into_iter().collect()
}
