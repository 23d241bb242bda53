// BM25 ranking over table documents, with a boost for tables whose own
// comment matches the query.
use crate::catalog::Catalog;
use crate::document::build_document;
use crate::tokenizer::{token_set, tokenize};
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;
pub const DEFAULT_COMMENT_BOOST: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// term frequency saturation
    pub k1: f32,
    /// length normalization
    pub b: f32,
    /// multiplier applied to `score * overlap_ratio` for comment matches
    pub comment_boost: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            comment_boost: DEFAULT_COMMENT_BOOST,
        }
    }
}

/// Immutable BM25 index over a fixed corpus.
///
/// Document `i` of the index is corpus entry `i`; rankings are returned as
/// corpus indices.
#[derive(Debug, Clone)]
pub struct BM25Index {
    // per document: term -> frequency
    term_freqs: Vec<AHashMap<String, u32>>,
    doc_lengths: Vec<u32>,
    // per document: tokens of the table comment only
    comment_tokens: Vec<AHashSet<String>>,
    // term -> number of documents containing it
    term_dfs: AHashMap<String, u32>,
    avgdl: f32,
    params: Bm25Params,
}

impl BM25Index {
    /// Index `corpus`, pairing entry `i` with `comments[i]` for the boost.
    /// Missing comment entries count as no comment.
    pub fn build(corpus: &[String], comments: &[Option<String>], params: Bm25Params) -> Self {
        let tokenized: Vec<(AHashMap<String, u32>, u32, AHashSet<String>)> = corpus
            .par_iter()
            .enumerate()
            .map(|(i, text)| {
                let tokens = tokenize(text);
                let len = tokens.len() as u32;
                let mut freqs: AHashMap<String, u32> = AHashMap::new();
                for token in tokens {
                    *freqs.entry(token).or_insert(0) += 1;
                }
                let comment = comments
                    .get(i)
                    .and_then(|c| c.as_deref())
                    .map(token_set)
                    .unwrap_or_default();
                (freqs, len, comment)
            })
            .collect();

        let mut term_freqs = Vec::with_capacity(tokenized.len());
        let mut doc_lengths = Vec::with_capacity(tokenized.len());
        let mut comment_tokens = Vec::with_capacity(tokenized.len());
        let mut term_dfs: AHashMap<String, u32> = AHashMap::new();

        for (freqs, len, comment) in tokenized {
            for term in freqs.keys() {
                *term_dfs.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(freqs);
            doc_lengths.push(len);
            comment_tokens.push(comment);
        }

        let avgdl = if doc_lengths.is_empty() {
            0.0
        } else {
            doc_lengths.iter().map(|&l| l as f32).sum::<f32>() / doc_lengths.len() as f32
        };

        Self {
            term_freqs,
            doc_lengths,
            comment_tokens,
            term_dfs,
            avgdl,
            params,
        }
    }

    /// Index every table of a catalog in table-name order
    pub fn from_catalog(catalog: &Catalog, params: Bm25Params) -> Self {
        let mut corpus = Vec::with_capacity(catalog.len());
        let mut comments = Vec::with_capacity(catalog.len());
        for (name, table) in catalog.tables() {
            corpus.push(build_document(name, table));
            comments.push(table.table_comment.clone());
        }
        Self::build(&corpus, &comments, params)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    #[inline]
    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    /// Boosted score of every document, indexed like the corpus
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.is_empty() {
            return vec![0.0; self.len()];
        }
        let query_set: AHashSet<&str> = query_terms.iter().map(String::as_str).collect();

        (0..self.len())
            .into_par_iter()
            .map(|doc| {
                let base = self.base_score(doc, &query_terms);
                base + self.comment_boost(doc, base, &query_set)
            })
            .collect()
    }

    /// Every corpus index ordered by descending score. Equal scores keep
    /// corpus order.
    pub fn rank(&self, query: &str) -> Vec<usize> {
        self.rank_with_scores(query).into_iter().map(|(i, _)| i).collect()
    }

    pub fn rank_with_scores(&self, query: &str) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.scores(query).into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }

    fn base_score(&self, doc: usize, query_terms: &[String]) -> f32 {
        let freqs = &self.term_freqs[doc];
        let doc_len = self.doc_lengths[doc] as f32;
        let mut score = 0.0;

        for term in query_terms {
            let Some(&tf) = freqs.get(term) else {
                continue;
            };
            let df = self.term_dfs.get(term).copied().unwrap_or(0) as f32;
            score += self.idf(df) * self.saturate(tf as f32, doc_len);
        }
        score
    }

    // ln(1 + (N - df + 0.5) / (df + 0.5)) stays positive even when a term
    // appears in most documents of a small catalog.
    #[inline]
    fn idf(&self, df: f32) -> f32 {
        let n = self.len() as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    // tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avgdl))
    #[inline]
    fn saturate(&self, tf: f32, doc_len: f32) -> f32 {
        let Bm25Params { k1, b, .. } = self.params;
        let norm = if self.avgdl > 0.0 { doc_len / self.avgdl } else { 1.0 };
        tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * norm))
    }

    fn comment_boost(&self, doc: usize, base: f32, query_set: &AHashSet<&str>) -> f32 {
        if base <= 0.0 || query_set.is_empty() {
            return 0.0;
        }
        let comment = &self.comment_tokens[doc];
        let overlap = query_set.iter().filter(|t| comment.contains(**t)).count();
        if overlap == 0 {
            return 0.0;
        }
        let ratio = overlap as f32 / query_set.len() as f32;
        base * ratio * self.params.comment_boost
    }
}
