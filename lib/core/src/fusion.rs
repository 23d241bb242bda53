//! Reciprocal Rank Fusion of the lexical and vector orderings.
//!
//! A table's fused score is `1/(k + bm25_rank) + 1/(k + vector_rank)` with
//! 1-based ranks; a list that does not contain the table contributes 0.
//! Scores are compared after rounding to `score_precision` decimals, and
//! ties fall back to the BM25 rank and then the table name, so the output
//! order is total and reproducible.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_RRF_K: f64 = 60.0;
pub const DEFAULT_SCORE_PRECISION: u32 = 4;
pub const DEFAULT_FUSED_THRESHOLD: f64 = 0.01;
pub const DEFAULT_VECTOR_TOP_K: usize = 20;
pub const DEFAULT_BM25_CANDIDATE_DEPTH: usize = 50;
pub const DEFAULT_FALLBACK_SIZE: usize = 4;
pub const DEFAULT_FUSED_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionParams {
    pub rrf_k: f64,
    pub score_precision: u32,
    /// minimum fused score kept by [`FusionRanker::select`]
    pub fused_threshold: f64,
    /// how many vector hits take part in narrowing
    pub vector_top_k: usize,
    /// how deep into the BM25 ordering narrowing looks
    pub bm25_candidate_depth: usize,
    /// BM25 head used when the intersection is empty
    pub fallback_size: usize,
    pub fused_cap: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            score_precision: DEFAULT_SCORE_PRECISION,
            fused_threshold: DEFAULT_FUSED_THRESHOLD,
            vector_top_k: DEFAULT_VECTOR_TOP_K,
            bm25_candidate_depth: DEFAULT_BM25_CANDIDATE_DEPTH,
            fallback_size: DEFAULT_FALLBACK_SIZE,
            fused_cap: DEFAULT_FUSED_CAP,
        }
    }
}

/// One table with its rank in each input list (1-based, `None` = absent)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub table_name: String,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub fused_score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FusionRanker {
    params: FusionParams,
}

impl FusionRanker {
    #[must_use]
    pub fn new(params: FusionParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &FusionParams {
        &self.params
    }

    /// Fuse over the union of both orderings
    pub fn fuse(&self, bm25_order: &[String], vector_order: &[String]) -> Vec<RankedCandidate> {
        let mut seen: AHashSet<&str> = AHashSet::new();
        let union: Vec<&str> = bm25_order
            .iter()
            .chain(vector_order)
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect();
        self.fuse_names(&union, bm25_order, vector_order)
    }

    /// Fuse only `candidates`, ranking them by their positions in the full
    /// orderings
    pub fn fuse_candidates(
        &self,
        candidates: &[String],
        bm25_order: &[String],
        vector_order: &[String],
    ) -> Vec<RankedCandidate> {
        let mut seen: AHashSet<&str> = AHashSet::new();
        let names: Vec<&str> = candidates
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect();
        self.fuse_names(&names, bm25_order, vector_order)
    }

    /// Tables in both the vector head and the BM25 head, in BM25 order.
    /// Falls back to the BM25 head alone when the two do not meet.
    pub fn narrow_candidates(&self, bm25_order: &[String], vector_order: &[String]) -> Vec<String> {
        let vector_head: AHashSet<&str> = vector_order
            .iter()
            .take(self.params.vector_top_k)
            .map(String::as_str)
            .collect();

        let mut seen: AHashSet<&str> = AHashSet::new();
        let narrowed: Vec<String> = bm25_order
            .iter()
            .take(self.params.bm25_candidate_depth)
            .filter(|name| vector_head.contains(name.as_str()) && seen.insert(name.as_str()))
            .cloned()
            .collect();

        if !narrowed.is_empty() {
            return narrowed;
        }
        bm25_order
            .iter()
            .take(self.params.fallback_size)
            .cloned()
            .collect()
    }

    /// Keep fused candidates scoring at least the threshold, capped.
    /// When none qualifies, the head of the fused order is kept instead.
    pub fn select(&self, fused: Vec<RankedCandidate>) -> Vec<RankedCandidate> {
        let cap = self.params.fused_cap;
        let passing: Vec<RankedCandidate> = fused
            .iter()
            .filter(|c| c.fused_score >= self.params.fused_threshold)
            .take(cap)
            .cloned()
            .collect();
        if passing.is_empty() {
            fused.into_iter().take(cap).collect()
        } else {
            passing
        }
    }

    /// Narrow, fuse and select in one step
    pub fn rank(&self, bm25_order: &[String], vector_order: &[String]) -> Vec<RankedCandidate> {
        let candidates = self.narrow_candidates(bm25_order, vector_order);
        let fused = self.fuse_candidates(&candidates, bm25_order, vector_order);
        self.select(fused)
    }

    fn fuse_names(&self, names: &[&str], bm25_order: &[String], vector_order: &[String]) -> Vec<RankedCandidate> {
        let bm25_ranks = rank_map(bm25_order);
        let vector_ranks = rank_map(vector_order);

        let mut fused: Vec<RankedCandidate> = names
            .iter()
            .map(|&name| {
                let bm25_rank = bm25_ranks.get(name).copied();
                let vector_rank = vector_ranks.get(name).copied();
                RankedCandidate {
                    table_name: name.to_string(),
                    bm25_rank,
                    vector_rank,
                    fused_score: self.contribution(bm25_rank) + self.contribution(vector_rank),
                }
            })
            .collect();

        fused.sort_by(|a, b| self.compare(a, b));
        fused
    }

    #[inline]
    fn contribution(&self, rank: Option<usize>) -> f64 {
        rank.map_or(0.0, |r| 1.0 / (self.params.rrf_k + r as f64))
    }

    #[inline]
    fn quantize(&self, score: f64) -> i64 {
        let scale = 10f64.powi(self.params.score_precision as i32);
        (score * scale).round() as i64
    }

    fn compare(&self, a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
        self.quantize(b.fused_score)
            .cmp(&self.quantize(a.fused_score))
            .then_with(|| {
                let a_rank = a.bm25_rank.unwrap_or(usize::MAX);
                let b_rank = b.bm25_rank.unwrap_or(usize::MAX);
                a_rank.cmp(&b_rank)
            })
            .then_with(|| a.table_name.cmp(&b.table_name))
    }
}

// name -> 1-based position of its first occurrence
fn rank_map(order: &[String]) -> AHashMap<&str, usize> {
    let mut ranks = AHashMap::with_capacity(order.len());
    for (i, name) in order.iter().enumerate() {
        ranks.entry(name.as_str()).or_insert(i + 1);
    }
    ranks
}
