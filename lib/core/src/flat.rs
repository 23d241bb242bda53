//! Exact inner-product index over L2-normalized rows.
//!
//! Rows are stored back to back in one `Vec<f32>`; row `i` belongs to the
//! `i`-th table of the corpus it was built from. Search is a linear scan,
//! which is plenty for catalogs of a few thousand tables.

use crate::error::{Error, Result};
use crate::simd::dot_product_simd;
use crate::vector::Vector;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatIpIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIpIndex {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        Self {
            dim,
            data: Vec::with_capacity(dim * rows),
        }
    }

    /// Append a row. Rows are stored as given; normalize before adding.
    pub fn add(&mut self, row: &Vector) -> Result<()> {
        if row.dim() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                actual: row.dim(),
            });
        }
        self.data.extend_from_slice(row.as_slice());
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// Check the stored buffer is a whole number of rows
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 && !self.data.is_empty() {
            return Err(Error::IndexCorrupt("zero dimension with non-empty data".into()));
        }
        if self.dim > 0 && self.data.len() % self.dim != 0 {
            return Err(Error::IndexCorrupt(format!(
                "buffer of {} floats is not a multiple of dimension {}",
                self.data.len(),
                self.dim
            )));
        }
        Ok(())
    }

    /// Top `k` rows by inner product with `query`, best first.
    /// Equal scores come back in row order.
    pub fn search(&self, query: &Vector, k: usize) -> Result<Vec<(usize, f32)>> {
        if query.dim() != self.dim {
            return Err(Error::InvalidDimension {
                expected: self.dim,
                actual: query.dim(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        // min-heap on (score, -row) holding the current best k
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<usize>)>> =
            BinaryHeap::with_capacity(k + 1);

        for (i, row) in self.data.chunks_exact(self.dim).enumerate() {
            let score = OrderedFloat(dot_product_simd(query.as_slice(), row));
            let entry = Reverse((score, Reverse(i)));
            if heap.len() < k {
                heap.push(entry);
            } else if let Some(worst) = heap.peek() {
                if entry < *worst {
                    heap.pop();
                    heap.push(entry);
                }
            }
        }

        let mut hits: Vec<(usize, f32)> = heap
            .into_iter()
            .map(|Reverse((score, Reverse(i)))| (i, score.into_inner()))
            .collect();
        hits.sort_by(|a, b| {
            OrderedFloat(b.1)
                .cmp(&OrderedFloat(a.1))
                .then_with(|| a.0.cmp(&b.0))
        });
        Ok(hits)
    }
}
