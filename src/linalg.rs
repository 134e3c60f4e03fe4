//! # Sparse vectors
//!
//! Minimal sparse linear algebra used by the search engine. A [`SparseVec`] doubles as
//! the state representation: an MDP state is a unit vector, a POMDP belief is a
//! probability distribution over hidden states.

use std::fmt::{Debug, Formatter};
use serde::{Deserialize, Serialize};

/// Sorted, duplicate-free sparse vector of `f64` entries.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVec {
    dim: usize,
    entries: Vec<(usize, f64)>,
}

impl SparseVec {
    /// Build from (index, value) pairs. Entries are sorted, duplicates summed, exact zeros dropped.
    pub fn new(dim: usize, mut entries: Vec<(usize, f64)>) -> Self {
        entries.sort_by_key(|(i, _)| *i);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(entries.len());
        for (i, v) in entries {
            assert!(i < dim, "sparse index {} out of range for dimension {}", i, dim);
            match merged.last_mut() {
                Some((j, w)) if *j == i => *w += v,
                _ => merged.push((i, v)),
            }
        }
        merged.retain(|(_, v)| *v != 0.0);
        SparseVec { dim, entries: merged }
    }

    pub fn zeros(dim: usize) -> Self {
        SparseVec { dim, entries: vec![] }
    }

    /// Unit vector `e_i`, the representation of a fully observed state
    pub fn unit(dim: usize, i: usize) -> Self {
        Self::new(dim, vec![(i, 1.0)])
    }

    pub fn from_dense(values: &[f64]) -> Self {
        Self::new(values.len(), values.iter().cloned().enumerate().collect())
    }

    #[inline] pub fn dim(&self) -> usize { self.dim }
    #[inline] pub fn nnz(&self) -> usize { self.entries.len() }
    #[inline] pub fn entries(&self) -> &[(usize, f64)] { &self.entries }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().cloned()
    }

    /// Indices of the non-zero entries, ascending
    pub fn support(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|(i, _)| *i)
    }

    pub fn get(&self, i: usize) -> f64 {
        match self.entries.binary_search_by_key(&i, |(j, _)| *j) {
            Ok(k) => self.entries[k].1,
            Err(_) => 0.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v).sum()
    }

    pub fn dot_dense(&self, dense: &[f64]) -> f64 {
        debug_assert!(dense.len() >= self.dim);
        self.entries.iter().map(|(i, v)| v * dense[*i]).sum()
    }

    /// Dot product of two sparse vectors (merge of the sorted entry lists)
    pub fn dot(&self, other: &SparseVec) -> f64 {
        let (mut a, mut b) = (self.entries.iter().peekable(), other.entries.iter().peekable());
        let mut total = 0.0;
        while let (Some((i, x)), Some((j, y))) = (a.peek(), b.peek()) {
            match i.cmp(j) {
                std::cmp::Ordering::Less => { a.next(); }
                std::cmp::Ordering::Greater => { b.next(); }
                std::cmp::Ordering::Equal => {
                    total += x * y;
                    a.next();
                    b.next();
                }
            }
        }
        total
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(self.dim, self.entries.iter().map(|(i, v)| (*i, v * factor)).collect())
    }

    /// Rescale so the entries sum to one. Returns `None` for a zero vector.
    pub fn normalized(&self) -> Option<Self> {
        let total = self.sum();
        if total <= 0.0 { return None; }
        Some(self.scaled(1.0 / total))
    }

    pub fn to_dense(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.dim];
        for (i, v) in self.iter() {
            out[i] = v;
        }
        out
    }

    pub fn max_abs_diff(&self, other: &SparseVec) -> f64 {
        let a = self.to_dense();
        let b = other.to_dense();
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
    }

    /// Canonical hashable key (bit-exact, `-0.0` folded into `0.0`)
    pub fn key(&self) -> StateKey {
        StateKey(self.entries.iter().map(|(i, v)| (*i as u32, (v + 0.0).to_bits())).collect())
    }
}

impl Debug for SparseVec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (k, (i, v)) in self.entries.iter().enumerate() {
            if k > 0 { write!(f, ", ")?; }
            write!(f, "{}:{:.4}", i, v)?;
        }
        write!(f, "]")
    }
}

/// Canonical lookup key of a state vector
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateKey(Vec<(u32, u64)>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_merges_and_sorts() {
        let v = SparseVec::new(5, vec![(3, 1.0), (1, 2.0), (3, 0.5), (4, 0.0)]);
        assert_eq!(v.entries(), &[(1, 2.0), (3, 1.5)]);
        assert_eq!(v.support().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(v.get(3), 1.5);
        assert_eq!(v.get(0), 0.0);
    }

    #[test]
    fn dot_products_agree() {
        let a = SparseVec::new(4, vec![(0, 1.0), (2, 3.0)]);
        let b = SparseVec::new(4, vec![(2, 2.0), (3, 7.0)]);
        assert_eq!(a.dot(&b), 6.0);
        assert_eq!(a.dot_dense(&b.to_dense()), 6.0);
    }

    #[test]
    fn keys_ignore_negative_zero_and_construction_order() {
        let a = SparseVec::new(3, vec![(0, 0.25), (2, 0.75)]);
        let b = SparseVec::new(3, vec![(2, 0.75), (0, 0.25)]);
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), SparseVec::unit(3, 0).key());
    }

    #[test]
    fn normalization() {
        let v = SparseVec::new(2, vec![(0, 2.0), (1, 6.0)]).normalized().unwrap();
        assert!((v.get(0) - 0.25).abs() < 1e-12);
        assert!(SparseVec::zeros(2).normalized().is_none());
    }
}
