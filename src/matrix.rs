//! Symmetric view-factor matrix assembly and export.
//!
//! A single scalar is stored per unordered pair, so `get(A, B)` and
//! `get(B, A)` always answer with the identical value. This is the raw
//! engine-reported factor; area-weighted reciprocity
//! (`F_ji = A_i * F_ij / A_j`) is a downstream concern.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VfError};
use crate::surface::SurfaceId;

/// Normalized unordered pair of distinct surface ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    a: SurfaceId,
    b: SurfaceId,
}

impl PairKey {
    /// Builds the key with its ids in canonical order; the two surfaces
    /// must be distinct.
    pub fn new(x: SurfaceId, y: SurfaceId) -> Result<Self> {
        if x == y {
            return Err(VfError::InvalidConfig(format!(
                "a pair requires two distinct surfaces, got {x:?} twice"
            )));
        }
        if x < y {
            Ok(Self { a: x, b: y })
        } else {
            Ok(Self { a: y, b: x })
        }
    }

    pub fn a(&self) -> &SurfaceId {
        &self.a
    }

    pub fn b(&self) -> &SurfaceId {
        &self.b
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.a, self.b)
    }
}

/// One record of the sparse export; `a < b` and each unordered pair
/// appears exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseViewFactor {
    pub a: String,
    pub b: String,
    pub value: f64,
}

/// Two stored values closer than this are treated as the same result.
const VALUE_TOL: f64 = 1e-12;

#[derive(Debug, Default, Clone)]
pub struct ViewFactorMatrix {
    entries: HashMap<PairKey, f64>,
}

impl ViewFactorMatrix {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Preallocates for a known pair count.
    pub fn with_capacity(pairs: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(pairs),
        }
    }

    /// Inserts the factor for a pair. Re-inserting an identical value is a
    /// no-op; a differing value raises [`VfError::Conflict`].
    pub fn insert(&mut self, pair: PairKey, value: f64) -> Result<()> {
        if let Some(&stored) = self.entries.get(&pair) {
            if (stored - value).abs() <= VALUE_TOL {
                return Ok(());
            }
            return Err(VfError::Conflict {
                a: pair.a.to_string(),
                b: pair.b.to_string(),
                stored,
                new: value,
            });
        }
        self.entries.insert(pair, value);
        Ok(())
    }

    /// Inserts the factor, replacing any stored value for the pair.
    pub fn insert_overwrite(&mut self, pair: PairKey, value: f64) {
        self.entries.insert(pair, value);
    }

    /// Symmetric lookup: the argument order does not matter.
    pub fn get(&self, x: &SurfaceId, y: &SurfaceId) -> Result<f64> {
        let pair = PairKey::new(x.clone(), y.clone())?;
        self.entries
            .get(&pair)
            .copied()
            .ok_or_else(|| VfError::NotComputed {
                a: pair.a.to_string(),
                b: pair.b.to_string(),
            })
    }

    pub fn contains(&self, pair: &PairKey) -> bool {
        self.entries.contains_key(pair)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PairKey, f64)> {
        self.entries.iter().map(|(k, &v)| (k, v))
    }

    /// Dense table indexed by `order` (normally the registry's
    /// registration order). Unset entries, the diagonal included, carry a
    /// `NaN` sentinel; both triangles are populated from the single stored
    /// value per pair.
    pub fn export_dense(&self, order: &[SurfaceId]) -> Array2<f64> {
        let n = order.len();
        let index: HashMap<&SurfaceId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut dense = Array2::from_elem((n, n), f64::NAN);
        for (pair, value) in self.entries.iter() {
            if let (Some(&i), Some(&j)) = (index.get(&pair.a), index.get(&pair.b)) {
                dense[[i, j]] = *value;
                dense[[j, i]] = *value;
            }
        }
        dense
    }

    /// Sparse record list, sorted by id pair for deterministic output.
    pub fn export_sparse(&self) -> Vec<SparseViewFactor> {
        let mut records: Vec<SparseViewFactor> = self
            .entries
            .iter()
            .map(|(pair, &value)| SparseViewFactor {
                a: pair.a.to_string(),
                b: pair.b.to_string(),
                value,
            })
            .collect();
        records.sort_by(|l, r| (l.a.as_str(), l.b.as_str()).cmp(&(r.a.as_str(), r.b.as_str())));
        records
    }

    /// Sparse export serialized to JSON.
    pub fn export_sparse_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_sparse())?)
    }
}
