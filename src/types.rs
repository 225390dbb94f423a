/**
 * RecoBench
 * Copyright (C) 2018 Sebastian Schelter
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::collections::BTreeMap;

use fnv::{FnvHashMap, FnvHashSet};

/// An observed interaction between a user and an item. Users and items are referred to by their
/// dense indices, see `stats::DataDictionary` for the mapping from the original identifiers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interaction {
    pub user: u32,
    pub item: u32,
    pub score: f64,
    pub timestamp: Option<i64>,
}

impl Interaction {
    pub fn new(user: u32, item: u32, score: f64) -> Self {
        Interaction { user, item, score, timestamp: None }
    }
}

pub type DenseVector = Vec<u32>;

pub type SparseVector = FnvHashMap<u32, u32>;
pub type SparseMatrix = Vec<SparseVector>;

pub type SparseBinaryMatrix = Vec<FnvHashSet<u32>>;

/// Ranked item lists per user, the most relevant item first.
pub type TopK = BTreeMap<u32, Vec<u32>>;

pub fn new_dense_vector(dimensions: usize) -> DenseVector {
    vec![0; dimensions]
}

pub fn new_sparse_matrix(num_rows: usize) -> SparseMatrix {
    vec![FnvHashMap::with_capacity_and_hasher(0, Default::default()); num_rows]
}

pub fn new_sparse_binary_matrix(num_rows: usize) -> SparseBinaryMatrix {
    vec![FnvHashSet::with_capacity_and_hasher(0, Default::default()); num_rows]
}
