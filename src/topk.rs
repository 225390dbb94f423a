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

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use fnv::FnvHashSet;
use scoped_pool::Pool;

use crate::types::{SparseBinaryMatrix, TopK};

/// Number of users ranked by a single task of the worker pool.
const USERS_PER_TASK: usize = 64;

/// Candidate in a bounded top-k heap.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct ScoredItem {
    pub item: u32,
    pub score: f64,
}

/// Ordering for our max-heap: the heap top must be the weakest retained candidate. Lower scores
/// compare greater, and among equal scores the larger item index compares greater, so ties are
/// resolved in favour of smaller indices. There is no total order on floating point numbers, NaN
/// scores must be mapped away before items enter the heap.
fn cmp_reverse(scored_item_a: &ScoredItem, scored_item_b: &ScoredItem) -> Ordering {
    match scored_item_a.score.partial_cmp(&scored_item_b.score) {
        Some(Ordering::Less) => Ordering::Greater,
        Some(Ordering::Greater) => Ordering::Less,
        _ => scored_item_a.item.cmp(&scored_item_b.item),
    }
}

impl Eq for ScoredItem {}

impl Ord for ScoredItem {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_reverse(self, other)
    }
}

impl PartialOrd for ScoredItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(cmp_reverse(self, other))
    }
}

/// Selects the `k` highest scoring items, best first. `scores` is indexed by item, items in
/// `exclude` are skipped.
pub fn top_k(scores: &[f64], k: usize, exclude: Option<&FnvHashSet<u32>>) -> Vec<u32> {

    if k == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<ScoredItem> = BinaryHeap::with_capacity(k);

    for (item_idx, score) in scores.iter().enumerate() {

        let item = item_idx as u32;

        if exclude.map_or(false, |items| items.contains(&item)) {
            continue;
        }

        let score = if score.is_nan() { f64::NEG_INFINITY } else { *score };
        let scored_item = ScoredItem { item, score };

        if heap.len() < k {
            heap.push(scored_item);
        } else if let Some(mut top) = heap.peek_mut() {
            if scored_item < *top {
                *top = scored_item;
            }
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|scored_item| scored_item.item)
        .collect()
}

/// Ranks the items for each of the given users on the worker pool. `score_user` fills a dense
/// score vector over all `num_items` items for a user. Items a user already has in `histories`
/// are never recommended back.
pub fn rank_users<F>(
    pool: &Pool,
    users: &[u32],
    num_items: usize,
    k: usize,
    histories: &SparseBinaryMatrix,
    score_user: F,
) -> TopK
    where F: Fn(u32, &mut [f64]) + Sync {

    let mut rankings: Vec<Vec<u32>> = vec![Vec::new(); users.len()];

    pool.scoped(|scope| {
        for (users_of_task, rankings_of_task) in users.chunks(USERS_PER_TASK)
            .zip(rankings.chunks_mut(USERS_PER_TASK)) {

            let score_user = &score_user;

            scope.execute(move || {
                let mut scores = vec![0.0; num_items];

                for (user, ranking) in users_of_task.iter().zip(rankings_of_task.iter_mut()) {
                    for score in scores.iter_mut() {
                        *score = 0.0;
                    }
                    score_user(*user, &mut scores);
                    *ranking = top_k(&scores, k, histories.get(*user as usize));
                }
            });
        }
    });

    users.iter().cloned().zip(rankings.into_iter()).collect()
}

#[cfg(test)]
mod tests {

    use fnv::FnvHashSet;
    use scoped_pool::Pool;

    use super::{rank_users, top_k, ScoredItem};
    use crate::types;

    #[test]
    fn scored_item_ordering_reversed() {
        let item_a = ScoredItem { item: 1, score: 0.5 };
        let item_b = ScoredItem { item: 2, score: 1.5 };
        let item_c = ScoredItem { item: 3, score: 0.3 };

        assert!(item_a > item_b);
        assert!(item_a < item_c);
        assert!(item_b < item_c);
    }

    #[test]
    fn ties_prefer_smaller_items() {
        let item_a = ScoredItem { item: 1, score: 0.5 };
        let item_b = ScoredItem { item: 4, score: 0.5 };

        assert!(item_a < item_b);
    }

    #[test]
    fn topk() {
        let scores = [0.5, 1.5, 0.3, 3.5, 2.5];

        assert_eq!(top_k(&scores, 3, None), vec![3, 4, 1]);
        assert_eq!(top_k(&scores, 10, None), vec![3, 4, 1, 0, 2]);
        assert!(top_k(&scores, 0, None).is_empty());
    }

    #[test]
    fn topk_skips_excluded_and_nan() {
        let scores = [f64::NAN, 1.0, 1.0, 0.2];
        let mut exclude = FnvHashSet::default();
        exclude.insert(1);

        assert_eq!(top_k(&scores, 3, Some(&exclude)), vec![2, 3, 0]);
    }

    #[test]
    fn ranking_on_pool() {
        let pool = Pool::new(2);

        let mut histories = types::new_sparse_binary_matrix(3);
        histories[2].insert(0);

        let users: Vec<u32> = vec![0, 2];

        let rankings = rank_users(&pool, &users, 4, 2, &histories, |user, scores| {
            for (item, score) in scores.iter_mut().enumerate() {
                *score = (user as f64 + 1.0) * (4 - item) as f64;
            }
        });

        pool.shutdown();

        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[&0], vec![0, 1]);
        assert_eq!(rankings[&2], vec![1, 2]);
    }
}
