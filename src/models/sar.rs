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

use std::collections::BinaryHeap;
use std::str::FromStr;

use fnv::FnvHashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::info;

use super::{Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::{BenchError, Result};
use crate::llr;
use crate::topk::ScoredItem;
use crate::types::{self, SparseMatrix, TopK};
use crate::utils;

/// How item-item similarities are derived from cooccurrence counts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Similarity {
    Cooccurrence,
    Jaccard,
    Lift,
    /// Loglikelihood ratio of the cooccurrence contingency table.
    LogLikelihood,
}

impl FromStr for Similarity {
    type Err = BenchError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "cooccurrence" => Ok(Similarity::Cooccurrence),
            "jaccard" => Ok(Similarity::Jaccard),
            "lift" => Ok(Similarity::Lift),
            "llr" => Ok(Similarity::LogLikelihood),
            other => Err(BenchError::InvalidConfig(format!("unknown similarity '{}'", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SarParams {
    pub similarity: Similarity,
    /// Item pairs cooccurring less often are considered unrelated.
    pub threshold: u32,
    /// Half-life of the time decay applied to user affinities, in seconds. Only applies to
    /// interactions with timestamps.
    pub time_decay_half_life: Option<f64>,
    /// Users with longer histories are downsampled to this many items when counting
    /// cooccurrences.
    pub max_history: usize,
    /// Number of most similar items retained per item, all of them if absent.
    pub max_neighbours: Option<usize>,
}

impl Default for SarParams {
    fn default() -> Self {
        SarParams {
            similarity: Similarity::Jaccard,
            threshold: 1,
            time_decay_half_life: Some(30.0 * 24.0 * 3600.0),
            max_history: 500,
            max_neighbours: None,
        }
    }
}

/// Trained state of SAR: per user affinities to items, and per item similarities to other items.
pub struct AffinitySimilarity {
    affinities: Vec<Vec<(u32, f64)>>,
    similarities: Vec<FnvHashMap<u32, f64>>,
}

impl Scorer for AffinitySimilarity {

    fn score(&self, user: u32, item: u32) -> f64 {
        match self.affinities.get(user as usize) {
            Some(affinities) => affinities.iter()
                .map(|(other_item, affinity)| {
                    affinity * self.similarities[*other_item as usize].get(&item).cloned().unwrap_or(0.0)
                })
                .sum(),
            None => 0.0,
        }
    }

    fn relevances(&self, user: u32, relevances: &mut [f64]) {
        if let Some(affinities) = self.affinities.get(user as usize) {
            for (other_item, affinity) in affinities.iter() {
                for (item, similarity) in self.similarities[*other_item as usize].iter() {
                    if let Some(relevance) = relevances.get_mut(*item as usize) {
                        *relevance += affinity * similarity;
                    }
                }
            }
        }
    }
}

/// Smart adaptive recommendations: a user's (time decayed) affinities to items are propagated
/// to similar items, where item similarity is derived from how often two items are interacted
/// with by the same users.
pub struct SarModel {
    params: SarParams,
    seed: u64,
    session: Session<AffinitySimilarity>,
}

impl SarModel {
    pub fn new(config: &BenchConfig, params: SarParams) -> Self {
        SarModel { params, seed: config.seed, session: Session::new("SAR", config.num_threads) }
    }
}

/// Sums the (optionally time decayed) scores of each user for each item.
fn user_affinities(data: &Partition, half_life: Option<f64>) -> Vec<Vec<(u32, f64)>> {

    let reference_time = data.interactions().iter().filter_map(|interaction| interaction.timestamp).max();

    let mut affinities = vec![FnvHashMap::<u32, f64>::default(); data.num_users()];

    for interaction in data.interactions() {
        let decay = match (half_life, interaction.timestamp, reference_time) {
            (Some(half_life), Some(timestamp), Some(reference_time)) if half_life > 0.0 => {
                (-((reference_time - timestamp) as f64) / half_life).exp2()
            },
            _ => 1.0,
        };

        *affinities[interaction.user as usize].entry(interaction.item).or_insert(0.0) +=
            interaction.score * decay;
    }

    affinities.into_iter()
        .map(|row| {
            let mut row: Vec<(u32, f64)> = row.into_iter().collect();
            row.sort_unstable_by_key(|(item, _)| *item);
            row
        })
        .collect()
}

/// Item cooccurrence counts over the (downsampled) user histories, the diagonal holds the number
/// of users per item.
fn cooccurrences(data: &Partition, max_history: usize, rng: &mut StdRng) -> SparseMatrix {

    let mut c = types::new_sparse_matrix(data.num_items());

    for history in data.histories().iter() {

        let mut items: Vec<u32> = history.iter().cloned().collect();
        items.sort_unstable();

        if items.len() > max_history {
            items.shuffle(rng);
            items.truncate(max_history);
        }

        for (n, item) in items.iter().enumerate() {
            *c[*item as usize].entry(*item).or_insert(0) += 1;

            for other_item in items[..n].iter() {
                *c[*item as usize].entry(*other_item).or_insert(0) += 1;
                *c[*other_item as usize].entry(*item).or_insert(0) += 1;
            }
        }
    }

    c
}

fn similarity(
    measure: Similarity,
    cooccurrences: u32,
    count_a: u32,
    count_b: u32,
    num_users: u64,
    logarithms: &[f64],
) -> f64 {
    let (c_ab, c_a, c_b) = (f64::from(cooccurrences), f64::from(count_a), f64::from(count_b));
    match measure {
        Similarity::Cooccurrence => c_ab,
        Similarity::Jaccard => c_ab / (c_a + c_b - c_ab),
        Similarity::Lift => c_ab / (c_a * c_b),
        Similarity::LogLikelihood =>
            llr::cooccurrence_llr(cooccurrences, count_a, count_b, num_users, logarithms),
    }
}

/// Turns a row of cooccurrence counts into similarities, keeping the `max_neighbours` most
/// similar items if requested.
fn rescore(
    item: u32,
    row: &types::SparseVector,
    item_counts: &[u32],
    params: &SarParams,
    num_users: u64,
    logarithms: &[f64],
) -> FnvHashMap<u32, f64> {

    let count_a = item_counts[item as usize];

    let scored = row.iter()
        .filter(|(_, num_cooccurrences)| **num_cooccurrences >= params.threshold)
        .map(|(other_item, num_cooccurrences)| {
            let count_b = item_counts[*other_item as usize];
            let score = similarity(
                params.similarity, *num_cooccurrences, count_a, count_b, num_users, logarithms);
            ScoredItem { item: *other_item, score }
        });

    match params.max_neighbours {
        None => scored.map(|scored_item| (scored_item.item, scored_item.score)).collect(),
        Some(k) => {
            let mut heap: BinaryHeap<ScoredItem> = BinaryHeap::with_capacity(k + 1);
            for scored_item in scored {
                heap.push(scored_item);
                if heap.len() > k {
                    heap.pop();
                }
            }
            heap.into_iter().map(|scored_item| (scored_item.item, scored_item.score)).collect()
        },
    }
}

impl Recommender for SarModel {

    fn name(&self) -> &str {
        self.session.name()
    }

    fn on_start(&mut self) -> Result<()> {
        self.session.start()
    }

    fn train(&mut self, data: &Partition) -> Result<()> {

        let pool = self.session.begin_training(data)?;

        let (scorer, duration) = utils::timed(|| {
            let mut rng = StdRng::seed_from_u64(self.seed);

            let c = cooccurrences(data, self.params.max_history.max(1), &mut rng);

            let item_counts: Vec<u32> = c.iter()
                .enumerate()
                .map(|(item, row)| row.get(&(item as u32)).cloned().unwrap_or(0))
                .collect();

            let num_users = data.histories().iter().filter(|history| !history.is_empty()).count() as u64;
            let logarithms = if self.params.similarity == Similarity::LogLikelihood {
                llr::logarithms_table(num_users as usize + 1)
            } else {
                Vec::new()
            };

            let mut similarities: Vec<FnvHashMap<u32, f64>> =
                vec![FnvHashMap::default(); data.num_items()];

            pool.scoped(|scope| {
                for (item, (row, similarities_for_item)) in c.iter()
                    .zip(similarities.iter_mut())
                    .enumerate() {

                    if row.is_empty() {
                        continue;
                    }

                    let item_counts = &item_counts;
                    let logarithms = &logarithms;
                    let params = &self.params;

                    scope.execute(move || {
                        *similarities_for_item = rescore(
                            item as u32, row, item_counts, params, num_users, logarithms);
                    });
                }
            });

            AffinitySimilarity {
                affinities: user_affinities(data, self.params.time_decay_half_life),
                similarities,
            }
        });

        let num_pairs: usize = scorer.similarities.iter().map(|row| row.len()).sum();
        info!("{} computed {} item similarities in {}ms", self.session.name(), num_pairs,
            utils::to_millis(duration));

        self.session.install(scorer, data);

        Ok(())
    }

    fn predict_k(&self, data: &Partition, k: usize) -> Result<TopK> {
        self.session.predict_k(data, k)
    }

    fn predict_scores(&self, data: &Partition) -> Result<Vec<f64>> {
        self.session.predict_scores(data)
    }

    fn on_stop(&mut self) -> Result<()> {
        self.session.stop()
    }

    fn scorer(&self) -> Result<Box<dyn Scorer + '_>> {
        self.session.scorer()
    }
}
