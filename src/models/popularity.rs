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

use super::{Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::Result;
use crate::types::{self, DenseVector, TopK};

/// Interaction counts and mean scores per item.
pub struct ItemStatistics {
    counts: DenseVector,
    mean_scores: Vec<f64>,
    global_mean: f64,
}

impl Scorer for ItemStatistics {

    fn score(&self, _user: u32, item: u32) -> f64 {
        match self.counts.get(item as usize) {
            Some(count) if *count > 0 => self.mean_scores[item as usize],
            _ => self.global_mean,
        }
    }

    fn relevance(&self, _user: u32, item: u32) -> f64 {
        self.counts.get(item as usize).map_or(0.0, |count| f64::from(*count))
    }
}

/// Non-personalised baseline: ranks items by how often they were interacted with, and predicts
/// the mean score an item received.
pub struct PopularityModel {
    session: Session<ItemStatistics>,
}

impl PopularityModel {
    pub fn new(config: &BenchConfig) -> Self {
        PopularityModel { session: Session::new("Popularity", config.num_threads) }
    }
}

impl Recommender for PopularityModel {

    fn name(&self) -> &str {
        self.session.name()
    }

    fn on_start(&mut self) -> Result<()> {
        self.session.start()
    }

    fn train(&mut self, data: &Partition) -> Result<()> {

        self.session.begin_training(data)?;

        let mut counts = types::new_dense_vector(data.num_items());
        let mut score_sums = vec![0.0; data.num_items()];

        for interaction in data.interactions() {
            counts[interaction.item as usize] += 1;
            score_sums[interaction.item as usize] += interaction.score;
        }

        let mean_scores = score_sums.iter()
            .zip(counts.iter())
            .map(|(sum, count)| if *count > 0 { sum / f64::from(*count) } else { 0.0 })
            .collect();

        let statistics = ItemStatistics { counts, mean_scores, global_mean: data.mean_score() };
        self.session.install(statistics, data);

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
