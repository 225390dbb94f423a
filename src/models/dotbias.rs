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

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::{check_loss, Factors, Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::Result;
use crate::types::TopK;
use crate::utils::sigmoid;

#[derive(Clone, Debug)]
pub struct DotBiasParams {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub init_scale: f64,
    /// Range predictions are squashed into. Derived from the training scores if absent: from the
    /// smallest score (or zero) to 10% above the largest.
    pub score_range: Option<(f64, f64)>,
}

impl Default for DotBiasParams {
    fn default() -> Self {
        DotBiasParams {
            factors: 40,
            epochs: 20,
            learning_rate: 0.05,
            weight_decay: 0.01,
            init_scale: 0.01,
            score_range: None,
        }
    }
}

/// Embedding dot product plus user and item biases, passed through a sigmoid scaled to the score
/// range.
pub struct RangedFactors {
    factors: Factors,
    low: f64,
    high: f64,
}

impl RangedFactors {
    fn predict(&self, user: u32, item: u32) -> f64 {
        self.low + (self.high - self.low) * sigmoid(self.factors.predict(user, item))
    }
}

impl Scorer for RangedFactors {
    fn score(&self, user: u32, item: u32) -> f64 {
        self.predict(user, item)
    }
}

pub struct DotBiasModel {
    params: DotBiasParams,
    seed: u64,
    session: Session<RangedFactors>,
}

impl DotBiasModel {
    pub fn new(config: &BenchConfig, params: DotBiasParams) -> Self {
        DotBiasModel {
            params,
            seed: config.seed,
            session: Session::new("EmbeddingDotBias", config.num_threads),
        }
    }
}

fn score_range(data: &Partition) -> (f64, f64) {
    let (min, max) = data.interactions().iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), interaction| {
            (min.min(interaction.score), max.max(interaction.score))
        });
    let low = min.min(0.0);
    let high = max + 0.1 * (max - low).max(1.0);
    (low, high)
}

impl Recommender for DotBiasModel {

    fn name(&self) -> &str {
        self.session.name()
    }

    fn on_start(&mut self) -> Result<()> {
        self.session.start()
    }

    fn train(&mut self, data: &Partition) -> Result<()> {

        self.session.begin_training(data)?;

        let name = self.session.name();
        let params = &self.params;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let (low, high) = params.score_range.unwrap_or_else(|| score_range(data));
        let mut model = RangedFactors {
            factors: Factors::random(
                data.num_users(), data.num_items(), params.factors, params.init_scale, &mut rng),
            low,
            high,
        };

        let mut order: Vec<usize> = (0..data.len()).collect();
        let interactions = data.interactions();

        for epoch in 0..params.epochs {

            order.shuffle(&mut rng);
            let mut squared_error = 0.0;

            for index in order.iter() {
                let interaction = &interactions[*index];
                let (user, item) = (interaction.user as usize, interaction.item as usize);

                let squashed = sigmoid(model.factors.predict(interaction.user, interaction.item));
                let prediction = low + (high - low) * squashed;
                let error = interaction.score - prediction;
                squared_error += error * error;

                // Derivative of the squared error with respect to the sigmoid input, sign flipped.
                let gradient = 2.0 * error * (high - low) * squashed * (1.0 - squashed);

                let factors = &mut model.factors;
                let user_bias = factors.user_bias[user];
                let item_bias = factors.item_bias[item];
                factors.user_bias[user] += params.learning_rate * (gradient - params.weight_decay * user_bias);
                factors.item_bias[item] += params.learning_rate * (gradient - params.weight_decay * item_bias);

                let mut user_factors = factors.users.row_mut(user);
                let mut item_factors = factors.items.row_mut(item);

                for f in 0..params.factors {
                    let p = user_factors[f];
                    let q = item_factors[f];
                    user_factors[f] += params.learning_rate * (gradient * q - params.weight_decay * p);
                    item_factors[f] += params.learning_rate * (gradient * p - params.weight_decay * q);
                }
            }

            let mse = squared_error / data.len() as f64;
            debug!("{} epoch {}: training mse {:.4}", name, epoch + 1, mse);
            check_loss(name, epoch, mse)?;
        }

        model.factors.check_finite(name)?;
        self.session.install(model, data);

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
