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

#[derive(Clone, Debug)]
pub struct SvdParams {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    /// Factors are initialised uniformly in `[-init_scale, init_scale)`.
    pub init_scale: f64,
}

impl Default for SvdParams {
    fn default() -> Self {
        SvdParams {
            factors: 64,
            epochs: 20,
            learning_rate: 0.005,
            regularization: 0.02,
            init_scale: 0.1,
        }
    }
}

/// Biased matrix factorisation trained with stochastic gradient descent on the squared error,
/// predicting `mu + b_u + b_i + p_u * q_i`.
pub struct SvdModel {
    params: SvdParams,
    seed: u64,
    session: Session<Factors>,
}

impl SvdModel {
    pub fn new(config: &BenchConfig, params: SvdParams) -> Self {
        SvdModel { params, seed: config.seed, session: Session::new("SVD", config.num_threads) }
    }
}

impl Recommender for SvdModel {

    fn name(&self) -> &str {
        self.session.name()
    }

    fn on_start(&mut self) -> Result<()> {
        self.session.start()
    }

    fn train(&mut self, data: &Partition) -> Result<()> {

        self.session.begin_training(data)?;

        let params = &self.params;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut factors = Factors::random(
            data.num_users(), data.num_items(), params.factors, params.init_scale, &mut rng);
        factors.global_bias = data.mean_score();

        let mut order: Vec<usize> = (0..data.len()).collect();
        let interactions = data.interactions();

        for epoch in 0..params.epochs {

            order.shuffle(&mut rng);
            let mut squared_error = 0.0;

            for index in order.iter() {
                let interaction = &interactions[*index];
                let (user, item) = (interaction.user as usize, interaction.item as usize);

                let error = interaction.score - factors.predict(interaction.user, interaction.item);
                squared_error += error * error;

                let user_bias = factors.user_bias[user];
                let item_bias = factors.item_bias[item];
                factors.user_bias[user] += params.learning_rate *
                    (error - params.regularization * user_bias);
                factors.item_bias[item] += params.learning_rate *
                    (error - params.regularization * item_bias);

                let mut user_factors = factors.users.row_mut(user);
                let mut item_factors = factors.items.row_mut(item);

                for f in 0..params.factors {
                    let p = user_factors[f];
                    let q = item_factors[f];
                    user_factors[f] += params.learning_rate * (error * q - params.regularization * p);
                    item_factors[f] += params.learning_rate * (error * p - params.regularization * q);
                }
            }

            let rmse = (squared_error / data.len() as f64).sqrt();
            debug!("{} epoch {}: training rmse {:.4}", self.session.name(), epoch + 1, rmse);
            check_loss(self.session.name(), epoch, rmse)?;
        }

        factors.check_finite(self.session.name())?;
        self.session.install(factors, data);

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
