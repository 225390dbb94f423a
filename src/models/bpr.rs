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
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{check_loss, sample_negative, Factors, Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::Result;
use crate::types::TopK;
use crate::utils::sigmoid;

#[derive(Clone, Debug)]
pub struct BprParams {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub init_scale: f64,
}

impl Default for BprParams {
    fn default() -> Self {
        BprParams {
            factors: 32,
            epochs: 50,
            learning_rate: 0.05,
            regularization: 0.01,
            init_scale: 0.1,
        }
    }
}

/// Bayesian personalised ranking: every observed interaction counts as positive feedback, and
/// the model learns to rank a positive item above a randomly drawn unobserved one. Scores are
/// `b_i + p_u * q_i` and carry no rating semantics.
pub struct BprModel {
    params: BprParams,
    seed: u64,
    session: Session<Factors>,
}

impl BprModel {
    pub fn new(config: &BenchConfig, params: BprParams) -> Self {
        BprModel { params, seed: config.seed, session: Session::new("BPR", config.num_threads) }
    }
}

impl Recommender for BprModel {

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

        let mut factors = Factors::random(
            data.num_users(), data.num_items(), params.factors, params.init_scale, &mut rng);

        let histories = data.histories();
        let interactions = data.interactions();
        let (learning_rate, regularization) = (params.learning_rate, params.regularization);

        for epoch in 0..params.epochs {

            let mut loss = 0.0;
            let mut num_samples = 0;

            for _ in 0..interactions.len() {
                let positive = &interactions[rng.gen_range(0..interactions.len())];
                let (user, item) = (positive.user as usize, positive.item as usize);

                let other = match sample_negative(&mut rng, data.num_items(), &histories[user]) {
                    Some(other) => other as usize,
                    None => continue,
                };

                let difference = factors.item_bias[item] - factors.item_bias[other] +
                    factors.users.row(user).dot(&(&factors.items.row(item) - &factors.items.row(other)));

                let gradient = sigmoid(-difference);
                loss -= sigmoid(difference).ln();
                num_samples += 1;

                let (bias_item, bias_other) = (factors.item_bias[item], factors.item_bias[other]);
                factors.item_bias[item] += learning_rate * (gradient - regularization * bias_item);
                factors.item_bias[other] += learning_rate * (-gradient - regularization * bias_other);

                for f in 0..params.factors {
                    let p = factors.users[[user, f]];
                    let q_item = factors.items[[item, f]];
                    let q_other = factors.items[[other, f]];

                    factors.users[[user, f]] += learning_rate * (gradient * (q_item - q_other) - regularization * p);
                    factors.items[[item, f]] += learning_rate * (gradient * p - regularization * q_item);
                    factors.items[[other, f]] += learning_rate * (-gradient * p - regularization * q_other);
                }
            }

            let mean_loss = if num_samples > 0 { loss / num_samples as f64 } else { 0.0 };
            debug!("{} epoch {}: bpr loss {:.4}", name, epoch + 1, mean_loss);
            check_loss(name, epoch, mean_loss)?;
        }

        factors.check_finite(name)?;
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

#[cfg(test)]
mod tests {

    use super::{BprModel, BprParams};
    use crate::models::tests::{check_contract, in_community_fraction, test_config, two_communities};
    use crate::models::Recommender;

    #[test]
    fn contract() {
        let data = two_communities();
        let mut model = BprModel::new(&test_config(), BprParams::default());
        check_contract(&mut model, &data, 5);
    }

    #[test]
    fn recommends_within_community() {
        let data = two_communities();
        let params = BprParams { epochs: 100, ..BprParams::default() };
        let mut model = BprModel::new(&test_config(), params);

        model.on_start().unwrap();
        model.train(&data).unwrap();

        assert!(in_community_fraction(&model, &data) > 0.7);
        model.on_stop().unwrap();
    }
}
