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

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::debug;

use super::{check_loss, random_matrix, Factors, Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::Result;
use crate::types::TopK;

#[derive(Clone, Debug)]
pub struct BiVaeParams {
    pub factors: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Weight of the KL divergence between the posteriors and the standard normal prior.
    pub beta_kl: f64,
    pub bias_regularization: f64,
    pub init_scale: f64,
    /// Initial standard deviation of the posteriors.
    pub init_std: f64,
}

impl Default for BiVaeParams {
    fn default() -> Self {
        BiVaeParams {
            factors: 20,
            epochs: 30,
            learning_rate: 0.01,
            beta_kl: 1.0,
            bias_regularization: 0.02,
            init_scale: 0.1,
            init_std: 0.1,
        }
    }
}

const MIN_LOG_STD: f64 = -6.0;
const MAX_LOG_STD: f64 = 2.0;

/// Gaussian posteriors over latent user and item vectors.
struct Posteriors {
    mean: Array2<f64>,
    log_std: Array2<f64>,
}

impl Posteriors {

    fn new(rows: usize, dimensions: usize, params: &BiVaeParams, rng: &mut StdRng) -> Self {
        Posteriors {
            mean: random_matrix(rows, dimensions, params.init_scale, rng),
            log_std: Array2::from_elem((rows, dimensions), params.init_std.ln()),
        }
    }

    /// Reparameterised sample of a row, together with the noise used to draw it.
    fn sample(&self, row: usize, rng: &mut StdRng) -> (Array1<f64>, Array1<f64>) {
        let noise: Array1<f64> = (0..self.mean.ncols())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        let sample = &self.mean.row(row) + &(&self.log_std.row(row).mapv(f64::exp) * &noise);
        (sample, noise)
    }

    /// Gradient step on the expected squared error plus the (scaled) KL divergence to N(0, I).
    /// `error_gradient` is the derivative of the error with respect to the sample.
    fn step(
        &mut self,
        row: usize,
        error_gradient: &Array1<f64>,
        noise: &Array1<f64>,
        kl_weight: f64,
        learning_rate: f64,
    ) {
        let mut mean = self.mean.row_mut(row);
        let mut log_std = self.log_std.row_mut(row);

        for f in 0..mean.len() {
            let std = log_std[f].exp();

            let mean_gradient = error_gradient[f] + kl_weight * mean[f];
            let log_std_gradient = error_gradient[f] * noise[f] * std + kl_weight * (std * std - 1.0);

            mean[f] -= learning_rate * mean_gradient;
            log_std[f] = (log_std[f] - learning_rate * log_std_gradient).max(MIN_LOG_STD).min(MAX_LOG_STD);
        }
    }

    fn kl_divergence(&self) -> f64 {
        self.mean.iter()
            .zip(self.log_std.iter())
            .map(|(mean, log_std)| 0.5 * ((2.0 * log_std).exp() + mean * mean - 1.0 - 2.0 * log_std))
            .sum()
    }
}

/// Bilateral variational matrix factorisation. Both users and items get a diagonal Gaussian
/// posterior over their latent vectors, learned by stochastic gradient descent on samples drawn
/// with the reparameterisation trick. A rating is modelled as the global mean plus biases plus
/// the inner product of the sampled vectors, predictions use the posterior means.
pub struct BiVaeModel {
    params: BiVaeParams,
    seed: u64,
    session: Session<Factors>,
}

impl BiVaeModel {
    pub fn new(config: &BenchConfig, params: BiVaeParams) -> Self {
        BiVaeModel { params, seed: config.seed, session: Session::new("BiVAE", config.num_threads) }
    }
}

impl Recommender for BiVaeModel {

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

        let mut users = Posteriors::new(data.num_users(), params.factors, params, &mut rng);
        let mut items = Posteriors::new(data.num_items(), params.factors, params, &mut rng);
        let mut user_bias = Array1::<f64>::zeros(data.num_users());
        let mut item_bias = Array1::<f64>::zeros(data.num_items());
        let global_mean = data.mean_score();

        // The KL term of an entity is spread over all of its ratings.
        let mut user_counts = vec![0_usize; data.num_users()];
        let mut item_counts = vec![0_usize; data.num_items()];
        for interaction in data.interactions() {
            user_counts[interaction.user as usize] += 1;
            item_counts[interaction.item as usize] += 1;
        }

        let mut order: Vec<usize> = (0..data.len()).collect();
        let interactions = data.interactions();

        for epoch in 0..params.epochs {

            order.shuffle(&mut rng);
            let mut squared_error = 0.0;

            for index in order.iter() {
                let interaction = &interactions[*index];
                let (user, item) = (interaction.user as usize, interaction.item as usize);

                let (user_sample, user_noise) = users.sample(user, &mut rng);
                let (item_sample, item_noise) = items.sample(item, &mut rng);

                let prediction = global_mean + user_bias[user] + item_bias[item] +
                    user_sample.dot(&item_sample);
                let error = interaction.score - prediction;
                squared_error += error * error;

                let (current_user_bias, current_item_bias) = (user_bias[user], item_bias[item]);
                user_bias[user] += params.learning_rate *
                    (error - params.bias_regularization * current_user_bias);
                item_bias[item] += params.learning_rate *
                    (error - params.bias_regularization * current_item_bias);

                let user_gradient = item_sample.mapv(|value| -error * value);
                let item_gradient = user_sample.mapv(|value| -error * value);

                users.step(user, &user_gradient, &user_noise,
                    params.beta_kl / user_counts[user] as f64, params.learning_rate);
                items.step(item, &item_gradient, &item_noise,
                    params.beta_kl / item_counts[item] as f64, params.learning_rate);
            }

            let elbo_loss = 0.5 * squared_error +
                params.beta_kl * (users.kl_divergence() + items.kl_divergence());
            debug!("{} epoch {}: negative elbo {:.4}", name, epoch + 1, elbo_loss);
            check_loss(name, epoch, elbo_loss)?;
        }

        let factors = Factors {
            users: users.mean,
            items: items.mean,
            user_bias,
            item_bias,
            global_bias: global_mean,
        };

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

    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{BiVaeModel, BiVaeParams, Posteriors};
    use crate::evaluation::eval_pointwise;
    use crate::models::tests::{check_contract, test_config, two_communities};
    use crate::models::Recommender;

    #[test]
    fn contract() {
        let data = two_communities();
        let mut model = BiVaeModel::new(&test_config(), BiVaeParams::default());
        check_contract(&mut model, &data, 5);
    }

    #[test]
    fn learns_item_effects() {
        let data = two_communities();
        let mut model = BiVaeModel::new(&test_config(), BiVaeParams::default());

        model.on_start().unwrap();
        model.train(&data).unwrap();
        let scores = model.predict_scores(&data).unwrap();
        model.on_stop().unwrap();

        let metrics = eval_pointwise(&data, &scores).unwrap();
        assert!(metrics["rsquared"] > 0.3);
    }

    #[test]
    fn samples_follow_the_posterior() {
        let posteriors = Posteriors {
            mean: Array2::from_elem((1, 4), 2.0),
            log_std: Array2::from_elem((1, 4), 0.5_f64.ln()),
        };
        let mut rng = StdRng::seed_from_u64(3);

        let samples: Vec<f64> = (0..5_000)
            .flat_map(|_| posteriors.sample(0, &mut rng).0.to_vec())
            .collect();

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        assert!((mean - 2.0).abs() < 0.02);
        assert!((variance - 0.25).abs() < 0.02);
    }
}
