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

use ndarray::{s, Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use super::{check_loss, random_matrix, sample_negative, Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::{BenchError, Result};
use crate::types::TopK;
use crate::utils::sigmoid;

#[derive(Clone, Debug)]
pub struct NcfParams {
    /// Embedding size of the generalised matrix factorisation branch.
    pub gmf_factors: usize,
    /// Embedding size per side of the multilayer perceptron branch.
    pub mlp_factors: usize,
    pub hidden_units: usize,
    pub epochs: usize,
    /// Unobserved items sampled per observed interaction.
    pub num_negatives: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub init_scale: f64,
}

impl Default for NcfParams {
    fn default() -> Self {
        NcfParams {
            gmf_factors: 8,
            mlp_factors: 8,
            hidden_units: 16,
            epochs: 10,
            num_negatives: 4,
            learning_rate: 0.05,
            regularization: 1e-5,
            init_scale: 0.1,
        }
    }
}

/// Parameters of the neural matrix factorisation network.
pub struct NeuMf {
    gmf_users: Array2<f64>,
    gmf_items: Array2<f64>,
    mlp_users: Array2<f64>,
    mlp_items: Array2<f64>,
    hidden_weights: Array2<f64>,
    hidden_bias: Array1<f64>,
    gmf_output: Array1<f64>,
    mlp_output: Array1<f64>,
    output_bias: f64,
}

/// Intermediate values of a forward pass, kept for backpropagation.
struct Activations {
    gmf: Array1<f64>,
    mlp_input: Array1<f64>,
    hidden: Array1<f64>,
    probability: f64,
}

impl NeuMf {

    fn new(num_users: usize, num_items: usize, params: &NcfParams, rng: &mut StdRng) -> Self {
        NeuMf {
            gmf_users: random_matrix(num_users, params.gmf_factors, params.init_scale, rng),
            gmf_items: random_matrix(num_items, params.gmf_factors, params.init_scale, rng),
            mlp_users: random_matrix(num_users, params.mlp_factors, params.init_scale, rng),
            mlp_items: random_matrix(num_items, params.mlp_factors, params.init_scale, rng),
            hidden_weights: random_matrix(
                params.hidden_units, 2 * params.mlp_factors, params.init_scale, rng),
            hidden_bias: Array1::zeros(params.hidden_units),
            gmf_output: random_matrix(1, params.gmf_factors, params.init_scale, rng).row(0).to_owned(),
            mlp_output: random_matrix(1, params.hidden_units, params.init_scale, rng).row(0).to_owned(),
            output_bias: 0.0,
        }
    }

    fn forward(&self, user: usize, item: usize) -> Activations {
        let gmf = &self.gmf_users.row(user) * &self.gmf_items.row(item);

        let mlp_factors = self.mlp_users.ncols();
        let mut mlp_input = Array1::<f64>::zeros(2 * mlp_factors);
        mlp_input.slice_mut(s![..mlp_factors]).assign(&self.mlp_users.row(user));
        mlp_input.slice_mut(s![mlp_factors..]).assign(&self.mlp_items.row(item));

        let hidden = (self.hidden_weights.dot(&mlp_input) + &self.hidden_bias)
            .mapv(|value| value.max(0.0));

        let logit = self.gmf_output.dot(&gmf) + self.mlp_output.dot(&hidden) + self.output_bias;

        Activations { gmf, mlp_input, hidden, probability: sigmoid(logit) }
    }

    /// One gradient step on the binary cross entropy of a single example, returns its loss.
    fn step(&mut self, user: usize, item: usize, label: f64, learning_rate: f64, regularization: f64) -> f64 {

        let activations = self.forward(user, item);
        let output_gradient = activations.probability - label;

        // Gradients flowing into the two branches, computed before the output layer changes.
        let gmf_gradient = self.gmf_output.mapv(|weight| weight * output_gradient);
        let hidden_gradient: Array1<f64> = self.mlp_output.iter()
            .zip(activations.hidden.iter())
            .map(|(weight, activation)| if *activation > 0.0 { weight * output_gradient } else { 0.0 })
            .collect();
        let mlp_input_gradient = self.hidden_weights.t().dot(&hidden_gradient);

        self.gmf_output.scaled_add(-learning_rate * output_gradient, &activations.gmf);
        self.mlp_output.scaled_add(-learning_rate * output_gradient, &activations.hidden);
        self.output_bias -= learning_rate * output_gradient;

        for (row, gradient) in hidden_gradient.iter().enumerate() {
            if *gradient != 0.0 {
                self.hidden_weights.row_mut(row).scaled_add(-learning_rate * gradient, &activations.mlp_input);
            }
        }
        self.hidden_bias.scaled_add(-learning_rate, &hidden_gradient);

        let gmf_user = self.gmf_users.row(user).to_owned();
        let gmf_item = self.gmf_items.row(item).to_owned();
        update_embedding(&mut self.gmf_users, user, &(&gmf_gradient * &gmf_item), learning_rate, regularization);
        update_embedding(&mut self.gmf_items, item, &(&gmf_gradient * &gmf_user), learning_rate, regularization);

        let mlp_factors = self.mlp_users.ncols();
        update_embedding(&mut self.mlp_users, user,
            &mlp_input_gradient.slice(s![..mlp_factors]).to_owned(), learning_rate, regularization);
        update_embedding(&mut self.mlp_items, item,
            &mlp_input_gradient.slice(s![mlp_factors..]).to_owned(), learning_rate, regularization);

        let probability = activations.probability.max(1e-12).min(1.0 - 1e-12);
        -(label * probability.ln() + (1.0 - label) * (1.0 - probability).ln())
    }

    fn is_finite(&self) -> bool {
        [&self.gmf_users, &self.gmf_items, &self.mlp_users, &self.mlp_items, &self.hidden_weights]
            .iter()
            .all(|matrix| matrix.iter().all(|value| value.is_finite())) &&
            self.output_bias.is_finite()
    }
}

fn update_embedding(
    embeddings: &mut Array2<f64>,
    row: usize,
    gradient: &Array1<f64>,
    learning_rate: f64,
    regularization: f64,
) {
    let mut embedding = embeddings.row_mut(row);
    embedding *= 1.0 - learning_rate * regularization;
    embedding.scaled_add(-learning_rate, gradient);
}

impl Scorer for NeuMf {
    fn score(&self, user: u32, item: u32) -> f64 {
        if user as usize >= self.gmf_users.nrows() || item as usize >= self.gmf_items.nrows() {
            return 0.0;
        }
        self.forward(user as usize, item as usize).probability
    }
}

/// Neural collaborative filtering: a generalised matrix factorisation branch and a multilayer
/// perceptron over concatenated embeddings, fused into a single sigmoid output that estimates
/// the probability of an interaction. Trained on observed interactions against sampled
/// unobserved ones.
pub struct NcfModel {
    params: NcfParams,
    seed: u64,
    session: Session<NeuMf>,
}

impl NcfModel {
    pub fn new(config: &BenchConfig, params: NcfParams) -> Self {
        NcfModel { params, seed: config.seed, session: Session::new("NCF", config.num_threads) }
    }
}

impl Recommender for NcfModel {

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

        let mut network = NeuMf::new(data.num_users(), data.num_items(), params, &mut rng);

        let histories = data.histories();
        let mut order: Vec<usize> = (0..data.len()).collect();
        let interactions = data.interactions();

        for epoch in 0..params.epochs {

            order.shuffle(&mut rng);
            let mut loss = 0.0;
            let mut num_examples = 0;

            for index in order.iter() {
                let interaction = &interactions[*index];
                let (user, item) = (interaction.user as usize, interaction.item as usize);

                loss += network.step(user, item, 1.0, params.learning_rate, params.regularization);
                num_examples += 1;

                for _ in 0..params.num_negatives {
                    if let Some(other) = sample_negative(&mut rng, data.num_items(), &histories[user]) {
                        loss += network.step(user, other as usize, 0.0,
                            params.learning_rate, params.regularization);
                        num_examples += 1;
                    }
                }
            }

            let mean_loss = loss / num_examples as f64;
            debug!("{} epoch {}: log loss {:.4}", name, epoch + 1, mean_loss);
            check_loss(name, epoch, mean_loss)?;
        }

        if !network.is_finite() {
            return Err(BenchError::training(name, "network weights diverged to non-finite values"));
        }

        self.session.install(network, data);

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

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{NcfModel, NcfParams, NeuMf};
    use crate::models::tests::{check_contract, test_config, two_communities};
    use crate::models::Recommender;

    #[test]
    fn contract() {
        let data = two_communities();
        let mut model = NcfModel::new(&test_config(), NcfParams::default());
        check_contract(&mut model, &data, 5);
    }

    #[test]
    fn gradient_steps_fit_a_single_example() {
        let params = NcfParams::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut network = NeuMf::new(2, 2, &params, &mut rng);

        let before = network.forward(0, 1).probability;
        for _ in 0..200 {
            network.step(0, 1, 1.0, 0.1, 0.0);
        }
        let after = network.forward(0, 1).probability;

        assert!(after > before);
        assert!(after > 0.9);
    }

    #[test]
    fn scores_are_probabilities() {
        let data = two_communities();
        let mut model = NcfModel::new(&test_config(), NcfParams { epochs: 3, ..NcfParams::default() });

        model.on_start().unwrap();
        model.train(&data).unwrap();
        let scores = model.predict_scores(&data).unwrap();
        model.on_stop().unwrap();

        assert!(scores.iter().all(|score| *score > 0.0 && *score < 1.0));
    }
}
