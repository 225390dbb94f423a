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
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{check_loss, random_matrix, sample_negative, Factors, Recommender, Scorer, Session};
use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::Result;
use crate::types::TopK;
use crate::utils::sigmoid;

#[derive(Clone, Debug)]
pub struct LightGcnParams {
    pub factors: usize,
    /// Number of propagation steps over the interaction graph.
    pub layers: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub init_scale: f64,
}

impl Default for LightGcnParams {
    fn default() -> Self {
        LightGcnParams {
            factors: 64,
            layers: 3,
            epochs: 30,
            batch_size: 1024,
            learning_rate: 0.05,
            weight_decay: 1e-4,
            init_scale: 0.1,
        }
    }
}

/// Symmetrically normalised user-item adjacency, one weighted edge per distinct interaction.
struct Graph {
    edges: Vec<(u32, u32, f64)>,
}

impl Graph {

    fn from(data: &Partition) -> Self {
        let histories = data.histories();

        let mut item_degrees = vec![0_usize; data.num_items()];
        for history in histories.iter() {
            for item in history.iter() {
                item_degrees[*item as usize] += 1;
            }
        }

        let mut edges = Vec::with_capacity(data.len());
        for (user, history) in histories.iter().enumerate() {
            let mut items: Vec<u32> = history.iter().cloned().collect();
            items.sort_unstable();

            for item in items {
                let weight = 1.0 / ((history.len() * item_degrees[item as usize]) as f64).sqrt();
                edges.push((user as u32, item, weight));
            }
        }

        Graph { edges }
    }

    /// One step of neighbourhood aggregation.
    fn propagate(&self, users: &Array2<f64>, items: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let mut next_users = Array2::zeros(users.raw_dim());
        let mut next_items = Array2::zeros(items.raw_dim());

        for (user, item, weight) in self.edges.iter() {
            next_users.row_mut(*user as usize).scaled_add(*weight, &items.row(*item as usize));
            next_items.row_mut(*item as usize).scaled_add(*weight, &users.row(*user as usize));
        }

        (next_users, next_items)
    }

    /// Mean of the embeddings after 0 to `layers` propagation steps. The adjacency is symmetric,
    /// so the same computation maps gradients on the output back to the input embeddings.
    fn layer_mean(
        &self,
        users: &Array2<f64>,
        items: &Array2<f64>,
        layers: usize,
    ) -> (Array2<f64>, Array2<f64>) {
        let mut sum_users = users.clone();
        let mut sum_items = items.clone();
        let mut current = (users.clone(), items.clone());

        for _ in 0..layers {
            current = self.propagate(&current.0, &current.1);
            sum_users += &current.0;
            sum_items += &current.1;
        }

        let num_layers = (layers + 1) as f64;
        sum_users /= num_layers;
        sum_items /= num_layers;

        (sum_users, sum_items)
    }
}

/// Light graph convolution: learned input embeddings are smoothed over the bipartite
/// interaction graph without any transformations or non-linearities, and trained with the BPR
/// loss on the smoothed embeddings.
pub struct LightGcnModel {
    params: LightGcnParams,
    seed: u64,
    session: Session<Factors>,
}

impl LightGcnModel {
    pub fn new(config: &BenchConfig, params: LightGcnParams) -> Self {
        LightGcnModel {
            params,
            seed: config.seed,
            session: Session::new("LightGCN", config.num_threads),
        }
    }
}

impl Recommender for LightGcnModel {

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

        let graph = Graph::from(data);
        let histories = data.histories();
        let interactions = data.interactions();

        let mut users = random_matrix(data.num_users(), params.factors, params.init_scale, &mut rng);
        let mut items = random_matrix(data.num_items(), params.factors, params.init_scale, &mut rng);

        let batch_size = params.batch_size.max(1);
        let num_batches = (interactions.len() + batch_size - 1) / batch_size;
        let decay = 1.0 - params.learning_rate * params.weight_decay;

        for epoch in 0..params.epochs {

            let mut loss = 0.0;
            let mut num_samples = 0;

            for _ in 0..num_batches {

                let (final_users, final_items) = graph.layer_mean(&users, &items, params.layers);

                let mut user_gradients = Array2::<f64>::zeros(users.raw_dim());
                let mut item_gradients = Array2::<f64>::zeros(items.raw_dim());

                for _ in 0..batch_size {
                    let positive = &interactions[rng.gen_range(0..interactions.len())];
                    let (user, item) = (positive.user as usize, positive.item as usize);

                    let other = match sample_negative(&mut rng, data.num_items(), &histories[user]) {
                        Some(other) => other as usize,
                        None => continue,
                    };

                    let user_embedding = final_users.row(user);
                    let item_difference: Array1<f64> =
                        &final_items.row(item) - &final_items.row(other);
                    let difference = user_embedding.dot(&item_difference);

                    let gradient = sigmoid(-difference);
                    loss -= sigmoid(difference).ln();
                    num_samples += 1;

                    user_gradients.row_mut(user).scaled_add(-gradient, &item_difference);
                    item_gradients.row_mut(item).scaled_add(-gradient, &user_embedding);
                    item_gradients.row_mut(other).scaled_add(gradient, &user_embedding);
                }

                let (user_gradients, item_gradients) =
                    graph.layer_mean(&user_gradients, &item_gradients, params.layers);

                users *= decay;
                items *= decay;
                users.scaled_add(-params.learning_rate, &user_gradients);
                items.scaled_add(-params.learning_rate, &item_gradients);
            }

            let mean_loss = if num_samples > 0 { loss / num_samples as f64 } else { 0.0 };
            debug!("{} epoch {}: bpr loss {:.4}", name, epoch + 1, mean_loss);
            check_loss(name, epoch, mean_loss)?;
        }

        let (final_users, final_items) = graph.layer_mean(&users, &items, params.layers);

        let factors = Factors {
            users: final_users,
            items: final_items,
            user_bias: Array1::zeros(data.num_users()),
            item_bias: Array1::zeros(data.num_items()),
            global_bias: 0.0,
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

    use ndarray::arr2;

    use super::{Graph, LightGcnModel, LightGcnParams};
    use crate::dataset::Partition;
    use crate::models::tests::{check_contract, test_config, two_communities};
    use crate::types::Interaction;

    #[test]
    fn contract() {
        let data = two_communities();
        let params = LightGcnParams { factors: 16, epochs: 10, ..LightGcnParams::default() };
        let mut model = LightGcnModel::new(&test_config(), params);
        check_contract(&mut model, &data, 5);
    }

    #[test]
    fn normalised_propagation() {
        // user 0 has items 0 and 1, user 1 has item 1
        let data = Partition::new(vec![
            Interaction::new(0, 0, 1.0),
            Interaction::new(0, 1, 1.0),
            Interaction::new(1, 1, 1.0),
        ], 2, 2);

        let graph = Graph::from(&data);
        let users = arr2(&[[1.0], [2.0]]);
        let items = arr2(&[[4.0], [8.0]]);

        let (next_users, next_items) = graph.propagate(&users, &items);

        let w00 = 1.0 / 2f64.sqrt();
        let w01 = 1.0 / 4f64.sqrt();
        let w11 = 1.0 / 2f64.sqrt();

        assert!((next_users[[0, 0]] - (w00 * 4.0 + w01 * 8.0)).abs() < 1e-12);
        assert!((next_users[[1, 0]] - w11 * 8.0).abs() < 1e-12);
        assert!((next_items[[0, 0]] - w00 * 1.0).abs() < 1e-12);
        assert!((next_items[[1, 0]] - (w01 * 1.0 + w11 * 2.0)).abs() < 1e-12);

        let (mean_users, _) = graph.layer_mean(&users, &items, 1);
        assert!((mean_users[[1, 0]] - (2.0 + w11 * 8.0) / 2.0).abs() < 1e-12);
    }
}
