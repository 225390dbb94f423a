/*
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

//! Recommendation models behind a common interface.
//!
//! Every model acquires its own worker pool in `on_start` and releases it in `on_stop`. Training
//! and prediction are only possible in between.

use ndarray::{Array1, Array2};
use rand::Rng;
use scoped_pool::Pool;

use crate::config::BenchConfig;
use crate::dataset::Partition;
use crate::error::{BenchError, Result};
use crate::topk;
use crate::types::{SparseBinaryMatrix, TopK};

mod als;
mod bivae;
mod bpr;
mod dotbias;
mod lightgcn;
mod ncf;
mod popularity;
mod sar;
mod svd;

pub use self::als::{AlsModel, AlsParams};
pub use self::bivae::{BiVaeModel, BiVaeParams};
pub use self::bpr::{BprModel, BprParams};
pub use self::dotbias::{DotBiasModel, DotBiasParams};
pub use self::lightgcn::{LightGcnModel, LightGcnParams};
pub use self::ncf::{NcfModel, NcfParams};
pub use self::popularity::PopularityModel;
pub use self::sar::{SarModel, SarParams, Similarity};
pub use self::svd::{SvdModel, SvdParams};

/// A recommendation model that can be benchmarked.
pub trait Recommender {

    /// Stable display name, used as the row label in the results.
    fn name(&self) -> &str;

    /// Acquires the resources needed for training and prediction.
    fn on_start(&mut self) -> Result<()>;

    /// Fits the model on all interactions of `data`.
    fn train(&mut self, data: &Partition) -> Result<()>;

    /// Up to `k` items per user of `data`, by descending relevance. Items the user interacted
    /// with in the training data are not recommended again.
    fn predict_k(&self, data: &Partition, k: usize) -> Result<TopK>;

    /// One score per interaction of `data`, in the same order.
    fn predict_scores(&self, data: &Partition) -> Result<Vec<f64>>;

    /// Releases everything acquired in `on_start`.
    fn on_stop(&mut self) -> Result<()>;

    /// Access to the trained scoring function, used to blend models.
    fn scorer(&self) -> Result<Box<dyn Scorer + '_>>;
}

/// Scoring function of a trained model.
pub trait Scorer: Sync {

    /// Pointwise score for a (user, item) pair, e.g. a predicted rating.
    fn score(&self, user: u32, item: u32) -> f64;

    /// Relevance used for ranking, the pointwise score unless a model ranks differently.
    fn relevance(&self, user: u32, item: u32) -> f64 {
        self.score(user, item)
    }

    /// Fills `relevances` (indexed by item) for a user.
    fn relevances(&self, user: u32, relevances: &mut [f64]) {
        for (item, relevance) in relevances.iter_mut().enumerate() {
            *relevance = self.relevance(user, item as u32);
        }
    }
}

impl<'a, S: Scorer + ?Sized> Scorer for &'a S {

    fn score(&self, user: u32, item: u32) -> f64 {
        (**self).score(user, item)
    }

    fn relevance(&self, user: u32, item: u32) -> f64 {
        (**self).relevance(user, item)
    }

    fn relevances(&self, user: u32, relevances: &mut [f64]) {
        (**self).relevances(user, relevances)
    }
}

/// Worker pool of a model, only present between `on_start` and `on_stop`.
pub struct Backend {
    num_threads: usize,
    pool: Option<Pool>,
}

impl Backend {

    pub fn new(num_threads: usize) -> Self {
        Backend { num_threads: num_threads.max(1), pool: None }
    }

    pub fn start(&mut self) {
        if self.pool.is_none() {
            self.pool = Some(Pool::new(self.num_threads));
        }
    }

    pub fn stop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    pub fn is_active(&self) -> bool {
        self.pool.is_some()
    }

    pub fn pool(&self, model: &str) -> Result<&Pool> {
        self.pool.as_ref().ok_or_else(|| BenchError::BackendUnavailable(model.to_owned()))
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Trained state of a model together with the training histories, which are excluded from the
/// ranked lists.
struct Fitted<S> {
    scorer: S,
    histories: SparseBinaryMatrix,
}

/// The parts every model shares: a name, a backend and (once trained) a scorer.
pub(crate) struct Session<S> {
    name: &'static str,
    backend: Backend,
    fitted: Option<Fitted<S>>,
}

impl<S: Scorer> Session<S> {

    pub(crate) fn new(name: &'static str, num_threads: usize) -> Self {
        Session { name, backend: Backend::new(num_threads), fitted: None }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        self.backend.start();
        Ok(())
    }

    pub(crate) fn stop(&mut self) -> Result<()> {
        self.backend.stop();
        Ok(())
    }

    pub(crate) fn pool(&self) -> Result<&Pool> {
        self.backend.pool(self.name)
    }

    /// Checks the preconditions of training, returns the pool to train on.
    pub(crate) fn begin_training(&self, data: &Partition) -> Result<&Pool> {
        let pool = self.pool()?;
        if data.is_empty() {
            return Err(BenchError::training(self.name, "no training interactions"));
        }
        Ok(pool)
    }

    pub(crate) fn install(&mut self, scorer: S, data: &Partition) {
        self.fitted = Some(Fitted { scorer, histories: data.histories() });
    }

    fn fitted(&self) -> Result<&Fitted<S>> {
        self.fitted.as_ref().ok_or_else(|| BenchError::NotTrained(self.name.to_owned()))
    }

    pub(crate) fn predict_k(&self, data: &Partition, k: usize) -> Result<TopK> {
        let pool = self.pool()?;
        let fitted = self.fitted()?;
        Ok(rank_with(pool, &fitted.scorer, &fitted.histories, data, k))
    }

    pub(crate) fn predict_scores(&self, data: &Partition) -> Result<Vec<f64>> {
        self.pool()?;
        let fitted = self.fitted()?;
        Ok(score_with(&fitted.scorer, data))
    }

    pub(crate) fn scorer(&self) -> Result<Box<dyn Scorer + '_>> {
        let fitted = self.fitted()?;
        Ok(Box::new(&fitted.scorer))
    }
}

pub(crate) fn rank_with<S: Scorer + ?Sized>(
    pool: &Pool,
    scorer: &S,
    histories: &SparseBinaryMatrix,
    data: &Partition,
    k: usize,
) -> TopK {
    topk::rank_users(pool, &data.users(), data.num_items(), k, histories, |user, relevances| {
        scorer.relevances(user, relevances)
    })
}

pub(crate) fn score_with<S: Scorer + ?Sized>(scorer: &S, data: &Partition) -> Vec<f64> {
    data.interactions().iter()
        .map(|interaction| scorer.score(interaction.user, interaction.item))
        .collect()
}

/// Latent factors with biases, the trained state of the factorisation models.
pub struct Factors {
    pub users: Array2<f64>,
    pub items: Array2<f64>,
    pub user_bias: Array1<f64>,
    pub item_bias: Array1<f64>,
    pub global_bias: f64,
}

impl Factors {

    /// Factors drawn uniformly from `[-scale, scale)`, zero biases.
    pub fn random<R: Rng>(
        num_users: usize,
        num_items: usize,
        dimensions: usize,
        scale: f64,
        rng: &mut R,
    ) -> Self {
        Factors {
            users: random_matrix(num_users, dimensions, scale, rng),
            items: random_matrix(num_items, dimensions, scale, rng),
            user_bias: Array1::zeros(num_users),
            item_bias: Array1::zeros(num_items),
            global_bias: 0.0,
        }
    }

    pub fn predict(&self, user: u32, item: u32) -> f64 {
        let (user, item) = (user as usize, item as usize);
        if user >= self.users.nrows() || item >= self.items.nrows() {
            return self.global_bias;
        }
        self.global_bias + self.user_bias[user] + self.item_bias[item] +
            self.users.row(user).dot(&self.items.row(item))
    }

    pub fn check_finite(&self, model: &str) -> Result<()> {
        let finite = self.global_bias.is_finite() &&
            self.users.iter().all(|value| value.is_finite()) &&
            self.items.iter().all(|value| value.is_finite()) &&
            self.user_bias.iter().all(|value| value.is_finite()) &&
            self.item_bias.iter().all(|value| value.is_finite());

        if finite {
            Ok(())
        } else {
            Err(BenchError::training(model, "factors diverged to non-finite values"))
        }
    }
}

impl Scorer for Factors {

    fn score(&self, user: u32, item: u32) -> f64 {
        self.predict(user, item)
    }

    fn relevances(&self, user: u32, relevances: &mut [f64]) {
        let user = user as usize;
        if user >= self.users.nrows() {
            return;
        }
        let user_factors = self.users.row(user);
        let base = self.global_bias + self.user_bias[user];

        for (item, relevance) in relevances.iter_mut().enumerate().take(self.items.nrows()) {
            *relevance = base + self.item_bias[item] + user_factors.dot(&self.items.row(item));
        }
    }
}

pub(crate) fn random_matrix<R: Rng>(rows: usize, columns: usize, scale: f64, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_fn((rows, columns), |_| rng.gen_range(-scale..scale))
}

/// Draws an item the user has not interacted with, gives up after a few attempts.
pub(crate) fn sample_negative<R: Rng>(
    rng: &mut R,
    num_items: usize,
    history: &fnv::FnvHashSet<u32>,
) -> Option<u32> {
    if history.len() >= num_items {
        return None;
    }
    for _ in 0..20 {
        let candidate = rng.gen_range(0..num_items) as u32;
        if !history.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

pub(crate) fn check_loss(model: &str, epoch: usize, loss: f64) -> Result<()> {
    if loss.is_finite() {
        Ok(())
    } else {
        Err(BenchError::training(model, format!("loss diverged in epoch {}", epoch + 1)))
    }
}

/// The models compared in a benchmark run, with default hyperparameters.
pub fn roster(config: &BenchConfig) -> Vec<Box<dyn Recommender>> {
    vec![
        Box::new(PopularityModel::new(config)),
        Box::new(AlsModel::new(config, AlsParams::default())),
        Box::new(BiVaeModel::new(config, BiVaeParams::default())),
        Box::new(BprModel::new(config, BprParams::default())),
        Box::new(DotBiasModel::new(config, DotBiasParams::default())),
        Box::new(LightGcnModel::new(config, LightGcnParams::default())),
        Box::new(NcfModel::new(config, NcfParams::default())),
        Box::new(SarModel::new(config, SarParams::default())),
        Box::new(SvdModel::new(config, SvdParams::default())),
    ]
}

#[cfg(test)]
pub(crate) mod tests {


    use super::{roster, Backend, Recommender};
    use crate::config::BenchConfig;
    use crate::dataset::Partition;
    use crate::error::BenchError;
    use crate::types::Interaction;

    /// Two groups of users with disjoint tastes: even users like the low items, odd users the
    /// high ones. Ratings grow with the item index within a group.
    pub(crate) fn two_communities() -> Partition {
        let mut interactions = Vec::new();
        for user in 0..24_u32 {
            let offset = if user % 2 == 0 { 0 } else { 10 };
            for item in 0..10_u32 {
                if (user + item) % 3 != 0 {
                    let score = 1.0 + (item % 5) as f64;
                    interactions.push(Interaction::new(user, offset + item, score));
                }
            }
        }
        Partition::new(interactions, 24, 20)
    }

    pub(crate) fn test_config() -> BenchConfig {
        BenchConfig { num_threads: 2, ..BenchConfig::default() }
    }

    /// Checks the contract every model has to honour after training on `data`.
    pub(crate) fn check_contract(model: &mut dyn Recommender, data: &Partition, k: usize) {
        model.on_start().unwrap();
        model.train(data).unwrap();

        let top_k = model.predict_k(data, k).unwrap();
        let histories = data.histories();
        let scorer = model.scorer().unwrap();

        assert_eq!(top_k.len(), data.users().len());

        for (user, ranking) in top_k.iter() {
            assert!(ranking.len() <= k);

            for item in ranking.iter() {
                assert!(!histories[*user as usize].contains(item));
            }

            for pair in ranking.windows(2) {
                assert!(scorer.relevance(*user, pair[0]) >= scorer.relevance(*user, pair[1]));
            }
        }

        let scores = model.predict_scores(data).unwrap();
        assert_eq!(scores.len(), data.len());
        assert!(scores.iter().all(|score| score.is_finite()));

        drop(scorer);
        model.on_stop().unwrap();
    }

    /// Fraction of recommended items that stay within the community of the user.
    pub(crate) fn in_community_fraction(model: &dyn Recommender, data: &Partition) -> f64 {
        let top_k = model.predict_k(data, 3).unwrap();
        let mut total = 0;
        let mut in_community = 0;
        for (user, ranking) in top_k.iter() {
            for item in ranking.iter() {
                total += 1;
                if (*user % 2 == 0) == (*item < 10) {
                    in_community += 1;
                }
            }
        }
        in_community as f64 / total as f64
    }

    #[test]
    fn backend_window() {
        let mut backend = Backend::new(1);
        assert!(matches!(backend.pool("test"), Err(BenchError::BackendUnavailable(_))));

        backend.start();
        assert!(backend.is_active());
        assert!(backend.pool("test").is_ok());

        backend.stop();
        assert!(!backend.is_active());
    }

    #[test]
    fn models_refuse_work_outside_their_window() {
        let data = two_communities();
        for mut model in roster(&test_config()) {
            let result = model.train(&data);
            assert!(matches!(result, Err(BenchError::BackendUnavailable(_))), "{}", model.name());
        }
    }

    #[test]
    fn untrained_models_do_not_predict() {
        let data = two_communities();
        for mut model in roster(&test_config()) {
            model.on_start().unwrap();
            assert!(matches!(model.predict_scores(&data), Err(BenchError::NotTrained(_))));
            model.on_stop().unwrap();
        }
    }

    #[test]
    fn roster_names_are_unique() {
        let models = roster(&test_config());
        let mut names: Vec<&str> = models.iter().map(|model| model.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), models.len());
    }
}
