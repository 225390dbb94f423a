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

use std::path::PathBuf;

use crate::error::{BenchError, Result};

/// Settings for a benchmark run. Every model receives the seed from here instead of relying on
/// process-wide random state, so that two runs with the same config see the same splits and the
/// same initialisations.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub seed: u64,
    /// Length of the ranked lists produced and evaluated per user.
    pub top_k: usize,
    /// Fraction of the interactions that goes into the training partition.
    pub ratio: f64,
    /// Size of the worker pool each model acquires in `on_start`.
    pub num_threads: usize,
    pub ensemble: bool,
    /// Fraction of the training partition the ensemble members are fitted on, the rest is used
    /// to learn the blending coefficients.
    pub blend_ratio: f64,
    /// If set, the top-k lists of every model are written to `<dir>/<model>.jsonl`.
    pub recommendations_dir: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        BenchConfig {
            seed: 42,
            top_k: 10,
            ratio: 0.75,
            num_threads: num_cpus::get(),
            ensemble: true,
            blend_ratio: 0.8,
            recommendations_dir: None,
        }
    }
}

impl BenchConfig {

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(BenchError::InvalidConfig("top_k must be positive".to_owned()));
        }
        if !(self.ratio > 0.0 && self.ratio < 1.0) {
            return Err(BenchError::InvalidConfig(
                format!("ratio must lie in (0, 1), got {}", self.ratio)));
        }
        if !(self.blend_ratio > 0.0 && self.blend_ratio < 1.0) {
            return Err(BenchError::InvalidConfig(
                format!("blend ratio must lie in (0, 1), got {}", self.blend_ratio)));
        }
        if self.num_threads == 0 {
            return Err(BenchError::InvalidConfig("num_threads must be positive".to_owned()));
        }
        Ok(())
    }
}
