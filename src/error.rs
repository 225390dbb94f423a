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

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Missing or unknown columns, values that cannot be parsed.
    #[error("malformed input at line {line}: {message}")]
    DataFormat { line: u64, message: String },

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("training {model} failed: {message}")]
    Training { model: String, message: String },

    /// The ensemble coefficients sum to zero (or to something non-finite), so they cannot be
    /// turned into relative weights.
    #[error("degenerate ensemble, coefficients sum to {0}")]
    DegenerateEnsemble(f64),

    #[error("{0} has no active backend, on_start must be called first")]
    BackendUnavailable(String),

    #[error("{0} has not been trained")]
    NotTrained(String),

    #[error("expected {expected} predictions, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BenchError {

    pub fn training<S: Into<String>>(model: &str, message: S) -> Self {
        BenchError::Training { model: model.to_owned(), message: message.into() }
    }

    pub fn data_format<S: Into<String>>(line: u64, message: S) -> Self {
        BenchError::DataFormat { line, message: message.into() }
    }
}
