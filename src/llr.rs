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

/// Precompute a table of logarithms which will be used for lookups later
pub fn logarithms_table(max_arg: usize) -> Vec<f64> {

    (0..max_arg)
        .map(|index| {
            if index == 0 {
                0.0
            } else {
                (index as f64).ln()
            }
        })
        .collect()
}

/// Loglikelihood-based G²-test on a 2x2 contingency table, with common subexpressions eliminated
/// and logarithms looked up from a precomputed table. The table must cover `k11 + k12` and
/// `k11 + k21`.
///
/// https://github.com/apache/mahout/blob/08e02602e947ff945b9bd73ab5f0b45863df3e53/math/src/main/java/org/apache/mahout/math/stats/LogLikelihood.java
#[inline(always)]
pub fn log_likelihood_ratio(k11: u64, k12: u64, k21: u64, k22: u64, logarithms: &[f64]) -> f64 {

    let xlx_all = x_logx(k11 + k12 + k21 + k22);

    let log_k11 = logarithms[k11 as usize];
    let log_k12 = logarithms[k12 as usize];
    let log_k21 = logarithms[k21 as usize];
    let log_k11_12 = logarithms[(k11 + k12) as usize];
    let log_k11_21 = logarithms[(k11 + k21) as usize];

    let row_entropy = xlx_all - x_times_logx(k11 + k12, log_k11_12) - x_logx(k21 + k22);
    let column_entropy = xlx_all - x_times_logx(k11 + k21, log_k11_21) - x_logx(k12 + k22);
    let matrix_entropy = xlx_all - x_times_logx(k11, log_k11) - x_times_logx(k12, log_k12) -
        x_times_logx(k21, log_k21) - x_logx(k22);

    if row_entropy + column_entropy < matrix_entropy {
        0.0 // Round off error
    } else {
        2.0 * (row_entropy + column_entropy - matrix_entropy)
    }
}

/// Association between two items, given how many users interacted with both of them, with each
/// of them, and in total. The counts come from the diagonal and off-diagonal entries of the item
/// cooccurrence matrix, `logarithms` must cover `num_users`.
pub fn cooccurrence_llr(
    cooccurrences: u32,
    count_a: u32,
    count_b: u32,
    num_users: u64,
    logarithms: &[f64],
) -> f64 {

    let k11 = u64::from(cooccurrences);
    let k12 = u64::from(count_a).saturating_sub(k11);
    let k21 = u64::from(count_b).saturating_sub(k11);
    let k22 = num_users.saturating_sub(k11 + k12 + k21);

    log_likelihood_ratio(k11, k12, k21, k22, logarithms)
}

#[inline(always)]
fn x_logx(x: u64) -> f64 {
    if x == 0 {
        0.0
    } else {
        x as f64 * (x as f64).ln()
    }
}

#[inline(always)]
fn x_times_logx(x: u64, log_x: f64) -> f64 {
    x as f64 * log_x
}

#[cfg(test)]
mod tests {

    use crate::llr;

    fn close_enough_to(value: f64, expected: f64) -> bool {
        (value - expected).abs() < 0.01
    }

    #[test]
    fn llr() {
        // Some cases from http://citeseerx.ist.psu.edu/viewdoc/summary?doi=10.1.1.14.5962
        let logs = llr::logarithms_table(500 * 500);

        assert!(close_enough_to(llr::log_likelihood_ratio(110, 2442, 111, 29114, &logs), 270.72));
        assert!(close_enough_to(llr::log_likelihood_ratio(29, 13, 123, 31612, &logs), 263.90));
        assert!(close_enough_to(llr::log_likelihood_ratio(9, 12, 429, 31327, &logs), 48.94));
    }

    #[test]
    fn independent_items_are_not_associated() {
        let logs = llr::logarithms_table(101);

        // Half of the users have item a, half have item b, a quarter has both.
        let score = llr::cooccurrence_llr(25, 50, 50, 100, &logs);
        assert!(score.abs() < 1e-9);

        let score = llr::cooccurrence_llr(50, 50, 50, 100, &logs);
        assert!(score > 100.0);
    }
}
