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

use std::path::Path;

use fnv::FnvHashSet;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::io;
use crate::stats::{DataDictionary, Renaming};
use crate::types::{self, Interaction, SparseBinaryMatrix};

/// Where to find a field in the input, either by its header name or by its position.
#[derive(Clone, Debug, PartialEq)]
pub enum Column {
    Name(String),
    Index(usize),
}

/// Describes the layout of a ratings file.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub user: Column,
    pub item: Column,
    pub score: Column,
    pub timestamp: Option<Column>,
    pub delimiter: u8,
    pub has_headers: bool,
}

impl ColumnSpec {

    /// MovieLens 100k `u.data`: tab separated user, item, rating and timestamp, no header.
    pub fn movielens() -> Self {
        ColumnSpec {
            user: Column::Index(0),
            item: Column::Index(1),
            score: Column::Index(2),
            timestamp: Some(Column::Index(3)),
            delimiter: b'\t',
            has_headers: false,
        }
    }

    /// Amazon reviews "ratings only" dumps: comma separated user, item, rating and timestamp,
    /// no header.
    pub fn amazon() -> Self {
        ColumnSpec {
            user: Column::Index(0),
            item: Column::Index(1),
            score: Column::Index(2),
            timestamp: Some(Column::Index(3)),
            delimiter: b',',
            has_headers: false,
        }
    }

    /// Comma separated file with a header row, columns looked up by name.
    pub fn csv(user: &str, item: &str, score: &str) -> Self {
        ColumnSpec {
            user: Column::Name(user.to_owned()),
            item: Column::Name(item.to_owned()),
            score: Column::Name(score.to_owned()),
            timestamp: None,
            delimiter: b',',
            has_headers: true,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Column) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

struct Positions {
    user: usize,
    item: usize,
    score: usize,
    timestamp: Option<usize>,
}

fn resolve(column: &Column, headers: Option<&csv::StringRecord>) -> Result<usize> {
    match column {
        Column::Index(index) => Ok(*index),
        Column::Name(name) => {
            let headers = headers.ok_or_else(|| BenchError::data_format(0,
                format!("column '{}' is referenced by name, but the input has no header", name)))?;

            headers.iter()
                .position(|header| header.trim() == name)
                .ok_or_else(|| BenchError::data_format(1, format!("missing column '{}'", name)))
        }
    }
}

fn field<'r>(record: &'r csv::StringRecord, position: usize, line: u64) -> Result<&'r str> {
    record.get(position)
        .map(str::trim)
        .ok_or_else(|| BenchError::data_format(line,
            format!("expected at least {} fields, found {}", position + 1, record.len())))
}

/// All interactions of a ratings file, with users and items renamed to dense indices.
#[derive(Clone, Debug)]
pub struct Dataset {
    interactions: Vec<Interaction>,
    dictionary: DataDictionary,
}

impl Dataset {

    /// Reads a ratings file laid out according to `columns`.
    pub fn load<P: AsRef<Path>>(path: P, columns: &ColumnSpec) -> Result<Self> {

        let path = path.as_ref();
        info!("Reading interactions from {}", path.display());

        let mut reader = io::csv_reader(path, columns.delimiter, columns.has_headers)?;

        let headers = if columns.has_headers { Some(reader.headers()?.clone()) } else { None };

        let positions = Positions {
            user: resolve(&columns.user, headers.as_ref())?,
            item: resolve(&columns.item, headers.as_ref())?,
            score: resolve(&columns.score, headers.as_ref())?,
            timestamp: match columns.timestamp {
                Some(ref column) => Some(resolve(column, headers.as_ref())?),
                None => None,
            },
        };

        let mut dictionary = DataDictionary::new();
        let mut interactions = Vec::new();

        for result in reader.records() {
            let record = result?;
            let line = record.position().map_or(0, |position| position.line());

            let user_name = field(&record, positions.user, line)?;
            let item_name = field(&record, positions.item, line)?;

            let raw_score = field(&record, positions.score, line)?;
            let score: f64 = raw_score.parse()
                .map_err(|_| BenchError::data_format(line,
                    format!("score '{}' is not a number", raw_score)))?;

            if !score.is_finite() {
                return Err(BenchError::data_format(line, format!("score '{}' is not finite", raw_score)));
            }

            let timestamp = match positions.timestamp {
                Some(position) => {
                    let raw_timestamp = field(&record, position, line)?;
                    let timestamp: i64 = raw_timestamp.parse()
                        .map_err(|_| BenchError::data_format(line,
                            format!("timestamp '{}' is not an integer", raw_timestamp)))?;
                    Some(timestamp)
                },
                None => None,
            };

            let (user, item) = dictionary.observe(user_name, item_name);
            interactions.push(Interaction { user, item, score, timestamp });
        }

        Dataset::from_parts(interactions, dictionary)
    }

    /// Builds a dataset from in-memory (user, item, score) records.
    pub fn from_records<I, S>(records: I) -> Result<Self>
        where I: IntoIterator<Item=(S, S, f64)>, S: AsRef<str> {

        let mut dictionary = DataDictionary::new();

        let interactions = records.into_iter()
            .map(|(user_name, item_name, score)| {
                let (user, item) = dictionary.observe(user_name.as_ref(), item_name.as_ref());
                Interaction::new(user, item, score)
            })
            .collect();

        Dataset::from_parts(interactions, dictionary)
    }

    fn from_parts(interactions: Vec<Interaction>, dictionary: DataDictionary) -> Result<Self> {

        if interactions.is_empty() {
            return Err(BenchError::InsufficientData("the input contains no interactions".to_owned()));
        }

        info!(
            "Found {} interactions between {} users and {} items.",
            dictionary.num_interactions(),
            dictionary.num_users(),
            dictionary.num_items(),
        );

        Ok(Dataset { interactions, dictionary })
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn num_users(&self) -> usize {
        self.dictionary.num_users()
    }

    pub fn num_items(&self) -> usize {
        self.dictionary.num_items()
    }

    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    pub fn renaming(&self) -> Renaming {
        Renaming::from(&self.dictionary)
    }

    /// The whole dataset as a single partition.
    pub fn as_partition(&self) -> Partition {
        Partition::new(self.interactions.clone(), self.num_users(), self.num_items())
    }
}

/// A subset of the interactions of a dataset. Partitions keep the index space of the dataset
/// they were derived from, so that models trained on one partition can be queried with another.
#[derive(Clone, Debug)]
pub struct Partition {
    interactions: Vec<Interaction>,
    num_users: usize,
    num_items: usize,
}

impl Partition {

    pub fn new(interactions: Vec<Interaction>, num_users: usize, num_items: usize) -> Self {
        Partition { interactions, num_users, num_items }
    }

    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Number of users in the index space, not all of them need to occur in this partition.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Distinct users occurring in this partition, in ascending order.
    pub fn users(&self) -> Vec<u32> {
        let mut users: Vec<u32> = self.interactions.iter()
            .map(|interaction| interaction.user)
            .collect::<FnvHashSet<u32>>()
            .into_iter()
            .collect();
        users.sort_unstable();
        users
    }

    pub fn items(&self) -> FnvHashSet<u32> {
        self.interactions.iter().map(|interaction| interaction.item).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.interactions.iter().map(|interaction| interaction.score).collect()
    }

    pub fn mean_score(&self) -> f64 {
        if self.interactions.is_empty() {
            0.0
        } else {
            self.interactions.iter().map(|interaction| interaction.score).sum::<f64>()
                / self.interactions.len() as f64
        }
    }

    /// The set of items each user interacted with, indexed by user.
    pub fn histories(&self) -> SparseBinaryMatrix {
        let mut histories = types::new_sparse_binary_matrix(self.num_users);
        for interaction in self.interactions.iter() {
            histories[interaction.user as usize].insert(interaction.item);
        }
        histories
    }

    /// (item, score) pairs per user.
    pub fn ratings_by_user(&self) -> Vec<Vec<(u32, f64)>> {
        let mut ratings = vec![Vec::new(); self.num_users];
        for interaction in self.interactions.iter() {
            ratings[interaction.user as usize].push((interaction.item, interaction.score));
        }
        ratings
    }

    /// (user, score) pairs per item.
    pub fn ratings_by_item(&self) -> Vec<Vec<(u32, f64)>> {
        let mut ratings = vec![Vec::new(); self.num_items];
        for interaction in self.interactions.iter() {
            ratings[interaction.item as usize].push((interaction.user, interaction.score));
        }
        ratings
    }
}

/// Randomly splits a dataset into a training and a validation partition. Roughly `ratio` of the
/// interactions end up in the training partition. Validation interactions whose user or item
/// does not occur in the training partition are dropped, as no model could have learned
/// anything about them.
pub fn split_without_cold_start(
    dataset: &Dataset,
    ratio: f64,
    seed: u64,
) -> Result<(Partition, Partition)> {
    split_partition(&dataset.as_partition(), ratio, seed)
}

/// Same as `split_without_cold_start`, for an existing partition.
pub fn split_partition(data: &Partition, ratio: f64, seed: u64) -> Result<(Partition, Partition)> {

    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(BenchError::InsufficientData(
            format!("split ratio must lie in (0, 1), got {}", ratio)));
    }

    let mut shuffled = data.interactions.clone();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let num_train = (shuffled.len() as f64 * ratio).round() as usize;
    let holdout = shuffled.split_off(num_train.min(shuffled.len()));

    filter_cold_start(shuffled, holdout, data.num_users, data.num_items)
}

/// Builds the partitions from a given assignment of interactions, removing the cold-start
/// interactions from `holdout`. Fails if either partition ends up empty.
pub fn filter_cold_start(
    train: Vec<Interaction>,
    holdout: Vec<Interaction>,
    num_users: usize,
    num_items: usize,
) -> Result<(Partition, Partition)> {

    let train_users: FnvHashSet<u32> = train.iter().map(|interaction| interaction.user).collect();
    let train_items: FnvHashSet<u32> = train.iter().map(|interaction| interaction.item).collect();

    let num_candidates = holdout.len();

    let valid: Vec<Interaction> = holdout.into_iter()
        .filter(|interaction| {
            train_users.contains(&interaction.user) && train_items.contains(&interaction.item)
        })
        .collect();

    debug!("Removed {} cold-start interactions from validation", num_candidates - valid.len());

    if train.is_empty() {
        return Err(BenchError::InsufficientData("the training partition is empty".to_owned()));
    }

    if valid.is_empty() {
        return Err(BenchError::InsufficientData(
            "no validation interactions left after removing cold-start users and items".to_owned()));
    }

    info!("Split into {} training and {} validation interactions", train.len(), valid.len());

    Ok((Partition::new(train, num_users, num_items), Partition::new(valid, num_users, num_items)))
}

#[cfg(test)]
mod tests {

    use std::io::Write;

    use fnv::FnvHashSet;
    use tempfile::NamedTempFile;

    use super::{filter_cold_start, split_without_cold_start, Column, ColumnSpec, Dataset};
    use crate::error::BenchError;
    use crate::types::Interaction;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn loads_movielens_layout() {
        let file = file_with("196\t242\t3\t881250949\n186\t302\t3\t891717742\n196\t302\t1\t878887116\n");

        let dataset = Dataset::load(file.path(), &ColumnSpec::movielens()).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.num_users(), 2);
        assert_eq!(dataset.num_items(), 2);

        let third = dataset.interactions()[2];
        assert_eq!(third.user, 0);
        assert_eq!(third.item, 1);
        assert_eq!(third.score, 1.0);
        assert_eq!(third.timestamp, Some(878887116));
    }

    #[test]
    fn loads_named_columns() {
        let file = file_with("rating,item,user\n4.5,apple,alice\n2,dog,bob\n");

        let columns = ColumnSpec::csv("user", "item", "rating");
        let dataset = Dataset::load(file.path(), &columns).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dictionary().user_index("bob"), Some(1));
        assert_eq!(dataset.interactions()[0].score, 4.5);
    }

    #[test]
    fn missing_column_is_a_format_error() {
        let file = file_with("user,item\nalice,apple\n");

        let columns = ColumnSpec::csv("user", "item", "rating");
        let result = Dataset::load(file.path(), &columns);

        assert!(matches!(result, Err(BenchError::DataFormat { .. })));
    }

    #[test]
    fn unparsable_score_is_a_format_error() {
        let file = file_with("alice\tapple\tfive\t1\n");

        let result = Dataset::load(file.path(), &ColumnSpec::movielens());

        match result {
            Err(BenchError::DataFormat { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn short_rows_are_a_format_error() {
        let file = file_with("alice,apple\n");

        let columns = ColumnSpec {
            timestamp: None,
            ..ColumnSpec::amazon()
        }.with_timestamp(Column::Index(5));

        let result = Dataset::load(file.path(), &columns);
        assert!(matches!(result, Err(BenchError::DataFormat { .. })));
    }

    #[test]
    fn empty_input_is_insufficient() {
        let file = file_with("");
        let result = Dataset::load(file.path(), &ColumnSpec::movielens());
        assert!(matches!(result, Err(BenchError::InsufficientData(_))));
    }

    fn synthetic_dataset() -> Dataset {
        let mut records = Vec::new();
        for user in 0..20 {
            for item in 0..15 {
                if (user * 7 + item * 3) % 4 != 0 {
                    records.push((format!("u{}", user), format!("i{}", item), 1.0 + (item % 5) as f64));
                }
            }
        }
        records.push(("u0".to_owned(), "lonely".to_owned(), 3.0));
        Dataset::from_records(records).unwrap()
    }

    #[test]
    fn validation_never_contains_cold_start_entities() {
        let dataset = synthetic_dataset();

        for seed in 0..10 {
            let (train, valid) = split_without_cold_start(&dataset, 0.75, seed).unwrap();

            let train_users: FnvHashSet<u32> = train.users().into_iter().collect();
            let train_items = train.items();

            for interaction in valid.interactions() {
                assert!(train_users.contains(&interaction.user));
                assert!(train_items.contains(&interaction.item));
            }

            assert!(train.len() + valid.len() <= dataset.len());

            let fraction = train.len() as f64 / dataset.len() as f64;
            assert!((fraction - 0.75).abs() < 0.01);
        }
    }

    #[test]
    fn split_is_reproducible() {
        let dataset = synthetic_dataset();

        let (train_a, valid_a) = split_without_cold_start(&dataset, 0.5, 7).unwrap();
        let (train_b, valid_b) = split_without_cold_start(&dataset, 0.5, 7).unwrap();

        assert_eq!(train_a.interactions(), train_b.interactions());
        assert_eq!(valid_a.interactions(), valid_b.interactions());
    }

    #[test]
    fn invalid_ratio() {
        let dataset = synthetic_dataset();
        assert!(split_without_cold_start(&dataset, 0.0, 1).is_err());
        assert!(split_without_cold_start(&dataset, 1.5, 1).is_err());
    }

    #[test]
    fn item_only_seen_in_validation_is_excluded() {
        // Three users and three items, item 2 only occurs for user 2 and lands in validation.
        let train = vec![
            Interaction::new(0, 0, 4.0),
            Interaction::new(1, 1, 3.0),
            Interaction::new(2, 0, 5.0),
        ];
        let holdout = vec![
            Interaction::new(0, 1, 2.0),
            Interaction::new(2, 2, 1.0),
            Interaction::new(1, 0, 3.0),
        ];

        let (train, valid) = filter_cold_start(train, holdout, 3, 3).unwrap();

        assert_eq!(train.len(), 3);
        assert_eq!(valid.len(), 2);
        assert!(valid.interactions().iter().all(|interaction| interaction.item != 2));
    }

    #[test]
    fn split_of_three_users_and_three_items() {
        // Only carol rated the helmet.
        let dataset = Dataset::from_records(vec![
            ("alice", "apple", 4.0),
            ("alice", "bike", 2.0),
            ("bob", "apple", 5.0),
            ("bob", "bike", 3.0),
            ("carol", "apple", 1.0),
            ("carol", "bike", 4.0),
            ("carol", "helmet", 2.0),
        ]).unwrap();

        let helmet = dataset.dictionary().item_index("helmet").unwrap();

        let mut num_splits = 0;
        let mut num_helmet_held_out = 0;

        for seed in 0..20 {
            let (train, valid) = match split_without_cold_start(&dataset, 0.5, seed) {
                Ok(partitions) => partitions,
                Err(failure) => {
                    assert!(matches!(failure, BenchError::InsufficientData(_)));
                    continue;
                },
            };

            num_splits += 1;

            // round(0.5 * 7) rows go to training, the rest is filtered.
            assert_eq!(train.len(), 4);
            assert!(valid.len() <= 3);

            let train_users: FnvHashSet<u32> = train.users().into_iter().collect();
            let train_items = train.items();

            for interaction in valid.interactions() {
                assert!(train_users.contains(&interaction.user));
                assert!(train_items.contains(&interaction.item));
            }

            if !train_items.contains(&helmet) {
                num_helmet_held_out += 1;
                assert!(valid.interactions().iter().all(|interaction| interaction.item != helmet));
            }
        }

        assert!(num_splits > 0);
        assert!(num_helmet_held_out > 0);
    }

    #[test]
    fn all_cold_start_validation_is_insufficient() {
        let train = vec![Interaction::new(0, 0, 4.0)];
        let holdout = vec![Interaction::new(1, 1, 2.0)];

        let result = filter_cold_start(train, holdout, 2, 2);
        assert!(matches!(result, Err(BenchError::InsufficientData(_))));
    }

    #[test]
    fn partition_views() {
        let dataset = Dataset::from_records(vec![
            ("alice", "apple", 1.0),
            ("bob", "pony", 3.0),
            ("alice", "pony", 5.0),
        ]).unwrap();

        let partition = dataset.as_partition();

        assert_eq!(partition.users(), vec![0, 1]);
        assert_eq!(partition.mean_score(), 3.0);
        assert!(partition.histories()[0].contains(&1));
        assert_eq!(partition.ratings_by_item()[1], vec![(1, 3.0), (0, 5.0)]);
    }
}
