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

use fnv::FnvHashMap;

/// Maps the original string identifiers of users and items to consecutive integer indices, in
/// the order in which they are first seen.
#[derive(Clone, Debug, Default)]
pub struct DataDictionary {
    user_dict: FnvHashMap<String, u32>,
    item_dict: FnvHashMap<String, u32>,
    num_interactions: u64,
}

impl DataDictionary {

    pub fn new() -> Self {
        DataDictionary {
            user_dict: FnvHashMap::with_capacity_and_hasher(100, Default::default()),
            item_dict: FnvHashMap::with_capacity_and_hasher(100, Default::default()),
            num_interactions: 0,
        }
    }

    pub fn num_users(&self) -> usize {
        self.user_dict.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_dict.len()
    }

    pub fn num_interactions(&self) -> u64 {
        self.num_interactions
    }

    pub fn user_index(&self, name: &str) -> Option<u32> {
        self.user_dict.get(name).cloned()
    }

    pub fn item_index(&self, name: &str) -> Option<u32> {
        self.item_dict.get(name).cloned()
    }

    /// Registers an interaction and returns the indices of its user and item, assigning fresh
    /// indices to identifiers we have not seen before.
    pub fn observe(&mut self, user: &str, item: &str) -> (u32, u32) {

        let next_user_index = self.user_dict.len() as u32;
        let user_index = *self.user_dict.entry(user.to_owned()).or_insert(next_user_index);

        let next_item_index = self.item_dict.len() as u32;
        let item_index = *self.item_dict.entry(item.to_owned()).or_insert(next_item_index);

        self.num_interactions += 1;

        (user_index, item_index)
    }
}

/// Reverse mapping from integer indices back to the original identifiers.
#[derive(Clone, Debug)]
pub struct Renaming {
    user_names: FnvHashMap<u32, String>,
    item_names: FnvHashMap<u32, String>,
}

impl Renaming {

    pub fn user_name(&self, user_index: u32) -> &str {
        self.user_names.get(&user_index).map(String::as_str).unwrap_or("")
    }

    pub fn item_name(&self, item_index: u32) -> &str {
        self.item_names.get(&item_index).map(String::as_str).unwrap_or("")
    }
}

impl<'a> From<&'a DataDictionary> for Renaming {

    fn from(data_dict: &'a DataDictionary) -> Self {

        let mut user_names: FnvHashMap<u32, String> =
            FnvHashMap::with_capacity_and_hasher(data_dict.num_users(), Default::default());

        let mut item_names: FnvHashMap<u32, String> =
            FnvHashMap::with_capacity_and_hasher(data_dict.num_items(), Default::default());

        for (user, user_id) in data_dict.user_dict.iter() {
            user_names.insert(*user_id, user.clone());
        }

        for (item, item_id) in data_dict.item_dict.iter() {
            item_names.insert(*item_id, item.clone());
        }

        Renaming { user_names, item_names }
    }
}
