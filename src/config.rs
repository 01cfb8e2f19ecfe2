// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::read_to_string;
use std::path::Path;

use serde::Deserialize;

use crate::error::Fallible;

/// Collection configuration, read from `config.toml`. Every field is
/// optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub session: SessionConfig,
    pub index: IndexConfig,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Maximum number of cards in one review session.
    pub max_cards: usize,
    /// Maximum number of never-reviewed cards in one review session.
    pub max_new_cards: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// How long the initial index query is deferred after startup.
    pub initial_query_delay_ms: u64,
    /// How often the index is rebuilt from scratch.
    pub revalidate_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_cards: 20,
            max_new_cards: 10,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            initial_query_delay_ms: 50,
            revalidate_interval_secs: 5 * 60,
        }
    }
}

impl Config {
    pub fn parse(content: &str) -> Fallible<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the configuration file, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Fallible<Self> {
        if path.exists() {
            log::debug!("Loading configuration from {}", path.display());
            Self::parse(&read_to_string(path)?)
        } else {
            Ok(Self::default())
        }
    }
}
