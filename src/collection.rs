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

use std::env::current_dir;
use std::path::PathBuf;
use std::sync::Arc;

use crate::available::AvailableIndex;
use crate::config::Config;
use crate::error::ErrorReport;
use crate::error::Fallible;
use crate::error::fail;
use crate::store::sqlite::SqliteStore;
use crate::types::timestamp::Timestamp;

/// A directory holding a card database and an optional configuration file.
pub struct Collection {
    pub directory: PathBuf,
    pub config: Config,
    pub store: Arc<SqliteStore>,
}

impl Collection {
    pub fn new(directory: Option<String>) -> Fallible<Self> {
        let directory: PathBuf = match directory {
            Some(dir) => PathBuf::from(dir),
            None => current_dir()?,
        };
        let directory = if directory.exists() {
            directory.canonicalize()?
        } else {
            return fail("directory does not exist.");
        };

        let config = Config::load(&directory.join("config.toml"))?;

        let db_path: PathBuf = directory.join("review.db");
        let db_path: &str = db_path
            .to_str()
            .ok_or_else(|| ErrorReport::new("invalid path"))?;
        let store = Arc::new(SqliteStore::new(db_path)?);

        Ok(Self {
            directory,
            config,
            store,
        })
    }

    /// An index over the collection's cards, at the current hour.
    pub fn index(&self) -> Arc<AvailableIndex> {
        Arc::new(AvailableIndex::new(self.store.clone(), Timestamp::now()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::write;

    use tempfile::tempdir;

    use super::*;
    use crate::store::Store;
    use crate::types::card::Card;
    use crate::types::card_id::CardId;

    #[test]
    fn test_missing_directory() {
        let result = Collection::new(Some("./does-not-exist".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_is_read() -> Fallible<()> {
        let dir = tempdir()?;
        write(
            dir.path().join("config.toml"),
            "[session]\nmax_cards = 7\n",
        )?;
        let collection = Collection::new(Some(dir.path().display().to_string()))?;
        assert_eq!(collection.config.session.max_cards, 7);
        assert!(collection.directory.join("review.db").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_index_sees_stored_cards() -> Fallible<()> {
        let dir = tempdir()?;
        let collection = Collection::new(Some(dir.path().display().to_string()))?;
        collection
            .store
            .insert_card(&Card::new(CardId::new("a"), "Q", "A"))?;
        let counts = collection.index().num_available_cards().await?;
        assert_eq!(counts.new_cards, 1);
        assert_eq!(collection.store.get_review_summary().await?, None);
        Ok(())
    }
}
