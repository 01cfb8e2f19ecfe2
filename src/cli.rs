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

use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::available::index::AvailableCardCounts;
use crate::collection::Collection;
use crate::drill::drill;
use crate::error::Fallible;
use crate::store::Store;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::summary::ReviewSummary;
use crate::types::timestamp::Timestamp;

#[derive(Parser)]
#[command(version, about, long_about = None)]
enum Command {
    /// Add a new card.
    Add {
        /// The prompt.
        front: String,
        /// The answer.
        back: String,
        /// Path to the collection directory. Defaults to the current directory.
        #[arg(long, short)]
        directory: Option<String>,
    },
    /// Review cards, resuming the session in progress if there is one.
    Review {
        /// Path to the collection directory. Defaults to the current directory.
        #[arg(long, short)]
        directory: Option<String>,
        /// Maximum number of cards in the session.
        #[arg(long)]
        max_cards: Option<usize>,
        /// Maximum number of new cards in the session.
        #[arg(long)]
        max_new_cards: Option<usize>,
    },
    /// Print the available cards and the session in progress as JSON.
    Status {
        /// Path to the collection directory. Defaults to the current directory.
        #[arg(long, short)]
        directory: Option<String>,
    },
    /// Cancel the session in progress.
    Cancel {
        /// Path to the collection directory. Defaults to the current directory.
        #[arg(long, short)]
        directory: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    total_cards: usize,
    available_cards: AvailableCardCounts,
    session: Option<ReviewSummary>,
}

pub async fn entrypoint() -> Fallible<()> {
    let cli: Command = Command::parse();
    match cli {
        Command::Add {
            front,
            back,
            directory,
        } => {
            let collection = Collection::new(directory)?;
            let mut rng = StdRng::from_entropy();
            let id = CardId::generate(Timestamp::now(), &mut rng);
            collection
                .store
                .insert_card(&Card::new(id.clone(), front, back))?;
            println!("Added card {id}.");
            Ok(())
        }
        Command::Review {
            directory,
            max_cards,
            max_new_cards,
        } => {
            let collection = Collection::new(directory)?;
            drill(collection, max_cards, max_new_cards).await
        }
        Command::Status { directory } => {
            let collection = Collection::new(directory)?;
            let status = Status {
                total_cards: collection.store.card_count()?,
                available_cards: collection.index().num_available_cards().await?,
                session: collection.store.get_review_summary().await?,
            };
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Cancel { directory } => {
            let collection = Collection::new(directory)?;
            if collection.store.get_review_summary().await?.is_some() {
                collection.store.delete_review_summary().await?;
                println!("Session cancelled.");
            } else {
                println!("No session in progress.");
            }
            Ok(())
        }
    }
}
