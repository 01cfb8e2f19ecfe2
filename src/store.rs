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

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Fallible;
use crate::overdue::Overdueness;
use crate::overdue::overdueness;
use crate::types::card::Card;
use crate::types::card::CardUpdate;
use crate::types::card_id::CardId;
use crate::types::summary::ReviewSummary;
use crate::types::timestamp::Timestamp;

/// Capacity of the change feed. Subscribers that fall further behind than
/// this see `RecvError::Lagged` and must re-query.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CardKind {
    New,
    Overdue,
}

#[derive(Clone, Debug)]
pub struct CardQuery {
    pub kind: CardKind,
    pub limit: Option<usize>,
    /// Omit overdue cards with a level of zero, i.e. cards that were failed
    /// and not passed since.
    pub skip_failed_cards: bool,
    pub review_time: Timestamp,
}

/// One event on a store's change feed.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreChange {
    Card { card: Card, deleted: bool },
    /// The session summary was written, or deleted (`None`).
    Summary(Option<ReviewSummary>),
}

/// The document store consumed by the scheduler. Replication between
/// devices happens behind this interface; changes made anywhere surface on
/// the change feed.
#[async_trait]
pub trait Store: Send + Sync {
    /// New cards in id order, or overdue cards most overdue first.
    async fn get_cards_by_type(&self, query: CardQuery) -> Fallible<Vec<Card>>;

    /// Resolve ids to cards, preserving order and skipping unknown ids.
    async fn get_cards_by_id(&self, ids: &[CardId]) -> Fallible<Vec<Card>>;

    /// Replace a card's progress. Fails if the card does not exist.
    async fn put_card(&self, update: CardUpdate) -> Fallible<Card>;

    async fn put_review_summary(&self, summary: &ReviewSummary) -> Fallible<()>;

    async fn get_review_summary(&self) -> Fallible<Option<ReviewSummary>>;

    async fn delete_review_summary(&self) -> Fallible<()>;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Filter, order and limit a card listing the way `get_cards_by_type`
/// promises. Shared by the store adapters.
pub fn select_cards<'a>(cards: impl Iterator<Item = &'a Card>, query: &CardQuery) -> Vec<Card> {
    let limit = query.limit.unwrap_or(usize::MAX);
    match query.kind {
        CardKind::New => {
            let mut new: Vec<&Card> = cards.filter(|card| card.is_new()).collect();
            new.sort_by(|a, b| a.id.cmp(&b.id));
            new.into_iter().take(limit).cloned().collect()
        }
        CardKind::Overdue => {
            let mut overdue: Vec<(Overdueness, &Card)> = cards
                .filter(|card| card.is_overdue(query.review_time))
                .filter(|card| !(query.skip_failed_cards && card.progress.level == 0.0))
                .map(|card| {
                    let score = overdueness(&card.progress, query.review_time);
                    (Overdueness::new(score), card)
                })
                .collect();
            overdue.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.id.cmp(&b.id)));
            overdue
                .into_iter()
                .take(limit)
                .map(|(_, card)| card.clone())
                .collect()
        }
    }
}
