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

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Fallible;
use crate::error::fail;
use crate::store::CHANGE_FEED_CAPACITY;
use crate::store::CardQuery;
use crate::store::Store;
use crate::store::StoreChange;
use crate::store::select_cards;
use crate::types::card::Card;
use crate::types::card::CardUpdate;
use crate::types::card_id::CardId;
use crate::types::summary::ReviewSummary;

/// An in-process store. Several sessions sharing one `MemoryStore` behave
/// like several devices sharing a synchronized database.
pub struct MemoryStore {
    inner: Mutex<Documents>,
    changes: broadcast::Sender<StoreChange>,
    failing_reads: AtomicUsize,
    failing_writes: AtomicBool,
    queries: AtomicUsize,
}

#[derive(Default)]
struct Documents {
    cards: BTreeMap<CardId, Card>,
    summary: Option<ReviewSummary>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Mutex::new(Documents::default()),
            changes,
            failing_reads: AtomicUsize::new(0),
            failing_writes: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    /// Insert or replace a whole card.
    pub fn insert_card(&self, card: Card) {
        self.acquire().cards.insert(card.id.clone(), card.clone());
        self.publish(StoreChange::Card {
            card,
            deleted: false,
        });
    }

    pub fn delete_card(&self, id: &CardId) {
        let removed = self.acquire().cards.remove(id);
        if let Some(card) = removed {
            self.publish(StoreChange::Card {
                card,
                deleted: true,
            });
        }
    }

    pub fn card(&self, id: &CardId) -> Option<Card> {
        self.acquire().cards.get(id).cloned()
    }

    /// Make the next `count` card queries fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// How many times `get_cards_by_type` has been called.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Make every write fail until switched off again.
    pub fn fail_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    fn check_read(&self) -> Fallible<()> {
        let remaining = self.failing_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_reads.store(remaining - 1, Ordering::SeqCst);
            return fail("store unavailable");
        }
        Ok(())
    }

    fn check_write(&self) -> Fallible<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return fail("store is read-only");
        }
        Ok(())
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    fn acquire(&self) -> MutexGuard<'_, Documents> {
        self.inner.lock().unwrap()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_cards_by_type(&self, query: CardQuery) -> Fallible<Vec<Card>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_read()?;
        let docs = self.acquire();
        Ok(select_cards(docs.cards.values(), &query))
    }

    async fn get_cards_by_id(&self, ids: &[CardId]) -> Fallible<Vec<Card>> {
        self.check_read()?;
        let docs = self.acquire();
        Ok(ids
            .iter()
            .filter_map(|id| docs.cards.get(id).cloned())
            .collect())
    }

    async fn put_card(&self, update: CardUpdate) -> Fallible<Card> {
        self.check_write()?;
        let card = {
            let mut docs = self.acquire();
            let Some(card) = docs.cards.get_mut(&update.id) else {
                return fail(format!("no card with id {}", update.id));
            };
            card.progress = update.progress;
            card.clone()
        };
        self.publish(StoreChange::Card {
            card: card.clone(),
            deleted: false,
        });
        Ok(card)
    }

    async fn put_review_summary(&self, summary: &ReviewSummary) -> Fallible<()> {
        self.check_write()?;
        self.acquire().summary = Some(summary.clone());
        self.publish(StoreChange::Summary(Some(summary.clone())));
        Ok(())
    }

    async fn get_review_summary(&self) -> Fallible<Option<ReviewSummary>> {
        Ok(self.acquire().summary.clone())
    }

    async fn delete_review_summary(&self) -> Fallible<()> {
        self.check_write()?;
        let existed = self.acquire().summary.take().is_some();
        if existed {
            self.publish(StoreChange::Summary(None));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
