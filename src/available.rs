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

pub mod index;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::time::interval;
use tokio::time::sleep;

use crate::available::index::AvailableCardCounts;
use crate::available::index::CardIndex;
use crate::config::IndexConfig;
use crate::error::Fallible;
use crate::store::CardKind;
use crate::store::CardQuery;
use crate::store::Store;
use crate::store::StoreChange;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexEvent {
    /// The set of available cards, or their order, changed.
    Changed(AvailableCardCounts),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryStatus {
    NotStarted,
    Ready,
    Failed,
}

struct IndexState {
    index: CardIndex,
    status: QueryStatus,
    /// The instant overdueness is measured against, top of the hour.
    review_time: Timestamp,
    /// Card changes seen while a full query is in flight. They are applied
    /// to the live index immediately and replayed on top of the query
    /// result.
    in_flight: Option<Vec<(Card, bool)>>,
}

/// A live view of the new and overdue cards in a store.
///
/// The index is built by one full query and then maintained from the
/// store's change feed, one card at a time. Reads wait for the full query;
/// concurrent readers share a single in-flight query.
pub struct AvailableIndex {
    store: Arc<dyn Store>,
    state: Mutex<IndexState>,
    query_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<IndexEvent>,
}

impl AvailableIndex {
    pub fn new(store: Arc<dyn Store>, review_time: Timestamp) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            state: Mutex::new(IndexState {
                index: CardIndex::default(),
                status: QueryStatus::NotStarted,
                review_time: review_time.truncate_to_hour(),
                in_flight: None,
            }),
            query_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    pub fn review_time(&self) -> Timestamp {
        self.acquire().review_time
    }

    /// New card ids, oldest first.
    pub async fn new_cards(&self, limit: Option<usize>) -> Fallible<Vec<CardId>> {
        self.ready().await?;
        Ok(self.acquire().index.new_cards(limit))
    }

    /// Overdue card ids, most overdue first.
    pub async fn overdue_cards(&self, limit: Option<usize>) -> Fallible<Vec<CardId>> {
        self.ready().await?;
        Ok(self.acquire().index.overdue_cards(limit))
    }

    pub async fn num_available_cards(&self) -> Fallible<AvailableCardCounts> {
        self.ready().await?;
        Ok(self.acquire().index.counts())
    }

    /// Wait until the full query has completed. A query that failed before is
    /// retried once here; if it fails again the error is returned.
    async fn ready(&self) -> Fallible<()> {
        let _guard = self.query_lock.lock().await;
        loop {
            let status = self.acquire().status;
            match status {
                QueryStatus::Ready => return Ok(()),
                QueryStatus::Failed => log::debug!("Retrying failed index query"),
                QueryStatus::NotStarted => {}
            }
            // Only a result discarded for staleness goes around again.
            if self.run_query().await? {
                return Ok(());
            }
        }
    }

    /// Re-run the full query. Used for periodic re-validation.
    pub async fn refresh(&self) -> Fallible<()> {
        let _guard = self.query_lock.lock().await;
        self.run_query().await?;
        Ok(())
    }

    /// Move the review time forward (hourly rollover) and re-query, since
    /// every overdue score and the overdue set itself depend on it.
    pub async fn set_review_time(&self, review_time: Timestamp) -> Fallible<()> {
        let review_time = review_time.truncate_to_hour();
        {
            let mut state = self.acquire();
            if state.review_time == review_time {
                return Ok(());
            }
            log::debug!("Index review time is now {review_time}");
            state.review_time = review_time;
        }
        self.refresh().await
    }

    /// Run one full query. Must be called with `query_lock` held. Returns
    /// false if the result was discarded because the review time moved while
    /// it was in flight.
    async fn run_query(&self) -> Fallible<bool> {
        let review_time = {
            let mut state = self.acquire();
            state.in_flight = Some(Vec::new());
            state.review_time
        };
        log::debug!("Querying available cards at {review_time}");
        let result = self.fetch(review_time).await;

        let event = {
            let mut state = self.acquire();
            let buffered = state.in_flight.take().unwrap_or_default();
            let (new_cards, overdue_cards) = match result {
                Ok(cards) => cards,
                Err(e) => {
                    log::warn!("Failed to query available cards: {e}");
                    state.status = QueryStatus::Failed;
                    return Err(e);
                }
            };
            if state.review_time != review_time {
                log::debug!("Discarding index query made at stale review time {review_time}");
                return Ok(false);
            }
            let mut index = CardIndex::build(new_cards, overdue_cards, review_time);
            for (card, deleted) in &buffered {
                index.apply(card, *deleted, review_time);
            }
            let changed = state.status != QueryStatus::Ready
                || index.new_cards(None) != state.index.new_cards(None)
                || index.overdue_cards(None) != state.index.overdue_cards(None);
            state.index = index;
            state.status = QueryStatus::Ready;
            changed.then(|| IndexEvent::Changed(state.index.counts()))
        };
        if let Some(event) = event {
            self.notify(event);
        }
        Ok(true)
    }

    async fn fetch(&self, review_time: Timestamp) -> Fallible<(Vec<Card>, Vec<Card>)> {
        let new_cards = self
            .store
            .get_cards_by_type(CardQuery {
                kind: CardKind::New,
                limit: None,
                skip_failed_cards: false,
                review_time,
            })
            .await?;
        let overdue_cards = self
            .store
            .get_cards_by_type(CardQuery {
                kind: CardKind::Overdue,
                limit: None,
                skip_failed_cards: false,
                review_time,
            })
            .await?;
        Ok((new_cards, overdue_cards))
    }

    /// Apply one card change from the store's change feed.
    pub fn apply_change(&self, card: &Card, deleted: bool) {
        let event = {
            let mut state = self.acquire();
            let review_time = state.review_time;
            if let Some(buffer) = state.in_flight.as_mut() {
                buffer.push((card.clone(), deleted));
            }
            let changed = state.index.apply(card, deleted, review_time);
            let ready = state.status == QueryStatus::Ready;
            (changed && ready).then(|| IndexEvent::Changed(state.index.counts()))
        };
        if let Some(event) = event {
            self.notify(event);
        }
    }

    fn notify(&self, event: IndexEvent) {
        // No listeners is fine.
        let _ = self.events.send(event);
    }

    /// Start the background task that builds the index, follows the store's
    /// change feed, re-validates periodically and rolls the review time over
    /// every hour. Aborting the returned handle stops all of it.
    pub fn spawn(self: &Arc<Self>, config: &IndexConfig) -> JoinHandle<()> {
        let index = Arc::clone(self);
        // Subscribe before spawning so no change is missed.
        let mut feed = index.store.subscribe();
        let initial_delay = Duration::from_millis(config.initial_query_delay_ms);
        let revalidate_every = Duration::from_secs(config.revalidate_interval_secs.max(1));
        tokio::spawn(async move {
            // Defer the initial query so it does not compete with whatever
            // started us. Readers that cannot wait run it themselves.
            sleep(initial_delay).await;
            if let Err(e) = index.ready().await {
                log::warn!("Initial index query failed: {e}");
            }
            let mut revalidate = interval(revalidate_every);
            revalidate.set_missed_tick_behavior(MissedTickBehavior::Delay);
            revalidate.tick().await;
            loop {
                tokio::select! {
                    change = feed.recv() => match change {
                        Ok(StoreChange::Card { card, deleted }) => {
                            index.apply_change(&card, deleted)
                        }
                        Ok(StoreChange::Summary(_)) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Index missed {skipped} changes, re-querying");
                            index.spawn_refresh();
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = revalidate.tick() => index.spawn_refresh(),
                    _ = sleep(until_next_hour(Timestamp::now())) => {
                        let index = Arc::clone(&index);
                        tokio::spawn(async move {
                            let now = Timestamp::now();
                            if let Err(e) = index.set_review_time(now).await {
                                log::warn!("Index rollover query failed: {e}");
                            }
                        });
                    }
                }
            }
        })
    }

    /// Full re-query on its own task, so change events keep being applied
    /// while it is in flight.
    fn spawn_refresh(self: &Arc<Self>) {
        let index = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = index.refresh().await {
                log::warn!("Index re-validation failed: {e}");
            }
        });
    }

    fn acquire(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap()
    }
}

fn until_next_hour(now: Timestamp) -> Duration {
    let next = now.truncate_to_hour().plus_days(1.0 / 24.0);
    let millis = (next.as_millis() - now.as_millis()).max(0);
    Duration::from_millis(millis as u64)
}
