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

use std::sync::Arc;

use rand::Rng;
use rand::rngs::StdRng;

use crate::available::AvailableIndex;
use crate::error::Fallible;
use crate::error::fail;
use crate::review::slots::fetch_candidates;
use crate::review::state::LoadKind;
use crate::review::state::Phase;
use crate::review::state::ReviewState;
use crate::review::sync::SessionSync;
use crate::review::sync::SyncAction;
use crate::review::sync::resolve;
use crate::store::Store;
use crate::store::StoreChange;
use crate::types::card::Card;
use crate::types::summary::ReviewSummary;
use crate::types::timestamp::Timestamp;

/// A review session bound to a store and an index. Runs the state
/// transitions and does the reads and writes around them.
pub struct ReviewSession {
    state: ReviewState,
    rng: StdRng,
    sync: SessionSync,
    store: Arc<dyn Store>,
    index: Arc<AvailableIndex>,
    /// Reads the instant each answer is given at.
    clock: fn() -> Timestamp,
}

impl ReviewSession {
    pub fn new(store: Arc<dyn Store>, index: Arc<AvailableIndex>, rng: StdRng) -> Self {
        Self {
            state: ReviewState::new(index.review_time()),
            rng,
            sync: SessionSync::new(),
            store,
            index,
            clock: Timestamp::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> &ReviewState {
        &self.state
    }

    pub fn summary(&self) -> ReviewSummary {
        self.state.summary()
    }

    pub async fn start(&mut self, max_cards: usize, max_new_cards: usize) -> Fallible<()> {
        let review_time = self.index.review_time();
        self.state.start(max_cards, max_new_cards, review_time);
        self.sync.push(self.store.as_ref(), &self.state).await;
        self.load(LoadKind::ColdStart).await
    }

    /// Pick up the session stored in the store, if there is one.
    pub async fn resume(&mut self) -> Fallible<bool> {
        let Some(summary) = self.store.get_review_summary().await? else {
            return Ok(false);
        };
        log::debug!("Resuming session: completed={}", summary.completed);
        self.state.review_time = self.index.review_time();
        self.adopt(&summary).await?;
        Ok(true)
    }

    pub async fn resize(&mut self, max_cards: usize, max_new_cards: usize) -> Fallible<()> {
        if self.state.resize(max_cards, max_new_cards) {
            self.load(LoadKind::Resize).await?;
        }
        Ok(())
    }

    /// Follow the index to a new review time.
    pub async fn refresh(&mut self) -> Fallible<()> {
        let review_time = self.index.review_time();
        if review_time == self.state.review_time {
            return Ok(());
        }
        if self.state.phase == Phase::Idle {
            self.state.review_time = review_time;
            return Ok(());
        }
        self.state.refresh(review_time);
        self.load(LoadKind::Refresh).await
    }

    pub fn show_answer(&mut self) {
        self.state.show_answer();
    }

    /// Pass the current card. `confidence` must be in `(0, 1]`.
    pub async fn pass(&mut self, confidence: f64) -> Fallible<()> {
        if !(confidence > 0.0 && confidence <= 1.0) {
            return fail(format!("confidence must be in (0, 1], got {confidence}"));
        }
        let jitter_seed = self.rng.r#gen();
        let seeds = self.seeds();
        self.state.review_instant = (self.clock)();
        if let Some(card) = self.state.pass(confidence, jitter_seed, seeds) {
            self.save_progress(card).await;
        }
        self.sync.push(self.store.as_ref(), &self.state).await;
        Ok(())
    }

    pub async fn fail(&mut self) -> Fallible<()> {
        let seeds = self.seeds();
        self.state.review_instant = (self.clock)();
        if let Some(card) = self.state.fail(seeds) {
            self.save_progress(card).await;
        }
        self.sync.push(self.store.as_ref(), &self.state).await;
        Ok(())
    }

    pub async fn cancel(&mut self) {
        self.state.cancel();
        self.sync.push(self.store.as_ref(), &self.state).await;
    }

    /// React to one event from the store's change feed. Card changes are the
    /// index's business; summary changes may come from another device.
    pub async fn handle_store_change(&mut self, change: StoreChange) -> Fallible<()> {
        let StoreChange::Summary(remote) = change else {
            return Ok(());
        };
        match self.sync.on_remote_change(remote.as_ref(), &self.state) {
            SyncAction::Ignore => Ok(()),
            SyncAction::Cancel => {
                self.state.cancel();
                Ok(())
            }
            SyncAction::Resync(summary) => self.adopt(&summary).await,
        }
    }

    /// Refresh the counts shown while idle. Skipped while a progress write
    /// is in flight.
    pub async fn update_available_cards(&mut self) -> Fallible<()> {
        if self.state.phase != Phase::Idle || self.state.saving_progress {
            return Ok(());
        }
        let counts = self.index.num_available_cards().await?;
        self.state.set_available_cards(counts);
        Ok(())
    }

    async fn adopt(&mut self, summary: &ReviewSummary) -> Fallible<()> {
        let (history, failed) = resolve(self.store.as_ref(), summary).await?;
        self.state.resync(summary, history, failed)?;
        self.sync.adopted(summary);
        self.load(LoadKind::Resync).await
    }

    async fn load(&mut self, kind: LoadKind) -> Fallible<()> {
        let cards = fetch_candidates(&self.index, self.store.as_ref(), &self.state).await?;
        let seeds = self.seeds();
        self.state.cards_delivered(cards, seeds, kind);
        self.sync.push(self.store.as_ref(), &self.state).await;
        Ok(())
    }

    /// Persist a card's new progress. A failed write is logged and the
    /// session carries on as if it had succeeded.
    async fn save_progress(&mut self, card: Card) {
        if let Err(e) = self.store.put_card(card.update()).await {
            log::error!("Failed to save progress for card {}: {e}", card.id);
        }
        self.state.progress_saved();
    }

    fn seeds(&mut self) -> [f64; 2] {
        [self.rng.r#gen(), self.rng.r#gen()]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::SeedableRng;

    use super::*;
    use crate::available::index::AvailableCardCounts;
    use crate::review::state::Side;
    use crate::store::memory::MemoryStore;
    use crate::types::card::Progress;
    use crate::types::card_id::CardId;
    use crate::types::timestamp::ts;

    const NOW: &str = "2025-06-01T09:00:00Z";

    fn new_card(id: &str) -> Card {
        Card::new(CardId::new(id), id, id)
    }

    fn overdue_card(id: &str, days_overdue: f64) -> Card {
        new_card(id).with_progress(Progress {
            level: 1.0,
            due: Some(ts(NOW).plus_days(-days_overdue)),
        })
    }

    fn store_with(cards: Vec<Card>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for card in cards {
            store.insert_card(card);
        }
        store
    }

    fn now() -> Timestamp {
        ts(NOW)
    }

    fn session(store: &Arc<MemoryStore>, seed: u64) -> ReviewSession {
        let index = Arc::new(AvailableIndex::new(store.clone(), ts(NOW)));
        ReviewSession::new(store.clone(), index, StdRng::seed_from_u64(seed)).with_clock(now)
    }

    /// Every card the session is holding back for review.
    fn dealt(session: &ReviewSession) -> BTreeSet<String> {
        let state = session.state();
        state
            .heap
            .iter()
            .chain(state.failed.iter())
            .chain(state.current_card.iter())
            .chain(state.next_card.iter())
            .map(|card| card.id.to_string())
            .collect()
    }

    fn id_set(ids: &[CardId]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn many_new_cards(count: usize) -> Vec<Card> {
        (0..count).map(|i| new_card(&format!("n{i:02}"))).collect()
    }

    #[tokio::test]
    async fn test_start_allocates_new_then_overdue() -> Fallible<()> {
        let store = store_with(vec![
            new_card("n1"),
            new_card("n2"),
            new_card("n3"),
            overdue_card("o1", 9.0),
            overdue_card("o2", 5.0),
            overdue_card("o3", 1.0),
        ]);
        let mut session = session(&store, 1);
        session.start(3, 2).await?;
        assert_eq!(session.state().phase, Phase::Reviewing(Side::Front));
        let expected = ["n1", "n2", "o1"].map(String::from);
        assert_eq!(dealt(&session), BTreeSet::from(expected));
        assert_eq!(store.get_review_summary().await?, Some(session.summary()));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_without_cards_stays_idle() -> Fallible<()> {
        let store = store_with(vec![]);
        let mut session = session(&store, 1);
        session.start(10, 5).await?;
        assert_eq!(session.state().phase, Phase::Idle);
        assert_eq!(store.get_review_summary().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_full_session() -> Fallible<()> {
        let store = store_with(many_new_cards(3));
        let mut session = session(&store, 7);
        session.start(10, 10).await?;
        let mut answered = 0;
        while session.state().phase != Phase::Complete {
            session.show_answer();
            session.pass(1.0).await?;
            answered += 1;
            assert!(answered <= 3);
        }
        assert_eq!(session.state().completed, 3);
        for card in many_new_cards(3) {
            let stored = store.card(&card.id).unwrap();
            assert!(stored.progress.due.is_some());
            assert!(stored.progress.level > 0.0);
        }
        // The summary goes away with the session.
        assert_eq!(store.get_review_summary().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_fail_persists_reset_progress() -> Fallible<()> {
        let store = store_with(vec![overdue_card("o1", 3.0)]);
        let mut session = session(&store, 3);
        session.start(10, 10).await?;
        session.fail().await?;
        let stored = store.card(&CardId::new("o1")).unwrap();
        assert_eq!(stored.progress.level, 0.0);
        assert_eq!(stored.progress.due, Some(ts(NOW)));
        assert_eq!(session.summary().failed, vec![CardId::new("o1")]);
        assert_eq!(session.state().phase, Phase::Reviewing(Side::Front));
        Ok(())
    }

    #[tokio::test]
    async fn test_pass_late_in_the_hour() -> Fallible<()> {
        fn late() -> Timestamp {
            ts("2025-06-01T10:59:00Z")
        }
        let store = store_with(vec![new_card("n1")]);
        let index = Arc::new(AvailableIndex::new(store.clone(), late()));
        let mut session =
            ReviewSession::new(store.clone(), index, StdRng::seed_from_u64(9)).with_clock(late);
        session.start(10, 10).await?;
        assert_eq!(session.state().review_time, ts("2025-06-01T10:00:00Z"));
        session.pass(1.0).await?;
        let stored = store.card(&CardId::new("n1")).unwrap();
        let level = stored.progress.level;
        assert_eq!(
            stored.progress.due,
            Some(late().plus_days(level).truncate_to_hour())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_confidence_is_rejected() -> Fallible<()> {
        let store = store_with(many_new_cards(2));
        let mut session = session(&store, 1);
        session.start(10, 10).await?;
        for confidence in [0.0, -1.0, 1.5, f64::NAN] {
            assert!(session.pass(confidence).await.is_err());
        }
        assert_eq!(session.state().completed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_write_failure_is_treated_as_applied() -> Fallible<()> {
        let store = store_with(many_new_cards(2));
        let mut session = session(&store, 1);
        session.start(10, 10).await?;
        let current = session.state().current_card.clone().unwrap();
        store.fail_writes(true);
        session.pass(1.0).await?;
        assert_eq!(session.state().completed, 1);
        assert!(!session.state().saving_progress);
        assert_eq!(session.state().history[0].id, current.id);
        // Nothing reached the store.
        assert_eq!(store.card(&current.id).unwrap().progress.due, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_round_trip_between_sessions() -> Fallible<()> {
        let store = store_with(many_new_cards(6));
        let mut first = session(&store, 11);
        first.start(6, 6).await?;
        first.pass(1.0).await?;
        first.pass(0.5).await?;

        let mut second = session(&store, 12);
        assert!(second.resume().await?);
        assert_eq!(second.state().completed, 2);
        assert_eq!(
            second.state().new_cards_in_play,
            first.state().new_cards_in_play
        );
        assert_eq!(second.summary(), first.summary());
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_round_trip_keeps_failed_cards() -> Fallible<()> {
        let store = store_with(many_new_cards(6));
        let mut first = session(&store, 21);
        first.start(6, 6).await?;
        first.fail().await?;
        first.pass(1.0).await?;
        let summary = first.summary();

        let mut second = session(&store, 22);
        assert!(second.resume().await?);
        let state = second.state();
        assert_eq!(state.completed, summary.completed);
        let failed: Vec<CardId> = state.failed.iter().map(|card| card.id.clone()).collect();
        assert_eq!(id_set(&failed), id_set(&summary.failed));
        let mut seen: Vec<CardId> = state.history.iter().map(|card| card.id.clone()).collect();
        seen.extend(state.current_card.iter().map(|card| card.id.clone()));
        assert!(id_set(&seen).is_superset(&id_set(&summary.history)));
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_progress_is_adopted() -> Fallible<()> {
        let store = store_with(many_new_cards(6));
        let mut first = session(&store, 31);
        first.start(6, 6).await?;
        let mut second = session(&store, 32);
        assert!(second.resume().await?);

        let mut feed = store.subscribe();
        first.pass(1.0).await?;
        while let Ok(change) = feed.try_recv() {
            second.handle_store_change(change).await?;
        }
        assert_eq!(second.state().completed, 1);
        assert_eq!(second.summary().history, first.summary().history);
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_session_picks_up_remote_session() -> Fallible<()> {
        let store = store_with(many_new_cards(4));
        let mut second = session(&store, 52);
        assert_eq!(second.state().phase, Phase::Idle);

        let mut feed = store.subscribe();
        let mut first = session(&store, 51);
        first.start(4, 4).await?;
        while let Ok(change) = feed.try_recv() {
            second.handle_store_change(change).await?;
        }
        assert_eq!(second.state().phase, Phase::Reviewing(Side::Front));
        assert_eq!(second.summary(), first.summary());
        Ok(())
    }

    #[tokio::test]
    async fn test_remote_cancel_ends_session() -> Fallible<()> {
        let store = store_with(many_new_cards(4));
        let mut first = session(&store, 41);
        first.start(4, 4).await?;
        let mut second = session(&store, 42);
        assert!(second.resume().await?);

        let mut feed = store.subscribe();
        first.cancel().await;
        assert_eq!(store.get_review_summary().await?, None);
        while let Ok(change) = feed.try_recv() {
            second.handle_store_change(change).await?;
        }
        assert_eq!(second.state().phase, Phase::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_with_missing_cards_fails() -> Fallible<()> {
        let store = store_with(many_new_cards(2));
        store
            .put_review_summary(&ReviewSummary {
                max_cards: 5,
                max_new_cards: 5,
                completed: 1,
                new_cards_completed: 1,
                history: vec![CardId::new("deleted")],
                failed: vec![],
            })
            .await?;
        let mut session = session(&store, 1);
        assert!(session.resume().await.is_err());
        assert_eq!(session.state().phase, Phase::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_without_summary() -> Fallible<()> {
        let store = store_with(many_new_cards(2));
        let mut session = session(&store, 1);
        assert!(!session.resume().await?);
        assert_eq!(session.state().phase, Phase::Idle);
        Ok(())
    }

    #[tokio::test]
    async fn test_available_cards_are_counted_while_idle() -> Fallible<()> {
        let store = store_with(vec![new_card("n1"), overdue_card("o1", 2.0)]);
        let mut session = session(&store, 1);
        session.update_available_cards().await?;
        assert_eq!(
            session.state().available_cards,
            AvailableCardCounts {
                new_cards: 1,
                overdue_cards: 1,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_resize_grows_session() -> Fallible<()> {
        let store = store_with(many_new_cards(6));
        let mut session = session(&store, 5);
        session.start(2, 2).await?;
        session.pass(1.0).await?;
        session.pass(1.0).await?;
        assert_eq!(session.state().phase, Phase::Complete);
        session.resize(4, 4).await?;
        assert_eq!(session.state().phase, Phase::Reviewing(Side::Front));
        assert_eq!(dealt(&session).len(), 2);
        assert_eq!(session.summary().max_cards, 4);
        Ok(())
    }
}
