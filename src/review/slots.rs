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

use std::collections::HashSet;

use crate::available::AvailableIndex;
use crate::error::Fallible;
use crate::review::state::ReviewState;
use crate::store::Store;
use crate::types::card::Card;
use crate::types::card_id::CardId;

/// How many cards the session still has room for.
pub fn free_slots(state: &ReviewState) -> usize {
    let current = usize::from(state.current_card.is_some());
    state
        .max_cards
        .saturating_sub(state.completed)
        .saturating_sub(state.failed.len())
        .saturating_sub(current)
}

/// How many of the free slots may go to new cards.
pub fn new_slots(state: &ReviewState) -> usize {
    state
        .max_new_cards
        .saturating_sub(state.new_cards_in_play)
        .min(free_slots(state))
}

/// Cards the session has already dealt with or is holding.
fn excluded(state: &ReviewState) -> HashSet<CardId> {
    state
        .failed
        .iter()
        .chain(state.history.iter())
        .chain(state.current_card.iter())
        .map(|card| card.id.clone())
        .collect()
}

/// Fetch candidate cards to fill the session: new cards first, oldest
/// first, then the most overdue cards in the remaining slots.
pub async fn fetch_candidates(
    index: &AvailableIndex,
    store: &dyn Store,
    state: &ReviewState,
) -> Fallible<Vec<Card>> {
    let free = free_slots(state);
    if free == 0 {
        return Ok(Vec::new());
    }
    let excluded = excluded(state);
    let keep = |ids: Vec<CardId>, limit: usize| -> Vec<CardId> {
        ids.into_iter()
            .filter(|id| !excluded.contains(id))
            .take(limit)
            .collect()
    };

    let new_limit = new_slots(state);
    let mut ids = if new_limit > 0 {
        keep(index.new_cards(Some(new_limit + excluded.len())).await?, new_limit)
    } else {
        Vec::new()
    };
    let overdue_limit = free - ids.len();
    if overdue_limit > 0 {
        let overdue = index
            .overdue_cards(Some(overdue_limit + excluded.len()))
            .await?;
        ids.extend(keep(overdue, overdue_limit));
    }
    log::debug!(
        "Allocated {} of {} free slots (new limit {})",
        ids.len(),
        free,
        new_limit
    );
    store.get_cards_by_id(&ids).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::review::state::LoadKind;
    use crate::store::memory::MemoryStore;
    use crate::types::card::Progress;
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

    fn setup(cards: Vec<Card>) -> (Arc<MemoryStore>, AvailableIndex) {
        let store = Arc::new(MemoryStore::new());
        for card in cards {
            store.insert_card(card);
        }
        let index = AvailableIndex::new(store.clone(), ts(NOW));
        (store, index)
    }

    fn ids(cards: &[Card]) -> Vec<&str> {
        cards.iter().map(|card| card.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_new_cards_then_most_overdue() -> Fallible<()> {
        let (store, index) = setup(vec![
            new_card("n1"),
            new_card("n2"),
            new_card("n3"),
            overdue_card("o1", 9.0),
            overdue_card("o2", 5.0),
            overdue_card("o3", 1.0),
        ]);
        let mut state = ReviewState::new(ts(NOW));
        state.start(3, 2, ts(NOW));
        let cards = fetch_candidates(&index, store.as_ref(), &state).await?;
        assert_eq!(ids(&cards), vec!["n1", "n2", "o1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_overdue_cards_fill_unused_new_slots() -> Fallible<()> {
        let (store, index) = setup(vec![
            new_card("n1"),
            overdue_card("o1", 9.0),
            overdue_card("o2", 5.0),
        ]);
        let mut state = ReviewState::new(ts(NOW));
        state.start(3, 2, ts(NOW));
        let cards = fetch_candidates(&index, store.as_ref(), &state).await?;
        assert_eq!(ids(&cards), vec!["n1", "o1", "o2"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_refill_excludes_session_cards() -> Fallible<()> {
        let (store, index) = setup(vec![
            new_card("n1"),
            new_card("n2"),
            new_card("n3"),
            overdue_card("o1", 9.0),
        ]);
        let mut state = ReviewState::new(ts(NOW));
        state.start(2, 2, ts(NOW));
        let cards = fetch_candidates(&index, store.as_ref(), &state).await?;
        assert_eq!(ids(&cards), vec!["n1", "n2"]);
        state.cards_delivered(cards, [0.0, 0.0], LoadKind::ColdStart);
        // n1 is on screen; n2 is next.
        state.fail([0.0, 0.0]);
        state.pass(1.0, 0.5, [0.0, 0.0]);
        // Completed 1, failed 1 (n1, now on screen again).
        assert_eq!(state.completed, 1);
        assert_eq!(free_slots(&state), 0);

        assert!(state.resize(5, 4));
        assert_eq!(free_slots(&state), 2);
        // n1 and n2 were already seen; n3 is the only new card left.
        let cards = fetch_candidates(&index, store.as_ref(), &state).await?;
        assert_eq!(ids(&cards), vec!["n3", "o1"]);
        Ok(())
    }

    #[test]
    fn test_new_slots_are_capped_by_new_cards_in_play() {
        let mut state = ReviewState::new(ts(NOW));
        state.start(10, 3, ts(NOW));
        state.new_cards_in_play = 2;
        assert_eq!(free_slots(&state), 10);
        assert_eq!(new_slots(&state), 1);
        state.new_cards_in_play = 5;
        assert_eq!(new_slots(&state), 0);
    }
}
