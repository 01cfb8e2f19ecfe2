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

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::ops::Bound;

use serde::Serialize;

use crate::overdue::Overdueness;
use crate::overdue::overdueness;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCardCounts {
    pub new_cards: usize,
    pub overdue_cards: usize,
}

/// Most overdue first, ties broken by id.
type OverdueKey = (Reverse<Overdueness>, CardId);

/// Which part of the index a card belongs in.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Bucket {
    New,
    Overdue(Overdueness),
    Neither,
}

/// The set of new cards (in creation order) and overdue cards (in
/// overdueness order), updated one card at a time.
#[derive(Default)]
pub struct CardIndex {
    new_cards: BTreeSet<CardId>,
    scores: HashMap<CardId, Overdueness>,
    overdue: BTreeSet<OverdueKey>,
}

impl CardIndex {
    /// Build an index from the result of a full query.
    pub fn build(
        new_cards: impl IntoIterator<Item = Card>,
        overdue_cards: impl IntoIterator<Item = Card>,
        review_time: Timestamp,
    ) -> Self {
        let mut index = Self::default();
        for card in new_cards.into_iter().chain(overdue_cards) {
            index.apply(&card, false, review_time);
        }
        index
    }

    /// Update the index for one changed card. Returns true if the set of
    /// cards or their relative order changed.
    pub fn apply(&mut self, card: &Card, deleted: bool, review_time: Timestamp) -> bool {
        let id = &card.id;
        let was = self.bucket_of(id);
        let is = if deleted {
            Bucket::Neither
        } else if card.is_new() {
            Bucket::New
        } else if card.is_overdue(review_time) {
            Bucket::Overdue(Overdueness::new(overdueness(&card.progress, review_time)))
        } else {
            Bucket::Neither
        };
        match (was, is) {
            (Bucket::New, Bucket::New) => false,
            (Bucket::Neither, Bucket::Neither) => false,
            (Bucket::Overdue(old), Bucket::Overdue(new)) => self.rescore(id, old, new),
            (was, is) => {
                match was {
                    Bucket::New => {
                        self.new_cards.remove(id);
                    }
                    Bucket::Overdue(score) => {
                        self.scores.remove(id);
                        self.overdue.remove(&(Reverse(score), id.clone()));
                    }
                    Bucket::Neither => {}
                }
                match is {
                    Bucket::New => {
                        self.new_cards.insert(id.clone());
                    }
                    Bucket::Overdue(score) => {
                        self.scores.insert(id.clone(), score);
                        self.overdue.insert((Reverse(score), id.clone()));
                    }
                    Bucket::Neither => {}
                }
                true
            }
        }
    }

    /// Move an overdue card to a new score. Only reports a change if the
    /// card's neighbours in the ordering are different afterwards.
    fn rescore(&mut self, id: &CardId, old: Overdueness, new: Overdueness) -> bool {
        if old == new {
            return false;
        }
        let old_key = (Reverse(old), id.clone());
        let before = self.neighbours(&old_key);
        self.overdue.remove(&old_key);
        let new_key = (Reverse(new), id.clone());
        self.overdue.insert(new_key.clone());
        self.scores.insert(id.clone(), new);
        let after = self.neighbours(&new_key);
        before != after
    }

    fn neighbours(&self, key: &OverdueKey) -> (Option<CardId>, Option<CardId>) {
        let prev = self
            .overdue
            .range((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(_, id)| id.clone());
        let next = self
            .overdue
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(_, id)| id.clone());
        (prev, next)
    }

    fn bucket_of(&self, id: &CardId) -> Bucket {
        if self.new_cards.contains(id) {
            Bucket::New
        } else if let Some(score) = self.scores.get(id) {
            Bucket::Overdue(*score)
        } else {
            Bucket::Neither
        }
    }

    /// New card ids, oldest first.
    pub fn new_cards(&self, limit: Option<usize>) -> Vec<CardId> {
        let limit = limit.unwrap_or(usize::MAX);
        self.new_cards.iter().take(limit).cloned().collect()
    }

    /// Overdue card ids, most overdue first.
    pub fn overdue_cards(&self, limit: Option<usize>) -> Vec<CardId> {
        let limit = limit.unwrap_or(usize::MAX);
        self.overdue
            .iter()
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn counts(&self) -> AvailableCardCounts {
        AvailableCardCounts {
            new_cards: self.new_cards.len(),
            overdue_cards: self.overdue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::card::Progress;
    use crate::types::timestamp::ts;

    const NOW: &str = "2025-05-01T00:00:00Z";

    fn new_card(id: &str) -> Card {
        Card::new(CardId::new(id), id, id)
    }

    /// A card `days_overdue` days late on an interval of `level` days.
    fn overdue_card(id: &str, days_overdue: f64, level: f64) -> Card {
        let due = ts(NOW).plus_days(-days_overdue);
        Card::new(CardId::new(id), id, id).with_progress(Progress {
            level,
            due: Some(due),
        })
    }

    fn ids(ids: Vec<CardId>) -> Vec<String> {
        ids.into_iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_build_orders_both_lists() {
        let now = ts(NOW);
        let index = CardIndex::build(
            vec![new_card("n2"), new_card("n1")],
            vec![
                overdue_card("o-mild", 1.0, 10.0),
                overdue_card("o-severe", 10.0, 1.0),
            ],
            now,
        );
        assert_eq!(ids(index.new_cards(None)), vec!["n1", "n2"]);
        assert_eq!(ids(index.overdue_cards(None)), vec!["o-severe", "o-mild"]);
        assert_eq!(
            index.counts(),
            AvailableCardCounts {
                new_cards: 2,
                overdue_cards: 2
            }
        );
    }

    #[test]
    fn test_transitions_between_buckets() {
        let now = ts(NOW);
        let mut index = CardIndex::default();

        // Neither -> new.
        assert!(index.apply(&new_card("a"), false, now));
        // New -> new.
        assert!(!index.apply(&new_card("a"), false, now));
        // New -> overdue.
        assert!(index.apply(&overdue_card("a", 2.0, 1.0), false, now));
        assert_eq!(ids(index.overdue_cards(None)), vec!["a"]);
        assert!(index.new_cards(None).is_empty());
        // Overdue -> neither (reviewed, due in the future).
        let future = Card::new(CardId::new("a"), "a", "a").with_progress(Progress {
            level: 3.0,
            due: Some(ts("2025-05-04T00:00:00Z")),
        });
        assert!(index.apply(&future, false, now));
        assert_eq!(index.counts(), AvailableCardCounts::default());
        // Neither -> neither.
        assert!(!index.apply(&future, false, now));
        // Neither -> overdue -> deleted.
        assert!(index.apply(&overdue_card("a", 2.0, 1.0), false, now));
        assert!(index.apply(&overdue_card("a", 2.0, 1.0), true, now));
        assert_eq!(index.counts(), AvailableCardCounts::default());
        // Neither -> new -> neither (deleted).
        assert!(index.apply(&new_card("b"), false, now));
        assert!(index.apply(&new_card("b"), true, now));
        assert_eq!(index.counts(), AvailableCardCounts::default());
    }

    #[test]
    fn test_overdue_back_to_new() {
        let now = ts(NOW);
        let mut index = CardIndex::default();
        index.apply(&overdue_card("a", 2.0, 1.0), false, now);
        assert!(index.apply(&new_card("a"), false, now));
        assert_eq!(ids(index.new_cards(None)), vec!["a"]);
        assert!(index.overdue_cards(None).is_empty());
    }

    #[test]
    fn test_rescore_without_reordering_is_silent() {
        let now = ts(NOW);
        let mut index = CardIndex::default();
        // Scores roughly 10, 5 and 1.
        index.apply(&overdue_card("high", 10.0, 1.0), false, now);
        index.apply(&overdue_card("mid", 5.0, 1.0), false, now);
        index.apply(&overdue_card("low", 1.0, 1.0), false, now);
        assert_eq!(ids(index.overdue_cards(None)), vec!["high", "mid", "low"]);

        // 5 -> 5.0001: same neighbours.
        let nudged = overdue_card("mid", 5.0, 0.99998);
        assert!(!index.apply(&nudged, false, now));
        assert_eq!(ids(index.overdue_cards(None)), vec!["high", "mid", "low"]);

        // Jump above the neighbour.
        let jumped = overdue_card("mid", 5.0, 0.25);
        assert!(index.apply(&jumped, false, now));
        assert_eq!(ids(index.overdue_cards(None)), vec!["mid", "high", "low"]);
    }

    #[test]
    fn test_limits() {
        let now = ts(NOW);
        let index = CardIndex::build(
            vec![new_card("n1"), new_card("n2"), new_card("n3")],
            vec![],
            now,
        );
        assert_eq!(ids(index.new_cards(Some(2))), vec!["n1", "n2"]);
        assert!(index.overdue_cards(Some(2)).is_empty());
    }
}
