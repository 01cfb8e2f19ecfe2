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

use crate::available::index::AvailableCardCounts;
use crate::error::Fallible;
use crate::error::fail;
use crate::review::interval;
use crate::review::selector::select_next_card;
use crate::types::card::Card;
use crate::types::card_id::CardId;
use crate::types::summary::ReviewSummary;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No session.
    Idle,
    /// Waiting for candidate cards.
    Loading,
    Reviewing(Side),
    /// Every card in the session has been passed.
    Complete,
}

/// Why cards are being loaded. Only affects what an empty delivery means.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadKind {
    ColdStart,
    Resize,
    Refresh,
    Resync,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NextCardMode {
    /// Promote the next card to the current card, then draw a new next card.
    UpdateCurrentCard,
    /// Only draw a new next card.
    ReplaceNextCardOnly,
}

/// The state of a review session. Every transition is synchronous: the
/// caller does the I/O and passes in random seeds and the times.
#[derive(Clone, Debug)]
pub struct ReviewState {
    pub phase: Phase,
    pub max_cards: usize,
    pub max_new_cards: usize,
    /// Cards passed in this session.
    pub completed: usize,
    /// New cards that have been shown in this session.
    pub new_cards_in_play: usize,
    /// Cards waiting to be dealt.
    pub heap: Vec<Card>,
    /// Cards failed and not passed since, most recently failed last.
    pub failed: Vec<Card>,
    /// Cards answered in this session, most recent last, unique by id.
    pub history: Vec<Card>,
    pub current_card: Option<Card>,
    pub next_card: Option<Card>,
    /// A progress write is in flight.
    pub saving_progress: bool,
    /// Last known counts. Only meaningful while idle.
    pub available_cards: AvailableCardCounts,
    /// Top of the hour that candidate cards are scored at.
    pub review_time: Timestamp,
    /// When the current answer is given. Not rounded: intervals are
    /// measured from it.
    pub review_instant: Timestamp,
}

impl ReviewState {
    pub fn new(review_time: Timestamp) -> Self {
        Self {
            phase: Phase::Idle,
            max_cards: 0,
            max_new_cards: 0,
            completed: 0,
            new_cards_in_play: 0,
            heap: Vec::new(),
            failed: Vec::new(),
            history: Vec::new(),
            current_card: None,
            next_card: None,
            saving_progress: false,
            available_cards: AvailableCardCounts::default(),
            review_time,
            review_instant: review_time,
        }
    }

    /// True while a session is loading or being reviewed.
    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::Reviewing(_))
    }

    /// Begin a new session from scratch.
    pub fn start(&mut self, max_cards: usize, max_new_cards: usize, review_time: Timestamp) {
        log::debug!("Starting session: max_cards={max_cards} max_new_cards={max_new_cards}");
        self.clear();
        self.max_cards = max_cards;
        self.max_new_cards = max_new_cards;
        self.review_time = review_time;
        self.phase = Phase::Loading;
    }

    /// Change the limits of the running session, keeping its progress.
    pub fn resize(&mut self, max_cards: usize, max_new_cards: usize) -> bool {
        if !self.can_reload("resize") {
            return false;
        }
        self.max_cards = max_cards;
        self.max_new_cards = max_new_cards;
        self.phase = Phase::Loading;
        true
    }

    /// Move the running session to a new review time, keeping its progress.
    pub fn refresh(&mut self, review_time: Timestamp) -> bool {
        if !self.can_reload("refresh") {
            return false;
        }
        self.review_time = review_time;
        self.phase = Phase::Loading;
        true
    }

    fn can_reload(&self, action: &str) -> bool {
        match self.phase {
            Phase::Loading | Phase::Reviewing(_) | Phase::Complete => true,
            Phase::Idle => {
                log::warn!("Ignoring {action}: no session");
                false
            }
        }
    }

    /// Take delivery of candidate cards from slot allocation.
    pub fn cards_delivered(&mut self, cards: Vec<Card>, seeds: [f64; 2], kind: LoadKind) {
        if self.phase != Phase::Loading {
            log::warn!("Ignoring {} delivered cards in phase {:?}", cards.len(), self.phase);
            return;
        }
        let held: HashSet<CardId> = self
            .failed
            .iter()
            .chain(self.current_card.iter())
            .chain(self.next_card.iter())
            .map(|card| card.id.clone())
            .collect();
        self.heap = cards
            .into_iter()
            .filter(|card| !held.contains(&card.id))
            .collect();
        log::debug!(
            "Delivered {} cards ({:?}); {} failed",
            self.heap.len(),
            kind,
            self.failed.len()
        );

        if self.next_card.is_none() {
            self.update_next_card(seeds[0], NextCardMode::ReplaceNextCardOnly);
        }
        if self.current_card.is_none() {
            self.update_next_card(seeds[1], NextCardMode::UpdateCurrentCard);
        }

        self.phase = if self.current_card.is_some() {
            Phase::Reviewing(Side::Front)
        } else if kind == LoadKind::ColdStart && self.history.is_empty() && self.completed == 0 {
            Phase::Idle
        } else {
            Phase::Complete
        };
    }

    pub fn show_answer(&mut self) {
        match self.phase {
            Phase::Reviewing(Side::Front) => self.phase = Phase::Reviewing(Side::Back),
            phase => log::warn!("Ignoring show answer in phase {phase:?}"),
        }
    }

    /// Pass the current card. Returns the card with its new progress, to be
    /// persisted by the caller.
    pub fn pass(&mut self, confidence: f64, jitter_seed: f64, seeds: [f64; 2]) -> Option<Card> {
        let mut card = self.take_current_card("pass")?;
        if let Some(position) = self.failed_position(&card.id) {
            self.failed.remove(position);
            card.progress.level = 0.0;
        }
        card.progress = interval::pass(
            &card.progress,
            self.review_instant,
            confidence,
            jitter_seed,
        );
        log::debug!(
            "Passed {} level={:.2} due={:?}",
            card.id,
            card.progress.level,
            card.progress.due
        );
        self.push_history(card.clone());
        self.completed += 1;
        self.saving_progress = true;
        self.advance(seeds);
        Some(card)
    }

    /// Fail the current card. Returns the card with its new progress, to be
    /// persisted by the caller.
    pub fn fail(&mut self, seeds: [f64; 2]) -> Option<Card> {
        let mut card = self.take_current_card("fail")?;
        if let Some(position) = self.failed_position(&card.id) {
            self.failed.remove(position);
        }
        card.progress = interval::fail(self.review_instant);
        log::debug!("Failed {}", card.id);
        self.failed.push(card.clone());
        self.push_history(card.clone());
        self.saving_progress = true;
        self.advance(seeds);
        Some(card)
    }

    pub fn progress_saved(&mut self) {
        self.saving_progress = false;
    }

    /// Abandon the session.
    pub fn cancel(&mut self) {
        match self.phase {
            Phase::Idle | Phase::Complete => {}
            Phase::Loading | Phase::Reviewing(_) => {
                log::debug!("Cancelling session");
                self.clear();
                self.phase = Phase::Idle;
            }
        }
    }

    /// Replace the session's progress with a summary written elsewhere.
    /// `history` and `failed` are the summary's ids resolved to cards. If
    /// any id did not resolve, nothing changes and an error is returned.
    pub fn resync(
        &mut self,
        summary: &ReviewSummary,
        history: Vec<Card>,
        failed: Vec<Card>,
    ) -> Fallible<()> {
        if !same_ids(&summary.history, &history) || !same_ids(&summary.failed, &failed) {
            return fail(format!(
                "session summary references missing cards: expected {} history and {} failed, found {} and {}",
                summary.history.len(),
                summary.failed.len(),
                history.len(),
                failed.len()
            ));
        }
        log::debug!(
            "Resyncing session: completed={} history={} failed={}",
            summary.completed,
            history.len(),
            failed.len()
        );
        self.max_cards = summary.max_cards;
        self.max_new_cards = summary.max_new_cards;
        self.completed = summary.completed;
        self.new_cards_in_play = summary.new_cards_completed;
        self.history = history;
        self.failed = failed;
        self.heap.clear();
        self.current_card = None;
        self.next_card = None;
        self.phase = Phase::Loading;
        Ok(())
    }

    pub fn set_available_cards(&mut self, counts: AvailableCardCounts) {
        self.available_cards = counts;
    }

    /// The persisted form of the session.
    pub fn summary(&self) -> ReviewSummary {
        let current_is_new = self.current_card.as_ref().is_some_and(|card| card.is_new());
        ReviewSummary {
            max_cards: self.max_cards,
            max_new_cards: self.max_new_cards,
            completed: self.completed,
            new_cards_completed: self
                .new_cards_in_play
                .saturating_sub(usize::from(current_is_new)),
            history: self.history.iter().map(|card| card.id.clone()).collect(),
            failed: self.failed.iter().map(|card| card.id.clone()).collect(),
        }
    }

    fn take_current_card(&mut self, action: &str) -> Option<Card> {
        if !matches!(self.phase, Phase::Reviewing(_)) {
            log::warn!("Ignoring {action} in phase {:?}", self.phase);
            return None;
        }
        let card = self.current_card.take();
        if card.is_none() {
            log::warn!("Ignoring {action}: no current card");
        }
        card
    }

    /// Deal the next card after the current one was answered.
    fn advance(&mut self, seeds: [f64; 2]) {
        self.update_next_card(seeds[0], NextCardMode::UpdateCurrentCard);
        // Without a next card the draw above only refilled the next card.
        if self.current_card.is_none() && self.next_card.is_some() {
            self.update_next_card(seeds[1], NextCardMode::UpdateCurrentCard);
        }
        self.phase = if self.current_card.is_some() {
            Phase::Reviewing(Side::Front)
        } else {
            Phase::Complete
        };
    }

    fn update_next_card(&mut self, seed: f64, mode: NextCardMode) {
        if mode == NextCardMode::UpdateCurrentCard {
            self.current_card = self.next_card.take();
            if let Some(card) = &self.current_card {
                let id = card.id.clone();
                if card.is_new() {
                    self.new_cards_in_play += 1;
                }
                self.history.retain(|entry| entry.id != id);
            }
        }
        let forbidden = self.current_card.as_ref().map(|card| &card.id);
        let next = select_next_card(&self.failed, &self.heap, seed, forbidden);
        if let Some(card) = &next {
            self.heap.retain(|entry| entry.id != card.id);
        }
        self.next_card = next;
    }

    fn failed_position(&self, id: &CardId) -> Option<usize> {
        self.failed.iter().position(|card| &card.id == id)
    }

    fn push_history(&mut self, card: Card) {
        self.history.retain(|entry| entry.id != card.id);
        self.history.push(card);
    }

    fn clear(&mut self) {
        self.completed = 0;
        self.new_cards_in_play = 0;
        self.heap.clear();
        self.failed.clear();
        self.history.clear();
        self.current_card = None;
        self.next_card = None;
    }
}

fn same_ids(ids: &[CardId], cards: &[Card]) -> bool {
    ids.len() == cards.len() && ids.iter().zip(cards).all(|(id, card)| id == &card.id)
}
