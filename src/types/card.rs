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

use crate::types::card_id::CardId;
use crate::types::timestamp::Timestamp;

#[derive(Clone, Debug, PartialEq)]
pub struct Card {
    pub id: CardId,
    /// The card's prompt. Opaque to the scheduler.
    pub front: String,
    /// The card's answer. Opaque to the scheduler.
    pub back: String,
    pub progress: Progress,
}

/// Scheduling information for a card.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Progress {
    /// The current review interval, in (fractional) days. Never negative.
    pub level: f64,
    /// When the card is next due, always at the top of an hour. `None` if
    /// the card has never been reviewed.
    pub due: Option<Timestamp>,
}

/// A partial update to a card: only the progress is replaced.
#[derive(Clone, Debug, PartialEq)]
pub struct CardUpdate {
    pub id: CardId,
    pub progress: Progress,
}

impl Card {
    pub fn new(id: CardId, front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            id,
            front: front.into(),
            back: back.into(),
            progress: Progress::new_card(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_new(&self) -> bool {
        self.progress.is_new()
    }

    pub fn is_overdue(&self, review_time: Timestamp) -> bool {
        self.progress.is_overdue(review_time)
    }

    pub fn update(&self) -> CardUpdate {
        CardUpdate {
            id: self.id.clone(),
            progress: self.progress,
        }
    }
}

impl Progress {
    pub fn new_card() -> Self {
        Self {
            level: 0.0,
            due: None,
        }
    }

    pub fn is_new(&self) -> bool {
        self.due.is_none()
    }

    pub fn is_overdue(&self, review_time: Timestamp) -> bool {
        match self.due {
            Some(due) => due <= review_time,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::timestamp::ts;

    #[test]
    fn test_classification() {
        let now = ts("2025-03-01T10:00:00Z");
        let card = Card::new(CardId::new("a"), "Q", "A");
        assert!(card.is_new());
        assert!(!card.is_overdue(now));

        let due = card.clone().with_progress(Progress {
            level: 1.0,
            due: Some(ts("2025-03-01T10:00:00Z")),
        });
        assert!(!due.is_new());
        assert!(due.is_overdue(now));

        let later = card.with_progress(Progress {
            level: 1.0,
            due: Some(ts("2025-03-01T11:00:00Z")),
        });
        assert!(!later.is_overdue(now));
    }
}
