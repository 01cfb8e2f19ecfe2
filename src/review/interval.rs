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

use crate::types::card::Progress;
use crate::types::timestamp::Timestamp;

/// The shortest interval, in days, after passing a previously reviewed card.
const MIN_LEVEL: f64 = 0.5;

/// Map a uniform seed in `[0, 1)` to a multiplier in `[0.9, 1.1)`.
pub fn jitter(seed: f64) -> f64 {
    seed * 0.2 + 0.9
}

/// The progress of a card after it was passed at `review_time`.
///
/// A card that was reviewed before has its interval roughly doubled,
/// counting the time it spent overdue. Anything else (a new card, or a card
/// at level zero after a failure) starts over at half a day.
pub fn pass(progress: &Progress, review_time: Timestamp, confidence: f64, seed: f64) -> Progress {
    let jitter = jitter(seed);
    let level = match progress.due {
        Some(due) if progress.level > 0.0 => {
            let elapsed = review_time.days_since(due) + progress.level;
            (elapsed * 2.0 * confidence * jitter).max(MIN_LEVEL)
        }
        _ => MIN_LEVEL * confidence * jitter,
    };
    Progress {
        level,
        due: Some(review_time.plus_days(level).truncate_to_hour()),
    }
}

/// The progress of a card after it was failed at `review_time`: due again
/// right away.
pub fn fail(review_time: Timestamp) -> Progress {
    Progress {
        level: 0.0,
        due: Some(review_time.truncate_to_hour()),
    }
}
