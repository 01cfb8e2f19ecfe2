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

use std::cmp::Ordering;

use crate::types::card::Progress;
use crate::types::timestamp::Timestamp;

/// Growth rate of the exponential term, per day overdue.
const EXPONENTIAL_RATE: f64 = 0.00225;

/// Compute how urgently a reviewed card should be shown.
///
/// The score is the sum of a linear term (days overdue as a fraction of the
/// card's interval) and an exponential term in days overdue. With the linear
/// term alone, a low-level card that is slightly late always beats a
/// high-level card that is months late; the exponential term lets the latter
/// catch up eventually while staying negligible at ordinary lateness.
///
/// New cards are tracked separately and should never be scored; they get
/// positive infinity.
pub fn overdueness(progress: &Progress, review_time: Timestamp) -> f64 {
    let Some(due) = progress.due else {
        return f64::INFINITY;
    };
    let days_overdue = review_time.days_since(due);
    let linear = days_overdue / progress.level;
    let exponential = (EXPONENTIAL_RATE * days_overdue).exp() - 1.0;
    linear + exponential
}

/// An overdueness score with a total order, so it can key ordered
/// collections.
#[derive(Clone, Copy, Debug)]
pub struct Overdueness(f64);

impl Overdueness {
    /// A failed card reviewed in the hour it was failed scores `0 / 0`. NaN
    /// is folded into positive infinity so such cards sort first.
    pub fn new(score: f64) -> Self {
        if score.is_nan() {
            Self(f64::INFINITY)
        } else {
            Self(score)
        }
    }
}

impl PartialEq for Overdueness {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Overdueness {}

impl PartialOrd for Overdueness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Overdueness {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}
