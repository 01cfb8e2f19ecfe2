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

use crate::types::card::Card;
use crate::types::card_id::CardId;

/// Exponent applied to the seed. Values above one skew the draw towards the
/// front of the list, where the failed cards are.
const SEED_SKEW: f64 = 1.4;

/// Pick the next card from the failed cards followed by the heap.
///
/// `seed` must be uniform in `[0, 1)` and freshly drawn for each call.
/// `forbidden` is the card currently on screen, which must not be picked
/// again: on a collision the pick moves one position forward (or back, at the
/// end of the list). With a single candidate that is also the forbidden
/// card, there is no next card.
pub fn select_next_card(
    failed: &[Card],
    heap: &[Card],
    seed: f64,
    forbidden: Option<&CardId>,
) -> Option<Card> {
    let total = failed.len() + heap.len();
    if total == 0 {
        return None;
    }
    let weighted = seed.clamp(0.0, 1.0).powf(SEED_SKEW);
    let mut index = ((weighted * total as f64).floor() as usize).min(total - 1);
    if Some(&card_at(failed, heap, index).id) == forbidden {
        if total == 1 {
            return None;
        }
        index = if index + 1 < total { index + 1 } else { index - 1 };
    }
    Some(card_at(failed, heap, index).clone())
}

fn card_at<'a>(failed: &'a [Card], heap: &'a [Card], index: usize) -> &'a Card {
    if index < failed.len() {
        &failed[index]
    } else {
        &heap[index - failed.len()]
    }
}
