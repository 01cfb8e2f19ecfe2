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

use serde::Deserialize;
use serde::Serialize;

use crate::types::card_id::CardId;

/// The persisted, id-only projection of an in-progress review session. This
/// is the unit of reconciliation between devices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub max_cards: usize,
    pub max_new_cards: usize,
    pub completed: usize,
    pub new_cards_completed: usize,
    /// Cards already shown, most recent last.
    pub history: Vec<CardId>,
    /// Cards answered incorrectly and not yet passed, most recently failed
    /// last.
    pub failed: Vec<CardId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fallible;

    #[test]
    fn test_json_shape() -> Fallible<()> {
        let summary = ReviewSummary {
            max_cards: 10,
            max_new_cards: 2,
            completed: 1,
            new_cards_completed: 1,
            history: vec![CardId::new("a")],
            failed: vec![],
        };
        let json = serde_json::to_string(&summary)?;
        assert_eq!(
            json,
            r#"{"maxCards":10,"maxNewCards":2,"completed":1,"newCardsCompleted":1,"history":["a"],"failed":[]}"#
        );
        let parsed: ReviewSummary = serde_json::from_str(&json)?;
        assert_eq!(parsed, summary);
        Ok(())
    }
}
