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

use std::collections::VecDeque;

use crate::error::Fallible;
use crate::review::state::ReviewState;
use crate::store::Store;
use crate::types::card::Card;
use crate::types::summary::ReviewSummary;

/// What to do about a summary change seen on the store's change feed.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncAction {
    Ignore,
    /// Another device moved the session on: adopt its progress.
    Resync(ReviewSummary),
    /// Another device ended the session.
    Cancel,
}

/// How many of our own writes may be waiting to come back on the feed.
const MAX_PENDING_ECHOES: usize = 64;

/// Keeps the stored session summary in step with the local session.
#[derive(Default)]
pub struct SessionSync {
    /// The summary this side last wrote or adopted.
    last_written: Option<ReviewSummary>,
    /// Summaries written here whose change events have not been seen yet,
    /// oldest first.
    echoes: VecDeque<ReviewSummary>,
}

impl SessionSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the local session to the store: the summary while a session is
    /// running, nothing once it is over. Failures are logged and dropped; the
    /// next push carries the same information.
    pub async fn push(&mut self, store: &dyn Store, state: &ReviewState) {
        if state.is_active() {
            let summary = state.summary();
            if self.last_written.as_ref() == Some(&summary) {
                return;
            }
            match store.put_review_summary(&summary).await {
                Ok(()) => {
                    if self.echoes.len() == MAX_PENDING_ECHOES {
                        self.echoes.pop_front();
                    }
                    self.echoes.push_back(summary.clone());
                    self.last_written = Some(summary);
                }
                Err(e) => log::warn!("Failed to save session summary: {e}"),
            }
        } else if self.last_written.take().is_some() {
            if let Err(e) = store.delete_review_summary().await {
                log::warn!("Failed to delete session summary: {e}");
            }
        }
    }

    /// Remember a summary adopted from the store so it is not written back.
    pub fn adopted(&mut self, summary: &ReviewSummary) {
        self.last_written = Some(summary.clone());
    }

    /// Decide how to react to the stored summary changing to `remote`.
    pub fn on_remote_change(
        &mut self,
        remote: Option<&ReviewSummary>,
        state: &ReviewState,
    ) -> SyncAction {
        match remote {
            Some(summary) => {
                if let Some(position) = self.echoes.iter().position(|echo| echo == summary) {
                    self.echoes.drain(..=position);
                    return SyncAction::Ignore;
                }
                if self.last_written.as_ref() == Some(summary) {
                    return SyncAction::Ignore;
                }
                if state.summary() == *summary {
                    self.adopted(summary);
                    return SyncAction::Ignore;
                }
                log::debug!("Remote session changed: completed={}", summary.completed);
                self.adopted(summary);
                SyncAction::Resync(summary.clone())
            }
            None => {
                let ours = self.last_written.take().is_some();
                if ours && state.is_active() {
                    log::debug!("Remote session ended");
                    SyncAction::Cancel
                } else {
                    SyncAction::Ignore
                }
            }
        }
    }
}

/// Resolve a summary's ids to cards. Returns the history and failed cards.
/// Ids that no longer exist are skipped, which the state rejects.
pub async fn resolve(
    store: &dyn Store,
    summary: &ReviewSummary,
) -> Fallible<(Vec<Card>, Vec<Card>)> {
    let history = store.get_cards_by_id(&summary.history).await?;
    let failed = store.get_cards_by_id(&summary.failed).await?;
    Ok((history, failed))
}
