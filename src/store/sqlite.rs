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
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use tokio::sync::broadcast;

use crate::error::Fallible;
use crate::error::fail;
use crate::store::CHANGE_FEED_CAPACITY;
use crate::store::CardKind;
use crate::store::CardQuery;
use crate::store::Store;
use crate::store::StoreChange;
use crate::store::select_cards;
use crate::types::card::Card;
use crate::types::card::CardUpdate;
use crate::types::card::Progress;
use crate::types::card_id::CardId;
use crate::types::summary::ReviewSummary;
use crate::types::timestamp::Timestamp;

/// A store backed by a local SQLite database. Writes made through this
/// handle are published on its change feed.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    pub fn new(database_path: &str) -> Fallible<Self> {
        let mut conn = Connection::open(database_path)?;
        {
            let tx = conn.transaction()?;
            if !probe_schema_exists(&tx)? {
                log::debug!("Creating database schema");
                tx.execute_batch(include_str!("schema.sql"))?;
                tx.commit()?;
            }
        }
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    /// Add a card to the database. Fails if a card with the same id exists.
    pub fn insert_card(&self, card: &Card) -> Fallible<()> {
        log::debug!("Adding new card: {}", card.id);
        {
            let conn = self.acquire();
            let sql = "insert into cards (card_id, front, back, level, due) values (?, ?, ?, ?, ?);";
            conn.execute(
                sql,
                (
                    &card.id,
                    &card.front,
                    &card.back,
                    card.progress.level,
                    card.progress.due,
                ),
            )?;
        }
        let _ = self.changes.send(StoreChange::Card {
            card: card.clone(),
            deleted: false,
        });
        Ok(())
    }

    pub fn card_count(&self) -> Fallible<usize> {
        let conn = self.acquire();
        let count: i64 = conn.query_row("select count(*) from cards;", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn acquire(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_cards_by_type(&self, query: CardQuery) -> Fallible<Vec<Card>> {
        let conn = self.acquire();
        let cards = match query.kind {
            CardKind::New => {
                let sql = "select card_id, front, back, level, due from cards where due is null order by card_id limit ?;";
                let limit: i64 = query.limit.map(|l| l as i64).unwrap_or(-1);
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map([limit], card_from_row)?;
                rows.collect::<Result<Vec<Card>, _>>()?
            }
            CardKind::Overdue => {
                // Ordering by overdueness needs the score, so the ordering
                // and limit happen in Rust.
                let sql = "select card_id, front, back, level, due from cards where due is not null and due <= ?;";
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map([query.review_time], card_from_row)?;
                let candidates = rows.collect::<Result<Vec<Card>, _>>()?;
                select_cards(candidates.iter(), &query)
            }
        };
        Ok(cards)
    }

    async fn get_cards_by_id(&self, ids: &[CardId]) -> Fallible<Vec<Card>> {
        let conn = self.acquire();
        let sql = "select card_id, front, back, level, due from cards where card_id = ?;";
        let mut stmt = conn.prepare(sql)?;
        let mut cards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(card) = stmt.query_row([id], card_from_row).optional()? {
                cards.push(card);
            }
        }
        Ok(cards)
    }

    async fn put_card(&self, update: CardUpdate) -> Fallible<Card> {
        let card = {
            let mut conn = self.acquire();
            let tx = conn.transaction()?;
            let sql = "update cards set level = ?, due = ? where card_id = ?;";
            let changed = tx.execute(
                sql,
                (update.progress.level, update.progress.due, &update.id),
            )?;
            if changed == 0 {
                return fail(format!("no card with id {}", update.id));
            }
            let sql = "select card_id, front, back, level, due from cards where card_id = ?;";
            let card = tx.query_row(sql, [&update.id], card_from_row)?;
            tx.commit()?;
            card
        };
        let _ = self.changes.send(StoreChange::Card {
            card: card.clone(),
            deleted: false,
        });
        Ok(card)
    }

    async fn put_review_summary(&self, summary: &ReviewSummary) -> Fallible<()> {
        let body = serde_json::to_string(summary)?;
        {
            let conn = self.acquire();
            let sql = "insert into review_summary (summary_id, body) values (1, ?) on conflict (summary_id) do update set body = excluded.body;";
            conn.execute(sql, [body])?;
        }
        let _ = self
            .changes
            .send(StoreChange::Summary(Some(summary.clone())));
        Ok(())
    }

    async fn get_review_summary(&self) -> Fallible<Option<ReviewSummary>> {
        let body: Option<String> = {
            let conn = self.acquire();
            let sql = "select body from review_summary where summary_id = 1;";
            conn.query_row(sql, [], |row| row.get(0)).optional()?
        };
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    async fn delete_review_summary(&self) -> Fallible<()> {
        let deleted = {
            let conn = self.acquire();
            conn.execute("delete from review_summary;", [])?
        };
        if deleted > 0 {
            let _ = self.changes.send(StoreChange::Summary(None));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn card_from_row(row: &Row) -> rusqlite::Result<Card> {
    let level: f64 = row.get(3)?;
    let due: Option<Timestamp> = row.get(4)?;
    Ok(Card {
        id: row.get(0)?,
        front: row.get(1)?,
        back: row.get(2)?,
        progress: Progress { level, due },
    })
}

fn probe_schema_exists(tx: &Transaction) -> Fallible<bool> {
    let sql = "select count(*) from sqlite_master where type='table' AND name=?;";
    let count: i64 = tx.query_row(sql, ["cards"], |row| row.get(0))?;
    Ok(count > 0)
}
