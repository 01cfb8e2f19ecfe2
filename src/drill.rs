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

use std::io::BufRead;
use std::io::Write;
use std::io::stdin;
use std::io::stdout;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::TryRecvError;

use crate::collection::Collection;
use crate::error::Fallible;
use crate::error::fail;
use crate::review::session::ReviewSession;
use crate::review::state::Phase;
use crate::review::state::Side;
use crate::store::Store;
use crate::store::StoreChange;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Answer {
    Pass(f64),
    Fail,
    Quit,
}

/// Parse a line typed after the answer was shown: `p` (optionally followed
/// by a confidence in `(0, 1]`), `f` or `q`.
pub fn parse_answer(line: &str) -> Option<Answer> {
    let mut words = line.split_whitespace();
    let answer = match words.next()? {
        "p" => match words.next() {
            Some(confidence) => Answer::Pass(confidence.parse().ok()?),
            None => Answer::Pass(1.0),
        },
        "f" => Answer::Fail,
        "q" => Answer::Quit,
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(answer)
}

/// Review cards in the terminal. Resumes the stored session if there is
/// one, otherwise starts a new one.
pub async fn drill(
    collection: Collection,
    max_cards: Option<usize>,
    max_new_cards: Option<usize>,
) -> Fallible<()> {
    let defaults = collection.config.session;
    let max_cards = max_cards.unwrap_or(defaults.max_cards);
    let max_new_cards = max_new_cards.unwrap_or(defaults.max_new_cards);

    let index = collection.index();
    let background = index.spawn(&collection.config.index);
    let mut feed = collection.store.subscribe();
    let mut session = ReviewSession::new(collection.store.clone(), index, StdRng::from_entropy());

    if session.resume().await? {
        let summary = session.summary();
        println!("Resuming session: {} cards done.", summary.completed);
        if summary.max_cards != max_cards || summary.max_new_cards != max_new_cards {
            session.resize(max_cards, max_new_cards).await?;
        }
    } else {
        session.start(max_cards, max_new_cards).await?;
    }

    let result = run(&mut session, collection.store.as_ref(), &mut feed).await;
    background.abort();
    result
}

async fn run(
    session: &mut ReviewSession,
    store: &dyn Store,
    feed: &mut Receiver<StoreChange>,
) -> Fallible<()> {
    loop {
        loop {
            match feed.try_recv() {
                Ok(change) => session.handle_store_change(change).await?,
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("Missed {skipped} store changes, re-reading the session");
                    catch_up(session, store).await?;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        session.refresh().await?;

        let state = session.state();
        match state.phase {
            Phase::Idle => {
                session.update_available_cards().await?;
                let counts = session.state().available_cards;
                println!(
                    "Nothing to review ({} new, {} overdue).",
                    counts.new_cards, counts.overdue_cards
                );
                return Ok(());
            }
            Phase::Loading => {
                return fail("session did not finish loading.");
            }
            Phase::Complete => {
                println!("Session complete: {} cards reviewed.", state.completed);
                return Ok(());
            }
            Phase::Reviewing(Side::Front) => {
                if let Some(card) = &state.current_card {
                    println!();
                    println!("Q: {}", card.front);
                    prompt("[press enter to reveal]")?;
                    read_line()?;
                }
                session.show_answer();
            }
            Phase::Reviewing(Side::Back) => {
                if let Some(card) = &state.current_card {
                    println!("A: {}", card.back);
                }
                match read_answer()? {
                    Answer::Pass(confidence) => session.pass(confidence).await?,
                    Answer::Fail => session.fail().await?,
                    Answer::Quit => {
                        println!("Session saved. Run `review` again to continue.");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Treat the stored summary as if its last change had just arrived.
async fn catch_up(session: &mut ReviewSession, store: &dyn Store) -> Fallible<()> {
    let summary = store.get_review_summary().await?;
    session.handle_store_change(StoreChange::Summary(summary)).await
}

fn read_answer() -> Fallible<Answer> {
    loop {
        prompt("(p = pass, p 0.5 = unsure pass, f = fail, q = quit)")?;
        let line = read_line()?;
        match parse_answer(&line) {
            Some(Answer::Pass(confidence)) if !(confidence > 0.0 && confidence <= 1.0) => {
                println!("Confidence must be greater than 0 and at most 1.");
            }
            Some(answer) => return Ok(answer),
            None => println!("Invalid input."),
        }
    }
}

fn prompt(text: &str) -> Fallible<()> {
    print!("{text} ");
    stdout().flush()?;
    Ok(())
}

fn read_line() -> Fallible<String> {
    let mut line = String::new();
    let read = stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return fail("unexpected end of input.");
    }
    Ok(line)
}
