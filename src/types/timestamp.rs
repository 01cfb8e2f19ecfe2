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

use std::fmt::Display;
use std::fmt::Formatter;

use chrono::DateTime;
use chrono::DurationRound;
use chrono::TimeDelta;
use chrono::Utc;
use rusqlite::ToSql;
use rusqlite::types::FromSql;
use rusqlite::types::FromSqlError;
use rusqlite::types::FromSqlResult;
use rusqlite::types::ToSqlOutput;
use rusqlite::types::ValueRef;

pub const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// A UTC instant with millisecond precision.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self(ts)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    pub fn as_millis(self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Round down to the top of the hour.
    pub fn truncate_to_hour(self) -> Self {
        match self.0.duration_trunc(TimeDelta::hours(1)) {
            Ok(ts) => Self(ts),
            Err(_) => self,
        }
    }

    /// The number of (fractional) days elapsed from `earlier` to `self`.
    /// Negative when `earlier` is in the future.
    pub fn days_since(self, earlier: Timestamp) -> f64 {
        (self.as_millis() - earlier.as_millis()) as f64 / MS_PER_DAY
    }

    /// Add a fractional number of days. Saturates at the representable
    /// maximum.
    pub fn plus_days(self, days: f64) -> Self {
        let millis = (days * MS_PER_DAY).round() as i64;
        match self.0.checked_add_signed(TimeDelta::milliseconds(millis)) {
            Some(ts) => Self(ts),
            None => Self(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_millis()))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let millis: i64 = FromSql::column_result(value)?;
        Timestamp::from_millis(millis).ok_or(FromSqlError::OutOfRange(millis))
    }
}

#[cfg(test)]
pub fn ts(rfc3339: &str) -> Timestamp {
    let ts = DateTime::parse_from_rfc3339(rfc3339).unwrap();
    Timestamp::new(ts.with_timezone(&Utc))
}
