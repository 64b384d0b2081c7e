//! Time-based retention for ledger records.
//!
//! A retention spec is a list of whitespace separated `<integer><unit>`
//! tokens, e.g. `"1y 2m"` or `"30d"`. Units: `y` years, `m` months, `w` weeks,
//! `d` days. The tokens are subtracted from "now" one after the other to get
//! the cutoff instant.

use super::BackupRecord;
use crate::utils::errors::ConfigError;
use chrono::{DateTime, Months, TimeDelta, Utc};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Years(u32),
    Months(u32),
    Weeks(u32),
    Days(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSpec {
    raw: String,
    spans: Vec<Span>,
}

impl FromStr for RetentionSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::Retention {
            spec: s.to_string(),
            reason,
        };

        let mut spans = Vec::new();
        for token in s.split_whitespace() {
            let Some((unit_at, unit)) = token.char_indices().last() else {
                continue;
            };
            let amount: u32 = token[..unit_at]
                .parse()
                .map_err(|e| invalid(format!("\"{}\" is not <integer><unit>: {}", token, e)))?;

            let span = match unit {
                'y' => Span::Years(amount),
                'm' => Span::Months(amount),
                'w' => Span::Weeks(amount),
                'd' => Span::Days(amount),
                other => return Err(invalid(format!("unknown unit '{}' in \"{}\"", other, token))),
            };
            spans.push(span);
        }

        if spans.is_empty() {
            return Err(invalid("no duration given".to_string()));
        }

        Ok(Self {
            raw: s.trim().to_string(),
            spans,
        })
    }
}

impl fmt::Display for RetentionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl RetentionSpec {
    /// The instant before which records are forgotten.
    ///
    /// Month and year steps are calendar aware (clamped to the end of shorter
    /// months). A cutoff that would fall before the representable range
    /// saturates to the earliest instant, which keeps every record.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.spans
            .iter()
            .try_fold(now, |at, span| match *span {
                Span::Years(n) => n
                    .checked_mul(12)
                    .and_then(|months| at.checked_sub_months(Months::new(months))),
                Span::Months(n) => at.checked_sub_months(Months::new(n)),
                Span::Weeks(n) => TimeDelta::try_days(i64::from(n) * 7)
                    .and_then(|delta| at.checked_sub_signed(delta)),
                Span::Days(n) => TimeDelta::try_days(i64::from(n))
                    .and_then(|delta| at.checked_sub_signed(delta)),
            })
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Keep the records completed strictly after `cutoff`.
///
/// Records whose date does not parse as RFC 3339 are dropped with a warning.
/// Returns the kept records in their original order.
pub fn retain_newer(records: Vec<BackupRecord>, cutoff: DateTime<Utc>) -> Vec<BackupRecord> {
    records
        .into_iter()
        .filter(|record| match DateTime::parse_from_rfc3339(&record.date) {
            Ok(date) => date.with_timezone(&Utc) > cutoff,
            Err(e) => {
                warn!(
                    "Unable to parse date \"{}\" of backup {}, dropping entry: {}",
                    record.date, record.id, e
                );
                false
            }
        })
        .collect()
}
