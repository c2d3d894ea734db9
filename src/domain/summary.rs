use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use super::errors::MoneyError;
use super::money::{decimal_number, Cents};

// ============================================================================
// Summary Value Objects
// ============================================================================

/// Count and total of settled payments for one processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryItem {
    pub total_requests: u64,
    #[serde(with = "decimal_number")]
    pub total_amount: Cents,
}

impl SummaryItem {
    pub fn new(total_requests: u64, total_amount: Cents) -> Self {
        Self {
            total_requests,
            total_amount,
        }
    }

    pub fn record(&mut self, amount: Cents) -> Result<(), MoneyError> {
        self.total_amount = self.total_amount.checked_add(amount)?;
        self.total_requests += 1;
        Ok(())
    }

    pub fn combine(self, rhs: SummaryItem) -> Result<SummaryItem, MoneyError> {
        Ok(SummaryItem {
            total_requests: self.total_requests + rhs.total_requests,
            total_amount: self.total_amount.checked_add(rhs.total_amount)?,
        })
    }
}

/// Response body of both summary endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub default: SummaryItem,
    pub fallback: SummaryItem,
}

impl Summary {
    /// Field-wise sum of two replicas' summaries.
    pub fn merge(self, other: Summary) -> Result<Summary, MoneyError> {
        Ok(Summary {
            default: self.default.combine(other.default)?,
            fallback: self.fallback.combine(other.fallback)?,
        })
    }
}

/// Inclusive `[from, to]` window over `requested_at`. A missing bound is
/// unbounded on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    /// Build a window from raw RFC 3339 query values. Unparseable values are
    /// treated like absent ones.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from: from.and_then(|raw| parse_bound("from", raw)),
            to: to.and_then(|raw| parse_bound("to", raw)),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp <= to)
    }

    /// Query parameters reproducing this window on another replica.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(2);
        if let Some(from) = self.from {
            pairs.push(("from", from.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        }
        if let Some(to) = self.to {
            pairs.push(("to", to.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        }
        pairs
    }
}

fn parse_bound(name: &str, raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!(
                bound = name,
                value = raw,
                error = %e,
                "Ignoring unparseable summary bound"
            );
            None
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
