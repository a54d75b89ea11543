use chrono::{DateTime, Days, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Outcome of a quota reservation. Running out of quota is a normal result,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    Allowed,
    Denied { used: u64, limit: u64, requested: u64 },
}

impl Reservation {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Reservation::Allowed)
    }
}

/// Daily reset boundary: local midnight in `tz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSchedule {
    pub tz: Tz,
}

impl Default for ResetSchedule {
    fn default() -> Self {
        Self { tz: chrono_tz::UTC }
    }
}

impl ResetSchedule {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// First local midnight strictly after `now`.
    pub fn next_boundary_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local = now.with_timezone(&self.tz);
        let Some(next_day) = local.date_naive().checked_add_days(Days::new(1)) else {
            return now + Duration::days(1);
        };
        let midnight = next_day.and_time(chrono::NaiveTime::MIN);

        // Midnight can fall in a DST gap in a handful of zones; step forward an hour.
        let resolved = self
            .tz
            .from_local_datetime(&midnight)
            .earliest()
            .or_else(|| {
                self.tz
                    .from_local_datetime(&(midnight + Duration::hours(1)))
                    .earliest()
            });

        match resolved {
            Some(at) => at.with_timezone(&Utc),
            None => now + Duration::days(1),
        }
    }
}

/// Units consumed against a provider quota in the current period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLedger {
    #[serde(rename = "quotaUsed")]
    used: u64,
    #[serde(rename = "quotaLimit")]
    limit: u64,
    #[serde(rename = "resetAt")]
    reset_at: DateTime<Utc>,
    #[serde(skip)]
    schedule: ResetSchedule,
}

impl QuotaLedger {
    pub fn new(limit: u64, now: DateTime<Utc>, schedule: ResetSchedule) -> Self {
        Self {
            used: 0,
            limit,
            reset_at: schedule.next_boundary_after(now),
            schedule,
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.reset_at
    }

    pub fn set_schedule(&mut self, schedule: ResetSchedule) {
        self.schedule = schedule;
    }

    /// Applies a (possibly changed) configured limit. Usage above a lowered
    /// limit is clamped so `used <= limit` keeps holding.
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = limit;
        if self.used > limit {
            self.used = limit;
        }
    }

    /// Marks the period as spent when the provider reports its budget gone
    /// before the local count reached the limit.
    pub fn exhaust(&mut self) {
        self.used = self.limit;
    }

    pub fn reserve(&mut self, cost: u64) -> Reservation {
        match self.used.checked_add(cost) {
            Some(total) if total <= self.limit => {
                self.used = total;
                Reservation::Allowed
            }
            _ => Reservation::Denied {
                used: self.used,
                limit: self.limit,
                requested: cost,
            },
        }
    }

    /// Returns true when a reset happened.
    pub fn reset_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.reset_at {
            return false;
        }
        self.used = 0;
        self.reset_at = self.schedule.next_boundary_after(now);
        true
    }
}
