use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock};

/// Tunables read at the start of every booking operation
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BookingRules {
    #[serde(default = "default_hold_timeout_minutes")]
    pub hold_timeout_minutes: i64,
    #[serde(default = "default_room_break_time_minutes")]
    pub room_break_time_minutes: i64,
    #[serde(default = "default_advance_sale_days")]
    pub advance_sale_days: i64,
    #[serde(default = "default_redemption_grace_minutes")]
    pub redemption_grace_minutes: i64,
    #[serde(default = "default_terminal_retention_days")]
    pub terminal_retention_days: i64,
    #[serde(default = "default_max_seats_per_order")]
    pub max_seats_per_order: usize,
    #[serde(default = "default_availability_freshness_seconds")]
    pub availability_freshness_seconds: i64,
}

fn default_hold_timeout_minutes() -> i64 {
    15
}

fn default_room_break_time_minutes() -> i64 {
    20
}

fn default_advance_sale_days() -> i64 {
    4
}

fn default_redemption_grace_minutes() -> i64 {
    30
}

fn default_terminal_retention_days() -> i64 {
    30
}

fn default_max_seats_per_order() -> usize {
    8
}

fn default_availability_freshness_seconds() -> i64 {
    300
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            hold_timeout_minutes: default_hold_timeout_minutes(),
            room_break_time_minutes: default_room_break_time_minutes(),
            advance_sale_days: default_advance_sale_days(),
            redemption_grace_minutes: default_redemption_grace_minutes(),
            terminal_retention_days: default_terminal_retention_days(),
            max_seats_per_order: default_max_seats_per_order(),
            availability_freshness_seconds: default_availability_freshness_seconds(),
        }
    }
}

impl BookingRules {
    pub fn hold_timeout(&self) -> Duration {
        Duration::minutes(self.hold_timeout_minutes)
    }

    pub fn room_break(&self) -> Duration {
        Duration::minutes(self.room_break_time_minutes)
    }

    pub fn advance_sale_window(&self) -> Duration {
        Duration::days(self.advance_sale_days)
    }

    pub fn redemption_grace(&self) -> Duration {
        Duration::minutes(self.redemption_grace_minutes)
    }

    pub fn terminal_retention(&self) -> Duration {
        Duration::days(self.terminal_retention_days)
    }

    pub fn availability_freshness(&self) -> Duration {
        Duration::seconds(self.availability_freshness_seconds)
    }

    /// Apply one override row of the form `{"value": <number>}`.
    /// Unknown keys, non-numeric and negative values are ignored; returns whether anything changed.
    pub fn apply_override(&mut self, key: &str, value: &Value) -> bool {
        let Some(v) = value.get("value").and_then(Value::as_i64) else {
            return false;
        };
        if v < 0 {
            return false;
        }

        let slot = match key {
            "hold_timeout_minutes" | "holdTimeoutMinutes" => &mut self.hold_timeout_minutes,
            "room_break_time_minutes" | "roomBreakTimeMinutes" => &mut self.room_break_time_minutes,
            "advance_sale_days" | "advanceSaleDays" => &mut self.advance_sale_days,
            "redemption_grace_minutes" | "redemptionGraceMinutes" => {
                &mut self.redemption_grace_minutes
            }
            "terminal_retention_days" | "terminalRetentionDays" => {
                &mut self.terminal_retention_days
            }
            "availability_freshness_seconds" | "availabilityFreshnessSeconds" => {
                &mut self.availability_freshness_seconds
            }
            "max_seats_per_order" | "maxSeatsPerOrder" => {
                let changed = self.max_seats_per_order != v as usize;
                self.max_seats_per_order = v as usize;
                return changed;
            }
            _ => return false,
        };

        let changed = *slot != v;
        *slot = v;
        changed
    }
}

/// Shared, hot-swappable view of the current rules.
///
/// Readers take a copy at the start of an operation so a reload mid-request
/// never mixes two rule sets.
#[derive(Debug, Clone, Default)]
pub struct RulesHolder {
    inner: Arc<RwLock<BookingRules>>,
}

impl RulesHolder {
    pub fn new(rules: BookingRules) -> Self {
        Self {
            inner: Arc::new(RwLock::new(rules)),
        }
    }

    pub fn current(&self) -> BookingRules {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace(&self, rules: BookingRules) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = rules;
    }
}
