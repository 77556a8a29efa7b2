//! Time-of-day tiered pricing.
//!
//! A charge is billed piecewise: the session window is cut at every rate
//! boundary it crosses and each piece pays its window's price for the share
//! of energy delivered during it. Energy is assumed to flow at a constant
//! rate over the session.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::elapsed_hours;

/// Price used when no window covers an instant.
pub const DEFAULT_PRICE: f64 = 0.7;
pub const DEFAULT_SERVICE_RATE: f64 = 0.8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RateError {
    #[error("No rate window covers {at}")]
    ConfigurationMissing { at: NaiveTime },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateKind {
    Peak,
    Normal,
    Valley,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateWindow {
    pub kind: RateKind,
    pub start: NaiveTime,
    /// Exclusive. A window whose end is before its start wraps past midnight.
    pub end: NaiveTime,
    pub price: f64,
}

impl RateWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= time && time < self.end
        } else if self.start > self.end {
            time >= self.start || time < self.end
        } else {
            true
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub energy_fee: f64,
    pub service_fee: f64,
    pub total_fee: f64,
}

/// Collaborator contract the lifecycle uses to price energy.
pub trait RateLookup: Send + Sync {
    fn price_at(&self, at: NaiveDateTime) -> f64;

    fn cost_of(&self, start: NaiveDateTime, end: NaiveDateTime, energy: f64) -> Fee;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TieredRates {
    pub windows: Vec<RateWindow>,
    pub service_rate: f64,
    #[serde(default = "default_price")]
    pub default_price: f64,
}

fn default_price() -> f64 {
    DEFAULT_PRICE
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for TieredRates {
    fn default() -> Self {
        let window = |kind, start, end, price| RateWindow {
            kind,
            start: hm(start, 0),
            end: hm(end, 0),
            price,
        };
        TieredRates {
            windows: vec![
                window(RateKind::Valley, 0, 7, 0.4),
                window(RateKind::Normal, 7, 10, 0.7),
                window(RateKind::Peak, 10, 15, 1.0),
                window(RateKind::Normal, 15, 18, 0.7),
                window(RateKind::Peak, 18, 21, 1.0),
                window(RateKind::Normal, 21, 23, 0.7),
                window(RateKind::Valley, 23, 0, 0.4),
            ],
            service_rate: DEFAULT_SERVICE_RATE,
            default_price: DEFAULT_PRICE,
        }
    }
}

impl TieredRates {
    /// Strict lookup of the window covering `time`.
    pub fn window_at(&self, time: NaiveTime) -> Result<&RateWindow, RateError> {
        self.windows
            .iter()
            .find(|w| w.contains(time))
            .ok_or(RateError::ConfigurationMissing { at: time })
    }

    /// First window boundary strictly after `after`, if any window is configured.
    fn next_boundary(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        self.windows
            .iter()
            .flat_map(|w| [w.start, w.end])
            .map(|time| {
                let candidate = after.date().and_time(time);
                if candidate <= after {
                    candidate + Duration::days(1)
                } else {
                    candidate
                }
            })
            .min()
    }
}

impl RateLookup for TieredRates {
    fn price_at(&self, at: NaiveDateTime) -> f64 {
        match self.window_at(at.time()) {
            Ok(window) => window.price,
            Err(error) => {
                tracing::warn!("{}, falling back to price {}", error, self.default_price);
                self.default_price
            }
        }
    }

    fn cost_of(&self, start: NaiveDateTime, end: NaiveDateTime, energy: f64) -> Fee {
        let energy = energy.max(0.0);
        let total_hours = elapsed_hours(start, end);

        let energy_fee = if total_hours <= 0.0 {
            energy * self.price_at(start)
        } else {
            let mut fee = 0.0;
            let mut cursor = start;
            while cursor < end {
                let piece_end = self
                    .next_boundary(cursor)
                    .map_or(end, |boundary| boundary.min(end));
                let share = elapsed_hours(cursor, piece_end) / total_hours;
                fee += energy * share * self.price_at(cursor);
                cursor = piece_end;
            }
            fee
        };
        let service_fee = energy * self.service_rate;

        Fee {
            energy_fee,
            service_fee,
            total_fee: energy_fee + service_fee,
        }
    }
}
