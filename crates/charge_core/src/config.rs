use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::PileClass;
use crate::rates::TieredRates;

/// Which waiting requests a dispatch pass moves, and how they are grouped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStrategy {
    /// Oldest ticket first, one request at a time.
    #[default]
    Default,
    SingleBatch,
    BulkBatch,
}

/// Represents a charging station configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    pub station_id: String,
    #[serde(default = "default_waiting_area_size")]
    pub waiting_area_size: usize,
    /// Per-pile queue capacity, charging slot included
    #[serde(default = "default_queue_len")]
    pub queue_len: usize,
    pub piles: Vec<PileConfig>,
    #[serde(default)]
    pub rates: TieredRates,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PileConfig {
    pub code: String,
    pub class: PileClass,
    /// Rated power in kWh per hour
    pub power: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSettings {
    #[serde(default)]
    pub strategy: DispatchStrategy,
    /// Total waiting population that triggers a bulk dispatch
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    /// Largest search space the batch strategies enumerate exhaustively
    #[serde(default = "default_enumeration_limit")]
    pub enumeration_limit: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            strategy: DispatchStrategy::Default,
            bulk_threshold: default_bulk_threshold(),
            enumeration_limit: default_enumeration_limit(),
        }
    }
}

fn default_waiting_area_size() -> usize {
    6
}

fn default_queue_len() -> usize {
    2
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_bulk_threshold() -> usize {
    6
}

fn default_enumeration_limit() -> usize {
    4096
}

/// Read-only snapshot of the knobs a dispatch pass needs.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub waiting_area_size: usize,
    pub queue_len: usize,
    pub strategy: DispatchStrategy,
    pub bulk_threshold: usize,
    pub enumeration_limit: usize,
}

impl DispatchConfig {
    pub fn with_strategy(&self, strategy: DispatchStrategy, bulk_threshold: Option<usize>) -> Self {
        DispatchConfig {
            strategy,
            bulk_threshold: bulk_threshold.unwrap_or(self.bulk_threshold),
            ..self.clone()
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            waiting_area_size: default_waiting_area_size(),
            queue_len: default_queue_len(),
            strategy: DispatchStrategy::Default,
            bulk_threshold: default_bulk_threshold(),
            enumeration_limit: default_enumeration_limit(),
        }
    }
}

impl StationConfig {
    /// Two fast piles at 30 kWh/h and three slow piles at 7 kWh/h.
    pub fn default_station() -> Self {
        let pile = |code: &str, class, power| PileConfig {
            code: code.to_string(),
            class,
            power,
        };
        StationConfig {
            station_id: "STATION".into(),
            waiting_area_size: default_waiting_area_size(),
            queue_len: default_queue_len(),
            piles: vec![
                pile("A", PileClass::Fast, 30.0),
                pile("B", PileClass::Fast, 30.0),
                pile("C", PileClass::Slow, 7.0),
                pile("D", PileClass::Slow, 7.0),
                pile("E", PileClass::Slow, 7.0),
            ],
            rates: TieredRates::default(),
            dispatch: DispatchSettings::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            waiting_area_size: self.waiting_area_size,
            queue_len: self.queue_len,
            strategy: self.dispatch.strategy,
            bulk_threshold: self.dispatch.bulk_threshold,
            enumeration_limit: self.dispatch.enumeration_limit,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waiting_area_size == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "waitingAreaSize",
            });
        }
        if self.queue_len == 0 {
            return Err(ConfigError::ZeroCapacity { field: "queueLen" });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroCapacity {
                field: "sweepIntervalSecs",
            });
        }
        let mut codes = HashSet::new();
        for pile in &self.piles {
            if !codes.insert(pile.code.as_str()) {
                return Err(ConfigError::DuplicatePile {
                    code: pile.code.clone(),
                });
            }
            if pile.power.is_nan() || pile.power <= 0.0 {
                return Err(ConfigError::InvalidPower {
                    code: pile.code.clone(),
                    power: pile.power,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_deserialization() {
        let json = r#"
        {
          "stationId": "NORTH_GATE",
          "waitingAreaSize": 8,
          "queueLen": 3,
          "piles": [
            {"code": "A", "class": "FAST", "power": 30},
            {"code": "C", "class": "SLOW", "power": 7}
          ],
          "dispatch": {"strategy": "bulk_batch", "bulkThreshold": 4}
        }
        "#;

        let config: StationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.station_id, "NORTH_GATE");
        assert_eq!(config.waiting_area_size, 8);
        assert_eq!(config.queue_len, 3);
        assert_eq!(config.piles.len(), 2);
        assert_eq!(config.piles[1].class, PileClass::Slow);
        assert_eq!(config.dispatch.strategy, DispatchStrategy::BulkBatch);
        assert_eq!(config.dispatch.bulk_threshold, 4);
        assert_eq!(config.dispatch.enumeration_limit, 4096);
        assert_eq!(config.sweep_interval_secs, 10);
        assert_eq!(config.rates, TieredRates::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_station_config_serialization() {
        let config = StationConfig::default_station();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: StationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.station_id, deserialized.station_id);
        assert_eq!(config.piles.len(), deserialized.piles.len());
        assert_eq!(config.rates, deserialized.rates);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_power() {
        let mut config = StationConfig::default_station();
        config.piles[1].code = "A".into();
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicatePile { code: "A".into() })
        );

        let mut config = StationConfig::default_station();
        config.piles[0].power = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPower { .. })
        ));

        let mut config = StationConfig::default_station();
        config.queue_len = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity { field: "queueLen" })
        );

        let mut config = StationConfig::default_station();
        config.sweep_interval_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCapacity {
                field: "sweepIntervalSecs"
            })
        );
    }

    #[test]
    fn test_with_strategy_keeps_capacities() {
        let base = StationConfig::default_station().dispatch_config();
        let swapped = base.with_strategy(DispatchStrategy::SingleBatch, None);
        assert_eq!(swapped.strategy, DispatchStrategy::SingleBatch);
        assert_eq!(swapped.queue_len, base.queue_len);
        assert_eq!(swapped.bulk_threshold, base.bulk_threshold);
    }
}
