// src/config.rs
//
// YAML loading and range validation. Validation failures are typed
// (ConfigError) so callers can tell which value was rejected.

use crate::analysis::flow::{MAX_BLOCK_SIZE, MAX_SEARCH_RANGE};
use crate::error::ConfigError;
use crate::types::{Config, CounterConfig, EngineConfig};
use anyhow::{Context, Result};
use std::fs;

const MAX_MOTION_THRESHOLD: f32 = 10.0;
const MAX_DEBOUNCE_MS: u64 = 60_000;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        config.counter.validate()?;
        config.engine.validate()?;
        Ok(config)
    }
}

impl CounterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.motion_threshold.is_finite()
            || self.motion_threshold < 0.0
            || self.motion_threshold > MAX_MOTION_THRESHOLD
        {
            return Err(ConfigError::MotionThreshold {
                value: self.motion_threshold,
                max: MAX_MOTION_THRESHOLD,
            });
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ConfidenceThreshold(self.confidence_threshold));
        }
        if self.debounce_interval_ms == 0 || self.debounce_interval_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::DebounceInterval {
                value_ms: self.debounce_interval_ms,
                max_ms: MAX_DEBOUNCE_MS,
            });
        }
        if !self.region_of_interest.is_valid() {
            return Err(ConfigError::RegionOfInterest(self.region_of_interest));
        }
        if !self.calibration_constant.is_finite() || self.calibration_constant <= 0.0 {
            return Err(ConfigError::CalibrationConstant(self.calibration_constant));
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity < 2 {
            return Err(ConfigError::WindowCapacity(self.window_capacity));
        }
        if !self.color_roi.is_valid() {
            return Err(ConfigError::RegionOfInterest(self.color_roi));
        }

        let flow = &self.flow;
        if flow.search_range == 0 || flow.search_range > MAX_SEARCH_RANGE {
            return Err(ConfigError::SearchRange {
                value: flow.search_range,
                max: MAX_SEARCH_RANGE,
            });
        }
        if flow.block_size < 2 || flow.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::BlockSize {
                value: flow.block_size,
                max: MAX_BLOCK_SIZE,
            });
        }
        if flow.analysis_width < flow.block_size {
            return Err(ConfigError::AnalysisWidth {
                value: flow.analysis_width,
                block_size: flow.block_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::flow::FlowOptions;
    use crate::types::{Handedness, NormalizedRect};

    #[test]
    fn test_default_config_is_valid() {
        assert!(CounterConfig::default().validate().is_ok());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let cfg = CounterConfig {
            confidence_threshold: 1.2,
            ..CounterConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ConfidenceThreshold(1.2)));

        let cfg = CounterConfig {
            motion_threshold: -0.1,
            ..CounterConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::MotionThreshold { .. })));

        let cfg = CounterConfig {
            debounce_interval_ms: 0,
            ..CounterConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::DebounceInterval { .. })));

        let cfg = CounterConfig {
            region_of_interest: NormalizedRect::new(0.8, 0.0, 0.5, 0.5),
            ..CounterConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::RegionOfInterest(_))));

        let cfg = CounterConfig {
            calibration_constant: 0.0,
            ..CounterConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::CalibrationConstant(0.0)));
    }

    #[test]
    fn test_window_capacity_minimum() {
        let cfg = EngineConfig {
            window_capacity: 1,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::WindowCapacity(1)));
    }

    #[test]
    fn test_rejects_flow_options_out_of_range() {
        let with_flow = |flow: FlowOptions| EngineConfig {
            flow,
            ..EngineConfig::default()
        };

        let cfg = with_flow(FlowOptions {
            search_range: u32::MAX,
            ..FlowOptions::default()
        });
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::SearchRange {
                value: u32::MAX,
                max: MAX_SEARCH_RANGE
            })
        );

        let cfg = with_flow(FlowOptions {
            search_range: 0,
            ..FlowOptions::default()
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::SearchRange { .. })));

        let cfg = with_flow(FlowOptions {
            block_size: 1,
            ..FlowOptions::default()
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::BlockSize { .. })));

        let cfg = with_flow(FlowOptions {
            analysis_width: 0,
            ..FlowOptions::default()
        });
        assert!(matches!(cfg.validate(), Err(ConfigError::AnalysisWidth { .. })));
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.yaml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.counter, CounterConfig::default());
        assert_eq!(config.engine.inbox_capacity, 4);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let path = std::env::temp_dir().join(format!("stitch_counter_bad_{}.yaml", std::process::id()));
        fs::write(&path, "counter:\n  confidence_threshold: 3.0\n").unwrap();
        let err = Config::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("confidence threshold"), "{}", err);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_parse_partial_yaml_uses_defaults() {
        let yaml = r#"
counter:
  motion_threshold: 0.2
  handedness: left
  debounce_interval_ms: 3000
engine:
  window_capacity: 20
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.counter.handedness, Handedness::Left);
        assert_eq!(config.counter.debounce_interval_ms, 3000);
        assert!((config.counter.confidence_threshold - 0.7).abs() < 1e-6);
        assert_eq!(config.engine.window_capacity, 20);
        assert_eq!(config.engine.flow.analysis_width, 160);
        assert_eq!(config.replay.fps, 30.0);
    }
}
