// src/config.rs
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::drivers::{EnvelopeMode, FilterBank, FilterSpec, PipelineError, SerialConfig};

/// Every tunable of the pipeline. Built once at startup and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub bind_address: String,
    pub sample_rate_hz: f64,
    /// JSON keys of the datagram record, one per channel, in channel order.
    pub channel_keys: Vec<String>,
    pub window_seconds: f64,
    pub warmup_datagrams: usize,
    /// Leading samples of each filtered window that are thrown away.
    pub edge_samples: usize,
    /// Decimation factor: the engine acts on every n-th snapshot and keeps
    /// every n-th sample.
    pub downsampling: usize,
    pub line_noise_filter: Option<FilterSpec>,
    pub baseline_filter: Option<FilterSpec>,
    /// Symmetric display range; the upper bound is the trigger threshold.
    pub threshold_range: [f64; 2],
    pub envelope: EnvelopeMode,
    pub trigger_channel: usize,
    pub channel_capacity: usize,
    pub recv_timeout_ms: u64,
    pub shutdown_grace_ms: u64,
    pub max_datagram_bytes: usize,
    pub serial: SerialConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Neuri 上位机默认推流地址
            bind_address: "127.0.0.1:12344".to_owned(),
            sample_rate_hz: 200.0,
            channel_keys: vec!["c1".to_owned(), "c2".to_owned()],
            window_seconds: 5.0,
            warmup_datagrams: 500,
            edge_samples: 4,
            downsampling: 5,
            line_noise_filter: Some(FilterSpec::Bandstop {
                order: 3,
                low_hz: 46.0,
                high_hz: 54.0,
            }),
            baseline_filter: Some(FilterSpec::Highpass {
                order: 3,
                cutoff_hz: 0.4,
            }),
            threshold_range: [-200.0, 200.0],
            envelope: EnvelopeMode::Rectify,
            trigger_channel: 0,
            channel_capacity: 64,
            recv_timeout_ms: 200,
            shutdown_grace_ms: 2000,
            max_datagram_bytes: 1024,
            serial: SerialConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads a JSON file; missing fields fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn channel_count(&self) -> usize {
        self.channel_keys.len()
    }

    /// Samples per channel held in the sliding window.
    pub fn window_len(&self) -> usize {
        (self.sample_rate_hz * self.window_seconds).round() as usize
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_range[1]
    }

    /// Length of the trimmed, downsampled trace.
    pub fn trace_len(&self) -> usize {
        let trimmed = self.window_len().saturating_sub(self.edge_samples);
        let stride = self.downsampling.max(1);
        (trimmed + stride - 1) / stride
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn filter_bank(&self) -> Result<FilterBank, PipelineError> {
        FilterBank::from_specs(
            self.line_noise_filter,
            self.baseline_filter,
            self.sample_rate_hz,
            self.window_len(),
        )
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(PipelineError::InvalidSampleRate);
        }
        if self.channel_keys.is_empty() {
            return invalid("at least one channel key is required".into());
        }
        let unique: HashSet<&String> = self.channel_keys.iter().collect();
        if unique.len() != self.channel_keys.len() {
            return invalid(format!("duplicate channel keys in {:?}", self.channel_keys));
        }
        if !(self.window_seconds.is_finite() && self.window_seconds > 0.0) {
            return invalid(format!("window_seconds must be positive, got {}", self.window_seconds));
        }
        if self.downsampling == 0 {
            return invalid("downsampling factor must be at least 1".into());
        }
        if self.edge_samples >= self.window_len() {
            return invalid(format!(
                "edge_samples ({}) must be shorter than the window ({} samples)",
                self.edge_samples,
                self.window_len()
            ));
        }
        let [low, high] = self.threshold_range;
        if !(low.is_finite() && high.is_finite() && low <= high) {
            return invalid(format!("threshold range {:?} is not ordered", self.threshold_range));
        }
        if self.trigger_channel >= self.channel_count() {
            return invalid(format!(
                "trigger channel {} out of range for {} channels",
                self.trigger_channel,
                self.channel_count()
            ));
        }
        if self.channel_capacity == 0 || self.max_datagram_bytes == 0 || self.recv_timeout_ms == 0 {
            return invalid(
                "channel_capacity, max_datagram_bytes and recv_timeout_ms must be non-zero".into(),
            );
        }
        self.serial.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_reproduce_workshop_setup() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window_len(), 1000);
        assert_eq!(config.channel_count(), 2);
        assert_eq!(config.threshold(), 200.0);
        assert_eq!(config.trace_len(), 200);
        assert_eq!(config.serial.baud_rate, 115_200);
        let bank = config.filter_bank().unwrap();
        assert_eq!(bank.baseline().unwrap().pad_len(), 99);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "threshold_range": [-350.0, 350.0],
                "baseline_filter": null,
                "envelope": "hilbert",
                "serial": {{ "port": "/dev/ttyACM0" }}
            }}"#
        )
        .unwrap();
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.threshold(), 350.0);
        assert_eq!(config.baseline_filter, None);
        assert_eq!(config.envelope, EnvelopeMode::Hilbert);
        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.rising, 'H');
        assert_eq!(config.line_noise_filter, PipelineConfig::default().line_noise_filter);
        assert_eq!(config.sample_rate_hz, 200.0);
    }

    #[test]
    fn filter_specs_use_family_tag() {
        let spec: FilterSpec =
            serde_json::from_str(r#"{"family": "bandpass", "order": 2, "low_hz": 8, "high_hz": 12}"#)
                .unwrap();
        assert_eq!(
            spec,
            FilterSpec::Bandpass {
                order: 2,
                low_hz: 8.0,
                high_hz: 12.0
            }
        );
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let missing = PipelineConfig::load(Path::new("/definitely/not/here.json"));
        assert!(missing.is_err());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(PipelineConfig::load(file.path()).is_err());
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let base = PipelineConfig::default();
        let cases = [
            PipelineConfig {
                sample_rate_hz: 0.0,
                ..base.clone()
            },
            PipelineConfig {
                channel_keys: vec![],
                ..base.clone()
            },
            PipelineConfig {
                channel_keys: vec!["c1".into(), "c1".into()],
                ..base.clone()
            },
            PipelineConfig {
                downsampling: 0,
                ..base.clone()
            },
            PipelineConfig {
                edge_samples: 1000,
                ..base.clone()
            },
            PipelineConfig {
                threshold_range: [10.0, -10.0],
                ..base.clone()
            },
            PipelineConfig {
                trigger_channel: 2,
                ..base.clone()
            },
            PipelineConfig {
                recv_timeout_ms: 0,
                ..base.clone()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn bad_filter_band_is_fatal_at_startup() {
        let config = PipelineConfig {
            line_noise_filter: Some(FilterSpec::Bandstop {
                order: 3,
                low_hz: 46.0,
                high_hz: 140.0,
            }),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.filter_bank(),
            Err(PipelineError::FilterDesign(_))
        ));
    }
}
