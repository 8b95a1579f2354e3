// src/engine.rs
use std::collections::VecDeque;
use std::io::Write;

use crate::config::PipelineConfig;
use crate::drivers::{ActuatorPort, EnvelopeDetector, FilterBank, PipelineError};
use crate::types::*;

/// 消费端: 每 `downsampling` 个快照处理一次，滤波、裁边、包络、降采样，
/// 再按阈值规则得到触发电平，电平变化时给执行器发一个字节。
pub struct TriggerEngine<W: Write> {
    filters: FilterBank,
    envelope: EnvelopeDetector,
    actuator: ActuatorPort<W>,
    downsampling: usize,
    edge_samples: usize,
    threshold: f64,
    trigger_channel: usize,
    sample_rate_hz: f64,
    // 自上次处理以来收到的快照数
    deliveries: usize,
    level: bool,
    x_axis: VecDeque<f64>,
    cycles: u64,
}

impl<W: Write> TriggerEngine<W> {
    pub fn new(config: &PipelineConfig, filters: FilterBank, actuator: ActuatorPort<W>) -> Self {
        let stride = config.downsampling.max(1);
        let trace_len = config.trace_len();
        // x 轴初始为 [-L, ..., -s] / fs
        let x_axis = (0..trace_len)
            .map(|i| -(((trace_len - i) * stride) as f64) / config.sample_rate_hz)
            .collect();
        Self {
            filters,
            envelope: EnvelopeDetector::new(config.envelope),
            actuator,
            downsampling: stride,
            edge_samples: config.edge_samples,
            threshold: config.threshold(),
            trigger_channel: config.trigger_channel,
            sample_rate_hz: config.sample_rate_hz,
            deliveries: 0,
            level: false,
            x_axis,
            cycles: 0,
        }
    }

    /// Designs the filters described by `config` and wires them to `actuator`.
    #[cfg(test)]
    pub fn from_config(config: &PipelineConfig, actuator: ActuatorPort<W>) -> Result<Self, PipelineError> {
        let filters = config.filter_bank()?;
        Ok(Self::new(config, filters, actuator))
    }

    #[cfg(test)]
    pub fn level(&self) -> bool {
        self.level
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn actuator(&self) -> &ActuatorPort<W> {
        &self.actuator
    }

    pub fn close(&mut self) -> Result<(), PipelineError> {
        self.actuator.close()
    }

    /// Handles one delivered snapshot. Returns a frame only on the deliveries
    /// that were actually processed.
    pub fn on_snapshot(&mut self, snapshot: &Snapshot) -> Result<Option<TraceFrame>, PipelineError> {
        self.deliveries += 1;
        if self.deliveries < self.downsampling {
            return Ok(None);
        }
        self.deliveries = 0;

        if self.trigger_channel >= snapshot.num_channels() {
            return Err(PipelineError::ChannelMismatch {
                expected: self.trigger_channel + 1,
                actual: snapshot.num_channels(),
            });
        }

        // 1. 滤波 (工频陷波 + 去基线)
        let filtered = self.filters.process(&snapshot.samples);

        // 2. 去掉开头的边缘瞬态
        let trimmed: Vec<f64> = filtered
            .row(self.trigger_channel)
            .iter()
            .skip(self.edge_samples)
            .copied()
            .collect();

        // 3. 包络 + 4. 降采样
        let envelope = self.envelope.apply(&trimmed);
        let trace = downsample(&envelope, self.downsampling);

        // 5. 阈值判断
        let level = decide_trigger(&trace, self.threshold);

        // 6. 电平变化才发命令
        if level != self.level {
            let command = TriggerCommand::for_level(level);
            self.actuator.send(command)?;
            self.level = level;
            log::info!(
                "trigger {} at {:.1} ms",
                if level { "rising" } else { "falling" },
                snapshot.timestamp_ms
            );
        }

        self.cycles += 1;
        self.advance_x_axis();
        Ok(Some(TraceFrame {
            x: self.x_axis.iter().copied().collect(),
            threshold: vec![self.threshold; trace.len()],
            y: trace,
            trigger: level,
            timestamp_ms: snapshot.timestamp_ms,
        }))
    }

    fn advance_x_axis(&mut self) {
        let step = self.downsampling as f64 / self.sample_rate_hz;
        if let Some(&last) = self.x_axis.back() {
            self.x_axis.pop_front();
            self.x_axis.push_back(last + step);
        }
    }
}

/// Every `stride`-th sample, starting at index 0.
pub fn downsample(signal: &[f64], stride: usize) -> Vec<f64> {
    signal.iter().step_by(stride.max(1)).copied().collect()
}

/// 只看最后一个高于/低于阈值的位置谁更靠后:
/// 没有低于 T 的点 -> true；没有高于 T 的点，或最后的高点早于最后的低点 -> false；否则 true。
pub fn decide_trigger(signal: &[f64], threshold: f64) -> bool {
    let last_above = signal.iter().rposition(|&v| v >= threshold);
    let last_below = signal.iter().rposition(|&v| v < threshold);
    match (last_above, last_below) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(above), Some(below)) => above > below,
    }
}
