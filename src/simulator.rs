// src/simulator.rs
// 没有硬件时用来喂数据: 按采样率往 UDP 地址发 JSON 样本
use std::f64::consts::PI;
use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::Receiver;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use crate::config::PipelineConfig;

// 每 4 秒来一次 1 秒长的 10 Hz 爆发
const BURST_PERIOD_S: f64 = 4.0;
const BURST_LENGTH_S: f64 = 1.0;
const BURST_FREQ_HZ: f64 = 10.0;
const BURST_AMPLITUDE: f64 = 400.0;
const DRIFT_AMPLITUDE: f64 = 30.0;
const LINE_NOISE_AMPLITUDE: f64 = 20.0;
const WHITE_NOISE_AMPLITUDE: f64 = 15.0;

/// Synthetic multi-channel source: baseline drift, 50 Hz mains hum, white
/// noise, and periodic bursts on channel 0.
pub struct SignalGenerator {
    sample_rate_hz: f64,
    channels: usize,
    index: u64,
    rng: StdRng,
}

impl SignalGenerator {
    pub fn new(sample_rate_hz: f64, channels: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            sample_rate_hz,
            channels,
            index: 0,
            rng,
        }
    }

    pub fn in_burst(&self, time_s: f64) -> bool {
        time_s % BURST_PERIOD_S >= BURST_PERIOD_S - BURST_LENGTH_S
    }

    pub fn next_sample(&mut self) -> Vec<f64> {
        let t = self.index as f64 / self.sample_rate_hz;
        self.index += 1;
        let burst = if self.in_burst(t) {
            BURST_AMPLITUDE * (2.0 * PI * BURST_FREQ_HZ * t).sin()
        } else {
            0.0
        };
        (0..self.channels)
            .map(|channel| {
                let drift = DRIFT_AMPLITUDE * (2.0 * PI * 0.1 * t + channel as f64).sin();
                let hum = LINE_NOISE_AMPLITUDE * (2.0 * PI * 50.0 * t).sin();
                let noise = self.rng.gen_range(-WHITE_NOISE_AMPLITUDE..WHITE_NOISE_AMPLITUDE);
                let value = drift + hum + noise;
                if channel == 0 {
                    value + burst
                } else {
                    value
                }
            })
            .collect()
    }
}

/// One datagram: a JSON object keyed by channel name.
pub fn encode_sample(keys: &[String], sample: &[f64]) -> Vec<u8> {
    let record: Map<String, Value> = keys
        .iter()
        .zip(sample)
        .map(|(key, &v)| (key.clone(), Value::from(v)))
        .collect();
    Value::Object(record).to_string().into_bytes()
}

/// Streams generated samples to `target` at the configured rate until
/// `duration` elapses or `stop` fires. Returns the number of datagrams sent.
pub fn run_simulator(
    config: &PipelineConfig,
    target: &str,
    duration: Option<Duration>,
    stop: Option<Receiver<()>>,
) -> Result<u64> {
    config.validate().context("invalid configuration")?;
    let socket = UdpSocket::bind("127.0.0.1:0").context("failed to bind simulator socket")?;
    socket
        .connect(target)
        .with_context(|| format!("cannot reach {target}"))?;
    // 采样率极小时周期会溢出 Duration
    let period = Duration::try_from_secs_f64(1.0 / config.sample_rate_hz)
        .with_context(|| format!("sample rate {} Hz has no usable period", config.sample_rate_hz))?;
    println!("simulating {} Hz stream to {target}", config.sample_rate_hz);

    let mut generator = SignalGenerator::new(config.sample_rate_hz, config.channel_count(), None);
    let started = Instant::now();
    let mut sent: u64 = 0;
    loop {
        if duration.map_or(false, |d| started.elapsed() >= d) {
            break;
        }
        if stop.as_ref().map_or(false, |rx| rx.try_recv().is_ok()) {
            break;
        }
        let payload = encode_sample(&config.channel_keys, &generator.next_sample());
        // 接收端没起来时 send 可能报 ConnectionRefused，继续发
        if let Err(e) = socket.send(&payload) {
            log::debug!("datagram {sent} not delivered: {e}");
        }
        sent += 1;
        // 按绝对时刻补偿，避免累积漂移
        let due = started + period.mul_f64(sent as f64);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    println!("simulator stopped after {sent} datagrams");
    Ok(sent)
}
