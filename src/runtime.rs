// src/runtime.rs
use std::any::Any;
use std::io::{self, BufRead, Write};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::config::PipelineConfig;
use crate::drivers::{
    snapshot_channel, ActuatorPort, DatagramSource, PipelineError, ReceiverStats, Shutdown,
    SlidingBuffer, StreamReceiver, UdpSource,
};
use crate::engine::TriggerEngine;
use crate::types::TraceFrame;

type AcquisitionHandle = JoinHandle<Result<ReceiverStats, PipelineError>>;

// 采集线程退出时轮询的间隔
const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
pub struct RunOptions {
    /// Stop after this long. Runs until stopped otherwise.
    pub duration: Option<Duration>,
    /// Fires when the operator asks to stop.
    pub stop: Option<Receiver<()>>,
    /// Optional visualisation consumer; frames are dropped when it is full.
    pub viewer: Option<Sender<TraceFrame>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Operator,
    Duration,
    /// The datagram source ran dry (playback sources only).
    SourceEnded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub cycles: u64,
    pub commands_sent: u64,
    /// `None` when the acquisition worker had to be detached.
    pub receiver: Option<ReceiverStats>,
}

/// Starts the full pipeline: UDP socket in, serial actuator out.
/// Any startup failure aborts before a worker is spawned.
pub fn run(config: &PipelineConfig, options: RunOptions) -> Result<RunSummary> {
    config.validate().context("invalid configuration")?;
    let filters = config.filter_bank().context("filter design failed")?;
    let source = UdpSource::bind(&config.bind_address, config.recv_timeout())
        .context("cannot start acquisition")?;
    println!("starting: listening on {}", source.local_addr());
    let actuator = ActuatorPort::open_serial(&config.serial).context("cannot open actuator")?;
    let engine = TriggerEngine::new(config, filters, actuator);
    run_pipeline(config, source, engine, options)
}

/// Runs acquisition on a worker thread and the trigger engine on the calling
/// thread until a stop request, the duration, or a fatal error. The shutdown
/// sequence runs on every exit path.
pub fn run_pipeline<S, W>(
    config: &PipelineConfig,
    source: S,
    mut engine: TriggerEngine<W>,
    mut options: RunOptions,
) -> Result<RunSummary>
where
    S: DatagramSource + Send + 'static,
    W: Write,
{
    let buffer = SlidingBuffer::new(config.channel_count(), config.window_len())?;
    let mut receiver = StreamReceiver::new(
        buffer,
        config.channel_keys.clone(),
        config.warmup_datagrams,
        config.max_datagram_bytes,
    )?;
    let (mut publisher, subscriber) = snapshot_channel(config.channel_capacity);
    let mut shutdown = Shutdown::new();
    let token = shutdown.token();

    // 1. 采集线程 (拥有 socket 和缓冲区)
    let handle = thread::Builder::new()
        .name("acquisition".to_owned())
        .spawn(move || {
            let mut source = source;
            receiver.run(&mut source, &mut publisher, &token)
        })
        .context("failed to spawn acquisition worker")?;

    // 2. 消费循环
    let deadline = match options.duration {
        Some(d) => channel::after(d),
        None => channel::never(),
    };
    let stop = options.stop.take().unwrap_or_else(channel::never);
    let outcome: Result<StopReason, PipelineError> = loop {
        crossbeam::select! {
            recv(subscriber.receiver()) -> msg => match msg {
                Ok(snapshot) => match engine.on_snapshot(&snapshot) {
                    Ok(Some(frame)) => deliver_frame(&mut options.viewer, frame),
                    Ok(None) => {}
                    Err(e) => break Err(e),
                },
                // 发送端已释放: 采集线程已经退出
                Err(_) => break Ok(StopReason::SourceEnded),
            },
            recv(stop) -> _ => break Ok(StopReason::Operator),
            recv(deadline) -> _ => break Ok(StopReason::Duration),
        }
    };
    match &outcome {
        Ok(reason) => log::info!("consumer loop ended: {reason:?}"),
        Err(e) => log::error!("consumer loop failed: {e}"),
    }

    // 3. 关闭流程
    println!("closing: stopping acquisition, releasing socket and channel, closing serial port");
    let acquisition = stop_acquisition(handle, &mut shutdown, config.shutdown_grace());
    let backlog = subscriber.backlog();
    if backlog > 0 {
        log::info!("{backlog} queued snapshots left unprocessed");
    }
    drop(subscriber);
    let closed = engine.close();

    let reason = outcome?;
    let receiver = acquisition?;
    closed?;
    println!(
        "stopped after {} cycles, {} actuator commands",
        engine.cycles(),
        engine.actuator().sent()
    );
    Ok(RunSummary {
        reason,
        cycles: engine.cycles(),
        commands_sent: engine.actuator().sent(),
        receiver,
    })
}

fn deliver_frame(viewer: &mut Option<Sender<TraceFrame>>, frame: TraceFrame) {
    let Some(tx) = viewer else {
        log::debug!(
            "frame t={:.1}ms trigger={} peak={:.2}",
            frame.timestamp_ms,
            frame.trigger,
            frame.y.iter().copied().fold(0.0, f64::max)
        );
        return;
    };
    match tx.try_send(frame) {
        Ok(()) | Err(TrySendError::Full(_)) => {}
        Err(TrySendError::Disconnected(_)) => {
            log::warn!("viewer went away; trace frames are no longer published");
            *viewer = None;
        }
    }
}

/// Signals the worker and waits up to `grace` for it. A worker that does not
/// stop in time is detached and `Ok(None)` returned.
fn stop_acquisition(
    handle: AcquisitionHandle,
    shutdown: &mut Shutdown,
    grace: Duration,
) -> Result<Option<ReceiverStats>, PipelineError> {
    shutdown.trigger();
    let deadline = Instant::now() + grace;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(JOIN_POLL);
    }
    if !handle.is_finished() {
        log::warn!("acquisition worker did not stop within {grace:?}; detaching it");
        return Ok(None);
    }
    match handle.join() {
        Ok(Ok(stats)) => {
            log::info!("acquisition worker joined, socket released");
            Ok(Some(stats))
        }
        Ok(Err(e)) => Err(PipelineError::AcquisitionExited(e.to_string())),
        Err(panic) => Err(PipelineError::AcquisitionExited(format!(
            "worker panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Sends on `tx` each time the operator presses Enter. EOF on stdin only ends
/// the watcher, so the caller must keep its own clone of `tx` alive.
pub fn watch_stdin(tx: Sender<()>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-watcher".to_owned())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => {
                        log::debug!("stdin closed; Enter-to-stop disabled");
                        return;
                    }
                    Ok(_) => {
                        if tx.send(()).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::warn!("stdin read failed: {e}");
                        return;
                    }
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::actuator::tests::BrokenPipe;
    use crate::drivers::source::ManualSource;
    use crate::drivers::{RecvOutcome, SerialConfig};

    /// Never yields data; each poll just waits a little, like a read timeout.
    struct IdleSource;
    impl DatagramSource for IdleSource {
        fn recv_datagram(&mut self, _buf: &mut [u8]) -> Result<RecvOutcome, PipelineError> {
            thread::sleep(Duration::from_millis(5));
            Ok(RecvOutcome::Idle)
        }
    }

    /// Ignores shutdown for a long time.
    struct StuckSource;
    impl DatagramSource for StuckSource {
        fn recv_datagram(&mut self, _buf: &mut [u8]) -> Result<RecvOutcome, PipelineError> {
            thread::sleep(Duration::from_millis(500));
            Ok(RecvOutcome::Idle)
        }
    }

    struct FailingSource;
    impl DatagramSource for FailingSource {
        fn recv_datagram(&mut self, _buf: &mut [u8]) -> Result<RecvOutcome, PipelineError> {
            Err(PipelineError::Receive(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "network down",
            )))
        }
    }

    struct PanickingSource;
    impl DatagramSource for PanickingSource {
        fn recv_datagram(&mut self, _buf: &mut [u8]) -> Result<RecvOutcome, PipelineError> {
            panic!("driver bug")
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            window_seconds: 0.1, // 20 samples
            warmup_datagrams: 2,
            edge_samples: 0,
            downsampling: 5,
            line_noise_filter: None,
            baseline_filter: None,
            shutdown_grace_ms: 500,
            ..PipelineConfig::default()
        }
    }

    fn engine_for(config: &PipelineConfig) -> TriggerEngine<Vec<u8>> {
        TriggerEngine::from_config(config, ActuatorPort::new(Vec::new(), &config.serial).unwrap())
            .unwrap()
    }

    fn records(values: impl IntoIterator<Item = f64>) -> Vec<Vec<u8>> {
        values
            .into_iter()
            .map(|v| format!(r#"{{"c1": {v}, "c2": 0}}"#).into_bytes())
            .collect()
    }

    #[test]
    fn playback_runs_to_completion() {
        let config = small_config();
        let mut data = records([999.0, 999.0]); // warm-up
        data.extend(records(std::iter::repeat(0.0).take(25)));
        data.extend(records(std::iter::repeat(500.0).take(25)));
        let summary = run_pipeline(
            &config,
            ManualSource::new(data),
            engine_for(&config),
            RunOptions::default(),
        )
        .unwrap();
        assert_eq!(summary.reason, StopReason::SourceEnded);
        assert_eq!(summary.cycles, 10);
        assert_eq!(summary.commands_sent, 1);
        let stats = summary.receiver.unwrap();
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.appended, 50);
    }

    #[test]
    fn operator_stop_ends_the_run() {
        let config = small_config();
        let (tx, rx) = channel::bounded(1);
        tx.send(()).unwrap();
        let summary = run_pipeline(
            &config,
            IdleSource,
            engine_for(&config),
            RunOptions {
                stop: Some(rx),
                ..RunOptions::default()
            },
        )
        .unwrap();
        assert_eq!(summary.reason, StopReason::Operator);
        assert_eq!(summary.receiver.unwrap().appended, 0);
    }

    #[test]
    fn duration_ends_the_run() {
        let config = small_config();
        let started = Instant::now();
        let summary = run_pipeline(
            &config,
            IdleSource,
            engine_for(&config),
            RunOptions {
                duration: Some(Duration::from_millis(50)),
                ..RunOptions::default()
            },
        )
        .unwrap();
        assert_eq!(summary.reason, StopReason::Duration);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn stuck_worker_is_detached_after_grace() {
        let config = PipelineConfig {
            shutdown_grace_ms: 20,
            ..small_config()
        };
        let summary = run_pipeline(
            &config,
            StuckSource,
            engine_for(&config),
            RunOptions {
                duration: Some(Duration::from_millis(10)),
                ..RunOptions::default()
            },
        )
        .unwrap();
        assert_eq!(summary.receiver, None);
    }

    #[test]
    fn receive_failure_is_fatal() {
        let config = small_config();
        let err = run_pipeline(&config, FailingSource, engine_for(&config), RunOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::AcquisitionExited(_))
        ));
    }

    #[test]
    fn worker_panic_is_fatal() {
        let config = small_config();
        let err = run_pipeline(&config, PanickingSource, engine_for(&config), RunOptions::default())
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("driver bug"), "{msg}");
    }

    #[test]
    fn actuator_failure_stops_everything() {
        let config = small_config();
        let actuator = ActuatorPort::new(BrokenPipe, &SerialConfig::default()).unwrap();
        let engine = TriggerEngine::from_config(&config, actuator).unwrap();
        let data = records(std::iter::repeat(500.0).take(30));
        let err = run_pipeline(&config, ManualSource::new(data), engine, RunOptions::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ActuatorWrite(_))
        ));
    }

    #[test]
    fn viewer_receives_frames() {
        let config = small_config();
        let (viewer_tx, viewer_rx) = channel::bounded(64);
        let data = records((0..40).map(f64::from));
        let summary = run_pipeline(
            &config,
            ManualSource::new(data),
            engine_for(&config),
            RunOptions {
                viewer: Some(viewer_tx),
                ..RunOptions::default()
            },
        )
        .unwrap();
        let frames: Vec<TraceFrame> = viewer_rx.try_iter().collect();
        assert_eq!(frames.len() as u64, summary.cycles);
        assert!(frames.iter().all(|f| f.y.len() == 4 && f.x.len() == 4));
    }

    #[test]
    fn startup_fails_on_bad_config() {
        let config = PipelineConfig {
            downsampling: 0,
            ..PipelineConfig::default()
        };
        assert!(run(&config, RunOptions::default()).is_err());
    }
}
