// src/drivers/mod.rs
// 声明同级目录下的子模块文件
pub mod actuator;
pub mod buffer;
pub mod butterworth;
pub mod channel;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod receiver;
pub mod shutdown;
pub mod source;
// 公开导出这些模块里的结构体，方便外部调用
pub use actuator::{ActuatorPort, SerialConfig};
pub use buffer::SlidingBuffer;
pub use butterworth::FilterSpec;
pub use channel::{snapshot_channel, SnapshotPublisher};
pub use envelope::{EnvelopeDetector, EnvelopeMode};
pub use error::{DecodeError, PipelineError};
pub use filter::FilterBank;
pub use receiver::{ReceiverStats, StreamReceiver};
pub use shutdown::{Shutdown, ShutdownToken};
pub use source::{decode_sample, DatagramSource, RecvOutcome, UdpSource};
