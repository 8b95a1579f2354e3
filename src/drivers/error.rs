use std::io;
use thiserror::Error;
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("filter design failed: {0}")]
    FilterDesign(String),
    #[error("failed to bind datagram socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("datagram receive failed: {0}")]
    Receive(#[source] io::Error),
    #[error("failed to open serial device {path}: {source}")]
    SerialOpen {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("actuator write failed: {0}")]
    ActuatorWrite(#[source] io::Error),
    #[error("actuator port already closed")]
    ActuatorClosed,
    #[error("snapshot channel disconnected")]
    ChannelClosed,
    #[error("acquisition worker exited unexpectedly: {0}")]
    AcquisitionExited(String),
}
/// Reason a datagram payload could not be turned into a sample.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing channel field {0:?}")]
    MissingField(String),
    #[error("channel field {0:?} is not numeric")]
    NotNumeric(String),
}
