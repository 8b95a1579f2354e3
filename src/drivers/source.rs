#[cfg(test)]
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use serde_json::Value;
use crate::drivers::{DecodeError, PipelineError};
/// Result of one receive attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvOutcome {
    /// A datagram of this many bytes was written into the buffer.
    Datagram(usize),
    /// Nothing arrived before the read timeout; poll again.
    Idle,
    /// The source will never yield another datagram. Only replay sources end.
    #[cfg(test)]
    Exhausted,
}
/// Something that yields raw datagrams one at a time.
pub trait DatagramSource {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, PipelineError>;
}
/// Connectionless socket bound to a local address.
pub struct UdpSource {
    socket: UdpSocket,
    local_addr: SocketAddr,
}
impl UdpSource {
    /// Binds `addr`. Reads block for at most `read_timeout` so the owner can
    /// look at its shutdown signal between datagrams.
    pub fn bind(addr: &str, read_timeout: Duration) -> Result<Self, PipelineError> {
        let bind_err = |source| PipelineError::Bind {
            addr: addr.to_string(),
            source,
        };
        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_read_timeout(Some(read_timeout)).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        log::info!("UDP socket bound on {local_addr}");
        Ok(Self { socket, local_addr })
    }
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
impl DatagramSource for UdpSource {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, PipelineError> {
        match self.socket.recv(buf) {
            Ok(len) => Ok(RecvOutcome::Datagram(len)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(RecvOutcome::Idle)
            }
            Err(e) => Err(PipelineError::Receive(e)),
        }
    }
}
/// In-memory source for deterministic playback.
#[cfg(test)]
pub struct ManualSource {
    queue: VecDeque<Vec<u8>>,
}
#[cfg(test)]
impl ManualSource {
    pub fn new<P: Into<Vec<u8>>>(datagrams: impl IntoIterator<Item = P>) -> Self {
        Self {
            queue: datagrams.into_iter().map(Into::into).collect(),
        }
    }
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}
#[cfg(test)]
impl DatagramSource for ManualSource {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<RecvOutcome, PipelineError> {
        let Some(datagram) = self.queue.pop_front() else {
            return Ok(RecvOutcome::Exhausted);
        };
        // oversized datagrams are truncated, as a socket read would
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(RecvOutcome::Datagram(len))
    }
}
/// Decodes a JSON record such as `{"c1": 12.5, "c2": "-3.0"}` into one value
/// per channel key, in key order. Numeric strings count as numbers.
pub fn decode_sample(payload: &[u8], channel_keys: &[String]) -> Result<Vec<f64>, DecodeError> {
    let record: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let fields = record.as_object().ok_or(DecodeError::NotAnObject)?;
    channel_keys
        .iter()
        .map(|key| {
            let value = fields
                .get(key)
                .ok_or_else(|| DecodeError::MissingField(key.clone()))?;
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            number
                .filter(|v| v.is_finite())
                .ok_or_else(|| DecodeError::NotNumeric(key.clone()))
        })
        .collect()
}
#[cfg(test)]
mod tests {
    use super::*;
    fn keys() -> Vec<String> {
        vec!["c1".into(), "c2".into()]
    }
    #[test]
    fn decodes_numbers_and_numeric_strings() {
        assert_eq!(
            decode_sample(br#"{"c1": 12.5, "c2": -3}"#, &keys()),
            Ok(vec![12.5, -3.0])
        );
        assert_eq!(
            decode_sample(br#"{"c2": "4.25", "c1": " 1e2 ", "extra": true}"#, &keys()),
            Ok(vec![100.0, 4.25])
        );
    }
    #[test]
    fn reports_decode_failure_reason() {
        assert!(matches!(
            decode_sample(b"not json", &keys()),
            Err(DecodeError::InvalidJson(_))
        ));
        assert_eq!(decode_sample(b"[1, 2]", &keys()), Err(DecodeError::NotAnObject));
        assert_eq!(
            decode_sample(br#"{"c1": 1.0}"#, &keys()),
            Err(DecodeError::MissingField("c2".into()))
        );
        assert_eq!(
            decode_sample(br#"{"c1": 1.0, "c2": "abc"}"#, &keys()),
            Err(DecodeError::NotNumeric("c2".into()))
        );
        assert_eq!(
            decode_sample(br#"{"c1": null, "c2": 1}"#, &keys()),
            Err(DecodeError::NotNumeric("c1".into()))
        );
        assert_eq!(
            decode_sample(br#"{"c1": "NaN", "c2": 1}"#, &keys()),
            Err(DecodeError::NotNumeric("c1".into()))
        );
    }
    #[test]
    fn manual_source_replays_then_exhausts() {
        let mut source = ManualSource::new(vec!["abc", "defgh"]);
        let mut buf = [0u8; 4];
        assert_eq!(source.recv_datagram(&mut buf).unwrap(), RecvOutcome::Datagram(3));
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(source.recv_datagram(&mut buf).unwrap(), RecvOutcome::Datagram(4));
        assert_eq!(&buf, b"defg");
        assert_eq!(source.recv_datagram(&mut buf).unwrap(), RecvOutcome::Exhausted);
        assert_eq!(source.remaining(), 0);
    }
    #[test]
    fn udp_source_receives_and_times_out() {
        let mut source = UdpSource::bind("127.0.0.1:0", Duration::from_millis(50)).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(br#"{"c1": 1, "c2": 2}"#, source.local_addr())
            .unwrap();
        let mut buf = [0u8; 1024];
        let len = match source.recv_datagram(&mut buf).unwrap() {
            RecvOutcome::Datagram(len) => len,
            other => panic!("expected a datagram, got {other:?}"),
        };
        assert_eq!(decode_sample(&buf[..len], &keys()), Ok(vec![1.0, 2.0]));
        assert_eq!(source.recv_datagram(&mut buf).unwrap(), RecvOutcome::Idle);
    }
    #[test]
    fn bind_failure_is_reported() {
        let taken = UdpSource::bind("127.0.0.1:0", Duration::from_millis(10)).unwrap();
        let addr = taken.local_addr().to_string();
        assert!(matches!(
            UdpSource::bind(&addr, Duration::from_millis(10)),
            Err(PipelineError::Bind { .. })
        ));
        assert!(UdpSource::bind("not-an-address", Duration::from_millis(10)).is_err());
    }
}
