// ── UDP frame sink ──
//
// Plain UDP to `<bridge>:<streaming_port>`. The socket is connected so
// ICMP port-unreachable replies surface as send errors.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::protocol::HueStreamEncoder;
use super::{FrameSink, SinkFactory, TransportError};
use crate::effect::Frame;
use crate::model::BridgeRecord;

pub struct UdpFrameSink {
    socket: UdpSocket,
    target: SocketAddr,
    encoder: HueStreamEncoder,
}

impl UdpFrameSink {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let target = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TransportError::fatal(format!("cannot resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::fatal(format!("{host} has no address")))?;

        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(|e| classify(&e))?;
        socket.connect(target).await.map_err(|e| classify(&e))?;
        info!(%target, "udp stream sink connected");
        Ok(Self {
            socket,
            target,
            encoder: HueStreamEncoder::new(),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl FrameSink for UdpFrameSink {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = self.encoder.encode(frame);
        self.socket.send(&bytes).await.map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn close(&mut self) {
        debug!(target = %self.target, "udp stream sink closed");
    }
}

/// Refused or unroutable destinations end the stream; anything else
/// only drops the current frame.
fn classify(e: &io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::NotConnected
        | ErrorKind::AddrNotAvailable
        | ErrorKind::NetworkUnreachable
        | ErrorKind::HostUnreachable => TransportError::fatal(e.to_string()),
        _ => TransportError::transient(e.to_string()),
    }
}

/// Opens a [`UdpFrameSink`] to the bridge's streaming port.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSinkFactory;

#[async_trait]
impl SinkFactory for UdpSinkFactory {
    async fn open(&self, bridge: &BridgeRecord) -> Result<Box<dyn FrameSink>, TransportError> {
        let sink = UdpFrameSink::connect(&bridge.address, bridge.streaming_port).await?;
        Ok(Box::new(sink))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::effect::{Color, LightColor};

    #[tokio::test]
    async fn frames_arrive_as_huestream_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let mut sink = UdpFrameSink::connect("127.0.0.1", port).await.unwrap();

        let frame = Frame {
            elapsed: Duration::ZERO,
            lights: vec![LightColor {
                id: "1".into(),
                color: Color::GREEN,
            }],
            effects: Vec::new(),
            generation: 1,
        };
        sink.send(&frame).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 25);
        assert_eq!(&buf[..9], b"HueStream");
    }

    #[test]
    fn refused_is_fatal_would_block_is_not() {
        assert!(classify(&io::Error::from(ErrorKind::ConnectionRefused)).fatal);
        assert!(!classify(&io::Error::from(ErrorKind::WouldBlock)).fatal);
    }
}
