//! NTRIP client endpoint: HTTP-style handshake, steady-state RTCM stream,
//! and GGA keep-alive uplink. A mock variant exists for the no-caster case.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::config::NtripConfig;
use crate::error::{Result, RtkError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_CHUNK: usize = 4096;
const HANDSHAKE_READ_CAP: usize = 1024;
const WRITE_CHANNEL_DEPTH: usize = 64;
const MOCK_FRAME_INTERVAL: Duration = Duration::from_millis(50);

fn build_request(cfg: &NtripConfig) -> String {
    let mut request = format!(
        "GET /{} HTTP/1.1\r\nHost: {}:{}\r\nUser-Agent: RTK-Client/1.0\r\nAccept: */*\r\nConnection: close\r\n",
        cfg.mountpoint, cfg.host, cfg.port
    );
    if !cfg.username.is_empty() || !cfg.password.is_empty() {
        let creds = format!("{}:{}", cfg.username, cfg.password);
        let encoded = BASE64.encode(creds.as_bytes());
        request.push_str(&format!("Authorization: Basic {encoded}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// A connected NTRIP caster link plus the receiver/writer tasks around it.
pub struct NtripEndpoint {
    connected: Arc<AtomicBool>,
    gga_tx: mpsc::Sender<String>,
    receiver_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl NtripEndpoint {
    /// Connect to the caster, perform the handshake, and spawn the
    /// receiver/writer tasks on success.
    pub async fn connect<F>(
        cfg: &NtripConfig,
        stop_rx: watch::Receiver<bool>,
        mut on_bytes: F,
    ) -> Result<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| RtkError::HandshakeRefused(format!("connect timeout to {addr}")))?
            .map_err(RtkError::Io)?;

        let request = build_request(cfg);
        stream.write_all(request.as_bytes()).await?;

        let mut response_buf = [0u8; HANDSHAKE_READ_CAP];
        let n = timeout(CONNECT_TIMEOUT, stream.read(&mut response_buf))
            .await
            .map_err(|_| RtkError::HandshakeRefused("handshake read timeout".into()))?
            .map_err(RtkError::Io)?;
        let response = String::from_utf8_lossy(&response_buf[..n]);
        if !response.contains("200 OK") {
            return Err(RtkError::HandshakeRefused(format!(
                "caster did not return 200 OK: {response}"
            )));
        }

        let (mut read_half, mut write_half) = stream.into_split();
        let connected = Arc::new(AtomicBool::new(true));
        let (gga_tx, mut gga_rx) = mpsc::channel::<String>(WRITE_CHANNEL_DEPTH);

        let receiver_connected = connected.clone();
        let mut receiver_stop = stop_rx.clone();
        let receiver_handle = tokio::spawn(async move {
            let mut buf = [0u8; RECV_CHUNK];
            loop {
                tokio::select! {
                    _ = receiver_stop.changed() => {
                        if *receiver_stop.borrow() {
                            break;
                        }
                    }
                    result = timeout(RECV_TIMEOUT, read_half.read(&mut buf)) => {
                        match result {
                            Ok(Ok(0)) => {
                                debug!("ntrip socket closed by peer");
                                receiver_connected.store(false, Ordering::Relaxed);
                                break;
                            }
                            Ok(Ok(n)) => on_bytes(&buf[..n]),
                            Ok(Err(e)) => {
                                warn!("ntrip read error, terminating receiver: {e}");
                                receiver_connected.store(false, Ordering::Relaxed);
                                break;
                            }
                            Err(_) => continue, // recv timeout: retry
                        }
                    }
                }
            }
        });

        let mut writer_stop = stop_rx;
        let writer_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_stop.changed() => {
                        if *writer_stop.borrow() {
                            break;
                        }
                    }
                    maybe_line = gga_rx.recv() => {
                        match maybe_line {
                            Some(mut line) => {
                                line.push_str("\r\n");
                                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                                    warn!("ntrip GGA uplink failed: {e}");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(NtripEndpoint {
            connected,
            gga_tx,
            receiver_handle,
            writer_handle,
        })
    }

    /// Spawn the mock variant: no socket, a synthetic CRC-valid RTCM frame
    /// every 50 ms.
    pub fn connect_mock<F>(stop_rx: watch::Receiver<bool>, mut on_bytes: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let connected = Arc::new(AtomicBool::new(true));
        let (gga_tx, mut gga_rx) = mpsc::channel::<String>(WRITE_CHANNEL_DEPTH);

        let mut receiver_stop = stop_rx.clone();
        let receiver_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MOCK_FRAME_INTERVAL);
            loop {
                tokio::select! {
                    _ = receiver_stop.changed() => {
                        if *receiver_stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        on_bytes(&synthetic_frame());
                    }
                }
            }
        });

        let mut writer_stop = stop_rx;
        let writer_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_stop.changed() => {
                        if *writer_stop.borrow() {
                            break;
                        }
                    }
                    maybe_line = gga_rx.recv() => {
                        if maybe_line.is_none() {
                            break;
                        }
                    }
                }
            }
        });

        NtripEndpoint {
            connected,
            gga_tx,
            receiver_handle,
            writer_handle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Queue a GGA line for uplink. Drops silently if the channel is full.
    pub fn send_gga(&self, line: &str) {
        if self.gga_tx.try_send(line.to_string()).is_err() {
            warn!("ntrip GGA write channel full, dropping keep-alive");
        }
    }

    /// A cloneable sender into the writer task's channel, handed to the
    /// mediator so the supervisor and NMEA handler can uplink without
    /// holding a reference to the whole endpoint.
    pub fn gga_sender(&self) -> mpsc::Sender<String> {
        self.gga_tx.clone()
    }

    pub async fn disconnect(self) {
        self.connected.store(false, Ordering::Relaxed);
        let _ = tokio::time::timeout(Duration::from_secs(2), self.receiver_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.writer_handle).await;
    }
}

/// One synthetic, CRC-valid RTCM frame: header 0xD3, payload length 4,
/// arbitrary payload, trailing CRC-24Q.
fn synthetic_frame() -> Vec<u8> {
    use crate::checksum::crc24q;

    let payload = [0xAAu8, 0xBB, 0xCC, 0xDD];
    let mut frame = vec![0xD3u8, 0x00, payload.len() as u8];
    frame.extend_from_slice(&payload);
    let crc = crc24q(&frame);
    frame.push(((crc >> 16) & 0xFF) as u8);
    frame.push(((crc >> 8) & 0xFF) as u8);
    frame.push((crc & 0xFF) as u8);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_includes_basic_auth_when_credentials_present() {
        let cfg = NtripConfig {
            host: "caster.example.com".into(),
            port: 2101,
            mountpoint: "MOUNT1".into(),
            username: "user".into(),
            password: "pass".into(),
            mock: false,
        };
        let request = build_request(&cfg);
        assert!(request.starts_with("GET /MOUNT1 HTTP/1.1\r\n"));
        assert!(request.contains("Authorization: Basic"));
    }

    #[test]
    fn request_omits_auth_header_without_credentials() {
        let cfg = NtripConfig {
            host: "caster.example.com".into(),
            port: 2101,
            mountpoint: "MOUNT1".into(),
            username: String::new(),
            password: String::new(),
            mock: false,
        };
        let request = build_request(&cfg);
        assert!(!request.contains("Authorization"));
    }

    #[test]
    fn synthetic_frame_has_valid_crc() {
        use crate::checksum::crc24q;
        let frame = synthetic_frame();
        let length = 4usize;
        let computed = crc24q(&frame[..length + 3]);
        let expected = ((frame[length + 3] as u32) << 16)
            | ((frame[length + 4] as u32) << 8)
            | frame[length + 5] as u32;
        assert_eq!(computed, expected);
    }
}
