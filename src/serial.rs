//! Async serial endpoint: 8-N-1 over `tokio-serial`'s `SerialStream`.
//!
//! The read half is owned exclusively by a reader task; the write half is
//! owned exclusively by a dedicated writer task fed over a bounded channel,
//! so a slow or absent device cannot stall whichever task forwards bytes
//! into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio_serial::SerialPortBuilderExt;

use crate::error::{Result, RtkError};

const READ_CHUNK: usize = 1024;
const WRITE_CHANNEL_DEPTH: usize = 256;
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A connected serial device plus the tasks mediating it.
pub struct SerialEndpoint {
    connected: Arc<AtomicBool>,
    write_tx: mpsc::Sender<Vec<u8>>,
    reader_handle: tokio::task::JoinHandle<()>,
    writer_handle: tokio::task::JoinHandle<()>,
}

impl SerialEndpoint {
    /// Open `port` at `baud` and spawn the reader/writer tasks.
    ///
    /// `on_bytes` is invoked from the reader task for every chunk read; it
    /// must not block.
    pub fn connect<F>(
        port: &str,
        baud: u32,
        stop_rx: watch::Receiver<bool>,
        mut on_bytes: F,
    ) -> Result<Self>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let stream = tokio_serial::new(port, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .open_native_async()
            .map_err(|e| RtkError::Io(std::io::Error::other(e)))?;

        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(WRITE_CHANNEL_DEPTH);

        let reader_connected = connected.clone();
        let mut reader_stop = stop_rx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                tokio::select! {
                    _ = reader_stop.changed() => {
                        if *reader_stop.borrow() {
                            break;
                        }
                    }
                    result = tokio::time::timeout(READ_TIMEOUT, read_half.read(&mut buf)) => {
                        match result {
                            Ok(Ok(0)) => {
                                debug!("serial read returned EOF");
                                continue;
                            }
                            Ok(Ok(n)) => on_bytes(&buf[..n]),
                            Ok(Err(e)) => {
                                error!("serial read error, terminating reader: {e}");
                                break;
                            }
                            Err(_) => continue, // read timeout: retry
                        }
                    }
                }
            }
            // Leave `connected` true: a dead reader distinguishes "transiently
            // unavailable" from an explicit caller-initiated disconnect.
            let _ = &reader_connected;
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
                    maybe_bytes = write_rx.recv() => {
                        match maybe_bytes {
                            Some(bytes) => {
                                if let Err(e) = write_half.write_all(&bytes).await {
                                    warn!("serial write failed: {e}");
                                    continue;
                                }
                                if let Err(e) = write_half.flush().await {
                                    warn!("serial flush failed: {e}");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(SerialEndpoint {
            connected,
            write_tx,
            reader_handle,
            writer_handle,
        })
    }

    /// `true` unless the caller has explicitly disconnected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Queue bytes for the writer task. Drops silently (with a warning) if
    /// the channel is full rather than blocking the caller.
    pub fn write(&self, bytes: Vec<u8>) {
        if self.write_tx.try_send(bytes).is_err() {
            warn!("serial write channel full, dropping bytes");
        }
    }

    /// A cloneable sender into the writer task's channel, for callers (the
    /// NTRIP receiver task) that need to forward bytes without going
    /// through `write`'s own error logging.
    pub fn write_sender(&self) -> SerialWriteSender {
        SerialWriteSender {
            tx: self.write_tx.clone(),
        }
    }

    pub async fn disconnect(self) {
        self.connected.store(false, Ordering::Relaxed);
        let _ = tokio::time::timeout(Duration::from_secs(2), self.reader_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.writer_handle).await;
    }
}

/// A cheaply-cloneable handle into a `SerialEndpoint`'s write channel.
#[derive(Clone)]
pub struct SerialWriteSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl SerialWriteSender {
    /// Drops the bytes silently (with a warning) if the channel is full.
    pub fn send(&self, bytes: Vec<u8>) {
        if self.tx.try_send(bytes).is_err() {
            warn!("serial write channel full, dropping forwarded bytes");
        }
    }
}
