//! Wires the NMEA parser, RTCM parser, serial endpoint, and NTRIP endpoint
//! together; runs the 1 Hz supervisor that enforces the GGA keep-alive and
//! emits periodic statistics.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use tokio::time::interval;

use crate::config::RtkConfig;
use crate::error::RtkError;
use crate::nmea::{Fix, NmeaParser, NmeaSentenceHandler};
use crate::ntrip::NtripEndpoint;
use crate::rtcm::{RtcmFrameHandler, RtcmParser, RtcmStats};
use crate::serial::SerialEndpoint;
use crate::sink::PositionSink;

/// The compiled-in keep-alive GGA, sent upstream whenever no fresh receiver
/// GGA has arrived within the keep-alive window.
pub const DEFAULT_GGA: &str =
    "$GPGGA,123519.00,3013.2000,N,12021.6000,E,1,08,0.9,50.0,M,0.0,M,,*60";

const SUPERVISOR_TICK: Duration = Duration::from_secs(1);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Rover and base slots of the mediator's current-fix cell.
#[derive(Debug, Clone, Default)]
pub struct CurrentFix {
    pub rover: Option<Fix>,
    pub base: Option<Fix>,
}

struct Shared {
    current_fix: Mutex<CurrentFix>,
    last_gga_timestamp_ms: AtomicI64,
    ntrip_connected: Arc<AtomicBool>,
    gga_uplink: Mutex<Option<tokio::sync::mpsc::Sender<String>>>,
    sink: Arc<dyn PositionSink>,
    keepalive: Duration,
}

impl Shared {
    /// The invalid-quality filter itself lives on the sink side (see
    /// `sink::FilteringSink`); the mediator always forwards and lets the
    /// sink decide.
    fn record_rover_fix(&self, fix: &Fix) {
        {
            let mut current = self.current_fix.lock().expect("current-fix mutex poisoned");
            current.rover = Some(fix.clone());
        }
        self.sink.accept(fix);
    }

    fn record_base_fix(&self, fix: &Fix) {
        {
            let mut current = self.current_fix.lock().expect("current-fix mutex poisoned");
            current.base = Some(fix.clone());
        }
        self.sink.accept(fix);
    }

    fn uplink_gga(&self, line: &str) {
        let guard = self.gga_uplink.lock().expect("gga-uplink mutex poisoned");
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(line.to_string()).is_err() {
                debug!("gga uplink channel full, dropping keep-alive");
            }
        }
    }
}

/// NMEA callback target: stamps the last-GGA timestamp, forwards rover
/// fixes to the sink, and re-uplinks GGA verbatim (or the compiled-in
/// default on an invalid fix) to the caster.
struct MediatorNmeaHandler {
    shared: Arc<Shared>,
}

impl NmeaSentenceHandler for MediatorNmeaHandler {
    fn on_gga(&self, raw: &str, _fields: &[&str], fix: &mut Fix) {
        self.shared
            .last_gga_timestamp_ms
            .store(now_millis(), Ordering::Relaxed);
        self.shared.record_rover_fix(fix);

        if !self.shared.ntrip_connected.load(Ordering::Relaxed) {
            return;
        }
        if fix.quality.is_valid() {
            self.shared.uplink_gga(raw);
        } else {
            self.shared.uplink_gga(DEFAULT_GGA);
        }
    }

    fn on_rmc(&self, _raw: &str, _fields: &[&str], fix: &mut Fix) {
        debug!("rmc: speed={:.1}km/h course={:.1}", fix.speed_kmh, fix.course_deg);
    }

    fn on_gll(&self, _raw: &str, _fields: &[&str], fix: &mut Fix) {
        self.shared.record_rover_fix(fix);
    }
}

/// RTCM callback target: decodes base-station fixes straight to the sink.
struct MediatorRtcmHandler {
    shared: Arc<Shared>,
}

impl RtcmFrameHandler for MediatorRtcmHandler {
    fn on_1005(&self, fix: &Fix) {
        self.shared.record_base_fix(fix);
    }
}

/// Whether the supervisor should push the default GGA upstream: either no
/// receiver GGA has ever arrived, or the last one is older than the
/// keep-alive window.
fn keepalive_due(last_gga_ms: i64, now_ms: i64, keepalive: Duration) -> bool {
    last_gga_ms == 0 || (now_ms - last_gga_ms) > keepalive.as_millis() as i64
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The result of `start()`: a mediator handle and, if any endpoint failed
/// to connect, the first error encountered. The caller must still call
/// `stop()` on the returned mediator even when `error` is `Some`, since
/// whichever endpoints DID connect remain open until an explicit stop.
pub struct StartOutcome {
    pub mediator: Mediator,
    pub error: Option<RtkError>,
}

/// Owns the serial endpoint, the NTRIP endpoint, and the supervisor task.
pub struct Mediator {
    shared: Arc<Shared>,
    serial: Option<SerialEndpoint>,
    ntrip: Option<NtripEndpoint>,
    rtcm_stats: Arc<RtcmStats>,
    stop_tx: watch::Sender<bool>,
    supervisor_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Mediator {
    /// Connect serial, then NTRIP, then spawn the supervisor. Per §4.7,
    /// start order is serial -> NTRIP -> supervisor; any failure aborts
    /// the remaining steps but already-connected endpoints stay open.
    pub async fn start(cfg: &RtkConfig, sink: Arc<dyn PositionSink>) -> StartOutcome {
        let (stop_tx, stop_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            current_fix: Mutex::new(CurrentFix::default()),
            last_gga_timestamp_ms: AtomicI64::new(0),
            ntrip_connected: Arc::new(AtomicBool::new(false)),
            gga_uplink: Mutex::new(None),
            sink,
            keepalive: Duration::from_secs_f64(cfg.keepalive_seconds),
        });

        let rtcm_stats = Arc::new(RtcmStats::new());

        let mut mediator = Mediator {
            shared: shared.clone(),
            serial: None,
            ntrip: None,
            rtcm_stats: rtcm_stats.clone(),
            stop_tx,
            supervisor_handle: None,
        };

        if let Some(serial_cfg) = &cfg.serial {
            let nmea_handler = MediatorNmeaHandler {
                shared: shared.clone(),
            };
            let mut parser = NmeaParser::new(cfg.enabled_nmea_messages.clone(), nmea_handler);

            match SerialEndpoint::connect(
                &serial_cfg.port,
                serial_cfg.baudrate,
                stop_rx.clone(),
                move |bytes| parser.feed(bytes),
            ) {
                Ok(endpoint) => mediator.serial = Some(endpoint),
                Err(e) => {
                    return StartOutcome {
                        mediator,
                        error: Some(e),
                    }
                }
            }
        }

        if let Some(ntrip_cfg) = &cfg.ntrip {
            let rtcm_handler = MediatorRtcmHandler {
                shared: shared.clone(),
            };
            let mut rtcm_parser = RtcmParser::with_shared_stats(rtcm_handler, rtcm_stats.clone());
            let serial_write = mediator.serial_write_forwarder();

            let on_bytes = move |bytes: &[u8]| {
                // Correction passthrough is the primary path: forward the raw
                // bytes to the serial device before the RTCM parser even sees
                // them, so decoding never blocks the write.
                if let Some(forward) = serial_write.as_ref() {
                    forward(bytes.to_vec());
                }
                rtcm_parser.feed(bytes);
            };

            let connect_result = if ntrip_cfg.mock {
                Ok(NtripEndpoint::connect_mock(stop_rx.clone(), on_bytes))
            } else {
                NtripEndpoint::connect(ntrip_cfg, stop_rx.clone(), on_bytes).await
            };

            match connect_result {
                Ok(endpoint) => {
                    shared.ntrip_connected.store(true, Ordering::Relaxed);
                    *shared.gga_uplink.lock().expect("gga-uplink mutex poisoned") =
                        Some(endpoint.gga_sender());
                    mediator.ntrip = Some(endpoint);
                }
                Err(e) => {
                    return StartOutcome {
                        mediator,
                        error: Some(e),
                    }
                }
            }
        }

        mediator.spawn_supervisor(stop_rx);

        StartOutcome {
            mediator,
            error: None,
        }
    }

    /// A callback forwarding bytes to the serial write queue, boxed so the
    /// NTRIP receiver closure can own it without knowing about `Mediator`.
    fn serial_write_forwarder(&self) -> Option<Arc<dyn Fn(Vec<u8>) + Send + Sync>> {
        self.serial.as_ref().map(|serial| {
            let tx = serial.write_sender();
            let f: Arc<dyn Fn(Vec<u8>) + Send + Sync> = Arc::new(move |bytes| tx.send(bytes));
            f
        })
    }

    fn spawn_supervisor(&mut self, mut stop_rx: watch::Receiver<bool>) {
        let shared = self.shared.clone();
        let rtcm_stats = self.rtcm_stats.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(SUPERVISOR_TICK);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        tick += 1;

                        if shared.ntrip_connected.load(Ordering::Relaxed) {
                            let last = shared.last_gga_timestamp_ms.load(Ordering::Relaxed);
                            if keepalive_due(last, now_millis(), shared.keepalive) {
                                shared.uplink_gga(DEFAULT_GGA);
                            }
                        }

                        if tick % 10 == 0 {
                            let snapshot = rtcm_stats.snapshot();
                            info!("rtcm stats (last 10s window, cumulative): {snapshot:?}");
                        }
                    }
                }
            }
        });

        self.supervisor_handle = Some(handle);
    }

    /// A coherent snapshot of the current rover/base fix cell.
    pub fn current_fix(&self) -> CurrentFix {
        self.shared
            .current_fix
            .lock()
            .expect("current-fix mutex poisoned")
            .clone()
    }

    /// Cumulative RTCM type -> count table.
    pub fn rtcm_stats(&self) -> std::collections::HashMap<u16, u64> {
        self.rtcm_stats.snapshot()
    }

    /// Cooperative, idempotent stop: signal every task, then join with a
    /// bounded timeout. A task that fails to join in time is abandoned.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);

        if let Some(handle) = self.supervisor_handle.take() {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await;
        }
        if let Some(ntrip) = self.ntrip.take() {
            ntrip.disconnect().await;
        }
        if let Some(serial) = self.serial.take() {
            serial.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NtripConfig, RtkConfig};
    use crate::sink::PositionSink;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CapturingSink {
        seen: StdMutex<Vec<Fix>>,
    }

    impl PositionSink for CapturingSink {
        fn accept(&self, fix: &Fix) {
            self.seen.lock().unwrap().push(fix.clone());
        }
    }

    fn mock_config() -> RtkConfig {
        RtkConfig {
            serial: None,
            ntrip: Some(NtripConfig {
                host: "unused".into(),
                port: 0,
                mountpoint: "MOCK".into(),
                username: String::new(),
                password: String::new(),
                mock: true,
            }),
            enabled_nmea_messages: vec![],
            keepalive_seconds: 2.0,
        }
    }

    #[test]
    fn gll_fix_reaches_sink_without_touching_gga_keepalive_state() {
        let sink: Arc<dyn PositionSink> = Arc::new(CapturingSink::default());
        let shared = Arc::new(Shared {
            current_fix: Mutex::new(CurrentFix::default()),
            last_gga_timestamp_ms: AtomicI64::new(0),
            ntrip_connected: Arc::new(AtomicBool::new(false)),
            gga_uplink: Mutex::new(None),
            sink: sink.clone(),
            keepalive: Duration::from_secs(2),
        });
        let handler = MediatorNmeaHandler {
            shared: shared.clone(),
        };

        let mut fix = Fix {
            quality: crate::nmea::FixQuality::Invalid,
            ..Fix::default()
        };
        handler.on_gll("$GPGLL,...*00", &[], &mut fix);

        assert!(shared.current_fix.lock().unwrap().rover.is_some());
        assert_eq!(shared.last_gga_timestamp_ms.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn mock_ntrip_start_and_stop_round_trips() {
        let cfg = mock_config();
        let sink: Arc<dyn PositionSink> = Arc::new(CapturingSink::default());
        let outcome = Mediator::start(&cfg, sink).await;
        assert!(outcome.error.is_none());
        outcome.mediator.stop().await;
    }

    // Scenario 5: keep-alive fires once T_keep has elapsed with no receiver
    // GGA, and does not fire before then.
    #[test]
    fn scenario_5_keepalive_fires_after_threshold() {
        let keepalive = Duration::from_secs(2);
        assert!(keepalive_due(0, 1_000, keepalive)); // never seen a GGA
        assert!(!keepalive_due(1_000, 2_500, keepalive)); // 1.5s elapsed, under threshold
        assert!(keepalive_due(1_000, 3_001, keepalive)); // just over 2s elapsed
    }

    #[test]
    fn statistics_log_fires_on_tenth_tick_only() {
        let fires: Vec<u64> = (1..=20).filter(|t| t % 10 == 0).collect();
        assert_eq!(fires, vec![10, 20]);
    }
}
