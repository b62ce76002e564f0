//! Position sink interface: where decoded fixes end up.

use log::info;

use crate::nmea::{Fix, FixKind, FixQuality};

/// Accepts fix records. Implementations must be synchronous and
/// non-blocking from the mediator's standpoint; buffer internally if you
/// need queuing.
pub trait PositionSink: Send + Sync {
    fn accept(&self, fix: &Fix);
}

/// Applies the invalid-quality filter described in §4.8 before handing a
/// fix to an inner sink: base-kind fixes and rover fixes carrying
/// `system_status` bypass the filter, everything else with an invalid
/// quality is dropped silently.
pub struct FilteringSink<S: PositionSink> {
    inner: S,
}

impl<S: PositionSink> FilteringSink<S> {
    pub fn new(inner: S) -> Self {
        FilteringSink { inner }
    }
}

impl<S: PositionSink> PositionSink for FilteringSink<S> {
    fn accept(&self, fix: &Fix) {
        if fix.kind == FixKind::Rover
            && fix.quality == FixQuality::Invalid
            && !fix.bypasses_quality_filter()
        {
            return;
        }
        self.inner.accept(fix);
    }
}

/// A sink that just logs each accepted fix at info level.
pub struct LoggingSink;

impl PositionSink for LoggingSink {
    fn accept(&self, fix: &Fix) {
        info!(
            "fix kind={:?} quality={:?} lat={:.6} lon={:.6} alt={:.2}",
            fix.kind, fix.quality, fix.lat_deg, fix.lon_deg, fix.altitude_m
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        seen: Mutex<Vec<Fix>>,
    }

    impl PositionSink for CapturingSink {
        fn accept(&self, fix: &Fix) {
            self.seen.lock().unwrap().push(fix.clone());
        }
    }

    #[test]
    fn invalid_rover_fix_is_dropped() {
        let sink = FilteringSink::new(CapturingSink::default());
        let fix = Fix {
            kind: FixKind::Rover,
            quality: FixQuality::Invalid,
            ..Fix::default()
        };
        sink.accept(&fix);
        assert!(sink.inner.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn invalid_rover_fix_with_system_status_bypasses_filter() {
        let sink = FilteringSink::new(CapturingSink::default());
        let mut fix = Fix {
            kind: FixKind::Rover,
            quality: FixQuality::Invalid,
            ..Fix::default()
        };
        fix.extra.insert("system_status".into(), "degraded".into());
        sink.accept(&fix);
        assert_eq!(sink.inner.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn base_fix_always_passes_through() {
        let sink = FilteringSink::new(CapturingSink::default());
        let fix = Fix {
            kind: FixKind::Base,
            quality: FixQuality::Invalid,
            ..Fix::default()
        };
        sink.accept(&fix);
        assert_eq!(sink.inner.seen.lock().unwrap().len(), 1);
    }
}
