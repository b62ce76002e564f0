//! NMEA-0183 line framer and sentence decoder.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use log::warn;
use serde::Deserialize;

use crate::checksum::nmea_xor;

const ACCUMULATOR_HARD_CAP: usize = 10_000;
const ACCUMULATOR_TRIM_TO: usize = 5_000;

/// Sentence types the parser knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SentenceType {
    Gga,
    Rmc,
    Gll,
}

impl SentenceType {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "GGA" => Some(SentenceType::Gga),
            "RMC" => Some(SentenceType::Rmc),
            "GLL" => Some(SentenceType::Gll),
            _ => None,
        }
    }
}

/// Fix-quality tag, collapsing any out-of-range integer to `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    Invalid,
    Gps,
    Dgps,
    Pps,
    RtkFixed,
    RtkFloat,
    Estimated,
    Manual,
    Simulation,
}

impl FixQuality {
    fn from_raw(v: i64) -> Self {
        match v {
            1 => FixQuality::Gps,
            2 => FixQuality::Dgps,
            3 => FixQuality::Pps,
            4 => FixQuality::RtkFixed,
            5 => FixQuality::RtkFloat,
            6 => FixQuality::Estimated,
            7 => FixQuality::Manual,
            8 => FixQuality::Simulation,
            _ => FixQuality::Invalid,
        }
    }

    pub fn is_valid(self) -> bool {
        !matches!(self, FixQuality::Invalid)
    }
}

/// Whether a fix originated from the rover's own receiver or was decoded
/// from a base-station correction frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixKind {
    Rover,
    Base,
}

/// A single position/velocity fix, assembled incrementally by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub altitude_m: f64,
    pub quality: FixQuality,
    pub satellites: u32,
    pub hdop: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub speed_kmh: f64,
    pub course_deg: f64,
    pub age_of_corrections_s: f64,
    pub reference_station_id: u32,
    pub kind: FixKind,
    pub extra: HashMap<String, String>,
}

impl Default for Fix {
    fn default() -> Self {
        Fix {
            lat_deg: 0.0,
            lon_deg: 0.0,
            altitude_m: 0.0,
            quality: FixQuality::Invalid,
            satellites: 0,
            hdop: 0.0,
            timestamp: None,
            speed_kmh: 0.0,
            course_deg: 0.0,
            age_of_corrections_s: 0.0,
            reference_station_id: 0,
            kind: FixKind::Rover,
            extra: HashMap::new(),
        }
    }
}

impl Fix {
    /// `true` if this fix should bypass the sink's invalid-quality filter.
    pub fn bypasses_quality_filter(&self) -> bool {
        self.kind == FixKind::Base || self.extra.contains_key("system_status")
    }
}

/// One method per sentence type — an explicit fixed-field handler rather
/// than a dynamic string-keyed dispatch table.
///
/// Handlers receive the rolling fix by mutable reference so they can tag it
/// (e.g. set `system_status` in `extra`) before the mediator forwards it to
/// the sink.
pub trait NmeaSentenceHandler {
    fn on_gga(&self, raw: &str, fields: &[&str], fix: &mut Fix) {
        let _ = (raw, fields, fix);
    }
    fn on_rmc(&self, raw: &str, fields: &[&str], fix: &mut Fix) {
        let _ = (raw, fields, fix);
    }
    fn on_gll(&self, raw: &str, fields: &[&str], fix: &mut Fix) {
        let _ = (raw, fields, fix);
    }
}

/// Parses `ddmm.mmmm` into signed decimal degrees.
fn parse_nmea_coordinate(raw: &str, hemisphere: &str) -> f64 {
    let v: f64 = raw.parse().unwrap_or(0.0);
    let whole_degrees = (v / 100.0).trunc();
    let minutes = v - 100.0 * whole_degrees;
    let mut decimal = whole_degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }
    decimal
}

fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let (hhmmss, frac) = match raw.split_once('.') {
        Some((h, f)) => (h, f),
        None => (raw, ""),
    };
    if hhmmss.len() < 6 {
        return None;
    }
    let h: u32 = hhmmss[0..2].parse().ok()?;
    let m: u32 = hhmmss[2..4].parse().ok()?;
    let s: u32 = hhmmss[4..6].parse().ok()?;
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<9}", frac);
        padded[..9].parse().unwrap_or(0)
    };
    NaiveTime::from_hms_nano_opt(h, m, s, nanos)
}

/// Streaming NMEA parser: feed it raw receiver bytes, it surfaces decoded
/// fixes to registered callbacks as complete lines arrive.
pub struct NmeaParser<H: NmeaSentenceHandler> {
    accumulator: String,
    fix: Fix,
    enabled: Vec<SentenceType>,
    handler: H,
    checksum_errors: u64,
}

impl<H: NmeaSentenceHandler> NmeaParser<H> {
    pub fn new(enabled: Vec<SentenceType>, handler: H) -> Self {
        NmeaParser {
            accumulator: String::new(),
            fix: Fix::default(),
            enabled,
            handler,
            checksum_errors: 0,
        }
    }

    pub fn checksum_errors(&self) -> u64 {
        self.checksum_errors
    }

    pub fn current_fix(&self) -> &Fix {
        &self.fix
    }

    /// Feed a chunk of raw bytes from the serial device.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.accumulator
            .push_str(&String::from_utf8_lossy(chunk));

        if self.accumulator.len() > ACCUMULATOR_HARD_CAP && !self.accumulator.contains('\n') {
            warn!(
                "nmea accumulator overrun ({} bytes), truncating to trailing {} bytes",
                self.accumulator.len(),
                ACCUMULATOR_TRIM_TO
            );
            let trimmed_start = self.accumulator.len() - ACCUMULATOR_TRIM_TO;
            self.accumulator = self.accumulator[trimmed_start..].to_string();
        }

        while let Some(newline_idx) = self.accumulator.find('\n') {
            let line = self.accumulator[..newline_idx].trim().to_string();
            self.accumulator.drain(..=newline_idx);
            if !line.is_empty() {
                self.process_line(&line);
            }
        }
    }

    fn process_line(&mut self, line: &str) {
        if !line.starts_with('$') {
            return;
        }
        let body = &line[1..];
        let star = match body.find('*') {
            Some(idx) => idx,
            None => return,
        };
        let (payload, tail) = body.split_at(star);
        let hex = &tail[1..];
        if hex.len() != 2 {
            return;
        }
        let expected = match u8::from_str_radix(hex, 16) {
            Ok(v) => v,
            Err(_) => return,
        };
        if nmea_xor(payload.as_bytes()) != expected {
            self.checksum_errors += 1;
            return;
        }

        let fields: Vec<&str> = payload.split(',').collect();
        if fields.is_empty() || fields[0].len() < 3 {
            return;
        }
        let tag = &fields[0][fields[0].len() - 3..];
        let sentence_type = match SentenceType::from_tag(tag) {
            Some(t) => t,
            None => return,
        };
        if !self.enabled.contains(&sentence_type) {
            return;
        }

        match sentence_type {
            SentenceType::Gga => self.decode_gga(line, &fields),
            SentenceType::Rmc => self.decode_rmc(line, &fields),
            SentenceType::Gll => self.decode_gll(line, &fields),
        }
    }

    fn decode_gga(&mut self, raw: &str, fields: &[&str]) {
        if fields.len() < 15 {
            return;
        }
        let time_of_day = parse_time_of_day(fields[1]);
        let lat = parse_nmea_coordinate(fields[2], fields[3]);
        let lon = parse_nmea_coordinate(fields[4], fields[5]);
        let quality_raw: i64 = fields[6].parse().unwrap_or(0);
        let satellites: u32 = fields[7].parse().unwrap_or(0);
        let hdop: f64 = fields[8].parse().unwrap_or(0.0);
        let altitude: f64 = fields[9].parse().unwrap_or(0.0);
        let age: f64 = fields[13].parse().unwrap_or(0.0);
        let station_id: u32 = fields[14].parse().unwrap_or(0);

        self.fix.lat_deg = lat;
        self.fix.lon_deg = lon;
        self.fix.altitude_m = altitude;
        self.fix.quality = FixQuality::from_raw(quality_raw);
        self.fix.satellites = satellites;
        self.fix.hdop = hdop;
        self.fix.age_of_corrections_s = age;
        self.fix.reference_station_id = station_id;
        self.fix.kind = FixKind::Rover;
        if let Some(t) = time_of_day {
            self.fix.timestamp = Some(stamp_today(t));
        }

        self.handler.on_gga(raw, fields, &mut self.fix);
    }

    fn decode_rmc(&mut self, raw: &str, fields: &[&str]) {
        if fields.len() < 12 {
            return;
        }
        if fields[2] != "A" {
            self.handler.on_rmc(raw, fields, &mut self.fix);
            return;
        }
        let time_of_day = parse_time_of_day(fields[1]);
        let lat = parse_nmea_coordinate(fields[3], fields[4]);
        let lon = parse_nmea_coordinate(fields[5], fields[6]);
        let speed_knots: f64 = fields[7].parse().unwrap_or(0.0);
        let course: f64 = fields[8].parse().unwrap_or(0.0);
        let date_raw = fields[9];

        self.fix.lat_deg = lat;
        self.fix.lon_deg = lon;
        self.fix.speed_kmh = speed_knots * 1.852;
        self.fix.course_deg = course;
        self.fix.kind = FixKind::Rover;

        if let (Some(t), Some(d)) = (time_of_day, parse_ddmmyy(date_raw)) {
            self.fix.timestamp = Some(Utc.from_utc_datetime(&d.and_time(t)));
        }

        self.handler.on_rmc(raw, fields, &mut self.fix);
    }

    fn decode_gll(&mut self, raw: &str, fields: &[&str]) {
        if fields.len() < 7 {
            return;
        }
        let lat = parse_nmea_coordinate(fields[1], fields[2]);
        let lon = parse_nmea_coordinate(fields[3], fields[4]);
        let time_of_day = parse_time_of_day(fields[5]);
        let status = fields[6];

        self.fix.lat_deg = lat;
        self.fix.lon_deg = lon;
        self.fix.quality = if status == "A" {
            FixQuality::Gps
        } else {
            FixQuality::Invalid
        };
        self.fix.kind = FixKind::Rover;
        if let Some(t) = time_of_day {
            self.fix.timestamp = Some(stamp_today(t));
        }

        self.handler.on_gll(raw, fields, &mut self.fix);
    }
}

fn stamp_today(t: NaiveTime) -> DateTime<Utc> {
    let today = Utc::now().date_naive();
    Utc.from_utc_datetime(&today.and_time(t))
}

fn parse_ddmmyy(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 6 {
        return None;
    }
    let d: u32 = raw[0..2].parse().ok()?;
    let m: u32 = raw[2..4].parse().ok()?;
    let y: i32 = raw[4..6].parse().ok()?;
    // Century pivot: two-digit years below 80 are 2000s, at/above are 1900s.
    let year = if y < 80 { 2000 + y } else { 1900 + y };
    NaiveDate::from_ymd_opt(year, m, d)
}
