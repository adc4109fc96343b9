//! NMEA 0183 positioning provider.
//!
//! Reads `GGA` and `RMC` sentences (any talker id) from a GPS device node or
//! a recorded log file on a dedicated thread. Sentences without a valid fix
//! are ignored; malformed sentences are logged at debug level and skipped.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::provider::{PositionCallback, PositionProvider, Subscription, UpdateSettings};
use super::Position;
use crate::now_ms;

pub struct NmeaPositionProvider {
    path: PathBuf,
    follow: bool,
    poll: Duration,
    last: Arc<Mutex<Option<Position>>>,
}

impl NmeaPositionProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            follow: true,
            poll: Duration::from_millis(200),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Keep reading after end of file (device nodes, growing logs). When
    /// disabled the reader thread exits at end of file.
    pub fn with_follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }
}

impl PositionProvider for NmeaPositionProvider {
    fn subscribe(
        &self,
        settings: UpdateSettings,
        callback: PositionCallback,
    ) -> Result<Subscription> {
        let file = File::open(&self.path)
            .with_context(|| format!("open nmea source {}", self.path.display()))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let last = self.last.clone();
        let follow = self.follow;
        let poll = self.poll;
        let source = self.path.display().to_string();

        let join = std::thread::Builder::new()
            .name("nmea-reader".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(file);
                let mut throttle = settings.throttle();
                let mut raw = Vec::new();
                while !shutdown_thread.load(Ordering::SeqCst) {
                    raw.clear();
                    match reader.read_until(b'\n', &mut raw) {
                        Ok(0) if follow => {
                            std::thread::sleep(poll);
                            continue;
                        }
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => {
                            log::error!("nmea read from {} failed: {}", source, err);
                            break;
                        }
                    }
                    // Serial line noise is not UTF-8; such lines fail to parse below.
                    let line = String::from_utf8_lossy(&raw);
                    let received_at = now_ms().unwrap_or(0);
                    let position = match parse_sentence(&line, received_at) {
                        Ok(Some(position)) => position,
                        Ok(None) => continue,
                        Err(err) => {
                            log::debug!("skipping nmea sentence: {}", err);
                            continue;
                        }
                    };
                    if let Ok(mut slot) = last.lock() {
                        *slot = Some(position);
                    }
                    if throttle.admit(position, Instant::now()) {
                        callback(position);
                    }
                }
            })
            .context("spawn nmea reader thread")?;

        Ok(Subscription::new(shutdown, Some(join)))
    }

    fn last_known(&self) -> Option<Position> {
        self.last.lock().ok().and_then(|p| *p)
    }
}

/// Parse one NMEA sentence. Returns `Ok(None)` for sentence types other than
/// GGA/RMC and for sentences that report no fix.
pub fn parse_sentence(line: &str, received_at_ms: u64) -> Result<Option<Position>> {
    let line = line.trim();
    let body = line
        .strip_prefix('$')
        .ok_or_else(|| anyhow!("sentence does not start with '$'"))?;
    let body = match body.split_once('*') {
        Some((body, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16)
                .map_err(|_| anyhow!("invalid checksum field '{}'", checksum))?;
            let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
            if actual != expected {
                return Err(anyhow!(
                    "checksum mismatch: expected {:02X}, computed {:02X}",
                    expected,
                    actual
                ));
            }
            body
        }
        None => body,
    };

    let fields: Vec<&str> = body.split(',').collect();
    let kind = fields[0];
    if !kind.is_ascii() || kind.len() < 3 {
        return Err(anyhow!("invalid sentence type '{}'", kind));
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or("");

    let (lat, ns, lon, ew) = match &kind[kind.len() - 3..] {
        "GGA" => {
            let quality = field(6);
            if quality.is_empty() || quality == "0" {
                return Ok(None);
            }
            (field(2), field(3), field(4), field(5))
        }
        "RMC" => {
            if field(2) != "A" {
                return Ok(None);
            }
            (field(3), field(4), field(5), field(6))
        }
        _ => return Ok(None),
    };

    let (Some(latitude), Some(longitude)) = (
        parse_coordinate(lat, ns, 'S')?,
        parse_coordinate(lon, ew, 'W')?,
    ) else {
        return Ok(None);
    };
    Ok(Some(Position::new(latitude, longitude, received_at_ms)))
}

/// `ddmm.mmmm` / `dddmm.mmmm` to signed decimal degrees.
fn parse_coordinate(value: &str, hemisphere: &str, negative: char) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }
    let raw: f64 = value
        .parse()
        .map_err(|_| anyhow!("invalid coordinate '{}'", value))?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    if minutes >= 60.0 {
        return Err(anyhow!("invalid minutes in coordinate '{}'", value));
    }
    let decimal = degrees + minutes / 60.0;
    Ok(Some(if hemisphere.starts_with(negative) {
        -decimal
    } else {
        decimal
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(body: &str) -> String {
        let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}", body, sum)
    }

    #[test]
    fn parses_gga_fix() -> Result<()> {
        let line = with_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        let position = parse_sentence(&line, 42)?.expect("fix");
        assert!((position.latitude - 48.1173).abs() < 1e-4);
        assert!((position.longitude - 11.516_666).abs() < 1e-4);
        assert_eq!(position.timestamp_ms, 42);
        Ok(())
    }

    #[test]
    fn parses_rmc_in_southern_western_hemisphere() -> Result<()> {
        let line = with_checksum("GNRMC,081836,A,3751.65,S,14507.36,W,000.0,360.0,130998,011.3,E");
        let position = parse_sentence(&line, 0)?.expect("fix");
        assert!(position.latitude < 0.0);
        assert!(position.longitude < 0.0);
        assert!((position.latitude + 37.860_833).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn ignores_sentences_without_fix() -> Result<()> {
        let no_fix = with_checksum("GPGGA,123519,,,,,0,00,,,M,,M,,");
        assert!(parse_sentence(&no_fix, 0)?.is_none());
        let void = with_checksum("GPRMC,081836,V,3751.65,S,14507.36,E,,,130998,,");
        assert!(parse_sentence(&void, 0)?.is_none());
        let other = with_checksum("GPGSV,3,1,11,03,03,111,00");
        assert!(parse_sentence(&other, 0)?.is_none());
        Ok(())
    }

    #[test]
    fn rejects_bad_checksum() {
        let line = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*00";
        assert!(parse_sentence(line, 0).is_err());
        assert!(parse_sentence("GPGGA,1", 0).is_err());
    }

    #[test]
    fn rejects_non_ascii_sentence_type() {
        assert!(parse_sentence("$éé,1,2", 0).is_err());
        assert!(parse_sentence("$GPéGA,1,2", 0).is_err());
        assert!(parse_sentence(&with_checksum("GPGé"), 0).is_err());
    }

    fn wait_for_fixes(seen: &Mutex<Vec<Position>>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn reader_thread_skips_non_utf8_noise() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("noisy.nmea");
        let mut bytes = b"\xff\xfe noise\n".to_vec();
        bytes.extend_from_slice(
            with_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,")
                .as_bytes(),
        );
        bytes.push(b'\n');
        std::fs::write(&path, bytes)?;

        let provider = NmeaPositionProvider::new(&path).with_follow(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = provider.subscribe(
            UpdateSettings::default(),
            Box::new(move |p| sink.lock().unwrap().push(p)),
        )?;
        wait_for_fixes(&seen, 1);
        subscription.cancel()?;

        assert_eq!(seen.lock().unwrap().len(), 1);
        let last = provider.last_known().expect("fix after noise");
        assert!((last.latitude - 48.1173).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn reader_thread_delivers_fixes_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("track.nmea");
        let lines = [
            with_checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
            "garbage".to_string(),
            with_checksum("GPGGA,123520,4808.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"),
        ];
        std::fs::write(&path, lines.join("\r\n"))?;

        let provider = NmeaPositionProvider::new(&path).with_follow(false);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = provider.subscribe(
            UpdateSettings::default(),
            Box::new(move |p| sink.lock().unwrap().push(p)),
        )?;
        wait_for_fixes(&seen, 2);
        subscription.cancel()?;

        // ~1.8 km apart, so the distance rule admits both.
        assert_eq!(seen.lock().unwrap().len(), 2);
        let last = provider.last_known().expect("last fix");
        assert!((last.latitude - 48.1340).abs() < 1e-3);
        Ok(())
    }
}
