//! Line-oriented event input for the command-line driver.
//!
//! Each line is `key [timestamp]`, separated by whitespace. A missing
//! timestamp is taken from the supplied clock. Blank lines and lines starting
//! with `#` are skipped.

use std::io::{self, BufRead};

use tokio::sync::mpsc;

use crate::clock::{Clock, HighWaterClock};
use crate::error::{LimiterError, Result};
use crate::ratelimit::RateLimiter;

/// Lines buffered between the reader thread and the admission loop.
const LINE_BUFFER: usize = 1024;

/// A parsed admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLine<'a> {
    pub key: &'a str,
    pub timestamp: i64,
}

/// Parse one input line.
///
/// Returns `Ok(None)` for lines that carry no event.
pub fn parse_event_line<'a>(line: &'a str, clock: &dyn Clock) -> Result<Option<EventLine<'a>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let key = fields.next().ok_or(LimiterError::InvalidKey)?;

    let timestamp = match fields.next() {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| LimiterError::InvalidTimestamp(raw.to_string()))?,
        None => clock.now(),
    };

    if let Some(extra) = fields.next() {
        return Err(LimiterError::InvalidTimestamp(format!(
            "unexpected trailing field '{}'",
            extra
        )));
    }

    Ok(Some(EventLine { key, timestamp }))
}

/// Outcome of one admitted-or-denied input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision<'a> {
    pub key: &'a str,
    pub timestamp: i64,
    pub allowed: bool,
}

/// Parse a line and run it through the limiter.
///
/// Every evaluated timestamp is first fed to `high_water`, which is the time
/// source a sweeper should use so it shares the input's timeline.
pub fn process_line<'a>(
    limiter: &RateLimiter,
    line: &'a str,
    clock: &dyn Clock,
    high_water: &HighWaterClock,
) -> Result<Option<Decision<'a>>> {
    let event = match parse_event_line(line, clock)? {
        Some(event) => event,
        None => return Ok(None),
    };

    high_water.observe(event.timestamp);
    let allowed = limiter.check_admission(event.key, event.timestamp)?;

    Ok(Some(Decision {
        key: event.key,
        timestamp: event.timestamp,
        allowed,
    }))
}

/// Read lines from `reader` on a dedicated OS thread.
///
/// Blocking reads cannot be cancelled, so they stay off the async runtime:
/// dropping the receiver abandons the thread instead of stalling shutdown.
/// The channel closes at EOF or after forwarding the first read error.
pub fn spawn_line_reader<R>(reader: R) -> io::Result<mpsc::Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_BUFFER);

    std::thread::Builder::new()
        .name("txgate-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        })?;

    Ok(rx)
}
