//! Streams match records to a sink as one JSON array.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cursor::{close_after, MatchCursor};
use crate::error::{MatchError, Result};

const OPEN_BRACKET: &[u8] = b"[";
const COMMA_WITH_NEW_LINE: &[u8] = b",\n";
const CLOSE_BRACKET: &[u8] = b"]";

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(15);

// ------------- ProgressTimer -------------
/// Rate limiter for progress logging of long running exports.
#[derive(Debug)]
pub struct ProgressTimer {
    started: Instant,
    last: Instant,
    interval: Duration,
}

impl ProgressTimer {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
            interval,
        }
    }
    /// True at most once per interval.
    pub fn has_interval_passed(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Writes every record of `cursor` as `[r1,\nr2,\n...]` and returns how many
/// were written.
///
/// Only the record in flight is held in memory. The cursor is closed on
/// every exit path; a close failure is logged and never replaces the
/// outcome of the write. If the sink goes away mid-stream the result is
/// [`MatchError::SinkClosed`] and nothing more is pulled from the cursor.
pub fn write_json_array<C, W>(cursor: &mut C, sink: &mut W, progress_interval: Duration, source: &str) -> Result<u64>
where
    C: MatchCursor + ?Sized,
    W: Write + ?Sized,
{
    let mut timer = ProgressTimer::new(progress_interval);
    let outcome = copy_records(cursor, sink, &mut timer, source);
    let outcome = close_after(cursor, outcome, source);
    match &outcome {
        Ok(count) => debug!(
            source,
            count,
            elapsed_seconds = timer.elapsed_seconds(),
            "wrote matches"
        ),
        Err(MatchError::SinkClosed { written }) => debug!(
            source,
            written,
            elapsed_seconds = timer.elapsed_seconds(),
            "sink closed before all matches were written"
        ),
        Err(_) => {}
    }
    outcome
}

fn copy_records<C, W>(cursor: &mut C, sink: &mut W, timer: &mut ProgressTimer, source: &str) -> Result<u64>
where
    C: MatchCursor + ?Sized,
    W: Write + ?Sized,
{
    let mut count = 0u64;
    sink.write_all(OPEN_BRACKET).map_err(|e| sink_error(e, count))?;
    while let Some(record) = cursor.next_match()? {
        let json = serde_json::to_vec(&record)?;
        if count > 0 {
            sink.write_all(COMMA_WITH_NEW_LINE).map_err(|e| sink_error(e, count))?;
        }
        sink.write_all(&json).map_err(|e| sink_error(e, count))?;
        count += 1;
        if timer.has_interval_passed() {
            debug!(source, count, "data written for matches");
        }
    }
    sink.write_all(CLOSE_BRACKET).map_err(|e| sink_error(e, count))?;
    sink.flush().map_err(|e| sink_error(e, count))?;
    Ok(count)
}

fn sink_error(e: io::Error, written: u64) -> MatchError {
    match e.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::WriteZero => MatchError::SinkClosed { written },
        _ => MatchError::Io(e.to_string()),
    }
}
