// Line-delimited reading parser
//
// Splits a byte stream on '\n' and parses each line as one float. Lines that
// are not valid UTF-8 or not a finite number are dropped without surfacing an
// error; only transport failures end the stream.

use crate::types::{Reading, ReadingSink, StreamResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::trace;

/// Parse one candidate line. Returns `None` for anything malformed.
pub fn parse_reading(line: &str) -> Option<Reading> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Longest line accepted as a candidate reading. Anything longer is noise
/// (wrong baud rate, binary garbage) and is skipped up to the next newline.
pub const MAX_LINE_LEN: usize = 64;

/// Lazy, unbounded sequence of readings over a buffered byte stream.
/// Memory use stays bounded by `MAX_LINE_LEN` however long a line gets.
pub struct LineReadings<R> {
    reader: R,
    line: Vec<u8>,
    dropped: u64,
}

impl<R: AsyncBufRead + Unpin> LineReadings<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(MAX_LINE_LEN),
            dropped: 0,
        }
    }

    /// Next valid reading. `Ok(None)` at end of stream, `Err` if the
    /// transport fails.
    pub async fn next_reading(&mut self) -> StreamResult<Option<Reading>> {
        loop {
            let Some(overlong) = self.read_line().await? else {
                return Ok(None);
            };

            let parsed = if overlong {
                None
            } else {
                std::str::from_utf8(&self.line).ok().and_then(parse_reading)
            };
            match parsed {
                Some(value) => return Ok(Some(value)),
                None => {
                    self.dropped += 1;
                    trace!(
                        "Dropped malformed line: {:?}{}",
                        String::from_utf8_lossy(&self.line),
                        if overlong { " (over-long)" } else { "" }
                    );
                }
            }
        }
    }

    /// Fill `self.line` with the next line, without its newline. Returns
    /// `None` at end of stream and `Some(true)` when the line was longer
    /// than `MAX_LINE_LEN` and was discarded.
    async fn read_line(&mut self) -> StreamResult<Option<bool>> {
        self.line.clear();
        let mut overlong = false;
        let mut seen_any = false;

        loop {
            let (consumed, done) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    if !seen_any {
                        return Ok(None);
                    }
                    break;
                }
                seen_any = true;

                let (chunk, consumed, done) = match available.iter().position(|&b| b == b'\n') {
                    Some(i) => (&available[..i], i + 1, true),
                    None => (available, available.len(), false),
                };
                if !overlong {
                    if self.line.len() + chunk.len() > MAX_LINE_LEN {
                        overlong = true;
                        self.line.clear();
                    } else {
                        self.line.extend_from_slice(chunk);
                    }
                }
                (consumed, done)
            };

            AsyncBufReadExt::consume(&mut self.reader, consumed);
            if done {
                break;
            }
        }

        Ok(Some(overlong))
    }

    /// Number of malformed lines skipped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Forward every valid reading from `reader` into `sink` until the stream
/// ends or fails.
pub async fn pump_readings<R>(reader: R, sink: &dyn ReadingSink) -> StreamResult<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut readings = LineReadings::new(reader);
    let mut forwarded = 0u64;
    while let Some(value) = readings.next_reading().await? {
        sink.publish(value);
        forwarded += 1;
    }
    Ok(forwarded)
}
