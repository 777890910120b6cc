//! Line framing for the sensor notification stream.
//!
//! Notifications arrive as arbitrary fragments of a newline-terminated text
//! stream (`FSR3: 42.5\n`). The [`FrameParser`] accumulates fragments and
//! yields one reading per complete, well-formed line. Partial lines stay
//! buffered until their terminator arrives; malformed lines are logged and
//! dropped without affecting the lines around them.

use bytes::BytesMut;
use time::OffsetDateTime;
use tracing::{trace, warn};

use fsrlink_types::{LINE_TERMINATOR, ParseError, SensorReading};

/// A complete line that was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedLine {
    /// The line as received (lossily decoded), terminator removed.
    pub line: String,
    /// Why it was rejected.
    pub error: ParseError,
}

impl MalformedLine {
    /// Log the rejection: empty lines at trace, everything else at warn.
    pub fn log(&self) {
        if self.error == ParseError::EmptyLine {
            trace!("Skipping empty line");
        } else {
            warn!(line = %self.line.escape_debug(), error = %self.error, "Dropping malformed line");
        }
    }
}

/// Outcome of framing one line.
pub type Frame = Result<SensorReading, MalformedLine>;

/// Accumulates fragments and splits them into readings.
///
/// ```
/// use fsrlink_core::FrameParser;
///
/// let mut parser = FrameParser::new();
/// assert_eq!(parser.ingest(b"FSR3: 4").count(), 0);
/// let readings: Vec<_> = parser.ingest(b"2.5\ntemp:1\nFSR1:7\n").collect();
/// assert_eq!(readings.len(), 2);
/// assert_eq!(readings[0].sensor_name.as_str(), "FSR3");
/// assert_eq!(readings[0].value, 42.5);
/// assert_eq!(readings[1].value, 7.0);
/// ```
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
}

impl FrameParser {
    /// Create a parser with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and iterate the readings it completes.
    ///
    /// Malformed lines are logged and skipped. Lines not pulled from the
    /// iterator stay buffered and are yielded by a later call.
    pub fn ingest(&mut self, fragment: &[u8]) -> Readings<'_> {
        Readings {
            frames: self.frames(fragment),
        }
    }

    /// Append a fragment and iterate every complete line, accepted or not.
    pub fn frames(&mut self, fragment: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(fragment);
        Frames { parser: self }
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn next_line(&mut self) -> Option<BytesMut> {
        let end = self.buffer.iter().position(|&b| b == LINE_TERMINATOR)?;
        let mut line = self.buffer.split_to(end + 1);
        line.truncate(end);
        Some(line)
    }
}

/// Iterator over every complete line in the buffer.
#[derive(Debug)]
pub struct Frames<'a> {
    parser: &'a mut FrameParser,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.parser.next_line()?;
        Some(classify(&line, OffsetDateTime::now_utc()))
    }
}

/// Iterator over the accepted readings in the buffer.
#[derive(Debug)]
pub struct Readings<'a> {
    frames: Frames<'a>,
}

impl Iterator for Readings<'_> {
    type Item = SensorReading;

    fn next(&mut self) -> Option<Self::Item> {
        for frame in self.frames.by_ref() {
            match frame {
                Ok(reading) => return Some(reading),
                Err(malformed) => malformed.log(),
            }
        }
        None
    }
}

fn classify(line: &[u8], observed_at: OffsetDateTime) -> Frame {
    let text = std::str::from_utf8(line).map_err(|_| MalformedLine {
        line: String::from_utf8_lossy(line).into_owned(),
        error: ParseError::InvalidUtf8,
    })?;
    SensorReading::parse_line(text, observed_at).map_err(|error| MalformedLine {
        line: text.to_string(),
        error,
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn line_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u32..100, -1.0e4f64..1.0e4).prop_map(|(i, v)| format!("FSR{i}:{v}")),
            (0u32..100, -1000i32..1000).prop_map(|(i, v)| format!(" FSR{i} : {v} ")),
            "[a-zA-Z0-9: .]{0,12}",
        ]
    }

    fn collect(parser: &mut FrameParser, fragment: &[u8]) -> Vec<(String, f64)> {
        parser
            .ingest(fragment)
            .map(|r| (r.sensor_name.to_string(), r.value))
            .collect()
    }

    proptest! {
        /// Any split of a byte stream yields the same readings as feeding it whole.
        #[test]
        fn fragmentation_invariance(
            lines in prop::collection::vec(line_strategy(), 0..20),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let stream: Vec<u8> = lines.iter().flat_map(|l| format!("{l}\n").into_bytes()).collect();

            let mut whole = FrameParser::new();
            let expected = collect(&mut whole, &stream);

            let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
            offsets.push(0);
            offsets.push(stream.len());
            offsets.sort_unstable();

            let mut split = FrameParser::new();
            let mut got = Vec::new();
            for pair in offsets.windows(2) {
                got.extend(collect(&mut split, &stream[pair[0]..pair[1]]));
            }

            prop_assert_eq!(got, expected);
            prop_assert_eq!(split.pending_len(), 0);
        }

        /// Arbitrary bytes never panic and never lose the unterminated tail.
        #[test]
        fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut parser = FrameParser::new();
            let _ = parser.ingest(&data).count();
            let tail = data.iter().rev().take_while(|&&b| b != b'\n').count();
            prop_assert_eq!(parser.pending_len(), tail);
        }
    }
}
