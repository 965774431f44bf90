use chrono::{DateTime, Local};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

/// Timestamp layout for samples on the wire and in stored batches.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of the leading column in every rendered record.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// One decoded input register: a fixed-point value in tenths.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Reading(f64);

impl Reading {
    /// Scale applied to the raw register value.
    pub const SCALE: f64 = 0.1;

    /// Convert a raw big-endian register value into a reading.
    pub fn from_raw(raw: u16) -> Self {
        Self(f64::from(raw) * Self::SCALE)
    }

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Value rounded to tenths, the register resolution.
    pub fn rounded(self) -> f64 {
        (self.0 * 10.0).round() / 10.0
    }
}

/// Serialized at register resolution, matching the rendered form.
impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.rounded())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// Column name for a zero-based channel index (`channel_1`, `channel_2`, ...).
pub fn channel_name(index: usize) -> String {
    format!("channel_{}", index + 1)
}

/// Full column order for records with `channels` readings.
pub fn column_names(channels: usize) -> Vec<String> {
    std::iter::once(TIMESTAMP_COLUMN.to_string())
        .chain((0..channels).map(channel_name))
        .collect()
}

/// A timestamp plus one reading per channel. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    timestamp: DateTime<Local>,
    readings: Vec<Reading>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Local>, readings: Vec<Reading>) -> Self {
        Self {
            timestamp,
            readings,
        }
    }

    /// Create a sample stamped with the current local time.
    pub fn now(readings: Vec<Reading>) -> Self {
        Self::new(Local::now(), readings)
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn channel_count(&self) -> usize {
        self.readings.len()
    }

    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Render as a comma-separated record: timestamp first, then each channel.
    ///
    /// No trailing newline; line framing belongs to the transport.
    pub fn to_line(&self) -> String {
        let mut line = self.timestamp_string();
        for reading in &self.readings {
            line.push(',');
            line.push_str(&reading.to_string());
        }
        line
    }

    /// Record fields in column order, as strings.
    pub fn to_record(&self) -> Vec<String> {
        std::iter::once(self.timestamp_string())
            .chain(self.readings.iter().map(Reading::to_string))
            .collect()
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.readings.len() + 1))?;
        map.serialize_entry(TIMESTAMP_COLUMN, &self.timestamp_string())?;
        for (index, reading) in self.readings.iter().enumerate() {
            map.serialize_entry(&channel_name(index), reading)?;
        }
        map.end()
    }
}

/// Samples accumulated between two flushes, in arrival order.
///
/// A batch has exactly one owner at a time. Flushing moves it out with
/// [`Batch::take`], leaving an empty batch behind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Batch {
    samples: Vec<Sample>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    /// Channel count of the first sample, or 0 for an empty batch.
    pub fn channel_count(&self) -> usize {
        self.samples.first().map(Sample::channel_count).unwrap_or(0)
    }

    /// Move the accumulated samples out, leaving this batch empty.
    pub fn take(&mut self) -> Batch {
        std::mem::take(self)
    }
}

impl From<Vec<Sample>> for Batch {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
