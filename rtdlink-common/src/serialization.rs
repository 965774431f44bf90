use crate::error::Result;
use crate::telemetry::{Batch, column_names};

/// File format for stored batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Comma-separated values with a header row (default).
    #[default]
    Csv,

    /// JSON array of records keyed by column name.
    Json,

    /// CBOR encoding of the same records (compact binary).
    Cbor,
}

impl Format {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Csv => "text/csv",
            Format::Json => "application/json",
            Format::Cbor => "application/cbor",
        }
    }

    /// File extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
            Format::Cbor => "cbor",
        }
    }
}

/// Encode a batch using the specified format.
///
/// CSV output always starts with the header row, even for an empty batch
/// (in which case it has no channel columns).
pub fn encode(batch: &Batch, format: Format) -> Result<Vec<u8>> {
    match format {
        Format::Csv => encode_csv(batch),
        Format::Json => Ok(serde_json::to_vec(batch)?),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(batch, &mut buf)?;
            Ok(buf)
        }
    }
}

fn encode_csv(batch: &Batch) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record(column_names(batch.channel_count()))?;
    for sample in batch {
        writer.write_record(sample.to_record())?;
    }

    writer
        .into_inner()
        .map_err(|e| crate::error::Error::Io(e.into_error()))
}
