// Line frame decoder
// Parses one transport line ("row,v0,v1,...") into a validated row of readings.
// The same function serves live input and session replay.

use thiserror::Error;

/// Reasons a line is rejected
/// Rejections are dropped by the caller and never abort a tick
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("No field delimiter in line")]
    NoDelimiter,

    #[error("Expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Field {field} is not a number")]
    NonNumeric { field: usize },

    #[error("Field {field} does not fit in 32 bits")]
    Overflow { field: usize },
}

/// One validated sensor row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow {
    /// Transmit line the readings belong to (not yet bounds-checked against tx)
    pub row_index: usize,

    /// One reading per receive line, `values.len() == rx`
    pub values: Vec<u32>,
}

/// Decoder bound to a fixed number of receive lines
#[derive(Debug, Clone, Copy)]
pub struct LineFrameDecoder {
    rx: usize,
}

impl LineFrameDecoder {
    pub fn new(rx: usize) -> Self {
        LineFrameDecoder { rx }
    }

    pub fn rx(&self) -> usize {
        self.rx
    }

    /// Decode a single line
    pub fn decode(&self, line: &str) -> Result<DecodedRow, DecodeError> {
        decode_line(line, self.rx)
    }
}

/// Remove everything except digits and commas (line noise, CR, stray bytes)
pub fn sanitize_line(line: &str) -> String {
    line.chars()
        .filter(|c| c.is_ascii_digit() || *c == ',')
        .collect()
}

/// Decode a line carrying `rx` readings
pub fn decode_line(line: &str, rx: usize) -> Result<DecodedRow, DecodeError> {
    let cleaned = sanitize_line(line);
    if !cleaned.contains(',') {
        return Err(DecodeError::NoDelimiter);
    }

    // Trailing empty fields are not counted, like a classic string split
    let trimmed = cleaned.trim_end_matches(',');
    let fields: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split(',').collect()
    };

    if fields.len() != rx + 1 {
        return Err(DecodeError::FieldCount {
            expected: rx + 1,
            found: fields.len(),
        });
    }

    let row_index = parse_field(0, fields[0])? as usize;
    let values = fields[1..]
        .iter()
        .enumerate()
        .map(|(i, field)| parse_field(i + 1, field))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedRow { row_index, values })
}

fn parse_field(field: usize, token: &str) -> Result<u32, DecodeError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::NonNumeric { field });
    }
    token
        .parse::<u32>()
        .map_err(|_| DecodeError::Overflow { field })
}
