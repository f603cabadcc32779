//! CSV writer for decoded events.

use eventraw_core::{ExposureEvent, PolarityEvent};
use std::io::{BufWriter, Write};
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// One column of the event part of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    T,
    X,
    Y,
    P,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Self::T => "t",
            Self::X => "x",
            Self::Y => "y",
            Self::P => "p",
        }
    }
}

/// Column order of the event fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOrder([Field; 4]);

impl Default for FieldOrder {
    fn default() -> Self {
        Self([Field::T, Field::X, Field::Y, Field::P])
    }
}

impl std::str::FromStr for FieldOrder {
    type Err = OutputError;

    /// Parses a field order from a format string like "t,x,y,p" or "x,y,p,t".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split(',').map(|p| p.trim().to_lowercase()).collect();

        if parts.len() != 4 {
            return Err(OutputError::InvalidFormat(
                "Format must have exactly 4 fields: t, x, y, p".to_string(),
            ));
        }

        let mut fields = [Field::T; 4];
        for (i, part) in parts.iter().enumerate() {
            let field = match part.as_str() {
                "t" | "time" | "timestamp" => Field::T,
                "x" => Field::X,
                "y" => Field::Y,
                "p" | "pol" | "polarity" => Field::P,
                _ => {
                    return Err(OutputError::InvalidFormat(format!(
                        "Unknown field: {}. Use t, x, y, p",
                        part
                    )))
                }
            };

            if fields[..i].contains(&field) {
                return Err(OutputError::InvalidFormat(format!(
                    "Duplicate field: {}",
                    part
                )));
            }
            fields[i] = field;
        }

        Ok(Self(fields))
    }
}

impl FieldOrder {
    /// Returns the CSV header line for this field order.
    pub fn header(&self, exposure: bool) -> String {
        let mut names: Vec<&str> = self.0.iter().map(|f| f.name()).collect();
        if exposure {
            names.push("exposure");
        }
        names.join(",")
    }
}

/// CSV output writer.
///
/// Polarity and exposure events share the same columns; exposure rows carry
/// one more column holding the `is_second_threshold_crossing` flag.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W, field_order: FieldOrder) -> Self {
        Self {
            writer: BufWriter::new(writer),
            field_order,
        }
    }

    /// Writes the column names.
    pub fn write_header(&mut self, exposure: bool) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", self.field_order.header(exposure))?;
        Ok(())
    }

    #[inline]
    fn write_fields(&mut self, t: u64, x: u16, y: u16, polarity: bool) -> std::io::Result<()> {
        let [a, b, c, d] = self.field_order.0.map(|field| match field {
            Field::T => t,
            Field::X => x as u64,
            Field::Y => y as u64,
            Field::P => polarity as u64,
        });
        write!(self.writer, "{},{},{},{}", a, b, c, d)
    }

    /// Writes a single polarity event.
    #[inline]
    pub fn write_polarity(&mut self, event: &PolarityEvent) -> std::io::Result<()> {
        self.write_fields(event.t, event.x, event.y, event.polarity)?;
        writeln!(self.writer)
    }

    /// Writes a single exposure event.
    #[inline]
    pub fn write_exposure(&mut self, event: &ExposureEvent) -> std::io::Result<()> {
        self.write_fields(event.t, event.x, event.y, event.polarity)?;
        writeln!(self.writer, ",{}", event.is_second_threshold_crossing as u8)
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventraw_core::Channel;
    use std::str::FromStr;

    #[test]
    fn test_field_order_parsing() {
        assert_eq!(FieldOrder::from_str("t,x,y,p").unwrap(), FieldOrder::default());
        assert_eq!(
            FieldOrder::from_str("X, Y, Polarity, Time").unwrap(),
            FieldOrder([Field::X, Field::Y, Field::P, Field::T])
        );
    }

    #[test]
    fn test_field_order_invalid() {
        assert!(FieldOrder::from_str("x,y,z,t").is_err());
        assert!(FieldOrder::from_str("x,y,p").is_err());
        assert!(FieldOrder::from_str("x,x,y,t").is_err());
    }

    #[test]
    fn test_csv_writer() {
        let mut output = Vec::new();
        {
            let mut writer = CsvWriter::new(&mut output, FieldOrder::default());
            writer.write_header(false).unwrap();
            writer
                .write_polarity(&PolarityEvent::new(12345, 100, 200, true))
                .unwrap();
            writer
                .write_polarity(&PolarityEvent::new(12346, 101, 201, false))
                .unwrap();
            writer.flush().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        assert_eq!(
            output_str,
            "t,x,y,p\n12345,100,200,1\n12346,101,201,0\n"
        );
    }

    #[test]
    fn test_csv_writer_exposure_rows() {
        let mut output = Vec::new();
        {
            let order = FieldOrder::from_str("x,y,p,t").unwrap();
            let mut writer = CsvWriter::new(&mut output, order);
            writer.write_header(true).unwrap();
            let event = PolarityEvent::new(7, 3, 4, false).into_exposure(Channel::Exposure);
            writer.write_exposure(&event).unwrap();
            writer.flush().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        assert_eq!(output_str, "x,y,p,t,exposure\n3,4,0,7,1\n");
    }
}
