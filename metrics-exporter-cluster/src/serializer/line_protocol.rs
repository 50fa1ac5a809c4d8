use std::fmt::{self, Write as _};

use crate::metric::{FieldValue, Metric};

use super::{SerializeError, Serializer};

const MEASUREMENT_ESCAPES: &[char] = &[',', ' '];
const KEY_ESCAPES: &[char] = &[',', '=', ' '];
const STRING_ESCAPES: &[char] = &['"', '\\'];

struct ValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
}

impl ValueFormatter {
    fn new() -> Self {
        Self { int_writer: itoa::Buffer::new(), float_writer: ryu::Buffer::new() }
    }

    fn write<W: fmt::Write>(&mut self, w: &mut W, value: &FieldValue) -> fmt::Result {
        match value {
            FieldValue::Float(v) => w.write_str(self.float_writer.format(*v)),
            FieldValue::Integer(v) => {
                w.write_str(self.int_writer.format(*v))?;
                w.write_char('i')
            }
            FieldValue::UInteger(v) => {
                w.write_str(self.int_writer.format(*v))?;
                w.write_char('u')
            }
            FieldValue::Boolean(v) => w.write_str(if *v { "true" } else { "false" }),
            FieldValue::String(v) => {
                w.write_char('"')?;
                escape(w, v, STRING_ESCAPES)?;
                w.write_char('"')
            }
        }
    }
}

fn escape<W: fmt::Write>(w: &mut W, s: &str, escapes: &[char]) -> fmt::Result {
    for c in s.chars() {
        if c == '\n' {
            w.write_str("\\n")?;
            continue;
        }

        if escapes.contains(&c) {
            w.write_char('\\')?;
        }
        w.write_char(c)?;
    }

    Ok(())
}

/// Renders a metric as a single line protocol line, without the trailing newline.
///
/// Returns the number of fields written. Tags with an empty name or value, and non-finite floating-point fields, are
/// left out since InfluxDB rejects them. When no field is written, the timestamp is left out as well.
pub(crate) fn render<W: fmt::Write>(w: &mut W, metric: &Metric) -> Result<usize, fmt::Error> {
    escape(w, metric.name(), MEASUREMENT_ESCAPES)?;

    for (name, value) in metric.tags() {
        if name.is_empty() || value.is_empty() {
            continue;
        }

        w.write_char(',')?;
        escape(w, name, KEY_ESCAPES)?;
        w.write_char('=')?;
        escape(w, value, KEY_ESCAPES)?;
    }

    let mut formatter = ValueFormatter::new();
    let mut fields_written = 0;
    for (name, value) in metric.fields() {
        if matches!(value, FieldValue::Float(v) if !v.is_finite()) {
            continue;
        }

        w.write_char(if fields_written == 0 { ' ' } else { ',' })?;
        escape(w, name, KEY_ESCAPES)?;
        w.write_char('=')?;
        formatter.write(w, value)?;
        fields_written += 1;
    }

    if fields_written > 0 {
        w.write_char(' ')?;
        w.write_str(formatter.int_writer.format(metric.unix_nanos()))?;
    }

    Ok(fields_written)
}

/// Serializes metrics in the InfluxDB line protocol.
///
/// Timestamps are written with nanosecond precision.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineProtocolSerializer;

impl Serializer for LineProtocolSerializer {
    fn serialize(&self, metric: &Metric) -> Result<Vec<u8>, SerializeError> {
        let mut line = String::new();

        // Writing into a `String` never fails.
        let fields_written = render(&mut line, metric).unwrap_or(0);
        if fields_written == 0 {
            return Err(SerializeError::NoSerializableFields { measurement: metric.name().to_string() });
        }

        line.push('\n');
        Ok(line.into_bytes())
    }
}
