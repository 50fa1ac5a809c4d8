use crate::metric::{FieldValue, Metric};

use super::{SerializeError, Serializer};

/// Template used when none is configured.
pub const DEFAULT_GRAPHITE_TEMPLATE: &str = "host.tags.measurement.field";

#[derive(Clone, Debug, PartialEq, Eq)]
enum TemplatePart {
    Measurement,
    Field,
    Host,
    Tags,
    Tag(String),
}

impl TemplatePart {
    fn parse(part: &str) -> Self {
        match part {
            "measurement" => TemplatePart::Measurement,
            "field" => TemplatePart::Field,
            "host" => TemplatePart::Host,
            "tags" => TemplatePart::Tags,
            tag => TemplatePart::Tag(tag.to_string()),
        }
    }
}

/// Serializes metrics in the Graphite plaintext protocol.
///
/// Every numeric field of a metric becomes its own `<bucket> <value> <unix seconds>` line. The bucket name is built
/// from the template: a dot-separated list where `measurement` is the measurement name, `field` is the field name
/// (left out for fields named `value`), `host` is the value of the `host` tag, `tags` is the value of every other tag
/// ordered by tag name, and any other word is replaced by the value of the tag with that name.
#[derive(Clone, Debug)]
pub struct GraphiteSerializer {
    prefix: Option<String>,
    parts: Vec<TemplatePart>,
}

impl GraphiteSerializer {
    /// Creates a new `GraphiteSerializer`.
    ///
    /// # Errors
    ///
    /// If the template is empty, contains whitespace, or contains an empty part, an error is returned.
    pub fn new(prefix: Option<&str>, template: &str) -> Result<Self, SerializeError> {
        let invalid = |reason| SerializeError::InvalidTemplate { template: template.to_string(), reason };

        if template.is_empty() {
            return Err(invalid("template is empty"));
        }
        if template.chars().any(char::is_whitespace) {
            return Err(invalid("template contains whitespace"));
        }

        if template.split('.').any(str::is_empty) {
            return Err(invalid("template contains an empty part"));
        }

        let parts = template.split('.').map(TemplatePart::parse).collect();

        let prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        Ok(Self { prefix, parts })
    }

    fn explicitly_named(&self, tag: &str) -> bool {
        tag == "host" || self.parts.iter().any(|part| matches!(part, TemplatePart::Tag(name) if name == tag))
    }

    fn bucket(&self, metric: &Metric, field: &str) -> String {
        let mut segments = Vec::new();
        if let Some(prefix) = &self.prefix {
            segments.push(prefix.as_str());
        }

        for part in &self.parts {
            match part {
                TemplatePart::Measurement => segments.push(metric.name()),
                TemplatePart::Field => {
                    if field != "value" {
                        segments.push(field);
                    }
                }
                TemplatePart::Host => segments.extend(metric.tag("host")),
                TemplatePart::Tags => segments.extend(
                    metric.tags().filter(|(name, _)| !self.explicitly_named(name)).map(|(_, value)| value),
                ),
                TemplatePart::Tag(name) => segments.extend(metric.tag(name)),
            }
        }

        sanitize(&segments.join("."))
    }
}

impl Serializer for GraphiteSerializer {
    fn serialize(&self, metric: &Metric) -> Result<Vec<u8>, SerializeError> {
        let mut int_writer = itoa::Buffer::new();
        let mut float_writer = ryu::Buffer::new();
        let timestamp = metric.unix_seconds();

        let mut buf = Vec::new();
        for (field, value) in metric.fields() {
            let value_str = match value {
                FieldValue::Float(v) if v.is_finite() => float_writer.format(*v),
                FieldValue::Integer(v) => int_writer.format(*v),
                FieldValue::UInteger(v) => int_writer.format(*v),
                FieldValue::Boolean(v) => {
                    if *v {
                        "1"
                    } else {
                        "0"
                    }
                }
                FieldValue::Float(_) | FieldValue::String(_) => continue,
            };

            buf.extend_from_slice(self.bucket(metric, field).as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(value_str.as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(itoa::Buffer::new().format(timestamp).as_bytes());
            buf.push(b'\n');
        }

        if buf.is_empty() {
            return Err(SerializeError::NoSerializableFields { measurement: metric.name().to_string() });
        }

        Ok(buf)
    }
}

fn sanitize(bucket: &str) -> String {
    let mut out = String::with_capacity(bucket.len());
    for c in bucket.chars() {
        let c = match c {
            '/' | '@' | '*' => '-',
            ' ' | '(' | ')' | '\n' => '_',
            '\\' => continue,
            c => c,
        };

        // Collapse runs of dots left behind by empty tag values or names that contain dots.
        if c == '.' && (out.is_empty() || out.ends_with('.')) {
            continue;
        }
        out.push(c);
    }

    while out.ends_with('.') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::{sanitize, GraphiteSerializer, DEFAULT_GRAPHITE_TEMPLATE};
    use crate::{
        metric::Metric,
        serializer::{SerializeError, Serializer as _},
    };

    fn cpu_metric() -> Metric {
        Metric::new("cpu", UNIX_EPOCH + Duration::from_secs(1_455_320_690))
            .with_tag("host", "server01")
            .with_tag("cpu", "cpu0")
            .with_tag("dc", "us-west")
            .with_field("usage_idle", 91.5)
            .with_field("value", 3i64)
    }

    fn serialize(serializer: &GraphiteSerializer, metric: &Metric) -> String {
        String::from_utf8(serializer.serialize(metric).unwrap()).unwrap()
    }

    #[test]
    fn default_template() {
        let serializer = GraphiteSerializer::new(None, DEFAULT_GRAPHITE_TEMPLATE).unwrap();
        assert_eq!(
            serialize(&serializer, &cpu_metric()),
            "server01.cpu0.us-west.cpu.usage_idle 91.5 1455320690\n\
             server01.cpu0.us-west.cpu 3 1455320690\n"
        );
    }

    #[test]
    fn prefix() {
        let serializer = GraphiteSerializer::new(Some("my_prefix"), DEFAULT_GRAPHITE_TEMPLATE).unwrap();
        let output = serialize(&serializer, &cpu_metric());
        assert!(output.starts_with("my_prefix.server01.cpu0.us-west.cpu.usage_idle 91.5"));

        // An empty prefix is the same as no prefix.
        let serializer = GraphiteSerializer::new(Some(""), DEFAULT_GRAPHITE_TEMPLATE).unwrap();
        assert!(serialize(&serializer, &cpu_metric()).starts_with("server01."));
    }

    #[test]
    fn explicit_tags() {
        let serializer = GraphiteSerializer::new(None, "dc.measurement.tags.field").unwrap();
        assert_eq!(
            serialize(&serializer, &cpu_metric()),
            "us-west.cpu.cpu0.usage_idle 91.5 1455320690\nus-west.cpu.cpu0 3 1455320690\n"
        );
    }

    #[test]
    fn missing_tags_are_skipped() {
        let serializer = GraphiteSerializer::new(None, DEFAULT_GRAPHITE_TEMPLATE).unwrap();
        let metric = Metric::new("load", UNIX_EPOCH).with_field("load1", 0.25);
        assert_eq!(serialize(&serializer, &metric), "load.load1 0.25 0\n");
    }

    #[test]
    fn non_numeric_fields() {
        let serializer = GraphiteSerializer::new(None, "measurement.field").unwrap();
        let metric = Metric::new("service", UNIX_EPOCH)
            .with_field("up", true)
            .with_field("down", false)
            .with_field("status", "ok")
            .with_field("ratio", f64::NAN);
        assert_eq!(serialize(&serializer, &metric), "service.up 1 0\nservice.down 0 0\n");

        let only_strings = Metric::new("service", UNIX_EPOCH).with_field("status", "ok");
        assert_eq!(
            serializer.serialize(&only_strings),
            Err(SerializeError::NoSerializableFields { measurement: "service".to_string() })
        );
    }

    #[test]
    fn invalid_templates() {
        for template in ["", "host..measurement", ".measurement", "measurement.", "host. measurement"] {
            let result = GraphiteSerializer::new(None, template);
            assert!(
                matches!(result, Err(SerializeError::InvalidTemplate { .. })),
                "template '{template}' should be rejected"
            );
        }
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize("a/b@c*d"), "a-b-c-d");
        assert_eq!(sanitize("disk (sda1)"), "disk__sda1_");
        assert_eq!(sanitize("c:\\path"), "c:path");
        assert_eq!(sanitize("..a...b.."), "a.b");
    }
}
