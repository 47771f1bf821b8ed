//! Unified JSON logging with custom format.
//!
//! Log format:
//! ```json
//! {"ts":"2024-12-28T15:04:05.123Z","level":"info","type":"app","msg":"Server started","ctx":{},"data":{}}
//! ```
//!
//! Events with target `access` (see [`AccessLogger`](crate::middleware::AccessLogger))
//! get type `access` and a `METHOD /path STATUS` message.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber: env filter plus the JSON formatter.
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new("request_tracker=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .event_format(JsonFormatter::new(config.service_name.clone())),
        )
        .try_init()
}

/// Custom JSON formatter for tracing.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Build the JSON entry for one event.
    fn entry(&self, ts: &str, event: &Event<'_>) -> serde_json::Value {
        let meta = event.metadata();
        let level = match *meta.level() {
            Level::TRACE | Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };

        let log_type = if meta.target() == "access" {
            "access"
        } else if *meta.level() == Level::ERROR {
            "error"
        } else {
            "app"
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let msg = if log_type == "access" {
            let field = |name: &str| visitor.fields.get(name).cloned();
            format!(
                "{} {} {}",
                field("method").as_ref().and_then(|v| v.as_str()).unwrap_or("?"),
                field("path").as_ref().and_then(|v| v.as_str()).unwrap_or("?"),
                field("status").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        } else {
            visitor.message.take().unwrap_or_default()
        };

        let mut ctx = serde_json::Map::new();
        ctx.insert("service".into(), serde_json::json!(&self.service_name));
        if let Some(request_id) = visitor.fields.remove("request_id") {
            ctx.insert("request_id".into(), request_id);
        }

        serde_json::json!({
            "ts": ts,
            "level": level,
            "type": log_type,
            "msg": msg,
            "ctx": ctx,
            "data": visitor.fields,
        })
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let ts = Iso8601Timestamp::now();
        let entry = self.entry(ts.as_str(), event);

        writeln!(
            writer,
            "{}",
            serde_json::to_string(&entry).unwrap_or_default()
        )
    }
}

/// Collects the message and the remaining fields of one event.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: HashMap<String, serde_json::Value>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_owned(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(text.trim_matches('"').to_owned());
        } else {
            self.put(field, text.into());
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.put(field, value.into());
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }
}

/// UTC wall-clock time as `YYYY-MM-DDTHH:MM:SS.mmmZ`, formatted on the
/// stack.
#[derive(Clone, Copy)]
pub struct Iso8601Timestamp {
    buf: [u8; 24],
}

impl Iso8601Timestamp {
    pub fn now() -> Self {
        Self::from_duration(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        )
    }

    /// From time elapsed since the Unix epoch.
    pub fn from_duration(since_epoch: Duration) -> Self {
        let secs = since_epoch.as_secs();
        let (year, month, day) = civil_date(secs / 86_400);
        let tod = secs % 86_400;

        let mut buf = *b"0000-00-00T00:00:00.000Z";
        write_digits(&mut buf[0..4], year);
        write_digits(&mut buf[5..7], month);
        write_digits(&mut buf[8..10], day);
        write_digits(&mut buf[11..13], tod / 3600);
        write_digits(&mut buf[14..16], tod % 3600 / 60);
        write_digits(&mut buf[17..19], tod % 60);
        write_digits(&mut buf[20..23], u64::from(since_epoch.subsec_millis()));
        Self { buf }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf).unwrap_or("")
    }
}

impl std::fmt::Display for Iso8601Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gregorian (year, month, day) for a count of days since 1970-01-01.
fn civil_date(days: u64) -> (u64, u64, u64) {
    // Shift the epoch to 0000-03-01 so leap days fall at the end of an era year.
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

fn write_digits(buf: &mut [u8], mut val: u64) {
    for slot in buf.iter_mut().rev() {
        *slot = b'0' + (val % 10) as u8;
        val /= 10;
    }
}
