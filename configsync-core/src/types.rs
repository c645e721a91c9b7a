//! Domain types for configsync.
//!
//! A stored file is an [`Entry`]: a normalized relative [`EntryPath`], an opaque
//! byte payload and the timestamp at which the payload was accepted. The path is
//! never used as a storage key; [`EntryId`] is derived from it instead.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Document field holding the entry path.
pub const PATH_FIELD: &str = "path";
/// Document field holding the base64 payload.
pub const CONTENT_FIELD: &str = "content";
/// Document field holding the acceptance timestamp.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A normalized, relative file path identifying one entry.
///
/// Normalization trims whitespace, converts `\` to `/` and drops empty and `.`
/// segments. `..` segments are kept verbatim; the writer rejects them when a
/// path is resolved against a local root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryPath(String);

impl EntryPath {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let unified = raw.trim().replace('\\', "/");
        let segments: Vec<&str> = unified
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        if segments.is_empty() {
            return Err(CoreError::InvalidPath {
                path: raw.to_string(),
                reason: "path is empty".to_string(),
            });
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// `true` when any segment is `..`.
    pub fn has_traversal(&self) -> bool {
        self.segments().any(|segment| segment == "..")
    }

    /// The storage identifier derived from this path.
    pub fn id(&self) -> EntryId {
        EntryId(URL_SAFE_NO_PAD.encode(self.0.as_bytes()))
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntryPath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntryPath {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<EntryPath> for String {
    fn from(p: EntryPath) -> Self {
        p.0
    }
}

/// Storage key for an entry: URL-safe, unpadded base64 of the path bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One stored file. Serializes to the stored document shape:
/// `{"path": .., "content": <base64>, "@timestamp": <RFC 3339>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: EntryPath,
    #[serde(with = "base64_content")]
    pub content: Vec<u8>,
    #[serde(rename = "@timestamp", with = "timestamp_format")]
    pub timestamp: DateTime<Utc>,
}

impl Entry {
    pub fn new(path: EntryPath, content: Vec<u8>, timestamp: DateTime<Utc>) -> Self {
        Self {
            path,
            content,
            timestamp,
        }
    }

    pub fn id(&self) -> EntryId {
        self.path.id()
    }
}

/// Wall-clock now, truncated to the millisecond precision entries are stored at.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

mod base64_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| D::Error::custom(format!("content is not valid base64: {e}")))
    }
}

/// `@timestamp` is written as RFC 3339 with milliseconds; epoch milliseconds
/// are accepted on read.
pub mod timestamp_format {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {ms}"))),
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid timestamp '{text}': {e}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Interval
// ---------------------------------------------------------------------------

/// A signed duration with millisecond resolution.
///
/// Parsed from `250ms`, `30s`, `1m`, `2h`, `1d` or a bare integer of
/// milliseconds. Negative values are legal: a negative flush interval
/// disables scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "String")]
pub struct Interval {
    millis: i64,
}

impl Interval {
    pub const DISABLED: Interval = Interval { millis: -1 };

    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self {
            millis: secs * 1_000,
        }
    }

    pub const fn from_mins(mins: i64) -> Self {
        Self {
            millis: mins * 60_000,
        }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn is_disabled(&self) -> bool {
        self.millis < 0
    }

    /// `None` for negative intervals.
    pub fn as_duration(&self) -> Option<Duration> {
        u64::try_from(self.millis).ok().map(Duration::from_millis)
    }

    pub fn duration_or(&self, fallback: Duration) -> Duration {
        self.as_duration().unwrap_or(fallback)
    }
}

impl From<Duration> for Interval {
    fn from(d: Duration) -> Self {
        Self {
            millis: i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
        }
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidInterval {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let text = s.trim();
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let digits_end = body
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(body.len());
        let (digits, unit) = body.split_at(digits_end);
        if digits.is_empty() {
            return Err(invalid("missing number"));
        }
        let value: i64 = digits.parse().map_err(|_| invalid("number out of range"))?;
        let scale: i64 = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            _ => return Err(invalid("unknown unit; expected ms, s, m, h or d")),
        };
        let millis = value
            .checked_mul(scale)
            .ok_or_else(|| invalid("number out of range"))?;
        Ok(Self {
            millis: if negative { -millis } else { millis },
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.millis;
        if ms == 0 {
            return write!(f, "0s");
        }
        for (scale, unit) in [(86_400_000, "d"), (3_600_000, "h"), (60_000, "m"), (1_000, "s")] {
            if ms % scale == 0 {
                return write!(f, "{}{unit}", ms / scale);
            }
        }
        write!(f, "{ms}ms")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInterval {
    Millis(i64),
    Text(String),
}

impl TryFrom<RawInterval> for Interval {
    type Error = CoreError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        match raw {
            RawInterval::Millis(ms) => Ok(Self::from_millis(ms)),
            RawInterval::Text(text) => text.parse(),
        }
    }
}

impl From<Interval> for String {
    fn from(i: Interval) -> Self {
        i.to_string()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Health reported by the backing store. Ordered `Red < Yellow < Green`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Red,
    Yellow,
    Green,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Red => write!(f, "red"),
            HealthStatus::Yellow => write!(f, "yellow"),
            HealthStatus::Green => write!(f, "green"),
        }
    }
}

impl FromStr for HealthStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(HealthStatus::Red),
            "yellow" => Ok(HealthStatus::Yellow),
            "green" => Ok(HealthStatus::Green),
            _ => Err(CoreError::InvalidHealthStatus(s.to_string())),
        }
    }
}

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// Anything other than `desc` (any case) sorts ascending.
impl FromStr for SortOrder {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("desc") {
            Ok(SortOrder::Desc)
        } else {
            Ok(SortOrder::Asc)
        }
    }
}

/// A `field[:order]` sort specification, e.g. `@timestamp:desc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: PATH_FIELD.to_string(),
            order: SortOrder::Asc,
        }
    }
}

impl FromStr for SortSpec {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ':');
        let field = parts
            .next()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(PATH_FIELD);
        let order = match parts.next() {
            Some(order) => order.parse()?,
            None => SortOrder::Asc,
        };
        Ok(Self {
            field: field.to_string(),
            order,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
