//! Queue publishing: wire encoding and the stream sink seam
//!
//! Every record type that goes onto a stream declares its fields once, in
//! order, through [`StreamEntry`]. The encoded entry is a flat list of
//! field/value pairs with a fixed shape: a value that is missing or failed to
//! parse is still sent, as [`NULL_MARKER`].

pub mod redis_stream;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::BankRate;

pub use redis_stream::RedisStream;

/// Encoding of an absent value on the wire.
///
/// Consumers treat an empty field value as "not set".
pub const NULL_MARKER: &str = "";

/// A single field value before it is flattened to a string
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Null,
}

impl WireValue {
    pub fn encode(&self) -> String {
        match self {
            WireValue::Text(text) => text.clone(),
            WireValue::Number(value) if value.is_finite() => value.to_string(),
            WireValue::Number(_) => NULL_MARKER.to_string(),
            WireValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true),
            WireValue::Null => NULL_MARKER.to_string(),
        }
    }
}

impl From<&str> for WireValue {
    fn from(text: &str) -> Self {
        WireValue::Text(text.to_string())
    }
}

impl From<Option<f64>> for WireValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(WireValue::Null, WireValue::Number)
    }
}

impl From<Option<&str>> for WireValue {
    fn from(value: Option<&str>) -> Self {
        value.map_or(WireValue::Null, WireValue::from)
    }
}

impl From<Option<DateTime<Utc>>> for WireValue {
    fn from(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(WireValue::Null, WireValue::Timestamp)
    }
}

/// A record with a static, ordered stream layout
pub trait StreamEntry {
    /// Field names and values, always the same names in the same order.
    fn fields(&self) -> Vec<(&'static str, WireValue)>;
}

impl StreamEntry for BankRate {
    fn fields(&self) -> Vec<(&'static str, WireValue)> {
        vec![
            ("bank", self.bank.as_str().into()),
            ("buy", self.buy.into()),
            ("sell", self.sell.into()),
            ("buy_online", self.buy_online.into()),
            ("sell_online", self.sell_online.into()),
            ("site_url", self.site_url.as_deref().into()),
            ("update_at", self.update_at.into()),
            ("source_url", self.source_url.as_str().into()),
        ]
    }
}

/// Flatten an entry to the field/value pairs sent with `XADD`
pub fn encode_entry<T: StreamEntry>(entry: &T) -> Vec<(&'static str, String)> {
    entry
        .fields()
        .into_iter()
        .map(|(name, value)| (name, value.encode()))
        .collect()
}

/// Append-only stream the run publishes to
#[allow(async_fn_in_trait)]
pub trait RateSink {
    /// Append one entry, returning its stream ID.
    async fn publish<T: StreamEntry + Sync>(&mut self, stream: &str, entry: &T) -> Result<String>;

    /// Append all entries in one round trip, returning their IDs in order.
    ///
    /// Each entry still gets its own ID; this is not a transaction.
    async fn publish_batch<T: StreamEntry + Sync>(
        &mut self,
        stream: &str,
        entries: &[T],
    ) -> Result<Vec<String>>;
}
