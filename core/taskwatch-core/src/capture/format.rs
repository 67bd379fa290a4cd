//! asciicast v2 records: a JSON header line, then one `[offset, code, data]`
//! array per line.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Keys this crate does not interpret; written back unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CaptureHeader {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            version: 2,
            width,
            height,
            timestamp: None,
            env: None,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "o")]
    Output,
    #[serde(rename = "i")]
    Input,
    #[serde(rename = "r")]
    Resize,
    #[serde(rename = "m")]
    Marker,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
    /// Seconds since the recording started.
    pub offset: f64,
    pub channel: Channel,
    pub data: String,
}

impl CaptureEvent {
    pub fn output(offset: f64, data: impl Into<String>) -> Self {
        Self {
            offset,
            channel: Channel::Output,
            data: data.into(),
        }
    }

    pub fn input(offset: f64, data: impl Into<String>) -> Self {
        Self {
            offset,
            channel: Channel::Input,
            data: data.into(),
        }
    }

    pub fn is_output(&self) -> bool {
        self.channel == Channel::Output
    }
}

impl Serialize for CaptureEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.offset, self.channel, &self.data).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CaptureEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (offset, channel, data) = <(f64, Channel, String)>::deserialize(deserializer)?;
        Ok(Self {
            offset,
            channel,
            data,
        })
    }
}
