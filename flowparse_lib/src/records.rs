use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use chrono::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::utils::*;


/// Wall-clock time attached to every emitted record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventTime {
    pub seconds: i64,
    pub nanos: u32,
}

impl EventTime {
    pub fn new(seconds: i64, nanos: u32) -> Self {
        EventTime { seconds, nanos }
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanos)
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.3fZ")),
            None => write!(f, "{}.{:09}", self.seconds, self.nanos),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}

/// One MPLS label stack entry as carried in a 3 byte template field:
/// 20 bit label, 3 bit experimental/QoS, 1 bit bottom-of-stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MplsLabel {
    pub label: u32,
    pub exp: u8,
    pub bottom_of_stack: bool,
}

impl MplsLabel {
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        let raw = (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2]);
        MplsLabel {
            label: raw >> 4,
            exp: ((raw >> 1) & 0x07) as u8,
            bottom_of_stack: raw & 0x01 == 1,
        }
    }
}

/// A decoded field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowValue {
    Unsigned(u64),
    Text(String),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Mac(MacAddr),
    Mpls(MplsLabel),
    /// Unrecognized type or a width the field kind cannot represent
    Bytes(Vec<u8>),
}

impl FlowValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FlowValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlowValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FlowValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlowValue::Unsigned(v) => write!(f, "{v}"),
            FlowValue::Text(s) => write!(f, "{s}"),
            FlowValue::Ipv4(ip) => write!(f, "{ip}"),
            FlowValue::Ipv6(ip) => write!(f, "{ip}"),
            FlowValue::Mac(mac) => write!(f, "{mac}"),
            FlowValue::Mpls(mpls) => write!(f, "{}", mpls.label),
            FlowValue::Bytes(b) => write!(f, "{}", bytes_to_hex(b)),
        }
    }
}

impl Serialize for FlowValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FlowValue::Unsigned(v) => serializer.serialize_u64(*v),
            FlowValue::Text(s) => serializer.serialize_str(s),
            FlowValue::Mpls(mpls) => serializer.serialize_u32(mpls.label),
            other => serializer.collect_str(other),
        }
    }
}


/// Ordered name → value mapping for one decoded flow.
///
/// Keeps wire order. Names are shared with the compiled template layout, so
/// building a record does not allocate a string per field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowRecord {
    fields: Vec<(Arc<str>, FlowValue)>,
}

impl FlowRecord {
    pub fn new() -> Self {
        FlowRecord::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        FlowRecord { fields: Vec::with_capacity(capacity) }
    }

    /// Inserts or replaces. A replaced key keeps its original position.
    pub fn insert(&mut self, name: impl Into<Arc<str>>, value: FlowValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Appends without looking for an existing key. The caller knows the name is new.
    pub fn push(&mut self, name: impl Into<Arc<str>>, value: FlowValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FlowValue> {
        self.fields.iter().find(|(k, _)| k.as_ref() == name).map(|(_, v)| v)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FlowValue::as_u64)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlowValue)> {
        self.fields.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for FlowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k.as_ref(), v)?;
        }
        map.end()
    }
}
