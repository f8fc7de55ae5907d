//! Messages exchanged between stages, and configuration values handed to them.
//!
//! A `Message` is self-contained: it owns its payload and headers, so it can
//! be moved through a channel without sharing anything with the stage that
//! produced it.

use crate::pipeline::port::PayloadKind;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the original file name of a payload.
pub const HEADER_FILE_NAME: &str = "file_name";
/// Header carrying the payload's content type.
pub const HEADER_CONTENT_TYPE: &str = "content_type";
/// Header carrying an inference result document.
pub const HEADER_RESULT: &str = "result";

/// The unit of data flowing through a pipeline.
#[derive(Clone)]
pub struct Message {
    /// Sequence number assigned by the source, starting at 1.
    pub seq: u64,
    pub kind: PayloadKind,
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
    /// When the source produced this message.
    pub captured_at: DateTime<Utc>,
}

impl Message {
    pub fn new(seq: u64, kind: PayloadKind, payload: Vec<u8>) -> Self {
        Self {
            seq,
            kind,
            payload,
            headers: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Payload interpreted as UTF-8, if it is valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("len", &self.payload.len())
            .field("headers", &self.headers)
            .finish()
    }
}

/// Configuration values resolved for a stage option.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ConfigValue::List(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::String(v) => f.write_str(v),
            ConfigValue::List(v) => f.write_str(&v.join(",")),
        }
    }
}
