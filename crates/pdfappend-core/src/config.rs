//! Appender configuration

use serde::{Deserialize, Serialize};

/// Options controlling how a revision is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendOptions {
    /// Written to the Info dictionary when stamping
    pub producer: String,
    /// Update `Producer` and `ModDate` in the Info dictionary
    pub stamp_info: bool,
    /// Flate-compress cross-reference streams
    pub compress_xref_stream: bool,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            producer: format!("pdfappend {}", env!("CARGO_PKG_VERSION")),
            stamp_info: false,
            compress_xref_stream: true,
        }
    }
}

impl AppendOptions {
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    pub fn with_info_stamp(mut self, stamp: bool) -> Self {
        self.stamp_info = stamp;
        self
    }
}
