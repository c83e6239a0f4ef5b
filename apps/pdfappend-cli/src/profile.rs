//! Signing profiles
//!
//! A profile fills in the signature details so they need not be repeated on
//! every invocation:
//!
//! ```toml
//! name = "Alice Example"
//! reason = "Approved"
//! location = "Berlin"
//! rect = [350.0, 40.0, 200.0, 50.0]
//!
//! [options]
//! stamp_info = true
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use pdfappend_core::AppendOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignProfile {
    pub name: Option<String>,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
    /// `[x, y, width, height]`
    pub rect: Option<[f64; 4]>,
    /// `Contents` reservation in bytes
    pub reserve: Option<usize>,
    pub options: AppendOptions,
}

impl SignProfile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        Self::from_str(&content)
    }

    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML signing profile")
    }
}
