//! Index-Header Configuration
//!
//! Tuning knobs for building and loading index-headers:
//!
//! - **write_buffer_size**: capacity of the buffered writer the builder
//!   streams remote section bytes through (default: 1MB). Larger buffers
//!   mean fewer syscalls while copying big postings-offset tables.
//! - **postings_sampling_factor**: keep every Nth label value of a name's
//!   run in memory (plus the first and last; default: 32). Lower values
//!   trade memory for shorter query-time table scans. This is purely a
//!   reader-side knob — the on-disk format does not depend on it.
//!
//! ## Usage
//!
//! ```ignore
//! use blockhouse_indexheader::IndexHeaderConfig;
//!
//! // Memory-constrained store gateway: sample more sparsely
//! let config = IndexHeaderConfig {
//!     postings_sampling_factor: 64,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHeaderConfig {
    /// Buffered-writer capacity for streaming section copies (default: 1MB)
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// In-memory sampling rate of the postings offset table (default: 32)
    #[serde(default = "default_postings_sampling_factor")]
    pub postings_sampling_factor: usize,
}

impl Default for IndexHeaderConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: default_write_buffer_size(),
            postings_sampling_factor: default_postings_sampling_factor(),
        }
    }
}

fn default_write_buffer_size() -> usize {
    1024 * 1024
}

fn default_postings_sampling_factor() -> usize {
    32
}
