//! Outcome of one timed run.

use serde::Serialize;

use crate::runtime::LoadInfo;

/// A completed run: how long the runtime call took and what it loaded.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub label: String,
    pub elapsed_secs: f64,
    pub load_info: LoadInfo,
}

impl RunResult {
    #[must_use]
    pub fn rows_loaded(&self) -> u64 {
        self.load_info.total_rows()
    }
}
