use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Max entries retained per-stream before the oldest are dropped.
    pub stream_maxlen: usize,
    /// Streams whose last entry is older than this are dropped by cleanup.
    pub retention_secs: i64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            stream_maxlen: d_maxlen(),
            retention_secs: d_retention(),
        }
    }
}

fn d_maxlen() -> usize {
    1000
}
fn d_retention() -> i64 {
    24 * 3600
}
