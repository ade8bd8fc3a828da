//! Default deadlines per kind of remote store

use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Blob store PUT/DELETE/GET calls
pub fn object_storage_timeout() -> TimeoutConfig {
    TimeoutConfig {
        duration: Duration::from_secs(30),
    }
}

/// Relational index statements and short transactions
pub fn database_timeout() -> TimeoutConfig {
    TimeoutConfig {
        duration: Duration::from_secs(10),
    }
}
