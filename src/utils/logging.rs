//! Logging macros for the poll loops, switched per module by an `ENABLE_LOGS` flag.
//!
//! The ingest watcher and the pairing engine narrate every cycle. Those lines are
//! useful while tuning poll intervals and noisy otherwise, so each module that uses
//! these macros declares its own switch:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn};
//!
//! log_info!("scanned {} locations", 2);
//! ```
//!
//! Storage and orchestration failures are logged with plain `log::error!` so they can
//! never be silenced by a module flag.

/// `log::debug!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// `log::info!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` when the calling module's `ENABLE_LOGS` is true.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}
