// /////////////////////////////////////////////////////////////////////////////
// Comicforge
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Comicforge Bootstrap
//!
//! Process bootstrap for the comicforge engine: tracing initialisation,
//! bootstrap-phase logging, and graceful-shutdown coordination. This crate
//! deliberately knows nothing about the pipeline itself; it owns the
//! concerns that must exist before (and outlive) any session.

pub mod logger;
pub mod shutdown;

pub use logger::{BootstrapLogger, ConsoleLogger, NoopLogger};
pub use shutdown::{watch_interrupt, CancellationToken, ShutdownCoordinator, DEFAULT_GRACE_PERIOD_SECS};

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` when set, otherwise the provided default
/// directive (e.g. `"info"` or `"comicforge=debug,info"`). Calling this more
/// than once is a no-op: the first subscriber wins.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("info");
        init_tracing("debug");
    }
}
