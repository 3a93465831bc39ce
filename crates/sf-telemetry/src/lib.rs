// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide tracing setup shared by every SlideForge binary.
#![deny(unsafe_code)]

use tracing_subscriber::EnvFilter;

/// Default filter applied when `debug` is false and `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "sf=info";

/// Filter applied when `debug` is true and `RUST_LOG` is unset.
const DEBUG_FILTER: &str =
    "sf=debug,sf.runtime=debug,sf.scheduler=debug,sf.validation=debug,sf.host=debug";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG`, if set, always wins. Otherwise `debug` selects between a
/// terse default filter and a verbose per-module one.
pub fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
