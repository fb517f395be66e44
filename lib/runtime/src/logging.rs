// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logging setup.
//!
//! The primitives in this crate emit structured `tracing` events (handoff
//! bumps at `trace`, closes at `debug`, unhandled detached-task failures at
//! `error`). Hosts that already install their own subscriber can ignore this
//! module entirely; [`init`] is for binaries and tests that want a readable
//! default.
//!
//! Filters are read from the `COOP_LOG` environment variable using the usual
//! comma-separated `target=level` directives; the default level is `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to set the log filter
const FILTER_ENV: &str = "COOP_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// Install the default subscriber. Safe to call any number of times.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    });
}
