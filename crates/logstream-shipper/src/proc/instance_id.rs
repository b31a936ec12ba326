// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity of this process instance, used in destination stream names.

use std::env;
use std::sync::OnceLock;

use tracing::warn;

const UNKNOWN: &str = "unknown";

/// Returns the instance id, resolving it on first use.
///
/// Resolution order:
/// 1. `LOGSTREAM_INSTANCE_ID`
/// 2. `HOSTNAME`
/// 3. the system hostname
/// 4. `"unknown"`
///
/// The value never changes for the life of the process.
#[must_use]
pub fn instance_id() -> &'static str {
    static INSTANCE_ID: OnceLock<String> = OnceLock::new();
    INSTANCE_ID.get_or_init(|| resolve(|name| env::var(name).ok()))
}

fn resolve(lookup: impl Fn(&str) -> Option<String>) -> String {
    for name in ["LOGSTREAM_INSTANCE_ID", "HOSTNAME"] {
        if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
            return value.trim().to_string();
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("LOGSTREAM | Failed to get system hostname: {e}"),
    }

    warn!("LOGSTREAM | Could not determine instance id, using '{UNKNOWN}'");
    UNKNOWN.to_string()
}
