// SPDX-License-Identifier: MIT OR Apache-2.0
//! Logging setup.

use crate::error::{Result, SystemError};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Parse comma separated filter directives
pub fn parse_filter(filter: &str) -> Result<Vec<Directive>> {
    filter
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| {
            directive.parse::<Directive>().map_err(|e| SystemError::LogFilter {
                filter: directive.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}

/// Install a fmt subscriber filtered by `RUST_LOG` plus `filter`.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_logging(filter: &str) -> Result<bool> {
    let env_filter = parse_filter(filter)?
        .into_iter()
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        tracing::info!("Node system logging initialized");
    }
    Ok(installed)
}
