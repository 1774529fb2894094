//! Cache policies and the pure decision function behind them.
//!
//! | Policy        | Emit cache first | Fetch network                       | Fallback on error |
//! |---------------|------------------|-------------------------------------|-------------------|
//! | cache-first   | if rows exist    | no rows, oldest row stale, or a row | yes               |
//! |               |                  | is incomplete                       |                   |
//! | network-first | no               | always                              | yes               |
//! | force-refresh | no               | always                              | no                |
//! | cache-only    | if rows exist    | never                               | n/a               |

use chrono::Duration;
use serde::Deserialize;

/// Default validity window for cached rows, in hours.
pub const DEFAULT_VALIDITY_HOURS: i64 = 24;

/// How a single repository call trades freshness against availability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
  /// Serve cache, refresh it from the network when stale or incomplete
  #[default]
  CacheFirst,
  /// Always hit the network, serve cache if that fails
  NetworkFirst,
  /// Always hit the network, never substitute cache
  ForceRefresh,
  /// Never hit the network
  CacheOnly,
}

/// What the orchestrator knows about the cache before deciding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheState {
  /// Whether at least one relevant row is cached
  pub has_rows: bool,
  /// `last_updated` of the oldest relevant row
  pub oldest_update: Option<i64>,
  /// Whether every relevant row has all required fields
  pub complete: bool,
}

impl CacheState {
  pub fn empty() -> Self {
    Self {
      has_rows: false,
      oldest_update: None,
      complete: true,
    }
  }
}

/// Outcome of evaluating a policy against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
  pub emit_cache_first: bool,
  pub fetch_network: bool,
  pub fallback_to_cache: bool,
}

/// `(now - last_updated) < window`; a row exactly one window old is stale and
/// a future-dated row is fresh.
pub fn is_fresh(last_updated: i64, now: i64, window: Duration) -> bool {
  now.saturating_sub(last_updated) < window.num_milliseconds()
}

impl PolicyDecision {
  pub fn evaluate(policy: CachePolicy, state: &CacheState, now: i64, window: Duration) -> Self {
    match policy {
      CachePolicy::CacheFirst => {
        let fresh = state
          .oldest_update
          .is_some_and(|oldest| is_fresh(oldest, now, window));
        Self {
          emit_cache_first: state.has_rows,
          fetch_network: !state.has_rows || !fresh || !state.complete,
          fallback_to_cache: true,
        }
      }
      CachePolicy::NetworkFirst => Self {
        emit_cache_first: false,
        fetch_network: true,
        fallback_to_cache: true,
      },
      CachePolicy::ForceRefresh => Self {
        emit_cache_first: false,
        fetch_network: true,
        fallback_to_cache: false,
      },
      CachePolicy::CacheOnly => Self {
        emit_cache_first: state.has_rows,
        fetch_network: false,
        fallback_to_cache: false,
      },
    }
  }
}
