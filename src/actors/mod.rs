//! Long-running control-plane tasks
//!
//! Each actor runs as an independent tokio task, owns a command channel
//! for "run now" requests and observes a shared `CancellationToken`.
//!
//! ## Architecture Overview
//!
//! ```text
//!                       ┌──────────────────┐
//!                       │  center (main)   │
//!                       └────────┬─────────┘
//!                                │ spawns
//!          ┌─────────────────────┼──────────────────────┐
//!          │                     │                      │
//!  ┌───────▼───────┐     ┌───────▼────────┐     ┌───────▼─────────┐
//!  │  PollerActor  │────►│ NotifierActor  │     │MaintenanceActor │
//!  │ (tick, fan-out│     │ (meta-alerts,  │     │ (retention,     │
//!  │  per host)    │     │  rule refresh) │     │  self-check)    │
//!  └───────┬───────┘     └───────┬────────┘     └───────┬─────────┘
//!          │                     │                      │
//!          └──────────── repositories (storage) ────────┘
//! ```
//!
//! The poller holds an [`notifier::AlertNotifier`] clone and calls it
//! directly after every poll; the notifier actor only drives the timers.
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc channel per actor for control messages
//! 2. **Request/Response**: oneshot channels carry reports back
//! 3. **Shutdown**: `CancellationToken` shared by every loop
//!
//! Periodic jobs owned by one actor each get their own task through
//! [`run_every`], so a slow job only delays its own schedule.

pub mod maintenance;
pub mod messages;
pub mod notifier;
pub mod poller;

use std::future::Future;

use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

/// Run `job` on every tick of `ticker` until `cancel` fires
///
/// A job in progress is allowed to finish before the loop exits.
pub(crate) async fn run_every<F, Fut>(mut ticker: Interval, cancel: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => job().await,
        }
    }
}
