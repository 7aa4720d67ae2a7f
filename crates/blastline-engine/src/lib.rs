//! # Blastline Engine
//!
//! The broadcast campaign core: turns a persisted campaign into
//! per-recipient sends and folds outcomes back into campaign state.
//!
//! ## Data flow
//! ```text
//! submission -> CampaignDb (draft | scheduled)
//!   -> SchedulerSweep (CAS promotion -> processing, frozen snapshot)
//!   -> Dispatcher (rate-budgeted sends via ChannelAdapter, retries)
//!   -> DeliveryTracker (receipt inbox -> counters -> completed | failed)
//!   <-> cancel (CAS -> cancelled, suppresses further dispatch)
//! ```
//!
//! Correctness never relies on external locking: every status and task
//! transition is a conditional update in the store, so overlapping sweeps
//! and racing workers settle each transition exactly once.

pub mod cancel;
pub mod dispatcher;
pub mod resolver;
pub mod sweep;
pub mod tracker;

pub use cancel::cancel_campaign;
pub use dispatcher::Dispatcher;
pub use sweep::{SchedulerSweep, spawn_sweep};
pub use tracker::{DeliveryTracker, receipt_inbox};
