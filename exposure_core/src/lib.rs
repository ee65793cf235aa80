#![forbid(unsafe_code)]

//! Core domain model and session engine for uvdose.
//!
//! This crate provides:
//! - Domain types (skin classes, sessions, snapshots, status)
//! - Burn-time and erythemal dose calculations
//! - The session controller state machine and its single-owner runtime
//! - Persistence (session record, finished-session journal)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod clock;
pub mod burn;
pub mod dose;
pub mod events;
pub mod gateway;
pub mod state;
pub mod journal;
pub mod controller;
pub mod runtime;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use clock::{Clock, ManualClock, SystemClock};
pub use burn::{dose_budget, seconds_to_burn, MAX_REMAINING_SECONDS};
pub use events::SessionEvent;
pub use gateway::{NullTicker, PersistenceGateway, PresentationGateway, Ticker, TracingPresentation};
pub use state::{SessionLock, SessionStore};
pub use journal::{read_journal, JournalSink, JsonlJournal};
pub use controller::{Collaborators, SessionController, SessionSettings};
pub use runtime::{SessionHandle, SessionRuntime};
