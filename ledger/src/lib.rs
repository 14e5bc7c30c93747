//! # Ticket Ledger
//!
//! A ticket-sale escrow ledger. Organizers create events, buyers pay the
//! exact ticket price into custody, and the ledger releases that value
//! either back to buyers (refunds) or to the organizer (withdrawal) under
//! time-gated, role-gated rules.
//!
//! # Architecture
//!
//! ```text
//!  caller ──► Ledger ──► Store::transact ──► EventReducer (rules, no I/O)
//!                            │
//!                            ├─ LedgerRepository ──► KeyValueStore
//!                            ├─ ValueTransfer      (after commit)
//!                            └─ NotificationBus    (after transfers)
//! ```
//!
//! # Lifecycle of an event
//!
//! ```text
//! created ──► on sale ──► started ──► ended ──► withdrawn
//!    │            │
//!    └────────────┴──► canceled (refunds open forever)
//! ```
//!
//! - Sales close once the end time has passed
//! - Refunds close 24 hours before the start unless the event is canceled
//! - Cancellation is possible only before the start
//! - Withdrawal is possible once, after the end, and never for a canceled event

pub mod config;
pub mod error;
pub mod ledger;
pub mod notification;
pub mod reducer;
pub mod repository;
pub mod transfer;
pub mod types;

pub use config::{ConfigError, LedgerConfig};
pub use error::{EventField, LedgerError, OrganizerAction};
pub use ledger::Ledger;
pub use notification::LedgerNotification;
pub use transfer::LoggingTransfer;
pub use types::{Event, EventId, EventStatus, Holding, NewEvent, REFUND_CUTOFF_SECS};
