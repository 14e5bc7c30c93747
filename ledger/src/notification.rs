//! Notifications published after each successful mutating operation.
//!
//! Downstream consumers (UIs, indexers) depend on the variant names and the
//! field order below.

use crate::types::EventId;
use serde::{Deserialize, Serialize};
use ticket_escrow_core::{Amount, Identity};

/// Fact recorded by a committed ledger operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerNotification {
    /// A new event was created
    EventCreated {
        /// New id
        event_id: EventId,
        /// Creator
        organizer: Identity,
        /// Title
        title: String,
        /// Start time
        start_time: u64,
        /// End time
        end_time: u64,
    },

    /// Tickets were bought
    TicketPurchased {
        /// Event
        event_id: EventId,
        /// Buyer
        buyer: Identity,
        /// Tickets bought
        quantity: u64,
    },

    /// The organizer canceled an event
    EventCanceled {
        /// Event
        event_id: EventId,
    },

    /// A holder was refunded
    RefundIssued {
        /// Event
        event_id: EventId,
        /// Refunded holder
        holder: Identity,
        /// Amount paid back
        amount: Amount,
    },

    /// The organizer was paid the proceeds
    FundsWithdrawn {
        /// Event
        event_id: EventId,
        /// Organizer
        organizer: Identity,
        /// Amount paid out
        amount: Amount,
    },
}

impl LedgerNotification {
    /// Event the notification is about
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::EventCreated { event_id, .. }
            | Self::TicketPurchased { event_id, .. }
            | Self::EventCanceled { event_id }
            | Self::RefundIssued { event_id, .. }
            | Self::FundsWithdrawn { event_id, .. } => *event_id,
        }
    }

    /// Variant name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EventCreated { .. } => "EventCreated",
            Self::TicketPurchased { .. } => "TicketPurchased",
            Self::EventCanceled { .. } => "EventCanceled",
            Self::RefundIssued { .. } => "RefundIssued",
            Self::FundsWithdrawn { .. } => "FundsWithdrawn",
        }
    }
}
