//! Ledger error taxonomy.
//!
//! Every rejection carries the numbers a caller needs to decide what to do
//! next. Only [`LedgerError::Busy`] is worth retrying unchanged.

use crate::types::EventId;
use std::fmt;
use thiserror::Error;
use ticket_escrow_core::{Amount, Identity};
use ticket_escrow_runtime::StoreError;

/// Event field rejected at creation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventField {
    /// Title
    Title,
    /// Unit price
    UnitPrice,
    /// Start time
    StartTime,
    /// End time
    EndTime,
    /// Capacity
    Capacity,
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title => write!(f, "title"),
            Self::UnitPrice => write!(f, "unit_price"),
            Self::StartTime => write!(f, "start_time"),
            Self::EndTime => write!(f, "end_time"),
            Self::Capacity => write!(f, "capacity"),
        }
    }
}

/// Organizer-only operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrganizerAction {
    /// Cancel the event
    Cancel,
    /// Withdraw the proceeds
    Withdraw,
}

impl fmt::Display for OrganizerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => write!(f, "cancel"),
            Self::Withdraw => write!(f, "withdraw"),
        }
    }
}

/// Errors returned by ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A creation parameter is out of range
    #[error("Invalid {field}: {reason}")]
    InvalidEventParameters {
        /// Offending field
        field: EventField,
        /// What is wrong with it
        reason: String,
    },

    /// No event has this id
    #[error("Event {event_id} not found")]
    NotFound {
        /// Requested id
        event_id: EventId,
    },

    /// Caller is not the organizer
    #[error("Only organizer can {action} event {event_id} (caller: {caller})")]
    Unauthorized {
        /// Event concerned
        event_id: EventId,
        /// Who tried
        caller: Identity,
        /// What they tried
        action: OrganizerAction,
    },

    /// Event was canceled
    #[error("Event {event_id} is canceled")]
    EventCanceled {
        /// Event concerned
        event_id: EventId,
    },

    /// Event has started, so it can no longer be canceled
    #[error("Event {event_id} has already started (start: {start_time}, now: {now})")]
    EventAlreadyStarted {
        /// Event concerned
        event_id: EventId,
        /// Start time
        start_time: u64,
        /// Time of the attempt
        now: u64,
    },

    /// Event has not ended, so funds cannot be withdrawn
    #[error("Event {event_id} has not ended yet (end: {end_time}, now: {now})")]
    EventNotEnded {
        /// Event concerned
        event_id: EventId,
        /// End time
        end_time: u64,
        /// Time of the attempt
        now: u64,
    },

    /// Event is over, so tickets are no longer sold
    #[error("Event {event_id} has ended (end: {end_time}, now: {now})")]
    EventEnded {
        /// Event concerned
        event_id: EventId,
        /// End time
        end_time: u64,
        /// Time of the attempt
        now: u64,
    },

    /// Not enough tickets left
    #[error("Not enough tickets left for event {event_id}: requested {requested}, tickets remaining: {remaining}")]
    SoldOut {
        /// Event concerned
        event_id: EventId,
        /// Tickets asked for
        requested: u64,
        /// Tickets still available
        remaining: u64,
    },

    /// Tendered amount is not exactly the price
    #[error("Incorrect payment: expected {expected}, tendered {tendered}")]
    IncorrectPayment {
        /// `unit_price * quantity`
        expected: Amount,
        /// What the buyer sent
        tendered: Amount,
    },

    /// Quantity must be at least one
    #[error("Quantity must be at least 1 (got {quantity})")]
    InvalidQuantity {
        /// Quantity asked for
        quantity: u64,
    },

    /// Caller holds no tickets for this event
    #[error("No tickets to refund for {holder} on event {event_id}")]
    NoTicketsHeld {
        /// Event concerned
        event_id: EventId,
        /// Caller
        holder: Identity,
    },

    /// Too close to the start and the event is not canceled
    #[error("Refund not allowed (time limit passed and not canceled): deadline {deadline}, now {now}")]
    RefundWindowClosed {
        /// Event concerned
        event_id: EventId,
        /// Refunds were accepted strictly before this time
        deadline: u64,
        /// Time of the attempt
        now: u64,
    },

    /// Event was already canceled
    #[error("Event {event_id} is already canceled")]
    AlreadyCanceled {
        /// Event concerned
        event_id: EventId,
    },

    /// Funds were already paid out
    #[error("Funds for event {event_id} were already withdrawn")]
    AlreadyWithdrawn {
        /// Event concerned
        event_id: EventId,
    },

    /// Checked arithmetic overflowed
    #[error("Arithmetic overflow computing {context}")]
    Overflow {
        /// Quantity being computed
        context: &'static str,
    },

    /// Partition stayed locked past the lock timeout
    #[error("Ledger is busy on {partition} (waited {waited_ms}ms), try again")]
    Busy {
        /// Contended partition
        partition: String,
        /// How long the call waited
        waited_ms: u64,
    },

    /// Ledger is shutting down
    #[error("Ledger is shutting down")]
    ShutdownInProgress,

    /// Shutdown gave up waiting for running operations
    #[error("Shutdown timed out with {in_flight} operations still running")]
    ShutdownTimeout {
        /// Operations still running
        in_flight: usize,
    },

    /// Key-value store failure
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Outbound transfer failed; the operation was rolled back
    #[error("Transfer of {amount} to {to} failed: {reason}")]
    TransferFailed {
        /// Recipient
        to: Identity,
        /// Amount
        amount: Amount,
        /// Backend message
        reason: String,
    },

    /// Outbound transfer timed out; the operation stays applied
    ///
    /// The recipient may already have been paid. Retrying is refused by
    /// the ledger (`NoTicketsHeld` or `AlreadyWithdrawn`), so any repair
    /// happens against the transfer backend.
    #[error("Transfer of {amount} to {to} was not confirmed; the operation stays applied")]
    TransferUnconfirmed {
        /// Recipient
        to: Identity,
        /// Amount
        amount: Amount,
    },
}

impl LedgerError {
    /// Whether the same call may succeed if retried later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub(crate) fn invalid(field: EventField, reason: &str) -> Self {
        Self::InvalidEventParameters {
            field,
            reason: reason.to_string(),
        }
    }
}

impl From<StoreError<Self>> for LedgerError {
    fn from(error: StoreError<Self>) -> Self {
        match error {
            StoreError::Rejected(rejection) => rejection,
            StoreError::Busy {
                partition,
                waited_ms,
            } => Self::Busy {
                partition,
                waited_ms,
            },
            StoreError::ShutdownInProgress => Self::ShutdownInProgress,
            StoreError::ShutdownTimeout(in_flight) => Self::ShutdownTimeout { in_flight },
            StoreError::Storage(storage) => Self::Storage(storage.to_string()),
            StoreError::Transfer { to, amount, source } => Self::TransferFailed {
                to,
                amount,
                reason: source.to_string(),
            },
            StoreError::TransferUnconfirmed { to, amount } => {
                Self::TransferUnconfirmed { to, amount }
            }
            StoreError::Aborted(reason) => Self::Storage(format!("transaction aborted: {reason}")),
            StoreError::RollbackFailed {
                to,
                amount,
                storage,
            } => Self::Storage(format!(
                "rollback after failed transfer of {amount} to {to} did not apply: {storage}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticket_escrow_core::kv_store::StorageError;
    use ticket_escrow_core::transfer::TransferError;

    #[test]
    fn test_messages_carry_numeric_context() {
        let sold_out = LedgerError::SoldOut {
            event_id: EventId::new(3),
            requested: 5,
            remaining: 3,
        };
        assert!(sold_out.to_string().contains("tickets remaining: 3"));

        let refund = LedgerError::RefundWindowClosed {
            event_id: EventId::new(0),
            deadline: 100,
            now: 150,
        };
        assert!(
            refund
                .to_string()
                .starts_with("Refund not allowed (time limit passed and not canceled)")
        );
    }

    #[test]
    fn test_only_busy_is_retryable() {
        let busy = LedgerError::Busy {
            partition: "event/00000000000000000001".to_string(),
            waited_ms: 5_000,
        };
        assert!(busy.is_retryable());
        assert!(!LedgerError::NotFound { event_id: EventId::new(1) }.is_retryable());
        assert!(!LedgerError::ShutdownInProgress.is_retryable());
    }

    #[test]
    fn test_store_errors_map_onto_ledger_errors() {
        let rejected: LedgerError =
            StoreError::Rejected(LedgerError::AlreadyWithdrawn { event_id: EventId::new(2) }).into();
        assert_eq!(rejected, LedgerError::AlreadyWithdrawn { event_id: EventId::new(2) });

        let storage: LedgerError = StoreError::<LedgerError>::Storage(StorageError::Closed).into();
        assert_eq!(storage, LedgerError::Storage("Store is closed".to_string()));

        let transfer: LedgerError = StoreError::<LedgerError>::Transfer {
            to: Identity::from("bob"),
            amount: Amount::from_units(2),
            source: TransferError::Timeout,
        }
        .into();
        assert!(matches!(transfer, LedgerError::TransferFailed { reason, .. } if reason == "Transfer timed out"));

        let unconfirmed: LedgerError = StoreError::<LedgerError>::TransferUnconfirmed {
            to: Identity::from("organizer"),
            amount: Amount::from_units(30),
        }
        .into();
        assert_eq!(
            unconfirmed,
            LedgerError::TransferUnconfirmed {
                to: Identity::from("organizer"),
                amount: Amount::from_units(30),
            }
        );
        assert!(!unconfirmed.is_retryable());
    }
}
