//! Domain types for the ticket escrow ledger.
//!
//! Times are whole seconds since the Unix epoch. Amounts are integers in the
//! smallest currency unit.

use serde::{Deserialize, Serialize};
use std::fmt;
use ticket_escrow_core::{Amount, Identity};

/// Refunds close this many seconds before an event starts, unless it is canceled
pub const REFUND_CUTOFF_SECS: u64 = 24 * 60 * 60;

// ============================================================================
// Identifiers
// ============================================================================

/// Sequential event identifier, starting at 0
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EventId(u64);

impl EventId {
    /// The first id ever handed out
    pub const FIRST: Self = Self(0);

    /// Creates an id from its numeric value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Numeric value
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The id allocated after this one, or `None` once ids are exhausted
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(next) => Some(Self(next)),
            None => None,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Event
// ============================================================================

/// Parameters for a new event; the caller becomes its organizer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Display title, must not be empty
    pub title: String,
    /// Price of one ticket
    pub unit_price: Amount,
    /// Start, strictly in the future
    pub start_time: u64,
    /// End, strictly after start
    pub end_time: u64,
    /// Tickets available, at least 1
    pub capacity: u64,
}

impl NewEvent {
    /// Creates event parameters
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        unit_price: Amount,
        start_time: u64,
        end_time: u64,
        capacity: u64,
    ) -> Self {
        Self {
            title: title.into(),
            unit_price,
            start_time,
            end_time,
            capacity,
        }
    }
}

/// A ticketed event and its sales state
///
/// Everything but `sold_count`, `is_canceled` and `funds_withdrawn` is fixed
/// at creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Sequential identifier
    pub id: EventId,
    /// Creator; the only identity allowed to cancel or withdraw
    pub organizer: Identity,
    /// Display title
    pub title: String,
    /// Price of one ticket
    pub unit_price: Amount,
    /// Start time
    pub start_time: u64,
    /// End time
    pub end_time: u64,
    /// Total tickets
    pub capacity: u64,
    /// Tickets currently held by buyers
    pub sold_count: u64,
    /// Set once by the organizer before the start
    pub is_canceled: bool,
    /// Set once when the organizer is paid out
    pub funds_withdrawn: bool,
}

impl Event {
    /// Creates an event with nothing sold
    #[must_use]
    pub fn new(id: EventId, organizer: Identity, params: NewEvent) -> Self {
        Self {
            id,
            organizer,
            title: params.title,
            unit_price: params.unit_price,
            start_time: params.start_time,
            end_time: params.end_time,
            capacity: params.capacity,
            sold_count: 0,
            is_canceled: false,
            funds_withdrawn: false,
        }
    }

    /// Tickets still for sale
    #[must_use]
    pub const fn tickets_remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.sold_count)
    }

    /// Whether every ticket is sold
    #[must_use]
    pub const fn is_sold_out(&self) -> bool {
        self.sold_count >= self.capacity
    }

    /// Whether the event has started at `now`
    #[must_use]
    pub const fn has_started(&self, now: u64) -> bool {
        now >= self.start_time
    }

    /// Whether the event is over at `now`
    #[must_use]
    pub const fn has_ended(&self, now: u64) -> bool {
        now > self.end_time
    }

    /// Last second a refund is accepted for a live event
    #[must_use]
    pub const fn refund_deadline(&self) -> u64 {
        self.start_time.saturating_sub(REFUND_CUTOFF_SECS)
    }

    /// Whether holders may ask for a refund at `now`
    #[must_use]
    pub const fn refund_window_open(&self, now: u64) -> bool {
        self.is_canceled || now < self.refund_deadline()
    }

    /// Value held in custody for this event
    ///
    /// `None` only if `unit_price * sold_count` overflows.
    #[must_use]
    pub const fn escrowed_balance(&self) -> Option<Amount> {
        if self.funds_withdrawn {
            return Some(Amount::ZERO);
        }
        self.unit_price.checked_mul(self.sold_count)
    }

    /// Lifecycle status at `now`
    #[must_use]
    pub const fn status(&self, now: u64) -> EventStatus {
        if self.is_canceled {
            EventStatus::Canceled
        } else if self.has_ended(now) {
            EventStatus::Ended
        } else if self.has_started(now) {
            EventStatus::InProgress
        } else if self.is_sold_out() {
            EventStatus::SoldOut
        } else {
            EventStatus::Upcoming
        }
    }
}

/// Lifecycle status shown to buyers
///
/// Checked in declaration order; the first that applies wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    /// Canceled by the organizer
    Canceled,
    /// Past its end time
    Ended,
    /// Between start and end
    InProgress,
    /// Not started, no tickets left
    SoldOut,
    /// Not started, tickets available
    Upcoming,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => write!(f, "canceled"),
            Self::Ended => write!(f, "ended"),
            Self::InProgress => write!(f, "in progress"),
            Self::SoldOut => write!(f, "sold out"),
            Self::Upcoming => write!(f, "upcoming"),
        }
    }
}

// ============================================================================
// Holding
// ============================================================================

/// Tickets one identity holds for one event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    /// Event the tickets are for
    pub event_id: EventId,
    /// Owner
    pub holder: Identity,
    /// Number of tickets
    pub quantity: u64,
}

impl Holding {
    /// An empty holding
    #[must_use]
    pub const fn empty(event_id: EventId, holder: Identity) -> Self {
        Self {
            event_id,
            holder,
            quantity: 0,
        }
    }
}
