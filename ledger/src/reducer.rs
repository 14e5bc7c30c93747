//! Event reducer: every ledger rule lives here.
//!
//! The reducer sees only the records one transaction touches (an
//! [`EventScope`]), reads the clock once, validates, and only then mutates.
//! Outbound value is described as a [`Effect::Transfer`] that the runtime
//! performs after the new state is committed.

use crate::error::{EventField, LedgerError, OrganizerAction};
use crate::notification::LedgerNotification;
use crate::types::{Event, EventId, Holding, NewEvent};
use std::sync::Arc;
use ticket_escrow_core::effect::Effect;
use ticket_escrow_core::environment::Clock;
use ticket_escrow_core::reducer::{Reduced, Reducer};
use ticket_escrow_core::transfer::Payout;
use ticket_escrow_core::{Amount, Identity};

/// Records one transaction operates on
///
/// Which fields are loaded depends on the command: the id counter for
/// creation, the event for everything else, and the caller's holding for
/// buys and refunds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventScope {
    /// Next id to allocate
    pub next_event_id: Option<EventId>,
    /// Event record
    pub event: Option<Event>,
    /// Caller's holding for the event
    pub holding: Option<Holding>,
}

/// Command issued by an authenticated caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerCommand {
    /// Create an event; the caller becomes organizer
    CreateEvent {
        /// Caller
        organizer: Identity,
        /// Event parameters
        event: NewEvent,
    },
    /// Buy `quantity` tickets paying exactly `tendered`
    BuyTicket {
        /// Event
        event_id: EventId,
        /// Caller
        buyer: Identity,
        /// Tickets wanted
        quantity: u64,
        /// Value sent with the purchase
        tendered: Amount,
    },
    /// Cancel an event before it starts
    CancelEvent {
        /// Event
        event_id: EventId,
        /// Caller
        caller: Identity,
    },
    /// Refund every ticket the caller holds
    RequestRefund {
        /// Event
        event_id: EventId,
        /// Caller
        caller: Identity,
    },
    /// Pay the proceeds to the organizer after the event ends
    WithdrawFunds {
        /// Event
        event_id: EventId,
        /// Caller
        caller: Identity,
    },
}

/// Value handed back for a successful command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Event the command applied to; the new id for a creation
    pub event_id: EventId,
    /// Value the command moved out of custody
    pub paid_out: Amount,
}

impl Outcome {
    /// Outcome of a command that moves no value
    #[must_use]
    pub const fn settled(event_id: EventId) -> Self {
        Self {
            event_id,
            paid_out: Amount::ZERO,
        }
    }

    /// Outcome of a command that pays `amount` out
    #[must_use]
    pub const fn paid(event_id: EventId, amount: Amount) -> Self {
        Self {
            event_id,
            paid_out: amount,
        }
    }
}

/// Environment for the event reducer
#[derive(Clone)]
pub struct LedgerEnvironment {
    /// Source of "now", read once per transaction
    pub clock: Arc<dyn Clock>,
}

impl LedgerEnvironment {
    /// Creates an environment around `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Reducer implementing the ledger's state machine
#[derive(Clone, Copy, Debug, Default)]
pub struct EventReducer;

type LedgerReduced = Reduced<Outcome, LedgerNotification>;

impl EventReducer {
    /// Validates `CreateEvent` parameters in field order
    fn validate_create(params: &NewEvent, now: u64) -> Result<(), LedgerError> {
        if params.title.is_empty() {
            return Err(LedgerError::invalid(EventField::Title, "Title must not be empty"));
        }
        if params.unit_price.is_zero() {
            return Err(LedgerError::invalid(
                EventField::UnitPrice,
                "Price must be greater than 0",
            ));
        }
        if params.start_time <= now {
            return Err(LedgerError::invalid(
                EventField::StartTime,
                "Event date must be in the future",
            ));
        }
        if params.end_time <= params.start_time {
            return Err(LedgerError::invalid(
                EventField::EndTime,
                "End date must be after start date",
            ));
        }
        if params.capacity == 0 {
            return Err(LedgerError::invalid(
                EventField::Capacity,
                "Capacity must be greater than 0",
            ));
        }
        Ok(())
    }

    fn find_event(scope: &EventScope, event_id: EventId) -> Result<&Event, LedgerError> {
        scope
            .event
            .as_ref()
            .filter(|event| event.id == event_id)
            .ok_or(LedgerError::NotFound { event_id })
    }

    fn held_by(scope: &EventScope, event_id: EventId, holder: &Identity) -> u64 {
        scope
            .holding
            .as_ref()
            .filter(|h| h.event_id == event_id && &h.holder == holder)
            .map_or(0, |h| h.quantity)
    }

    fn require_organizer(
        event: &Event,
        caller: &Identity,
        action: OrganizerAction,
    ) -> Result<(), LedgerError> {
        if &event.organizer == caller {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                event_id: event.id,
                caller: caller.clone(),
                action,
            })
        }
    }

    fn create_event(
        scope: &mut EventScope,
        organizer: Identity,
        params: NewEvent,
        now: u64,
    ) -> Result<LedgerReduced, LedgerError> {
        Self::validate_create(&params, now)?;

        let event_id = scope.next_event_id.unwrap_or(EventId::FIRST);
        let next = event_id.next().ok_or(LedgerError::Overflow {
            context: "next event id",
        })?;

        let event = Event::new(event_id, organizer, params);
        let notification = LedgerNotification::EventCreated {
            event_id,
            organizer: event.organizer.clone(),
            title: event.title.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
        };

        scope.next_event_id = Some(next);
        scope.event = Some(event);

        Ok(Reduced::new(Outcome::settled(event_id)).with_effect(Effect::Publish(notification)))
    }

    fn buy_ticket(
        scope: &mut EventScope,
        event_id: EventId,
        buyer: Identity,
        quantity: u64,
        tendered: Amount,
        now: u64,
    ) -> Result<LedgerReduced, LedgerError> {
        let event = Self::find_event(scope, event_id)?;
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity { quantity });
        }
        if event.is_canceled {
            return Err(LedgerError::EventCanceled { event_id });
        }
        if event.has_ended(now) {
            return Err(LedgerError::EventEnded {
                event_id,
                end_time: event.end_time,
                now,
            });
        }
        let remaining = event.tickets_remaining();
        if quantity > remaining {
            return Err(LedgerError::SoldOut {
                event_id,
                requested: quantity,
                remaining,
            });
        }
        let expected = event
            .unit_price
            .checked_mul(quantity)
            .ok_or(LedgerError::Overflow {
                context: "ticket cost",
            })?;
        if tendered != expected {
            return Err(LedgerError::IncorrectPayment { expected, tendered });
        }

        let sold_count = event.sold_count.checked_add(quantity).ok_or(LedgerError::Overflow {
            context: "sold count",
        })?;
        let held = Self::held_by(scope, event_id, &buyer)
            .checked_add(quantity)
            .ok_or(LedgerError::Overflow {
                context: "holding",
            })?;

        if let Some(event) = scope.event.as_mut() {
            event.sold_count = sold_count;
        }
        scope.holding = Some(Holding {
            event_id,
            holder: buyer.clone(),
            quantity: held,
        });

        Ok(Reduced::new(Outcome::settled(event_id)).with_effect(Effect::Publish(
            LedgerNotification::TicketPurchased {
                event_id,
                buyer,
                quantity,
            },
        )))
    }

    fn cancel_event(
        scope: &mut EventScope,
        event_id: EventId,
        caller: &Identity,
        now: u64,
    ) -> Result<LedgerReduced, LedgerError> {
        let event = Self::find_event(scope, event_id)?;
        Self::require_organizer(event, caller, OrganizerAction::Cancel)?;
        if event.is_canceled {
            return Err(LedgerError::AlreadyCanceled { event_id });
        }
        if event.has_started(now) {
            return Err(LedgerError::EventAlreadyStarted {
                event_id,
                start_time: event.start_time,
                now,
            });
        }

        if let Some(event) = scope.event.as_mut() {
            event.is_canceled = true;
        }

        Ok(Reduced::new(Outcome::settled(event_id))
            .with_effect(Effect::Publish(LedgerNotification::EventCanceled { event_id })))
    }

    fn request_refund(
        scope: &mut EventScope,
        event_id: EventId,
        caller: Identity,
        now: u64,
    ) -> Result<LedgerReduced, LedgerError> {
        let event = Self::find_event(scope, event_id)?;
        let held = Self::held_by(scope, event_id, &caller);
        if held == 0 {
            return Err(LedgerError::NoTicketsHeld {
                event_id,
                holder: caller,
            });
        }
        if !event.refund_window_open(now) {
            return Err(LedgerError::RefundWindowClosed {
                event_id,
                deadline: event.refund_deadline(),
                now,
            });
        }
        let amount = event
            .unit_price
            .checked_mul(held)
            .ok_or(LedgerError::Overflow {
                context: "refund amount",
            })?;
        let sold_count = event.sold_count.checked_sub(held).ok_or(LedgerError::Overflow {
            context: "sold count",
        })?;

        // Effects before interactions: the holding is gone before value moves
        if let Some(event) = scope.event.as_mut() {
            event.sold_count = sold_count;
        }
        scope.holding = Some(Holding::empty(event_id, caller.clone()));

        Ok(Reduced::new(Outcome::paid(event_id, amount))
            .with_effect(Effect::Transfer(Payout::new(caller.clone(), amount)))
            .with_effect(Effect::Publish(LedgerNotification::RefundIssued {
                event_id,
                holder: caller,
                amount,
            })))
    }

    fn withdraw_funds(
        scope: &mut EventScope,
        event_id: EventId,
        caller: &Identity,
        now: u64,
    ) -> Result<LedgerReduced, LedgerError> {
        let event = Self::find_event(scope, event_id)?;
        Self::require_organizer(event, caller, OrganizerAction::Withdraw)?;
        if event.is_canceled {
            return Err(LedgerError::EventCanceled { event_id });
        }
        if !event.has_ended(now) {
            return Err(LedgerError::EventNotEnded {
                event_id,
                end_time: event.end_time,
                now,
            });
        }
        if event.funds_withdrawn {
            return Err(LedgerError::AlreadyWithdrawn { event_id });
        }
        let amount = event
            .unit_price
            .checked_mul(event.sold_count)
            .ok_or(LedgerError::Overflow {
                context: "withdrawal amount",
            })?;
        let organizer = event.organizer.clone();

        if let Some(event) = scope.event.as_mut() {
            event.funds_withdrawn = true;
        }

        let mut reduced = Reduced::new(Outcome::paid(event_id, amount));
        if !amount.is_zero() {
            reduced = reduced.with_effect(Effect::Transfer(Payout::new(organizer.clone(), amount)));
        }
        Ok(reduced.with_effect(Effect::Publish(LedgerNotification::FundsWithdrawn {
            event_id,
            organizer,
            amount,
        })))
    }
}

impl Reducer for EventReducer {
    type State = EventScope;
    type Action = LedgerCommand;
    type Environment = LedgerEnvironment;
    type Output = Outcome;
    type Error = LedgerError;
    type Notification = LedgerNotification;

    fn reduce(
        &self,
        state: &mut EventScope,
        action: LedgerCommand,
        env: &LedgerEnvironment,
    ) -> Result<LedgerReduced, LedgerError> {
        let now = env.clock.unix_now();

        match action {
            LedgerCommand::CreateEvent { organizer, event } => {
                Self::create_event(state, organizer, event, now)
            }
            LedgerCommand::BuyTicket {
                event_id,
                buyer,
                quantity,
                tendered,
            } => Self::buy_ticket(state, event_id, buyer, quantity, tendered, now),
            LedgerCommand::CancelEvent { event_id, caller } => {
                Self::cancel_event(state, event_id, &caller, now)
            }
            LedgerCommand::RequestRefund { event_id, caller } => {
                Self::request_refund(state, event_id, caller, now)
            }
            LedgerCommand::WithdrawFunds { event_id, caller } => {
                Self::withdraw_funds(state, event_id, &caller, now)
            }
        }
    }
}
