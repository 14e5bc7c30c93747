//! # Ticket Escrow Core
//!
//! Core traits and value types for the ticket escrow ledger.
//!
//! This crate provides the abstractions every other layer builds on: the
//! reducer that holds all business rules, the effect descriptions it returns,
//! and the injected dependencies (clock, key-value store, value transfer)
//! that keep the rules deterministic and testable.
//!
//! ## Core Concepts
//!
//! - **State**: The records a single transaction touches
//! - **Action**: A command issued by an authenticated caller
//! - **Reducer**: `(State, Action, Environment) → Result<(Output, Effects), Error>`
//! - **Effect**: Outbound interactions (value transfers, notifications), described but not executed
//! - **Environment**: Injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Checks, then effects, then interactions
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```ignore
//! use ticket_escrow_core::*;
//!
//! impl Reducer for EventReducer {
//!     type State = EventScope;
//!     type Action = LedgerCommand;
//!     type Environment = LedgerEnvironment;
//!     type Output = Outcome;
//!     type Error = LedgerError;
//!     type Notification = LedgerNotification;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut EventScope,
//!         action: LedgerCommand,
//!         env: &LedgerEnvironment,
//!     ) -> Result<Reduced<Outcome, LedgerNotification>, LedgerError> {
//!         // Validate first, then mutate, then describe interactions
//!         todo!()
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Key-value storage abstraction
pub mod kv_store;

/// Transaction-scoped record loading and saving
pub mod repository;

/// Outbound value transfer primitive
pub mod transfer;

/// Identities and currency amounts
pub mod value;

pub use value::{Amount, Identity};

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business rules, and they are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Effects returned by a single reduction
    pub type Effects<N> = SmallVec<[Effect<N>; 4]>;

    /// Successful result of a reduction: a value for the caller plus
    /// the interactions the runtime performs once the new state is committed.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Reduced<O, N> {
        /// Value returned to the caller
        pub output: O,
        /// Interactions to perform after commit, in order
        pub effects: Effects<N>,
    }

    impl<O, N> Reduced<O, N> {
        /// Creates a result without effects
        #[must_use]
        pub fn new(output: O) -> Self {
            Self {
                output,
                effects: SmallVec::new(),
            }
        }

        /// Appends an effect
        #[must_use]
        pub fn with_effect(mut self, effect: Effect<N>) -> Self {
            self.effects.push(effect);
            self
        }
    }

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The records a transaction operates on
    /// - `Action`: The command this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Output`: The value handed back to the caller on success
    /// - `Error`: The rejection type
    /// - `Notification`: Facts published after a successful transaction
    ///
    /// # Contract
    ///
    /// A reducer validates everything before it touches `state`. When it
    /// returns `Err`, `state` is exactly what it was on entry.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The value returned to the caller
        type Output;

        /// The rejection type
        type Error;

        /// The notification type published on success
        type Notification;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when validation fails. State is left untouched.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Reduced<Self::Output, Self::Notification>, Self::Error>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe interactions to be performed by the runtime after the
/// state produced by a reducer has been committed. They are values, not
/// execution.
pub mod effect {
    use crate::transfer::Payout;

    /// Effect type - describes an interaction to be executed
    ///
    /// # Type Parameters
    ///
    /// - `N`: The notification type published to subscribers
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Effect<N> {
        /// No-op effect
        None,

        /// Move value out of custody
        Transfer(Payout),

        /// Publish a notification once every transfer has succeeded
        Publish(N),
    }

    impl<N> Effect<N> {
        /// Returns the payout if this is a transfer
        #[must_use]
        pub const fn as_transfer(&self) -> Option<&Payout> {
            match self {
                Effect::Transfer(payout) => Some(payout),
                _ => None,
            }
        }

        /// Returns the notification if this is a publish
        #[must_use]
        pub const fn as_notification(&self) -> Option<&N> {
            match self {
                Effect::Publish(notification) => Some(notification),
                _ => None,
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket_escrow_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// assert!(clock.unix_now() > 1_600_000_000);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;

        /// Current time as whole seconds since the Unix epoch
        ///
        /// Instants before the epoch clamp to 0.
        fn unix_now(&self) -> u64 {
            u64::try_from(self.now().timestamp()).unwrap_or(0)
        }
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
