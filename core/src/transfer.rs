//! Outbound value transfer primitive.
//!
//! The ledger never moves money itself. Whoever embeds it supplies a
//! [`ValueTransfer`] implementation (a wallet, a payment processor, a chain
//! client) and the runtime calls it once a transaction has committed.

use crate::value::{Amount, Identity};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`ValueTransfer::transfer`]
pub type TransferFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransferReceipt, TransferError>> + Send + 'a>>;

/// Value leaving custody
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Recipient
    pub to: Identity,
    /// Amount in smallest units
    pub amount: Amount,
}

impl Payout {
    /// Creates a payout
    #[must_use]
    pub const fn new(to: Identity, amount: Amount) -> Self {
        Self { to, amount }
    }
}

/// Confirmation of a completed transfer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Reference assigned by the transfer backend
    pub reference: String,
    /// The payout that was executed
    pub payout: Payout,
}

/// Transfer failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The backend refused the transfer
    #[error("Transfer rejected: {reason}")]
    Rejected {
        /// Rejection reason
        reason: String,
    },

    /// The backend did not answer in time
    #[error("Transfer timed out")]
    Timeout,

    /// The backend could not be reached
    #[error("Transfer backend unavailable: {0}")]
    Unavailable(String),
}

impl TransferError {
    /// Whether value may have moved despite the error
    ///
    /// A rejected or unreachable transfer moved nothing. A timed-out one
    /// may have been paid by the backend after the caller stopped waiting.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Value transfer trait
///
/// Abstraction over whatever actually moves value to a recipient.
pub trait ValueTransfer: Send + Sync {
    /// Moves `payout.amount` to `payout.to`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Rejected`] or [`TransferError::Unavailable`]
    /// only if the value did not move.
    fn transfer(&self, payout: Payout) -> TransferFuture<'_>;
}
