//! Development transfer backend.
//!
//! Stands in for a real wallet or payment processor: every payout succeeds
//! and is logged. Embedders supply their own [`ValueTransfer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use ticket_escrow_core::transfer::{Payout, TransferFuture, TransferReceipt, ValueTransfer};

/// Transfer backend that always succeeds and logs each payout
#[derive(Debug, Default)]
pub struct LoggingTransfer {
    next_reference: AtomicU64,
}

impl LoggingTransfer {
    /// Creates a new backend
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_reference: AtomicU64::new(0),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn ValueTransfer> {
        Arc::new(Self::new())
    }
}

impl ValueTransfer for LoggingTransfer {
    fn transfer(&self, payout: Payout) -> TransferFuture<'_> {
        Box::pin(async move {
            let reference = format!(
                "local_txn_{}",
                self.next_reference.fetch_add(1, Ordering::SeqCst)
            );

            tracing::info!(
                to = %payout.to,
                amount = %payout.amount,
                reference = %reference,
                "Payout sent"
            );

            Ok(TransferReceipt { reference, payout })
        })
    }
}
