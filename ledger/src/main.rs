//! Ticket ledger demo.
//!
//! Runs one event through its lifecycle against the configured store and
//! prints the resulting notifications and metrics.

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticket_escrow_core::environment::{Clock, SystemClock};
use ticket_escrow_core::{Amount, Identity};
use ticket_escrow_runtime::metrics::MetricsServer;
use ticket_escrow_runtime::retry::{RetryPolicy, retry_with_predicate};
use ticket_ledger::{Ledger, LedgerConfig, LedgerError, LoggingTransfer, NewEvent};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HOUR: u64 = 3_600;
const DAY: u64 = 24 * HOUR;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = LedgerConfig::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("invalid configuration")?;
    info!(data_path = ?config.data_path, "Configuration loaded");

    let mut metrics = MetricsServer::new(SocketAddr::from(([0, 0, 0, 0], 9090)));
    metrics.start().context("failed to install metrics recorder")?;

    let clock = Arc::new(SystemClock);
    let ledger = Ledger::open(&config, clock.clone(), LoggingTransfer::shared()).await?;

    let organizer = Identity::from("organizer");
    let alice = Identity::from("alice");
    let bob = Identity::from("bob");

    let price = Amount::checked_scaled(1, 18).context("unit price overflows")?;
    let start = clock.unix_now() + 2 * DAY;
    let event_id = ledger
        .create_event(&organizer, NewEvent::new("Launch Party", price, start, start + HOUR, 100))
        .await?;

    let policy = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(50))
        .build();

    for (buyer, quantity) in [(&alice, 2), (&bob, 3)] {
        let tendered = price
            .checked_mul(quantity)
            .context("ticket cost overflows")?;
        retry_with_predicate(
            policy.clone(),
            || ledger.buy_ticket(buyer, event_id, quantity, tendered),
            LedgerError::is_retryable,
        )
        .await?;
    }

    let refunded = ledger.request_refund(&alice, event_id).await?;
    info!(amount = %refunded, "Alice refunded");

    ledger.cancel_event(&organizer, event_id).await?;
    let refunded = ledger.request_refund(&bob, event_id).await?;
    info!(amount = %refunded, "Bob refunded after cancellation");

    match ledger.withdraw_funds(&organizer, event_id).await {
        Err(e) => info!(error = %e, "Withdrawal refused as expected"),
        Ok(amount) => anyhow::bail!("withdrawal of {amount} from a canceled event"),
    }

    let event = ledger.get_event(event_id).await?;
    info!(
        status = %event.status(clock.unix_now()),
        sold = event.sold_count,
        escrowed = %ledger.escrowed_balance(event_id).await?,
        "Final event state"
    );

    for published in ledger.notifications() {
        println!("{}", serde_json::to_string(&published)?);
    }

    if let Some(rendered) = metrics.render() {
        println!("{rendered}");
    }

    ledger.shutdown().await?;
    info!("Ledger shut down");
    Ok(())
}
