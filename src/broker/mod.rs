// =============================================================================
// Broker Gateway — live positions in, close commands out
// =============================================================================
//
// The cycle only ever talks to a `Broker`. Close commands are fire-and-forget:
// a returned `Ok` means the broker accepted the request, not that it filled.
// =============================================================================

pub mod alpaca;

use async_trait::async_trait;
use tracing::info;

use crate::error::BrokerError;
use crate::types::Position;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Every position currently open on the account.
    async fn list_open_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Liquidate the whole position in `ticker`.
    async fn close_position(&self, ticker: &str) -> Result<(), BrokerError>;
}

/// Wraps a real broker and simulates close commands locally. Positions are
/// still read from the inner broker so decisions are made on live data.
pub struct DryRunBroker<B> {
    inner: B,
}

impl<B: Broker> DryRunBroker<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: Broker> Broker for DryRunBroker<B> {
    async fn list_open_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.inner.list_open_positions().await
    }

    async fn close_position(&self, ticker: &str) -> Result<(), BrokerError> {
        info!(ticker, "dry run: close command simulated, broker not contacted");
        Ok(())
    }
}
