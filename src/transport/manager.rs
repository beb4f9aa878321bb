//! Stream connection manager
//!
//! Handles reconnection and resubscription. Each connection attempt uses a
//! fresh client; subscriptions after the first pass the listener's retained
//! resume tokens so the server answers with a delta instead of a new image.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::StreamClient;
use crate::config::Config;
use crate::error::Result;
use crate::listener::SharedListener;
use crate::request::SubscriptionOptions;
use crate::stream::SubscriptionKind;

/// Backoff exponent cap
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Runs the stream with automatic reconnection until shut down
pub struct StreamManager {
    config: Arc<Config>,
    listener: SharedListener,
    shutdown: CancellationToken,
    reconnect_attempts: u32,
}

impl StreamManager {
    pub fn new(config: Arc<Config>, listener: SharedListener) -> Self {
        Self {
            config,
            listener,
            shutdown: CancellationToken::new(),
            reconnect_attempts: 0,
        }
    }

    /// Token that ends `run` when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn listener(&self) -> &SharedListener {
        &self.listener
    }

    /// Connect, subscribe and read until shutdown, reconnecting on failure
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting stream manager");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let client = Arc::new(StreamClient::new(self.config.clone(), self.listener.clone()));
            let shutdown = self.shutdown.clone();
            let accepted_before = self.listener.read().accepted_changes();

            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    client.stop();
                    break;
                }
                result = self.connect_and_stream(&client) => result,
            };

            let served = self.listener.read().accepted_changes() > accepted_before;
            let delay = self.retry_delay(result, served);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.listener.write().stop();
        info!("Stream manager stopped");
        Ok(())
    }

    /// Delay before reconnecting after one connection attempt. The backoff
    /// only resets once the server has served the subscription.
    fn retry_delay(&mut self, result: Result<()>, served: bool) -> Duration {
        if served {
            self.reconnect_attempts = 0;
        }

        match result {
            Ok(()) => {
                info!("Stream stopped, reconnecting");
                Duration::from_millis(self.config.reconnect_delay_ms)
            }
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Stream error");
                self.reconnect_attempts += 1;
                let delay = self.backoff_delay();
                warn!(
                    attempt = self.reconnect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting after error"
                );
                delay
            }
        }
    }

    /// Delay before the next attempt: base * 2^attempts, capped
    pub fn backoff_delay(&self) -> Duration {
        let exponent = self.reconnect_attempts.min(MAX_BACKOFF_EXPONENT);
        let delay = self.config.reconnect_delay_ms.saturating_mul(2u64.pow(exponent));
        Duration::from_millis(delay.min(self.config.max_reconnect_delay_ms))
    }

    async fn connect_and_stream(&self, client: &StreamClient) -> Result<()> {
        client.connect().await?;
        client.authenticate().await?;
        self.subscribe(client).await?;
        client.read_loop().await
    }

    async fn subscribe(&self, client: &StreamClient) -> Result<()> {
        let config = &self.config;

        client
            .subscribe_to_markets(
                config.market_filter(),
                config.market_data_filter(),
                self.options(SubscriptionKind::Market),
            )
            .await?;

        if config.subscribe_orders {
            client
                .subscribe_to_orders(config.order_filter(), self.options(SubscriptionKind::Order))
                .await?;
        }

        if config.subscribe_races {
            client.subscribe_to_races().await?;
        }
        Ok(())
    }

    /// Subscription options carrying any resume tokens already seen
    pub fn options(&self, kind: SubscriptionKind) -> SubscriptionOptions {
        let listener = self.listener.read();
        SubscriptionOptions {
            initial_clk: listener.initial_clk(kind),
            clk: listener.clk(kind),
            conflate_ms: self.config.conflate_ms,
            heartbeat_ms: self.config.heartbeat_ms,
            segmentation_enabled: self.config.segmentation_enabled,
        }
    }
}
