//! Stream API client
//!
//! Owns one TLS connection. Commands are written as CRLF-terminated JSON
//! frames; the read loop splits inbound bytes into frames and hands each one
//! to the listener. All methods take `&self` so the client can be shared
//! with whoever needs to call `stop`.

use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::framing::next_frame;
use crate::config::Config;
use crate::error::{Result, StreamError};
use crate::listener::{dispatch, ListenerAction, SharedListener};
use crate::request::{MarketDataFilter, MarketFilter, OrderFilter, RequestMessage, SubscriptionOptions};
use crate::stream::SubscriptionKind;

/// Any duplex byte stream the client can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

type BoxedStream = Box<dyn AsyncStream>;

pub struct StreamClient {
    config: Arc<Config>,
    listener: SharedListener,
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    /// Last request id handed out
    unique_id: AtomicU32,
    running: AtomicBool,
    cancel: parking_lot::Mutex<CancellationToken>,
}

impl StreamClient {
    pub fn new(config: Arc<Config>, listener: SharedListener) -> Self {
        Self {
            config,
            listener,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            unique_id: AtomicU32::new(0),
            running: AtomicBool::new(false),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }

    pub fn listener(&self) -> &SharedListener {
        &self.listener
    }

    /// Open the TLS connection to the configured host
    pub async fn connect(&self) -> Result<()> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        info!(host = %host, port, "Connecting to stream API");

        let tcp = timeout(self.config.connect_timeout(), TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                StreamError::Socket(format!(
                    "connect to {}:{} timed out after {}s",
                    host, port, self.config.connect_timeout_secs
                ))
            })??;
        tcp.set_nodelay(true)?;

        let connector = tokio_native_tls::TlsConnector::from(tokio_native_tls::native_tls::TlsConnector::new()?);
        let tls = connector.connect(host, tcp).await?;

        self.connect_with(tls).await;
        Ok(())
    }

    /// Run over an already established stream
    pub async fn connect_with<S: AsyncStream + 'static>(&self, io: S) {
        let boxed: BoxedStream = Box::new(io);
        let (reader, writer) = tokio::io::split(boxed);
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        *self.cancel.lock() = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
        info!("Stream connection established");
    }

    fn next_unique_id(&self) -> u32 {
        self.unique_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn authenticate(&self) -> Result<u32> {
        let id = self.next_unique_id();
        info!(unique_id = id, "Authenticating");
        self.send(&RequestMessage::Authentication {
            id,
            app_key: self.config.app_key.clone(),
            session: self.config.session_token.clone(),
        })
        .await?;
        Ok(id)
    }

    pub async fn heartbeat(&self) -> Result<u32> {
        let id = self.next_unique_id();
        self.send(&RequestMessage::Heartbeat { id }).await?;
        Ok(id)
    }

    /// Subscribe to market data. Resume tokens in `options` keep the existing
    /// market stream and its caches; otherwise a fresh stream is registered.
    pub async fn subscribe_to_markets(
        &self,
        market_filter: MarketFilter,
        market_data_filter: MarketDataFilter,
        options: SubscriptionOptions,
    ) -> Result<u32> {
        let id = self.next_unique_id();
        self.register(id, SubscriptionKind::Market, &options);
        info!(unique_id = id, resume = options.clk.is_some(), "Subscribing to markets");
        self.send(&RequestMessage::market_subscription(id, market_filter, market_data_filter, options))
            .await?;
        Ok(id)
    }

    pub async fn subscribe_to_orders(&self, order_filter: OrderFilter, options: SubscriptionOptions) -> Result<u32> {
        let id = self.next_unique_id();
        self.register(id, SubscriptionKind::Order, &options);
        info!(unique_id = id, resume = options.clk.is_some(), "Subscribing to orders");
        self.send(&RequestMessage::order_subscription(id, order_filter, options))
            .await?;
        Ok(id)
    }

    pub async fn subscribe_to_races(&self) -> Result<u32> {
        let id = self.next_unique_id();
        self.listener.write().register_stream(id, SubscriptionKind::Race);
        info!(unique_id = id, "Subscribing to races");
        self.send(&RequestMessage::RaceSubscription { id }).await?;
        Ok(id)
    }

    fn register(&self, id: u32, kind: SubscriptionKind, options: &SubscriptionOptions) {
        let mut listener = self.listener.write();
        if options.initial_clk.is_some() || options.clk.is_some() {
            listener.resume_stream(id, kind);
        } else {
            listener.register_stream(id, kind);
        }
    }

    /// Write one command, connecting and authenticating first if needed
    pub async fn send(&self, message: &RequestMessage) -> Result<()> {
        if !self.is_running() {
            self.connect().await?;
            let id = self.next_unique_id();
            let auth = RequestMessage::Authentication {
                id,
                app_key: self.config.app_key.clone(),
                session: self.config.session_token.clone(),
            };
            self.write_frame(&auth).await?;
        }
        self.write_frame(message).await
    }

    async fn write_frame(&self, message: &RequestMessage) -> Result<()> {
        let frame = message
            .to_frame()
            .map_err(|e| StreamError::Serialization(e.to_string()))?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(StreamError::NotConnected)?;
        if let Err(e) = writer.write_all(&frame).await {
            error!(error = %e, "Socket write failed");
            drop(guard);
            self.stop();
            return Err(e.into());
        }
        writer.flush().await?;
        debug!(unique_id = message.id(), bytes = frame.len(), "Sent command");
        Ok(())
    }

    /// Connect if needed, then run the read loop
    pub async fn start(&self) -> Result<()> {
        if !self.is_running() {
            self.connect().await?;
        }
        self.read_loop().await
    }

    /// Read frames until stopped or the connection fails. A server-side close
    /// is returned as `ServerClosed`; only a local `stop` ends with `Ok`.
    pub async fn read_loop(&self) -> Result<()> {
        let token = self.cancel.lock().clone();
        let read_timeout = self.config.read_timeout();

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(StreamError::NotConnected)?;
        let mut buffer = BytesMut::with_capacity(self.config.buffer_size);
        let mut closed_by_server = None;

        let result = loop {
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => match closed_by_server {
                    Some(code) => break Err(StreamError::ServerClosed(code)),
                    None => break Ok(()),
                },
                read = timeout(read_timeout, reader.read_buf(&mut buffer)) => read,
            };

            match read {
                Err(_) => break Err(StreamError::Timeout(self.config.timeout_secs)),
                Ok(Err(e)) => break Err(StreamError::from(e)),
                Ok(Ok(0)) => break Err(StreamError::Socket("connection closed by server".to_string())),
                Ok(Ok(_)) => {}
            }

            while let Some(frame) = next_frame(&mut buffer) {
                if token.is_cancelled() {
                    break;
                }
                let raw = match std::str::from_utf8(&frame) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(error = %e, "Dropping frame that is not valid UTF-8");
                        continue;
                    }
                };
                if let ListenerAction::Stop(code) = dispatch(&self.listener, raw) {
                    closed_by_server = Some(code);
                    self.stop();
                }
            }
        };

        *guard = None;
        drop(guard);
        self.running.store(false, Ordering::SeqCst);
        self.shutdown_writer().await;

        match &result {
            Ok(()) => info!("Read loop stopped"),
            Err(e) => error!(error = %e, "Read loop terminated"),
        }
        result
    }

    async fn shutdown_writer(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "Socket shutdown failed");
            }
        }
    }

    /// Stop the connection; safe to call repeatedly and from any thread.
    /// Halves not held by a running read loop or write are dropped here; a
    /// running read loop releases its own on exit.
    pub fn stop(&self) {
        {
            let token = self.cancel.lock();
            if !token.is_cancelled() {
                info!("Stopping stream client");
                token.cancel();
            }
        }
        self.running.store(false, Ordering::SeqCst);

        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
