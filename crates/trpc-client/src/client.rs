use std::cmp::Ordering;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::Instant;
use trpc_common::transport::{best_effort, Codec, BUF_SIZE, HEADER_SIZE, NO_TIMEOUT};
use trpc_common::{Endpoint, Request, Response, Result, Token, TrpcError};

use crate::health::Health;
use crate::params::IntoParams;
use crate::token::TokenGenerator;

/// Readiness waits per best-effort operation
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Client configuration.
///
/// # Default Configuration
///
/// - `timeout`: [`NO_TIMEOUT`]
/// - `max_retries`: 10
///
/// # Example
///
/// ```rust
/// use trpc_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new().with_timeout(Duration::from_millis(150));
/// assert_eq!(config.max_retries, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Soft per-operation I/O budget
    pub timeout: Duration,
    /// Readiness waits the budget is split into
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: NO_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// trpc client owning exactly one TCP connection.
///
/// A call fully completes (or is abandoned) before the next one starts:
/// `call` takes `&mut self`, so two calls can never interleave on one socket.
///
/// # Failure handling
///
/// - A failed request write closes the connection: a partial request would
///   desynchronize the server's framing.
/// - A timed-out response read keeps the connection open and records the
///   partial progress in [`Health`]; the stale bytes are drained before the
///   next request is sent.
/// - A closed or failing socket while reading closes the connection.
///
/// # Example
///
/// ```rust,no_run
/// use trpc_client::Client;
/// use trpc_common::Endpoint;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = Client::make(Endpoint::localhost(2333)).await?;
///
/// let sum: Option<i64> = client.call("add", (1, 2)).await;
/// assert_eq!(sum, Some(3));
/// # Ok(())
/// # }
/// ```
pub struct Client {
    stream: Option<TcpStream>,
    config: ClientConfig,
    // last failure, taken by `error()`
    last_error: Option<TrpcError>,
    tokens: TokenGenerator,
    codec: Codec,
    health: Health,
    buf: Box<[u8]>,
}

impl Client {
    /// Creates an unconnected client. See [`Client::connect`].
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            stream: None,
            config,
            last_error: None,
            tokens: TokenGenerator::new(),
            codec: Codec::new(),
            health: Health::new(),
            buf: vec![0u8; BUF_SIZE].into_boxed_slice(),
        }
    }

    /// Creates a client connected to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be created or the connect fails.
    pub async fn make(endpoint: Endpoint) -> Result<Self> {
        let mut client = Self::new();
        client.open(endpoint).await?;
        Ok(client)
    }

    /// Connects to `endpoint`, replacing any current connection.
    ///
    /// Returns false on failure; the cause is available from [`Client::error`].
    pub async fn connect(&mut self, endpoint: Endpoint) -> bool {
        match self.open(endpoint).await {
            Ok(()) => true,
            Err(e) => {
                self.last_error = Some(e);
                false
            }
        }
    }

    async fn open(&mut self, endpoint: Endpoint) -> Result<()> {
        self.close();

        let socket = TcpSocket::new_v4()?;
        let stream = tokio::time::timeout(self.config.timeout, socket.connect(endpoint.into()))
            .await
            .map_err(|_| TrpcError::Timeout { transferred: 0 })??;
        stream.set_nodelay(true)?;

        tracing::debug!(%endpoint, "connected");
        self.stream = Some(stream);
        self.health = Health::new();
        Ok(())
    }

    /// Calls `method` with `params`, returning `None` on any failure.
    ///
    /// The cause of the last failure is kept for [`Client::error`]. Use
    /// [`Client::try_call`] to get it directly, including the server's error
    /// envelope.
    pub async fn call<T, P>(&mut self, method: &str, params: P) -> Option<T>
    where
        T: DeserializeOwned,
        P: IntoParams,
    {
        match self.try_call(method, params).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(method, error = %e, "call failed");
                self.last_error = Some(e);
                None
            }
        }
    }

    /// Calls `method` with `params`.
    ///
    /// # Errors
    ///
    /// - [`TrpcError::NotConnected`] if the connection was closed
    /// - [`TrpcError::Unhealthy`] if a stale response could not be drained
    /// - [`TrpcError::Timeout`], [`TrpcError::PeerClosed`], [`TrpcError::Io`] on transport failures
    /// - [`TrpcError::FrameTooLarge`] if the response does not fit the receive buffer
    /// - [`TrpcError::Remote`] if the server answered with an error envelope
    /// - [`TrpcError::Json`] if the result cannot be coerced to `T`
    pub async fn try_call<T, P>(&mut self, method: &str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: IntoParams,
    {
        let params = params.into_params()?;
        let stream = self.stream.as_ref().ok_or(TrpcError::NotConnected)?;

        if !self.health.check(stream).await {
            return Err(TrpcError::Unhealthy);
        }

        let token = self.tokens.acquire();
        let request = Request::new(token, method, params);
        let dump = self.codec.dump(&request)?;
        let timeout = self.config.timeout;
        let retries = self.config.max_retries;

        // sacrificing availability for consistency: a request that was only
        // partly written cannot be resynchronized
        if let Err(e) = best_effort::write(stream, &dump.be_length, timeout, retries).await {
            if e.transferred > 0 || !e.is_timeout() {
                self.close();
            }
            return Err(e.into());
        }
        if let Err(e) = best_effort::write(stream, &dump.bytes, timeout, retries).await {
            // prefix bytes are already on the wire
            self.close();
            return Err(e.into());
        }

        let response = match read_response(
            stream,
            &mut self.buf,
            &mut self.health,
            &self.codec,
            token,
            &self.config,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.is_fatal() {
                    self.close();
                }
                return Err(e);
            }
        };

        let result = response.into_result()?;
        Ok(serde_json::from_value(result)?)
    }

    /// Sets the soft per-operation I/O budget.
    ///
    /// A call may still overrun it slightly when the last retry straddles
    /// the boundary.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns and clears the last recorded failure.
    pub fn error(&mut self) -> Option<TrpcError> {
        self.last_error.take()
    }

    pub fn health(&self) -> &Health {
        &self.health
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn local_addr(&self) -> Result<Endpoint> {
        let stream = self.stream.as_ref().ok_or(TrpcError::NotConnected)?;
        Endpoint::try_from(stream.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<Endpoint> {
        let stream = self.stream.as_ref().ok_or(TrpcError::NotConnected)?;
        Endpoint::try_from(stream.peer_addr()?)
    }

    /// Closes the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            tracing::debug!(peer = ?stream.peer_addr().ok(), "closing connection");
        }
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads frames until the response for `token` arrives.
///
/// A complete frame with an older token is the late reply to an abandoned
/// call and is skipped. Timeouts record partial progress in `health`.
async fn read_response(
    stream: &TcpStream,
    buf: &mut [u8],
    health: &mut Health,
    codec: &Codec,
    token: Token,
    config: &ClientConfig,
) -> Result<Response> {
    let start = Instant::now();

    loop {
        let budget = config.timeout.saturating_sub(start.elapsed());
        if let Err(e) =
            best_effort::read(stream, &mut buf[..HEADER_SIZE], budget, config.max_retries).await
        {
            if e.is_timeout() {
                health.header_read_some(&buf[..e.transferred]);
            }
            return Err(e.into());
        }

        let length = codec
            .frame_length(buf)
            .ok_or_else(|| TrpcError::Protocol("unreadable response header".to_string()))?;
        let total = HEADER_SIZE + length;
        if total > buf.len() {
            return Err(TrpcError::FrameTooLarge {
                length: total,
                capacity: buf.len(),
            });
        }

        let budget = config.timeout.saturating_sub(start.elapsed());
        if let Err(e) =
            best_effort::read(stream, &mut buf[HEADER_SIZE..total], budget, config.max_retries)
                .await
        {
            if e.is_timeout() {
                health.content_read_some(e.transferred, length);
            }
            return Err(e.into());
        }

        if !codec.verify(&buf[..total]) {
            return Err(TrpcError::Protocol("incomplete response frame".to_string()));
        }
        let response: Response = codec.decode(&buf[..total])?;

        match response.id.cmp(&token) {
            Ordering::Equal => return Ok(response),
            Ordering::Less => {
                tracing::debug!(stale = response.id, token, "discarding late response");
            }
            Ordering::Greater => {
                return Err(TrpcError::TokenMismatch {
                    expected: token,
                    received: response.id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, NO_TIMEOUT);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);

        let config = config.with_timeout(Duration::from_secs(1)).with_max_retries(3);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_new_client_is_unconnected() {
        let mut client = Client::new();
        assert!(!client.is_connected());
        assert!(client.error().is_none());
        assert!(matches!(client.local_addr(), Err(TrpcError::NotConnected)));
    }

    #[tokio::test]
    async fn test_call_without_connection() {
        let mut client = Client::new();

        let result: Option<i64> = client.call("add", (1, 2)).await;
        assert!(result.is_none());
        assert!(matches!(client.error(), Some(TrpcError::NotConnected)));
        // error() clears
        assert!(client.error().is_none());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = Client::new();
        assert!(!client.connect(Endpoint::localhost(port)).await);
        assert!(matches!(client.error(), Some(TrpcError::Io(_))));
        assert!(Client::make(Endpoint::localhost(port)).await.is_err());
    }

    #[test]
    fn test_set_timeout() {
        let mut client = Client::new();
        client.set_timeout(Duration::from_millis(150));
        assert_eq!(client.timeout(), Duration::from_millis(150));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut client = Client::new();
        client.close();
        client.close();
        assert!(!client.is_connected());
    }
}
