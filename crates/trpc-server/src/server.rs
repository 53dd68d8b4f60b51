use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use trpc_common::transport::{best_effort, Cause, Codec, BUF_SIZE, HEADER_SIZE, NO_TIMEOUT};
use trpc_common::{Endpoint, Fault, Request, Response, Result, TrpcError, VERSION};

use crate::dispatch::{CallProxy, FallibleHandler, Handler};

/// Readiness waits per best-effort operation
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Default bound on how long a kept-alive connection may stay idle (1 hour)
pub const DEFAULT_PENDING: Duration = Duration::from_secs(60 * 60);

const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Server configuration.
///
/// # Default Configuration
///
/// - `timeout`: [`NO_TIMEOUT`]
/// - `pending`: 1 hour
/// - `max_retries`: 6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Soft budget for reading one request or writing one response
    pub timeout: Duration,
    /// Wait for the first byte of the next request on an idle connection
    pub pending: Duration,
    pub max_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: NO_TIMEOUT,
            pending: DEFAULT_PENDING,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pending(mut self, pending: Duration) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// What a hook decides about the message it was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep processing the message
    Proceed,
    /// Drop the message silently and wait for the next request
    Suppress,
    /// Drop the message and close the connection
    Disconnect,
}

impl From<bool> for Verdict {
    fn from(proceed: bool) -> Self {
        if proceed {
            Verdict::Proceed
        } else {
            Verdict::Suppress
        }
    }
}

type RequestHook = Arc<dyn Fn(&mut Request) -> Verdict + Send + Sync>;
type ResponseHook = Arc<dyn Fn(&mut Response) -> Verdict + Send + Sync>;

/// Stops a running server's accept loop.
///
/// Connections already accepted keep being served until their peer leaves.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// trpc server: a listening socket plus a method table.
///
/// Methods are bound before [`Server::start`], which consumes the server;
/// the table is read-only once connections are being served.
///
/// # Example
///
/// ```rust,no_run
/// use trpc_server::Server;
/// use trpc_common::Endpoint;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut server = Server::make(Endpoint::localhost(2333)).await?;
/// server.bind("add", |a: i64, b: i64| a + b);
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    listener: TcpListener,
    endpoint: Endpoint,
    config: ServerConfig,
    table: HashMap<String, CallProxy>,
    on_request: Option<RequestHook>,
    on_response: Option<ResponseHook>,
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
}

impl Server {
    /// Binds and listens on `endpoint` with the default configuration.
    ///
    /// The socket is set up with `SO_REUSEADDR` and `SO_REUSEPORT`, so several
    /// servers may listen on the same port. Port 0 picks an ephemeral port,
    /// see [`Server::local_addr`].
    pub async fn make(endpoint: Endpoint) -> Result<Self> {
        Self::with_config(endpoint, ServerConfig::default()).await
    }

    pub async fn with_config(endpoint: Endpoint, config: ServerConfig) -> Result<Self> {
        let listener = listen(endpoint)
            .map_err(|e| TrpcError::Connection(format!("Failed to bind to {}: {}", endpoint, e)))?;
        let endpoint = listener
            .local_addr()
            .map_err(|e| TrpcError::Connection(format!("Failed to get local addr: {}", e)))
            .and_then(Endpoint::try_from)?;

        info!(%endpoint, "listening");
        let (close_tx, close_rx) = watch::channel(false);
        Ok(Server {
            listener,
            endpoint,
            config,
            table: HashMap::new(),
            on_request: None,
            on_response: None,
            close_tx: Arc::new(close_tx),
            close_rx,
        })
    }

    /// Registers `handler` under `method`, replacing any previous binding.
    pub fn bind<H, Args>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.insert(method.into(), CallProxy::new(handler))
    }

    /// Registers a handler returning `Result<R, E>`; `Err(e)` is answered
    /// with an internal error carrying `e`'s message.
    pub fn bind_fallible<H, Args>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: FallibleHandler<Args>,
        Args: 'static,
    {
        self.insert(method.into(), CallProxy::fallible(handler))
    }

    fn insert(&mut self, method: String, proxy: CallProxy) -> &mut Self {
        debug!(method = %method, arity = proxy.arity(), "method bound");
        if self.table.insert(method.clone(), proxy).is_some() {
            warn!(method = %method, "method rebound");
        }
        self
    }

    /// Installs a hook run on every decoded request before dispatch.
    pub fn on_request<F, V>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Request) -> V + Send + Sync + 'static,
        V: Into<Verdict>,
    {
        self.on_request = Some(Arc::new(move |request: &mut Request| -> Verdict {
            hook(request).into()
        }));
        self
    }

    /// Installs a hook run on every response before it is written.
    pub fn on_response<F, V>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&mut Response) -> V + Send + Sync + 'static,
        V: Into<Verdict>,
    {
        self.on_response = Some(Arc::new(move |response: &mut Response| -> Verdict {
            hook(response).into()
        }));
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    pub fn set_pending(&mut self, pending: Duration) {
        self.config.pending = pending;
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the listening socket is actually bound to.
    pub fn local_addr(&self) -> Endpoint {
        self.endpoint
    }

    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            tx: self.close_tx.clone(),
        }
    }

    /// Closes the listening socket without serving.
    pub fn close(self) {
        info!(endpoint = %self.endpoint, "closed");
    }

    /// Accepts connections until closed through a [`CloseHandle`].
    ///
    /// Each connection is served by its own task. Failed accepts are logged
    /// and skipped; per-connection failures only end that connection.
    pub async fn start(self) -> Result<()> {
        let Server {
            listener,
            endpoint,
            config,
            table,
            on_request,
            on_response,
            close_tx,
            mut close_rx,
        } = self;

        let shared = Arc::new(Shared {
            config,
            table,
            codec: Codec::new(),
            on_request,
            on_response,
        });

        info!(%endpoint, methods = shared.table.len(), "server started");

        loop {
            if *close_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                changed = close_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            shared.serve(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        accept_backoff().await;
                    }
                }
            }
        }

        drop(close_tx);
        info!(%endpoint, "server stopped");
        Ok(())
    }
}

async fn accept_backoff() {
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("methods", &self.table.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn listen(endpoint: Endpoint) -> std::io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(endpoint.into())?;
    socket.listen(LISTEN_BACKLOG)
}

/// State shared by every connection task of one server.
struct Shared {
    config: ServerConfig,
    table: HashMap<String, CallProxy>,
    codec: Codec,
    on_request: Option<RequestHook>,
    on_response: Option<ResponseHook>,
}

impl Shared {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }

        match self.serve_connection(&stream).await {
            Ok(()) => debug!(%peer, "connection closed"),
            Err(e @ (TrpcError::Protocol(_) | TrpcError::FrameTooLarge { .. })) => {
                warn!(%peer, error = %e, "connection aborted");
            }
            Err(e) => debug!(%peer, error = %e, "connection dropped"),
        }
    }

    /// Request loop of one connection. `Ok` means the peer left cleanly or a
    /// hook asked to disconnect.
    async fn serve_connection(&self, stream: &TcpStream) -> Result<()> {
        let ServerConfig {
            timeout,
            pending,
            max_retries,
        } = self.config;
        let mut buf = vec![0u8; BUF_SIZE];

        loop {
            best_effort::pending(stream, pending).await?;

            match best_effort::read(stream, &mut buf[..HEADER_SIZE], timeout, max_retries).await {
                Ok(()) => {}
                Err(e) if e.transferred == 0 && matches!(e.cause, Cause::PeerClosed) => {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let length = self
                .codec
                .frame_length(&buf)
                .ok_or_else(|| TrpcError::Protocol("unreadable frame header".to_string()))?;
            let total = HEADER_SIZE + length;
            if total > buf.len() {
                return Err(TrpcError::FrameTooLarge {
                    length: total,
                    capacity: buf.len(),
                });
            }

            best_effort::read(stream, &mut buf[HEADER_SIZE..total], timeout, max_retries).await?;
            if !self.codec.verify(&buf[..total]) {
                return Err(TrpcError::Protocol("incomplete request frame".to_string()));
            }

            let mut request: Request = self
                .codec
                .decode(&buf[..total])
                .map_err(|e| TrpcError::Protocol(format!("undecodable request: {}", e)))?;
            debug!(id = request.id, method = %request.method, length, "request");

            if let Some(hook) = &self.on_request {
                match hook(&mut request) {
                    Verdict::Proceed => {}
                    Verdict::Suppress => continue,
                    Verdict::Disconnect => return Ok(()),
                }
            }

            let mut response = Response::empty_for(&request);
            match self.dispatch(request) {
                Ok(result) => response.result = Some(result),
                Err(fault) => {
                    debug!(id = response.id, %fault, "dispatch failed");
                    self.codec.make_error_envelope(&mut response, &fault);
                }
            }

            if let Some(hook) = &self.on_response {
                match hook(&mut response) {
                    Verdict::Proceed => {}
                    Verdict::Suppress => continue,
                    Verdict::Disconnect => return Ok(()),
                }
            }

            let dump = self.codec.dump(&response)?;
            best_effort::write(stream, &dump.be_length, timeout, max_retries).await?;
            best_effort::write(stream, &dump.bytes, timeout, max_retries).await?;
        }
    }

    fn dispatch(&self, request: Request) -> std::result::Result<Value, Fault> {
        if request.version != VERSION {
            return Err(Fault::InvalidRequest(format!(
                "unsupported version '{}'",
                request.version
            )));
        }

        let proxy = self
            .table
            .get(&request.method)
            .ok_or_else(|| Fault::MethodNotFound(request.method.clone()))?;

        let params = request.params;
        match panic::catch_unwind(AssertUnwindSafe(|| proxy.call(params))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                warn!(method = %request.method, "handler panicked");
                Err(Fault::Internal(panic_message(payload.as_ref())))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
