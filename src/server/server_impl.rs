use crate::{
    assets::AssetStore,
    config::{ServerConfig, WaitStrategy},
    errors::{Result, SERVICE_UNAVAILABLE},
    pipeline::{dispatcher::Dispatcher, scheduler::DelayScheduler},
    server::connection::HttpConnection,
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{watch, Semaphore},
    task::{yield_now, JoinSet},
    time::{sleep as tokio_sleep, timeout},
};
use tracing::{debug, error, info, warn};

/// The chunking demo server: accept loops spawning one task per
/// connection, bounded by `max_connections` open connections.
///
/// # Examples
///
/// ```no_run
/// use chunkpause::{AssetStore, Server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> chunkpause::Result<()> {
///     let config = ServerConfig::default();
///     let server = Server::builder()
///         .listener(Server::bind(([0, 0, 0, 0], 7001).into(), config.server.backlog)?)
///         .assets(AssetStore::load_dir("web")?)
///         .config(config)
///         .build();
///
///     let shutdown = server.shutdown_handle();
///     tokio::spawn(async move {
///         let _ = tokio::signal::ctrl_c().await;
///         shutdown.shutdown();
///     });
///
///     server.launch().await;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: Arc<TcpListener>,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            assets: None,
            config: None,
        }
    }

    /// Opens a listening socket with reuse-address, `SO_KEEPALIVE` and the
    /// given backlog. Must be called inside a Tokio runtime.
    pub fn bind(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_keepalive(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        Ok(TcpListener::from_std(socket.into())?)
    }

    /// Address the listener is bound to.
    #[inline]
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops this server from anywhere.
    #[inline]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves until shutdown is requested, then stops accepting and waits
    /// for open connections, each step within the configured grace window.
    pub async fn launch(self) {
        let limits = &self.config.server;
        let addr = self.listener.local_addr().ok();
        let permits = connection_permits(limits.max_connections);
        info!(
            addr = ?addr,
            acceptors = limits.acceptor_threads,
            max_connections = permits,
            pause_ms = self.config.chunk_pause.get().as_millis() as u64,
            "server started"
        );
        if limits.use_epoll {
            info!("native acceptor requested; the runtime reactor already uses it");
        }

        let connections = Arc::new(Semaphore::new(permits as usize));
        let error_queue: TcpQueue = Arc::new(SegQueue::new());

        let mut alarmist = JoinSet::new();
        self.spawn_alarmist(&mut alarmist, &error_queue);

        let mut acceptors = JoinSet::new();
        for _ in 0..limits.acceptor_threads {
            self.spawn_acceptor(&mut acceptors, &connections, &error_queue);
        }

        let mut stop = self.shutdown.subscribe();
        // An `Err` means every handle is gone, which is a stop as well.
        let _ = stop.wait_for(|stop| *stop).await;

        info!("stopping acceptors");
        drain("acceptor", acceptors, limits.shutdown_grace).await;

        info!(open = permits as usize - connections.available_permits(), "draining connections");
        match timeout(limits.shutdown_grace, connections.acquire_many(permits)).await {
            Ok(_) => info!("connections drained"),
            Err(_) => warn!(
                grace = ?limits.shutdown_grace,
                remaining = permits as usize - connections.available_permits(),
                "connections still open after grace window"
            ),
        }

        drain("alarmist", alarmist, limits.shutdown_grace).await;
        info!("server stopped");
    }

    fn spawn_acceptor(&self, set: &mut JoinSet<()>, connections: &Arc<Semaphore>, error_queue: &TcpQueue) {
        let listener = self.listener.clone();
        let connections = connections.clone();
        let error_queue = error_queue.clone();
        let dispatcher = self.dispatcher.clone();
        let conn_limits = self.config.connection.clone();
        let req_limits = self.config.request.clone();
        let shutdown = self.shutdown.clone();
        let mut stop = self.shutdown.subscribe();

        set.spawn(async move {
            loop {
                let accepted = tokio::select! {
                    biased;

                    _ = async {
                        let _ = stop.wait_for(|stop| *stop).await;
                    } => break,
                    accepted = listener.accept() => accepted,
                };

                let (stream, addr) = match accepted {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(error = %e, "accept failed");
                        continue;
                    }
                };
                configure_stream(&stream);

                let Ok(permit) = connections.clone().try_acquire_owned() else {
                    error_queue.push((stream, addr));
                    continue;
                };

                let mut conn = HttpConnection::new(
                    dispatcher.clone(),
                    conn_limits.clone(),
                    req_limits.clone(),
                    shutdown.subscribe(),
                );
                tokio::spawn(async move {
                    debug!(%addr, "connection accepted");

                    match conn.run(stream).await {
                        Ok(()) => debug!(%addr, "connection closed"),
                        Err(err) if err.is_quiet_close() => debug!(%addr, reason = %err, "connection closed"),
                        Err(err) => debug!(%addr, error = %err, "connection dropped"),
                    }
                    drop(permit);
                });
            }
        });
    }

    /// Answers streams accepted over the connection limit with a canned 503.
    fn spawn_alarmist(&self, set: &mut JoinSet<()>, queue: &TcpQueue) {
        let queue = queue.clone();
        let wait = self.config.server.wait_strategy.clone();
        let write_timeout = self.config.connection.socket_write_timeout;
        let shutdown = self.shutdown.subscribe();

        set.spawn(async move {
            while let Some((mut stream, addr)) = next_stream(&queue, &wait, &shutdown).await {
                warn!(%addr, "connection limit reached, answering 503");
                let _ = timeout(write_timeout, stream.write_all(SERVICE_UNAVAILABLE)).await;
            }
        });
    }
}

/// `max_connections` as a semaphore size: at least one, at most what a
/// single `acquire_many` can take back.
#[inline]
fn connection_permits(max_connections: usize) -> u32 {
    max_connections
        .clamp(1, Semaphore::MAX_PERMITS)
        .try_into()
        .unwrap_or(u32::MAX)
}

/// Next queued stream. `None` once shutdown has begun and the queue is
/// empty.
async fn next_stream(
    queue: &TcpQueue,
    wait: &WaitStrategy,
    shutdown: &watch::Receiver<bool>,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        if let Some(value) = queue.pop() {
            return Some(value);
        }
        let stopping = *shutdown.borrow();
        if stopping {
            return None;
        }

        match wait {
            WaitStrategy::Yield => yield_now().await,
            WaitStrategy::Sleep(time) => tokio_sleep(*time).await,
        }
    }
}

#[inline]
fn configure_stream(stream: &TcpStream) {
    if let Err(e) = SockRef::from(stream).set_keepalive(true) {
        debug!(error = %e, "SO_KEEPALIVE not set");
    }
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "TCP_NODELAY not set");
    }
}

async fn drain(tasks: &'static str, mut set: JoinSet<()>, grace: Duration) {
    let joined = timeout(grace, async {
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(tasks, error = %e, "task panicked");
                }
            }
        }
    })
    .await;

    match joined {
        Ok(()) => info!(tasks, "tasks drained"),
        Err(_) => {
            warn!(tasks, ?grace, remaining = set.len(), "tasks did not finish in time, aborting");
            set.shutdown().await;
        }
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    assets: Option<Arc<AssetStore>>,
    config: Option<ServerConfig>,
}

impl ServerBuilder {
    /// Sets the listener that the server will accept connections on.
    ///
    /// **This is a required component.** See [`Server::bind`].
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the asset bundle served under `/web`. Defaults to an empty
    /// bundle, which answers every asset route with `500`.
    #[inline(always)]
    pub fn assets(mut self, assets: AssetStore) -> Self {
        self.assets = Some(Arc::new(assets));
        self
    }

    /// Sets limits, timeouts and the chunk pause. Defaults to
    /// [`ServerConfig::default`].
    #[inline(always)]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Finalizes the builder.
    ///
    /// # Panics
    ///
    /// Panics when [`listener`](Self::listener) was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let config = self.config.unwrap_or_default();
        let assets = self.assets.unwrap_or_default();

        let (sender, _) = watch::channel(false);
        let dispatcher = Dispatcher::new(assets, DelayScheduler::new(config.chunk_pause.clone()));

        Server {
            listener: Arc::new(listener),
            dispatcher: Arc::new(dispatcher),
            config,
            shutdown: ShutdownHandle(Arc::new(sender)),
        }
    }
}

//

/// Requests a graceful stop. Cloneable; the first call wins.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Stops accepting and lets open connections drain. Returns `false` if shutdown
    /// was already under way.
    pub fn shutdown(&self) -> bool {
        let started = self.0.send_if_modified(|stop| match *stop {
            true => false,
            false => {
                *stop = true;
                true
            }
        });

        match started {
            true => info!("shutdown requested"),
            false => info!("server already stopped"),
        }
        started
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    #[inline]
    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn server(config: ServerConfig) -> Server {
        let listener = Server::bind(([127, 0, 0, 1], 0).into(), config.server.backlog).unwrap();
        Server::builder()
            .listener(listener)
            .assets(AssetStore::from_entries([("/web/clean/favicon.ico", "ICO")]))
            .config(config)
            .build()
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let server = server(ServerConfig::default()).await;
        let handle = server.shutdown_handle();

        assert!(!handle.is_shutdown());
        assert!(handle.shutdown());
        assert!(!handle.shutdown());
        assert!(handle.clone().is_shutdown());
    }

    #[tokio::test]
    async fn serves_and_stops() {
        let server = server(ServerConfig::default()).await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.launch());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /favicon.ico HTTP/1.0\r\n\r\n")
            .await
            .unwrap();
        let mut wire = String::new();
        stream.read_to_string(&mut wire).await.unwrap();
        assert!(wire.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(wire.ends_with("ICO"));

        handle.shutdown();
        timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
    }

    async fn fetch_icon(stream: &mut TcpStream) {
        stream
            .write_all(b"GET /favicon.ico HTTP/1.1\r\nhost: test\r\n\r\n")
            .await
            .unwrap();

        let mut wire = Vec::new();
        let mut buf = [0u8; 1024];
        while !wire.ends_with(b"ICO") {
            let n = stream.read(&mut buf).await.unwrap();
            assert_ne!(n, 0, "closed early: {:?}", String::from_utf8_lossy(&wire));
            wire.extend_from_slice(&buf[..n]);
        }
        assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn overflow_answers_503() {
        let mut config = ServerConfig::default();
        config.server.max_connections = 1;

        let server = server(config).await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.launch());

        let mut held = TcpStream::connect(addr).await.unwrap();
        fetch_icon(&mut held).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut wire = Vec::new();
        stream.read_to_end(&mut wire).await.unwrap();
        assert_eq!(wire, SERVICE_UNAVAILABLE);

        handle.shutdown();
        timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn permit_returns_on_close() {
        let mut config = ServerConfig::default();
        config.server.max_connections = 1;

        let server = server(config).await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.launch());

        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /favicon.ico HTTP/1.0\r\n\r\n")
                .await
                .unwrap();
            let mut wire = String::new();
            stream.read_to_string(&mut wire).await.unwrap();
            assert!(wire.starts_with("HTTP/1.0 200 OK\r\n"), "{wire}");
            // The permit is released after the server side closes.
            tokio_sleep(Duration::from_millis(50)).await;
        }

        handle.shutdown();
        timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_clients_do_not_block_new_ones() {
        let server = server(ServerConfig::default()).await;
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let running = tokio::spawn(server.launch());

        let mut idle = Vec::new();
        for _ in 0..32 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            fetch_icon(&mut stream).await;
            idle.push(stream);
        }

        let mut fresh = TcpStream::connect(addr).await.unwrap();
        timeout(Duration::from_secs(2), fetch_icon(&mut fresh))
            .await
            .expect("new client starved by idle keep-alive clients");

        // Idle ones are still being served too.
        fetch_icon(&mut idle[0]).await;

        handle.shutdown();
        timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
    }

    #[test]
    fn permit_count() {
        #[rustfmt::skip]
        let cases = [
            (0,          1),
            (1,          1),
            (10_000,     10_000),
            (usize::MAX, Semaphore::MAX_PERMITS.min(u32::MAX as usize) as u32),
        ];

        for (max, expected) in cases {
            assert_eq!(connection_permits(max), expected, "{max}");
        }
    }
}
