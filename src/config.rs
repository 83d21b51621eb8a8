//! Server configuration
//!
//! Configuration is a plain value record assembled once at startup from,
//! lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file, where the dotted keys below are nested tables
//!    (`server.chunk.pause = 750` and `[server.chunk] pause = 750` are the
//!    same setting),
//! 3. environment variables: the key upper-cased with `.` replaced by `_`
//!    (`server.chunk.pause` -> `SERVER_CHUNK_PAUSE`).
//!
//! # Recognized keys
//!
//! | Key | Effect | Default |
//! |---|---|---|
//! | `server.port` | listening port | `7001` |
//! | `server.chunk.pause` | ms between first-chunk flush and tail emission | `750` (`2000` with `slow-pause`) |
//! | `server.netty.connection.socket.timeout` | socket read timeout, ms | `45000` |
//! | `server.netty.connection.idle.timeout` | idle connection timeout, s | `30` |
//! | `server.netty.socket.epoll` | prefer the native acceptor | `false` |
//! | `zuul.server.netty.threads.acceptor` | accept loops | `1` |
//! | `zuul.server.netty.threads.worker` | runtime worker threads | `4` |
//!
//! Only the chunk pause is dynamic: it lives behind a shared atomic
//! ([`ChunkPause`]) so a reload is seen by the next response without locking.
//!
//! # Examples
//!
//! ```
//! use chunkpause::config::ServerConfig;
//! use std::time::Duration;
//!
//! let mut config = ServerConfig::default();
//! config.apply_toml("server.chunk.pause = 120\nserver.port = 8080\n").unwrap();
//!
//! assert_eq!(config.server.port, 8080);
//! assert_eq!(config.chunk_pause.get(), Duration::from_millis(120));
//! ```

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{info, warn};

/// Listening port.
pub const KEY_PORT: &str = "server.port";
/// Milliseconds between the first flush and the tail.
pub const KEY_CHUNK_PAUSE: &str = "server.chunk.pause";
/// Per-read timeout in milliseconds once a request has started.
pub const KEY_SOCKET_TIMEOUT: &str = "server.netty.connection.socket.timeout";
/// Seconds an idle keep-alive connection is kept open.
pub const KEY_IDLE_TIMEOUT: &str = "server.netty.connection.idle.timeout";
/// Native acceptor preference, logged only.
pub const KEY_EPOLL: &str = "server.netty.socket.epoll";
/// Number of accept loops.
pub const KEY_ACCEPTOR_THREADS: &str = "zuul.server.netty.threads.acceptor";
/// Number of runtime worker threads.
pub const KEY_WORKER_THREADS: &str = "zuul.server.netty.threads.worker";

/// Every key read from the file or the environment.
pub const RECOGNIZED_KEYS: [&str; 7] = [
    KEY_PORT,
    KEY_CHUNK_PAUSE,
    KEY_SOCKET_TIMEOUT,
    KEY_IDLE_TIMEOUT,
    KEY_EPOLL,
    KEY_ACCEPTOR_THREADS,
    KEY_WORKER_THREADS,
];

/// Chunk pause used when nothing overrides it.
#[cfg(not(feature = "slow-pause"))]
pub const DEFAULT_CHUNK_PAUSE_MS: u64 = 750;
#[cfg(feature = "slow-pause")]
pub const DEFAULT_CHUNK_PAUSE_MS: u64 = 2000;

/// Complete server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub server: ServerLimits,
    pub connection: ConnLimits,
    pub request: ReqLimits,
    pub chunk_pause: ChunkPause,
}

impl ServerConfig {
    /// Defaults, then the TOML file (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            let text = fs::read_to_string(path)?;
            config.apply_toml(&text)?;
            info!(path = %path.display(), "loaded configuration file");
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies every recognized key of a TOML document. Unknown keys are
    /// logged and ignored.
    pub fn apply_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        let table: toml::Table = toml::from_str(text)?;
        for key in leaf_keys(&table) {
            if !RECOGNIZED_KEYS.contains(&key.as_str()) {
                warn!(key, "ignoring unrecognized config key");
            }
        }

        self.apply(&file)
    }

    /// Applies overrides for the recognized keys from an environment lookup.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        for key in RECOGNIZED_KEYS {
            if let Some(value) = lookup(&env_name(key)) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Sets one option by its dotted key, `value` being a TOML literal
    /// (`750`, `true`). Unknown keys are logged and ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if !RECOGNIZED_KEYS.contains(&key) {
            warn!(key, "ignoring unrecognized config key");
            return Ok(());
        }

        let invalid = || Error::Config {
            key: key.to_string(),
            value: value.to_string(),
        };
        if value.contains(['\n', '\r']) {
            return Err(invalid());
        }

        let file: FileConfig = toml::from_str(&format!("{key} = {value}")).map_err(|_| invalid())?;
        self.apply(&file).map_err(|_| invalid())
    }

    fn apply(&mut self, file: &FileConfig) -> Result<()> {
        let server = &file.server;
        let netty = &server.netty;
        let threads = &file.zuul.server.netty.threads;

        if let Some(port) = server.port {
            self.server.port = port;
        }
        if let Some(ms) = server.chunk.pause {
            self.chunk_pause.set(Duration::from_millis(ms));
        }
        if let Some(ms) = netty.connection.socket.timeout {
            self.connection.socket_read_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = netty.connection.idle.timeout {
            self.connection.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(epoll) = netty.socket.epoll {
            self.server.use_epoll = epoll;
        }
        if let Some(n) = threads.acceptor {
            self.server.acceptor_threads = non_zero(KEY_ACCEPTOR_THREADS, n)?;
        }
        if let Some(n) = threads.worker {
            self.server.worker_threads = non_zero(KEY_WORKER_THREADS, n)?;
        }
        Ok(())
    }
}

/// Reads only `server.chunk.pause` from a TOML document, for reloads.
pub fn chunk_pause_from_toml(text: &str) -> Result<Option<Duration>> {
    let file: FileConfig = toml::from_str(text)?;
    Ok(file.server.chunk.pause.map(Duration::from_millis))
}

#[inline]
fn env_name(key: &str) -> String {
    key.to_ascii_uppercase().replace('.', "_")
}

fn non_zero(key: &str, n: usize) -> Result<usize> {
    match n {
        0 => Err(Error::Config {
            key: key.to_string(),
            value: n.to_string(),
        }),
        n => Ok(n),
    }
}

/// Dotted paths of every non-table value, `a.b.c` for `[a.b] c = 1`.
fn leaf_keys(table: &toml::Table) -> Vec<String> {
    let mut keys = Vec::new();
    let mut stack: Vec<(String, &toml::Table)> = vec![(String::new(), table)];

    while let Some((prefix, table)) = stack.pop() {
        for (name, value) in table {
            let path = match prefix.is_empty() {
                true => name.clone(),
                false => format!("{prefix}.{name}"),
            };
            match value {
                toml::Value::Table(inner) => stack.push((path, inner)),
                _ => keys.push(path),
            }
        }
    }
    keys
}

// File layout: one struct per dotted-key segment.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: ServerTable,
    zuul: ZuulTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerTable {
    port: Option<u16>,
    chunk: ChunkTable,
    netty: NettyTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChunkTable {
    pause: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NettyTable {
    connection: NettyConnectionTable,
    socket: NettySocketTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NettyConnectionTable {
    socket: TimeoutTable,
    idle: TimeoutTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeoutTable {
    timeout: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NettySocketTable {
    epoll: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ZuulTable {
    server: ZuulServerTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ZuulServerTable {
    netty: ZuulNettyTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ZuulNettyTable {
    threads: ThreadsTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThreadsTable {
    acceptor: Option<usize>,
    worker: Option<usize>,
}

//

/// Process-wide limits for the listener and the connection tasks.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// TCP port to listen on.
    pub port: u16,
    /// Listen backlog (`SO_BACKLOG`).
    pub backlog: i32,
    /// Number of concurrent accept loops.
    pub acceptor_threads: usize,
    /// Number of runtime worker threads.
    pub worker_threads: usize,
    /// Connections open at once. Each one is its own task, idle or not;
    /// beyond this, new connections are answered with `503` and dropped.
    pub max_connections: usize,
    /// How the overload responder waits for turned-away streams.
    pub wait_strategy: WaitStrategy,
    /// Grace window for draining acceptors and connections at shutdown.
    pub shutdown_grace: Duration,
    /// Prefer the platform's native acceptor. Tokio always uses it, so this
    /// is only reported.
    pub use_epoll: bool,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            port: 7001,
            backlog: 128,
            acceptor_threads: 1,
            worker_threads: 4,
            max_connections: 10_000,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            shutdown_grace: Duration::from_secs(60),
            use_epoll: false,
        }
    }
}

/// Strategy used by a polling task while its queue is empty.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// Yield back to the scheduler and poll again.
    Yield,
    /// Sleep for the given period between polls.
    Sleep(Duration),
}

/// Per-connection timeouts.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Bound on each read once a request has started arriving.
    pub socket_read_timeout: Duration,
    /// Bound on waiting for the next request on an idle connection.
    pub idle_timeout: Duration,
    /// Bound on each flush to the socket.
    pub socket_write_timeout: Duration,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_millis(45_000),
            idle_timeout: Duration::from_secs(30),
            socket_write_timeout: Duration::from_secs(30),
        }
    }
}

/// Request head limits.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Largest accepted head, request line through blank line.
    pub max_head_size: usize,
    /// Most header lines accepted in one head.
    pub header_count: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            max_head_size: 8 * 1024,
            header_count: 64,
        }
    }
}

//

/// Delay between the first flush and the tail of a split response.
///
/// Clones share the same value; [`set`](ChunkPause::set) is visible to the
/// next [`get`](ChunkPause::get) on any clone.
#[derive(Debug, Clone)]
pub struct ChunkPause(Arc<AtomicU64>);

impl ChunkPause {
    /// New handle, not shared with any other.
    pub fn new(pause: Duration) -> Self {
        Self(Arc::new(AtomicU64::new(millis(pause))))
    }

    /// Current pause, millisecond precision.
    #[inline]
    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }

    /// Replaces the pause for every clone of this handle.
    #[inline]
    pub fn set(&self, pause: Duration) {
        self.0.store(millis(pause), Ordering::Relaxed);
    }
}

impl Default for ChunkPause {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS))
    }
}

#[inline]
fn millis(pause: Duration) -> u64 {
    pause.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.server.port, 7001);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.acceptor_threads, 1);
        assert_eq!(config.server.worker_threads, 4);
        assert_eq!(config.server.shutdown_grace, Duration::from_secs(60));
        assert!(!config.server.use_epoll);
        assert_eq!(config.connection.socket_read_timeout, Duration::from_millis(45_000));
        assert_eq!(config.connection.idle_timeout, Duration::from_secs(30));
        assert_eq!(
            config.chunk_pause.get(),
            Duration::from_millis(DEFAULT_CHUNK_PAUSE_MS)
        );
    }

    #[test]
    fn dotted_keys() {
        let text = r#"
            # comment
            server.chunk.pause = 2000
            server.netty.connection.socket.timeout = 1500
            server.netty.connection.idle.timeout = 5
            server.netty.socket.epoll = true
            zuul.server.netty.threads.acceptor = 2
            zuul.server.netty.threads.worker = 8
            some.other.key = "ignored"
        "#;

        let mut config = ServerConfig::default();
        config.apply_toml(text).unwrap();

        assert_eq!(config.chunk_pause.get(), Duration::from_millis(2000));
        assert_eq!(config.connection.socket_read_timeout, Duration::from_millis(1500));
        assert_eq!(config.connection.idle_timeout, Duration::from_secs(5));
        assert!(config.server.use_epoll);
        assert_eq!(config.server.acceptor_threads, 2);
        assert_eq!(config.server.worker_threads, 8);
    }

    #[test]
    fn nested_tables() {
        let text = "
            [server]
            port = 8081

            [server.chunk]
            pause = 40

            [zuul.server.netty.threads]
            worker = 3
        ";

        let mut config = ServerConfig::default();
        config.apply_toml(text).unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.chunk_pause.get(), Duration::from_millis(40));
        assert_eq!(config.server.worker_threads, 3);
        assert_eq!(config.server.acceptor_threads, 1);
    }

    #[test]
    fn invalid_file() {
        #[rustfmt::skip]
        let cases = [
            "server.chunk.pause = \"soon\"",
            "server.port = 70000",
            "server.netty.socket.epoll = 1",
            "server.chunk.pause = ",
        ];

        for text in cases {
            let mut config = ServerConfig::default();
            assert!(
                matches!(config.apply_toml(text), Err(Error::ConfigFile(_))),
                "{text:?}"
            );
        }

        let mut config = ServerConfig::default();
        assert!(matches!(
            config.apply_toml("zuul.server.netty.threads.worker = 0"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn invalid_values() {
        #[rustfmt::skip]
        let cases = [
            (KEY_PORT,             "70000"),
            (KEY_CHUNK_PAUSE,      "-1"),
            (KEY_CHUNK_PAUSE,      "soon"),
            (KEY_CHUNK_PAUSE,      "1\nserver.port = 1"),
            (KEY_EPOLL,            "yes"),
            (KEY_WORKER_THREADS,   "0"),
            (KEY_ACCEPTOR_THREADS, ""),
        ];

        for (key, value) in cases {
            let mut config = ServerConfig::default();
            match config.set(key, value) {
                Err(Error::Config { key: k, value: v }) => {
                    assert_eq!((k.as_str(), v.as_str()), (key, value));
                }
                other => panic!("{key}={value:?} gave {other:?}"),
            }
        }

        let mut config = ServerConfig::default();
        config.set("server.unknown", "1").unwrap();
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SERVER_CHUNK_PAUSE", "10"),
            ("SERVER_PORT", "9000"),
            ("ZUUL_SERVER_NETTY_THREADS_WORKER", "2"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_toml("server.chunk.pause = 500").unwrap();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.chunk_pause.get(), Duration::from_millis(10));
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.worker_threads, 2);
    }

    #[test]
    fn env_names() {
        assert_eq!(env_name(KEY_CHUNK_PAUSE), "SERVER_CHUNK_PAUSE");
        assert_eq!(
            env_name(KEY_ACCEPTOR_THREADS),
            "ZUUL_SERVER_NETTY_THREADS_ACCEPTOR"
        );
    }

    #[test]
    fn leaf_paths() {
        let table: toml::Table = toml::from_str("a.b = 1\n[c]\nd = true\ne.f = \"x\"").unwrap();
        let mut keys = leaf_keys(&table);
        keys.sort();

        assert_eq!(keys, ["a.b", "c.d", "c.e.f"]);
    }

    #[test]
    fn chunk_pause_is_shared() {
        let config = ServerConfig::default();
        let handle = config.chunk_pause.clone();

        handle.set(Duration::from_millis(42));
        assert_eq!(config.chunk_pause.get(), Duration::from_millis(42));
    }

    #[test]
    fn reload_reads_only_pause() {
        assert_eq!(
            chunk_pause_from_toml("server.port = 1\nserver.chunk.pause = 300\n").unwrap(),
            Some(Duration::from_millis(300))
        );
        assert_eq!(chunk_pause_from_toml("server.port = 1").unwrap(), None);
        assert!(chunk_pause_from_toml("server.chunk.pause = \"x\"").is_err());
    }

    #[test]
    fn load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[server.netty.connection.idle]\ntimeout = 12\n",
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.connection.idle_timeout, Duration::from_secs(12));
    }
}
