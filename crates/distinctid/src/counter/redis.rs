use core::time::Duration;

use parking_lot::Mutex;
use redis::{
    Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tokio::sync::OnceCell;

use crate::{
    counter::{AsyncCounterBackend, CounterBackend},
    error::{Error, Result},
};

/// Connection settings for [`RedisCounter`].
///
/// Defaults match a local development server: `localhost:6379`, database 0,
/// no password and a five second socket timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    /// Applied to connecting and to every command round trip. Expiry surfaces
    /// as [`Error::BackendUnavailable`].
    pub socket_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 6379,
            db: 0,
            password: None,
            socket_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub const fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

/// A networked counter backend using Redis `INCR` / `INCRBY`.
///
/// Redis executes both commands atomically, which makes the counter safe to
/// share between any number of hosts. The synchronous path keeps one lazily
/// opened connection (reopened after any failure); the asynchronous path uses a
/// [`ConnectionManager`] created on first use.
pub struct RedisCounter {
    client: Client,
    timeout: Duration,
    connection: Mutex<Option<redis::Connection>>,
    manager: OnceCell<ConnectionManager>,
}

impl core::fmt::Debug for RedisCounter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisCounter")
            .field("addr", &self.client.get_connection_info().addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisCounter {
    /// Creates a counter for the given settings. No connection is made until
    /// the first increment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the settings are rejected by the
    /// client.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.connection_info()).map_err(invalid)?;
        Ok(Self::with_client(client, config.socket_timeout))
    }

    /// Creates a counter from a `redis://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the URL cannot be parsed.
    pub fn from_url(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(invalid)?;
        Ok(Self::with_client(client, timeout))
    }

    fn with_client(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            connection: Mutex::new(None),
            manager: OnceCell::new(),
        }
    }

    fn connect(&self) -> Result<redis::Connection> {
        let connection = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(unavailable)?;
        connection
            .set_read_timeout(Some(self.timeout))
            .map_err(unavailable)?;
        connection
            .set_write_timeout(Some(self.timeout))
            .map_err(unavailable)?;
        Ok(connection)
    }

    fn query(&self, cmd: &redis::Cmd) -> Result<u64> {
        let mut slot = self.connection.lock();
        let mut connection = match slot.take() {
            Some(connection) => connection,
            None => self.connect()?,
        };
        let total = cmd.query::<u64>(&mut connection).map_err(unavailable)?;
        // Only a connection that just succeeded goes back in the slot.
        *slot = Some(connection);
        Ok(total)
    }

    async fn manager(&self) -> Result<ConnectionManager> {
        self.manager
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(self.timeout)
                    .set_response_timeout(self.timeout);
                ConnectionManager::new_with_config(self.client.clone(), config)
                    .await
                    .map_err(unavailable)
            })
            .await
            .cloned()
    }

    async fn query_async(&self, cmd: redis::Cmd) -> Result<u64> {
        let mut manager = self.manager().await?;
        let total: u64 = cmd.query_async(&mut manager).await.map_err(unavailable)?;
        Ok(total)
    }
}

impl CounterBackend for RedisCounter {
    fn increment(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("INCR").arg(key))
    }

    fn increment_by(&self, key: &str, n: u64) -> Result<u64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(n))
    }
}

impl AsyncCounterBackend for RedisCounter {
    fn increment_async(&self, key: &str) -> impl Future<Output = Result<u64>> + Send {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(key);
        self.query_async(cmd)
    }

    fn increment_by_async(&self, key: &str, n: u64) -> impl Future<Output = Result<u64>> + Send {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(key).arg(n);
        self.query_async(cmd)
    }
}

fn unavailable(err: RedisError) -> Error {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connection_refusal() {
        "refused connection"
    } else if err.is_connection_dropped() {
        "dropped connection"
    } else {
        "failed"
    };

    #[cfg(feature = "tracing")]
    tracing::warn!(error = %err, "redis {kind}");

    Error::backend(format!("redis {kind}: {err}"))
}

fn invalid(err: RedisError) -> Error {
    Error::configuration(format!("invalid redis settings: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_local_server() {
        let info = RedisConfig::default().connection_info();
        assert!(matches!(info.addr, ConnectionAddr::Tcp(ref host, 6379) if host == "localhost"));
        assert_eq!(info.redis.db, 0);
        assert_eq!(info.redis.password, None);
    }

    #[test]
    fn config_carries_db_and_password() {
        let config = RedisConfig::default()
            .with_host("cache.internal")
            .with_port(6380)
            .with_db(3)
            .with_password("secret");
        assert_eq!(config.socket_timeout, Duration::from_secs(5));
        let info = config.connection_info();
        assert!(matches!(info.addr, ConnectionAddr::Tcp(ref host, 6380) if host == "cache.internal"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(info.redis.password.as_deref(), Some("secret"));
    }

    #[test]
    fn malformed_url_is_a_configuration_error() {
        let err = RedisCounter::from_url("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn refused_connection_is_backend_unavailable() {
        let config = RedisConfig {
            host: String::from("127.0.0.1"),
            port: 1,
            socket_timeout: Duration::from_millis(500),
            ..RedisConfig::default()
        };
        let counter = RedisCounter::new(&config).unwrap();
        let err = counter.increment("distinctid:test").unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    #[ignore = "requires a redis server on localhost:6379"]
    fn increments_against_live_server() {
        let counter = RedisCounter::new(&RedisConfig::default()).unwrap();
        let first = counter.increment("distinctid:test:live").unwrap();
        assert_eq!(counter.increment("distinctid:test:live").unwrap(), first + 1);
        assert_eq!(counter.increment_by("distinctid:test:live", 10).unwrap(), first + 11);
    }

    #[tokio::test]
    #[ignore = "requires a redis server on localhost:6379"]
    async fn async_increments_against_live_server() {
        let counter = RedisCounter::new(&RedisConfig::default()).unwrap();
        let first = counter.increment_async("distinctid:test:live-async").await.unwrap();
        let next = counter
            .increment_by_async("distinctid:test:live-async", 5)
            .await
            .unwrap();
        assert_eq!(next, first + 5);
    }
}
