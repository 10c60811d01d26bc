use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, ValueEnum};
use distinctid::DEFAULT_COUNTER_KEY;
#[cfg(feature = "redis")]
use distinctid::RedisConfig;

/// Most identifiers one invocation may print.
pub const MAX_COUNT: i64 = 10_000_000;

/// Command-line settings for the `distinctid` binary.
///
/// Every option falls back to an environment variable, so the same binary can
/// be driven from a `.env` file in deployments and from flags interactively.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "distinctid",
    version,
    about = "Generate sortable 64-bit distinct IDs from a shared counter"
)]
pub struct CliArgs {
    /// Number of identifiers to print (at most 10,000,000).
    #[arg(short = 'n', long, env = "DISTINCTID_COUNT", default_value_t = 1)]
    pub count: i64,

    /// Shard embedded in every identifier (0-8191).
    ///
    /// Environment variable: `SHARD_ID`
    #[arg(short, long, env = "SHARD_ID", default_value_t = 0)]
    pub shard_id: i64,

    /// Counter key. Producers sharing a key share one sequence.
    ///
    /// Environment variable: `DISTINCTID_KEY`
    #[arg(short, long, env = "DISTINCTID_KEY", default_value_t = String::from(DEFAULT_COUNTER_KEY))]
    pub key: String,

    /// Counter backend.
    ///
    /// Environment variable: `DISTINCTID_BACKEND`
    #[arg(long, env = "DISTINCTID_BACKEND", value_enum, default_value_t = BackendKind::File)]
    pub backend: BackendKind,

    /// Directory holding file counters.
    ///
    /// Environment variable: `DISTINCTID_COUNTER_DIR`
    #[arg(long, env = "DISTINCTID_COUNTER_DIR", default_value = ".distinctid")]
    pub counter_dir: PathBuf,

    /// Environment variable: `DISTINCTID_REDIS_HOST`
    #[arg(long, env = "DISTINCTID_REDIS_HOST", default_value_t = String::from("localhost"))]
    pub redis_host: String,

    /// Environment variable: `DISTINCTID_REDIS_PORT`
    #[arg(long, env = "DISTINCTID_REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Environment variable: `DISTINCTID_REDIS_DB`
    #[arg(long, env = "DISTINCTID_REDIS_DB", default_value_t = 0)]
    pub redis_db: i64,

    /// Environment variable: `DISTINCTID_REDIS_PASSWORD`
    #[arg(long, env = "DISTINCTID_REDIS_PASSWORD", hide_env_values = true)]
    pub redis_password: Option<String>,

    /// Connect and command timeout in milliseconds.
    ///
    /// Environment variable: `DISTINCTID_REDIS_TIMEOUT_MS`
    #[arg(long, env = "DISTINCTID_REDIS_TIMEOUT_MS", default_value_t = 5_000)]
    pub redis_timeout_ms: u64,

    /// Reserve counter values in blocks of this size. Unset means one counter
    /// round trip per identifier.
    ///
    /// Environment variable: `DISTINCTID_BUFFER_SIZE`
    #[arg(short, long, env = "DISTINCTID_BUFFER_SIZE")]
    pub buffer_size: Option<u64>,

    /// Reserve all identifiers with a single counter call.
    #[arg(long, default_value_t = false)]
    pub batch: bool,

    /// Use the asynchronous entry points.
    #[arg(long = "async", default_value_t = false)]
    pub use_async: bool,

    /// Count allocations and log per-call timings.
    ///
    /// Environment variable: `DISTINCTID_METRICS`
    #[arg(long, env = "DISTINCTID_METRICS", default_value_t = false)]
    pub metrics: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    File,
    Redis,
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    File {
        dir: PathBuf,
    },
    #[cfg(feature = "redis")]
    Redis(RedisConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub count: i64,
    pub shard_id: i64,
    pub key: String,
    pub backend: BackendConfig,
    pub buffer_size: Option<u64>,
    pub batch: bool,
    pub use_async: bool,
    pub metrics: bool,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        // Bad shards and counts are caught here so nothing touches a counter.
        distinctid::validate_count(args.count)?;
        distinctid::validate_shard(args.shard_id)?;

        if args.count > MAX_COUNT {
            bail!("DISTINCTID_COUNT ({}) exceeds the maximum of {MAX_COUNT}", args.count);
        }

        if args.key.is_empty() {
            bail!("DISTINCTID_KEY must not be empty");
        }

        if args.buffer_size == Some(0) {
            bail!("DISTINCTID_BUFFER_SIZE must be greater than 0");
        }

        if args.batch && args.buffer_size.is_some() {
            bail!("--batch reserves its own range and cannot be combined with --buffer-size");
        }

        let backend = match args.backend {
            BackendKind::File => BackendConfig::File {
                dir: args.counter_dir,
            },
            #[cfg(feature = "redis")]
            BackendKind::Redis => {
                if args.redis_timeout_ms == 0 {
                    bail!("DISTINCTID_REDIS_TIMEOUT_MS must be greater than 0");
                }
                let mut redis = RedisConfig::default()
                    .with_host(args.redis_host)
                    .with_port(args.redis_port)
                    .with_db(args.redis_db)
                    .with_socket_timeout(core::time::Duration::from_millis(
                        args.redis_timeout_ms,
                    ));
                if let Some(password) = args.redis_password {
                    redis = redis.with_password(password);
                }
                BackendConfig::Redis(redis)
            }
            #[cfg(not(feature = "redis"))]
            BackendKind::Redis => {
                bail!("this build of distinctid has no Redis support (enable the `redis` feature)")
            }
        };

        Ok(Self {
            count: args.count,
            shard_id: args.shard_id,
            key: args.key,
            backend,
            buffer_size: args.buffer_size,
            batch: args.batch,
            use_async: args.use_async,
            metrics: args.metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(core::iter::once("distinctid").chain(args.iter().copied()))?;
        AppConfig::try_from(args)
    }

    #[test]
    fn defaults_use_the_file_backend() {
        let config = parse(&["--shard-id", "4", "--key", "orders"]).unwrap();
        assert_eq!(config.shard_id, 4);
        assert_eq!(config.key, "orders");
        assert!(matches!(config.backend, BackendConfig::File { .. }));
    }

    #[test]
    fn rejects_out_of_range_shard() {
        let err = parse(&["--shard-id", "8192"]).unwrap_err();
        assert!(err.to_string().contains("0-8191"));
    }

    #[test]
    fn rejects_non_positive_count() {
        assert!(parse(&["--count", "0"]).is_err());
        assert!(parse(&["--count=-5"]).is_err());
    }

    #[test]
    fn caps_count() {
        assert_eq!(parse(&["--count", "10000000"]).unwrap().count, MAX_COUNT);
        let err = parse(&["--count", "9223372036854775807"]).unwrap_err();
        assert!(err.to_string().contains("exceeds the maximum"));
    }

    #[test]
    fn rejects_zero_buffer_size() {
        assert!(parse(&["--buffer-size", "0"]).is_err());
    }

    #[test]
    fn batch_excludes_buffering() {
        assert!(parse(&["--batch", "--buffer-size", "10"]).is_err());
        assert!(parse(&["--batch"]).unwrap().batch);
    }

    #[cfg(feature = "redis")]
    #[test]
    fn builds_redis_settings() {
        let config = parse(&[
            "--backend",
            "redis",
            "--redis-host",
            "cache.internal",
            "--redis-port",
            "6380",
            "--redis-db",
            "2",
            "--redis-password",
            "secret",
            "--redis-timeout-ms",
            "250",
        ])
        .unwrap();

        let BackendConfig::Redis(redis) = config.backend else {
            panic!("expected a redis backend");
        };
        assert_eq!(redis.host, "cache.internal");
        assert_eq!(redis.port, 6380);
        assert_eq!(redis.db, 2);
        assert_eq!(redis.password.as_deref(), Some("secret"));
        assert_eq!(redis.socket_timeout, core::time::Duration::from_millis(250));
    }
}
