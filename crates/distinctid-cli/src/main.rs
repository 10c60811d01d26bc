#![doc = include_str!("../README.md")]

mod config;
mod telemetry;

use std::io::{BufWriter, Write};

use clap::Parser;
use config::{AppConfig, BackendConfig, CliArgs};
#[cfg(unix)]
use distinctid::FileCounter;
#[cfg(feature = "redis")]
use distinctid::RedisCounter;
use distinctid::{AsyncCounterBackend, CounterBackend, DistinctId, IdService};
use telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    init_telemetry()?;
    log_startup_info(&config);

    let ids = match &config.backend {
        #[cfg(unix)]
        BackendConfig::File { dir } => generate(IdService::new(FileCounter::new(dir)?), &config).await?,
        #[cfg(not(unix))]
        BackendConfig::File { .. } => {
            anyhow::bail!("the file counter is only supported on Unix platforms")
        }
        #[cfg(feature = "redis")]
        BackendConfig::Redis(redis) => {
            generate(IdService::new(RedisCounter::new(redis)?), &config).await?
        }
    };

    let mut out = BufWriter::new(std::io::stdout().lock());
    for id in ids {
        writeln!(out, "{id}")?;
    }
    out.flush()?;
    Ok(())
}

async fn generate<B>(service: IdService<B>, config: &AppConfig) -> anyhow::Result<Vec<DistinctId>>
where
    B: CounterBackend + AsyncCounterBackend + Sync,
{
    service.enable_metrics(config.metrics);
    if let Some(size) = config.buffer_size {
        service.enable_buffering(size)?;
    }

    let ids = match (config.batch, config.use_async) {
        (true, false) => service.generate_batch(config.count, config.shard_id, &config.key)?,
        (true, true) => {
            service
                .generate_batch_async(config.count, config.shard_id, &config.key)
                .await?
        }
        (false, false) => (0..config.count)
            .map(|_| service.generate_one(config.shard_id, &config.key))
            .collect::<Result<_, _>>()?,
        (false, true) => {
            let mut ids = Vec::new();
            for _ in 0..config.count {
                ids.push(service.generate_one_async(config.shard_id, &config.key).await?);
            }
            ids
        }
    };

    if config.metrics {
        let snapshot = service.metrics();
        tracing::info!(
            ids_generated = snapshot.ids_generated,
            backend_calls = snapshot.backend_calls,
            buffer_refills = snapshot.buffer_refills,
            failures = snapshot.failures,
            "allocation summary"
        );
    }

    Ok(ids)
}

fn log_startup_info(config: &AppConfig) {
    let backend = match &config.backend {
        BackendConfig::File { dir } => format!("file:{}", dir.display()),
        #[cfg(feature = "redis")]
        BackendConfig::Redis(redis) => format!("redis://{}:{}/{}", redis.host, redis.port, redis.db),
    };
    tracing::debug!(
        count = config.count,
        shard_id = config.shard_id,
        key = %config.key,
        backend = %backend,
        buffer_size = ?config.buffer_size,
        batch = config.batch,
        use_async = config.use_async,
        "Generating ids"
    );
}
