use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::time::Instant;

use herdcache::coordinator::Coordinator;
use herdcache::fmt::{format_duration, parse_duration};
use herdcache::redis::{RedisLock, RedisStore};
use herdcache::scope::Scope;
use herdcache::source::DataSource;
use herdcache::store::CacheStore;
use herdcache::{HERDCACHE_REVISION, HERDCACHE_VERSION};

/// Used if neither the command line nor the config specify a Redis server.
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Simulates a thundering herd against a cache which is kept in Redis.
///
/// Start several instances at once to observe the coordination across processes.
#[derive(Parser)]
#[command(name = "herdcache-io")]
#[command(version)]
struct Args {
    /// Redis server which holds the cache and the lock (defaults to redis.url of the config)
    #[arg(short, long, env = "REDIS_URL")]
    redis: Option<String>,

    /// Name of the scope, also used as key prefix
    #[arg(short, long, default_value = "herd")]
    scope: String,

    /// Number of concurrent callers
    #[arg(short, long, default_value_t = 50)]
    callers: usize,

    /// Number of distinct keys being requested
    #[arg(short, long, default_value_t = 1)]
    keys: usize,

    /// Simulated latency of the data source (e.g. 250ms or 2s)
    #[arg(short, long, default_value = "250ms", value_parser = parse_latency)]
    latency: Duration,

    /// Lets each caller request all keys in a single batch lookup
    #[arg(long)]
    batch: bool,

    /// Bypasses all coordination (every miss hits the data source)
    #[arg(long, conflicts_with = "batch")]
    no_lock: bool,

    /// Deletes all keys of the scope before starting the herd
    #[arg(long)]
    flush: bool,
}

fn parse_latency(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|error| error.to_string())
}

/// Simulates an expensive data source by sleeping before answering.
struct SlowSource {
    latency: Duration,
    populates: AtomicUsize,
    populated_keys: AtomicUsize,
}

impl SlowSource {
    fn value_of(key: &str) -> String {
        format!("{} (populated by pid {})", key, std::process::id())
    }
}

#[async_trait]
impl DataSource<String, String> for SlowSource {
    async fn populate(&self, key: &String) -> anyhow::Result<Option<String>> {
        let _ = self.populates.fetch_add(1, Ordering::SeqCst);
        let _ = self.populated_keys.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        Ok(Some(SlowSource::value_of(key)))
    }

    async fn populate_batch(
        &self,
        keys: &[String],
        positions: &[usize],
    ) -> anyhow::Result<Vec<Option<String>>> {
        let _ = self.populates.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .populated_keys
            .fetch_add(positions.len(), Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        Ok(positions
            .iter()
            .map(|position| Some(SlowSource::value_of(&keys[*position])))
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.keys == 0 {
        return Err(anyhow::anyhow!("At least one key is required."));
    }

    herdcache::init_logging();
    log::info!(
        "||. HERDCACHE-IO (v {} - rev {}) simulating {} caller(s) on {} key(s)",
        HERDCACHE_VERSION,
        HERDCACHE_REVISION,
        args.callers,
        args.keys
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    herdcache::signals::install(shutdown.clone());
    let config = herdcache::config::install(shutdown.clone()).await;

    let redis_url = match &args.redis {
        Some(url) => url.clone(),
        None => config
            .current()
            .query("redis.url")
            .as_str()
            .unwrap_or(DEFAULT_REDIS_URL)
            .to_owned(),
    };
    let connection = herdcache::redis::connect(&redis_url).await?;
    let store = Arc::new(RedisStore::<String, String>::new(connection.clone()));
    let source = Arc::new(SlowSource {
        latency: args.latency,
        populates: AtomicUsize::new(0),
        populated_keys: AtomicUsize::new(0),
    });

    let keys: Arc<Vec<String>> = Arc::new(
        (0..args.keys)
            .map(|index| format!("{}:{}", args.scope, index))
            .collect(),
    );
    if args.flush {
        for key in keys.iter() {
            store.delete(key).await?;
        }
        log::info!("Flushed {} key(s) of {}.", keys.len(), args.scope);
    }

    let coordinator = Arc::new(
        Coordinator::<String, String>::builder(Scope::new(args.scope.as_str()))
            .store(store)
            .source(source.clone())
            .lock(Arc::new(RedisLock::new(connection)))
            .config(&config)
            .cancellation(shutdown.clone())
            .build()?,
    );
    herdcache::settings::install(coordinator.clone(), config, shutdown.clone());

    let watch = Instant::now();
    let callers = (0..args.callers).map(|caller| {
        let coordinator = coordinator.clone();
        let keys = keys.clone();
        let batch = args.batch;
        let no_lock = args.no_lock;

        tokio::spawn(async move {
            if batch {
                let values = coordinator.batch_find(&keys).await?;
                return Ok(values.iter().filter(|value| value.is_some()).count());
            }

            let key = &keys[caller % keys.len()];
            let value = if no_lock {
                coordinator.find_by_no_lock(key).await?
            } else {
                coordinator.find(key).await?
            };

            anyhow::Ok(usize::from(value.is_some()))
        })
    });

    let mut resolved = 0;
    let mut failed = 0;
    for result in futures::future::join_all(callers).await {
        match result {
            Ok(Ok(count)) => resolved += count,
            Ok(Err(error)) => {
                failed += 1;
                log::error!("A caller failed: {:#}", error);
            }
            Err(error) => {
                failed += 1;
                log::error!("A caller panicked: {}", error);
            }
        }
    }

    log::info!(
        "The herd completed within {}: {} value(s) resolved, {} caller(s) failed, \
         {} populate call(s) for {} key(s).",
        format_duration(watch.elapsed()),
        resolved,
        failed,
        source.populates.load(Ordering::SeqCst),
        source.populated_keys.load(Ordering::SeqCst)
    );
    println!("{}", coordinator.stats());

    shutdown.cancel();

    Ok(())
}
