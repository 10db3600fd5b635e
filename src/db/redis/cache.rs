use async_trait::async_trait;
use redis::AsyncCommands;
use redis::Client;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::db::cache::{CacheKey, ResultCache, KEY_PREFIX};
use crate::error::{AppError, AppResult};

/// Opens a client for `REDIS_URL`; connections are made lazily per command
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Work for the writer task, applied strictly in send order
enum CacheCommand {
    Set { key: String, value: String, ttl: u64 },
    Clear(oneshot::Sender<AppResult<usize>>),
}

/// Result cache stored in Redis
///
/// Entry count is bounded by the server's `maxmemory` eviction policy; TTL is
/// applied per key with `SET EX`. Writes and invalidations share one queue so
/// a write issued before an invalidation can never resurface after it.
#[derive(Clone)]
pub struct RedisCache {
    redis_client: Client,
    commands: mpsc::UnboundedSender<CacheCommand>,
}

/// Stops the writer task once queued commands are applied
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Result cache writer asked to stop");
    }
}

impl RedisCache {
    /// Spawns the writer task and returns the cache with its shutdown handle
    pub fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (commands, queue) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        tokio::spawn(run_writer(redis_client.clone(), queue, shutdown_rx));

        (
            Self {
                redis_client,
                commands,
            },
            CacheWriterHandle { shutdown_tx },
        )
    }

    fn enqueue(&self, command: CacheCommand) -> AppResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::Internal("Result cache writer has stopped".to_string()))
    }
}

async fn run_writer(
    client: Client,
    mut queue: mpsc::UnboundedReceiver<CacheCommand>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    tracing::debug!("Result cache writer started");

    loop {
        tokio::select! {
            Some(command) = queue.recv() => apply(&client, command).await,
            _ = shutdown_rx.recv() => {
                queue.close();
                let mut drained = 0usize;
                while let Some(command) = queue.recv().await {
                    apply(&client, command).await;
                    drained += 1;
                }
                tracing::info!(drained, "Result cache writer stopped");
                break;
            }
        }
    }
}

async fn apply(client: &Client, command: CacheCommand) {
    match command {
        CacheCommand::Set { key, value, ttl } => {
            if let Err(e) = set_entry(client, &key, value, ttl).await {
                tracing::warn!(key = %key, error = %e, "Dropped result cache write");
            }
        }
        CacheCommand::Clear(reply) => {
            let _ = reply.send(clear_prefixed(client).await);
        }
    }
}

async fn set_entry(client: &Client, key: &str, value: String, ttl: u64) -> AppResult<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: () = conn.set_ex(key, value, ttl).await?;
    Ok(())
}

/// Deletes every key under the cache prefix, returning how many were found
async fn clear_prefixed(client: &Client) -> AppResult<usize> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let pattern = format!("{}*", KEY_PREFIX);

    let keys: Vec<String> = {
        let mut iter = conn.scan_match::<_, String>(&pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        keys
    };

    if !keys.is_empty() {
        let _: () = conn.del(&keys).await?;
    }
    Ok(keys.len())
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get_raw(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key.to_string()).await?;
        Ok(cached)
    }

    fn put_raw(&self, key: &CacheKey, value: String, ttl: Duration) {
        let command = CacheCommand::Set {
            key: key.to_string(),
            value,
            ttl: ttl.as_secs().max(1),
        };
        if let Err(e) = self.enqueue(command) {
            tracing::warn!(key = %key, error = %e, "Result cache write not queued");
        }
    }

    async fn invalidate_all(&self) -> AppResult<()> {
        let (reply, done) = oneshot::channel();
        self.enqueue(CacheCommand::Clear(reply))?;

        let removed = done
            .await
            .map_err(|_| AppError::Internal("Result cache writer dropped a clear".to_string()))??;

        tracing::debug!(removed, "Redis result cache invalidated");
        Ok(())
    }
}
