use async_trait::async_trait;
use redis::{ AsyncCommands, Client };
use crate::history::{ HistoryBackend, StorageError };

pub struct RedisHistoryBackend {
    client: Client,
    key_prefix: String,
    scan_count: usize,
}

impl RedisHistoryBackend {
    pub fn new(url: &str, key_prefix: &str, scan_count: usize) -> Result<Self, StorageError> {
        Ok(Self {
            client: Client::open(url).map_err(redis_error)?,
            key_prefix: key_prefix.to_string(),
            scan_count: scan_count.max(1),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        self.client.get_multiplexed_async_connection().await.map_err(redis_error)
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn redis_error(err: redis::RedisError) -> StorageError {
    StorageError::Unavailable(format!("redis: {}", err))
}

#[async_trait]
impl HistoryBackend for RedisHistoryBackend {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.get_connection().await?;
        conn.get::<_, Option<Vec<u8>>>(self.redis_key(key)).await.map_err(redis_error)
    }

    async fn write(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError> {
        let mut conn = self.get_connection().await?;
        conn.set::<_, _, ()>(self.redis_key(key), body).await.map_err(redis_error)
    }

    async fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut conn = self.get_connection().await?;
        let pattern = format!("{}*.json", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis
                ::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn).await
                .map_err(redis_error)?;

            keys.extend(
                batch
                    .iter()
                    .filter_map(|k| k.strip_prefix(self.key_prefix.as_str()))
                    .map(str::to_string)
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
