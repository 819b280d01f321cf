use anyhow::Result;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{encode_entry, RateSink, StreamEntry};
use crate::error::ScrapeError;

/// Upper bound on establishing the connection, retries included
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_RETRIES: usize = 2;
const MAX_RETRY_DELAY_MS: u64 = 1_000;

/// Redis stream sink, opened once per process.
///
/// Opening only parses the URL. The connection is established on the first
/// append, so an unreachable broker surfaces as a publish failure of the run.
pub struct RedisStream {
    client: redis::Client,
    manager: Option<ConnectionManager>,
    connect_timeout: Duration,
}

impl RedisStream {
    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| ScrapeError::Publish(format!("redis client open: {}", e)))?;
        Ok(Self {
            client,
            manager: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate_stream(stream: &str) -> Result<()> {
        if stream.trim().is_empty() {
            return Err(ScrapeError::Config("redis stream name is empty".to_string()).into());
        }
        if stream.chars().any(char::is_whitespace) {
            return Err(ScrapeError::Config(format!(
                "redis stream name must not contain whitespace: {:?}",
                stream
            ))
            .into());
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn connection(&mut self) -> Result<ConnectionManager> {
        if let Some(manager) = &self.manager {
            return Ok(manager.clone());
        }

        let addr = self.client.get_connection_info().addr.to_string();
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_max_delay(MAX_RETRY_DELAY_MS)
            .set_connection_timeout(self.connect_timeout);
        let connecting = ConnectionManager::new_with_config(self.client.clone(), config);

        let manager = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => {
                return Err(ScrapeError::Publish(format!("redis connect {}: {}", addr, e)).into())
            }
            Err(_) => {
                return Err(ScrapeError::Publish(format!(
                    "redis connect {}: no answer within {} ms",
                    addr,
                    self.connect_timeout.as_millis()
                ))
                .into())
            }
        };

        info!("Connected to Redis at {}", addr);
        self.manager = Some(manager.clone());
        Ok(manager)
    }

    /// Release the connection. Pending commands have completed by now.
    pub async fn close(self) {
        let addr = self.client.get_connection_info().addr.to_string();
        match self.manager {
            Some(manager) => {
                drop(manager);
                info!("Redis connection to {} closed", addr);
            }
            None => debug!("Redis connection to {} was never opened", addr),
        }
    }
}

/// `XADD <stream> * field value ...` for one entry
fn xadd_command<T: StreamEntry>(stream: &str, entry: &T) -> redis::Cmd {
    let fields = encode_entry(entry);
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream).arg("*").arg(fields.as_slice());
    cmd
}

/// One `XADD` per entry, sent as a single non-transactional pipeline
fn xadd_pipeline<T: StreamEntry>(stream: &str, entries: &[T]) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    for entry in entries {
        pipe.add_command(xadd_command(stream, entry));
    }
    pipe
}

impl RateSink for RedisStream {
    #[tracing::instrument(level = "debug", skip(self, entry))]
    async fn publish<T: StreamEntry + Sync>(&mut self, stream: &str, entry: &T) -> Result<String> {
        let mut manager = self.connection().await?;
        let id: String = xadd_command(stream, entry)
            .query_async(&mut manager)
            .await
            .map_err(|e| ScrapeError::Publish(format!("redis xadd {}: {}", stream, e)))?;
        debug!("Appended entry {} to {}", id, stream);
        Ok(id)
    }

    #[tracing::instrument(level = "debug", skip(self, entries), fields(count = entries.len()))]
    async fn publish_batch<T: StreamEntry + Sync>(
        &mut self,
        stream: &str,
        entries: &[T],
    ) -> Result<Vec<String>> {
        if entries.is_empty() {
            warn!("Nothing to publish to {}", stream);
            return Ok(Vec::new());
        }

        let mut manager = self.connection().await?;
        let ids: Vec<String> = xadd_pipeline(stream, entries)
            .query_async(&mut manager)
            .await
            .map_err(|e| ScrapeError::Publish(format!("redis pipeline xadd {}: {}", stream, e)))?;

        info!("Appended {} entries to {}", ids.len(), stream);
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BankRate;
    use std::time::Instant;

    fn rate(bank: &str) -> BankRate {
        BankRate {
            bank: bank.to_string(),
            buy: Some(41.0),
            sell: None,
            buy_online: None,
            sell_online: None,
            site_url: None,
            update_at: None,
            source_url: "https://example.test/".to_string(),
        }
    }

    fn packed(bytes: Vec<u8>) -> String {
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn stream_name_validation() {
        assert!(RedisStream::validate_stream("rate:usd").is_ok());
        assert!(RedisStream::validate_stream("").is_err());
        assert!(RedisStream::validate_stream("rate usd").is_err());
    }

    #[test]
    fn open_rejects_malformed_url() {
        let err = RedisStream::open("not a url").err().unwrap();
        let scrape = err.downcast_ref::<ScrapeError>().unwrap();
        assert_eq!(scrape.stage(), "publish");
    }

    #[test]
    fn xadd_sends_every_field_with_auto_id() {
        let wire = packed(xadd_command("rate:usd", &rate("PrivatBank")).get_packed_command());

        // XADD, key, id and eight field/value pairs
        assert!(wire.starts_with("*19\r\n$4\r\nXADD\r\n$8\r\nrate:usd\r\n$1\r\n*\r\n"));
        assert!(wire.contains("$4\r\nbank\r\n$10\r\nPrivatBank\r\n"));
        assert!(wire.contains("$3\r\nbuy\r\n$2\r\n41\r\n"));
        assert!(wire.contains("$4\r\nsell\r\n$0\r\n\r\n"));
        assert!(wire.ends_with("$10\r\nsource_url\r\n$21\r\nhttps://example.test/\r\n"));
    }

    #[test]
    fn batch_is_one_xadd_per_entry_in_order() {
        let entries = [rate("A-Bank"), rate("B-Bank")];
        let wire = packed(xadd_pipeline("rate:usd", &entries).get_packed_pipeline());

        assert_eq!(wire.matches("XADD").count(), 2);
        assert!(!wire.contains("MULTI"));
        let a = wire.find("A-Bank").unwrap();
        let b = wire.find("B-Bank").unwrap();
        assert!(a < b);
        assert_eq!(
            wire,
            packed(xadd_command("rate:usd", &entries[0]).get_packed_command())
                + &packed(xadd_command("rate:usd", &entries[1]).get_packed_command())
        );
    }

    #[tokio::test]
    async fn refused_connection_fails_within_the_connect_timeout() {
        let mut sink = RedisStream::open("redis://127.0.0.1:1")
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(20),
            sink.publish_batch("rate:usd", &[rate("A-Bank")]),
        )
        .await
        .expect("connect attempt should give up on its own");

        let err = result.unwrap_err();
        let scrape = err.downcast_ref::<ScrapeError>().unwrap();
        assert_eq!(scrape.stage(), "publish");
        assert!(started.elapsed() < Duration::from_secs(20));
        sink.close().await;
    }

    #[tokio::test]
    async fn empty_batch_does_not_connect() {
        let mut sink = RedisStream::open("redis://127.0.0.1:1").unwrap();
        let ids = sink
            .publish_batch::<BankRate>("rate:usd", &[])
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert!(sink.manager.is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn redis_batch_append_returns_one_id_per_entry() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let mut sink = RedisStream::open(&url).unwrap();
        let ids = sink
            .publish_batch("rate:usd:test", &[rate("TestBank"), rate("TestBank")])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        let single = sink.publish("rate:usd:test", &rate("TestBank")).await.unwrap();
        assert!(!single.is_empty());
        sink.close().await;
    }
}
