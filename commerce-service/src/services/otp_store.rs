//! Short-lived OTP storage and delivery ports.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tokio::time::Instant;

/// Deletes the key only when it holds the submitted code.
/// Returns -1 when absent, 1 when consumed, 0 on mismatch.
const COMPARE_AND_DELETE: &str = r#"
local stored = redis.call('GET', KEYS[1])
if not stored then
    return -1
end
if stored == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
"#;

pub fn otp_key(phone: &str) -> String {
    format!("otp:{}", phone)
}

/// Outcome of checking a submitted code against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Missing,
    Mismatch,
    Consumed,
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Stores `code` under `key` unless a live entry exists. Returns `false`
    /// when one does.
    async fn set_if_absent(&self, key: &str, code: &str, ttl: Duration)
        -> Result<bool, anyhow::Error>;

    /// Remaining lifetime of `key`, if it exists and has one.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, anyhow::Error>;

    async fn compare_and_delete(&self, key: &str, code: &str) -> Result<CodeCheck, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisOtpStore {
    _client: Client,
    manager: ConnectionManager,
    script: Script,
}

impl RedisOtpStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            script: Script::new(COMPARE_AND_DELETE),
        })
    }
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn set_if_absent(
        &self,
        key: &str,
        code: &str,
        ttl: Duration,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(code)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store OTP: {}", e))?;
        Ok(reply.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let seconds: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read OTP TTL: {}", e))?;
        // -2: no key, -1: no expiry
        Ok((seconds > 0).then(|| Duration::from_secs(seconds as u64)))
    }

    async fn compare_and_delete(&self, key: &str, code: &str) -> Result<CodeCheck, anyhow::Error> {
        let mut conn = self.manager.clone();
        let outcome: i64 = self
            .script
            .key(key)
            .arg(code)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to verify OTP: {}", e))?;
        Ok(match outcome {
            1 => CodeCheck::Consumed,
            0 => CodeCheck::Mismatch,
            _ => CodeCheck::Missing,
        })
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[derive(Default)]
pub struct MemoryOtpStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code for `key`, ignoring expired entries.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| entry.1 > Instant::now())
            .map(|entry| entry.0.clone())
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn set_if_absent(
        &self,
        key: &str,
        code: &str,
        ttl: Duration,
    ) -> Result<bool, anyhow::Error> {
        let now = Instant::now();
        // Phones that never come back would otherwise keep their entry forever.
        self.entries.retain(|_, entry| entry.1 > now);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().1 > now {
                    return Ok(false);
                }
                occupied.insert((code.to_string(), now + ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert((code.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, anyhow::Error> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.1 - now))
    }

    async fn compare_and_delete(&self, key: &str, code: &str) -> Result<CodeCheck, anyhow::Error> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(CodeCheck::Missing),
            Entry::Occupied(occupied) => {
                if occupied.get().1 <= now {
                    occupied.remove();
                    Ok(CodeCheck::Missing)
                } else if occupied.get().0 == code {
                    occupied.remove();
                    Ok(CodeCheck::Consumed)
                } else {
                    Ok(CodeCheck::Mismatch)
                }
            }
        }
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Delivers codes to the user's phone.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, phone: &str, code: &str) -> Result<(), anyhow::Error>;
}

/// Stand-in for an SMS provider. Records the dispatch without the code.
#[derive(Default, Clone)]
pub struct LogOtpSender;

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send(&self, phone: &str, _code: &str) -> Result<(), anyhow::Error> {
        tracing::info!(phone = %phone, "OTP dispatched");
        Ok(())
    }
}
