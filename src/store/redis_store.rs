//! Redis Store Module
//!
//! Shared store and lock backend on top of a Redis server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, Script};

use crate::error::StoreError;
use crate::store::{LockBackend, SharedStore};

/// Deletes the lock key only while it still carries the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// == Redis Store ==
/// Redis-backed store.
///
/// Holds a `ConnectionManager`, which reconnects on its own and is cheap to
/// clone per command.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    release: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("conn", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    /// Opens a managed connection to the server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
        })
    }
}

/// Builds `SET key value [EX secs | PX ms]`.
fn set_command(key: &str, value: &[u8], ttl: Duration) -> Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if ttl.is_zero() {
        return cmd;
    }
    if ttl.subsec_nanos() == 0 {
        cmd.arg("EX").arg(ttl.as_secs());
    } else {
        cmd.arg("PX").arg(ttl.as_millis() as u64);
    }
    cmd
}

/// Builds `SET lock_key token NX PX ms`.
fn lock_command(lock_key: &str, token: &str, ttl: Duration) -> Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(lock_key)
        .arg(token)
        .arg("NX")
        .arg("PX")
        .arg((ttl.as_millis() as u64).max(1));
    cmd
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = set_command(key, value, ttl).query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl LockBackend for RedisStore {
    async fn try_lock(
        &self,
        lock_key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // Nil reply means NX refused the write
        let reply: Option<String> = lock_command(lock_key, token, ttl)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn unlock(&self, lock_key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release
            .key(lock_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }
}
