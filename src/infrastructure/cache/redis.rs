use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::domain::repositories::MessageCache;

#[derive(Clone)]
pub struct RedisMessageCache {
    connection: ConnectionManager,
}

impl RedisMessageCache {
    pub async fn connect(url: &str) -> anyhow::Result<Arc<Self>> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Arc::new(Self { connection }))
    }
}

#[async_trait]
impl MessageCache for RedisMessageCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut connection = self.connection.clone();
        let seconds = usize::try_from(ttl.as_secs().max(1))?;
        connection.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut connection).await?;
        Ok(())
    }
}
