use std::str::FromStr;

use async_trait::async_trait;
use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use tracing::{info, warn};

use crate::db::{Connector, Sink, SinkResult};

pub struct PgSink {
    conn: PgConnection,
}

impl PgSink {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Sink for PgSink {
    async fn begin(&mut self) -> SinkResult<()> {
        (&mut self.conn).execute("BEGIN").await?;
        Ok(())
    }

    async fn copy_in(
        &mut self,
        statement: &str,
        chunks: &mut (dyn Iterator<Item = Vec<u8>> + Send),
    ) -> SinkResult<u64> {
        let mut copy = self.conn.copy_in_raw(statement).await?;

        for chunk in chunks {
            let sent = copy.send(chunk).await.map(|_| ());
            if let Err(err) = sent {
                if let Err(abort_err) = copy.abort(err.to_string()).await {
                    warn!(error = %abort_err, "failed to abort COPY after send error");
                }
                return Err(err);
            }
        }

        copy.finish().await
    }

    async fn execute(&mut self, statement: &str) -> SinkResult<()> {
        (&mut self.conn).execute(statement).await?;
        Ok(())
    }

    async fn commit(&mut self) -> SinkResult<()> {
        (&mut self.conn).execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> SinkResult<()> {
        (&mut self.conn).execute("ROLLBACK").await?;
        Ok(())
    }

    async fn close(self) -> SinkResult<()> {
        self.conn.close().await
    }
}

#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_url(url: &str) -> SinkResult<Self> {
        Ok(Self::new(PgConnectOptions::from_str(url)?))
    }

    /// Applies the bundled schema (`density_data` and the window views).
    pub async fn run_migrations(&self) -> Result<(), MigrateError> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;
        info!(
            stage = "startup",
            event = "db.migrate.end",
            result = "ok",
            "database migrations applied"
        );
        if let Err(err) = conn.close().await {
            warn!(error = %err, "failed to close migration connection");
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Sink = PgSink;

    async fn connect(&self) -> SinkResult<PgSink> {
        let conn = PgConnection::connect_with(&self.options).await?;
        Ok(PgSink::new(conn))
    }
}
