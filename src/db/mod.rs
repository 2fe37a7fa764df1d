#[cfg(test)]
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

pub use postgres::{PgConnector, PgSink};

pub type SinkResult<T> = Result<T, sqlx::Error>;

/// The relational store the loader and refresher write through.
///
/// Transactions are explicit statements on a single connection so a failed
/// commit can still be followed by a rollback on the same session.
#[async_trait]
pub trait Sink: Send {
    async fn begin(&mut self) -> SinkResult<()>;

    /// Runs a `COPY ... FROM STDIN` statement and streams `chunks` (COPY text
    /// format) into it. Returns the number of rows the server accepted.
    async fn copy_in(
        &mut self,
        statement: &str,
        chunks: &mut (dyn Iterator<Item = Vec<u8>> + Send),
    ) -> SinkResult<u64>;

    async fn execute(&mut self, statement: &str) -> SinkResult<()>;

    async fn commit(&mut self) -> SinkResult<()>;

    async fn rollback(&mut self) -> SinkResult<()>;

    async fn close(self) -> SinkResult<()>
    where
        Self: Sized;
}

/// Hands out fresh sinks; the watch loop takes one per file.
#[async_trait]
pub trait Connector: Send + Sync {
    type Sink: Sink;

    async fn connect(&self) -> SinkResult<Self::Sink>;
}
