use std::{pin::Pin, time::SystemTime};

use futures::{Stream, StreamExt};
use water_client::domain::RawRow;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("decode error: {0}")]
    Decode(String),
}

pub type RowStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> RowStream<T>;
}

/// Drain a raw-row source into memory. A source failure aborts the load;
/// row-level data problems are left for the registry to absorb.
pub async fn collect_rows<S>(source: &S) -> Result<Vec<RawRow>, PipelineError>
where
    S: Source<RawRow> + ?Sized,
{
    let mut stream = source.stream().await;
    let mut rows = Vec::new();

    while let Some(item) = stream.next().await {
        match item {
            Ok(env) => rows.push(env.payload),
            Err(e) => {
                tracing::error!(error = %e, "row source failed");
                return Err(e);
            }
        }
    }

    tracing::debug!(rows = rows.len(), "row source drained");
    Ok(rows)
}
