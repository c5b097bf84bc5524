use redis::Commands;
use thiserror::Error;
use types::FailedJob;

/// Queue of archive jobs produced by the transfer stage.
pub const UNPACK_QUEUE: &str = "unpack";
/// Queue of per-clip jobs produced by the unpack worker.
pub const TRANSCRIBE_QUEUE: &str = "transcribe";
/// Side channel collecting poison jobs for operator inspection.
pub const FAILED_QUEUE: &str = "failed";

const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to reach queue service at {url} after {attempts} attempts: {source}")]
    Connect {
        url: String,
        attempts: u32,
        source: redis::RedisError,
    },
    #[error("failed to encode job payload: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn ledger_total_key(batch_id: &str) -> String {
    format!("batch:{batch_id}:total")
}

pub fn ledger_processed_key(batch_id: &str) -> String {
    format!("batch:{batch_id}:processed")
}

pub fn ledger_archive_key(batch_id: &str) -> String {
    format!("batch:{batch_id}:s3_key")
}

/// Connection to the queue & counter service. Carries both the FIFO job
/// queues and the per-batch progress ledger, which live in the same Redis.
pub struct QueueClient {
    connection: redis::Connection,
}

impl QueueClient {
    /// Connect and verify the service responds to PING, retrying with
    /// backoff before giving up.
    pub fn connect(host: &str, port: u16) -> Result<Self, QueueError> {
        let url = format!("redis://{host}:{port}");
        let client = redis::Client::open(url.as_str())?;

        let mut attempt = 1;
        loop {
            let result = client.get_connection().and_then(|mut connection| {
                redis::cmd("PING")
                    .query::<String>(&mut connection)
                    .map(|_| connection)
            });

            match result {
                Ok(connection) => {
                    tracing::debug!("connected to queue service at {url}");
                    return Ok(Self { connection });
                }
                Err(source) if attempt < CONNECT_ATTEMPTS => {
                    let delay = ap_app::retry::backoff_delay(attempt);
                    tracing::warn!(
                        "queue connect attempt {attempt}/{CONNECT_ATTEMPTS} failed: {source}; retrying in {delay:?}"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(QueueError::Connect {
                        url,
                        attempts: CONNECT_ATTEMPTS,
                        source,
                    })
                }
            }
        }
    }

    /// Append a job to the named queue.
    pub fn push<T: serde::Serialize>(&mut self, queue: &str, job: &T) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let _: () = self.connection.rpush(queue, payload)?;
        Ok(())
    }

    /// Blocking pop across one or more queues in priority order. Returns the
    /// queue name and payload, or `None` when the timeout elapses.
    pub fn blocking_pop(
        &mut self,
        queues: &[&str],
        timeout_secs: f64,
    ) -> Result<Option<(String, String)>, QueueError> {
        let popped: Option<(String, String)> = self.connection.blpop(queues, timeout_secs)?;
        Ok(popped)
    }

    pub fn push_failed(&mut self, job: &FailedJob) -> Result<(), QueueError> {
        self.push(FAILED_QUEUE, job)
    }

    /// Seed the batch ledger. The total must land before the processed
    /// counter so a consumer never observes a counter without its target.
    pub fn seed_ledger(
        &mut self,
        batch_id: &str,
        total: i64,
        s3_key: &str,
    ) -> Result<(), QueueError> {
        let _: () = self.connection.set(ledger_total_key(batch_id), total)?;
        let _: () = self.connection.set(ledger_processed_key(batch_id), 0)?;
        let _: () = self.connection.set(ledger_archive_key(batch_id), s3_key)?;
        Ok(())
    }

    /// Atomically bump the processed counter and return its new value.
    pub fn increment_processed(&mut self, batch_id: &str) -> Result<i64, QueueError> {
        Ok(self.connection.incr(ledger_processed_key(batch_id), 1)?)
    }

    pub fn batch_total(&mut self, batch_id: &str) -> Result<Option<i64>, QueueError> {
        Ok(self.connection.get(ledger_total_key(batch_id))?)
    }

    pub fn batch_archive_key(&mut self, batch_id: &str) -> Result<Option<String>, QueueError> {
        Ok(self.connection.get(ledger_archive_key(batch_id))?)
    }

    /// Remove all three ledger keys for the batch.
    pub fn delete_ledger(&mut self, batch_id: &str) -> Result<(), QueueError> {
        let keys = [
            ledger_total_key(batch_id),
            ledger_processed_key(batch_id),
            ledger_archive_key(batch_id),
        ];
        let _: () = self.connection.del(&keys[..])?;
        Ok(())
    }
}
