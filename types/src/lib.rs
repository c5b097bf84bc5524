mod batch;
mod types;

pub use batch::{generate_batch_id, utc_timestamp};
pub use types::*;
