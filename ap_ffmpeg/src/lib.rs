mod opus;
mod probe;

pub use opus::{convert_to_opus, TranscodeError};
pub use probe::probe_duration;
