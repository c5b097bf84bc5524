mod blob;
mod scratch;

pub use blob::{BlobStore, StorageError};
pub use scratch::{cleanup_scratch, create_scratch, scratch_path, ScratchError};

/// Key of an inbound archive in the blob store.
pub fn archive_object_key(batch_id: &str) -> String {
    format!("archives/{batch_id}.tar")
}

/// Key of a retained clip, partitioned by the UTC date it was processed.
pub fn processed_object_key(date: &str, audio_id: i32) -> String {
    format!("processed/{date}/{audio_id}.opus")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_follow_the_bucket_layout() {
        assert_eq!(
            archive_object_key("20250101-000000-ab12cd"),
            "archives/20250101-000000-ab12cd.tar"
        );
        assert_eq!(
            processed_object_key("2025-01-01", 42),
            "processed/2025-01-01/42.opus"
        );
    }
}
