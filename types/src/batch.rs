use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

/// Mint a batch identifier of the form `YYYYMMDD-HHMMSS-{6 hex}`.
///
/// The timestamp prefix keeps identifiers sortable by upload time; the hex
/// suffix disambiguates batches produced within the same second.
pub fn generate_batch_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &suffix[..6])
}

/// Current UTC time as an ISO-8601 string with a `Z` suffix, the format all
/// queue payload timestamps use.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_has_expected_shape() {
        let id = generate_batch_id();

        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3, "unexpected batch id: {id}");
        assert_eq!(parts[0].len(), 8);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 6);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn batch_ids_are_unique() {
        let a = generate_batch_id();
        let b = generate_batch_id();
        assert_ne!(a, b);
    }

    #[test]
    fn timestamp_is_utc_with_z_suffix() {
        let stamp = utc_timestamp();
        assert!(stamp.ends_with('Z'), "not Z-suffixed: {stamp}");
        assert!(stamp.contains('T'));
    }
}
