use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::utils::time::format_timestamp;

/// Joins the hashed fields. Part of the chain format; changing it forks every chain.
pub const FIELD_SEPARATOR: &str = "-";

/// Computes the SHA-256 digest of the given data and returns it as a hex string.
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes the content hash of a block.
///
/// Fields are joined in this exact order:
/// - case_id
/// - sequence_number
/// - metadata
/// - log
/// - timestamp (canonical format)
/// - previous_hash
///
/// `metadata` and `log` are hashed byte for byte; callers that want JSON
/// content to hash stably must canonicalize it before staging.
pub fn compute_hash(
    case_id: &str,
    sequence_number: u64,
    metadata: &str,
    log: &str,
    timestamp: &DateTime<Utc>,
    previous_hash: &str,
) -> String {
    let sequence = sequence_number.to_string();
    let timestamp = format_timestamp(timestamp);
    let data = [
        case_id,
        sequence.as_str(),
        metadata,
        log,
        timestamp.as_str(),
        previous_hash,
    ]
    .join(FIELD_SEPARATOR);
    digest(data.as_bytes())
}
