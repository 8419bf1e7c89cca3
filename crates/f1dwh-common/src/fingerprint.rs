//! SHA-384 content fingerprints for change detection

use sha2::{Digest, Sha384};

use crate::types::FieldValue;

/// Length of a hex-encoded SHA-384 digest
pub const FINGERPRINT_HEX_LEN: usize = 96;

/// Separator placed between rendered field values before hashing
pub const FIELD_SEPARATOR: char = '|';

/// Compute the hex-encoded SHA-384 digest of a byte slice
pub fn sha384_hex(data: &[u8]) -> String {
    let mut hasher = Sha384::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint a row from its field values, in declaration order.
///
/// The values are rendered with their canonical `Display`, joined with `|`
/// and hashed. The result depends only on the values, never on when it was
/// computed.
pub fn fingerprint<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a FieldValue>,
{
    let mut joined = String::new();
    for (i, value) in values.into_iter().enumerate() {
        if i > 0 {
            joined.push(FIELD_SEPARATOR);
        }
        joined.push_str(&value.to_string());
    }
    sha384_hex(joined.as_bytes())
}
