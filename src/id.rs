use std::fmt;

use rand::RngCore;

/// Width of a record identifier in bytes (160 bits).
pub const RECORD_ID_LEN: usize = 20;

/// 160-bit identifier for a record, a partition, or a produced result blob.
///
/// Identifiers are opaque to the engine; they are assigned by the ingestion
/// layer (usually a content hash) and compared only for equality. The hex
/// form is what crosses process boundaries: the `__lsm_id` column, result
/// bodies on the MapReduce executor surface, and result URLs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId([u8; RECORD_ID_LEN]);

impl RecordId {
    /// Wrap raw identifier bytes.
    pub fn new(bytes: [u8; RECORD_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh random identifier.
    ///
    /// Not cryptographic; uniqueness is all callers rely on.
    pub fn random() -> Self {
        let mut bytes = [0u8; RECORD_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Access the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; RECORD_ID_LEN] {
        &self.0
    }

    /// Render the identifier as 40 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 40-character hex string back into an identifier.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let raw = hex::decode(s.trim()).map_err(|_| IdError::InvalidHex(s.to_string()))?;
        let bytes: [u8; RECORD_ID_LEN] = raw
            .try_into()
            .map_err(|_| IdError::InvalidHex(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.to_hex())
    }
}

/// Failure to parse an identifier from its transport form.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// The input was not a 40-character hex string.
    #[error("invalid record id: {0:?}")]
    InvalidHex(String),
}

/// Produce a random 64-bit hex token used to name on-disk table files.
///
/// Collisions are detected at file-creation time, never assumed away.
pub fn random_file_token() -> String {
    format!("{:016x}", rand::thread_rng().next_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let id = RecordId::random();
        let parsed = RecordId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_known_value() {
        let id = RecordId::new([0xab; RECORD_ID_LEN]);
        assert_eq!(id.to_hex(), "ab".repeat(RECORD_ID_LEN));
        assert_eq!(RecordId::from_hex(&"ab".repeat(RECORD_ID_LEN)).unwrap(), id);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(RecordId::from_hex("not-hex").is_err());
        assert!(RecordId::from_hex("abcd").is_err());
        // Tolerates surrounding whitespace, as response bodies may carry a newline.
        assert!(RecordId::from_hex(&format!("{}\n", "cd".repeat(RECORD_ID_LEN))).is_ok());
    }

    #[test]
    fn file_tokens_are_sixteen_hex_chars() {
        let token = random_file_token();
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
