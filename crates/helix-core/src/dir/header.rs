use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;
use uuid::Uuid;
use zeroize::Zeroize;

/// Name of the directory header file at the root of an encrypted directory.
pub const HEADER_FILE_NAME: &str = "helix.hx";

/// Identity and name-derivation key of one encrypted directory.
///
/// Stored as JSON inside `helix.hx`, encrypted like any other entry.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryHeader {
    #[serde_as(as = "Base64")]
    file_name_key: [u8; 32],
    directory_id: Uuid,
}

impl DirectoryHeader {
    pub fn generate() -> Self {
        let mut file_name_key = [0u8; 32];
        rand::rng().fill_bytes(&mut file_name_key);
        DirectoryHeader {
            file_name_key,
            directory_id: Uuid::new_v4(),
        }
    }

    pub fn directory_id(&self) -> Uuid {
        self.directory_id
    }

    pub fn file_name_key(&self) -> &[u8; 32] {
        &self.file_name_key
    }
}

impl Drop for DirectoryHeader {
    fn drop(&mut self) {
        self.file_name_key.zeroize();
    }
}

impl fmt::Debug for DirectoryHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryHeader")
            .field("file_name_key", &"[REDACTED]")
            .field("directory_id", &self.directory_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let header = DirectoryHeader::generate();
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"FileNameKey\":\""));
        assert!(json.contains(&format!("\"DirectoryId\":\"{}\"", header.directory_id())));
        let back: DirectoryHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_rejects_short_key() {
        let json = r#"{"FileNameKey":"AAAA","DirectoryId":"67e55044-10b1-426f-9247-bb680e5fe0c8"}"#;
        assert!(serde_json::from_str::<DirectoryHeader>(json).is_err());
    }

    #[test]
    fn test_generated_headers_differ() {
        let a = DirectoryHeader::generate();
        let b = DirectoryHeader::generate();
        assert_ne!(a.directory_id(), b.directory_id());
        assert_ne!(a.file_name_key(), b.file_name_key());
    }

    #[test]
    fn test_debug_redacts_key() {
        assert!(format!("{:?}", DirectoryHeader::generate()).contains("[REDACTED]"));
    }
}
