//! Content hashing of the inputs that determine a cassette's interactions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inputs that determine what a unit is expected to send and receive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectInputs {
    /// Tool under test.
    pub tool: String,
    /// Model the tool is driven with.
    pub model: String,
    /// Prompt text; only its fingerprint enters the content hash.
    pub prompt: String,
}

impl SubjectInputs {
    /// SHA-256 of the prompt, hex-encoded.
    #[must_use]
    pub fn prompt_fingerprint(&self) -> String {
        hex(&Sha256::digest(self.prompt.as_bytes()))
    }

    /// Content hash over tool, model, and prompt fingerprint. Fields are
    /// length-prefixed so that moving text between fields changes the hash.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let fingerprint = self.prompt_fingerprint();
        let mut hasher = Sha256::new();
        for part in [self.tool.as_str(), self.model.as_str(), fingerprint.as_str()] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hex(&hasher.finalize())
    }
}

/// Hash of a workflow: the ordered content hashes of its steps.
#[must_use]
pub fn combined_hash<'a>(step_hashes: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for hash in step_hashes {
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
