//! Text carrier for manual signaling: a [`ConnectionBundle`] as JSON,
//! gzip-compressed, base64-encoded.

use crate::error::BundleError;
use crate::peer::types::{Candidate, ConnectionBundle, Description};
use crate::utils::random_id;
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Upper bound on the decompressed JSON.
pub const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

impl ConnectionBundle {
    pub fn new(description: Description, candidates: Vec<Candidate>) -> Self {
        Self {
            id: random_id(),
            ts: chrono::Utc::now().timestamp(),
            description,
            candidates,
        }
    }
}

pub fn encode(bundle: &ConnectionBundle) -> Result<String, BundleError> {
    let json = serde_json::to_vec(bundle)?;
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)?;
    let compressed = gz.finish()?;
    Ok(general_purpose::STANDARD.encode(compressed))
}

pub fn decode(text: &str) -> Result<ConnectionBundle, BundleError> {
    let compressed = general_purpose::STANDARD.decode(text.trim())?;
    // One byte past the limit tells an oversized payload from one that fits.
    let mut limited = GzDecoder::new(&compressed[..]).take(MAX_DECOMPRESSED_SIZE + 1);
    let mut json = Vec::new();
    limited.read_to_end(&mut json)?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(BundleError::TooLarge {
            limit: MAX_DECOMPRESSED_SIZE,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectionBundle {
        ConnectionBundle::new(
            Description::offer("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"),
            vec![Candidate::new("candidate:0 1 udp 1 127.0.0.1 40000 typ host")],
        )
    }

    #[test]
    fn bundle_survives_the_text_carrier() {
        let bundle = sample();
        let text = encode(&bundle).unwrap();
        assert!(!text.contains('{'));
        assert_eq!(decode(&format!("  {text}\n")).unwrap(), bundle);
    }

    #[test]
    fn bad_input_is_an_error_not_a_panic() {
        assert!(matches!(decode("%%%"), Err(BundleError::Base64(_))));
        let not_gzip = general_purpose::STANDARD.encode(b"plain");
        assert!(matches!(decode(&not_gzip), Err(BundleError::Io(_))));

        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(b"{\"id\":").unwrap();
        let truncated = general_purpose::STANDARD.encode(gz.finish().unwrap());
        assert!(matches!(decode(&truncated), Err(BundleError::Json(_))));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
        gz.write_all(&vec![b' '; MAX_DECOMPRESSED_SIZE as usize + 10]).unwrap();
        let bomb = general_purpose::STANDARD.encode(gz.finish().unwrap());
        assert!(matches!(decode(&bomb), Err(BundleError::TooLarge { .. })));
    }
}
