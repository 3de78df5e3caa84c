use crate::peer::types::ServerConfig;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Random 16-hex-digit identifier for bundles.
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// ICE server URL with its `stun:`/`turn:` scheme, adding the one implied by
/// the server type when missing.
pub fn add_ice_url_scheme(server: &ServerConfig) -> String {
    let url = server.url.trim();
    if url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:") {
        return url.to_string();
    }
    let scheme = if server.r#type.eq_ignore_ascii_case("turn") {
        "turn"
    } else {
        "stun"
    };
    format!("{scheme}:{url}")
}

/// Short SHA-256 fingerprint, enough to tell two bodies apart in logs.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(&Sha256::digest(data)[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_follows_server_type() {
        let mut server = ServerConfig::stun("stun.l.google.com:19302");
        assert_eq!(add_ice_url_scheme(&server), "stun:stun.l.google.com:19302");
        server.r#type = "turn".into();
        server.url = "relay.example.org:3478".into();
        assert_eq!(add_ice_url_scheme(&server), "turn:relay.example.org:3478");
        server.url = "turns:relay.example.org:5349".into();
        assert_eq!(add_ice_url_scheme(&server), "turns:relay.example.org:5349");
    }

    #[test]
    fn ids_and_fingerprints_have_fixed_width() {
        assert_eq!(random_id().len(), 16);
        assert_ne!(random_id(), random_id());
        let print = fingerprint(b"v=0");
        assert_eq!(print.len(), 12);
        assert_eq!(print, fingerprint(b"v=0"));
        assert_ne!(print, fingerprint(b"v=1"));
    }
}
