//! Opaque identifier generation.
//!
//! Client, request, session and tunnel ids are all drawn from the same
//! restricted alphabet (lowercase ascii + digits) so that none of them can
//! ever collide with a MessagePack string edge case or be mistaken for a
//! numeric field. Mirrors `retunnel.utils.id` in the Python client this
//! crate was distilled from.

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_part(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generates an id of the form `<prefix>_<random>`.
pub fn generate_id(prefix: &str, len: usize) -> String {
    format!("{prefix}_{}", random_part(len))
}

/// Generates a client id, e.g. `cli_4f0a9c2e1b7d5a33`.
pub fn generate_client_id() -> String {
    generate_id("cli", 16)
}

/// Generates a request id, e.g. `req_9e1b7d5a33`.
pub fn generate_request_id() -> String {
    generate_id("req", 12)
}

/// Generates a tunnel-local id, e.g. `tun_9e1b7d5a33`.
pub fn generate_tunnel_local_id() -> String {
    generate_id("tun", 12)
}

/// Generates a proxy-session stream id, e.g. `ses_4f0a9c2e1b7d`.
pub fn generate_session_id() -> String {
    generate_id("ses", 12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(generate_client_id().starts_with("cli_"));
        assert!(generate_request_id().starts_with("req_"));
        assert!(generate_tunnel_local_id().starts_with("tun_"));
        assert!(generate_session_id().starts_with("ses_"));
    }

    #[test]
    fn ids_use_the_restricted_alphabet() {
        let id = generate_client_id();
        let random_part = id.split('_').nth(1).unwrap();
        assert!(random_part
            .bytes()
            .all(|b| ALPHABET.contains(&b)));
        assert_eq!(random_part.len(), 16);
    }

    #[test]
    fn ids_are_not_trivially_repeated() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
    }
}
