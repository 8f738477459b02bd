use sha2::{Digest, Sha256};

/// Derives the stable session id from `(sub, user-agent)` (C4's data model).
///
/// `H` is SHA-256 over `sub || ":" || ua`; the first 16 hex characters go on
/// the response, the full 64-character digest stays available to downstream
/// handlers via request extensions.
pub fn derive_session_id(sub: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sub.as_bytes());
    hasher.update(b":");
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn truncated(sid: &str) -> &str {
    &sid[..sid.len().min(16)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_invocations() {
        let a = derive_session_id("user-1", "curl/8.0");
        let b = derive_session_id("user-1", "curl/8.0");
        assert_eq!(a, b);
        assert_eq!(truncated(&a).len(), 16);
    }

    #[test]
    fn differs_by_subject_or_agent() {
        let a = derive_session_id("user-1", "curl/8.0");
        let b = derive_session_id("user-2", "curl/8.0");
        let c = derive_session_id("user-1", "curl/9.0");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
