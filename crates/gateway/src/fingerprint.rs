use sha2::{Digest, Sha256};

/// Content-addressed cache key: SHA-256 over `(model, messages, params)`.
///
/// `serde_json::Value`'s object map is `BTreeMap`-backed (the `preserve_order`
/// feature is not enabled in this crate), so object keys already serialise in
/// a stable lexicographic order — this alone satisfies the "stable key
/// ordering of params" invariant without a separate canonicalisation pass.
/// The `messages` array is serialised byte-exact, in the order given.
pub fn fingerprint(model: &str, messages: &serde_json::Value, params: &serde_json::Value) -> String {
    let canonical = serde_json::json!({
        "model": model,
        "messages": messages,
        "params": params,
    });
    let bytes = serde_json::to_vec(&canonical).expect("json values always serialise");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_under_param_key_reordering() {
        let messages = json!([{"role": "user", "content": "hi"}]);
        let a = fingerprint("m", &messages, &json!({"t": 0.1, "top_p": 0.9}));
        let b = fingerprint("m", &messages, &json!({"top_p": 0.9, "t": 0.1}));
        assert_eq!(a, b);
    }

    #[test]
    fn differs_by_model() {
        let messages = json!([{"role": "user", "content": "hi"}]);
        let params = json!({"t": 0.1});
        let a = fingerprint("m1", &messages, &params);
        let b = fingerprint("m2", &messages, &params);
        assert_ne!(a, b);
    }

    #[test]
    fn identical_inputs_produce_identical_fingerprint() {
        let messages = json!([{"role": "user", "content": "hi"}]);
        let params = json!({"t": 0.1});
        assert_eq!(
            fingerprint("m", &messages, &params),
            fingerprint("m", &messages, &params)
        );
    }
}
