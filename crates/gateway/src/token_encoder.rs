use tiktoken_rs::CoreBPE;

/// Pluggable token counter used by the quota middleware.
///
/// Mirrors `middleware/quota.py`'s encoder selection: try to resolve a named
/// BPE encoding, and fall back to a UTF-8 byte count (with a one-time warning)
/// if the encoding name is unrecognised.
pub enum TokenEncoder {
    Bpe(CoreBPE),
    ByteCount,
}

impl TokenEncoder {
    pub fn resolve(encoding: &str) -> Self {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base().ok(),
            "o200k_base" => tiktoken_rs::o200k_base().ok(),
            "p50k_base" => tiktoken_rs::p50k_base().ok(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base().ok(),
            other => {
                tracing::warn!(encoding = other, "unknown quota encoding, using byte-count fallback");
                None
            }
        };
        match bpe {
            Some(bpe) => TokenEncoder::Bpe(bpe),
            None => TokenEncoder::ByteCount,
        }
    }

    pub fn count(&self, text: &str) -> u64 {
        match self {
            TokenEncoder::Bpe(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
            TokenEncoder::ByteCount => text.len() as u64,
        }
    }
}

/// Only textual payloads are counted: `content-type` starting with `text/`
/// or containing `json`. A missing `content-type` is treated as non-textual
/// (zero tokens), matching the original's `_is_textual("")` default.
pub fn is_textual_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => false,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("text/") || ct.contains("json")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_count_fallback_for_unknown_encoding() {
        let enc = TokenEncoder::resolve("not-a-real-encoding");
        assert!(matches!(enc, TokenEncoder::ByteCount));
        assert_eq!(enc.count("abc"), 3);
    }

    #[test]
    fn textual_content_type_detection() {
        assert!(is_textual_content_type(Some("application/json")));
        assert!(is_textual_content_type(Some("text/event-stream")));
        assert!(!is_textual_content_type(Some("image/png")));
        assert!(!is_textual_content_type(None));
    }
}
