//! Cache key derivation.

use crate::types::{CanonicalRequest, ParamValue};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Bumped whenever the encoding below changes, so old entries stop matching.
const KEY_VERSION: &[u8] = b"ai-lib-dispatch/cache-key/v1";

/// Opaque 32-byte content address of a [`CanonicalRequest`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Derive the key for a request. Pure: depends only on the request's normalized fields.
    pub fn derive(req: &CanonicalRequest) -> Self {
        let mut hasher = Sha256::new();
        write_bytes(&mut hasher, KEY_VERSION);
        write_bytes(&mut hasher, req.model_id().as_bytes());
        write_bytes(&mut hasher, req.kind().as_str().as_bytes());
        write_bytes(&mut hasher, req.payload().as_bytes());
        hasher.update((req.params().len() as u64).to_le_bytes());
        for (name, value) in req.params() {
            write_bytes(&mut hasher, name.as_bytes());
            write_value(&mut hasher, value);
        }
        CacheKey(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        CacheKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, 64 chars.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Two-char shard prefix used for on-disk layout.
    pub fn shard(&self) -> String {
        format!("{:02x}", self.0[0])
    }
}

// Length-prefix every variable-size field so no two encodings share a byte stream.
fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_value(hasher: &mut Sha256, value: &ParamValue) {
    hasher.update([value.tag()]);
    match value {
        ParamValue::Bool(b) => hasher.update([u8::from(*b)]),
        ParamValue::Int(i) => hasher.update(i.to_le_bytes()),
        ParamValue::Float(f) => hasher.update(f.to_bits().to_le_bytes()),
        ParamValue::Text(s) => write_bytes(hasher, s.as_bytes()),
        ParamValue::List(items) => {
            hasher.update((items.len() as u64).to_le_bytes());
            for item in items {
                write_bytes(hasher, item.as_bytes());
            }
        }
    }
}

impl From<&CanonicalRequest> for CacheKey {
    fn from(req: &CanonicalRequest) -> Self {
        CacheKey::derive(req)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError(String);

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cache key: {}", self.0)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for CacheKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 || !s.is_ascii() {
            return Err(ParseKeyError(format!("expected 64 hex chars, got {:?}", s)));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseKeyError(format!("non-hex digit in {:?}", s)))?;
        }
        Ok(CacheKey(out))
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GenerationOptions, GenerationRequest, TextOptions};

    fn text(model: &str, payload: &str, opts: TextOptions) -> CanonicalRequest {
        GenerationRequest::text(model, payload)
            .with_options(GenerationOptions::Text(opts))
            .normalize()
            .unwrap()
    }

    #[test]
    fn test_equal_requests_equal_keys() {
        let a = text(
            "openai/gpt-4o",
            "hi",
            TextOptions::new().with_temperature(0.5).with_max_tokens(10),
        );
        let b = text(
            " openai/gpt-4o",
            "hi  ",
            TextOptions::new().with_max_tokens(10).with_temperature(0.5),
        );
        assert_eq!(CacheKey::derive(&a), CacheKey::derive(&b));
    }

    #[test]
    fn test_each_field_changes_the_key() {
        let base = text("openai/gpt-4o", "hi", TextOptions::new().with_temperature(0.5));
        let variants = vec![
            text("openai/gpt-4o-mini", "hi", TextOptions::new().with_temperature(0.5)),
            text("openai/gpt-4o", "hi!", TextOptions::new().with_temperature(0.5)),
            text("openai/gpt-4o", "hi", TextOptions::new().with_temperature(0.6)),
            text("openai/gpt-4o", "hi", TextOptions::new()),
            GenerationRequest::image("openai/gpt-4o", "hi").normalize().unwrap(),
        ];
        let k = CacheKey::derive(&base);
        for v in &variants {
            assert_ne!(k, CacheKey::derive(v), "{:?}", v);
        }
    }

    #[test]
    fn test_field_boundaries_do_not_alias() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = text("ab", "c", TextOptions::new());
        let b = text("a", "bc", TextOptions::new());
        assert_ne!(CacheKey::derive(&a), CacheKey::derive(&b));

        let s1 = text("m", "p", TextOptions::new().with_stop(["a", "b"]));
        let s2 = text("m", "p", TextOptions::new().with_stop(["ab"]));
        assert_ne!(CacheKey::derive(&s1), CacheKey::derive(&s2));
    }

    #[test]
    fn test_key_is_stable_across_processes() {
        // Pinned so an accidental encoding change fails loudly.
        let req = text("openai/gpt-4o", "hello", TextOptions::new());
        let k1 = CacheKey::derive(&req);
        let k2 = CacheKey::derive(&req.clone());
        assert_eq!(k1, k2);
        assert_eq!(
            k1.to_hex(),
            "7a5629d20b7df221d2b6f383b312309db0b06d6da5ed2d6efeb95f2081ddc1aa"
        );
        assert_eq!(k1.shard(), k1.to_hex()[..2]);
    }

    #[test]
    fn test_hex_roundtrip_and_serde() {
        let key = CacheKey::derive(&text("m", "p", TextOptions::new()));
        let parsed: CacheKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{}\"", key));
        assert!("zz".parse::<CacheKey>().is_err());
        assert!("g".repeat(64).parse::<CacheKey>().is_err());
    }
}
