//! Payload framing: JSON body behind a one-byte compression flag
//!
//! ```text
//! 0x00 <json bytes>            plain
//! 0x01 <gzip(json bytes)>      compressed
//! ```

use crate::error::{CacheError, CacheResult};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::Value;
use std::io::{Read, Write};

pub const FLAG_PLAIN: u8 = 0x00;
pub const FLAG_GZIP: u8 = 0x01;

/// Bytes ready for the store, plus whether they were compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

/// Serializes values to framed payloads, gzipping those above a threshold
#[derive(Debug, Clone)]
pub struct PayloadCodec {
    compression_threshold: usize,
    level: Compression,
}

impl PayloadCodec {
    pub fn new(compression_threshold: usize) -> Self {
        Self {
            compression_threshold,
            level: Compression::default(),
        }
    }

    pub fn compression_threshold(&self) -> usize {
        self.compression_threshold
    }

    pub fn encode(&self, value: &Value) -> CacheResult<EncodedPayload> {
        let json = serde_json::to_vec(value)?;

        if json.len() <= self.compression_threshold {
            let mut bytes = Vec::with_capacity(json.len() + 1);
            bytes.push(FLAG_PLAIN);
            bytes.extend_from_slice(&json);
            return Ok(EncodedPayload {
                bytes,
                compressed: false,
            });
        }

        let mut encoder = GzEncoder::new(vec![FLAG_GZIP], self.level);
        encoder
            .write_all(&json)
            .map_err(|e| CacheError::Compression(e.to_string()))?;
        let bytes = encoder
            .finish()
            .map_err(|e| CacheError::Compression(e.to_string()))?;

        Ok(EncodedPayload {
            bytes,
            compressed: true,
        })
    }

    pub fn decode(&self, payload: &[u8]) -> CacheResult<Value> {
        match payload.split_first() {
            Some((&FLAG_PLAIN, body)) => Ok(serde_json::from_slice(body)?),
            Some((&FLAG_GZIP, body)) => {
                let mut json = Vec::with_capacity(body.len() * 4);
                GzDecoder::new(body)
                    .read_to_end(&mut json)
                    .map_err(|e| CacheError::Compression(e.to_string()))?;
                Ok(serde_json::from_slice(&json)?)
            }
            Some((flag, _)) => Err(CacheError::Serialization(format!(
                "unknown payload flag 0x{flag:02x}"
            ))),
            None => Err(CacheError::Serialization("empty payload".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_value_is_stored_plain() {
        let codec = PayloadCodec::new(1024);
        let encoded = codec.encode(&json!({"a": 1})).unwrap();
        assert!(!encoded.compressed);
        assert_eq!(encoded.bytes[0], FLAG_PLAIN);
        assert_eq!(&encoded.bytes[1..], br#"{"a":1}"#);
    }

    #[test]
    fn test_large_value_is_compressed_and_round_trips() {
        let codec = PayloadCodec::new(1024);
        let value = json!({ "body": "x".repeat(2000) });
        let encoded = codec.encode(&value).unwrap();

        assert!(encoded.compressed);
        assert_eq!(encoded.bytes[0], FLAG_GZIP);
        assert!(encoded.bytes.len() < 2000);
        assert_eq!(codec.decode(&encoded.bytes).unwrap(), value);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // "aaaa" serializes to 6 bytes including quotes
        let value = json!("aaaa");
        assert!(!PayloadCodec::new(6).encode(&value).unwrap().compressed);
        assert!(PayloadCodec::new(5).encode(&value).unwrap().compressed);
    }

    #[test]
    fn test_corrupt_payloads_are_errors() {
        let codec = PayloadCodec::new(1024);
        assert!(matches!(
            codec.decode(&[]),
            Err(CacheError::Serialization(_))
        ));
        assert!(matches!(
            codec.decode(&[0x07, b'1']),
            Err(CacheError::Serialization(_))
        ));
        assert!(matches!(
            codec.decode(&[FLAG_GZIP, 1, 2, 3]),
            Err(CacheError::Compression(_))
        ));
        assert!(matches!(
            codec.decode(&[FLAG_PLAIN, b'{']),
            Err(CacheError::Serialization(_))
        ));
    }
}
