//! zlib compression wrapper.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{KvError, KvResult};
use crate::wrappers::Wrapper;

pub struct CompressionWrapper {
    level: Compression,
}

impl CompressionWrapper {
    /// `level` is the zlib level, 0 (store) to 9 (best).
    pub fn new(level: u32) -> KvResult<Self> {
        if level > 9 {
            return Err(KvError::configuration(format!(
                "compression level must be between 0 and 9, got {}",
                level
            )));
        }
        Ok(Self {
            level: Compression::new(level),
        })
    }
}

impl Wrapper for CompressionWrapper {
    fn name(&self) -> &str {
        "compression"
    }

    fn on_write(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), self.level);
        encoder
            .write_all(&bytes)
            .map_err(|e| KvError::wrapper("compression", e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| KvError::wrapper("compression", e.to_string()))
    }

    fn on_read(&self, bytes: Vec<u8>) -> KvResult<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(bytes.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| KvError::wrapper("compression", e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_shrinks_repetitive_payloads() {
        let wrapper = CompressionWrapper::new(6).unwrap();
        let payload = "abcdefgh".repeat(512).into_bytes();
        let packed = wrapper.on_write(payload.clone()).unwrap();
        assert!(packed.len() < payload.len() / 4);
        assert_eq!(wrapper.on_read(packed).unwrap(), payload);
    }

    #[test]
    fn test_empty_payload() {
        let wrapper = CompressionWrapper::new(1).unwrap();
        let packed = wrapper.on_write(Vec::new()).unwrap();
        assert!(wrapper.on_read(packed).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_is_wrapper_error() {
        let wrapper = CompressionWrapper::new(6).unwrap();
        assert!(matches!(
            wrapper.on_read(b"not zlib at all".to_vec()),
            Err(KvError::Wrapper { .. })
        ));
    }

    #[test]
    fn test_level_out_of_range() {
        assert!(matches!(
            CompressionWrapper::new(10),
            Err(KvError::Configuration(_))
        ));
    }
}
