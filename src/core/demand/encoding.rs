use anyhow::anyhow;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use std::cell::RefCell;
use std::io::Read;

thread_local! {
    static COMPRESSOR: RefCell<libdeflater::Compressor> =
        RefCell::new(libdeflater::Compressor::new(libdeflater::CompressionLvl::fastest()));
}

pub const CONTENT_TYPE_JSON: &str = "application/json;charset=utf-8";

pub struct RequestEncoder {
    pub headers: HeaderMap,
    pub data: Vec<u8>,
}

impl RequestEncoder {
    fn encode_json<T: Serialize>(req: &T) -> Result<Vec<u8>, anyhow::Error> {
        serde_json::to_vec(req).map_err(anyhow::Error::from)
    }

    fn compress(data: Vec<u8>) -> Result<Vec<u8>, anyhow::Error> {
        COMPRESSOR.with(|c| {
            let mut compressor = c.borrow_mut();
            let max_size = compressor.gzip_compress_bound(data.len());
            let mut compressed = vec![0u8; max_size];

            let actual_size = compressor
                .gzip_compress(&data, &mut compressed)
                .map_err(|e| anyhow!("Compression failed: {:?}", e))?;

            compressed.truncate(actual_size);
            Ok(compressed)
        })
    }

    /// Encodes the given request as json and attaches the content type
    /// header, gzipping the payload and marking the content encoding
    /// if requested
    pub fn encode<T: Serialize>(req: &T, gzip: bool) -> Result<Self, anyhow::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));

        let mut data = Self::encode_json(req)?;

        if gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            data = Self::compress(data)?;
        }

        Ok(Self { headers, data })
    }
}

/// Guess at the inflated size, never above a non zero limit
fn inflate_capacity(compressed: usize, limit: u64) -> usize {
    let guess = compressed.saturating_mul(4);

    if limit > 0 {
        guess.min(usize::try_from(limit).unwrap_or(usize::MAX))
    } else {
        guess
    }
}

/// Inflates a gzip payload, refusing to produce more than `limit`
/// bytes when a non zero limit is given
pub fn gunzip(data: &[u8], limit: u64) -> Result<Vec<u8>, anyhow::Error> {
    let decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::with_capacity(inflate_capacity(data.len(), limit));

    if limit > 0 {
        decoder
            .take(limit + 1)
            .read_to_end(&mut out)
            .map_err(|e| anyhow!("Failed to decompress gzip body: {}", e))?;

        if out.len() as u64 > limit {
            anyhow::bail!("Decompressed body exceeds {} bytes", limit);
        }
    } else {
        let mut decoder = decoder;
        decoder
            .read_to_end(&mut out)
            .map_err(|e| anyhow!("Failed to decompress gzip body: {}", e))?;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_encoding_has_no_content_encoding() {
        let body = json!({"id": "req"});
        let encoded = RequestEncoder::encode(&body, false).unwrap();

        assert!(encoded.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(encoded.headers.get(CONTENT_TYPE).unwrap(), CONTENT_TYPE_JSON);
        assert_eq!(encoded.data, serde_json::to_vec(&body).unwrap());
    }

    #[test]
    fn test_gzip_encoding_inflates_to_plain() {
        let body = json!({"id": "req", "imp": [{"id": "1"}]});
        let encoded = RequestEncoder::encode(&body, true).unwrap();

        assert_eq!(encoded.headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(&encoded.data[..2], &[0x1f, 0x8b]);

        let inflated = gunzip(&encoded.data, 0).unwrap();
        assert_eq!(inflated, serde_json::to_vec(&body).unwrap());
    }

    #[test]
    fn test_gunzip_enforces_limit() {
        let body = json!({"padding": "x".repeat(512)});
        let encoded = RequestEncoder::encode(&body, true).unwrap();

        assert!(gunzip(&encoded.data, 64).is_err());
        assert!(gunzip(&encoded.data, 4096).is_ok());
    }

    #[test]
    fn test_inflate_capacity_bounded_by_limit() {
        assert_eq!(inflate_capacity(100, 0), 400);
        assert_eq!(inflate_capacity(100, 64), 64);
        assert_eq!(inflate_capacity(10, 4096), 40);
        assert_eq!(inflate_capacity(usize::MAX, 0), usize::MAX);
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        assert!(gunzip(b"not gzip at all", 0).is_err());
    }
}
