//! Fixed-width vector codec.
//!
//! Layout: components concatenated, 4 bytes each, little-endian. The bytes
//! carry neither a length prefix nor the encoding tag; the tag travels next
//! to the payload (e.g. [`EmbeddingRecord::encoding`](crate::EmbeddingRecord)).

use crate::error::IngestError;
use crate::record::{ScalarEncoding, Vector};

/// Width in bytes of one encoded component.
pub fn element_width(encoding: ScalarEncoding) -> usize {
    match encoding {
        ScalarEncoding::Float32 => size_of::<f32>(),
        ScalarEncoding::Int32 => size_of::<i32>(),
    }
}

/// Encode `vector` using `encoding`.
///
/// A float vector encoded as INT32 is truncated toward zero (saturating);
/// keeping components integral is the caller's job.
pub fn encode_vector(vector: &Vector, encoding: ScalarEncoding) -> Result<Vec<u8>, IngestError> {
    let mut out = Vec::with_capacity(vector.len() * element_width(encoding));
    match (vector, encoding) {
        (Vector::Float32(v), ScalarEncoding::Float32) => {
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        (Vector::Int32(v), ScalarEncoding::Int32) => {
            v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes()));
        }
        (Vector::Float32(v), ScalarEncoding::Int32) => {
            v.iter().for_each(|x| out.extend_from_slice(&(*x as i32).to_le_bytes()));
        }
        (Vector::Int32(v), ScalarEncoding::Float32) => {
            v.iter().for_each(|x| out.extend_from_slice(&(*x as f32).to_le_bytes()));
        }
    }
    Ok(out)
}

/// Decode bytes produced by [`encode_vector`].
pub fn decode_vector(bytes: &[u8], encoding: ScalarEncoding) -> Result<Vector, IngestError> {
    let width = element_width(encoding);
    if bytes.len() % width != 0 {
        return Err(IngestError::MalformedPayload { len: bytes.len(), width });
    }
    let chunks = bytes.chunks_exact(width).map(|c| [c[0], c[1], c[2], c[3]]);
    Ok(match encoding {
        ScalarEncoding::Float32 => Vector::Float32(chunks.map(f32::from_le_bytes).collect()),
        ScalarEncoding::Int32 => Vector::Int32(chunks.map(i32::from_le_bytes).collect()),
    })
}

/// Like [`encode_vector`], with the encoding given as its string tag.
pub fn encode_vector_tagged(vector: &Vector, tag: &str) -> Result<Vec<u8>, IngestError> {
    encode_vector(vector, tag.parse()?)
}

/// Like [`decode_vector`], with the encoding given as its string tag.
pub fn decode_vector_tagged(bytes: &[u8], tag: &str) -> Result<Vector, IngestError> {
    decode_vector(bytes, tag.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float32_round_trip() {
        let v = Vector::Float32(vec![0.0, -1.5, 3.25, f32::MAX, f32::MIN_POSITIVE]);
        let bytes = encode_vector(&v, ScalarEncoding::Float32).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(decode_vector(&bytes, ScalarEncoding::Float32).unwrap(), v);
    }

    #[test]
    fn test_int32_round_trip() {
        let v = Vector::Int32(vec![0, 1, -1, i32::MAX, i32::MIN]);
        let bytes = encode_vector(&v, ScalarEncoding::Int32).unwrap();
        assert_eq!(decode_vector(&bytes, ScalarEncoding::Int32).unwrap(), v);
    }

    #[test]
    fn test_empty_vector() {
        let v = Vector::Float32(vec![]);
        let bytes = encode_vector(&v, ScalarEncoding::Float32).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(decode_vector(&bytes, ScalarEncoding::Float32).unwrap(), v);
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_vector(&Vector::Int32(vec![1, -2]), ScalarEncoding::Int32).unwrap();
        assert_eq!(bytes, vec![1, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff]);

        let bytes = encode_vector(&Vector::Float32(vec![1.0]), ScalarEncoding::Float32).unwrap();
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_int32_truncates_float_input() {
        let v = Vector::Float32(vec![1.9, -2.7, 3.0]);
        let bytes = encode_vector(&v, ScalarEncoding::Int32).unwrap();
        assert_eq!(
            decode_vector(&bytes, ScalarEncoding::Int32).unwrap(),
            Vector::Int32(vec![1, -2, 3])
        );
    }

    #[test]
    fn test_unsupported_tag() {
        let v = Vector::Float32(vec![1.0]);
        assert!(matches!(
            encode_vector_tagged(&v, "BOGUS"),
            Err(IngestError::UnsupportedEncoding(_))
        ));
        assert!(matches!(
            decode_vector_tagged(&[0, 0, 0, 0], "BOGUS"),
            Err(IngestError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_tagged_round_trip() {
        let v = Vector::Int32(vec![7, 8, 9]);
        let bytes = encode_vector_tagged(&v, "INT32").unwrap();
        assert_eq!(decode_vector_tagged(&bytes, "INT32").unwrap(), v);
    }

    #[test]
    fn test_malformed_length() {
        match decode_vector(&[1, 2, 3, 4, 5], ScalarEncoding::Float32) {
            Err(IngestError::MalformedPayload { len, width }) => {
                assert_eq!(len, 5);
                assert_eq!(width, 4);
            }
            other => panic!("expected MalformedPayload, got {other:?}"),
        }
    }
}
