//! Tests for truncated input and overflow error paths.

use crate::encoding::*;

#[test]
fn u64_decode_truncated() {
    let err = decode_from_slice::<u64>(&[1, 2, 3]).unwrap_err();
    assert!(
        matches!(
            err,
            EncodingError::UnexpectedEof {
                needed: 8,
                available: 3
            }
        ),
        "expected UnexpectedEof, got: {err:?}"
    );
}

#[test]
fn u32_decode_empty() {
    let err = decode_from_slice::<u32>(&[]).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn decode_array_checks_whole_length_up_front() {
    // Three full u64s are present but four are requested.
    let mut buf = Vec::new();
    encode_slice(&[1u64, 2, 3], &mut buf).unwrap();
    let err = decode_array::<u64>(&buf, 4).unwrap_err();
    assert!(matches!(
        err,
        EncodingError::UnexpectedEof {
            needed: 32,
            available: 24
        }
    ));
}

#[test]
fn decode_array_rejects_overflowing_count() {
    let err = decode_array::<u64>(&[], usize::MAX).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn len_to_u32_boundaries() {
    assert_eq!(len_to_u32(u32::MAX as usize).unwrap(), u32::MAX);
    assert!(matches!(
        len_to_u32(u32::MAX as usize + 1),
        Err(EncodingError::LengthOverflow(_))
    ));
}
