use crate::*;

// ============================================================================
//  PRIMITIVES
// ============================================================================

#[test]
fn test_integers_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.i64(0);
    enc.i64(i64::MIN);
    enc.i32(i32::MAX);
    enc.i32(-7);

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.i64()?, 0);
    assert_eq!(dec.i64()?, i64::MIN);
    assert_eq!(dec.i32()?, i32::MAX);
    assert_eq!(dec.i32()?, -7);
    dec.finish()
}

#[test]
fn test_integers_are_big_endian() {
    let mut enc = Encoder::new();
    enc.i32(1);
    let bytes = enc.into_bytes();

    assert_eq!(&bytes[..8], &INT_MARKER.to_be_bytes());
    assert_eq!(&bytes[8..], &[0, 0, 0, 1]);
}

#[test]
fn test_bool_roundtrip() -> Result<()> {
    let mut enc = Encoder::new();
    enc.bool(true);
    enc.bool(false);

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);

    assert!(dec.bool()?);
    assert!(!dec.bool()?);
    dec.finish()
}

#[test]
fn test_absent_string_is_distinct_from_empty() -> Result<()> {
    let mut enc = Encoder::new();
    enc.opt_str(None)?;
    enc.opt_str(Some(""))?;
    enc.str("hello 🦀")?;

    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);

    assert_eq!(dec.opt_str()?, None);
    assert_eq!(dec.opt_str()?, Some(""));
    assert_eq!(dec.str()?, "hello 🦀");
    dec.finish()
}

#[test]
fn test_required_string_rejects_absent() {
    let mut enc = Encoder::new();
    enc.opt_str(None).unwrap();
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str(), Err(Error::UnexpectedNull));
}

#[test]
fn test_flags() -> Result<()> {
    let mut enc = Encoder::new();
    enc.flag(true);
    enc.flag(false);
    let bytes = enc.into_bytes();
    assert_eq!(bytes, vec![1, 0]);

    let mut dec = Decoder::new(&bytes);
    assert!(dec.flag()?);
    assert!(!dec.flag()?);

    let mut bad = Decoder::new(&[7]);
    assert_eq!(bad.flag(), Err(Error::InvalidFlag(7)));
    Ok(())
}

// ============================================================================
//  FAULTS
// ============================================================================

#[test]
fn test_marker_mismatch_detects_kind_drift() {
    let mut enc = Encoder::new();
    enc.i32(5);
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    assert_eq!(
        dec.i64(),
        Err(Error::MarkerMismatch { expected: LONG_MARKER, found: INT_MARKER })
    );
}

#[test]
fn test_truncated_stream() {
    let mut enc = Encoder::new();
    enc.str("truncate me").unwrap();
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes[..bytes.len() - 3]);
    assert_eq!(dec.str(), Err(Error::UnexpectedEnd));

    let mut dec = Decoder::new(&bytes[..4]);
    assert_eq!(dec.str(), Err(Error::UnexpectedEnd));
}

#[test]
fn test_negative_length_other_than_sentinel() {
    let mut bytes = STRING_MARKER.to_be_bytes().to_vec();
    bytes.extend_from_slice(&(-2i32).to_be_bytes());

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.opt_str(), Err(Error::InvalidLength(-2)));
}

#[test]
fn test_invalid_utf8() {
    let mut bytes = STRING_MARKER.to_be_bytes().to_vec();
    bytes.extend_from_slice(&2i32.to_be_bytes());
    bytes.extend_from_slice(&[0xC3, 0x28]);

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.str(), Err(Error::InvalidUtf8));
}

// ============================================================================
//  RECORDS
// ============================================================================

#[derive(Debug, PartialEq)]
struct Point {
    x: i32,
    label: Option<String>,
}

impl Record for Point {
    const MARKER: i64 = 42_424_242;

    fn encode_fields(&self, enc: &mut Encoder) -> Result<()> {
        enc.i32(self.x);
        enc.opt_str(self.label.as_deref())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Point {
            x: dec.i32()?,
            label: dec.opt_str()?.map(str::to_owned),
        })
    }
}

#[derive(Debug, PartialEq)]
struct Line {
    from: Point,
    to: Option<Point>,
}

impl Record for Line {
    const MARKER: i64 = 77_777_001;

    fn encode_fields(&self, enc: &mut Encoder) -> Result<()> {
        enc.record(&self.from)?;
        enc.opt_record(self.to.as_ref())
    }

    fn decode_fields(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Line { from: dec.record()?, to: dec.opt_record()? })
    }
}

#[test]
fn test_record_guards_both_sides() -> Result<()> {
    let point = Point { x: 3, label: Some("p".into()) };
    let bytes = point.to_bytes()?;

    assert_eq!(&bytes[..8], &Point::MARKER.to_be_bytes());
    assert_eq!(&bytes[bytes.len() - 8..], &Point::MARKER.to_be_bytes());
    assert_eq!(Point::from_bytes(&bytes)?, point);
    Ok(())
}

#[test]
fn test_nested_and_optional_records() -> Result<()> {
    let with_end = Line {
        from: Point { x: 1, label: None },
        to: Some(Point { x: 2, label: Some(String::new()) }),
    };
    let without_end = Line { from: Point { x: 9, label: None }, to: None };

    assert_eq!(Line::from_bytes(&with_end.to_bytes()?)?, with_end);
    assert_eq!(Line::from_bytes(&without_end.to_bytes()?)?, without_end);
    Ok(())
}

#[test]
fn test_corrupted_close_guard() -> Result<()> {
    let mut bytes = Point { x: 1, label: None }.to_bytes()?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    match Point::from_bytes(&bytes) {
        Err(Error::MarkerMismatch { expected, .. }) => assert_eq!(expected, Point::MARKER),
        other => panic!("expected marker mismatch, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_wrong_record_kind() -> Result<()> {
    let bytes = Point { x: 1, label: None }.to_bytes()?;
    assert_eq!(
        Line::from_bytes(&bytes),
        Err(Error::MarkerMismatch { expected: Line::MARKER, found: Point::MARKER })
    );
    Ok(())
}

#[test]
fn test_trailing_bytes_rejected() -> Result<()> {
    let mut bytes = Point { x: 1, label: None }.to_bytes()?;
    bytes.push(0);
    assert_eq!(Point::from_bytes(&bytes), Err(Error::TrailingBytes(1)));
    Ok(())
}

#[test]
fn test_sequence_count() -> Result<()> {
    let mut enc = Encoder::new();
    enc.count(3)?;
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.count()?, 3);

    let mut enc = Encoder::new();
    enc.i32(-1);
    let bytes = enc.into_bytes();
    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.count(), Err(Error::InvalidLength(-1)));
    Ok(())
}

#[test]
fn test_peek_marker_does_not_advance() -> Result<()> {
    let mut enc = Encoder::new();
    enc.i64(12);
    let bytes = enc.into_bytes();

    let mut dec = Decoder::new(&bytes);
    assert_eq!(dec.peek_marker()?, LONG_MARKER);
    assert_eq!(dec.remaining(), 16);
    assert_eq!(dec.i64()?, 12);
    Ok(())
}
