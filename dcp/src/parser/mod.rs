//! Parser for the tagged binary property format the firmware uses for display data.
//!
//! A document is a 4 byte magic followed by a tree of tagged values. Like the device tree parser
//! this borrows from the input and does not allocate: strings and blobs are returned as slices of
//! the original buffer. Traversal is forward-only; to start over, call [parse] again.
//!
//! Each tag is a little-endian `u32` aligned to 4 bytes: 24 bits of size, 5 bits of type, 2 bits
//! of padding that must be zero, and a "last" bit that nothing depends on.
use alloc::string::String;
use bitfield::bitfield;
use byteorder::{ByteOrder, LittleEndian};
use snafu::{ensure, Snafu};

pub mod encode;

pub use encode::{Encoder, Value};

/// Magic at the start of every document.
pub const HEADER_MAGIC: u32 = 0xd3;

/// Nesting limit for [Cursor::skip].
pub const MAX_NESTING: usize = 64;

/// Errors from reading a property document.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum ParseError {
    #[snafu(display("missing or invalid document header"))]
    InvalidHeader,
    #[snafu(display("read of {wanted} bytes at offset {offset} runs past the end ({len} bytes)"))]
    Truncated {
        offset: usize,
        wanted: usize,
        len: usize,
    },
    #[snafu(display("tag at offset {offset} has non-zero padding"))]
    BadPadding { offset: usize },
    #[snafu(display("expected a {expected:?}, found a {found:?}"))]
    TypeMismatch { expected: TagType, found: TagType },
    #[snafu(display("unknown tag type {raw} at offset {offset}"))]
    UnknownType { raw: u8, offset: usize },
    #[snafu(display("string at offset {offset} is not UTF-8"))]
    Utf8 { offset: usize },
    #[snafu(display("values nested deeper than {MAX_NESTING}"))]
    TooDeep,
}

bitfield! {
    struct RawTag(u32);
    impl Debug;
    u32;
    size, _: 23, 0;
    u8;
    kind, _: 28, 24;
    padding, _: 30, 29;
    last, _: 31;
}

/// Type of a tagged value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum TagType {
    /// `size` key/value pairs follow.
    Dictionary = 1,
    /// `size` values follow.
    Array = 2,
    /// 8 bytes of signed integer follow.
    Int64 = 4,
    /// `size` bytes of text follow.
    String = 9,
    /// `size` bytes of data follow.
    Blob = 10,
    /// No payload; the value is `size != 0`.
    Bool = 11,
}

impl TryFrom<u8> for TagType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => TagType::Dictionary,
            2 => TagType::Array,
            4 => TagType::Int64,
            9 => TagType::String,
            10 => TagType::Blob,
            11 => TagType::Bool,
            v => return Err(v),
        })
    }
}

/// A decoded tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Tag {
    pub kind: TagType,
    pub size: u32,
    pub last: bool,
}

/// A position in a property document.
#[derive(Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Start reading the document in `buf`.
pub fn parse(buf: &[u8]) -> Result<Cursor<'_>, ParseError> {
    ensure!(
        buf.len() >= 4 && LittleEndian::read_u32(buf) == HEADER_MAGIC,
        InvalidHeaderSnafu
    );
    Ok(Cursor { buf, pos: 4 })
}

fn pad_end_4b(num_bytes: usize) -> usize {
    (num_bytes + 3) & !3
}

impl<'a> Cursor<'a> {
    /// Byte offset of the cursor from the start of the document.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left in the document after the cursor.
    pub fn remaining_bytes(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.buf.len());
        let end = end.ok_or(ParseError::Truncated {
            offset: self.pos,
            wanted: n,
            len: self.buf.len(),
        })?;
        let data = &self.buf[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    /// Read the next tag.
    pub fn read_tag(&mut self) -> Result<Tag, ParseError> {
        self.pos = pad_end_4b(self.pos);
        let offset = self.pos;
        let raw = RawTag(LittleEndian::read_u32(self.take(4)?));
        ensure!(raw.padding() == 0, BadPaddingSnafu { offset });
        let kind = TagType::try_from(raw.kind())
            .map_err(|raw| ParseError::UnknownType { raw, offset })?;
        Ok(Tag {
            kind,
            size: raw.size(),
            last: raw.last(),
        })
    }

    /// Read the next tag, failing unless it has type `expected`.
    pub fn read_tag_of_type(&mut self, expected: TagType) -> Result<Tag, ParseError> {
        let tag = self.read_tag()?;
        ensure!(
            tag.kind == expected,
            TypeMismatchSnafu {
                expected,
                found: tag.kind
            }
        );
        Ok(tag)
    }

    /// Consume one value of any type.
    pub fn skip(&mut self) -> Result<(), ParseError> {
        self.skip_nested(0)
    }

    fn skip_nested(&mut self, depth: usize) -> Result<(), ParseError> {
        ensure!(depth < MAX_NESTING, TooDeepSnafu);
        let tag = self.read_tag()?;
        match tag.kind {
            TagType::Dictionary => {
                for _ in 0..(2 * tag.size as u64) {
                    self.skip_nested(depth + 1)?;
                }
            }
            TagType::Array => {
                for _ in 0..tag.size {
                    self.skip_nested(depth + 1)?;
                }
            }
            TagType::Int64 => {
                self.take(8)?;
            }
            TagType::String | TagType::Blob => {
                self.take(tag.size as usize)?;
            }
            TagType::Bool => {}
        }
        Ok(())
    }

    /// Read an integer.
    pub fn read_int(&mut self) -> Result<i64, ParseError> {
        self.read_tag_of_type(TagType::Int64)?;
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool, ParseError> {
        Ok(self.read_tag_of_type(TagType::Bool)?.size != 0)
    }

    /// Read a string, borrowed from the document. Trailing NULs are dropped.
    pub fn read_str(&mut self) -> Result<&'a str, ParseError> {
        let tag = self.read_tag_of_type(TagType::String)?;
        let offset = self.pos;
        let mut data = self.take(tag.size as usize)?;
        while let [rest @ .., 0] = data {
            data = rest;
        }
        core::str::from_utf8(data).map_err(|_| ParseError::Utf8 { offset })
    }

    /// Read a string into an owned buffer.
    pub fn read_string(&mut self) -> Result<String, ParseError> {
        self.read_str().map(String::from)
    }

    /// Read a blob, borrowed from the document.
    pub fn read_blob(&mut self) -> Result<&'a [u8], ParseError> {
        let tag = self.read_tag_of_type(TagType::Blob)?;
        self.take(tag.size as usize)
    }

    /// Start walking a dictionary.
    pub fn iter_dict(&mut self) -> Result<DictIter<'_, 'a>, ParseError> {
        let tag = self.read_tag_of_type(TagType::Dictionary)?;
        Ok(DictIter {
            cursor: self,
            remaining: tag.size,
        })
    }

    /// Start walking an array.
    pub fn iter_array(&mut self) -> Result<ArrayIter<'_, 'a>, ParseError> {
        let tag = self.read_tag_of_type(TagType::Array)?;
        Ok(ArrayIter {
            cursor: self,
            remaining: tag.size,
        })
    }
}

/// Walks the entries of a dictionary.
///
/// After [DictIter::next_key] returns a key, the value must be consumed through
/// [DictIter::value] (read or skipped) before asking for the next key.
pub struct DictIter<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    remaining: u32,
}

impl<'c, 'a> DictIter<'c, 'a> {
    /// Entries not yet visited.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Read the next key, leaving the cursor at its value.
    pub fn next_key(&mut self) -> Option<Result<&'a str, ParseError>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let key = self.cursor.read_str();
        if key.is_err() {
            self.remaining = 0;
        }
        Some(key)
    }

    /// The cursor, positioned at the value of the last key.
    pub fn value(&mut self) -> &mut Cursor<'a> {
        &mut *self.cursor
    }
}

/// Walks the elements of an array.
pub struct ArrayIter<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    remaining: u32,
}

impl<'c, 'a> ArrayIter<'c, 'a> {
    /// Elements not yet visited.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// The cursor positioned at the next element, which must be consumed before calling again.
    pub fn next_element(&mut self) -> Option<&mut Cursor<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(&mut *self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use alloc::{string::ToString, vec, vec::Vec};

    use super::*;

    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        *seed >> 33
    }

    fn random_value(seed: &mut u64, depth: usize) -> Value {
        let choice = if depth >= 5 { lcg(seed) % 4 } else { lcg(seed) % 6 };
        match choice {
            0 => Value::Int(lcg(seed) as i64 - (1 << 30)),
            1 => Value::Bool(lcg(seed) % 2 == 0),
            2 => Value::String("x".repeat((lcg(seed) % 13) as usize)),
            3 => Value::Blob(vec![0xa5; (lcg(seed) % 9) as usize]),
            4 => Value::Array(
                (0..lcg(seed) % 4)
                    .map(|_| random_value(seed, depth + 1))
                    .collect(),
            ),
            _ => Value::Dict(
                (0..lcg(seed) % 4)
                    .map(|i| (i.to_string(), random_value(seed, depth + 1)))
                    .collect(),
            ),
        }
    }

    #[test]
    fn rejects_bad_header() {
        assert_eq!(parse(&[]).err(), Some(ParseError::InvalidHeader));
        assert_eq!(parse(&[0xd3, 0, 0]).err(), Some(ParseError::InvalidHeader));
        assert_eq!(parse(&[0xd4, 0, 0, 0]).err(), Some(ParseError::InvalidHeader));
        assert!(parse(&[0xd3, 0, 0, 0]).is_ok());
    }

    #[test]
    fn skip_consumes_whole_document() {
        let mut seed = 0x5eed;
        for _ in 0..200 {
            let value = random_value(&mut seed, 0);
            let mut enc = Encoder::new();
            enc.value(&value);
            let buf = enc.finish();
            let mut c = parse(&buf).unwrap();
            c.skip().unwrap();
            assert_eq!(c.position(), buf.len(), "{value:?}");
        }
    }

    #[test]
    fn reads_scalars() {
        let mut enc = Encoder::new();
        enc.int(-7);
        enc.bool(true);
        enc.bool(false);
        enc.string("Active");
        enc.blob(&[1, 2, 3]);
        let buf = enc.finish();
        let mut c = parse(&buf).unwrap();
        assert_eq!(c.read_int(), Ok(-7));
        assert_eq!(c.read_bool(), Ok(true));
        assert_eq!(c.read_bool(), Ok(false));
        assert_eq!(c.read_str(), Ok("Active"));
        assert_eq!(c.read_blob(), Ok(&[1u8, 2, 3][..]));
        assert!(matches!(c.read_tag(), Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn type_mismatch() {
        let mut enc = Encoder::new();
        enc.string("nope");
        let buf = enc.finish();
        let mut c = parse(&buf).unwrap();
        assert_eq!(
            c.read_int(),
            Err(ParseError::TypeMismatch {
                expected: TagType::Int64,
                found: TagType::String
            })
        );
    }

    #[test]
    fn bad_padding_and_unknown_type() {
        let mut buf = Vec::from(HEADER_MAGIC.to_le_bytes());
        buf.extend_from_slice(&((4u32 << 24) | (1 << 29)).to_le_bytes());
        assert_eq!(
            parse(&buf).unwrap().read_tag(),
            Err(ParseError::BadPadding { offset: 4 })
        );
        let mut buf = Vec::from(HEADER_MAGIC.to_le_bytes());
        buf.extend_from_slice(&(3u32 << 24).to_le_bytes());
        assert_eq!(
            parse(&buf).unwrap().read_tag(),
            Err(ParseError::UnknownType { raw: 3, offset: 4 })
        );
    }

    #[test]
    fn truncated_string_payload() {
        let mut buf = Vec::from(HEADER_MAGIC.to_le_bytes());
        buf.extend_from_slice(&((9u32 << 24) | 100).to_le_bytes());
        buf.extend_from_slice(b"short");
        assert!(matches!(
            parse(&buf).unwrap().skip(),
            Err(ParseError::Truncated { wanted: 100, .. })
        ));
    }

    #[test]
    fn dictionary_walk_skips_unknown_keys() {
        let doc = Value::Dict(vec![
            ("Unknown".into(), Value::Array(vec![Value::Int(1), Value::Bool(true)])),
            ("Active".into(), Value::Int(1920)),
            ("Other".into(), Value::String("ignored".into())),
        ]);
        let mut enc = Encoder::new();
        enc.value(&doc);
        let buf = enc.finish();
        let mut c = parse(&buf).unwrap();
        let mut it = c.iter_dict().unwrap();
        let mut active = None;
        while let Some(key) = it.next_key() {
            match key.unwrap() {
                "Active" => active = Some(it.value().read_int().unwrap()),
                _ => it.value().skip().unwrap(),
            }
        }
        assert_eq!(active, Some(1920));
        assert_eq!(c.position(), buf.len());
    }

    #[test]
    fn nesting_limit() {
        let mut v = Value::Int(0);
        for _ in 0..(MAX_NESTING + 1) {
            v = Value::Array(vec![v]);
        }
        let mut enc = Encoder::new();
        enc.value(&v);
        let buf = enc.finish();
        assert_eq!(parse(&buf).unwrap().skip(), Err(ParseError::TooDeep));
    }

    macro_rules! sibling_test {
        ($($n:literal),*) => {
            paste::paste! {
                $(
                    #[test]
                    fn [<skip_lands_on_sibling_ $n>]() {
                        check_siblings($n);
                    }
                )*
            }
        };
    }

    fn check_siblings(count: usize) {
        let mut seed = count as u64 + 1;
        let mut enc = Encoder::new();
        enc.array(count as u32);
        let mut starts = Vec::new();
        for _ in 0..count {
            starts.push(enc.position());
            enc.value(&random_value(&mut seed, 1));
        }
        let end = enc.position();
        let buf = enc.finish();
        let mut c = parse(&buf).unwrap();
        let mut it = c.iter_array().unwrap();
        let mut i = 0;
        while let Some(el) = it.next_element() {
            assert_eq!(pad_end_4b(el.position()), pad_end_4b(starts[i]));
            el.skip().unwrap();
            i += 1;
        }
        assert_eq!(i, count);
        assert_eq!(c.position(), end);
    }

    sibling_test!(0, 1, 2, 3, 5, 8, 13, 21, 34, 50);
}
