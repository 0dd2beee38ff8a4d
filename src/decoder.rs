//! Self-describing data-section decoder: control byte, pointer resolution,
//! primitive decoding, and the skip path used when a schema field is
//! filtered out or unrecognized.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::value::{OrderedMap, Value};

/// The type tag carried by a control byte, after extended-byte resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Pointer,
    String,
    Double,
    Bytes,
    U16,
    U32,
    Map,
    I32,
    U64,
    U128,
    Array,
    Container,
    Marker,
    Bool,
    Float,
}

impl FieldKind {
    fn from_type_value(v: u16) -> Result<Self> {
        Ok(match v {
            1 => FieldKind::Pointer,
            2 => FieldKind::String,
            3 => FieldKind::Double,
            4 => FieldKind::Bytes,
            5 => FieldKind::U16,
            6 => FieldKind::U32,
            7 => FieldKind::Map,
            8 => FieldKind::I32,
            9 => FieldKind::U64,
            10 => FieldKind::U128,
            11 => FieldKind::Array,
            12 => FieldKind::Container,
            13 => FieldKind::Marker,
            14 => FieldKind::Bool,
            15 => FieldKind::Float,
            other => {
                return Err(Error::UnsupportedFieldType {
                    ext: other.saturating_sub(7) as u8,
                });
            }
        })
    }
}

/// A cursor over the data section, used both for materialization and for
/// the filtered-field skip path. Byte slices handed back (`read_bytes`)
/// alias the underlying data, matching the mapped file's lifetime `'a`.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(Error::CorruptedTree {
                offset: self.pos,
                file_size: self.data.len(),
            })?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::CorruptedTree {
            offset: self.pos,
            file_size: self.data.len(),
        })?;
        let slice = self.data.get(self.pos..end).ok_or(Error::CorruptedTree {
            offset: end,
            file_size: self.data.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    /// Variable-width big-endian accumulation (1-8 bytes), via `byteorder`'s
    /// `ReadBytesExt` over this cursor's own `Read` impl.
    fn read_uint_be(&mut self, n: usize) -> Result<u64> {
        if self.pos + n > self.data.len() {
            return Err(Error::CorruptedTree {
                offset: self.pos + n,
                file_size: self.data.len(),
            });
        }
        Ok(self.read_uint::<BigEndian>(n)?)
    }

    /// Read the control byte, resolving the extended-type byte when needed.
    /// Returns the resolved kind plus the control byte's low 5 bits.
    pub fn read_control(&mut self) -> Result<(FieldKind, u8)> {
        let byte = self.read_u8()?;
        let top = byte >> 5;
        let low5 = byte & 0x1f;
        let type_value = if top == 0 {
            let ext = self.read_u8()?;
            7u16 + ext as u16
        } else {
            top as u16
        };
        let kind = FieldKind::from_type_value(type_value)?;
        Ok((kind, low5))
    }

    /// Resolve the payload size for a non-pointer field. `Pointer` never
    /// reaches here through the normal path (B3): its low 5 bits are raw
    /// pointer metadata and must not be extended.
    pub fn read_payload_size(&mut self, kind: FieldKind, low5: u8) -> Result<usize> {
        if kind == FieldKind::Pointer {
            return Ok(low5 as usize);
        }
        match low5 {
            0..=28 => Ok(low5 as usize),
            29 => {
                let b0 = self.read_u8()?;
                Ok(29 + b0 as usize)
            }
            30 => {
                let v = self.read_uint_be(2)?;
                Ok(285 + v as usize)
            }
            31 => {
                let v = self.read_uint_be(3)?;
                Ok(65821 + v as usize)
            }
            _ => unreachable!("low5 is masked to 5 bits"),
        }
    }

    /// Resolve a pointer's low 5 bits into a size class and unpack the
    /// trailing bytes into a biased data-section offset.
    pub fn read_pointer_value(&mut self, low5: u8) -> Result<usize> {
        let class = (low5 >> 3) & 0b11;
        let low3 = (low5 & 0b111) as u64;
        let value = match class {
            0 => {
                let b0 = self.read_u8()? as u64;
                (low3 << 8) | b0
            }
            1 => {
                let v = self.read_uint_be(2)?;
                ((low3 << 16) | v) + 2048
            }
            2 => {
                let v = self.read_uint_be(3)?;
                ((low3 << 24) | v) + 526_336
            }
            3 => self.read_uint_be(4)?,
            _ => unreachable!("class is masked to 2 bits"),
        };
        Ok(value as usize)
    }
}

/// Lets `byteorder::ReadBytesExt` read multi-byte big-endian integers
/// directly off the cursor's remaining bytes, advancing `pos` as it goes.
/// Never reads past what's already buffered: `Read::read` only copies
/// `min(buf.len(), remaining)` bytes, so a short read surfaces as a
/// `std::io::ErrorKind::UnexpectedEof` from `read_uint`/`read_exact`, not a
/// panic.
impl<'a> Read for Cursor<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut remaining = &self.data[self.pos.min(self.data.len())..];
        let n = remaining.read(buf)?;
        self.pos += n;
        Ok(n)
    }
}

/// Decode one data-section value at the cursor's current position.
pub fn decode_value<'a>(cursor: &mut Cursor<'a>) -> Result<Value<'a>> {
    decode_value_inner(cursor, false)
}

fn decode_value_inner<'a>(cursor: &mut Cursor<'a>, via_pointer: bool) -> Result<Value<'a>> {
    let (kind, low5) = cursor.read_control()?;
    decode_with_kind(cursor, kind, low5, via_pointer)
}

/// Decode a value whose control byte has already been read. Exposed for
/// callers (the schema materializer) that need to branch on `kind` before
/// deciding whether to decode or skip, without reading the control byte
/// twice.
pub fn decode_with_kind<'a>(
    cursor: &mut Cursor<'a>,
    kind: FieldKind,
    low5: u8,
    via_pointer: bool,
) -> Result<Value<'a>> {
    match kind {
        FieldKind::Pointer => {
            if via_pointer {
                return Err(Error::PointerToPointer);
            }
            let target = cursor.read_pointer_value(low5)?;
            if target >= cursor.len() {
                return Err(Error::PointerOutOfBounds {
                    target,
                    data_section_size: cursor.len(),
                });
            }
            let saved = cursor.pos();
            cursor.seek(target);
            let value = decode_value_inner(cursor, true)?;
            cursor.seek(saved);
            Ok(value)
        }
        FieldKind::String => {
            let size = cursor.read_payload_size(kind, low5)?;
            let bytes = cursor.read_bytes(size)?;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| Error::ExpectedString { found: "invalid utf8" })?;
            Ok(Value::String(s))
        }
        FieldKind::Bytes => {
            let size = cursor.read_payload_size(kind, low5)?;
            Ok(Value::Bytes(cursor.read_bytes(size)?))
        }
        FieldKind::Double => {
            let size = cursor.read_payload_size(kind, low5)?;
            if size != 8 {
                return Err(Error::InvalidDoubleSize(size));
            }
            let bytes = cursor.read_bytes(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            Ok(Value::Double(f64::from_be_bytes(arr)))
        }
        FieldKind::Float => {
            let size = cursor.read_payload_size(kind, low5)?;
            if size != 4 {
                return Err(Error::InvalidFloatSize(size));
            }
            let bytes = cursor.read_bytes(4)?;
            let mut arr = [0u8; 4];
            arr.copy_from_slice(bytes);
            Ok(Value::Float(f32::from_be_bytes(arr)))
        }
        FieldKind::U16 => {
            let size = cursor.read_payload_size(kind, low5)?;
            let v = read_uint_checked(cursor, size, 2)?;
            Ok(Value::U16(v as u16))
        }
        FieldKind::U32 => {
            let size = cursor.read_payload_size(kind, low5)?;
            let v = read_uint_checked(cursor, size, 4)?;
            Ok(Value::U32(v as u32))
        }
        FieldKind::I32 => {
            let size = cursor.read_payload_size(kind, low5)?;
            let v = read_uint_checked(cursor, size, 4)?;
            Ok(Value::I32(v as i32))
        }
        FieldKind::U64 => {
            let size = cursor.read_payload_size(kind, low5)?;
            let v = read_uint_checked(cursor, size, 8)?;
            Ok(Value::U64(v))
        }
        FieldKind::U128 => {
            let size = cursor.read_payload_size(kind, low5)?;
            if size > 16 {
                return Err(Error::InvalidIntegerSize { size, max: 16 });
            }
            let bytes = cursor.read_bytes(size)?;
            let mut v: u128 = 0;
            for &b in bytes {
                v = (v << 8) | b as u128;
            }
            Ok(Value::U128(v))
        }
        FieldKind::Bool => {
            let size = cursor.read_payload_size(kind, low5)?;
            match size {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(Error::InvalidBoolSize(other)),
            }
        }
        FieldKind::Map => {
            let size = cursor.read_payload_size(kind, low5)?;
            let mut map = OrderedMap::with_capacity(size);
            for _ in 0..size {
                let key_value = decode_value_inner(cursor, false)?;
                let key = key_value.as_str().ok_or(Error::ExpectedString {
                    found: key_value.type_name(),
                })?;
                let value = decode_value_inner(cursor, false)?;
                map.push(key, value);
            }
            Ok(Value::Map(map))
        }
        FieldKind::Array => {
            let size = cursor.read_payload_size(kind, low5)?;
            let mut items = Vec::with_capacity(size);
            for _ in 0..size {
                items.push(decode_value_inner(cursor, false)?);
            }
            Ok(Value::Array(items))
        }
        FieldKind::Container | FieldKind::Marker => Err(Error::UnsupportedFieldType {
            ext: match kind {
                FieldKind::Container => 5,
                _ => 6,
            },
        }),
    }
}

fn read_uint_checked(cursor: &mut Cursor, size: usize, max: usize) -> Result<u64> {
    if size > max {
        return Err(Error::InvalidIntegerSize { size, max });
    }
    cursor.read_uint_be(size)
}

/// Advance the cursor past one value without materializing it. Used for
/// schema fields that are filtered out or unrecognized by name.
pub fn skip_value(cursor: &mut Cursor) -> Result<()> {
    let (kind, low5) = cursor.read_control()?;
    match kind {
        FieldKind::Pointer => {
            let target = cursor.read_pointer_value(low5)?;
            if target >= cursor.len() {
                return Err(Error::PointerOutOfBounds {
                    target,
                    data_section_size: cursor.len(),
                });
            }
            let saved = cursor.pos();
            cursor.seek(target);
            skip_value(cursor)?;
            cursor.seek(saved);
            Ok(())
        }
        FieldKind::Bool => {
            cursor.read_payload_size(kind, low5)?;
            Ok(())
        }
        FieldKind::Map => {
            let size = cursor.read_payload_size(kind, low5)?;
            for _ in 0..2 * size {
                skip_value(cursor)?;
            }
            Ok(())
        }
        FieldKind::Array => {
            let size = cursor.read_payload_size(kind, low5)?;
            for _ in 0..size {
                skip_value(cursor)?;
            }
            Ok(())
        }
        _ => {
            let size = cursor.read_payload_size(kind, low5)?;
            cursor.read_bytes(size)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn pointer_control_byte_size_not_extended() {
        // 001_11101: top3 = 001 (Pointer), low5 = 29.
        let data = [0b001_11101, 0x00];
        let mut cursor = Cursor::new(&data, 0);
        let (kind, low5) = cursor.read_control().unwrap();
        assert_eq!(kind, FieldKind::Pointer);
        assert_eq!(low5, 29);
        let size = cursor.read_payload_size(kind, low5).unwrap();
        assert_eq!(size, 29);
    }

    #[test]
    fn small_string_decodes_inline() {
        // 010_00101 = String, size 5; payload "hello".
        let mut data = vec![0b010_00101];
        data.extend_from_slice(b"hello");
        let mut cursor = Cursor::new(&data, 0);
        let value = decode_value(&mut cursor).unwrap();
        assert_eq!(value, Value::String("hello"));
    }

    #[test]
    fn size_extension_thresholds() {
        // size_hint 29 -> 29 + next byte.
        let data = [0b010_11101u8, 10]; // String, size = 29+10 = 39 (payload omitted)
        let mut cursor = Cursor::new(&data, 0);
        let (kind, low5) = cursor.read_control().unwrap();
        let size = cursor.read_payload_size(kind, low5).unwrap();
        assert_eq!(size, 39);
    }

    #[test]
    fn bool_decodes_totally() {
        let data_false = [0b1110_0000u8]; // ext type: top3=0 -> ext byte
        // Bool is ext=7 -> type 14. Construct: top3=0, ext=7, low5=0 (false)
        let data = [0b000_00000u8, 7];
        let mut cursor = Cursor::new(&data, 0);
        let value = decode_value(&mut cursor).unwrap();
        assert_eq!(value, Value::Bool(false));

        let data_true = [0b000_00001u8, 7];
        let mut cursor = Cursor::new(&data_true, 0);
        let value = decode_value(&mut cursor).unwrap();
        assert_eq!(value, Value::Bool(true));

        let _ = data_false;
    }

    #[test]
    fn bool_invalid_size_errors() {
        let data = [0b000_00010u8, 7]; // size 2
        let mut cursor = Cursor::new(&data, 0);
        let err = decode_value(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::InvalidBoolSize(2)));
    }

    #[test]
    fn pointer_to_pointer_is_rejected() {
        // data section: [0]=pointer control pointing to offset 2, [2]=another pointer.
        let data: [u8; 4] = [0b001_00000, 0x02, 0b001_00000, 0x00];
        let mut cursor = Cursor::new(&data, 0);
        let err = decode_value(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::PointerToPointer));
    }

    #[test]
    fn u32_rejects_oversized_payload() {
        // U32 control byte with size 5 (> 4 bytes).
        let mut data = vec![0b110_00101u8];
        data.extend_from_slice(&[0, 0, 0, 0, 1]);
        let mut cursor = Cursor::new(&data, 0);
        let err = decode_value(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::InvalidIntegerSize { size: 5, max: 4 }));
    }

    #[test]
    fn skip_value_consumes_map_without_allocating() {
        // Map of 1 entry: key "a" (String size1), value U16 size0.
        let data = [
            0b111_00001u8, // Map, size 1
            0b010_00001u8, b'a', // String "a"
            0b101_00000u8, // U16, size 0
        ];
        let mut cursor = Cursor::new(&data, 0);
        skip_value(&mut cursor).unwrap();
        assert_eq!(cursor.pos(), data.len());
    }
}
