//! Schema-driven materialization: project a decoded data-section map into
//! either the caller's declared record shape or the dynamic fallback.

use crate::decoder::{decode_value, decode_with_kind, skip_value, Cursor, FieldKind};
use crate::error::{Error, Result};
use crate::value::{OrderedMap, Value};

/// A filter over the top-level fields of a structured record, represented
/// as a 64-bit bitmask over the record's declared (non-underscore) field
/// indices. Keeping this small and copyable keeps the hot decode path
/// branch-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection(u64);

impl Projection {
    pub const ALL: Projection = Projection(u64::MAX);

    pub fn none() -> Self {
        Projection(0)
    }

    pub fn contains(&self, index: u32) -> bool {
        index < 64 && (self.0 >> index) & 1 == 1
    }

    pub fn insert(&mut self, index: u32) {
        if index < 64 {
            self.0 |= 1 << index;
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Projection::ALL
    }
}

/// Per-call configuration recognized by `lookup` and `within`.
///
/// `only` names the top-level fields to decode; `None` decodes every
/// field. Field names not recognized by the target schema are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options<'o> {
    pub only: Option<&'o [&'o str]>,
}

impl<'o> Options<'o> {
    pub fn all() -> Self {
        Options { only: None }
    }

    pub fn only(fields: &'o [&'o str]) -> Self {
        Options { only: Some(fields) }
    }
}

/// Implemented by a caller's nominal record type to drive structured
/// materialization. `field_index` maps a top-level, non-underscore field
/// name to a stable bit index (0..64) used for projection; `decode_field`
/// decodes one wire value into the field at that index, enforcing the
/// declared Rust type against the wire type.
///
/// Field names beginning with `_` are reserved for bookkeeping and are
/// never passed to `field_index` — they are always skipped.
pub trait Schema<'a>: Default {
    fn field_index(name: &str) -> Option<u32>;
    fn decode_field(&mut self, index: u32, cursor: &mut Cursor<'a>) -> Result<()>;
}

/// Implemented by every Rust type a `Schema` can declare as a field: a
/// scalar, `Vec<T>` (wire `Array`), `OrderedMap<'a, T>` (wire `Map`), or a
/// nested type that itself implements `Schema`.
pub trait FieldValue<'a>: Sized {
    fn decode(cursor: &mut Cursor<'a>) -> Result<Self>;
}

fn expect_kind<'a>(cursor: &mut Cursor<'a>, want: FieldKind) -> Result<(FieldKind, u8)> {
    let (kind, low5) = cursor.read_control()?;
    if kind != want {
        return Err(mismatch_error(want, kind));
    }
    Ok((kind, low5))
}

fn mismatch_error(want: FieldKind, found: FieldKind) -> Error {
    let found_name = kind_name(found);
    match want {
        FieldKind::String => Error::ExpectedString { found: found_name },
        FieldKind::Double => Error::ExpectedDouble { found: found_name },
        FieldKind::U16 => Error::ExpectedU16 { found: found_name },
        FieldKind::U32 => Error::ExpectedU32 { found: found_name },
        FieldKind::I32 => Error::ExpectedI32 { found: found_name },
        FieldKind::U64 => Error::ExpectedU64 { found: found_name },
        FieldKind::U128 => Error::ExpectedU128 { found: found_name },
        FieldKind::Bool => Error::ExpectedBool { found: found_name },
        FieldKind::Float => Error::ExpectedFloat { found: found_name },
        FieldKind::Map => Error::ExpectedMap { found: found_name },
        FieldKind::Array => Error::ExpectedArray { found: found_name },
        _ => Error::ExpectedStructType { found: found_name },
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Pointer => "Pointer",
        FieldKind::String => "String",
        FieldKind::Double => "Double",
        FieldKind::Bytes => "Bytes",
        FieldKind::U16 => "U16",
        FieldKind::U32 => "U32",
        FieldKind::Map => "Map",
        FieldKind::I32 => "I32",
        FieldKind::U64 => "U64",
        FieldKind::U128 => "U128",
        FieldKind::Array => "Array",
        FieldKind::Container => "Container",
        FieldKind::Marker => "Marker",
        FieldKind::Bool => "Bool",
        FieldKind::Float => "Float",
    }
}

/// A value behind a pointer decodes transparently: resolve it first, then
/// apply the same kind check to whatever it points to. Returns the saved
/// cursor position the caller must restore to once the pointed-to value has
/// been fully decoded (the jump/decode/restore dance from the pointer spec).
fn resolve_pointer_if_needed<'a>(
    cursor: &mut Cursor<'a>,
    kind: FieldKind,
    low5: u8,
) -> Result<(FieldKind, u8, Option<usize>)> {
    if kind != FieldKind::Pointer {
        return Ok((kind, low5, None));
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
    let (inner_kind, inner_low5) = cursor.read_control()?;
    if inner_kind == FieldKind::Pointer {
        return Err(Error::PointerToPointer);
    }
    Ok((inner_kind, inner_low5, Some(saved)))
}

macro_rules! impl_scalar_field_value {
    ($ty:ty, $kind:ident, $read:expr) => {
        impl<'a> FieldValue<'a> for $ty {
            fn decode(cursor: &mut Cursor<'a>) -> Result<Self> {
                let (kind, low5) = cursor.read_control()?;
                let (kind, low5, saved) = resolve_pointer_if_needed(cursor, kind, low5)?;
                if kind != FieldKind::$kind {
                    return Err(mismatch_error(FieldKind::$kind, kind));
                }
                let value = $read(cursor, kind, low5)?;
                if let Some(saved) = saved {
                    cursor.seek(saved);
                }
                Ok(value)
            }
        }
    };
}

impl_scalar_field_value!(f64, Double, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::Double(d) => Ok(d),
        other => Err(Error::ExpectedDouble { found: other.type_name() }),
    }
});

impl_scalar_field_value!(f32, Float, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::Float(v) => Ok(v),
        other => Err(Error::ExpectedFloat { found: other.type_name() }),
    }
});

impl_scalar_field_value!(u16, U16, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::U16(v) => Ok(v),
        other => Err(Error::ExpectedU16 { found: other.type_name() }),
    }
});

impl_scalar_field_value!(u32, U32, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::U32(v) => Ok(v),
        other => Err(Error::ExpectedU32 { found: other.type_name() }),
    }
});

impl_scalar_field_value!(i32, I32, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::I32(v) => Ok(v),
        other => Err(Error::ExpectedI32 { found: other.type_name() }),
    }
});

impl_scalar_field_value!(u64, U64, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::U64(v) => Ok(v),
        other => Err(Error::ExpectedU64 { found: other.type_name() }),
    }
});

impl_scalar_field_value!(u128, U128, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::U128(v) => Ok(v),
        other => Err(Error::ExpectedU128 { found: other.type_name() }),
    }
});

impl_scalar_field_value!(bool, Bool, |cursor: &mut Cursor<'_>, kind, low5| {
    let value = decode_with_kind(cursor, kind, low5, false)?;
    match value {
        Value::Bool(v) => Ok(v),
        other => Err(Error::ExpectedBool { found: other.type_name() }),
    }
});

impl<'a> FieldValue<'a> for &'a str {
    fn decode(cursor: &mut Cursor<'a>) -> Result<Self> {
        let (kind, low5) = cursor.read_control()?;
        let (kind, low5, saved) = resolve_pointer_if_needed(cursor, kind, low5)?;
        if kind != FieldKind::String {
            return Err(mismatch_error(FieldKind::String, kind));
        }
        let result = match decode_with_kind(cursor, kind, low5, false)? {
            Value::String(s) => Ok(s),
            other => Err(Error::ExpectedString { found: other.type_name() }),
        };
        if let Some(saved) = saved {
            cursor.seek(saved);
        }
        result
    }
}

impl<'a, T: FieldValue<'a>> FieldValue<'a> for Vec<T> {
    fn decode(cursor: &mut Cursor<'a>) -> Result<Self> {
        let (kind, low5) = cursor.read_control()?;
        let (kind, low5, saved) = resolve_pointer_if_needed(cursor, kind, low5)?;
        let (_, low5) = expect_array(kind, low5)?;
        let size = cursor.read_payload_size(FieldKind::Array, low5)?;
        let mut items = Vec::with_capacity(size);
        for _ in 0..size {
            items.push(T::decode(cursor)?);
        }
        if let Some(saved) = saved {
            cursor.seek(saved);
        }
        Ok(items)
    }
}

fn expect_array(kind: FieldKind, low5: u8) -> Result<(FieldKind, u8)> {
    if kind != FieldKind::Array {
        return Err(mismatch_error(FieldKind::Array, kind));
    }
    Ok((kind, low5))
}

impl<'a, T: FieldValue<'a>> FieldValue<'a> for OrderedMap<'a, T> {
    fn decode(cursor: &mut Cursor<'a>) -> Result<Self> {
        let (kind, low5) = cursor.read_control()?;
        let (kind, low5, saved) = resolve_pointer_if_needed(cursor, kind, low5)?;
        if kind != FieldKind::Map {
            return Err(mismatch_error(FieldKind::Map, kind));
        }
        let size = cursor.read_payload_size(FieldKind::Map, low5)?;
        let mut map = OrderedMap::with_capacity(size);
        for _ in 0..size {
            let key = <&'a str as FieldValue<'a>>::decode(cursor)?;
            let value = T::decode(cursor)?;
            map.push(key, value);
        }
        if let Some(saved) = saved {
            cursor.seek(saved);
        }
        Ok(map)
    }
}

/// Materialize a structured record of type `T` starting at the cursor's
/// current position, which must be a `Map` control byte (otherwise
/// `ExpectedStructType`).
pub fn materialize_struct<'a, T: Schema<'a>>(
    cursor: &mut Cursor<'a>,
    options: &Options,
) -> Result<T> {
    let (kind, low5) = expect_kind(cursor, FieldKind::Map).map_err(|_| Error::ExpectedStructType {
        found: "non-map",
    })?;
    let size = cursor.read_payload_size(kind, low5)?;
    let mut out = T::default();
    let projection = options.only.map(|names| {
        let mut mask = Projection::none();
        for name in names {
            if let Some(idx) = T::field_index(name) {
                mask.insert(idx);
            }
        }
        mask
    });
    for _ in 0..size {
        let key_value = decode_value(cursor)?;
        let key = key_value.as_str().ok_or(Error::ExpectedString {
            found: key_value.type_name(),
        })?;
        if key.starts_with('_') {
            skip_value(cursor)?;
            continue;
        }
        match T::field_index(key) {
            Some(idx) => {
                if let Some(proj) = &projection {
                    if !proj.contains(idx) {
                        skip_value(cursor)?;
                        continue;
                    }
                }
                T::decode_field(&mut out, idx, cursor)?;
            }
            None => {
                skip_value(cursor)?;
            }
        }
    }
    Ok(out)
}

/// Materialize the dynamic fallback shape starting at the cursor's current
/// position. When `options.only` is set and the top-level value is a Map,
/// only matching entries are retained; other entries are skipped without
/// allocating. Nested maps and arrays are always fully materialized.
pub fn materialize_dynamic<'a>(cursor: &mut Cursor<'a>, options: &Options) -> Result<Value<'a>> {
    let (kind, low5) = cursor.read_control()?;
    if kind != FieldKind::Map {
        return decode_with_kind(cursor, kind, low5, false);
    }
    let size = cursor.read_payload_size(kind, low5)?;
    let mut map = OrderedMap::with_capacity(size);
    for _ in 0..size {
        let key_value = decode_value(cursor)?;
        let key = key_value.as_str().ok_or(Error::ExpectedString {
            found: key_value.type_name(),
        })?;
        if let Some(only) = options.only {
            if !only.contains(&key) {
                skip_value(cursor)?;
                continue;
            }
        }
        let value = decode_value(cursor)?;
        map.push(key, value);
    }
    Ok(Value::Map(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct TestRecord<'a> {
        name: &'a str,
        count: u32,
        ratio: f64,
    }

    impl<'a> Schema<'a> for TestRecord<'a> {
        fn field_index(name: &str) -> Option<u32> {
            match name {
                "name" => Some(0),
                "count" => Some(1),
                "ratio" => Some(2),
                _ => None,
            }
        }

        fn decode_field(&mut self, index: u32, cursor: &mut Cursor<'a>) -> Result<()> {
            match index {
                0 => self.name = <&'a str>::decode(cursor)?,
                1 => self.count = u32::decode(cursor)?,
                2 => self.ratio = f64::decode(cursor)?,
                _ => unreachable!(),
            }
            Ok(())
        }
    }

    fn build_map(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = vec![0b111_00000u8 | entries.len() as u8];
        for (key, value) in entries {
            out.push(0b010_00000u8 | key.len() as u8);
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    #[test]
    fn materializes_recognized_fields() {
        let count_bytes = [0b110_00001u8, 5]; // U32 size1 value 5
        let data = build_map(&[("name", &[0b010_00011, b'f', b'o', b'o']), ("count", &count_bytes)]);
        let mut cursor = Cursor::new(&data, 0);
        let record: TestRecord = materialize_struct(&mut cursor, &Options::all()).unwrap();
        assert_eq!(record.name, "foo");
        assert_eq!(record.count, 5);
        assert_eq!(record.ratio, 0.0);
    }

    #[test]
    fn unknown_field_is_skipped() {
        let data = build_map(&[("mystery", &[0b101_00000u8])]);
        let mut cursor = Cursor::new(&data, 0);
        let record: TestRecord = materialize_struct(&mut cursor, &Options::all()).unwrap();
        assert_eq!(record, TestRecord::default());
    }

    #[test]
    fn underscore_fields_are_reserved_and_skipped() {
        let data = build_map(&[("_internal", &[0b101_00000u8])]);
        let mut cursor = Cursor::new(&data, 0);
        let record: TestRecord = materialize_struct(&mut cursor, &Options::all()).unwrap();
        assert_eq!(record, TestRecord::default());
    }

    #[test]
    fn non_map_top_level_is_expected_struct_type_error() {
        let data = [0b010_00000u8]; // empty string, not a map
        let mut cursor = Cursor::new(&data, 0);
        let err = materialize_struct::<TestRecord>(&mut cursor, &Options::all()).unwrap_err();
        assert!(matches!(err, Error::ExpectedStructType { .. }));
    }

    #[test]
    fn projection_skips_unselected_fields() {
        let count_bytes = [0b110_00001u8, 9];
        let data = build_map(&[("name", &[0b010_00011, b'f', b'o', b'o']), ("count", &count_bytes)]);
        let mut cursor = Cursor::new(&data, 0);
        let only = ["count"];
        let record: TestRecord =
            materialize_struct(&mut cursor, &Options::only(&only)).unwrap();
        assert_eq!(record.name, "");
        assert_eq!(record.count, 9);
    }

    #[test]
    fn projection_with_full_set_matches_no_projection() {
        let count_bytes = [0b110_00001u8, 5];
        let data = build_map(&[("name", &[0b010_00011, b'f', b'o', b'o']), ("count", &count_bytes)]);

        let mut c1 = Cursor::new(&data, 0);
        let full: TestRecord = materialize_struct(&mut c1, &Options::all()).unwrap();

        let fields = ["name", "count", "ratio"];
        let mut c2 = Cursor::new(&data, 0);
        let projected: TestRecord =
            materialize_struct(&mut c2, &Options::only(&fields)).unwrap();

        assert_eq!(full, projected);
    }

    #[test]
    fn dynamic_projection_filters_top_level_map() {
        let data = build_map(&[
            ("a", &[0b101_00001u8, 1]),
            ("b", &[0b101_00001u8, 2]),
        ]);
        let mut cursor = Cursor::new(&data, 0);
        let only = ["b"];
        let value = materialize_dynamic(&mut cursor, &Options::only(&only)).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("b"), Some(&Value::U16(2)));
    }
}
