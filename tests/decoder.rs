//! Cross-checks for the data-section decoder's control byte and pointer
//! handling (P1-P6).

use mmdb_reader::decoder::{decode_value, Cursor, FieldKind};
use mmdb_reader::Value;

#[test]
fn pointer_bias_class_zero() {
    // class 0 (top 2 bits of low5 = 00): value = (low3 << 8) | next_byte.
    let data = [0b001_00010u8, 0x05]; // Pointer, low5=0b00010 -> low3=2
    let mut cursor = Cursor::new(&data, 0);
    let (kind, low5) = cursor.read_control().unwrap();
    assert_eq!(kind, FieldKind::Pointer);
    let target = cursor.read_pointer_value(low5).unwrap();
    assert_eq!(target, (2 << 8) | 0x05);
}

#[test]
fn pointer_bias_class_one_adds_2048() {
    let data = [0b001_01000u8, 0x00, 0x00]; // low5 = 0b01000 -> class 1, low3=0
    let mut cursor = Cursor::new(&data, 0);
    let (_, low5) = cursor.read_control().unwrap();
    let target = cursor.read_pointer_value(low5).unwrap();
    assert_eq!(target, 2048);
}

#[test]
fn pointer_bias_class_three_is_direct_four_bytes() {
    let data = [0b001_11000u8, 0x00, 0x01, 0x00, 0x00]; // class 3
    let mut cursor = Cursor::new(&data, 0);
    let (_, low5) = cursor.read_control().unwrap();
    let target = cursor.read_pointer_value(low5).unwrap();
    assert_eq!(target, 0x0001_0000);
}

#[test]
fn extended_type_byte_resolves_u64() {
    // top3 = 0 (extended), ext byte = 2 -> type 9 (U64), low5 = 8 (payload size).
    let mut data = vec![0b000_01000u8, 2];
    data.extend_from_slice(&42u64.to_be_bytes());
    let mut cursor = Cursor::new(&data, 0);
    let value = decode_value(&mut cursor).unwrap();
    assert_eq!(value, Value::U64(42));
}

#[test]
fn array_of_strings_decodes_in_order() {
    // Array is an extended type (ext=4 -> type 11): top3=0, low5=size(2),
    // followed by the ext byte, then the elements.
    let data = [
        0b000_00010u8, 4, // Array size2
        0b010_00010u8, b'a', b'b',
        0b010_00001u8, b'c',
    ];
    let mut cursor = Cursor::new(&data, 0);
    let value = decode_value(&mut cursor).unwrap();
    let items = value.as_array().unwrap();
    assert_eq!(items, &[Value::String("ab"), Value::String("c")]);
}
