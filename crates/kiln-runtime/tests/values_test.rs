use kiln_runtime::{
    BoxedValue, Rect2, Tag, Value, Vector2, Vector2i, Vector3, DATA_OFFSET, TAG_OFFSET,
};

// ---------------------------------------------------------------------------
// Boxed layout
// ---------------------------------------------------------------------------

#[test]
fn tag_precedes_aligned_data() {
    assert_eq!(TAG_OFFSET, 0);
    assert_eq!(DATA_OFFSET, 8);
    assert_eq!(std::mem::size_of::<BoxedValue>(), 32);
    assert_eq!(std::mem::align_of::<BoxedValue>(), 8);
}

#[test]
fn int_box_carries_tag_and_word() {
    let boxed = BoxedValue::from_value(&Value::Int(10));
    let bytes = boxed.to_bytes();
    assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into().unwrap()), Tag::Int.raw());
    assert_eq!(i64::from_ne_bytes(bytes[8..16].try_into().unwrap()), 10);
}

#[test]
fn nil_box_is_all_zero() {
    assert_eq!(BoxedValue::NIL.to_bytes(), [0u8; 32]);
    assert_eq!(BoxedValue::default().to_value().unwrap(), Value::Nil);
}

#[test]
fn unknown_tag_is_rejected() {
    let mut bytes = BoxedValue::NIL;
    // Round-trip through a raw write so the tag is out of range.
    unsafe {
        (&mut bytes as *mut BoxedValue).cast::<u32>().write(99);
    }
    assert!(bytes.tag().is_err());
    assert!(bytes.to_value().is_err());
}

// ---------------------------------------------------------------------------
// Value conversions
// ---------------------------------------------------------------------------

#[test]
fn embedded_composites_survive_boxing() {
    let values = [
        Value::Vector2(Vector2::new(1.5, -2.0)),
        Value::Vector2i(Vector2i::new(-3, 7)),
        Value::Vector3(Vector3::new(0.25, 0.5, 0.75)),
        Value::Rect2(Rect2::new(Vector2::new(1.0, 2.0), Vector2::new(3.0, 4.0))),
    ];
    for value in values {
        let back = BoxedValue::from_value(&value).to_value().unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn strings_are_boxed_by_interned_handle() {
    let a = BoxedValue::from_value(&Value::string("hello"));
    let b = BoxedValue::from_value(&Value::string("hello"));
    assert_eq!(a.to_bytes(), b.to_bytes());
    assert_eq!(a.to_value().unwrap(), Value::string("hello"));
}

#[test]
fn display_matches_interpreter_formatting() {
    assert_eq!(Value::Int(10).to_string(), "10");
    assert_eq!(Value::Float(2.5).to_string(), "2.5");
    assert_eq!(Value::Nil.to_string(), "null");
    assert_eq!(Value::Vector2(Vector2::new(1.0, 2.5)).to_string(), "(1, 2.5)");
}
