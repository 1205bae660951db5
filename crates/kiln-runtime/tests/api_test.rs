use std::ptr;

use kiln_runtime::{
    kiln_rt_call_dynamic, kiln_rt_convert, kiln_rt_evaluate_binary, kiln_rt_evaluate_unary,
    runtime_symbols, BinaryOp, Binding, BoxedValue, HostFunctions, HostInstance, RuntimeError,
    Tag, UnaryOp, Value, Vector2,
};

fn boxed(value: Value) -> BoxedValue {
    BoxedValue::from_value(&value)
}

fn call(instance: &mut HostInstance, name: &str, args: &[BoxedValue]) -> Value {
    let pointers: Vec<*const BoxedValue> = args.iter().map(|arg| arg as *const BoxedValue).collect();
    let members = instance.member_table();
    let mut ret = BoxedValue::NIL;
    unsafe {
        kiln_rt_call_dynamic(
            instance,
            members.as_ptr(),
            ptr::null(),
            pointers.as_ptr(),
            pointers.len() as u64,
            &mut ret,
            name.as_ptr(),
            name.len() as u64,
        );
    }
    ret.to_value().unwrap()
}

// ---------------------------------------------------------------------------
// Generic entry points
// ---------------------------------------------------------------------------

#[test]
fn evaluate_binary_writes_result_box() {
    let mut instance = HostInstance::new(&[]);
    let lhs = boxed(Value::Int(2));
    let rhs = boxed(Value::Float(2.0));
    let mut ret = BoxedValue::NIL;
    unsafe { kiln_rt_evaluate_binary(&mut instance, BinaryOp::Mul.code(), &lhs, &rhs, &mut ret) };
    assert_eq!(ret.to_value().unwrap(), Value::Float(4.0));
    assert!(instance.errors().is_empty());
}

#[test]
fn evaluate_binary_records_errors_instead_of_unwinding() {
    let mut instance = HostInstance::new(&[]);
    let lhs = boxed(Value::Int(1));
    let rhs = boxed(Value::Int(0));
    let mut ret = boxed(Value::Int(77));
    unsafe { kiln_rt_evaluate_binary(&mut instance, BinaryOp::Div.code(), &lhs, &rhs, &mut ret) };
    assert_eq!(ret.to_value().unwrap(), Value::Nil);
    assert_eq!(instance.errors(), &[RuntimeError::DivisionByZero]);
}

#[test]
fn null_return_slot_is_skipped() {
    let mut instance = HostInstance::new(&[]);
    let operand = boxed(Value::Bool(true));
    unsafe {
        kiln_rt_evaluate_unary(&mut instance, UnaryOp::Not.code(), &operand, ptr::null_mut())
    };
    assert!(instance.errors().is_empty());
}

#[test]
fn convert_truncates_float_to_int() {
    let mut instance = HostInstance::new(&[]);
    let src = boxed(Value::Float(10.0));
    let mut ret = BoxedValue::NIL;
    unsafe { kiln_rt_convert(&mut instance, &src, Tag::Int.raw(), &mut ret) };
    assert_eq!(ret.to_value().unwrap(), Value::Int(10));
}

// ---------------------------------------------------------------------------
// Host functions
// ---------------------------------------------------------------------------

#[test]
fn print_records_exact_boxes_and_text() {
    let mut instance = HostInstance::new(&[]);
    let ret = call(&mut instance, "print", &[boxed(Value::Int(10))]);
    assert_eq!(ret, Value::Nil);
    assert_eq!(instance.printed().len(), 1);
    assert_eq!(instance.printed()[0].tag().unwrap(), Tag::Int);
    assert_eq!(instance.output(), &["10".to_string()]);
}

#[test]
fn max_keeps_ints_and_promotes_mixed() {
    let mut instance = HostInstance::new(&[]);
    let ints = call(&mut instance, "max", &[boxed(Value::Int(3)), boxed(Value::Int(9))]);
    assert_eq!(ints, Value::Int(9));
    let mixed = call(&mut instance, "max", &[boxed(Value::Int(3)), boxed(Value::Float(1.5))]);
    assert_eq!(mixed, Value::Float(3.0));
}

#[test]
fn length_is_only_reachable_dynamically() {
    let functions = HostFunctions::standard();
    assert_eq!(functions.get("length").unwrap().binding, Binding::Dynamic);
    assert!(!runtime_symbols().iter().any(|(name, _)| name.contains("length")));

    let mut instance = HostInstance::new(&[]);
    let len = call(&mut instance, "length", &[boxed(Value::Vector2(Vector2::new(3.0, 4.0)))]);
    assert_eq!(len, Value::Float(5.0));
}

#[test]
fn unknown_function_is_reported() {
    let mut instance = HostInstance::new(&[]);
    let ret = call(&mut instance, "nope", &[]);
    assert_eq!(ret, Value::Nil);
    assert_eq!(instance.errors(), &[RuntimeError::UnknownFunction("nope".to_string())]);
}

#[test]
fn members_are_addressable_boxes() {
    let mut instance = HostInstance::new(&[Value::Int(1), Value::Float(0.5)]);
    let table = instance.member_table();
    unsafe { table[0].write(BoxedValue::from_value(&Value::Int(42))) };
    assert_eq!(instance.member(0).unwrap(), Value::Int(42));
    assert_eq!(instance.member(1).unwrap(), Value::Float(0.5));
    assert!(instance.member(2).is_err());
}
