//! `extern "C"` runtime API entry points callable from native code.
//!
//! Every host function uses the compiled-function entry convention: instance
//! pointer, members array, constants array, argument pointer array, argument
//! count and an optional return slot. Failures never unwind across the FFI
//! boundary; they are recorded on the instance and the return slot is set to
//! nil.

use std::sync::OnceLock;

use crate::error::RuntimeError;
use crate::instance::HostInstance;
use crate::ops::{self, BinaryOp, UnaryOp};
use crate::value::{BoxedValue, Tag, Value};

/// Entry convention shared by host functions and compiled functions.
pub type HostFn = unsafe extern "C" fn(
    instance: *mut HostInstance,
    members: *const *mut BoxedValue,
    constants: *const *const BoxedValue,
    args: *const *const BoxedValue,
    argc: u64,
    ret: *mut BoxedValue,
);

/// How native code may reach a host function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// A free function with an explicit receiver; its address is stable and
    /// can be called directly.
    Direct,
    /// Resolved through the host's dispatch at invocation time only.
    Dynamic,
}

#[derive(Debug, Clone, Copy)]
pub struct HostFunction {
    pub name: &'static str,
    pub symbol: &'static str,
    pub entry: HostFn,
    pub binding: Binding,
}

#[derive(Debug)]
pub struct HostFunctions {
    functions: Vec<HostFunction>,
}

impl HostFunctions {
    pub fn standard() -> &'static HostFunctions {
        static STANDARD: OnceLock<HostFunctions> = OnceLock::new();
        STANDARD.get_or_init(|| HostFunctions {
            functions: vec![
                HostFunction {
                    name: "print",
                    symbol: "kiln_host_print",
                    entry: host_print,
                    binding: Binding::Direct,
                },
                HostFunction {
                    name: "max",
                    symbol: "kiln_host_max",
                    entry: host_max,
                    binding: Binding::Direct,
                },
                HostFunction {
                    name: "length",
                    symbol: "kiln_host_length",
                    entry: host_length,
                    binding: Binding::Dynamic,
                },
            ],
        })
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.iter().find(|function| function.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostFunction> {
        self.functions.iter()
    }
}

/// Symbol table for a JIT module: runtime helpers plus directly bindable
/// host functions.
pub fn runtime_symbols() -> Vec<(&'static str, *const u8)> {
    let mut symbols: Vec<(&'static str, *const u8)> = vec![
        ("kiln_rt_evaluate_binary", kiln_rt_evaluate_binary as *const u8),
        ("kiln_rt_evaluate_unary", kiln_rt_evaluate_unary as *const u8),
        ("kiln_rt_convert", kiln_rt_convert as *const u8),
        ("kiln_rt_call_dynamic", kiln_rt_call_dynamic as *const u8),
    ];
    for function in HostFunctions::standard().iter() {
        if function.binding == Binding::Direct {
            symbols.push((function.symbol, function.entry as *const u8));
        }
    }
    symbols
}

// ---------------------------------------------------------------------------
// Pointer plumbing
// ---------------------------------------------------------------------------

/// # Safety
/// `args` must point to `argc` valid boxed-value pointers, or be null with
/// `argc == 0`.
unsafe fn read_args(args: *const *const BoxedValue, argc: u64) -> Vec<BoxedValue> {
    if args.is_null() || argc == 0 {
        return Vec::new();
    }
    let pointers = unsafe { std::slice::from_raw_parts(args, argc as usize) };
    pointers
        .iter()
        .map(|&pointer| unsafe { pointer.read() })
        .collect()
}

/// # Safety
/// `ret` must be null or valid for a boxed-value write.
unsafe fn write_ret(ret: *mut BoxedValue, value: &Value) {
    if !ret.is_null() {
        unsafe { ret.write(BoxedValue::from_value(value)) };
    }
}

/// # Safety
/// `instance` and `ret` must satisfy the entry convention.
unsafe fn finish(instance: *mut HostInstance, ret: *mut BoxedValue, result: Result<Value, RuntimeError>) {
    let value = match result {
        Ok(value) => value,
        Err(error) => {
            if let Some(instance) = unsafe { instance.as_mut() } {
                instance.record_error(error);
            }
            Value::Nil
        }
    };
    unsafe { write_ret(ret, &value) };
}

fn decode_all(boxes: &[BoxedValue]) -> Result<Vec<Value>, RuntimeError> {
    boxes.iter().map(BoxedValue::to_value).collect()
}

// ---------------------------------------------------------------------------
// Generic entry points
// ---------------------------------------------------------------------------

/// Generic dynamic operator: `ret = lhs <op> rhs`.
///
/// # Safety
/// All pointers must be valid boxed values (`ret` may be null).
pub unsafe extern "C" fn kiln_rt_evaluate_binary(
    instance: *mut HostInstance,
    op: u32,
    lhs: *const BoxedValue,
    rhs: *const BoxedValue,
    ret: *mut BoxedValue,
) {
    let result = (|| {
        let op = BinaryOp::from_code(op).ok_or(RuntimeError::UnknownOperator(op))?;
        let left = unsafe { lhs.read() }.to_value()?;
        let right = unsafe { rhs.read() }.to_value()?;
        ops::evaluate_binary(op, &left, &right)
    })();
    unsafe { finish(instance, ret, result) };
}

/// # Safety
/// All pointers must be valid boxed values (`ret` may be null).
pub unsafe extern "C" fn kiln_rt_evaluate_unary(
    instance: *mut HostInstance,
    op: u32,
    src: *const BoxedValue,
    ret: *mut BoxedValue,
) {
    let result = (|| {
        let op = UnaryOp::from_code(op).ok_or(RuntimeError::UnknownOperator(op))?;
        let operand = unsafe { src.read() }.to_value()?;
        ops::evaluate_unary(op, &operand)
    })();
    unsafe { finish(instance, ret, result) };
}

/// Convert `src` to `tag`, as an assignment to a typed variable does.
///
/// # Safety
/// All pointers must be valid boxed values (`ret` may be null).
pub unsafe extern "C" fn kiln_rt_convert(
    instance: *mut HostInstance,
    src: *const BoxedValue,
    tag: u32,
    ret: *mut BoxedValue,
) {
    let result = (|| {
        let to = Tag::from_raw(tag).ok_or(RuntimeError::UnknownTag(tag))?;
        let value = unsafe { src.read() }.to_value()?;
        ops::convert(&value, to)
    })();
    unsafe { finish(instance, ret, result) };
}

/// Generic call wrapper: looks `name` up in the instance's function table at
/// invocation time and forwards the entry convention unchanged.
///
/// # Safety
/// Entry-convention pointers must be valid; `name_ptr` must point to
/// `name_len` bytes of UTF-8.
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn kiln_rt_call_dynamic(
    instance: *mut HostInstance,
    members: *const *mut BoxedValue,
    constants: *const *const BoxedValue,
    args: *const *const BoxedValue,
    argc: u64,
    ret: *mut BoxedValue,
    name_ptr: *const u8,
    name_len: u64,
) {
    let name = unsafe { std::slice::from_raw_parts(name_ptr, name_len as usize) };
    let name = String::from_utf8_lossy(name);
    let Some(target) = (unsafe { instance.as_ref() }).and_then(|instance| instance.functions().get(&name)) else {
        unsafe { finish(instance, ret, Err(RuntimeError::UnknownFunction(name.into_owned()))) };
        return;
    };
    unsafe { (target.entry)(instance, members, constants, args, argc, ret) };
}

// ---------------------------------------------------------------------------
// Host functions
// ---------------------------------------------------------------------------

unsafe extern "C" fn host_print(
    instance: *mut HostInstance,
    _members: *const *mut BoxedValue,
    _constants: *const *const BoxedValue,
    args: *const *const BoxedValue,
    argc: u64,
    ret: *mut BoxedValue,
) {
    let boxes = unsafe { read_args(args, argc) };
    let result = decode_all(&boxes).map(|values| {
        values.iter().map(Value::to_string).collect::<Vec<_>>().join("")
    });
    if let Some(host) = unsafe { instance.as_mut() } {
        for boxed in &boxes {
            host.record_print(*boxed);
        }
        if let Ok(line) = &result {
            host.record_line(line.clone());
        }
    }
    unsafe { finish(instance, ret, result.map(|_| Value::Nil)) };
}

unsafe extern "C" fn host_max(
    instance: *mut HostInstance,
    _members: *const *mut BoxedValue,
    _constants: *const *const BoxedValue,
    args: *const *const BoxedValue,
    argc: u64,
    ret: *mut BoxedValue,
) {
    let boxes = unsafe { read_args(args, argc) };
    let result = decode_all(&boxes).and_then(|values| match values.as_slice() {
        [Value::Int(a), Value::Int(b)] => Ok(Value::Int(*a.max(b))),
        [a, b] => {
            let greater = ops::evaluate_binary(BinaryOp::Ge, a, b).map_err(|_| {
                RuntimeError::InvalidArgument {
                    name: "max".to_string(),
                    got: b.tag(),
                }
            })?;
            let pick = if greater == Value::Bool(true) { a } else { b };
            ops::convert(pick, Tag::Float)
        }
        _ => Err(RuntimeError::Arity {
            name: "max".to_string(),
            expected: 2,
            got: values.len(),
        }),
    });
    unsafe { finish(instance, ret, result) };
}

unsafe extern "C" fn host_length(
    instance: *mut HostInstance,
    _members: *const *mut BoxedValue,
    _constants: *const *const BoxedValue,
    args: *const *const BoxedValue,
    argc: u64,
    ret: *mut BoxedValue,
) {
    let boxes = unsafe { read_args(args, argc) };
    let result = decode_all(&boxes).and_then(|values| match values.as_slice() {
        [Value::Vector2(v)] => Ok(Value::Float(f64::from(v.length()))),
        [Value::Vector3(v)] => Ok(Value::Float(f64::from(v.length()))),
        [other] => Err(RuntimeError::InvalidArgument {
            name: "length".to_string(),
            got: other.tag(),
        }),
        _ => Err(RuntimeError::Arity {
            name: "length".to_string(),
            expected: 1,
            got: values.len(),
        }),
    });
    unsafe { finish(instance, ret, result) };
}
