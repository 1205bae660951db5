//! Reference dynamic operator semantics.
//!
//! This is the boxed path: the generic operator entry point evaluates here,
//! and natively specialized code must produce identical results for every
//! operand combination it claims.

use std::fmt;

use crate::error::RuntimeError;
use crate::types::{Vector2, Vector2i, Vector3};
use crate::value::{Tag, Value};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Rem = 4,
    Eq = 5,
    Ne = 6,
    Lt = 7,
    Le = 8,
    Gt = 9,
    Ge = 10,
    BitAnd = 11,
    BitOr = 12,
    BitXor = 13,
    Shl = 14,
    Shr = 15,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnaryOp {
    Neg = 0,
    Not = 1,
    BitNot = 2,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 16] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Rem,
        BinaryOp::Eq,
        BinaryOp::Ne,
        BinaryOp::Lt,
        BinaryOp::Le,
        BinaryOp::Gt,
        BinaryOp::Ge,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
        BinaryOp::BitXor,
        BinaryOp::Shl,
        BinaryOp::Shr,
    ];

    pub fn from_code(code: u32) -> Option<BinaryOp> {
        BinaryOp::ALL.get(code as usize).copied()
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 3] = [UnaryOp::Neg, UnaryOp::Not, UnaryOp::BitNot];

    pub fn from_code(code: u32) -> Option<UnaryOp> {
        UnaryOp::ALL.get(code as usize).copied()
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
            UnaryOp::BitNot => "~",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ---------------------------------------------------------------------------
// Numeric promotion
// ---------------------------------------------------------------------------

/// A scalar operand after bool → int widening.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn as_f64(num: Num) -> f64 {
    match num {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

pub fn evaluate_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let invalid = || RuntimeError::InvalidBinary {
        op,
        left: left.tag(),
        right: right.tag(),
    };

    if let (Value::Bool(a), Value::Bool(b)) = (left, right) {
        match op {
            BinaryOp::BitAnd => return Ok(Value::Bool(a & b)),
            BinaryOp::BitOr => return Ok(Value::Bool(a | b)),
            BinaryOp::BitXor => return Ok(Value::Bool(a ^ b)),
            _ => {}
        }
    }

    if let (Some(a), Some(b)) = (as_num(left), as_num(right)) {
        return numeric_binary(op, a, b).ok_or_else(invalid)?;
    }

    match (left, right) {
        (Value::String(a), Value::String(b)) => match op {
            BinaryOp::Add => Ok(Value::String(format!("{a}{b}").into())),
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(invalid()),
        },
        (Value::Vector2(a), Value::Vector2(b)) => match op {
            BinaryOp::Add => Ok(Value::Vector2(Vector2::new(a.x + b.x, a.y + b.y))),
            BinaryOp::Sub => Ok(Value::Vector2(Vector2::new(a.x - b.x, a.y - b.y))),
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(invalid()),
        },
        (Value::Vector2i(a), Value::Vector2i(b)) => match op {
            BinaryOp::Add => Ok(Value::Vector2i(Vector2i::new(
                a.x.wrapping_add(b.x),
                a.y.wrapping_add(b.y),
            ))),
            BinaryOp::Sub => Ok(Value::Vector2i(Vector2i::new(
                a.x.wrapping_sub(b.x),
                a.y.wrapping_sub(b.y),
            ))),
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(invalid()),
        },
        (Value::Vector3(a), Value::Vector3(b)) => match op {
            BinaryOp::Add => Ok(Value::Vector3(Vector3::new(a.x + b.x, a.y + b.y, a.z + b.z))),
            BinaryOp::Sub => Ok(Value::Vector3(Vector3::new(a.x - b.x, a.y - b.y, a.z - b.z))),
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(invalid()),
        },
        (Value::Rect2(a), Value::Rect2(b)) => match op {
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(invalid()),
        },
        (vector, scalar) | (scalar, vector)
            if op == BinaryOp::Mul && as_num(scalar).is_some() && !matches!(scalar, Value::Bool(_)) =>
        {
            scale(vector, scalar).ok_or_else(invalid)
        }
        (Value::Nil, Value::Nil) => match op {
            BinaryOp::Eq => Ok(Value::Bool(true)),
            BinaryOp::Ne => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        _ => match op {
            BinaryOp::Eq => Ok(Value::Bool(false)),
            BinaryOp::Ne => Ok(Value::Bool(true)),
            _ => Err(invalid()),
        },
    }
}

fn numeric_binary(op: BinaryOp, a: Num, b: Num) -> Option<Result<Value, RuntimeError>> {
    let result = match (a, b) {
        (Num::Int(x), Num::Int(y)) => match op {
            BinaryOp::Add => Value::Int(x.wrapping_add(y)),
            BinaryOp::Sub => Value::Int(x.wrapping_sub(y)),
            BinaryOp::Mul => Value::Int(x.wrapping_mul(y)),
            BinaryOp::Div | BinaryOp::Rem if y == 0 => {
                return Some(Err(RuntimeError::DivisionByZero));
            }
            BinaryOp::Div => Value::Int(x.wrapping_div(y)),
            BinaryOp::Rem => Value::Int(x.wrapping_rem(y)),
            BinaryOp::Eq => Value::Bool(x == y),
            BinaryOp::Ne => Value::Bool(x != y),
            BinaryOp::Lt => Value::Bool(x < y),
            BinaryOp::Le => Value::Bool(x <= y),
            BinaryOp::Gt => Value::Bool(x > y),
            BinaryOp::Ge => Value::Bool(x >= y),
            BinaryOp::BitAnd => Value::Int(x & y),
            BinaryOp::BitOr => Value::Int(x | y),
            BinaryOp::BitXor => Value::Int(x ^ y),
            BinaryOp::Shl => Value::Int(x.wrapping_shl(y as u32)),
            BinaryOp::Shr => Value::Int(x.wrapping_shr(y as u32)),
        },
        (a, b) => {
            let (x, y) = (as_f64(a), as_f64(b));
            match op {
                BinaryOp::Add => Value::Float(x + y),
                BinaryOp::Sub => Value::Float(x - y),
                BinaryOp::Mul => Value::Float(x * y),
                BinaryOp::Div => Value::Float(x / y),
                BinaryOp::Rem => Value::Float(x % y),
                BinaryOp::Eq => Value::Bool(x == y),
                BinaryOp::Ne => Value::Bool(x != y),
                BinaryOp::Lt => Value::Bool(x < y),
                BinaryOp::Le => Value::Bool(x <= y),
                BinaryOp::Gt => Value::Bool(x > y),
                BinaryOp::Ge => Value::Bool(x >= y),
                _ => return None,
            }
        }
    };
    Some(Ok(result))
}

fn scale(vector: &Value, scalar: &Value) -> Option<Value> {
    let s = as_num(scalar)?;
    match vector {
        Value::Vector2(v) => {
            let k = scalar_f32(s);
            Some(Value::Vector2(Vector2::new(v.x * k, v.y * k)))
        }
        Value::Vector3(v) => {
            let k = scalar_f32(s);
            Some(Value::Vector3(Vector3::new(v.x * k, v.y * k, v.z * k)))
        }
        Value::Vector2i(v) => match s {
            Num::Int(k) => {
                let k = k as i32;
                Some(Value::Vector2i(Vector2i::new(
                    v.x.wrapping_mul(k),
                    v.y.wrapping_mul(k),
                )))
            }
            Num::Float(_) => None,
        },
        _ => None,
    }
}

fn scalar_f32(num: Num) -> f32 {
    match num {
        Num::Int(i) => i as f32,
        Num::Float(f) => f as f32,
    }
}

pub fn evaluate_unary(op: UnaryOp, operand: &Value) -> Result<Value, RuntimeError> {
    let invalid = || RuntimeError::InvalidUnary {
        op,
        operand: operand.tag(),
    };
    match (op, operand) {
        (UnaryOp::Neg, Value::Bool(b)) => Ok(Value::Int(-i64::from(*b))),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, Value::Vector2(v)) => Ok(Value::Vector2(Vector2::new(-v.x, -v.y))),
        (UnaryOp::Neg, Value::Vector2i(v)) => Ok(Value::Vector2i(Vector2i::new(
            v.x.wrapping_neg(),
            v.y.wrapping_neg(),
        ))),
        (UnaryOp::Neg, Value::Vector3(v)) => {
            Ok(Value::Vector3(Vector3::new(-v.x, -v.y, -v.z)))
        }
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Not, Value::Int(i)) => Ok(Value::Bool(*i == 0)),
        (UnaryOp::Not, Value::Float(f)) => Ok(Value::Bool(*f == 0.0)),
        (UnaryOp::Not, Value::Nil) => Ok(Value::Bool(true)),
        (UnaryOp::BitNot, Value::Bool(b)) => Ok(Value::Int(!i64::from(*b))),
        (UnaryOp::BitNot, Value::Int(i)) => Ok(Value::Int(!i)),
        _ => Err(invalid()),
    }
}

/// Convert a value to the given tag, as an assignment to a typed variable does.
pub fn convert(value: &Value, to: Tag) -> Result<Value, RuntimeError> {
    if value.tag() == to {
        return Ok(value.clone());
    }
    let invalid = || RuntimeError::InvalidConversion {
        from: value.tag(),
        to,
    };
    match (to, value) {
        (Tag::Bool, Value::Int(i)) => Ok(Value::Bool(*i != 0)),
        (Tag::Bool, Value::Float(f)) => Ok(Value::Bool(*f != 0.0)),
        (Tag::Int, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (Tag::Int, Value::Float(f)) => Ok(Value::Int(*f as i64)),
        (Tag::Float, Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        (Tag::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn int_times_float_promotes_to_float() {
        let product = evaluate_binary(BinaryOp::Mul, &Value::Int(2), &Value::Float(2.0)).unwrap();
        assert_eq!(product, Value::Float(4.0));
    }

    #[test]
    fn truncating_chain_matches_reference() {
        let mut i = Value::Int(2);
        for factor in [2.0, 2.5] {
            let product = evaluate_binary(BinaryOp::Mul, &i, &Value::Float(factor)).unwrap();
            i = convert(&product, Tag::Int).unwrap();
        }
        assert_eq!(i, Value::Int(10));
    }

    #[test]
    fn bool_is_one_bit_integer_in_arithmetic() {
        let sum = evaluate_binary(BinaryOp::Add, &Value::Bool(true), &Value::Bool(true)).unwrap();
        assert_eq!(sum, Value::Int(2));
        let and = evaluate_binary(BinaryOp::BitAnd, &Value::Bool(true), &Value::Bool(false)).unwrap();
        assert_eq!(and, Value::Bool(false));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let err = evaluate_binary(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err, RuntimeError::DivisionByZero);
    }

    #[test]
    fn vectors_scale_by_scalars_on_either_side() {
        let v = Value::Vector2(Vector2::new(1.5, -2.0));
        let left = evaluate_binary(BinaryOp::Mul, &v, &Value::Int(2)).unwrap();
        let right = evaluate_binary(BinaryOp::Mul, &Value::Float(2.0), &v).unwrap();
        assert_eq!(left, Value::Vector2(Vector2::new(3.0, -4.0)));
        assert_eq!(left, right);
    }

    #[test]
    fn float_bitwise_is_rejected() {
        assert!(evaluate_binary(BinaryOp::BitAnd, &Value::Float(1.0), &Value::Int(1)).is_err());
    }

    #[test]
    fn strings_concatenate() {
        let joined =
            evaluate_binary(BinaryOp::Add, &Value::string("ab"), &Value::string("cd")).unwrap();
        assert_eq!(joined, Value::string("abcd"));
    }

    #[test]
    fn conversion_truncates_toward_zero() {
        assert_eq!(convert(&Value::Float(-2.9), Tag::Int).unwrap(), Value::Int(-2));
        assert!(convert(&Value::string("x"), Tag::Int).is_err());
    }
}
