use crate::ops::{BinaryOp, UnaryOp};
use crate::value::Tag;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("unknown value tag {0}")]
    UnknownTag(u32),
    #[error("dangling {0} handle")]
    DanglingHandle(Tag),
    #[error("invalid operator `{op}` between {left} and {right}")]
    InvalidBinary { op: BinaryOp, left: Tag, right: Tag },
    #[error("invalid operator `{op}` on {operand}")]
    InvalidUnary { op: UnaryOp, operand: Tag },
    #[error("unknown operator code {0}")]
    UnknownOperator(u32),
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot convert {from} to {to}")]
    InvalidConversion { from: Tag, to: Tag },
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("`{name}` expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("`{name}`: invalid argument of type {got}")]
    InvalidArgument { name: String, got: Tag },
    #[error("argument {index} has type {got}, expected {expected}")]
    SignatureMismatch { index: usize, expected: Tag, got: Tag },
    #[error("member {index} has type {got}, expected {expected}")]
    MemberMismatch { index: usize, expected: Tag, got: Tag },
    #[error("member index {0} out of range")]
    UnknownMember(usize),
}
