//! Instruction stream consumed by the code generator.
//!
//! Streams are straight-line hot paths produced by the front-end. Every
//! operand is an [`Address`]; locals, members, externals and parameters carry
//! declared types, temporaries take the type of whatever produced them.

use std::fmt;

use kiln_runtime::{BinaryOp, BoxedValue, HostTypeId, UnaryOp, Value, Vector2, Vector2i, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    Constant(u32),
    Local(u32),
    Argument(u32),
    Member(u32),
    External(u32),
    Temp(u32),
}

impl Address {
    /// Members and externals live outside the frame and outlive the call.
    pub fn is_shared(self) -> bool {
        matches!(self, Address::Member(_) | Address::External(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Constant(i) => write!(f, "const#{i}"),
            Address::Local(i) => write!(f, "local#{i}"),
            Address::Argument(i) => write!(f, "arg#{i}"),
            Address::Member(i) => write!(f, "member#{i}"),
            Address::External(i) => write!(f, "extern#{i}"),
            Address::Temp(i) => write!(f, "tmp#{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2),
    Vector2i(Vector2i),
    Vector3(Vector3),
}

impl ConstValue {
    pub fn ty(&self) -> HostTypeId {
        match self {
            ConstValue::Nil => HostTypeId::NIL,
            ConstValue::Bool(_) => HostTypeId::BOOL,
            ConstValue::Int(_) => HostTypeId::INT,
            ConstValue::Float(_) => HostTypeId::FLOAT,
            ConstValue::String(_) => HostTypeId::STRING,
            ConstValue::Vector2(_) => HostTypeId::VECTOR2,
            ConstValue::Vector2i(_) => HostTypeId::VECTOR2I,
            ConstValue::Vector3(_) => HostTypeId::VECTOR3,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ConstValue::Nil => Value::Nil,
            ConstValue::Bool(b) => Value::Bool(*b),
            ConstValue::Int(i) => Value::Int(*i),
            ConstValue::Float(x) => Value::Float(*x),
            ConstValue::String(text) => Value::string(text),
            ConstValue::Vector2(v) => Value::Vector2(*v),
            ConstValue::Vector2i(v) => Value::Vector2i(*v),
            ConstValue::Vector3(v) => Value::Vector3(*v),
        }
    }
}

/// Entry-convention function pointer and constant table of a compiled
/// function, plus the signature callers convert their arguments to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTarget {
    pub entry: usize,
    pub constants: usize,
    pub params: Vec<HostTypeId>,
    pub returns: Option<HostTypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// A host function looked up by name in the runtime's function table.
    Host(String),
    Compiled(CompiledTarget),
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Host(name) => f.write_str(name),
            CallTarget::Compiled(target) => write!(f, "compiled@{:#x}", target.entry),
        }
    }
}

/// A boxed value outside the frame whose address is known when compiling.
///
/// The embedder keeps `pointer` valid for as long as the compiled function
/// may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalBinding {
    pub ty: HostTypeId,
    pub pointer: *mut BoxedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Assign {
        dst: Address,
        src: Address,
    },
    Binary {
        dst: Address,
        op: BinaryOp,
        lhs: Address,
        rhs: Address,
    },
    Unary {
        dst: Address,
        op: UnaryOp,
        src: Address,
    },
    GetField {
        dst: Address,
        src: Address,
        field: String,
    },
    SetField {
        owner: Address,
        field: String,
        value: Address,
    },
    Call {
        target: CallTarget,
        args: Vec<Address>,
        dst: Option<Address>,
        ret_ty: HostTypeId,
    },
    Return(Option<Address>),
}

impl Instr {
    /// Addresses read by this instruction, in evaluation order.
    pub fn uses(&self) -> Vec<Address> {
        match self {
            Instr::Assign { src, .. } => vec![*src],
            Instr::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instr::Unary { src, .. } | Instr::GetField { src, .. } => vec![*src],
            Instr::SetField { owner, value, .. } => vec![*owner, *value],
            Instr::Call { args, .. } => args.clone(),
            Instr::Return(value) => value.iter().copied().collect(),
        }
    }

    /// Address written by this instruction.
    pub fn def(&self) -> Option<Address> {
        match self {
            Instr::Assign { dst, .. }
            | Instr::Binary { dst, .. }
            | Instr::Unary { dst, .. }
            | Instr::GetField { dst, .. } => Some(*dst),
            Instr::SetField { owner, .. } => Some(*owner),
            Instr::Call { dst, .. } => *dst,
            Instr::Return(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionIr {
    pub name: String,
    pub params: Vec<HostTypeId>,
    pub locals: Vec<HostTypeId>,
    pub members: Vec<HostTypeId>,
    pub externals: Vec<ExternalBinding>,
    pub constants: Vec<ConstValue>,
    pub body: Vec<Instr>,
    /// `None` for functions that return nothing.
    pub returns: Option<HostTypeId>,
}

/// Convenience builder for instruction streams.
#[derive(Debug, Clone)]
pub struct FunctionIrBuilder {
    ir: FunctionIr,
    next_temp: u32,
}

impl FunctionIrBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            ir: FunctionIr {
                name: name.into(),
                params: Vec::new(),
                locals: Vec::new(),
                members: Vec::new(),
                externals: Vec::new(),
                constants: Vec::new(),
                body: Vec::new(),
                returns: None,
            },
            next_temp: 0,
        }
    }

    pub fn param(&mut self, ty: HostTypeId) -> Address {
        self.ir.params.push(ty);
        Address::Argument(self.ir.params.len() as u32 - 1)
    }

    pub fn local(&mut self, ty: HostTypeId) -> Address {
        self.ir.locals.push(ty);
        Address::Local(self.ir.locals.len() as u32 - 1)
    }

    pub fn member(&mut self, ty: HostTypeId) -> Address {
        self.ir.members.push(ty);
        Address::Member(self.ir.members.len() as u32 - 1)
    }

    pub fn external(&mut self, ty: HostTypeId, pointer: *mut BoxedValue) -> Address {
        self.ir.externals.push(ExternalBinding { ty, pointer });
        Address::External(self.ir.externals.len() as u32 - 1)
    }

    pub fn constant(&mut self, value: ConstValue) -> Address {
        if let Some(index) = self.ir.constants.iter().position(|existing| *existing == value) {
            return Address::Constant(index as u32);
        }
        self.ir.constants.push(value);
        Address::Constant(self.ir.constants.len() as u32 - 1)
    }

    pub fn temp(&mut self) -> Address {
        self.next_temp += 1;
        Address::Temp(self.next_temp - 1)
    }

    pub fn returns(&mut self, ty: HostTypeId) -> &mut Self {
        self.ir.returns = Some(ty);
        self
    }

    pub fn push(&mut self, instr: Instr) -> &mut Self {
        self.ir.body.push(instr);
        self
    }

    pub fn assign(&mut self, dst: Address, src: Address) -> &mut Self {
        self.push(Instr::Assign { dst, src })
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Address, rhs: Address) -> Address {
        let dst = self.temp();
        self.push(Instr::Binary { dst, op, lhs, rhs });
        dst
    }

    pub fn unary(&mut self, op: UnaryOp, src: Address) -> Address {
        let dst = self.temp();
        self.push(Instr::Unary { dst, op, src });
        dst
    }

    pub fn get_field(&mut self, src: Address, field: &str) -> Address {
        let dst = self.temp();
        self.push(Instr::GetField {
            dst,
            src,
            field: field.to_string(),
        });
        dst
    }

    pub fn set_field(&mut self, owner: Address, field: &str, value: Address) -> &mut Self {
        self.push(Instr::SetField {
            owner,
            field: field.to_string(),
            value,
        })
    }

    /// Call whose result is discarded.
    pub fn call(&mut self, target: CallTarget, args: Vec<Address>) -> &mut Self {
        self.push(Instr::Call {
            target,
            args,
            dst: None,
            ret_ty: HostTypeId::VARIANT,
        })
    }

    pub fn call_value(&mut self, target: CallTarget, args: Vec<Address>, ret_ty: HostTypeId) -> Address {
        let dst = self.temp();
        self.push(Instr::Call {
            target,
            args,
            dst: Some(dst),
            ret_ty,
        });
        dst
    }

    pub fn ret(&mut self, value: Option<Address>) -> &mut Self {
        self.push(Instr::Return(value))
    }

    pub fn finish(self) -> FunctionIr {
        self.ir
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut b = FunctionIrBuilder::new("f");
        let a = b.constant(ConstValue::Int(2));
        let c = b.constant(ConstValue::Float(2.5));
        assert_eq!(b.constant(ConstValue::Int(2)), a);
        assert_ne!(a, c);
        assert_eq!(b.finish().constants.len(), 2);
    }

    #[test]
    fn set_field_reads_and_writes_its_owner() {
        let instr = Instr::SetField {
            owner: Address::Local(0),
            field: "x".into(),
            value: Address::Constant(1),
        };
        assert_eq!(instr.uses(), vec![Address::Local(0), Address::Constant(1)]);
        assert_eq!(instr.def(), Some(Address::Local(0)));
    }
}
