use kiln_runtime::HostTypeId;

/// How far a compilation failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Only the current expression is affected; it is emitted as a runtime call.
    Expression,
    /// The current function is abandoned and left to the interpreter.
    Function,
    /// Nothing in this compilation unit can be trusted.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown host type id {0}")]
    UnknownType(HostTypeId),
    #[error("type `{ty}` has no field `{field}`")]
    UnknownField { ty: String, field: String },
    #[error("type `{ty}` publishes no field offsets, cannot access `{field}`")]
    MissingFieldOffsetMetadata { ty: String, field: String },
    #[error("ABI layout mismatch in `{ty}`: {detail}")]
    AbiLayoutMismatch { ty: String, detail: String },
    #[error("no native specialization for {operands} `{op}`")]
    UnsupportedOperatorCombination { op: &'static str, operands: String },
    #[error("call target `{0}` cannot be resolved at compile time")]
    TargetUnresolved(String),
    #[error("stack frame needs {requested} bytes, limit is {limit}")]
    StackFrameOverflow { requested: u32, limit: u32 },
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    #[error("invalid operator table: {0}")]
    InvalidOperatorTable(String),
    #[error("invalid JIT configuration: {0}")]
    Config(String),
    #[error("code generation failed: {0}")]
    Backend(String),
}

impl CompileError {
    pub fn recovery(&self) -> Recovery {
        match self {
            CompileError::UnsupportedOperatorCombination { .. } | CompileError::TargetUnresolved(_) => {
                Recovery::Expression
            }
            CompileError::UnknownType(_)
            | CompileError::UnknownField { .. }
            | CompileError::MissingFieldOffsetMetadata { .. }
            | CompileError::StackFrameOverflow { .. }
            | CompileError::UnsupportedConstruct(_)
            | CompileError::Backend(_) => Recovery::Function,
            CompileError::AbiLayoutMismatch { .. }
            | CompileError::InvalidOperatorTable(_)
            | CompileError::Config(_) => Recovery::Fatal,
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        CompileError::UnsupportedConstruct(what.into())
    }
}
