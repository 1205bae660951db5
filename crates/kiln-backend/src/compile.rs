//! Driver: one instruction stream in, one finalized native function out.

use std::ptr;
use std::sync::Arc;

use cranelift_codegen::ir::{Function, UserFuncName};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{Linkage, Module};
use kiln_runtime::{BoxedValue, HostFn, HostInstance, HostTypeId, RuntimeError, Tag, Value};

use crate::abi::{declare_helpers, entry_signature, DeclaredHelpers};
use crate::catalog::TypeCatalog;
use crate::config::JitConfig;
use crate::dispatch::OperatorRegistry;
use crate::engine::FunctionContext;
use crate::error::{CompileError, Recovery};
use crate::ir::{CallTarget, CompiledTarget, FunctionIr};
use crate::jit_module::create_jit_module;
use crate::liveness;
use crate::lower::lower_body;
use crate::stats::FrameStats;

pub struct JitCompiler {
    module: JITModule,
    helpers: DeclaredHelpers,
    catalog: Arc<TypeCatalog>,
    registry: &'static OperatorRegistry,
    config: JitConfig,
    compiled: u32,
}

/// Result of [`JitCompiler::compile_or_interpret`].
#[derive(Debug)]
pub enum CompileOutcome {
    Native(CompiledFunction),
    /// The function must run in the interpreter.
    Interpret { reason: CompileError },
}

impl JitCompiler {
    pub fn new(config: JitConfig) -> Result<Self, CompileError> {
        Self::with_catalog(config, TypeCatalog::global()?)
    }

    pub fn with_catalog(config: JitConfig, catalog: Arc<TypeCatalog>) -> Result<Self, CompileError> {
        let registry = OperatorRegistry::standard()?;
        let mut module = create_jit_module(&config)?;
        let helpers = declare_helpers(&mut module)?;
        tracing::debug!(?config, "jit compiler ready");
        Ok(Self {
            module,
            helpers,
            catalog,
            registry,
            config,
            compiled: 0,
        })
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// Compile `ir` to native code. Nothing is defined in the module unless
    /// the whole stream lowers.
    pub fn compile(&mut self, ir: &FunctionIr) -> Result<CompiledFunction, CompileError> {
        let span = tracing::debug_span!("compile", function = %ir.name);
        let _enter = span.enter();

        let liveness = liveness::analyze(ir);
        let constants: Box<[BoxedValue]> = ir
            .constants
            .iter()
            .map(|constant| BoxedValue::from_value(&constant.to_value()))
            .collect();
        let constant_table: Box<[*const BoxedValue]> =
            constants.iter().map(|boxed| boxed as *const BoxedValue).collect();

        let signature = entry_signature(&self.module);
        let mut function =
            Function::with_name_signature(UserFuncName::user(0, self.compiled), signature.clone());
        let helper_refs = self.helpers.import_into(&mut self.module, &mut function);

        let mut builder_context = FunctionBuilderContext::new();
        let (stats, call_names) = {
            let builder = FunctionBuilder::new(&mut function, &mut builder_context);
            let mut ctx = FunctionContext::new(
                builder,
                ir,
                &self.catalog,
                self.registry,
                helper_refs,
                &self.config,
                &liveness,
                signature.clone(),
            );
            lower_body(&mut ctx)?;
            ctx.finish()
        };
        let ir_text = function.display().to_string();
        tracing::trace!(%ir_text, "lowered");

        let name = format!("{}#{}", ir.name, self.compiled);
        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &signature)
            .map_err(|e| CompileError::Backend(format!("declare {name}: {e}")))?;
        let mut context = self.module.make_context();
        context.func = function;
        let defined = self.module.define_function(func_id, &mut context);
        self.module.clear_context(&mut context);
        defined.map_err(|e| CompileError::Backend(format!("define {name}: {e:?}")))?;
        self.module
            .finalize_definitions()
            .map_err(|e| CompileError::Backend(format!("finalize {name}: {e}")))?;
        let code = self.module.get_finalized_function(func_id);
        self.compiled += 1;

        // SAFETY: the function was declared with `entry_signature`, which is
        // the `HostFn` convention, and finalized code is never freed.
        let entry = unsafe { std::mem::transmute::<*const u8, HostFn>(code) };

        let param_tags = ir
            .params
            .iter()
            .map(|ty| Ok(self.catalog.describe(*ty)?.tag))
            .collect::<Result<Vec<_>, CompileError>>()?;
        let member_tags = ir
            .members
            .iter()
            .map(|ty| Ok(self.catalog.describe(*ty)?.tag))
            .collect::<Result<Vec<_>, CompileError>>()?;

        tracing::debug!(
            slots = stats.slots_allocated,
            reused = stats.slot_reuses,
            native = stats.native_operators,
            fallback = stats.fallback_operators,
            "compiled"
        );

        Ok(CompiledFunction {
            name: ir.name.clone(),
            entry,
            param_tags,
            member_tags,
            params: ir.params.clone(),
            returns: ir.returns,
            constants,
            constant_table,
            _call_names: call_names,
            stats,
            ir_text,
        })
    }

    /// Like [`compile`](Self::compile), but only fatal errors escape; anything
    /// else sends the function to the interpreter.
    pub fn compile_or_interpret(&mut self, ir: &FunctionIr) -> Result<CompileOutcome, CompileError> {
        match self.compile(ir) {
            Ok(function) => Ok(CompileOutcome::Native(function)),
            Err(err) if err.recovery() == Recovery::Fatal => Err(err),
            Err(err) => {
                tracing::warn!(function = %ir.name, %err, "native compilation abandoned, interpreting");
                Ok(CompileOutcome::Interpret { reason: err })
            }
        }
    }
}

/// A finalized native function and the data its code points into.
#[derive(Debug)]
pub struct CompiledFunction {
    name: String,
    entry: HostFn,
    /// `None` accepts any tag.
    param_tags: Vec<Option<Tag>>,
    member_tags: Vec<Option<Tag>>,
    params: Vec<HostTypeId>,
    returns: Option<HostTypeId>,
    constants: Box<[BoxedValue]>,
    constant_table: Box<[*const BoxedValue]>,
    _call_names: Vec<Box<str>>,
    stats: FrameStats,
    ir_text: String,
}

impl CompiledFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Cranelift IR of the function before register allocation.
    pub fn ir_text(&self) -> &str {
        &self.ir_text
    }

    pub fn address(&self) -> usize {
        self.entry as usize
    }

    pub fn constants(&self) -> &[BoxedValue] {
        &self.constants
    }

    /// Target for calling this function from another compiled function.
    /// The caller must not outlive `self`.
    pub fn target(&self) -> CallTarget {
        CallTarget::Compiled(CompiledTarget {
            entry: self.address(),
            constants: self.constant_table.as_ptr() as usize,
            params: self.params.clone(),
            returns: self.returns,
        })
    }

    /// Run the function on `instance` after checking arguments and members
    /// against the compiled signature.
    pub fn invoke(&self, instance: &mut HostInstance, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        if args.len() != self.param_tags.len() {
            return Err(RuntimeError::Arity {
                name: self.name.clone(),
                expected: self.param_tags.len(),
                got: args.len(),
            });
        }
        for (index, (arg, expected)) in args.iter().zip(&self.param_tags).enumerate() {
            match expected {
                Some(expected) if arg.tag() != *expected => {
                    return Err(RuntimeError::SignatureMismatch {
                        index,
                        expected: *expected,
                        got: arg.tag(),
                    });
                }
                _ => {}
            }
        }
        if instance.member_count() < self.member_tags.len() {
            return Err(RuntimeError::UnknownMember(self.member_tags.len() - 1));
        }
        for (index, expected) in self.member_tags.iter().enumerate() {
            let got = instance.member(index)?.tag();
            match expected {
                Some(expected) if got != *expected => {
                    return Err(RuntimeError::MemberMismatch {
                        index,
                        expected: *expected,
                        got,
                    });
                }
                _ => {}
            }
        }

        let arg_boxes: Vec<BoxedValue> = args.iter().map(BoxedValue::from_value).collect();
        let arg_table: Vec<*const BoxedValue> =
            arg_boxes.iter().map(|boxed| boxed as *const BoxedValue).collect();
        let members = instance.member_table();
        let mut ret = BoxedValue::NIL;
        let ret_ptr = if self.returns.is_some() {
            &mut ret as *mut BoxedValue
        } else {
            ptr::null_mut()
        };

        tracing::trace!(function = %self.name, argc = args.len(), "invoke");
        // SAFETY: every table outlives the call and holds `args.len()` or
        // `member_tags.len()` valid boxes whose tags were checked above.
        unsafe {
            (self.entry)(
                instance,
                members.as_ptr(),
                self.constant_table.as_ptr(),
                arg_table.as_ptr(),
                args.len() as u64,
                ret_ptr,
            );
        }

        if self.returns.is_some() {
            ret.to_value().map(Some)
        } else {
            Ok(None)
        }
    }
}
