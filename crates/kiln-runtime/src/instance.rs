use crate::api::HostFunctions;
use crate::error::RuntimeError;
use crate::value::{BoxedValue, Value};

/// The receiver a compiled function runs against.
///
/// Members are stored as boxed values so native code can address them
/// through the members pointer array. Anything printed or raised by runtime
/// entry points is recorded here for the embedder to inspect.
pub struct HostInstance {
    members: Vec<BoxedValue>,
    printed: Vec<BoxedValue>,
    output: Vec<String>,
    errors: Vec<RuntimeError>,
    functions: &'static HostFunctions,
}

impl HostInstance {
    pub fn new(members: &[Value]) -> Self {
        Self {
            members: members.iter().map(BoxedValue::from_value).collect(),
            printed: Vec::new(),
            output: Vec::new(),
            errors: Vec::new(),
            functions: HostFunctions::standard(),
        }
    }

    pub fn member(&self, index: usize) -> Result<Value, RuntimeError> {
        self.members
            .get(index)
            .ok_or(RuntimeError::UnknownMember(index))?
            .to_value()
    }

    pub fn set_member(&mut self, index: usize, value: &Value) -> Result<(), RuntimeError> {
        let slot = self
            .members
            .get_mut(index)
            .ok_or(RuntimeError::UnknownMember(index))?;
        *slot = BoxedValue::from_value(value);
        Ok(())
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Pointer table for the members array argument of the entry convention.
    ///
    /// The pointers stay valid until the instance's members are next
    /// borrowed mutably through a safe method.
    pub fn member_table(&mut self) -> Vec<*mut BoxedValue> {
        self.members
            .iter_mut()
            .map(|member| member as *mut BoxedValue)
            .collect()
    }

    /// Every boxed value passed to `print`, exactly as received.
    pub fn printed(&self) -> &[BoxedValue] {
        &self.printed
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn errors(&self) -> &[RuntimeError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<RuntimeError> {
        std::mem::take(&mut self.errors)
    }

    pub fn functions(&self) -> &'static HostFunctions {
        self.functions
    }

    pub(crate) fn record_print(&mut self, boxed: BoxedValue) {
        self.printed.push(boxed);
    }

    pub(crate) fn record_line(&mut self, line: String) {
        self.output.push(line);
    }

    pub(crate) fn record_error(&mut self, error: RuntimeError) {
        tracing::debug!(%error, "runtime entry point failed");
        self.errors.push(error);
    }
}
