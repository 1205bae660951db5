/// Counters collected while compiling one function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub slots_allocated: u32,
    pub slot_reuses: u32,
    pub argument_arrays: u32,
    pub frame_bytes: u32,
    pub native_operators: u32,
    pub fallback_operators: u32,
    pub direct_calls: u32,
    pub unresolved_calls: u32,
}
