//! Tunable knobs for the tracing JIT.

/// Configuration for a [`crate::jit::JitState`].
///
/// Constructed via [`Default`] and overridden field-by-field, mirroring how
/// the host VM configures its other subsystems.
#[derive(Debug, Clone)]
pub struct JitConfig {
    /// Master switch. When `false`, `increment_hot` and `lookup` are no-ops
    /// and the interpreter never leaves the bytecode dispatch loop.
    pub enabled: bool,

    /// Number of times a backward-branch target must be reached before
    /// recording starts.
    pub hot_threshold: u16,

    /// Register slots reserved ahead of the loop-carried values at the top
    /// of a trace's register window, so hoisted invariants and widened
    /// guards never have to renumber already-recorded instructions.
    pub pre_header_slots: usize,

    /// Load factor at which the trace cache grows.
    pub cache_growth_factor: f32,

    /// Hard ceiling on the number of IR instructions a single trace may
    /// record before it's aborted rather than compiled.
    pub max_instructions: usize,

    /// Hard ceiling on call depth while recording (this crate has no
    /// inlining across frames, so this bounds recursion depth instead).
    pub max_call_depth: usize,

    /// When set, the optimizer and code generator log the IR before and
    /// after each pass at `trace` level.
    pub dump_ir: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            enabled: true,
            hot_threshold: 50,
            pre_header_slots: 16,
            cache_growth_factor: 0.7,
            max_instructions: 1000,
            max_call_depth: 8,
            dump_ir: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = JitConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.hot_threshold, 50);
        assert_eq!(cfg.pre_header_slots, 16);
        assert_eq!(cfg.pre_header_slots % 2, 0);
        assert_eq!(cfg.cache_growth_factor, 0.7);
        assert_eq!(cfg.max_instructions, 1000);
        assert_eq!(cfg.max_call_depth, 8);
        assert!(!cfg.dump_ir);
    }
}
