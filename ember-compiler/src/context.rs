//! The compiler context.
//!
//! One context serves one driver instance. It carries the options, the
//! debug-flag mask parsed once from the environment, and the monotonic
//! shader-id counter. A context holds no per-compilation mutable state;
//! callers may compile from multiple threads with one context each or a
//! shared one behind the atomic counter.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

bitflags! {
    /// Debug behaviors toggled through `EMBER_DEBUG`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Dump the IR after every pass.
        const DUMP_PASSES = 1 << 0;
        /// Dump the final disassembly.
        const DUMP_DISASM = 1 << 1;
        /// Treat validator findings as fatal even with `no_validate`.
        const STRICT = 1 << 2;
        /// Disable the preamble optimization.
        const NO_PREAMBLE = 1 << 3;
        /// Disable UBO-to-const promotion.
        const NO_UBO_TO_CONST = 1 << 4;
    }
}

fn parse_debug(var: &str) -> DebugFlags {
    let mut flags = DebugFlags::empty();
    for word in var.split(',') {
        match word.trim() {
            "passes" => flags |= DebugFlags::DUMP_PASSES,
            "disasm" => flags |= DebugFlags::DUMP_DISASM,
            "strict" => flags |= DebugFlags::STRICT,
            "nopreamble" => flags |= DebugFlags::NO_PREAMBLE,
            "noubo" => flags |= DebugFlags::NO_UBO_TO_CONST,
            _ => {}
        }
    }
    flags
}

/// The process-wide debug mask, parsed once.
pub fn debug_flags() -> DebugFlags {
    static FLAGS: OnceLock<DebugFlags> = OnceLock::new();
    *FLAGS.get_or_init(|| {
        std::env::var("EMBER_DEBUG")
            .map(|v| parse_debug(&v))
            .unwrap_or_else(|_| DebugFlags::empty())
    })
}

/// Options recognized by the compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerOptions {
    /// Skip the SSA and post-allocation optimization stages.
    pub no_optimize: bool,
    /// Skip invariant checks between passes.
    pub no_validate: bool,
    /// Collect per-variant statistics into the metadata record.
    pub shaderdb: bool,
    /// Emit a human-readable disassembly alongside the binary.
    pub verbose_disasm: bool,
    /// Also process internally generated shaders.
    pub internal: bool,
}

/// A driver-lifetime compiler instance.
#[derive(Debug)]
pub struct CompilerContext {
    /// Options for every compilation through this context.
    pub options: CompilerOptions,
    shader_counter: AtomicU32,
}

impl CompilerContext {
    /// A context with the given options.
    pub fn new(options: CompilerOptions) -> Self {
        Self {
            options,
            shader_counter: AtomicU32::new(0),
        }
    }

    /// Claims the next shader id. Updated atomically at the start of each
    /// compilation.
    pub fn next_shader_id(&self) -> u32 {
        self.shader_counter.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CompilerContext {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_ids_are_monotonic() {
        let ctx = CompilerContext::default();
        assert_eq!(ctx.next_shader_id(), 0);
        assert_eq!(ctx.next_shader_id(), 1);
    }

    #[test]
    fn debug_parsing_ignores_unknown_words() {
        let flags = parse_debug("passes, bogus ,disasm");
        assert_eq!(flags, DebugFlags::DUMP_PASSES | DebugFlags::DUMP_DISASM);
    }
}
