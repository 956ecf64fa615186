//! Textual IR dump.
//!
//! The format mirrors the hardware disassembly syntax where the two
//! overlap: flags print as `(ss)`/`(sy)`/`(sat)`, repeat sources as `(r)`,
//! modifiers as `(abs)`/`(neg)`/`(not)` prefixes.

use crate::{
    DstKind,
    ImmType,
    Instr,
    InstrExtra,
    Shader,
    Src,
    SrcKind,
};
use core::fmt;
use ember_asm::{InstrFlags, SrcMods};

fn fmt_mods(f: &mut fmt::Formatter<'_>, mods: SrcMods) -> fmt::Result {
    if mods.contains(SrcMods::ABS) {
        write!(f, "(abs)")?;
    }
    if mods.contains(SrcMods::NEG) {
        write!(f, "(neg)")?;
    }
    if mods.contains(SrcMods::NOT) {
        write!(f, "(not)")?;
    }
    if mods.contains(SrcMods::R) {
        write!(f, "(r)")?;
    }
    if mods.contains(SrcMods::RELATIVE) {
        write!(f, "(rel)")?;
    }
    Ok(())
}

struct SrcFmt<'a>(&'a Src);

impl fmt::Display for SrcFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_mods(f, self.0.mods)?;
        match self.0.kind {
            SrcKind::Ssa(v) => write!(f, "{v}"),
            SrcKind::Phys(r) => write!(f, "{r}"),
            SrcKind::Const(c) => write!(f, "{c}"),
            SrcKind::Array { id, elem } => write!(f, "{id}[{elem}]"),
            SrcKind::Imm(imm) => match imm.ty {
                ImmType::U32 => write!(f, "#{:#x}", imm.bits),
                ImmType::F32 => write!(f, "#{}", f32::from_bits(imm.bits)),
                ImmType::F16 => write!(f, "#h{:#06x}", imm.bits & 0xffff),
            },
        }
    }
}

struct InstrFmt<'a>(&'a Instr);

impl fmt::Display for InstrFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.flags.contains(InstrFlags::SS) {
            write!(f, "(ss)")?;
        }
        if self.0.flags.contains(InstrFlags::SY) {
            write!(f, "(sy)")?;
        }
        for (i, dst) in self.0.dsts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match dst.kind {
                DstKind::Ssa(v) => write!(f, "{v}")?,
                DstKind::Phys(r) => write!(f, "{r}")?,
                DstKind::Array { id, elem } => write!(f, "{id}[{elem}]")?,
            }
        }
        if !self.0.dsts.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", self.0.opcode.mnemonic())?;
        if let Some(cond) = self.0.cond {
            write!(f, ".{cond}")?;
        }
        if self.0.flags.contains(InstrFlags::SAT) {
            write!(f, "(sat)")?;
        }
        if self.0.repeat > 0 {
            write!(f, "(rpt{})", self.0.repeat)?;
        }
        for (i, src) in self.0.srcs.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { "" } else { "," }, SrcFmt(src))?;
        }
        match &self.0.extra {
            InstrExtra::Branch { target } => write!(f, " -> {target}")?,
            InstrExtra::Exec { levels } => write!(f, " #{levels}")?,
            InstrExtra::Tex(t) => {
                write!(f, " tex={} samp={}", t.tex, t.samp)?;
                if t.array {
                    write!(f, " (a)")?;
                }
            }
            InstrExtra::Mem(m) => {
                if m.offset != 0 || m.binding != 0 {
                    write!(f, " [{}+{}]", m.binding, m.offset)?;
                }
            }
            InstrExtra::Input { slot } => write!(f, " in{slot}")?,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Imm, Value};
    use ember_asm::Width;
    use rstest::rstest;

    #[rstest]
    #[case(SrcMods::empty(), "%7")]
    #[case(SrcMods::NEG, "(neg)%7")]
    #[case(SrcMods::ABS | SrcMods::NEG, "(abs)(neg)%7")]
    fn source_modifiers_prefix_the_operand(
        #[case] mods: SrcMods,
        #[case] expected: &str,
    ) {
        let src = Src::ssa(Value::new(7), Width::W32).with_mods(mods);
        assert_eq!(format!("{}", SrcFmt(&src)), expected);
    }

    #[test]
    fn immediates_format_by_type() {
        let i = Src::imm(Imm::uint(0x2a), Width::W32);
        assert_eq!(format!("{}", SrcFmt(&i)), "#0x2a");
        let f = Src::imm(Imm::float(1.5), Width::W32);
        assert_eq!(format!("{}", SrcFmt(&f)), "#1.5");
    }
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &block in &self.block_order {
            write!(f, "{block}:")?;
            let b = &self.blocks[block];
            if !b.predecessors.is_empty() {
                write!(f, " ; preds:")?;
                for p in &b.predecessors {
                    write!(f, " {p}")?;
                }
            }
            writeln!(f)?;
            for &instr in &b.instrs {
                writeln!(f, "  {}", InstrFmt(&self.instrs[instr]))?;
            }
        }
        Ok(())
    }
}
