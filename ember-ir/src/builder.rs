//! Cursor-based instruction emission.

use crate::{
    BlockId,
    Dst,
    Imm,
    Instr,
    InstrId,
    Shader,
    Src,
    Value,
};
use ember_asm::{CmpCond, Opcode, Width};

#[derive(Debug, Clone, Copy)]
enum Point {
    End(BlockId),
    Before(InstrId),
}

/// An insertion cursor over a shader.
///
/// The cursor survives removal of instructions around the insertion point;
/// it does not chase instructions inserted before it by other means.
#[derive(Debug)]
pub struct Builder<'s> {
    /// The shader being built.
    pub shader: &'s mut Shader,
    point: Point,
}

impl<'s> Builder<'s> {
    /// Cursor appending to the end of `block`.
    pub fn at_end(shader: &'s mut Shader, block: BlockId) -> Self {
        Self {
            shader,
            point: Point::End(block),
        }
    }

    /// Cursor inserting before `anchor`.
    pub fn before(shader: &'s mut Shader, anchor: InstrId) -> Self {
        Self {
            shader,
            point: Point::Before(anchor),
        }
    }

    /// Moves the cursor to the end of `block`.
    pub fn seek_end(&mut self, block: BlockId) {
        self.point = Point::End(block);
    }

    /// The block the cursor currently inserts into.
    pub fn block(&self) -> BlockId {
        match self.point {
            Point::End(b) => b,
            Point::Before(anchor) => {
                self.shader.instrs[anchor].block.expect("anchor is attached")
            }
        }
    }

    /// Emits `instr` at the cursor.
    pub fn push(&mut self, instr: Instr) -> InstrId {
        match self.point {
            Point::End(block) => self.shader.append(block, instr),
            Point::Before(anchor) => self.shader.insert_before(anchor, instr),
        }
    }

    /// Emits a single-destination ALU instruction, returning its value.
    pub fn alu(&mut self, opcode: Opcode, width: Width, srcs: &[Src]) -> Value {
        let value = self.shader.new_value(width);
        let mut instr = Instr::new(opcode);
        instr.dsts.push(Dst::ssa(value, width));
        instr.srcs.extend(srcs.iter().copied());
        self.push(instr);
        value
    }

    /// Emits a comparison producing a canonical 0/1 result of `width`.
    pub fn cmp(
        &mut self,
        opcode: Opcode,
        cond: CmpCond,
        width: Width,
        a: Src,
        b: Src,
    ) -> Value {
        let value = self.shader.new_value(width);
        let mut instr = Instr::new(opcode);
        instr.cond = Some(cond);
        instr.dsts.push(Dst::ssa(value, width));
        instr.srcs.push(a);
        instr.srcs.push(b);
        self.push(instr);
        value
    }

    /// Emits a `mov` of an immediate.
    pub fn mov_imm(&mut self, width: Width, imm: Imm) -> Value {
        self.alu(Opcode::Mov, width, &[Src::imm(imm, width)])
    }

    /// Emits a `mov` of an arbitrary source.
    pub fn mov(&mut self, width: Width, src: Src) -> Value {
        self.alu(Opcode::Mov, width, &[src])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Shader;
    use ember_asm::Stage;

    #[test]
    fn before_cursor_inserts_ahead_of_the_anchor() {
        let mut shader = Shader::new(Stage::Compute);
        let block = shader.new_block();
        let mut b = Builder::at_end(&mut shader, block);
        let x = b.mov_imm(Width::W32, Imm::uint(1));
        let y = b.alu(Opcode::IAdd, Width::W32, &[
            Src::ssa(x, Width::W32),
            Src::ssa(x, Width::W32),
        ]);
        let anchor = shader.def_of(y).unwrap();
        let mut b = Builder::before(&mut shader, anchor);
        assert_eq!(b.block(), block);
        let z = b.mov_imm(Width::W32, Imm::uint(2));
        let order = shader.block_instrs(block);
        assert_eq!(order.len(), 3);
        assert_eq!(shader.def_of(z), Some(order[1]));
        assert_eq!(shader.def_of(y), Some(order[2]));
    }

    #[test]
    fn cmp_records_the_condition() {
        let mut shader = Shader::new(Stage::Compute);
        let block = shader.new_block();
        let mut b = Builder::at_end(&mut shader, block);
        let x = b.mov_imm(Width::W32, Imm::uint(3));
        let c = b.cmp(
            Opcode::UCmp,
            CmpCond::Lt,
            Width::W16,
            Src::ssa(x, Width::W32),
            Src::imm(Imm::uint(4), Width::W32),
        );
        let def = shader.def_of(c).unwrap();
        assert_eq!(shader.instrs[def].cond, Some(CmpCond::Lt));
    }
}
