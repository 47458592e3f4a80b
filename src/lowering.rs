//! Target-specific lowering: rewrites pseudo-ops, syscall placeholders and
//! out-of-range immediates into the physical RV32IM subset the assembler
//! actually accepts. Three passes, run in this fixed order by
//! [`crate::driver::Driver::lower_for_target`].

use crate::diagnostics::CodegenResult;
use crate::entities::VReg;
use crate::ir::instruction::{Instruction, InstructionData, RegArg};
use crate::ir::program::Program;
use crate::ir::Opcode;
use crate::isa::registers::PhysReg;
use crate::isa::{fits_signed_12, syscall};

fn zero() -> RegArg {
    RegArg::new(VReg::ZERO)
}

fn unary(opcode: Opcode, data: InstructionData) -> Instruction {
    Instruction::new(opcode, data)
}

/// Rewrites every pseudo-op into one or two physical instructions,
/// preserving the original's label on the first emitted instruction and
/// its comment on the first as well (best-effort; matches
/// `fixPseudoInstructions`'s treatment of debug annotations).
pub fn fix_pseudo_instructions(program: &mut Program) -> CodegenResult<()> {
    let old_order = program.order().to_vec();
    let mut new_order = Vec::with_capacity(old_order.len());

    for id in old_order {
        let inst = program.inst(id).clone();
        let mut emitted = lower_pseudo(&inst);
        if let Some(first) = emitted.first_mut() {
            first.label = inst.label;
            first.comment = inst.comment.clone();
        } else {
            emitted.push(inst.clone());
        }
        for e in emitted {
            new_order.push(program.push_raw(e));
        }
    }

    log::debug!("fix_pseudo_instructions: {} instructions after lowering", new_order.len());
    program.set_order(new_order);
    Ok(())
}

/// Returns the replacement instruction(s) for a pseudo-op, or an empty
/// `Vec` if `inst` is already a physical instruction (the caller then
/// keeps the original).
fn lower_pseudo(inst: &Instruction) -> Vec<Instruction> {
    use InstructionData::*;
    match (&inst.opcode, &inst.data) {
        (Opcode::Subi, BinaryImm { rd, rs1, imm }) => {
            vec![unary(Opcode::Addi, BinaryImm { rd: *rd, rs1: *rs1, imm: -imm })]
        }
        (Opcode::Seq, Binary { rd, rs1, rs2 }) => vec![
            unary(Opcode::Sub, Binary { rd: *rd, rs1: *rs1, rs2: *rs2 }),
            unary(Opcode::Sltiu, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Sne, Binary { rd, rs1, rs2 }) => vec![
            unary(Opcode::Sub, Binary { rd: *rd, rs1: *rs1, rs2: *rs2 }),
            unary(Opcode::Sltu, Binary { rd: *rd, rs1: zero(), rs2: *rd }),
        ],
        (Opcode::Seqi, BinaryImm { rd, rs1, imm }) => vec![
            unary(Opcode::Addi, BinaryImm { rd: *rd, rs1: *rs1, imm: -imm }),
            unary(Opcode::Sltiu, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Snei, BinaryImm { rd, rs1, imm }) => vec![
            unary(Opcode::Addi, BinaryImm { rd: *rd, rs1: *rs1, imm: -imm }),
            unary(Opcode::Sltu, Binary { rd: *rd, rs1: zero(), rs2: *rd }),
        ],
        (Opcode::Sge, Binary { rd, rs1, rs2 }) => vec![
            unary(Opcode::Slt, Binary { rd: *rd, rs1: *rs1, rs2: *rs2 }),
            unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Sgeu, Binary { rd, rs1, rs2 }) => vec![
            unary(Opcode::Sltu, Binary { rd: *rd, rs1: *rs1, rs2: *rs2 }),
            unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Sgei, BinaryImm { rd, rs1, imm }) => vec![
            unary(Opcode::Slti, BinaryImm { rd: *rd, rs1: *rs1, imm: *imm }),
            unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Sgeiu, BinaryImm { rd, rs1, imm }) => vec![
            unary(Opcode::Sltiu, BinaryImm { rd: *rd, rs1: *rs1, imm: *imm }),
            unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Sgti, BinaryImm { rd, rs1, imm }) => {
            if *imm == i32::MAX {
                vec![unary(Opcode::Li, InstructionData::LoadImm { rd: *rd, imm: 0 })]
            } else {
                vec![
                    unary(Opcode::Slti, BinaryImm { rd: *rd, rs1: *rs1, imm: imm + 1 }),
                    unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
                ]
            }
        }
        (Opcode::Sgtiu, BinaryImm { rd, rs1, imm }) => {
            if *imm as u32 == u32::MAX {
                vec![unary(Opcode::Li, InstructionData::LoadImm { rd: *rd, imm: 0 })]
            } else {
                vec![
                    unary(Opcode::Sltiu, BinaryImm { rd: *rd, rs1: *rs1, imm: imm.wrapping_add(1) }),
                    unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
                ]
            }
        }
        (Opcode::Sle, Binary { rd, rs1, rs2 }) => vec![
            unary(Opcode::Slt, Binary { rd: *rd, rs1: *rs2, rs2: *rs1 }),
            unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Sleu, Binary { rd, rs1, rs2 }) => vec![
            unary(Opcode::Sltu, Binary { rd: *rd, rs1: *rs2, rs2: *rs1 }),
            unary(Opcode::Xori, BinaryImm { rd: *rd, rs1: *rd, imm: 1 }),
        ],
        (Opcode::Slei, BinaryImm { rd, rs1, imm }) => {
            if *imm == i32::MAX {
                vec![unary(Opcode::Li, InstructionData::LoadImm { rd: *rd, imm: 1 })]
            } else {
                vec![unary(Opcode::Slti, BinaryImm { rd: *rd, rs1: *rs1, imm: imm + 1 })]
            }
        }
        (Opcode::Sleiu, BinaryImm { rd, rs1, imm }) => {
            if *imm as u32 == u32::MAX {
                vec![unary(Opcode::Li, InstructionData::LoadImm { rd: *rd, imm: 1 })]
            } else {
                vec![unary(Opcode::Sltiu, BinaryImm { rd: *rd, rs1: *rs1, imm: imm.wrapping_add(1) })]
            }
        }
        (Opcode::Sgt, Binary { rd, rs1, rs2 }) => {
            vec![unary(Opcode::Slt, Binary { rd: *rd, rs1: *rs2, rs2: *rs1 })]
        }
        (Opcode::Sgtu, Binary { rd, rs1, rs2 }) => {
            vec![unary(Opcode::Sltu, Binary { rd: *rd, rs1: *rs2, rs2: *rs1 })]
        }
        (Opcode::Bgt, Branch { rs1, rs2, target }) => {
            vec![unary(Opcode::Blt, Branch { rs1: *rs2, rs2: *rs1, target: *target })]
        }
        (Opcode::Bgtu, Branch { rs1, rs2, target }) => {
            vec![unary(Opcode::Bltu, Branch { rs1: *rs2, rs2: *rs1, target: *target })]
        }
        (Opcode::Ble, Branch { rs1, rs2, target }) => {
            vec![unary(Opcode::Bge, Branch { rs1: *rs2, rs2: *rs1, target: *target })]
        }
        (Opcode::Bleu, Branch { rs1, rs2, target }) => {
            vec![unary(Opcode::Bgeu, Branch { rs1: *rs2, rs2: *rs1, target: *target })]
        }
        (Opcode::Beqz, BranchZero { rs1, target }) => {
            vec![unary(Opcode::Beq, Branch { rs1: *rs1, rs2: zero(), target: *target })]
        }
        (Opcode::Bnez, BranchZero { rs1, target }) => {
            vec![unary(Opcode::Bne, Branch { rs1: *rs1, rs2: zero(), target: *target })]
        }
        // Blez/Bgtz would naturally lower to Ble/Bgt zero-compares, but
        // Ble/Bgt are themselves pseudo-ops this single forward pass never
        // revisits. Apply their operand-swap rule inline instead, landing
        // directly on the physical Bge/Blt forms.
        (Opcode::Blez, BranchZero { rs1, target }) => {
            vec![unary(Opcode::Bge, Branch { rs1: zero(), rs2: *rs1, target: *target })]
        }
        (Opcode::Bgez, BranchZero { rs1, target }) => {
            vec![unary(Opcode::Bge, Branch { rs1: *rs1, rs2: zero(), target: *target })]
        }
        (Opcode::Bltz, BranchZero { rs1, target }) => {
            vec![unary(Opcode::Blt, Branch { rs1: *rs1, rs2: zero(), target: *target })]
        }
        (Opcode::Bgtz, BranchZero { rs1, target }) => {
            vec![unary(Opcode::Blt, Branch { rs1: zero(), rs2: *rs1, target: *target })]
        }
        _ => Vec::new(),
    }
}

/// Expands the four syscall placeholders into `li a7, N` / optional
/// argument copy / `ecall` / optional return-value copy, with the
/// registers pinned by single-element whitelists.
pub fn fix_syscalls(program: &mut Program) -> CodegenResult<()> {
    let old_order = program.order().to_vec();
    let mut new_order = Vec::with_capacity(old_order.len());

    for id in old_order {
        let inst = program.inst(id).clone();
        let (number, arg, ret) = match (&inst.opcode, &inst.data) {
            (Opcode::Exit0, InstructionData::Nullary) => (syscall::EXIT_0, None, None),
            (Opcode::ReadInt, InstructionData::SyscallRead { rd }) => (syscall::READ_INT, None, Some(*rd)),
            (Opcode::PrintInt, InstructionData::SyscallWrite { rs1 }) => (syscall::PRINT_INT, Some(*rs1), None),
            (Opcode::PrintChar, InstructionData::SyscallWrite { rs1 }) => (syscall::PRINT_CHAR, Some(*rs1), None),
            _ => {
                new_order.push(id);
                continue;
            }
        };

        // `a7` and `a0` are modelled as ordinary fresh vregs pinned to
        // exactly one physical register via the constraint whitelist,
        // matching `genInstruction`'s register-whitelist mechanism rather
        // than inventing a distinct "hardwired register" operand kind.
        let mut emitted = Vec::new();
        let a7 = program.new_vreg();
        emitted.push(unary(
            Opcode::Li,
            InstructionData::LoadImm { rd: RegArg::pinned(a7, PhysReg::A7), imm: number },
        ));
        if let Some(src) = arg {
            let a0 = program.new_vreg();
            emitted.push(unary(
                Opcode::Addi,
                InstructionData::BinaryImm { rd: RegArg::pinned(a0, PhysReg::A0), rs1: src, imm: 0 },
            ));
        }
        emitted.push(unary(Opcode::Ecall, InstructionData::Nullary));
        if let Some(dst) = ret {
            let a0 = program.new_vreg();
            // The `ecall` itself is the instruction that actually defines
            // `a0`; model that by pinning a fresh vreg to `a0` on the copy
            // back into the placeholder's destination.
            emitted.push(unary(
                Opcode::Addi,
                InstructionData::BinaryImm { rd: dst, rs1: RegArg::pinned(a0, PhysReg::A0), imm: 0 },
            ));
        }
        if let Some(first) = emitted.first_mut() {
            first.label = inst.label;
            first.comment = inst.comment.clone();
        }
        for e in emitted {
            new_order.push(program.push_raw(e));
        }
    }

    log::debug!("fix_syscalls: {} instructions after lowering", new_order.len());
    program.set_order(new_order);
    Ok(())
}

fn matching_non_immediate(opcode: Opcode) -> Option<Opcode> {
    use Opcode::*;
    Some(match opcode {
        Addi => Add,
        Andi => And,
        Ori => Or,
        Xori => Xor,
        Slti => Slt,
        Sltiu => Sltu,
        _ => return None,
    })
}

/// Legalises immediates that don't fit the RV32I 12-bit signed I-format
/// field, and materialises the M-extension's immediate pseudo-ops (`muli`,
/// `divi`), which RV32IM has no hardware encoding for at all.
pub fn fix_unsupported_immediates(program: &mut Program) -> CodegenResult<()> {
    let old_order = program.order().to_vec();
    let mut new_order = Vec::with_capacity(old_order.len());

    for id in old_order {
        let inst = program.inst(id).clone();
        let InstructionData::BinaryImm { rd, rs1, imm } = inst.data else {
            new_order.push(id);
            continue;
        };

        let mut emitted: Vec<Instruction> = Vec::new();
        match inst.opcode {
            Opcode::Addi if rs1.vreg.is_zero() && !fits_signed_12(imm) => {
                emitted.push(unary(Opcode::Li, InstructionData::LoadImm { rd, imm }));
            }
            Opcode::Muli | Opcode::Divi => {
                let real = if inst.opcode == Opcode::Muli { Opcode::Mul } else { Opcode::Div };
                let tmp = program.new_vreg();
                emitted.push(unary(Opcode::Li, InstructionData::LoadImm { rd: RegArg::new(tmp), imm }));
                emitted.push(unary(real, InstructionData::Binary { rd, rs1, rs2: RegArg::new(tmp) }));
            }
            Opcode::Slli | Opcode::Srli | Opcode::Srai => {
                emitted.push(unary(inst.opcode, InstructionData::BinaryImm { rd, rs1, imm: imm & 0x1f }));
            }
            _ if !fits_signed_12(imm) => {
                if let Some(real) = matching_non_immediate(inst.opcode) {
                    let tmp = program.new_vreg();
                    emitted.push(unary(Opcode::Li, InstructionData::LoadImm { rd: RegArg::new(tmp), imm }));
                    emitted.push(unary(real, InstructionData::Binary { rd, rs1, rs2: RegArg::new(tmp) }));
                }
            }
            _ => {}
        }

        if emitted.is_empty() {
            new_order.push(id);
            continue;
        }
        if let Some(first) = emitted.first_mut() {
            first.label = inst.label;
            first.comment = inst.comment.clone();
        }
        for e in emitted {
            new_order.push(program.push_raw(e));
        }
    }

    log::debug!("fix_unsupported_immediates: {} instructions after lowering", new_order.len());
    program.set_order(new_order);
    Ok(())
}

/// Runs all three lowering passes in the fixed order the design spec
/// requires: pseudo-ops, then syscalls, then immediate legalisation.
pub fn do_target_specific_transformations(program: &mut Program) -> CodegenResult<()> {
    fix_pseudo_instructions(program)?;
    fix_syscalls(program)?;
    fix_unsupported_immediates(program)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::RegArg;

    #[test]
    fn subi_lowers_to_addi_with_negated_immediate() {
        let mut p = Program::new();
        let rs1 = p.new_vreg();
        let rd = p.new_vreg();
        p.gen_subi(RegArg::new(rd), RegArg::new(rs1), 5).unwrap();
        p.gen_exit0().unwrap();
        fix_pseudo_instructions(&mut p).unwrap();
        let (_, first) = p.iter().next().unwrap();
        assert_eq!(first.opcode, Opcode::Addi);
        assert_eq!(first.data.imm(), Some(-5));
    }

    #[test]
    fn sgt_register_form_just_swaps_operands() {
        let mut p = Program::new();
        let a = p.new_vreg();
        let b = p.new_vreg();
        let rd = p.new_vreg();
        p.gen_sgt(RegArg::new(rd), RegArg::new(a), RegArg::new(b)).unwrap();
        p.gen_exit0().unwrap();
        fix_pseudo_instructions(&mut p).unwrap();
        let (_, first) = p.iter().next().unwrap();
        assert_eq!(first.opcode, Opcode::Slt);
        assert_eq!(first.data.rs1().unwrap().vreg, b);
        assert_eq!(first.data.rs2().unwrap().vreg, a);
    }

    #[test]
    fn syscall_placeholder_expands_with_pinned_registers() {
        let mut p = Program::new();
        p.gen_exit0().unwrap();
        fix_syscalls(&mut p).unwrap();
        let insts: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(insts, vec![Opcode::Li, Opcode::Ecall]);
    }

    #[test]
    fn oversized_addi_immediate_is_legalised() {
        let mut p = Program::new();
        let rs1 = p.new_vreg();
        let rd = p.new_vreg();
        p.gen_addi(RegArg::new(rd), RegArg::new(rs1), 100_000).unwrap();
        p.gen_exit0().unwrap();
        fix_unsupported_immediates(&mut p).unwrap();
        let opcodes: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(opcodes[0], Opcode::Li);
        assert_eq!(opcodes[1], Opcode::Add);
    }

    #[test]
    fn muli_always_materialises_regardless_of_immediate_size() {
        let mut p = Program::new();
        let rs1 = p.new_vreg();
        let rd = p.new_vreg();
        p.gen_muli(RegArg::new(rd), RegArg::new(rs1), 2).unwrap();
        p.gen_exit0().unwrap();
        fix_unsupported_immediates(&mut p).unwrap();
        let opcodes: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(opcodes[0], Opcode::Li);
        assert_eq!(opcodes[1], Opcode::Mul);
    }

    #[test]
    fn blez_and_bgtz_lower_straight_to_physical_opcodes() {
        let mut p = Program::new();
        let rs1 = p.new_vreg();
        let lo = p.create_label();
        let hi = p.create_label();
        p.gen_blez(RegArg::new(rs1), lo).unwrap();
        p.gen_bgtz(RegArg::new(rs1), hi).unwrap();
        p.gen_exit0().unwrap();
        fix_pseudo_instructions(&mut p).unwrap();
        let opcodes: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(opcodes[0], Opcode::Bge);
        assert_eq!(opcodes[1], Opcode::Blt);
        assert!(!opcodes[0].is_pseudo());
        assert!(!opcodes[1].is_pseudo());
    }

    #[test]
    fn running_lowering_twice_is_a_no_op_the_second_time() {
        let mut p = Program::new();
        let rs1 = p.new_vreg();
        let rd = p.new_vreg();
        p.gen_subi(RegArg::new(rd), RegArg::new(rs1), 5).unwrap();
        p.gen_exit0().unwrap();
        do_target_specific_transformations(&mut p).unwrap();
        let first_pass: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        do_target_specific_transformations(&mut p).unwrap();
        let second_pass: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(first_pass, second_pass);
    }
}
