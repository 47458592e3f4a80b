//! A minimal textual stand-in for the (out-of-scope) LANCE front end.
//!
//! The real front end's parser, semantic actions and diagnostics are
//! explicitly outside this crate's boundary (§1 of the design spec) — it
//! is expected to drive [`crate::ir::program::Program`]'s generator API
//! directly, the same way `tests/` does. This module exists only so
//! `lancec` has something to read from a file: a flat, line-oriented
//! assembly-like notation that maps one line to one generator call, with
//! no expression evaluation, constant folding or type checking of its
//! own. It is not LANCE, and it is not part of the compatibility surface
//! the design spec's P1-P7 properties cover.
//!
//! Grammar, one directive per line (blank lines and `;` comments ignored):
//!
//! ```text
//! symbol NAME int
//! symbol NAME array N
//! vreg NAME
//! label NAME
//! here NAME            ; assign label NAME to the next instruction
//! global NAME
//! add|sub|and|or|xor|mul|div|sll|srl|sra|slt|sltu RD, RS1, RS2
//! addi|andi|ori|xori|slli|srli|srai|slti|sltiu|subi|muli|divi RD, RS1, IMM
//! beq|bne|blt|bltu|bge|bgeu|bgt|bgtu|ble|bleu RS1, RS2, LABEL
//! beqz|bnez|blez|bgez|bltz|bgtz RS1, LABEL
//! j LABEL
//! li RD, IMM
//! la RD, LABEL
//! lw RD, IMM(RS1)
//! sw RS2, IMM(RS1)
//! lwg RD, LABEL
//! swg VALUE, LABEL, SCRATCH
//! nop | ecall | ebreak | exit0
//! read_int RD
//! print_int RS1
//! print_char RS1
//! ```
//!
//! Operands are either a name bound by an earlier `vreg`/`label`/`symbol`
//! directive, or the literal `zero` for `x0`.

use crate::diagnostics::DiagnosticSink;
use crate::entities::{LabelId, VReg};
use crate::ir::instruction::RegArg;
use crate::ir::program::Program;
use crate::ir::symbol::SymbolKind;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;

#[derive(Default)]
struct Names {
    vregs: HashMap<String, VReg>,
    labels: HashMap<String, LabelId>,
}

impl Names {
    fn vreg(&self, tok: &str) -> Result<VReg> {
        if tok == "zero" {
            return Ok(VReg::ZERO);
        }
        self.vregs.get(tok).copied().ok_or_else(|| anyhow!("undefined vreg '{tok}'"))
    }

    fn reg(&self, tok: &str) -> Result<RegArg> {
        Ok(RegArg::new(self.vreg(tok)?))
    }

    fn label(&self, tok: &str) -> Result<LabelId> {
        self.labels.get(tok).copied().ok_or_else(|| anyhow!("undefined label '{tok}'"))
    }
}

fn split_operands(rest: &str) -> Vec<String> {
    rest.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

fn split_mem_operand(tok: &str) -> Result<(i32, String)> {
    let open = tok.find('(').ok_or_else(|| anyhow!("expected IMM(REG), got '{tok}'"))?;
    let close = tok.rfind(')').ok_or_else(|| anyhow!("expected IMM(REG), got '{tok}'"))?;
    let imm: i32 = tok[..open].trim().parse().with_context(|| format!("bad immediate in '{tok}'"))?;
    let reg = tok[open + 1..close].trim().to_string();
    Ok((imm, reg))
}

/// Parses `text` into `program`, reporting structural problems (unknown
/// directive, undefined name, arity mismatch) through `sink` the same way
/// a real front end would report source errors — this module's own
/// mistakes are "front-end" errors from the back end's point of view.
pub fn parse(program: &mut Program, sink: &mut DiagnosticSink, text: &str) -> Result<()> {
    let mut names = Names::default();

    for (lineno, raw) in text.lines().enumerate() {
        let line = match raw.find(';') {
            Some(i) => &raw[..i],
            None => raw,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = parse_line(program, sink, &mut names, line) {
            bail!("line {}: {e}", lineno + 1);
        }
    }
    Ok(())
}

fn parse_line(program: &mut Program, sink: &mut DiagnosticSink, names: &mut Names, line: &str) -> Result<()> {
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match head {
        "symbol" => {
            let (name, kind_tok) = rest.split_once(char::is_whitespace).ok_or_else(|| anyhow!("symbol needs a name and kind"))?;
            let kind_tok = kind_tok.trim();
            let kind = if kind_tok == "int" {
                SymbolKind::Int
            } else if let Some(n) = kind_tok.strip_prefix("array ") {
                SymbolKind::IntArray(n.trim().parse().context("bad array size")?)
            } else {
                bail!("unknown symbol kind '{kind_tok}'");
            };
            let label = program
                .create_symbol(sink, name, kind)
                .ok_or_else(|| anyhow!("symbol '{name}' rejected by front end (duplicate or zero-size array)"))?;
            names.labels.insert(name.to_string(), label);
            Ok(())
        }
        "vreg" => {
            let v = program.new_vreg();
            names.vregs.insert(rest.to_string(), v);
            Ok(())
        }
        "label" => {
            let l = program.create_label();
            names.labels.insert(rest.to_string(), l);
            Ok(())
        }
        "here" => {
            let l = *names.labels.get(rest).ok_or_else(|| anyhow!("undefined label '{rest}'"))?;
            program.assign_label(l);
            Ok(())
        }
        "global" => {
            let l = names.label(rest)?;
            program.set_label_global(l, true);
            Ok(())
        }
        "nop" => program.gen_nop().map(drop).map_err(Into::into),
        "ecall" => program.gen_ecall().map(drop).map_err(Into::into),
        "ebreak" => program.gen_ebreak().map(drop).map_err(Into::into),
        "exit0" => program.gen_exit0().map(drop).map_err(Into::into),
        "read_int" => {
            let rd = names.reg(rest)?;
            program.gen_read_int(rd).map(drop).map_err(Into::into)
        }
        "print_int" => {
            let rs1 = names.reg(rest)?;
            program.gen_print_int(rs1).map(drop).map_err(Into::into)
        }
        "print_char" => {
            let rs1 = names.reg(rest)?;
            program.gen_print_char(rs1).map(drop).map_err(Into::into)
        }
        "j" => {
            let target = names.label(rest)?;
            program.gen_j(target).map(drop).map_err(Into::into)
        }
        "li" => {
            let ops = split_operands(rest);
            let [rd, imm] = take2(&ops)?;
            program.gen_li(names.reg(rd)?, imm.parse().context("bad immediate")?).map(drop).map_err(Into::into)
        }
        "la" => {
            let ops = split_operands(rest);
            let [rd, target] = take2(&ops)?;
            program.gen_la(names.reg(rd)?, names.label(target)?).map(drop).map_err(Into::into)
        }
        "lw" => {
            let ops = split_operands(rest);
            let [rd, mem] = take2(&ops)?;
            let (imm, rs1) = split_mem_operand(mem)?;
            program.gen_lw(names.reg(rd)?, imm, names.reg(&rs1)?).map(drop).map_err(Into::into)
        }
        "sw" => {
            let ops = split_operands(rest);
            let [rs2, mem] = take2(&ops)?;
            let (imm, rs1) = split_mem_operand(mem)?;
            program.gen_sw(names.reg(rs2)?, imm, names.reg(&rs1)?).map(drop).map_err(Into::into)
        }
        "lwg" => {
            let ops = split_operands(rest);
            let [rd, target] = take2(&ops)?;
            program.gen_lw_global(names.reg(rd)?, names.label(target)?).map(drop).map_err(Into::into)
        }
        "swg" => {
            let ops = split_operands(rest);
            let [value, target, scratch] = take3(&ops)?;
            program
                .gen_sw_global(names.reg(value)?, names.label(target)?, names.reg(scratch)?)
                .map(drop)
                .map_err(Into::into)
        }
        binary if BINARY.contains(&binary) => {
            let ops = split_operands(rest);
            let [rd, rs1, rs2] = take3(&ops)?;
            gen_binary(program, binary, names.reg(rd)?, names.reg(rs1)?, names.reg(rs2)?)
        }
        binary_imm if BINARY_IMM.contains(&binary_imm) => {
            let ops = split_operands(rest);
            let [rd, rs1, imm] = take3(&ops)?;
            gen_binary_imm(program, binary_imm, names.reg(rd)?, names.reg(rs1)?, imm.parse().context("bad immediate")?)
        }
        branch if BRANCH.contains(&branch) => {
            let ops = split_operands(rest);
            let [rs1, rs2, target] = take3(&ops)?;
            gen_branch(program, branch, names.reg(rs1)?, names.reg(rs2)?, names.label(target)?)
        }
        branch_zero if BRANCH_ZERO.contains(&branch_zero) => {
            let ops = split_operands(rest);
            let [rs1, target] = take2(&ops)?;
            gen_branch_zero(program, branch_zero, names.reg(rs1)?, names.label(target)?)
        }
        other => bail!("unknown directive '{other}'"),
    }
}

const BINARY: &[&str] = &[
    "add", "sub", "and", "or", "xor", "mul", "div", "sll", "srl", "sra", "slt", "sltu", "seq", "sne", "sge", "sgeu",
    "sgt", "sgtu", "sle", "sleu",
];
const BINARY_IMM: &[&str] = &[
    "addi", "andi", "ori", "xori", "slli", "srli", "srai", "slti", "sltiu", "subi", "muli", "divi", "seqi", "snei",
    "sgei", "sgeiu", "sgti", "sgtiu", "slei", "sleiu",
];
const BRANCH: &[&str] = &["beq", "bne", "blt", "bltu", "bge", "bgeu", "bgt", "bgtu", "ble", "bleu"];
const BRANCH_ZERO: &[&str] = &["beqz", "bnez", "blez", "bgez", "bltz", "bgtz"];

fn take2<'a>(ops: &'a [String]) -> Result<[&'a str; 2]> {
    match ops {
        [a, b] => Ok([a.as_str(), b.as_str()]),
        _ => bail!("expected 2 operands, got {}", ops.len()),
    }
}

fn take3<'a>(ops: &'a [String]) -> Result<[&'a str; 3]> {
    match ops {
        [a, b, c] => Ok([a.as_str(), b.as_str(), c.as_str()]),
        _ => bail!("expected 3 operands, got {}", ops.len()),
    }
}

fn gen_binary(p: &mut Program, mnemonic: &str, rd: RegArg, rs1: RegArg, rs2: RegArg) -> Result<()> {
    let r = match mnemonic {
        "add" => p.gen_add(rd, rs1, rs2),
        "sub" => p.gen_sub(rd, rs1, rs2),
        "and" => p.gen_and(rd, rs1, rs2),
        "or" => p.gen_or(rd, rs1, rs2),
        "xor" => p.gen_xor(rd, rs1, rs2),
        "mul" => p.gen_mul(rd, rs1, rs2),
        "div" => p.gen_div(rd, rs1, rs2),
        "sll" => p.gen_sll(rd, rs1, rs2),
        "srl" => p.gen_srl(rd, rs1, rs2),
        "sra" => p.gen_sra(rd, rs1, rs2),
        "slt" => p.gen_slt(rd, rs1, rs2),
        "sltu" => p.gen_sltu(rd, rs1, rs2),
        "seq" => p.gen_seq(rd, rs1, rs2),
        "sne" => p.gen_sne(rd, rs1, rs2),
        "sge" => p.gen_sge(rd, rs1, rs2),
        "sgeu" => p.gen_sgeu(rd, rs1, rs2),
        "sgt" => p.gen_sgt(rd, rs1, rs2),
        "sgtu" => p.gen_sgtu(rd, rs1, rs2),
        "sle" => p.gen_sle(rd, rs1, rs2),
        "sleu" => p.gen_sleu(rd, rs1, rs2),
        _ => unreachable!("guarded by BINARY"),
    };
    r.map(drop).map_err(Into::into)
}

fn gen_binary_imm(p: &mut Program, mnemonic: &str, rd: RegArg, rs1: RegArg, imm: i32) -> Result<()> {
    let r = match mnemonic {
        "addi" => p.gen_addi(rd, rs1, imm),
        "andi" => p.gen_andi(rd, rs1, imm),
        "ori" => p.gen_ori(rd, rs1, imm),
        "xori" => p.gen_xori(rd, rs1, imm),
        "slli" => p.gen_slli(rd, rs1, imm),
        "srli" => p.gen_srli(rd, rs1, imm),
        "srai" => p.gen_srai(rd, rs1, imm),
        "slti" => p.gen_slti(rd, rs1, imm),
        "sltiu" => p.gen_sltiu(rd, rs1, imm),
        "subi" => p.gen_subi(rd, rs1, imm),
        "muli" => p.gen_muli(rd, rs1, imm),
        "divi" => p.gen_divi(rd, rs1, imm),
        "seqi" => p.gen_seqi(rd, rs1, imm),
        "snei" => p.gen_snei(rd, rs1, imm),
        "sgei" => p.gen_sgei(rd, rs1, imm),
        "sgeiu" => p.gen_sgeiu(rd, rs1, imm),
        "sgti" => p.gen_sgti(rd, rs1, imm),
        "sgtiu" => p.gen_sgtiu(rd, rs1, imm),
        "slei" => p.gen_slei(rd, rs1, imm),
        "sleiu" => p.gen_sleiu(rd, rs1, imm),
        _ => unreachable!("guarded by BINARY_IMM"),
    };
    r.map(drop).map_err(Into::into)
}

fn gen_branch(p: &mut Program, mnemonic: &str, rs1: RegArg, rs2: RegArg, target: LabelId) -> Result<()> {
    let r = match mnemonic {
        "beq" => p.gen_beq(rs1, rs2, target),
        "bne" => p.gen_bne(rs1, rs2, target),
        "blt" => p.gen_blt(rs1, rs2, target),
        "bltu" => p.gen_bltu(rs1, rs2, target),
        "bge" => p.gen_bge(rs1, rs2, target),
        "bgeu" => p.gen_bgeu(rs1, rs2, target),
        "bgt" => p.gen_bgt(rs1, rs2, target),
        "bgtu" => p.gen_bgtu(rs1, rs2, target),
        "ble" => p.gen_ble(rs1, rs2, target),
        "bleu" => p.gen_bleu(rs1, rs2, target),
        _ => unreachable!("guarded by BRANCH"),
    };
    r.map(drop).map_err(Into::into)
}

fn gen_branch_zero(p: &mut Program, mnemonic: &str, rs1: RegArg, target: LabelId) -> Result<()> {
    let r = match mnemonic {
        "beqz" => p.gen_beqz(rs1, target),
        "bnez" => p.gen_bnez(rs1, target),
        "blez" => p.gen_blez(rs1, target),
        "bgez" => p.gen_bgez(rs1, target),
        "bltz" => p.gen_bltz(rs1, target),
        "bgtz" => p.gen_bgtz(rs1, target),
        _ => unreachable!("guarded by BRANCH_ZERO"),
    };
    r.map(drop).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_small_program() {
        let mut p = Program::new();
        let mut sink = DiagnosticSink::new();
        let src = "\
            symbol a int\n\
            vreg t0\n\
            vreg t1\n\
            li t0, 7\n\
            swg t0, a, t1\n\
            exit0\n\
        ";
        parse(&mut p, &mut sink, src).unwrap();
        assert!(!sink.has_errors());
        let opcodes: Vec<_> = p.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(opcodes, vec![crate::ir::Opcode::Li, crate::ir::Opcode::SwGlobal, crate::ir::Opcode::Exit0]);
    }

    #[test]
    fn undefined_vreg_is_rejected() {
        let mut p = Program::new();
        let mut sink = DiagnosticSink::new();
        assert!(parse(&mut p, &mut sink, "li nope, 1\n").is_err());
    }
}
