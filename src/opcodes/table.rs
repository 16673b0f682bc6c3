// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The standard instruction table.
//!
//! Declaration order is significant: when several definitions share a
//! mnemonic and arity, the parser tries them in the order listed here.

use crate::bytecode::codec::{CodecError, Decoder};
use crate::codegen::lower::{
    lower_branch, lower_call, lower_call_external, lower_compare_registers, lower_compare_stack,
    lower_element, lower_field, lower_flag, lower_flag_branch, lower_format, lower_load_constant,
    lower_plain, lower_pop_register, lower_push, lower_register_update, lower_type_operand,
    lower_variable,
};
use crate::core::string_heap::StringHeap;
use crate::opcodes::args::{constant_fits_register, parse_arg, ArgContext, ArgSpec, RawArg};
use crate::opcodes::operand::{decode_operand, encode_operand, Operand};
use crate::opcodes::registry::{LowerFn, OpcodeDef, OpcodeId, ParseFn};

pub const PARENT_HOST: u8 = 0xFE;
pub const PARENT_CONVERT: u8 = 0xFF;
pub const PARENT_CODES: &[u8] = &[PARENT_HOST, PARENT_CONVERT];

/// Parse each argument against the definition's specs in order.
pub fn parse_by_spec(
    def: &OpcodeDef,
    args: &[RawArg],
    ctx: &mut ArgContext<'_>,
) -> Result<Vec<Operand>, String> {
    if args.len() != def.arity() {
        return Err(format!(
            "expected {} argument(s), found {}",
            def.arity(),
            args.len()
        ));
    }
    def.args
        .iter()
        .zip(args)
        .enumerate()
        .map(|(idx, (spec, arg))| {
            parse_arg(*spec, arg, ctx).map_err(|err| format!("argument {}: {err}", idx + 1))
        })
        .collect()
}

/// `ldc REG, CONST`: the constant must suit the register's class.
pub fn parse_load_constant(
    def: &OpcodeDef,
    args: &[RawArg],
    ctx: &mut ArgContext<'_>,
) -> Result<Vec<Operand>, String> {
    let operands = parse_by_spec(def, args, ctx)?;
    if let [Operand::Register(reg), Operand::Const(constant)] = operands.as_slice() {
        if !constant_fits_register(constant, reg.class()) {
            return Err(format!(
                "constant {constant} cannot be loaded into register {}",
                reg.name()
            ));
        }
    }
    Ok(operands)
}

fn check_operands(def: &OpcodeDef, operands: &[Operand]) -> Result<(), CodecError> {
    if operands.len() != def.arity() {
        return Err(CodecError::OperandMismatch {
            mnemonic: def.mnemonic.to_string(),
            detail: format!("expected {} operand(s), found {}", def.arity(), operands.len()),
        });
    }
    for (idx, (spec, operand)) in def.args.iter().zip(operands).enumerate() {
        if !spec.accepts_operand(operand) {
            return Err(CodecError::OperandMismatch {
                mnemonic: def.mnemonic.to_string(),
                detail: format!(
                    "operand {} is a {}, expected {}",
                    idx + 1,
                    operand.kind_name(),
                    spec.describe()
                ),
            });
        }
    }
    Ok(())
}

/// `u8` operand count followed by self-describing operands.
pub fn encode_by_spec(
    def: &OpcodeDef,
    operands: &[Operand],
    out: &mut Vec<u8>,
    heap: &mut StringHeap,
) -> Result<(), CodecError> {
    check_operands(def, operands)?;
    out.push(operands.len() as u8);
    for operand in operands {
        encode_operand(out, heap, operand)?;
    }
    Ok(())
}

pub fn decode_by_spec(
    def: &OpcodeDef,
    cur: &mut Decoder<'_>,
    heap: &StringHeap,
) -> Result<Vec<Operand>, CodecError> {
    let count = cur.read_u8()? as usize;
    if count != def.arity() {
        return Err(CodecError::OperandMismatch {
            mnemonic: def.mnemonic.to_string(),
            detail: format!("expected {} operand(s), found {count}", def.arity()),
        });
    }
    let mut operands = Vec::with_capacity(count);
    for _ in 0..count {
        operands.push(decode_operand(cur, heap)?);
    }
    check_operands(def, &operands)?;
    Ok(operands)
}

const NONE: &[ArgSpec] = &[];
const REG: &[ArgSpec] = &[ArgSpec::Register];
const NUM_REG: &[ArgSpec] = &[ArgSpec::NumericRegister];
const CONST: &[ArgSpec] = &[ArgSpec::Constant];
const REG_CONST: &[ArgSpec] = &[ArgSpec::Register, ArgSpec::Constant];
const REG_REG: &[ArgSpec] = &[ArgSpec::Register, ArgSpec::Register];
const FIELD: &[ArgSpec] = &[ArgSpec::Field];
const ARG: &[ArgSpec] = &[ArgSpec::Argument];
const LOCAL: &[ArgSpec] = &[ArgSpec::Local];
const LOCAL_STORE: &[ArgSpec] = &[ArgSpec::LocalStore];
const INDEX: &[ArgSpec] = &[ArgSpec::IndexRegister];
const FLAG: &[ArgSpec] = &[ArgSpec::Flag];
const TYPE: &[ArgSpec] = &[ArgSpec::Type];
const TYPE_OR_NULL: &[ArgSpec] = &[ArgSpec::TypeOrNull];
const PRIM: &[ArgSpec] = &[ArgSpec::PrimitiveType];
const LABEL: &[ArgSpec] = &[ArgSpec::Label];
const FLAG_LABEL: &[ArgSpec] = &[ArgSpec::Flag, ArgSpec::Label];
const METHOD: &[ArgSpec] = &[ArgSpec::Method];
const FUNCTION: &[ArgSpec] = &[ArgSpec::FunctionId];
const FORMAT: &[ArgSpec] = &[ArgSpec::Format];

const fn op(
    mnemonic: &'static str,
    code: u8,
    args: &'static [ArgSpec],
    lower: LowerFn,
) -> OpcodeDef {
    op_with(mnemonic, code, args, parse_by_spec, lower)
}

const fn op_with(
    mnemonic: &'static str,
    code: u8,
    args: &'static [ArgSpec],
    parse: ParseFn,
    lower: LowerFn,
) -> OpcodeDef {
    OpcodeDef {
        mnemonic,
        id: OpcodeId::Single(code),
        args,
        parse,
        encode: encode_by_spec,
        decode: decode_by_spec,
        lower,
    }
}

const fn ext(
    mnemonic: &'static str,
    parent: u8,
    code: u8,
    args: &'static [ArgSpec],
    lower: LowerFn,
) -> OpcodeDef {
    OpcodeDef {
        mnemonic,
        id: OpcodeId::Extended { parent, code },
        args,
        parse: parse_by_spec,
        encode: encode_by_spec,
        decode: decode_by_spec,
        lower,
    }
}

static STANDARD: &[OpcodeDef] = &[
    op("nop", 0x00, NONE, lower_plain),
    op_with("ldc", 0x01, REG_CONST, parse_load_constant, lower_load_constant),
    // Register form first: `push ra` must not be read as a constant.
    op("push", 0x03, REG, lower_push),
    op("push", 0x02, CONST, lower_push),
    op("pop", 0x04, NONE, lower_plain),
    op("pop", 0x05, REG, lower_pop_register),
    op("dup", 0x06, NONE, lower_plain),
    op("inc", 0x07, NUM_REG, lower_register_update),
    op("dec", 0x08, NUM_REG, lower_register_update),
    op("clr", 0x09, REG, lower_register_update),
    op("add", 0x10, NONE, lower_plain),
    op("sub", 0x11, NONE, lower_plain),
    op("mul", 0x12, NONE, lower_plain),
    op("div", 0x13, NONE, lower_plain),
    op("rem", 0x14, NONE, lower_plain),
    op("neg", 0x15, NONE, lower_plain),
    op("and", 0x16, NONE, lower_plain),
    op("or", 0x17, NONE, lower_plain),
    op("xor", 0x18, NONE, lower_plain),
    op("not", 0x19, NONE, lower_plain),
    op("shl", 0x1A, NONE, lower_plain),
    op("shr", 0x1B, NONE, lower_plain),
    op("ldfd", 0x20, FIELD, lower_field),
    op("ldfda", 0x21, FIELD, lower_field),
    op("stfd", 0x22, FIELD, lower_field),
    op("ldsfd", 0x23, FIELD, lower_field),
    op("ldsfda", 0x24, FIELD, lower_field),
    op("stsfd", 0x25, FIELD, lower_field),
    op("ldrg", 0x28, ARG, lower_variable),
    op("ldrga", 0x29, ARG, lower_variable),
    op("strg", 0x2A, ARG, lower_variable),
    op("ldlc", 0x2B, LOCAL, lower_variable),
    op("ldlca", 0x2C, LOCAL, lower_variable),
    op("stlc", 0x2D, LOCAL_STORE, lower_variable),
    op("ldel", 0x30, INDEX, lower_element),
    op("ldela", 0x31, INDEX, lower_element),
    op("stel", 0x32, INDEX, lower_element),
    op("ldlen", 0x33, NONE, lower_plain),
    op("setf", 0x38, FLAG, lower_flag),
    op("clrf", 0x39, FLAG, lower_flag),
    op("ldfl", 0x3A, FLAG, lower_flag),
    op("newobj", 0x40, TYPE, lower_type_operand),
    op("newarr", 0x41, TYPE, lower_type_operand),
    op("box", 0x42, TYPE, lower_type_operand),
    op("unbox", 0x43, TYPE, lower_type_operand),
    op("isinst", 0x44, TYPE, lower_type_operand),
    op("cast", 0x45, TYPE, lower_type_operand),
    op("ldtype", 0x46, TYPE_OR_NULL, lower_type_operand),
    op("ldnull", 0x47, NONE, lower_plain),
    op("conv", 0x48, PRIM, lower_type_operand),
    op("jmp", 0x50, LABEL, lower_branch),
    op("jt", 0x51, LABEL, lower_branch),
    op("jf", 0x52, LABEL, lower_branch),
    op("jfl", 0x53, FLAG_LABEL, lower_flag_branch),
    op("jnfl", 0x54, FLAG_LABEL, lower_flag_branch),
    op("call", 0x60, METHOD, lower_call),
    op("callx", 0x61, FUNCTION, lower_call_external),
    op("ret", 0x62, NONE, lower_plain),
    op("throw", 0x63, NONE, lower_plain),
    op("cmp", 0x70, NONE, lower_compare_stack),
    op("cmp", 0x71, REG_REG, lower_compare_registers),
    ext("kbhit", PARENT_HOST, 0x00, NONE, lower_plain),
    ext("rdkey", PARENT_HOST, 0x01, NONE, lower_plain),
    ext("rdln", PARENT_HOST, 0x02, NONE, lower_plain),
    ext("stind", PARENT_HOST, 0x03, NONE, lower_plain),
    ext("tostr", PARENT_CONVERT, 0x00, NONE, lower_plain),
    ext("tostr", PARENT_CONVERT, 0x01, FORMAT, lower_format),
];

pub fn standard_defs() -> Vec<OpcodeDef> {
    STANDARD.to_vec()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::scanner::Literal;
    use crate::core::symbols::ResolverScope;
    use crate::opcodes::args::ArgToken;
    use crate::opcodes::operand::{Constant, Register};
    use crate::opcodes::OpcodeRegistry;

    fn raw(token: ArgToken) -> RawArg {
        RawArg { token, column: 1 }
    }

    fn ctx() -> ArgContext<'static> {
        ArgContext {
            scope: Arc::new(ResolverScope::default()),
            file: Arc::from("t.casm"),
            line: 1,
            params: &[],
            locals: &[],
            locals_declared: true,
            labels: &[],
            implicit_locals: Vec::new(),
        }
    }

    #[test]
    fn ldc_rejects_constants_the_register_cannot_hold() {
        let registry = OpcodeRegistry::standard().unwrap();
        let ldc = registry.candidates("ldc", 2)[0];
        let reg = raw(ArgToken::Name { text: "sa".into(), dims: 0 });
        let good = raw(ArgToken::Literal(Literal::Str("hi".into())));
        let bad = raw(ArgToken::Literal(Literal::Int(3)));
        let ops = (ldc.parse)(ldc, &[reg.clone(), good], &mut ctx()).unwrap();
        assert_eq!(
            ops,
            vec![Operand::Register(Register::Sa), Operand::Const(Constant::Str("hi".into()))]
        );
        let err = (ldc.parse)(ldc, &[reg, bad], &mut ctx()).unwrap_err();
        assert!(err.contains("cannot be loaded into register sa"), "{err}");
    }

    #[test]
    fn encode_checks_operand_shapes() {
        let registry = OpcodeRegistry::standard().unwrap();
        let setf = registry.candidates("setf", 1)[0];
        let mut out = Vec::new();
        let err = (setf.encode)(
            setf,
            &[Operand::Register(Register::Ra)],
            &mut out,
            &mut StringHeap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CodecError::OperandMismatch { .. }));
    }

    #[test]
    fn decode_rejects_wrong_operand_count() {
        let registry = OpcodeRegistry::standard().unwrap();
        let add = registry.candidates("add", 0)[0];
        let bytes = [1u8, 7, 0];
        let mut cur = Decoder::new(&bytes, "code");
        let err = (add.decode)(add, &mut cur, &StringHeap::new()).unwrap_err();
        assert_eq!(err.code(), "CPB013");
    }

    #[test]
    fn every_mnemonic_has_distinct_arities_or_ordered_overloads() {
        let registry = OpcodeRegistry::standard().unwrap();
        assert_eq!(registry.len(), STANDARD.len());
        for def in registry.iter() {
            assert!(!def.mnemonic.is_empty());
            assert!(registry.get(def.id).is_some());
        }
    }
}
