// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Lowering functions referenced from the opcode table.

use crate::codegen::emit::{add_scratch_local, MethodEmitter};
use crate::codegen::ir::{IrMethod, IrOp, IrType};
use crate::codegen::runtime::{register_type, Routine};
use crate::codegen::CodegenError;
use crate::core::patch::PatchKey;
use crate::opcodes::{Constant, OpcodeDef, Operand, Register, RegisterClass, VarKind};

fn bad_operands(def: &OpcodeDef, em: &MethodEmitter<'_>) -> CodegenError {
    CodegenError::BadOperands {
        method: em.method_name().to_string(),
        mnemonic: def.mnemonic,
        index: em.cursor(),
    }
}

fn constant_op(constant: &Constant, em: &mut MethodEmitter<'_>) -> IrOp {
    match constant {
        Constant::I32(value) => IrOp::LdcI4(*value),
        Constant::I64(value) => IrOp::LdcI8(*value),
        Constant::F64(value) => IrOp::LdcR8(*value),
        Constant::Bool(value) => IrOp::LdcBool(*value),
        Constant::Char(value) => IrOp::LdcChar(*value),
        Constant::Str(text) => IrOp::LdStr(em.intern(text)),
        Constant::Null => IrOp::LdNull,
    }
}

/// Constant converted to a register's host storage type.
fn register_constant_op(
    constant: &Constant,
    reg: Register,
    em: &mut MethodEmitter<'_>,
) -> IrOp {
    match (register_type(reg), constant) {
        (IrType::I64, Constant::I32(value)) => IrOp::LdcI8(i64::from(*value)),
        (IrType::I64, Constant::Bool(value)) => IrOp::LdcI8(i64::from(*value)),
        (IrType::I64, Constant::Char(value)) => IrOp::LdcI8(i64::from(u32::from(*value))),
        (IrType::F64, Constant::I32(value)) => IrOp::LdcR8(f64::from(*value)),
        (IrType::F64, Constant::I64(value)) => IrOp::LdcR8(*value as f64),
        _ => constant_op(constant, em),
    }
}

/// Zero-operand instructions with a fixed IR counterpart.
pub fn lower_plain(
    def: &OpcodeDef,
    _operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let op = match def.mnemonic {
        "nop" => IrOp::Nop,
        "pop" => IrOp::Pop,
        "dup" => IrOp::Dup,
        "add" => IrOp::Add,
        "sub" => IrOp::Sub,
        "mul" => IrOp::Mul,
        "div" => IrOp::Div,
        "rem" => IrOp::Rem,
        "neg" => IrOp::Neg,
        "and" => IrOp::And,
        "or" => IrOp::Or,
        "xor" => IrOp::Xor,
        "not" => IrOp::Not,
        "shl" => IrOp::Shl,
        "shr" => IrOp::Shr,
        "ldlen" => IrOp::LdLen,
        "ldnull" => IrOp::LdNull,
        "ret" => IrOp::Ret,
        "throw" => IrOp::Throw,
        "kbhit" => IrOp::CallRuntime(Routine::KeyAvailable),
        "rdkey" => IrOp::CallRuntime(Routine::ReadKey),
        "rdln" => IrOp::CallRuntime(Routine::ReadLine),
        "stind" => IrOp::CallRuntime(Routine::IndirectStore),
        "tostr" => IrOp::CallRuntime(Routine::ToString),
        _ => return Err(bad_operands(def, em)),
    };
    em.emit(op);
    Ok(())
}

pub fn lower_load_constant(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Register(reg), Operand::Const(constant)] = operands else {
        return Err(bad_operands(def, em));
    };
    let op = register_constant_op(constant, *reg, em);
    em.emit(op);
    em.emit(IrOp::StoreRegister(*reg));
    Ok(())
}

pub fn lower_push(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    match operands {
        [Operand::Register(reg)] => em.emit(IrOp::LoadRegister(*reg)),
        [Operand::Const(constant)] => {
            let op = constant_op(constant, em);
            em.emit(op);
        }
        _ => return Err(bad_operands(def, em)),
    }
    Ok(())
}

pub fn lower_pop_register(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Register(reg)] = operands else {
        return Err(bad_operands(def, em));
    };
    em.emit(IrOp::StoreRegister(*reg));
    Ok(())
}

/// `inc`, `dec` and `clr`.
pub fn lower_register_update(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Register(reg)] = operands else {
        return Err(bad_operands(def, em));
    };
    let reg = *reg;
    let float = reg.class() == RegisterClass::Float;
    let one = if float { IrOp::LdcR8(1.0) } else { IrOp::LdcI8(1) };
    match def.mnemonic {
        "inc" | "dec" => {
            em.emit(IrOp::LoadRegister(reg));
            em.emit(one);
            em.emit(if def.mnemonic == "inc" { IrOp::Add } else { IrOp::Sub });
        }
        "clr" => em.emit(match reg.class() {
            RegisterClass::Float => IrOp::LdcR8(0.0),
            RegisterClass::Str | RegisterClass::Exception => IrOp::LdNull,
            _ => IrOp::LdcI8(0),
        }),
        _ => return Err(bad_operands(def, em)),
    }
    em.emit(IrOp::StoreRegister(reg));
    Ok(())
}

pub fn lower_field(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Field(reference)] = operands else {
        return Err(bad_operands(def, em));
    };
    let symbol = em.symbol(reference)?.clone();
    let ty = em.info().field_type(&symbol.name);
    let field = em.import(&symbol);
    let op = match def.mnemonic {
        "ldfd" => IrOp::LdFld { field, ty },
        "ldfda" => IrOp::LdFldA { field, ty },
        "stfd" => IrOp::StFld(field),
        "ldsfd" => IrOp::LdSFld { field, ty },
        "ldsfda" => IrOp::LdSFldA { field, ty },
        "stsfd" => IrOp::StSFld(field),
        _ => return Err(bad_operands(def, em)),
    };
    em.emit(op);
    Ok(())
}

pub fn lower_variable(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Var(var)] = operands else {
        return Err(bad_operands(def, em));
    };
    let slot = var.slot;
    let op = match (def.mnemonic, var.kind) {
        ("ldrg", VarKind::Arg) => IrOp::LdArg(slot),
        ("ldrga", VarKind::Arg) => IrOp::LdArgA(slot),
        ("strg", VarKind::Arg) => IrOp::StArg(slot),
        ("ldlc", VarKind::Local) => IrOp::LdLoc(slot),
        ("ldlca", VarKind::Local) => IrOp::LdLocA(slot),
        ("stlc", VarKind::Local) => IrOp::StLoc(slot),
        _ => return Err(bad_operands(def, em)),
    };
    em.emit(op);
    Ok(())
}

/// Array element access indexed by `ix` or `iy`.
pub fn lower_element(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Register(reg)] = operands else {
        return Err(bad_operands(def, em));
    };
    let checked = !em.options().unsafe_codegen;
    let op = match def.mnemonic {
        "ldel" => IrOp::LdElem { checked },
        "ldela" => IrOp::LdElemA { checked },
        "stel" => IrOp::StElem { checked },
        _ => return Err(bad_operands(def, em)),
    };
    em.emit(IrOp::LoadRegister(*reg));
    em.emit(op);
    Ok(())
}

pub fn lower_flag(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Flag(flag)] = operands else {
        return Err(bad_operands(def, em));
    };
    match def.mnemonic {
        "setf" | "clrf" => {
            em.emit(IrOp::LdcBool(def.mnemonic == "setf"));
            em.emit(IrOp::WriteFlag(*flag));
        }
        "ldfl" => em.emit(IrOp::ReadFlag(*flag)),
        _ => return Err(bad_operands(def, em)),
    }
    Ok(())
}

pub fn lower_type_operand(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let ty = match operands {
        [Operand::Type(spec)] => {
            let symbol = em.symbol(&spec.reference)?.clone();
            em.import(&symbol);
            Some(em.ir_type(spec))
        }
        [Operand::NullType] if def.mnemonic == "ldtype" => None,
        _ => return Err(bad_operands(def, em)),
    };
    let op = match (def.mnemonic, ty) {
        ("ldtype", ty) => IrOp::LdToken(ty),
        ("newobj", Some(ty)) => IrOp::NewObj(ty),
        ("newarr", Some(ty)) => IrOp::NewArr(ty),
        ("box", Some(ty)) => IrOp::Box(ty),
        ("unbox", Some(ty)) => IrOp::Unbox(ty),
        ("isinst", Some(ty)) => IrOp::IsInst(ty),
        ("cast", Some(ty)) => IrOp::CastClass(ty),
        ("conv", Some(ty)) => IrOp::Conv(ty),
        _ => return Err(bad_operands(def, em)),
    };
    em.emit(op);
    Ok(())
}

pub fn lower_branch(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Label(label)] = operands else {
        return Err(bad_operands(def, em));
    };
    let op = match def.mnemonic {
        "jmp" => IrOp::Br(label.index),
        "jt" => IrOp::BrTrue(label.index),
        "jf" => IrOp::BrFalse(label.index),
        _ => return Err(bad_operands(def, em)),
    };
    em.emit(op);
    Ok(())
}

pub fn lower_flag_branch(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Flag(flag), Operand::Label(label)] = operands else {
        return Err(bad_operands(def, em));
    };
    em.emit(IrOp::ReadFlag(*flag));
    em.emit(match def.mnemonic {
        "jfl" => IrOp::BrTrue(label.index),
        _ => IrOp::BrFalse(label.index),
    });
    Ok(())
}

pub fn lower_call(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Method(reference)] = operands else {
        return Err(bad_operands(def, em));
    };
    let symbol = em.symbol(reference)?.clone();
    let signature = em.info().signature(&symbol.name);
    let method = em.import(&symbol);
    em.emit(IrOp::Call {
        method,
        args: signature.params,
        has_this: !signature.is_static,
        ret: signature.ret,
    });
    Ok(())
}

pub fn lower_call_external(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::FunctionId(name)] = operands else {
        return Err(bad_operands(def, em));
    };
    let idx = em.intern(name);
    em.emit(IrOp::CallExternal(idx));
    Ok(())
}

pub fn lower_format(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Const(Constant::Str(format))] = operands else {
        return Err(bad_operands(def, em));
    };
    let idx = em.intern(format);
    em.emit(IrOp::LdStr(idx));
    em.emit(IrOp::CallRuntime(Routine::ToStringFormatted));
    Ok(())
}

pub fn lower_compare_registers(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    let [Operand::Register(lhs), Operand::Register(rhs)] = operands else {
        return Err(bad_operands(def, em));
    };
    for reg in [*lhs, *rhs] {
        em.emit(IrOp::LoadRegister(reg));
        let ty = register_type(reg);
        if ty.is_value_type() {
            em.emit(IrOp::Box(ty));
        }
    }
    em.emit(IrOp::CallRuntime(Routine::Compare));
    Ok(())
}

/// `cmp` on the two topmost stack values.
///
/// The operand types are only known once the surrounding code exists, so
/// this emits a placeholder and finishes the job in a patch.
pub fn lower_compare_stack(
    def: &OpcodeDef,
    operands: &[Operand],
    em: &mut MethodEmitter<'_>,
) -> Result<(), CodegenError> {
    if !operands.is_empty() {
        return Err(bad_operands(def, em));
    }
    let position = em.position();
    em.emit(IrOp::Pending(Routine::Compare));
    em.defer(PatchKey::new(position, 0), move |method: &mut IrMethod| {
        patch_compare(method, position as usize)
    });
    Ok(())
}

/// Replace the placeholder at `position` with boxing and a compare call.
pub fn patch_compare(method: &mut IrMethod, position: usize) -> Result<(), CodegenError> {
    if method.ops.get(position) != Some(&IrOp::Pending(Routine::Compare)) {
        return Err(CodegenError::PatchTarget {
            method: method.name.clone(),
            position,
        });
    }
    let stack = method.stack_types_at(position);
    let rhs = stack.last().cloned().unwrap_or(IrType::Unknown);
    let lhs = stack
        .len()
        .checked_sub(2)
        .and_then(|idx| stack.get(idx))
        .cloned()
        .unwrap_or(IrType::Unknown);

    let mut splice = Vec::new();
    if lhs.is_value_type() {
        let scratch = add_scratch_local(method, rhs.clone())?;
        splice.push(IrOp::StLoc(scratch));
        splice.push(IrOp::Box(lhs));
        splice.push(IrOp::LdLoc(scratch));
    }
    if rhs.is_value_type() {
        splice.push(IrOp::Box(rhs));
    }
    splice.push(IrOp::CallRuntime(Routine::Compare));
    method.ops.splice(position..position + 1, splice);
    Ok(())
}
