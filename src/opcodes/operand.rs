// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Operand values and their self-describing binary encoding.

use std::fmt;

use crate::bytecode::codec::{write_u16, write_u32, CodecError, Decoder};
use crate::core::model::TypeSpec;
use crate::core::string_heap::StringHeap;
use crate::core::symbols::{Reference, Symbol, SymbolKind};

/// Operand discriminator bytes.
pub const OPND_CONST: u8 = 1;
pub const OPND_TYPE: u8 = 2;
pub const OPND_NULL_TYPE: u8 = 3;
pub const OPND_FIELD: u8 = 4;
pub const OPND_METHOD: u8 = 5;
pub const OPND_REGISTER: u8 = 6;
pub const OPND_FLAG: u8 = 7;
pub const OPND_LABEL: u8 = 8;
pub const OPND_VAR: u8 = 9;
pub const OPND_FUNCTION: u8 = 10;

const CONST_I32: u8 = 1;
const CONST_I64: u8 = 2;
const CONST_F64: u8 = 3;
const CONST_BOOL: u8 = 4;
const CONST_CHAR: u8 = 5;
const CONST_STR: u8 = 6;
const CONST_NULL: u8 = 7;

/// Register class, which decides what a register can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    Int,
    Float,
    Str,
    Exception,
    Flags,
    Index,
}

/// Named registers of the source machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Ra,
    Rb,
    Rc,
    Rd,
    Fa,
    Fb,
    Sa,
    Sb,
    Ex,
    Fl,
    Ix,
    Iy,
}

const REGISTERS: &[(Register, &str, RegisterClass)] = &[
    (Register::Ra, "ra", RegisterClass::Int),
    (Register::Rb, "rb", RegisterClass::Int),
    (Register::Rc, "rc", RegisterClass::Int),
    (Register::Rd, "rd", RegisterClass::Int),
    (Register::Fa, "fa", RegisterClass::Float),
    (Register::Fb, "fb", RegisterClass::Float),
    (Register::Sa, "sa", RegisterClass::Str),
    (Register::Sb, "sb", RegisterClass::Str),
    (Register::Ex, "ex", RegisterClass::Exception),
    (Register::Fl, "fl", RegisterClass::Flags),
    (Register::Ix, "ix", RegisterClass::Index),
    (Register::Iy, "iy", RegisterClass::Index),
];

impl Register {
    pub fn parse(name: &str) -> Option<Self> {
        REGISTERS
            .iter()
            .find(|(_, text, _)| *text == name)
            .map(|(reg, _, _)| *reg)
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        REGISTERS.get(value as usize).map(|(reg, _, _)| *reg)
    }

    pub fn code(self) -> u8 {
        REGISTERS
            .iter()
            .position(|(reg, _, _)| *reg == self)
            .unwrap_or_default() as u8
    }

    pub fn name(self) -> &'static str {
        REGISTERS[self.code() as usize].1
    }

    pub fn class(self) -> RegisterClass {
        REGISTERS[self.code() as usize].2
    }

    pub fn is_index(self) -> bool {
        self.class() == RegisterClass::Index
    }
}

/// Named boolean flags of the source machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Zero,
    Carry,
    Overflow,
    Sign,
    Equal,
    Less,
    Greater,
}

const FLAGS: &[(Flag, &str)] = &[
    (Flag::Zero, "zf"),
    (Flag::Carry, "cf"),
    (Flag::Overflow, "of"),
    (Flag::Sign, "sf"),
    (Flag::Equal, "eq"),
    (Flag::Less, "lt"),
    (Flag::Greater, "gt"),
];

impl Flag {
    pub fn parse(name: &str) -> Option<Self> {
        FLAGS
            .iter()
            .find(|(_, text)| *text == name)
            .map(|(flag, _)| *flag)
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        FLAGS.get(value as usize).map(|(flag, _)| *flag)
    }

    pub fn code(self) -> u8 {
        FLAGS
            .iter()
            .position(|(flag, _)| *flag == self)
            .unwrap_or_default() as u8
    }

    pub fn name(self) -> &'static str {
        FLAGS[self.code() as usize].1
    }
}

/// Constant-by-value operand.
#[derive(Debug, Clone)]
pub enum Constant {
    I32(i32),
    I64(i64),
    F64(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::I32(a), Constant::I32(b)) => a == b,
            (Constant::I64(a), Constant::I64(b)) => a == b,
            (Constant::F64(a), Constant::F64(b)) => a.to_bits() == b.to_bits(),
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Char(a), Constant::Char(b)) => a == b,
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Null, Constant::Null) => true,
            _ => false,
        }
    }
}

impl Constant {
    pub fn is_integral(&self) -> bool {
        matches!(self, Constant::I32(_) | Constant::I64(_))
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::I32(value) => write!(f, "{value}"),
            Constant::I64(value) => write!(f, "{value}"),
            Constant::F64(value) => write!(f, "{value:?}"),
            Constant::Bool(value) => write!(f, "{value}"),
            Constant::Char(value) => write!(f, "{value:?}"),
            Constant::Str(value) => write!(f, "{value:?}"),
            Constant::Null => f.write_str("null"),
        }
    }
}

/// Reference to a labelled position.
///
/// `index` is the label's slot in the method label table; `target` is the
/// instruction index it marks, filled once the method is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelRef {
    pub index: u16,
    pub target: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Arg = 0,
    Local = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef {
    pub kind: VarKind,
    pub slot: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Const(Constant),
    Type(TypeSpec),
    NullType,
    Field(Reference),
    Method(Reference),
    Register(Register),
    Flag(Flag),
    Label(LabelRef),
    Var(VarRef),
    FunctionId(String),
}

impl Operand {
    pub fn discriminator(&self) -> u8 {
        match self {
            Operand::Const(_) => OPND_CONST,
            Operand::Type(_) => OPND_TYPE,
            Operand::NullType => OPND_NULL_TYPE,
            Operand::Field(_) => OPND_FIELD,
            Operand::Method(_) => OPND_METHOD,
            Operand::Register(_) => OPND_REGISTER,
            Operand::Flag(_) => OPND_FLAG,
            Operand::Label(_) => OPND_LABEL,
            Operand::Var(_) => OPND_VAR,
            Operand::FunctionId(_) => OPND_FUNCTION,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        discriminator_name(self.discriminator())
    }
}

pub fn discriminator_name(tag: u8) -> &'static str {
    match tag {
        OPND_CONST => "constant",
        OPND_TYPE => "type",
        OPND_NULL_TYPE => "null type",
        OPND_FIELD => "field",
        OPND_METHOD => "method",
        OPND_REGISTER => "register",
        OPND_FLAG => "flag",
        OPND_LABEL => "label",
        OPND_VAR => "variable",
        OPND_FUNCTION => "function id",
        _ => "unknown",
    }
}

pub(crate) fn write_symbol(
    out: &mut Vec<u8>,
    heap: &mut StringHeap,
    reference: &Reference,
) -> Result<(), CodecError> {
    let symbol = reference
        .resolved()
        .ok_or_else(|| CodecError::UnresolvedReference {
            name: reference.display_name().to_string(),
        })?;
    out.push(symbol.kind as u8);
    write_u32(out, heap.intern(&symbol.name));
    Ok(())
}

pub(crate) fn read_symbol(cur: &mut Decoder<'_>, heap: &StringHeap) -> Result<Symbol, CodecError> {
    let raw_kind = cur.read_u8()?;
    let kind = SymbolKind::from_u8(raw_kind).ok_or_else(|| cur.invalid(format!(
        "unknown symbol kind {raw_kind}"
    )))?;
    let name = cur.read_heap_string(heap)?;
    Ok(Symbol::new(kind, name))
}

pub(crate) fn write_type_spec(
    out: &mut Vec<u8>,
    heap: &mut StringHeap,
    spec: &TypeSpec,
) -> Result<(), CodecError> {
    write_symbol(out, heap, &spec.reference)?;
    out.push(spec.dims);
    Ok(())
}

pub(crate) fn read_type_spec(
    cur: &mut Decoder<'_>,
    heap: &StringHeap,
) -> Result<TypeSpec, CodecError> {
    let symbol = read_symbol(cur, heap)?;
    let dims = cur.read_u8()?;
    Ok(TypeSpec::new(Reference::Resolved(symbol), dims))
}

/// Append one operand: discriminator byte then payload.
pub fn encode_operand(
    out: &mut Vec<u8>,
    heap: &mut StringHeap,
    operand: &Operand,
) -> Result<(), CodecError> {
    out.push(operand.discriminator());
    match operand {
        Operand::Const(constant) => encode_constant(out, heap, constant),
        Operand::Type(spec) => write_type_spec(out, heap, spec)?,
        Operand::NullType => {}
        Operand::Field(reference) | Operand::Method(reference) => {
            write_symbol(out, heap, reference)?
        }
        Operand::Register(reg) => out.push(reg.code()),
        Operand::Flag(flag) => out.push(flag.code()),
        Operand::Label(label) => write_u16(out, label.index),
        Operand::Var(var) => {
            out.push(var.kind as u8);
            write_u16(out, var.slot);
        }
        Operand::FunctionId(name) => write_u32(out, heap.intern(name)),
    }
    Ok(())
}

fn encode_constant(out: &mut Vec<u8>, heap: &mut StringHeap, constant: &Constant) {
    match constant {
        Constant::I32(value) => {
            out.push(CONST_I32);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Constant::I64(value) => {
            out.push(CONST_I64);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Constant::F64(value) => {
            out.push(CONST_F64);
            out.extend_from_slice(&value.to_bits().to_le_bytes());
        }
        Constant::Bool(value) => {
            out.push(CONST_BOOL);
            out.push(u8::from(*value));
        }
        Constant::Char(value) => {
            out.push(CONST_CHAR);
            write_u32(out, *value as u32);
        }
        Constant::Str(value) => {
            out.push(CONST_STR);
            write_u32(out, heap.intern(value));
        }
        Constant::Null => out.push(CONST_NULL),
    }
}

/// Read one operand written by [`encode_operand`].
pub fn decode_operand(cur: &mut Decoder<'_>, heap: &StringHeap) -> Result<Operand, CodecError> {
    let tag = cur.read_u8()?;
    let operand = match tag {
        OPND_CONST => Operand::Const(decode_constant(cur, heap)?),
        OPND_TYPE => Operand::Type(read_type_spec(cur, heap)?),
        OPND_NULL_TYPE => Operand::NullType,
        OPND_FIELD => Operand::Field(Reference::Resolved(read_symbol(cur, heap)?)),
        OPND_METHOD => Operand::Method(Reference::Resolved(read_symbol(cur, heap)?)),
        OPND_REGISTER => {
            let raw = cur.read_u8()?;
            Operand::Register(
                Register::from_u8(raw)
                    .ok_or_else(|| cur.invalid(format!("unknown register {raw}")))?,
            )
        }
        OPND_FLAG => {
            let raw = cur.read_u8()?;
            Operand::Flag(
                Flag::from_u8(raw).ok_or_else(|| cur.invalid(format!("unknown flag {raw}")))?,
            )
        }
        OPND_LABEL => Operand::Label(LabelRef {
            index: cur.read_u16()?,
            target: None,
        }),
        OPND_VAR => {
            let kind = match cur.read_u8()? {
                0 => VarKind::Arg,
                1 => VarKind::Local,
                other => return Err(cur.invalid(format!("unknown variable kind {other}"))),
            };
            Operand::Var(VarRef {
                kind,
                slot: cur.read_u16()?,
            })
        }
        OPND_FUNCTION => Operand::FunctionId(cur.read_heap_string(heap)?),
        other => return Err(CodecError::UnknownOperand { found: other }),
    };
    Ok(operand)
}

fn decode_constant(cur: &mut Decoder<'_>, heap: &StringHeap) -> Result<Constant, CodecError> {
    let kind = cur.read_u8()?;
    let constant = match kind {
        CONST_I32 => Constant::I32(cur.read_u32()? as i32),
        CONST_I64 => Constant::I64(cur.read_u64()? as i64),
        CONST_F64 => Constant::F64(f64::from_bits(cur.read_u64()?)),
        CONST_BOOL => Constant::Bool(cur.read_u8()? != 0),
        CONST_CHAR => {
            let raw = cur.read_u32()?;
            Constant::Char(
                char::from_u32(raw)
                    .ok_or_else(|| cur.invalid(format!("invalid char scalar {raw:#X}")))?,
            )
        }
        CONST_STR => Constant::Str(cur.read_heap_string(heap)?),
        CONST_NULL => Constant::Null,
        other => return Err(cur.invalid(format!("unknown constant kind {other}"))),
    };
    Ok(constant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(operand: &Operand) -> Operand {
        let mut heap = StringHeap::new();
        let mut out = Vec::new();
        encode_operand(&mut out, &mut heap, operand).expect("encode");
        let mut cur = Decoder::new(&out, "operand");
        let decoded = decode_operand(&mut cur, &heap).expect("decode");
        cur.finish().expect("no trailing bytes");
        decoded
    }

    #[test]
    fn register_and_flag_tables_are_consistent() {
        for (reg, name, _) in REGISTERS {
            assert_eq!(Register::parse(name), Some(*reg));
            assert_eq!(Register::from_u8(reg.code()), Some(*reg));
            assert_eq!(reg.name(), *name);
        }
        for (flag, name) in FLAGS {
            assert_eq!(Flag::parse(name), Some(*flag));
            assert_eq!(Flag::from_u8(flag.code()), Some(*flag));
        }
        assert!(Register::Iy.is_index());
        assert!(!Register::Ra.is_index());
    }

    #[test]
    fn pending_reference_cannot_be_encoded() {
        use crate::core::symbols::{PendingRef, RefKind, ResolverScope, SourceLoc};
        use std::sync::Arc;
        let operand = Operand::Field(Reference::Pending(PendingRef {
            name: "count".to_string(),
            expect: RefKind::Field,
            scope: Arc::new(ResolverScope::default()),
            origin: SourceLoc::new(Arc::from("a.casm"), 3, None),
        }));
        let err = encode_operand(&mut Vec::new(), &mut StringHeap::new(), &operand).unwrap_err();
        assert!(matches!(err, CodecError::UnresolvedReference { ref name } if name == "count"));
    }

    #[test]
    fn unknown_discriminator_is_rejected() {
        let heap = StringHeap::new();
        let mut cur = Decoder::new(&[0x7F], "operand");
        let err = decode_operand(&mut cur, &heap).unwrap_err();
        assert!(matches!(err, CodecError::UnknownOperand { found: 0x7F }));
    }

    #[test]
    fn label_operand_drops_patched_target() {
        let decoded = round_trip(&Operand::Label(LabelRef {
            index: 3,
            target: Some(12),
        }));
        assert_eq!(decoded, Operand::Label(LabelRef { index: 3, target: None }));
    }

    fn constant_strategy() -> impl Strategy<Value = Constant> {
        prop_oneof![
            any::<i32>().prop_map(Constant::I32),
            any::<i64>().prop_map(Constant::I64),
            any::<f64>().prop_map(Constant::F64),
            any::<bool>().prop_map(Constant::Bool),
            any::<char>().prop_map(Constant::Char),
            ".{0,12}".prop_map(Constant::Str),
            Just(Constant::Null),
        ]
    }

    proptest! {
        #[test]
        fn constants_survive_encoding_bit_for_bit(constant in constant_strategy()) {
            let decoded = round_trip(&Operand::Const(constant.clone()));
            prop_assert_eq!(decoded, Operand::Const(constant));
        }
    }
}
