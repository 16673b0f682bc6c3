// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Target IR: a typed stack-machine instruction set.

use std::fmt;

use crate::codegen::runtime::{register_type, Routine};
use crate::core::string_heap::StringHeap;
use crate::core::symbols::Symbol;
use crate::opcodes::{Flag, Register};

/// Index into a module's imported symbol table.
pub type SymbolId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    Bool,
    Char,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Str,
    Obj,
    Class(String),
    Struct(String),
    Array(Box<IrType>),
    ByRef(Box<IrType>),
    Unknown,
}

impl IrType {
    pub fn from_primitive(name: &str) -> Option<Self> {
        let ty = match name {
            "void" => IrType::Void,
            "bool" => IrType::Bool,
            "char" => IrType::Char,
            "i8" => IrType::I8,
            "i16" => IrType::I16,
            "i32" => IrType::I32,
            "i64" => IrType::I64,
            "u8" => IrType::U8,
            "u16" => IrType::U16,
            "u32" => IrType::U32,
            "u64" => IrType::U64,
            "f32" => IrType::F32,
            "f64" => IrType::F64,
            "str" => IrType::Str,
            "obj" => IrType::Obj,
            _ => return None,
        };
        Some(ty)
    }

    /// Whether a value of this type must be boxed to be passed as `obj`.
    pub fn is_value_type(&self) -> bool {
        !matches!(
            self,
            IrType::Str
                | IrType::Obj
                | IrType::Class(_)
                | IrType::Array(_)
                | IrType::ByRef(_)
                | IrType::Void
                | IrType::Unknown
        )
    }

    pub fn array_of(self, dims: u8) -> Self {
        (0..dims).fold(self, |ty, _| IrType::Array(Box::new(ty)))
    }

    pub fn element(&self) -> IrType {
        match self {
            IrType::Array(inner) => (**inner).clone(),
            _ => IrType::Unknown,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => f.write_str("void"),
            IrType::Bool => f.write_str("bool"),
            IrType::Char => f.write_str("char"),
            IrType::I8 => f.write_str("i8"),
            IrType::I16 => f.write_str("i16"),
            IrType::I32 => f.write_str("i32"),
            IrType::I64 => f.write_str("i64"),
            IrType::U8 => f.write_str("u8"),
            IrType::U16 => f.write_str("u16"),
            IrType::U32 => f.write_str("u32"),
            IrType::U64 => f.write_str("u64"),
            IrType::F32 => f.write_str("f32"),
            IrType::F64 => f.write_str("f64"),
            IrType::Str => f.write_str("str"),
            IrType::Obj => f.write_str("obj"),
            IrType::Class(name) => write!(f, "class {name}"),
            IrType::Struct(name) => write!(f, "valuetype {name}"),
            IrType::Array(inner) => write!(f, "{inner}[]"),
            IrType::ByRef(inner) => write!(f, "{inner}&"),
            IrType::Unknown => f.write_str("?"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    Nop,
    LdcI4(i32),
    LdcI8(i64),
    LdcR8(f64),
    LdcBool(bool),
    LdcChar(char),
    /// String constant by module heap index.
    LdStr(u32),
    LdNull,
    Dup,
    Pop,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    LdArg(u16),
    LdArgA(u16),
    StArg(u16),
    LdLoc(u16),
    LdLocA(u16),
    StLoc(u16),
    LdFld { field: SymbolId, ty: IrType },
    LdFldA { field: SymbolId, ty: IrType },
    StFld(SymbolId),
    LdSFld { field: SymbolId, ty: IrType },
    LdSFldA { field: SymbolId, ty: IrType },
    StSFld(SymbolId),
    /// Stack: array, index.
    LdElem { checked: bool },
    LdElemA { checked: bool },
    /// Stack: array, value, index.
    StElem { checked: bool },
    LdLen,
    NewObj(IrType),
    NewArr(IrType),
    Box(IrType),
    Unbox(IrType),
    IsInst(IrType),
    CastClass(IrType),
    LdToken(Option<IrType>),
    Conv(IrType),
    MarkLabel(u16),
    Br(u16),
    BrTrue(u16),
    BrFalse(u16),
    Call {
        method: SymbolId,
        args: u16,
        has_this: bool,
        ret: IrType,
    },
    /// Opaque host function by module heap index.
    CallExternal(u32),
    Ret,
    Throw,
    LoadRegister(Register),
    StoreRegister(Register),
    ReadFlag(Flag),
    WriteFlag(Flag),
    CallRuntime(Routine),
    /// Placeholder for a runtime call whose argument handling is patched in
    /// later. Has the routine's stack effect.
    Pending(Routine),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrLocal {
    pub name: String,
    pub ty: IrType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrMethod {
    /// Canonical `Type.method` name.
    pub name: String,
    pub is_static: bool,
    pub params: Vec<IrLocal>,
    pub locals: Vec<IrLocal>,
    pub ret: IrType,
    pub ops: Vec<IrOp>,
    pub inline_hint: bool,
}

impl IrMethod {
    pub fn new(name: impl Into<String>, is_static: bool, ret: IrType) -> Self {
        Self {
            name: name.into(),
            is_static,
            params: Vec::new(),
            locals: Vec::new(),
            ret,
            ops: Vec::new(),
            inline_hint: false,
        }
    }

    /// Stack types after running `ops[..end]` straight through.
    ///
    /// Branches are not followed; values popped from an empty stack are
    /// [`IrType::Unknown`].
    pub fn stack_types_at(&self, end: usize) -> Vec<IrType> {
        let mut stack: Vec<IrType> = Vec::new();
        let end = end.min(self.ops.len());
        for op in &self.ops[..end] {
            self.step(op, &mut stack);
        }
        stack
    }

    fn step(&self, op: &IrOp, stack: &mut Vec<IrType>) {
        fn pop(stack: &mut Vec<IrType>) -> IrType {
            stack.pop().unwrap_or(IrType::Unknown)
        }
        fn drop_n(stack: &mut Vec<IrType>, n: usize) {
            let keep = stack.len().saturating_sub(n);
            stack.truncate(keep);
        }
        let var_type = |vars: &[IrLocal], slot: u16| {
            vars.get(slot as usize)
                .map_or(IrType::Unknown, |var| var.ty.clone())
        };
        match op {
            IrOp::Nop | IrOp::MarkLabel(_) | IrOp::Br(_) | IrOp::CallExternal(_) => {}
            IrOp::LdcI4(_) => stack.push(IrType::I32),
            IrOp::LdcI8(_) => stack.push(IrType::I64),
            IrOp::LdcR8(_) => stack.push(IrType::F64),
            IrOp::LdcBool(_) => stack.push(IrType::Bool),
            IrOp::LdcChar(_) => stack.push(IrType::Char),
            IrOp::LdStr(_) => stack.push(IrType::Str),
            IrOp::LdNull | IrOp::LdToken(_) => stack.push(IrType::Obj),
            IrOp::Dup => {
                let top = stack.last().cloned().unwrap_or(IrType::Unknown);
                stack.push(top);
            }
            IrOp::Pop
            | IrOp::StArg(_)
            | IrOp::StLoc(_)
            | IrOp::StSFld(_)
            | IrOp::BrTrue(_)
            | IrOp::BrFalse(_)
            | IrOp::Throw
            | IrOp::StoreRegister(_)
            | IrOp::WriteFlag(_) => drop_n(stack, 1),
            IrOp::Add
            | IrOp::Sub
            | IrOp::Mul
            | IrOp::Div
            | IrOp::Rem
            | IrOp::And
            | IrOp::Or
            | IrOp::Xor
            | IrOp::Shl
            | IrOp::Shr => {
                pop(stack);
                let lhs = pop(stack);
                stack.push(lhs);
            }
            IrOp::Neg | IrOp::Not => {
                let value = pop(stack);
                stack.push(value);
            }
            IrOp::LdArg(slot) => stack.push(var_type(&self.params, *slot)),
            IrOp::LdArgA(slot) => stack.push(IrType::ByRef(Box::new(var_type(&self.params, *slot)))),
            IrOp::LdLoc(slot) => stack.push(var_type(&self.locals, *slot)),
            IrOp::LdLocA(slot) => stack.push(IrType::ByRef(Box::new(var_type(&self.locals, *slot)))),
            IrOp::LdFld { ty, .. } => {
                pop(stack);
                stack.push(ty.clone());
            }
            IrOp::LdFldA { ty, .. } => {
                pop(stack);
                stack.push(IrType::ByRef(Box::new(ty.clone())));
            }
            IrOp::StFld(_) => drop_n(stack, 2),
            IrOp::LdSFld { ty, .. } => stack.push(ty.clone()),
            IrOp::LdSFldA { ty, .. } => stack.push(IrType::ByRef(Box::new(ty.clone()))),
            IrOp::LdElem { .. } => {
                pop(stack);
                let array = pop(stack);
                stack.push(array.element());
            }
            IrOp::LdElemA { .. } => {
                pop(stack);
                let array = pop(stack);
                stack.push(IrType::ByRef(Box::new(array.element())));
            }
            IrOp::StElem { .. } => drop_n(stack, 3),
            IrOp::LdLen => {
                pop(stack);
                stack.push(IrType::I32);
            }
            IrOp::NewObj(ty) => stack.push(ty.clone()),
            IrOp::NewArr(elem) => {
                pop(stack);
                stack.push(IrType::Array(Box::new(elem.clone())));
            }
            IrOp::Box(_) => {
                pop(stack);
                stack.push(IrType::Obj);
            }
            IrOp::Unbox(ty) | IrOp::IsInst(ty) | IrOp::CastClass(ty) | IrOp::Conv(ty) => {
                pop(stack);
                stack.push(ty.clone());
            }
            IrOp::Call {
                args,
                has_this,
                ret,
                ..
            } => {
                drop_n(stack, *args as usize + usize::from(*has_this));
                if *ret != IrType::Void {
                    stack.push(ret.clone());
                }
            }
            IrOp::Ret => stack.clear(),
            IrOp::LoadRegister(reg) => stack.push(register_type(*reg)),
            IrOp::ReadFlag(_) => stack.push(IrType::Bool),
            IrOp::CallRuntime(routine) | IrOp::Pending(routine) => {
                drop_n(stack, routine.pops());
                if let Some(result) = routine.result() {
                    stack.push(result);
                }
            }
        }
    }
}

/// Output of code generation for one program.
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub symbols: Vec<Symbol>,
    pub strings: StringHeap,
    pub methods: Vec<IrMethod>,
}

impl IrModule {
    pub fn method(&self, name: &str) -> Option<&IrMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    fn write_op(&self, f: &mut fmt::Formatter<'_>, op: &IrOp) -> fmt::Result {
        let symbol = |id: SymbolId| {
            self.symbols
                .get(id as usize)
                .map_or("<bad symbol>", |s| s.name.as_str())
        };
        let string = |idx: u32| self.strings.get(idx).unwrap_or("<bad string>");
        match op {
            IrOp::MarkLabel(idx) => write!(f, "  L{idx}:"),
            IrOp::LdcI4(v) => write!(f, "    ldc.i4 {v}"),
            IrOp::LdcI8(v) => write!(f, "    ldc.i8 {v}"),
            IrOp::LdcR8(v) => write!(f, "    ldc.r8 {v:?}"),
            IrOp::LdcBool(v) => write!(f, "    ldc.bool {v}"),
            IrOp::LdcChar(v) => write!(f, "    ldc.char {v:?}"),
            IrOp::LdStr(idx) => write!(f, "    ldstr {:?}", string(*idx)),
            IrOp::LdArg(s) => write!(f, "    ldarg {s}"),
            IrOp::LdArgA(s) => write!(f, "    ldarga {s}"),
            IrOp::StArg(s) => write!(f, "    starg {s}"),
            IrOp::LdLoc(s) => write!(f, "    ldloc {s}"),
            IrOp::LdLocA(s) => write!(f, "    ldloca {s}"),
            IrOp::StLoc(s) => write!(f, "    stloc {s}"),
            IrOp::LdFld { field, ty } => write!(f, "    ldfld {ty} {}", symbol(*field)),
            IrOp::LdFldA { field, ty } => write!(f, "    ldflda {ty} {}", symbol(*field)),
            IrOp::StFld(field) => write!(f, "    stfld {}", symbol(*field)),
            IrOp::LdSFld { field, ty } => write!(f, "    ldsfld {ty} {}", symbol(*field)),
            IrOp::LdSFldA { field, ty } => write!(f, "    ldsflda {ty} {}", symbol(*field)),
            IrOp::StSFld(field) => write!(f, "    stsfld {}", symbol(*field)),
            IrOp::LdElem { checked } => write!(f, "    ldelem{}", unchecked(*checked)),
            IrOp::LdElemA { checked } => write!(f, "    ldelema{}", unchecked(*checked)),
            IrOp::StElem { checked } => write!(f, "    stelem{}", unchecked(*checked)),
            IrOp::NewObj(ty) => write!(f, "    newobj {ty}"),
            IrOp::NewArr(ty) => write!(f, "    newarr {ty}"),
            IrOp::Box(ty) => write!(f, "    box {ty}"),
            IrOp::Unbox(ty) => write!(f, "    unbox {ty}"),
            IrOp::IsInst(ty) => write!(f, "    isinst {ty}"),
            IrOp::CastClass(ty) => write!(f, "    castclass {ty}"),
            IrOp::LdToken(Some(ty)) => write!(f, "    ldtoken {ty}"),
            IrOp::LdToken(None) => write!(f, "    ldtoken null"),
            IrOp::Conv(ty) => write!(f, "    conv {ty}"),
            IrOp::Br(l) => write!(f, "    br L{l}"),
            IrOp::BrTrue(l) => write!(f, "    brtrue L{l}"),
            IrOp::BrFalse(l) => write!(f, "    brfalse L{l}"),
            IrOp::Call { method, args, ret, .. } => {
                write!(f, "    call {ret} {}({args})", symbol(*method))
            }
            IrOp::CallExternal(idx) => write!(f, "    call.host {:?}", string(*idx)),
            IrOp::LoadRegister(reg) => write!(f, "    ldreg {}", reg.name()),
            IrOp::StoreRegister(reg) => write!(f, "    streg {}", reg.name()),
            IrOp::ReadFlag(flag) => write!(f, "    ldflag {}", flag.name()),
            IrOp::WriteFlag(flag) => write!(f, "    stflag {}", flag.name()),
            IrOp::CallRuntime(routine) => write!(f, "    call.runtime {routine}"),
            IrOp::Pending(routine) => write!(f, "    call.runtime {routine} ; unpatched"),
            other => write!(f, "    {}", simple_name(other)),
        }
    }
}

fn unchecked(checked: bool) -> &'static str {
    if checked {
        ""
    } else {
        ".unchecked"
    }
}

fn simple_name(op: &IrOp) -> &'static str {
    match op {
        IrOp::Nop => "nop",
        IrOp::LdNull => "ldnull",
        IrOp::Dup => "dup",
        IrOp::Pop => "pop",
        IrOp::Add => "add",
        IrOp::Sub => "sub",
        IrOp::Mul => "mul",
        IrOp::Div => "div",
        IrOp::Rem => "rem",
        IrOp::Neg => "neg",
        IrOp::And => "and",
        IrOp::Or => "or",
        IrOp::Xor => "xor",
        IrOp::Not => "not",
        IrOp::Shl => "shl",
        IrOp::Shr => "shr",
        IrOp::LdLen => "ldlen",
        IrOp::Ret => "ret",
        IrOp::Throw => "throw",
        _ => "?",
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for method in &self.methods {
            let params: Vec<String> = method
                .params
                .iter()
                .map(|p| format!("{} {}", p.ty, p.name))
                .collect();
            writeln!(
                f,
                ".method {}{} {}({})",
                if method.is_static { "static " } else { "" },
                method.ret,
                method.name,
                params.join(", ")
            )?;
            if method.inline_hint {
                writeln!(f, "  .inline")?;
            }
            for (slot, local) in method.locals.iter().enumerate() {
                writeln!(f, "  .local [{slot}] {} {}", local.ty, local.name)?;
            }
            for op in &method.ops {
                self.write_op(f, op)?;
                writeln!(f)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(ops: Vec<IrOp>) -> IrMethod {
        let mut method = IrMethod::new("T.m", true, IrType::Void);
        method.params.push(IrLocal {
            name: "a".to_string(),
            ty: IrType::I32,
        });
        method.locals.push(IrLocal {
            name: "s".to_string(),
            ty: IrType::Str,
        });
        method.ops = ops;
        method
    }

    #[test]
    fn stack_types_follow_loads_and_arithmetic() {
        let m = method(vec![
            IrOp::LdArg(0),
            IrOp::LdcI4(1),
            IrOp::Add,
            IrOp::LdLoc(0),
            IrOp::LoadRegister(Register::Fa),
        ]);
        assert_eq!(
            m.stack_types_at(5),
            vec![IrType::I32, IrType::Str, IrType::F64]
        );
        assert_eq!(m.stack_types_at(2), vec![IrType::I32, IrType::I32]);
    }

    #[test]
    fn calls_and_runtime_routines_adjust_the_stack() {
        let m = method(vec![
            IrOp::LdcI4(1),
            IrOp::LdcI4(2),
            IrOp::Call {
                method: 0,
                args: 2,
                has_this: false,
                ret: IrType::Bool,
            },
            IrOp::CallRuntime(Routine::ToString),
        ]);
        assert_eq!(m.stack_types_at(4), vec![IrType::Str]);
        assert_eq!(m.stack_types_at(3), vec![IrType::Bool]);
    }

    #[test]
    fn underflow_yields_unknown() {
        let m = method(vec![IrOp::Add]);
        assert_eq!(m.stack_types_at(1), vec![IrType::Unknown]);
    }

    #[test]
    fn value_types_need_boxing() {
        assert!(IrType::I64.is_value_type());
        assert!(IrType::Struct("P".into()).is_value_type());
        assert!(!IrType::Str.is_value_type());
        assert!(!IrType::Class("C".into()).is_value_type());
        assert_eq!(IrType::I32.array_of(2).to_string(), "i32[][]");
    }
}
