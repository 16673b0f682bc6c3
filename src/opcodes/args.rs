// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction argument specs and their text parsers.

use std::sync::Arc;

use crate::core::model::{Label, TypeSpec, Variable};
use crate::core::scanner::Literal;
use crate::core::symbols::{
    is_primitive_type, PendingRef, RefKind, Reference, ResolverScope, SourceLoc, Symbol,
};
use crate::opcodes::operand::{
    Constant, Flag, LabelRef, Operand, Register, RegisterClass, VarKind, VarRef, OPND_CONST,
    OPND_FIELD, OPND_FLAG, OPND_FUNCTION, OPND_LABEL, OPND_METHOD, OPND_NULL_TYPE, OPND_REGISTER,
    OPND_TYPE,
};

/// What one argument position accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    Constant,
    Register,
    /// Integer, index or float register.
    NumericRegister,
    IndexRegister,
    Flag,
    Type,
    TypeOrNull,
    PrimitiveType,
    Field,
    Method,
    Label,
    Argument,
    Local,
    /// Local slot being stored to; may declare an implicit local.
    LocalStore,
    FunctionId,
    Format,
}

impl ArgSpec {
    pub fn describe(self) -> &'static str {
        match self {
            ArgSpec::Constant => "constant",
            ArgSpec::Register => "register",
            ArgSpec::NumericRegister => "numeric register",
            ArgSpec::IndexRegister => "index register",
            ArgSpec::Flag => "flag",
            ArgSpec::Type => "type",
            ArgSpec::TypeOrNull => "type or null",
            ArgSpec::PrimitiveType => "primitive type",
            ArgSpec::Field => "field",
            ArgSpec::Method => "method",
            ArgSpec::Label => "label",
            ArgSpec::Argument => "argument",
            ArgSpec::Local | ArgSpec::LocalStore => "local",
            ArgSpec::FunctionId => "function id",
            ArgSpec::Format => "format string",
        }
    }

    /// Whether a decoded operand is acceptable in this position.
    pub fn accepts_operand(self, operand: &Operand) -> bool {
        let tag = operand.discriminator();
        match self {
            ArgSpec::Constant => tag == OPND_CONST,
            ArgSpec::Register => tag == OPND_REGISTER,
            ArgSpec::NumericRegister => matches!(
                operand,
                Operand::Register(reg) if is_numeric_register(*reg)
            ),
            ArgSpec::IndexRegister => matches!(operand, Operand::Register(reg) if reg.is_index()),
            ArgSpec::Flag => tag == OPND_FLAG,
            ArgSpec::Type | ArgSpec::PrimitiveType => tag == OPND_TYPE,
            ArgSpec::TypeOrNull => tag == OPND_TYPE || tag == OPND_NULL_TYPE,
            ArgSpec::Field => tag == OPND_FIELD,
            ArgSpec::Method => tag == OPND_METHOD,
            ArgSpec::Label => tag == OPND_LABEL,
            ArgSpec::Argument => {
                matches!(operand, Operand::Var(VarRef { kind: VarKind::Arg, .. }))
            }
            ArgSpec::Local | ArgSpec::LocalStore => {
                matches!(operand, Operand::Var(VarRef { kind: VarKind::Local, .. }))
            }
            ArgSpec::FunctionId => tag == OPND_FUNCTION,
            ArgSpec::Format => matches!(operand, Operand::Const(Constant::Str(_))),
        }
    }
}

fn is_numeric_register(reg: Register) -> bool {
    matches!(
        reg.class(),
        RegisterClass::Int | RegisterClass::Index | RegisterClass::Float
    )
}

/// One argument token as written.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgToken {
    Literal(Literal),
    Name { text: String, dims: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawArg {
    pub token: ArgToken,
    pub column: usize,
}

impl RawArg {
    pub fn describe(&self) -> String {
        match &self.token {
            ArgToken::Literal(Literal::Str(text)) => format!("{text:?}"),
            ArgToken::Literal(Literal::Char(c)) => format!("{c:?}"),
            ArgToken::Literal(Literal::Int(value)) => value.to_string(),
            ArgToken::Literal(Literal::Float(value)) => value.to_string(),
            ArgToken::Literal(Literal::Bool(value)) => value.to_string(),
            ArgToken::Literal(Literal::Null) => "null".to_string(),
            ArgToken::Name { text, dims } => {
                format!("{text}{}", "[]".repeat(*dims as usize))
            }
        }
    }

    fn plain_name(&self) -> Option<&str> {
        match &self.token {
            ArgToken::Name { text, dims: 0 } => Some(text),
            _ => None,
        }
    }
}

/// Method state an argument parser may consult.
pub struct ArgContext<'a> {
    pub scope: Arc<ResolverScope>,
    pub file: Arc<str>,
    pub line: u32,
    pub params: &'a [Variable],
    pub locals: &'a [Variable],
    pub locals_declared: bool,
    pub labels: &'a [Label],
    /// Locals declared implicitly by the candidate being tried.
    pub implicit_locals: Vec<String>,
}

impl<'a> ArgContext<'a> {
    fn pending(&self, name: &str, expect: RefKind, column: usize) -> Reference {
        Reference::Pending(PendingRef {
            name: name.to_string(),
            expect,
            scope: Arc::clone(&self.scope),
            origin: SourceLoc::new(Arc::clone(&self.file), self.line, Some(column)),
        })
    }
}

/// Parse one argument against its spec.
pub fn parse_arg(spec: ArgSpec, arg: &RawArg, ctx: &mut ArgContext<'_>) -> Result<Operand, String> {
    let mismatch = || format!("expected {}, found '{}'", spec.describe(), arg.describe());
    match spec {
        ArgSpec::Constant => match &arg.token {
            ArgToken::Literal(literal) => Ok(Operand::Const(literal_constant(literal))),
            ArgToken::Name { .. } => Err(mismatch()),
        },
        ArgSpec::Register | ArgSpec::NumericRegister | ArgSpec::IndexRegister => {
            let reg = arg
                .plain_name()
                .and_then(Register::parse)
                .ok_or_else(mismatch)?;
            let ok = match spec {
                ArgSpec::NumericRegister => is_numeric_register(reg),
                ArgSpec::IndexRegister => reg.is_index(),
                _ => true,
            };
            if ok {
                Ok(Operand::Register(reg))
            } else {
                Err(mismatch())
            }
        }
        ArgSpec::Flag => arg
            .plain_name()
            .and_then(Flag::parse)
            .map(Operand::Flag)
            .ok_or_else(mismatch),
        ArgSpec::Type | ArgSpec::TypeOrNull | ArgSpec::PrimitiveType => match &arg.token {
            ArgToken::Literal(Literal::Null) if spec == ArgSpec::TypeOrNull => {
                Ok(Operand::NullType)
            }
            ArgToken::Name { text, dims } => {
                if Register::parse(text).is_some() || Flag::parse(text).is_some() {
                    return Err(mismatch());
                }
                if spec == ArgSpec::PrimitiveType && (*dims != 0 || !is_primitive_type(text)) {
                    return Err(mismatch());
                }
                let reference = if is_primitive_type(text) {
                    Reference::Resolved(Symbol::primitive(text))
                } else {
                    ctx.pending(text, RefKind::Type, arg.column)
                };
                Ok(Operand::Type(TypeSpec::new(reference, *dims)))
            }
            _ => Err(mismatch()),
        },
        ArgSpec::Field | ArgSpec::Method => {
            let name = arg.plain_name().ok_or_else(mismatch)?;
            if Register::parse(name).is_some() || is_primitive_type(name) {
                return Err(mismatch());
            }
            if spec == ArgSpec::Field {
                Ok(Operand::Field(ctx.pending(name, RefKind::Field, arg.column)))
            } else {
                Ok(Operand::Method(ctx.pending(name, RefKind::Method, arg.column)))
            }
        }
        ArgSpec::Label => {
            let name = arg.plain_name().ok_or_else(mismatch)?;
            let label = ctx
                .labels
                .iter()
                .find(|label| label.name == name)
                .ok_or_else(|| format!("undefined label '{name}'"))?;
            Ok(Operand::Label(LabelRef {
                index: label.index,
                target: None,
            }))
        }
        ArgSpec::Argument => {
            let slot = variable_slot(arg, ctx.params).ok_or_else(mismatch)?;
            Ok(Operand::Var(VarRef {
                kind: VarKind::Arg,
                slot,
            }))
        }
        ArgSpec::Local | ArgSpec::LocalStore => {
            if let Some(slot) = variable_slot(arg, ctx.locals) {
                return Ok(Operand::Var(VarRef {
                    kind: VarKind::Local,
                    slot,
                }));
            }
            let name = arg.plain_name().ok_or_else(mismatch)?;
            if let Some(pos) = ctx.implicit_locals.iter().position(|n| n == name) {
                return Ok(local_operand(ctx.locals.len() + pos));
            }
            if spec == ArgSpec::LocalStore && !ctx.locals_declared {
                if Register::parse(name).is_some() || name.contains('.') {
                    return Err(mismatch());
                }
                ctx.implicit_locals.push(name.to_string());
                return Ok(local_operand(ctx.locals.len() + ctx.implicit_locals.len() - 1));
            }
            Err(format!("unknown local '{name}'"))
        }
        ArgSpec::FunctionId => match &arg.token {
            ArgToken::Literal(Literal::Str(text)) if !text.is_empty() => {
                Ok(Operand::FunctionId(text.clone()))
            }
            _ => Err(mismatch()),
        },
        ArgSpec::Format => match &arg.token {
            ArgToken::Literal(Literal::Str(text)) => Ok(Operand::Const(Constant::Str(text.clone()))),
            _ => Err(mismatch()),
        },
    }
}

fn local_operand(slot: usize) -> Operand {
    Operand::Var(VarRef {
        kind: VarKind::Local,
        slot: slot as u16,
    })
}

fn variable_slot(arg: &RawArg, vars: &[Variable]) -> Option<u16> {
    match &arg.token {
        ArgToken::Literal(Literal::Int(slot)) => {
            let slot = usize::try_from(*slot).ok()?;
            (slot < vars.len()).then_some(slot as u16)
        }
        ArgToken::Name { text, dims: 0 } => vars
            .iter()
            .position(|var| var.name == *text)
            .map(|idx| idx as u16),
        _ => None,
    }
}

/// Narrowest constant for a literal: integers that fit `i32` stay `i32`.
pub fn literal_constant(literal: &Literal) -> Constant {
    match literal {
        Literal::Int(value) => match i32::try_from(*value) {
            Ok(small) => Constant::I32(small),
            Err(_) => Constant::I64(*value),
        },
        Literal::Float(value) => Constant::F64(*value),
        Literal::Str(text) => Constant::Str(text.clone()),
        Literal::Char(c) => Constant::Char(*c),
        Literal::Bool(value) => Constant::Bool(*value),
        Literal::Null => Constant::Null,
    }
}

/// Whether a constant can be loaded into a register of the given class.
pub fn constant_fits_register(constant: &Constant, class: RegisterClass) -> bool {
    match class {
        RegisterClass::Int | RegisterClass::Index | RegisterClass::Flags => matches!(
            constant,
            Constant::I32(_) | Constant::I64(_) | Constant::Bool(_) | Constant::Char(_)
        ),
        RegisterClass::Float => {
            matches!(constant, Constant::F64(_) | Constant::I32(_) | Constant::I64(_))
        }
        RegisterClass::Str => matches!(constant, Constant::Str(_) | Constant::Null),
        RegisterClass::Exception => matches!(constant, Constant::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> RawArg {
        RawArg {
            token: ArgToken::Name {
                text: text.to_string(),
                dims: 0,
            },
            column: 1,
        }
    }

    fn lit(literal: Literal) -> RawArg {
        RawArg {
            token: ArgToken::Literal(literal),
            column: 1,
        }
    }

    fn with_ctx<R>(locals_declared: bool, f: impl FnOnce(&mut ArgContext<'_>) -> R) -> R {
        let params = vec![Variable::new("a", TypeSpec::object())];
        let locals = vec![Variable::new("sum", TypeSpec::object())];
        let labels = vec![Label {
            name: "top".to_string(),
            index: 0,
            offset: None,
        }];
        let mut ctx = ArgContext {
            scope: Arc::new(ResolverScope::default()),
            file: Arc::from("t.casm"),
            line: 1,
            params: &params,
            locals: &locals,
            locals_declared,
            labels: &labels,
            implicit_locals: Vec::new(),
        };
        f(&mut ctx)
    }

    #[test]
    fn integer_literals_narrow_to_i32_when_they_fit() {
        assert_eq!(literal_constant(&Literal::Int(7)), Constant::I32(7));
        assert_eq!(
            literal_constant(&Literal::Int(1 << 40)),
            Constant::I64(1 << 40)
        );
    }

    #[test]
    fn register_specs_filter_by_class() {
        with_ctx(true, |ctx| {
            assert!(parse_arg(ArgSpec::IndexRegister, &name("ix"), ctx).is_ok());
            assert!(parse_arg(ArgSpec::IndexRegister, &name("ra"), ctx).is_err());
            assert!(parse_arg(ArgSpec::NumericRegister, &name("fa"), ctx).is_ok());
            assert!(parse_arg(ArgSpec::NumericRegister, &name("sa"), ctx).is_err());
        });
    }

    #[test]
    fn types_resolve_primitives_immediately() {
        with_ctx(true, |ctx| {
            let op = parse_arg(ArgSpec::Type, &name("i32"), ctx).unwrap();
            assert_eq!(op, Operand::Type(TypeSpec::resolved(Symbol::primitive("i32"))));
            let op = parse_arg(ArgSpec::Type, &name("App.Thing"), ctx).unwrap();
            assert!(matches!(op, Operand::Type(ref spec) if spec.reference.is_pending()));
            assert_eq!(
                parse_arg(ArgSpec::TypeOrNull, &lit(Literal::Null), ctx).unwrap(),
                Operand::NullType
            );
            assert!(parse_arg(ArgSpec::PrimitiveType, &name("App.Thing"), ctx).is_err());
        });
    }

    #[test]
    fn labels_must_be_reserved() {
        with_ctx(true, |ctx| {
            assert_eq!(
                parse_arg(ArgSpec::Label, &name("top"), ctx).unwrap(),
                Operand::Label(LabelRef { index: 0, target: None })
            );
            let err = parse_arg(ArgSpec::Label, &name("missing"), ctx).unwrap_err();
            assert_eq!(err, "undefined label 'missing'");
        });
    }

    #[test]
    fn variables_by_name_or_slot() {
        with_ctx(true, |ctx| {
            let arg = Operand::Var(VarRef { kind: VarKind::Arg, slot: 0 });
            assert_eq!(parse_arg(ArgSpec::Argument, &name("a"), ctx).unwrap(), arg);
            assert_eq!(parse_arg(ArgSpec::Argument, &lit(Literal::Int(0)), ctx).unwrap(), arg);
            assert!(parse_arg(ArgSpec::Argument, &lit(Literal::Int(1)), ctx).is_err());
        });
    }

    #[test]
    fn implicit_locals_only_before_a_locals_block() {
        with_ctx(false, |ctx| {
            let op = parse_arg(ArgSpec::LocalStore, &name("tmp"), ctx).unwrap();
            assert_eq!(op, Operand::Var(VarRef { kind: VarKind::Local, slot: 1 }));
            assert_eq!(ctx.implicit_locals, vec!["tmp".to_string()]);
            let again = parse_arg(ArgSpec::Local, &name("tmp"), ctx).unwrap();
            assert_eq!(again, op);
        });
        with_ctx(true, |ctx| {
            let err = parse_arg(ArgSpec::LocalStore, &name("tmp"), ctx).unwrap_err();
            assert_eq!(err, "unknown local 'tmp'");
        });
    }

    #[test]
    fn register_classes_bound_constants() {
        assert!(constant_fits_register(&Constant::I32(1), RegisterClass::Int));
        assert!(!constant_fits_register(&Constant::Str("x".into()), RegisterClass::Int));
        assert!(constant_fits_register(&Constant::I32(1), RegisterClass::Float));
        assert!(!constant_fits_register(&Constant::F64(1.0), RegisterClass::Int));
        assert!(constant_fits_register(&Constant::Null, RegisterClass::Exception));
    }
}
