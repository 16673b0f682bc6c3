// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The execution host's contract as seen by generated code.
//!
//! Generated code never touches register, flag or console state directly;
//! it loads/stores named registers, reads/writes named flags and calls the
//! routines listed here.

use std::fmt;

use crate::codegen::ir::IrType;
use crate::opcodes::{Register, RegisterClass};

/// Host routines callable from generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Routine {
    /// `(obj, obj) -> ()`; sets the eq/lt/gt flags.
    Compare,
    ToString,
    ToStringFormatted,
    /// `(address, value) -> ()`.
    IndirectStore,
    KeyAvailable,
    ReadKey,
    ReadLine,
    /// Stack guard called in each method prologue.
    EnsureStack,
}

impl Routine {
    pub fn name(self) -> &'static str {
        match self {
            Routine::Compare => "Host.Compare",
            Routine::ToString => "Host.ToString",
            Routine::ToStringFormatted => "Host.ToStringFormatted",
            Routine::IndirectStore => "Host.IndirectStore",
            Routine::KeyAvailable => "Host.KeyAvailable",
            Routine::ReadKey => "Host.ReadKey",
            Routine::ReadLine => "Host.ReadLine",
            Routine::EnsureStack => "Host.EnsureStack",
        }
    }

    /// Number of stack values consumed.
    pub fn pops(self) -> usize {
        match self {
            Routine::Compare | Routine::ToStringFormatted | Routine::IndirectStore => 2,
            Routine::ToString => 1,
            Routine::KeyAvailable | Routine::ReadKey | Routine::ReadLine | Routine::EnsureStack => 0,
        }
    }

    /// Type of the value pushed, if any.
    pub fn result(self) -> Option<IrType> {
        match self {
            Routine::ToString | Routine::ToStringFormatted | Routine::ReadLine => Some(IrType::Str),
            Routine::KeyAvailable => Some(IrType::Bool),
            Routine::ReadKey => Some(IrType::Char),
            Routine::Compare | Routine::IndirectStore | Routine::EnsureStack => None,
        }
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Host storage type backing a register.
pub fn register_type(reg: Register) -> IrType {
    match reg.class() {
        RegisterClass::Int | RegisterClass::Index | RegisterClass::Flags => IrType::I64,
        RegisterClass::Float => IrType::F64,
        RegisterClass::Str => IrType::Str,
        RegisterClass::Exception => IrType::Obj,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_map_to_host_storage_types() {
        assert_eq!(register_type(Register::Ra), IrType::I64);
        assert_eq!(register_type(Register::Iy), IrType::I64);
        assert_eq!(register_type(Register::Fl), IrType::I64);
        assert_eq!(register_type(Register::Fb), IrType::F64);
        assert_eq!(register_type(Register::Sa), IrType::Str);
        assert_eq!(register_type(Register::Ex), IrType::Obj);
    }

    #[test]
    fn routine_signatures() {
        assert_eq!(Routine::Compare.pops(), 2);
        assert_eq!(Routine::Compare.result(), None);
        assert_eq!(Routine::ReadKey.result(), Some(IrType::Char));
        assert_eq!(Routine::EnsureStack.to_string(), "Host.EnsureStack");
    }
}
