// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction definitions: operands, argument parsing and the registry.

pub mod args;
pub mod operand;
pub mod registry;
pub mod table;

pub use args::{ArgContext, ArgSpec, ArgToken, RawArg};
pub use operand::{Constant, Flag, LabelRef, Operand, Register, RegisterClass, VarKind, VarRef};
pub use registry::{OpcodeDef, OpcodeId, OpcodeRegistry, RegistryError};
