// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Library entry exposing the assembler pipeline.
pub mod assembler;
pub mod bytecode;
pub mod codegen;
pub mod core;
pub mod debuginfo;
pub mod opcodes;
pub mod parser;
