// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Core shared types: program model, symbols, diagnostics and resolution.

pub mod context;
pub mod error;
pub mod model;
pub mod patch;
pub mod report;
pub mod resolve;
pub mod scanner;
pub mod scope;
pub mod string_heap;
pub mod symbols;
