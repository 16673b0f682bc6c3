// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Opcode registry: code → definition and mnemonic → ordered candidates.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::bytecode::codec::{CodecError, Decoder};
use crate::codegen::emit::MethodEmitter;
use crate::codegen::CodegenError;
use crate::core::string_heap::StringHeap;
use crate::opcodes::args::{ArgContext, ArgSpec, RawArg};
use crate::opcodes::operand::Operand;

/// One- or two-byte opcode identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpcodeId {
    Single(u8),
    Extended { parent: u8, code: u8 },
}

impl OpcodeId {
    pub fn encoded_len(self) -> usize {
        match self {
            OpcodeId::Single(_) => 1,
            OpcodeId::Extended { .. } => 2,
        }
    }

    pub fn write(self, out: &mut Vec<u8>) {
        match self {
            OpcodeId::Single(code) => out.push(code),
            OpcodeId::Extended { parent, code } => {
                out.push(parent);
                out.push(code);
            }
        }
    }
}

impl fmt::Display for OpcodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpcodeId::Single(code) => write!(f, "{code:02X}"),
            OpcodeId::Extended { parent, code } => write!(f, "{parent:02X} {code:02X}"),
        }
    }
}

pub type ParseFn = fn(&OpcodeDef, &[RawArg], &mut ArgContext<'_>) -> Result<Vec<Operand>, String>;
pub type EncodeFn = fn(&OpcodeDef, &[Operand], &mut Vec<u8>, &mut StringHeap) -> Result<(), CodecError>;
pub type DecodeFn = fn(&OpcodeDef, &mut Decoder<'_>, &StringHeap) -> Result<Vec<Operand>, CodecError>;
pub type LowerFn = fn(&OpcodeDef, &[Operand], &mut MethodEmitter<'_>) -> Result<(), CodegenError>;

/// Everything the toolchain knows about one instruction.
#[derive(Clone, Copy)]
pub struct OpcodeDef {
    pub mnemonic: &'static str,
    pub id: OpcodeId,
    pub args: &'static [ArgSpec],
    pub parse: ParseFn,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
    pub lower: LowerFn,
}

impl OpcodeDef {
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn signature(&self) -> String {
        if self.args.is_empty() {
            return self.mnemonic.to_string();
        }
        let args: Vec<&str> = self.args.iter().map(|spec| spec.describe()).collect();
        format!("{} {}", self.mnemonic, args.join(", "))
    }
}

impl fmt::Debug for OpcodeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodeDef")
            .field("mnemonic", &self.mnemonic)
            .field("id", &self.id)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("opcode {id} assigned to both '{first}' and '{second}'")]
    DuplicateCode {
        id: OpcodeId,
        first: &'static str,
        second: &'static str,
    },
    #[error("'{mnemonic}' uses parent code {parent:02X} which is not declared as a parent")]
    ChildOfNonParent { parent: u8, mnemonic: &'static str },
    #[error("'{mnemonic}' uses code {code:02X} which is reserved as a parent code")]
    ParentUsedAsInstruction { code: u8, mnemonic: &'static str },
    #[error("parent code {code:02X} declared twice")]
    DuplicateParent { code: u8 },
    #[error("'{mnemonic}' declares {arity} arguments; at most 255 are encodable")]
    TooManyArguments { mnemonic: &'static str, arity: usize },
}

/// Immutable after construction; safe to share across threads.
#[derive(Debug)]
pub struct OpcodeRegistry {
    defs: Vec<OpcodeDef>,
    by_id: HashMap<OpcodeId, usize>,
    by_mnemonic: HashMap<&'static str, Vec<usize>>,
    parents: Vec<u8>,
}

impl OpcodeRegistry {
    /// Build a registry, failing on the first code collision.
    pub fn new(parents: &[u8], defs: Vec<OpcodeDef>) -> Result<Self, RegistryError> {
        let mut parent_list: Vec<u8> = Vec::with_capacity(parents.len());
        for &code in parents {
            if parent_list.contains(&code) {
                return Err(RegistryError::DuplicateParent { code });
            }
            parent_list.push(code);
        }

        let mut by_id: HashMap<OpcodeId, usize> = HashMap::with_capacity(defs.len());
        let mut by_mnemonic: HashMap<&'static str, Vec<usize>> = HashMap::new();
        for (idx, def) in defs.iter().enumerate() {
            if def.arity() > u8::MAX as usize {
                return Err(RegistryError::TooManyArguments {
                    mnemonic: def.mnemonic,
                    arity: def.arity(),
                });
            }
            match def.id {
                OpcodeId::Single(code) if parent_list.contains(&code) => {
                    return Err(RegistryError::ParentUsedAsInstruction {
                        code,
                        mnemonic: def.mnemonic,
                    });
                }
                OpcodeId::Extended { parent, .. } if !parent_list.contains(&parent) => {
                    return Err(RegistryError::ChildOfNonParent {
                        parent,
                        mnemonic: def.mnemonic,
                    });
                }
                _ => {}
            }
            if let Some(&first) = by_id.get(&def.id) {
                return Err(RegistryError::DuplicateCode {
                    id: def.id,
                    first: defs[first].mnemonic,
                    second: def.mnemonic,
                });
            }
            by_id.insert(def.id, idx);
            by_mnemonic.entry(def.mnemonic).or_default().push(idx);
        }

        Ok(Self {
            defs,
            by_id,
            by_mnemonic,
            parents: parent_list,
        })
    }

    /// The built-in instruction set, built once per process.
    pub fn standard() -> Result<&'static OpcodeRegistry, RegistryError> {
        static STANDARD: OnceLock<Result<OpcodeRegistry, RegistryError>> = OnceLock::new();
        STANDARD
            .get_or_init(|| {
                OpcodeRegistry::new(
                    crate::opcodes::table::PARENT_CODES,
                    crate::opcodes::table::standard_defs(),
                )
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn is_parent(&self, code: u8) -> bool {
        self.parents.contains(&code)
    }

    pub fn get(&self, id: OpcodeId) -> Option<&OpcodeDef> {
        self.by_id.get(&id).map(|&idx| &self.defs[idx])
    }

    pub fn is_mnemonic(&self, name: &str) -> bool {
        self.by_mnemonic.contains_key(name)
    }

    /// Definitions for `mnemonic` in declaration order.
    pub fn overloads(&self, mnemonic: &str) -> impl Iterator<Item = &OpcodeDef> + '_ {
        self.by_mnemonic
            .get(mnemonic)
            .into_iter()
            .flatten()
            .map(|&idx| &self.defs[idx])
    }

    /// Definitions for `mnemonic` taking exactly `arity` arguments, in
    /// declaration order.
    pub fn candidates(&self, mnemonic: &str, arity: usize) -> Vec<&OpcodeDef> {
        self.overloads(mnemonic)
            .filter(|def| def.arity() == arity)
            .collect()
    }

    /// Read an opcode id from a code stream.
    pub fn read_id(&self, cur: &mut Decoder<'_>) -> Result<OpcodeId, CodecError> {
        let first = cur.read_u8()?;
        if self.is_parent(first) {
            let code = cur.read_u8()?;
            Ok(OpcodeId::Extended {
                parent: first,
                code,
            })
        } else {
            Ok(OpcodeId::Single(first))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpcodeDef> {
        self.defs.iter()
    }
}
