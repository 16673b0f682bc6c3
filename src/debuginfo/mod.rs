// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Debug symbol database (`.cpdb`).
//!
//! Holds the local and label names a stripped container leaves out. The
//! layout mirrors the container's namespace/type/method tree; all names go
//! through the database's own string heap.

use std::collections::HashMap;

use tracing::debug;

use crate::bytecode::codec::{u16_count, u32_count, write_heap, write_u16, write_u32, CodecError, Decoder};
use crate::core::string_heap::StringHeap;
use crate::core::symbols::join;

pub const CPDB_MAGIC: [u8; 7] = [b'C', b'P', b'D', b'B', 0x1A, 0xEE, 0xFE];
pub const CPDB_VERSION: u16 = 0x0001;

const MAX_TYPE_DEPTH: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugDatabase {
    pub namespaces: Vec<NamespaceSymbols>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceSymbols {
    pub name: String,
    pub types: Vec<TypeSymbols>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSymbols {
    pub name: String,
    pub nested: Vec<TypeSymbols>,
    pub methods: Vec<MethodSymbols>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSymbols {
    pub name: String,
    pub locals: Vec<LocalSymbol>,
    pub labels: Vec<LabelSymbol>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSymbol {
    pub name: String,
    pub slot: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSymbol {
    pub name: String,
    pub index: u16,
    /// Byte offset within the method's code.
    pub offset: u32,
}

impl DebugDatabase {
    /// Methods keyed by canonical `Type.method` name.
    pub fn method_index(&self) -> HashMap<String, &MethodSymbols> {
        fn walk<'a>(prefix: &str, ty: &'a TypeSymbols, index: &mut HashMap<String, &'a MethodSymbols>) {
            let full = join(prefix, &ty.name);
            for method in &ty.methods {
                index.insert(join(&full, &method.name), method);
            }
            for nested in &ty.nested {
                walk(&full, nested, index);
            }
        }

        let mut index = HashMap::new();
        for ns in &self.namespaces {
            for ty in &ns.types {
                walk(&ns.name, ty, &mut index);
            }
        }
        index
    }

    pub fn method(&self, full_name: &str) -> Option<&MethodSymbols> {
        self.method_index().get(full_name).copied()
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut heap = StringHeap::new();
        let mut body = Vec::new();
        write_u32(&mut body, u32_count(self.namespaces.len(), "cpdb namespaces")?);
        for ns in &self.namespaces {
            write_u32(&mut body, heap.intern(&ns.name));
            write_u32(&mut body, u32_count(ns.types.len(), "cpdb types")?);
            for ty in &ns.types {
                encode_type(&mut body, &mut heap, ty)?;
            }
        }

        let mut out = Vec::with_capacity(body.len() + 32);
        out.extend_from_slice(&CPDB_MAGIC);
        write_u16(&mut out, CPDB_VERSION);
        write_heap(&mut out, &heap)?;
        out.extend_from_slice(&body);
        debug!(bytes = out.len(), strings = heap.len(), "debug database encoded");
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Decoder::new(bytes, "cpdb");
        let magic = cur.read_exact(CPDB_MAGIC.len(), "magic").map_err(|_| CodecError::InvalidMagic {
            found: bytes.iter().take(CPDB_MAGIC.len()).copied().collect(),
        })?;
        if magic != CPDB_MAGIC {
            return Err(CodecError::InvalidMagic {
                found: magic.to_vec(),
            });
        }
        let version = cur.read_u16()?;
        if version != CPDB_VERSION {
            return Err(CodecError::UnsupportedVersion { found: version });
        }
        let heap = cur.read_heap()?;

        let count = cur.read_bounded_count(8, "namespaces")?;
        let mut db = DebugDatabase::default();
        for _ in 0..count {
            let name = cur.read_heap_string(&heap)?;
            let type_count = cur.read_bounded_count(12, "types")?;
            let mut types = Vec::with_capacity(type_count);
            for _ in 0..type_count {
                types.push(decode_type(&mut cur, &heap, 0)?);
            }
            db.namespaces.push(NamespaceSymbols { name, types });
        }
        cur.finish()?;
        Ok(db)
    }
}

fn encode_type(out: &mut Vec<u8>, heap: &mut StringHeap, ty: &TypeSymbols) -> Result<(), CodecError> {
    write_u32(out, heap.intern(&ty.name));
    write_u32(out, u32_count(ty.nested.len(), "cpdb nested types")?);
    for nested in &ty.nested {
        encode_type(out, heap, nested)?;
    }
    write_u32(out, u32_count(ty.methods.len(), "cpdb methods")?);
    for method in &ty.methods {
        write_u32(out, heap.intern(&method.name));
        write_u16(out, u16_count(method.locals.len(), "cpdb locals")?);
        for local in &method.locals {
            write_u32(out, heap.intern(&local.name));
            write_u16(out, local.slot);
        }
        write_u16(out, u16_count(method.labels.len(), "cpdb labels")?);
        for label in &method.labels {
            write_u32(out, heap.intern(&label.name));
            write_u16(out, label.index);
            write_u32(out, label.offset);
        }
    }
    Ok(())
}

fn decode_type(cur: &mut Decoder<'_>, heap: &StringHeap, depth: usize) -> Result<TypeSymbols, CodecError> {
    if depth >= MAX_TYPE_DEPTH {
        return Err(cur.invalid("types nested too deeply"));
    }
    let name = cur.read_heap_string(heap)?;
    let nested_count = cur.read_bounded_count(12, "nested types")?;
    let mut nested = Vec::with_capacity(nested_count);
    for _ in 0..nested_count {
        nested.push(decode_type(cur, heap, depth + 1)?);
    }
    let method_count = cur.read_bounded_count(8, "methods")?;
    let mut methods = Vec::with_capacity(method_count);
    for _ in 0..method_count {
        let method = cur.read_heap_string(heap)?;
        let local_count = cur.read_bounded_count_u16(6, "locals")?;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            locals.push(LocalSymbol {
                name: cur.read_heap_string(heap)?,
                slot: cur.read_u16()?,
            });
        }
        let label_count = cur.read_bounded_count_u16(10, "labels")?;
        let mut labels = Vec::with_capacity(label_count);
        for _ in 0..label_count {
            labels.push(LabelSymbol {
                name: cur.read_heap_string(heap)?,
                index: cur.read_u16()?,
                offset: cur.read_u32()?,
            });
        }
        methods.push(MethodSymbols {
            name: method,
            locals,
            labels,
        });
    }
    Ok(TypeSymbols {
        name,
        nested,
        methods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DebugDatabase {
        DebugDatabase {
            namespaces: vec![NamespaceSymbols {
                name: "App".to_string(),
                types: vec![TypeSymbols {
                    name: "Main".to_string(),
                    nested: vec![TypeSymbols {
                        name: "Inner".to_string(),
                        nested: Vec::new(),
                        methods: vec![MethodSymbols {
                            name: "go".to_string(),
                            locals: Vec::new(),
                            labels: vec![LabelSymbol {
                                name: "done".to_string(),
                                index: 0,
                                offset: 4,
                            }],
                        }],
                    }],
                    methods: vec![MethodSymbols {
                        name: "run".to_string(),
                        locals: vec![LocalSymbol {
                            name: "count".to_string(),
                            slot: 0,
                        }],
                        labels: Vec::new(),
                    }],
                }],
            }],
        }
    }

    #[test]
    fn encoded_database_starts_with_magic_and_version() {
        let bytes = sample().encode().unwrap();
        assert_eq!(&bytes[..7], b"CPDB\x1A\xEE\xFE");
        assert_eq!(&bytes[7..9], &[1, 0]);
        assert_eq!(DebugDatabase::decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn method_index_uses_canonical_names() {
        let db = sample();
        assert_eq!(db.method("App.Main.run").unwrap().locals[0].name, "count");
        assert_eq!(db.method("App.Main.Inner.go").unwrap().labels[0].offset, 4);
        assert!(db.method("App.Main.go").is_none());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().encode().unwrap();
        bytes[3] = b'X';
        assert!(matches!(
            DebugDatabase::decode(&bytes),
            Err(CodecError::InvalidMagic { .. })
        ));
        assert!(matches!(
            DebugDatabase::decode(b"CP"),
            Err(CodecError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn truncated_database_is_rejected() {
        let bytes = sample().encode().unwrap();
        let err = DebugDatabase::decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.code(), "CPB003");
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut bytes = sample().encode().unwrap();
        bytes[7] = 9;
        assert_eq!(
            DebugDatabase::decode(&bytes).unwrap_err(),
            CodecError::UnsupportedVersion { found: 9 }
        );
    }
}
