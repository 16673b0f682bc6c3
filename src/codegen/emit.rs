// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Per-method emission context handed to each opcode's lowering function.

use std::collections::{HashMap, HashSet};

use crate::codegen::ir::{IrLocal, IrMethod, IrOp, IrType, SymbolId};
use crate::codegen::{CodegenError, CodegenOptions};
use crate::core::model::{Attributes, Program, TypeDef, TypeSpec};
use crate::core::patch::{PatchKey, PatchQueue};
use crate::core::string_heap::StringHeap;
use crate::core::symbols::{join, Reference, Symbol, SymbolKind};

/// Interns each referenced symbol once per module.
#[derive(Debug, Default)]
pub struct SymbolImporter {
    symbols: Vec<Symbol>,
    index: HashMap<Symbol, SymbolId>,
}

impl SymbolImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import(&mut self, symbol: &Symbol) -> SymbolId {
        if let Some(&id) = self.index.get(symbol) {
            return id;
        }
        let id = self.symbols.len() as SymbolId;
        self.symbols.push(symbol.clone());
        self.index.insert(symbol.clone(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn into_symbols(self) -> Vec<Symbol> {
        self.symbols
    }
}

/// Call-site view of a method declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub params: u16,
    pub is_static: bool,
    pub ret: IrType,
}

/// Type facts about the program that lowering needs.
#[derive(Debug, Default)]
pub struct ProgramInfo {
    structs: HashSet<String>,
    fields: HashMap<String, IrType>,
    methods: HashMap<String, MethodSignature>,
}

impl ProgramInfo {
    pub fn from_program(program: &Program) -> Self {
        let mut info = ProgramInfo::default();
        for ns in &program.namespaces {
            for ty in &ns.types {
                collect_structs(&ns.name, ty, &mut info.structs);
            }
        }
        let mut methods = Vec::new();
        program.for_each_method(|owner, method| {
            methods.push((
                join(owner, &method.name),
                MethodSignature {
                    params: method.params.len() as u16,
                    is_static: method.attrs.is_static(),
                    ret: info.ir_type(&method.ret),
                },
            ));
        });
        info.methods.extend(methods);
        let mut fields = Vec::new();
        for ns in &program.namespaces {
            for ty in &ns.types {
                collect_fields(&ns.name, ty, &mut fields);
            }
        }
        for (name, spec) in fields {
            let ty = info.ir_type(spec);
            info.fields.insert(name, ty);
        }
        info
    }

    /// IR type for a resolved type spec.
    pub fn ir_type(&self, spec: &TypeSpec) -> IrType {
        let base = match spec.reference.resolved() {
            Some(symbol) => match symbol.kind {
                SymbolKind::Primitive => {
                    IrType::from_primitive(&symbol.name).unwrap_or(IrType::Unknown)
                }
                _ if self.structs.contains(&symbol.name) => IrType::Struct(symbol.name.clone()),
                _ => IrType::Class(symbol.name.clone()),
            },
            None => IrType::Unknown,
        };
        base.array_of(spec.dims)
    }

    pub fn field_type(&self, name: &str) -> IrType {
        self.fields.get(name).cloned().unwrap_or(IrType::Unknown)
    }

    /// Signature of a declared method; external methods are opaque.
    pub fn signature(&self, name: &str) -> MethodSignature {
        self.methods.get(name).cloned().unwrap_or(MethodSignature {
            params: 0,
            is_static: true,
            ret: IrType::Unknown,
        })
    }
}

fn collect_structs(prefix: &str, ty: &TypeDef, out: &mut HashSet<String>) {
    let full = join(prefix, &ty.name);
    for nested in &ty.nested {
        collect_structs(&full, nested, out);
    }
    if ty.attrs.has(Attributes::STRUCT) {
        out.insert(full);
    }
}

fn collect_fields<'p>(
    prefix: &str,
    ty: &'p TypeDef,
    out: &mut Vec<(String, &'p TypeSpec)>,
) {
    let full = join(prefix, &ty.name);
    for field in &ty.fields {
        out.push((join(&full, &field.name), &field.ty));
    }
    for nested in &ty.nested {
        collect_fields(&full, nested, out);
    }
}

/// Emission state for one method.
pub struct MethodEmitter<'a> {
    info: &'a ProgramInfo,
    importer: &'a mut SymbolImporter,
    strings: &'a mut StringHeap,
    options: CodegenOptions,
    method: IrMethod,
    cursor: usize,
    patches: PatchQueue<IrMethod, CodegenError>,
}

impl<'a> MethodEmitter<'a> {
    pub fn new(
        info: &'a ProgramInfo,
        importer: &'a mut SymbolImporter,
        strings: &'a mut StringHeap,
        options: CodegenOptions,
        method: IrMethod,
    ) -> Self {
        Self {
            info,
            importer,
            strings,
            options,
            method,
            cursor: 0,
            patches: PatchQueue::new(),
        }
    }

    pub fn info(&self) -> &ProgramInfo {
        self.info
    }

    pub fn options(&self) -> CodegenOptions {
        self.options
    }

    pub fn emit(&mut self, op: IrOp) {
        self.method.ops.push(op);
    }

    /// IR position the next emitted op will occupy.
    pub fn position(&self) -> u32 {
        self.method.ops.len() as u32
    }

    /// Index of the source instruction being lowered.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    pub fn method_name(&self) -> &str {
        &self.method.name
    }

    pub fn import(&mut self, symbol: &Symbol) -> SymbolId {
        self.importer.import(symbol)
    }

    pub fn intern(&mut self, text: &str) -> u32 {
        self.strings.intern(text)
    }

    pub fn ir_type(&self, spec: &TypeSpec) -> IrType {
        self.info.ir_type(spec)
    }

    pub fn symbol<'r>(&self, reference: &'r Reference) -> Result<&'r Symbol, CodegenError> {
        reference
            .resolved()
            .ok_or_else(|| CodegenError::Unresolved {
                method: self.method.name.clone(),
                name: reference.display_name().to_string(),
            })
    }

    pub fn local_count(&self) -> usize {
        self.method.locals.len()
    }

    /// Queue a patch against the finished method body.
    pub fn defer<F>(&mut self, key: PatchKey, apply: F) -> bool
    where
        F: FnOnce(&mut IrMethod) -> Result<(), CodegenError> + 'static,
    {
        self.patches.enqueue(key, apply)
    }

    pub fn pending_patches(&self) -> usize {
        self.patches.len()
    }

    /// Apply queued patches and hand back the method.
    pub fn finish(mut self) -> Result<IrMethod, CodegenError> {
        let mut method = self.method;
        if let Err(mut failures) = self.patches.apply(&mut method) {
            let (_, err) = failures.remove(0);
            return Err(err);
        }
        Ok(method)
    }
}

/// Add a scratch local to a method and return its slot.
pub fn add_scratch_local(method: &mut IrMethod, ty: IrType) -> Result<u16, CodegenError> {
    let slot = u16::try_from(method.locals.len()).map_err(|_| CodegenError::TooManyLocals {
        method: method.name.clone(),
    })?;
    method.locals.push(IrLocal {
        name: format!("$scratch{slot}"),
        ty,
    });
    Ok(slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importer_interns_each_symbol_once() {
        let mut importer = SymbolImporter::new();
        let a = Symbol::new(SymbolKind::Method, "App.Main.run");
        let b = Symbol::new(SymbolKind::Field, "App.Main.count");
        assert_eq!(importer.import(&a), 0);
        assert_eq!(importer.import(&b), 1);
        assert_eq!(importer.import(&a), 0);
        assert_eq!(importer.len(), 2);
    }

    #[test]
    fn scratch_locals_are_appended() {
        let mut method = IrMethod::new("T.m", true, IrType::Void);
        assert_eq!(add_scratch_local(&mut method, IrType::I64).unwrap(), 0);
        assert_eq!(add_scratch_local(&mut method, IrType::Str).unwrap(), 1);
        assert_eq!(method.locals[1].name, "$scratch1");
    }

    #[test]
    fn struct_types_map_to_value_types() {
        let mut program = Program::new();
        let mut point = TypeDef::new("Point", Attributes(Attributes::STRUCT), 1);
        point.fields.push(crate::core::model::FieldDef {
            name: "x".to_string(),
            attrs: Attributes::default(),
            ty: TypeSpec::resolved(Symbol::primitive("i32")),
            line: 2,
        });
        program.namespace_mut("Geo").types.push(point);
        let info = ProgramInfo::from_program(&program);
        let spec = TypeSpec::resolved(Symbol::new(SymbolKind::Type, "Geo.Point"));
        assert_eq!(info.ir_type(&spec), IrType::Struct("Geo.Point".to_string()));
        assert_eq!(info.field_type("Geo.Point.x"), IrType::I32);
        assert_eq!(info.field_type("Geo.Point.y"), IrType::Unknown);
    }
}
