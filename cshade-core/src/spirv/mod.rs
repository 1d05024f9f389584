//! SPIR-V module writer.
//!
//! Instructions are framed by hand into per-section word buffers and
//! concatenated, behind the 5-word header, by [`SpirvEmitter::finalize`].
//! Types, pointer types, function types and constants are interned so each
//! shape is declared once.

use crate::ast::*;
use crate::config::CompileOptions;
use crate::error::Result;
use crate::{bail_codegen, bail_codegen_at};
use log::debug;
use rspirv::spirv::{self as sp, Capability, Decoration, Op};
use spirv::Word;
use std::collections::{HashMap, HashSet};

mod body;
mod entry;

#[cfg(test)]
mod tests;

pub use body::emit_function;
pub use entry::emit_entry_point_header;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    ExtInstImports,
    EntryPoints,
    ExecutionModes,
    DebugNames,
    Annotations,
    Globals,
}

/// Interface variables allocated for one entry point.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntryInterface {
    /// Uniform buffer variable per `vk_uniform` argument.
    pub uniforms: HashMap<VarId, Word>,
    /// Input variable per `stage_in` member.
    pub inputs: Vec<Word>,
    /// Output variables: `None` for a whole `float4`, else a struct member.
    pub outputs: Vec<(Option<u32>, Word)>,
    /// Every Input and Output variable, for `OpEntryPoint`.
    pub interface: Vec<Word>,
}

/// Accumulates one SPIR-V module.
pub struct SpirvEmitter<'a> {
    program: &'a Program,
    options: CompileOptions,
    id_counter: Word,
    capabilities: Vec<Capability>,
    ext_inst_imports: Vec<Word>,
    entry_points: Vec<Word>,
    execution_modes: Vec<Word>,
    debug_names: Vec<Word>,
    annotations: Vec<Word>,
    globals: Vec<Word>,
    functions: Vec<Word>,
    glsl: Option<Word>,
    type_ids: HashMap<TypeId, Word>,
    pointer_type_ids: HashMap<(u32, Word), Word>,
    function_type_ids: HashMap<(Word, Vec<Word>), Word>,
    constant_ids: HashMap<(Word, u64), Word>,
    null_ids: HashMap<Word, Word>,
    undef_ids: HashMap<Word, Word>,
    uniform_wrappers: HashMap<TypeId, Word>,
    laid_out: HashSet<TypeId>,
    global_vars: HashMap<VarId, Word>,
    function_ids: HashMap<FunctionId, Word>,
    pub(crate) entry_interfaces: HashMap<FunctionId, EntryInterface>,
    emitted_functions: HashSet<FunctionId>,
    called_functions: Vec<FunctionId>,
    entry_order: Vec<FunctionId>,
}

/// Operand words of a literal string: UTF-8, NUL-terminated, zero-padded.
pub fn string_words(s: &str) -> Vec<Word> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes.chunks(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Appends one instruction: `opcode | (word_count << 16)` then the operands.
pub fn write_instruction(out: &mut Vec<Word>, op: Op, operands: &[Word]) {
    out.push(op as u32 | ((operands.len() as u32 + 1) << 16));
    out.extend_from_slice(operands);
}

impl<'a> SpirvEmitter<'a> {
    pub fn new(program: &'a Program, options: CompileOptions) -> Self {
        SpirvEmitter {
            program,
            options,
            id_counter: 0,
            capabilities: vec![Capability::Shader],
            ext_inst_imports: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            debug_names: Vec::new(),
            annotations: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            glsl: None,
            type_ids: HashMap::new(),
            pointer_type_ids: HashMap::new(),
            function_type_ids: HashMap::new(),
            constant_ids: HashMap::new(),
            null_ids: HashMap::new(),
            undef_ids: HashMap::new(),
            uniform_wrappers: HashMap::new(),
            laid_out: HashSet::new(),
            global_vars: HashMap::new(),
            function_ids: HashMap::new(),
            entry_interfaces: HashMap::new(),
            emitted_functions: HashSet::new(),
            called_functions: Vec::new(),
            entry_order: Vec::new(),
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    /// Ids start at 1.
    pub fn alloc_id(&mut self) -> Word {
        self.id_counter += 1;
        self.id_counter
    }

    pub fn id_bound(&self) -> Word {
        self.id_counter + 1
    }

    fn write(&mut self, section: Section, op: Op, operands: &[Word]) {
        let out = match section {
            Section::ExtInstImports => &mut self.ext_inst_imports,
            Section::EntryPoints => &mut self.entry_points,
            Section::ExecutionModes => &mut self.execution_modes,
            Section::DebugNames => &mut self.debug_names,
            Section::Annotations => &mut self.annotations,
            Section::Globals => &mut self.globals,
        };
        write_instruction(out, op, operands);
    }

    fn require_capability(&mut self, capability: Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    pub(crate) fn name(&mut self, id: Word, name: &str) {
        let mut operands = vec![id];
        operands.extend(string_words(name));
        self.write(Section::DebugNames, Op::Name, &operands);
    }

    fn member_name(&mut self, id: Word, member: u32, name: &str) {
        let mut operands = vec![id, member];
        operands.extend(string_words(name));
        self.write(Section::DebugNames, Op::MemberName, &operands);
    }

    pub(crate) fn decorate(&mut self, id: Word, decoration: Decoration, extra: &[Word]) {
        let mut operands = vec![id, decoration as u32];
        operands.extend_from_slice(extra);
        self.write(Section::Annotations, Op::Decorate, &operands);
    }

    fn member_decorate(&mut self, id: Word, member: u32, decoration: Decoration, extra: &[Word]) {
        let mut operands = vec![id, member, decoration as u32];
        operands.extend_from_slice(extra);
        self.write(Section::Annotations, Op::MemberDecorate, &operands);
    }

    pub(crate) fn glsl_import(&mut self) -> Word {
        if let Some(id) = self.glsl {
            return id;
        }
        let id = self.alloc_id();
        let mut operands = vec![id];
        operands.extend(string_words("GLSL.std.450"));
        self.write(Section::ExtInstImports, Op::ExtInstImport, &operands);
        self.glsl = Some(id);
        id
    }

    // Types

    pub fn type_id(&mut self, ty: TypeId) -> Result<Word> {
        if let Some(&id) = self.type_ids.get(&ty) {
            return Ok(id);
        }
        let program = self.program;
        let t = &program.types[ty];
        let id = match &t.kind {
            TypeKind::Primitive(primitive) => {
                let id = self.alloc_id();
                match *primitive {
                    PrimitiveType::Void => self.write(Section::Globals, Op::TypeVoid, &[id]),
                    PrimitiveType::Bool => self.write(Section::Globals, Op::TypeBool, &[id]),
                    PrimitiveType::Int { bits, signed } => {
                        match bits {
                            8 => self.require_capability(Capability::Int8),
                            16 => self.require_capability(Capability::Int16),
                            64 => self.require_capability(Capability::Int64),
                            _ => {}
                        }
                        self.write(Section::Globals, Op::TypeInt, &[id, bits, signed as u32]);
                    }
                    PrimitiveType::Float { bits } => {
                        if bits == 64 {
                            self.require_capability(Capability::Float64);
                        }
                        self.write(Section::Globals, Op::TypeFloat, &[id, bits]);
                    }
                }
                id
            }
            TypeKind::Struct { vector_width: Some(width), .. } => {
                let component = self.type_id(program.builtins.f32)?;
                let id = self.alloc_id();
                self.write(Section::Globals, Op::TypeVector, &[id, component, *width]);
                id
            }
            TypeKind::Struct { members, vector_width: None } => {
                let mut operands = Vec::with_capacity(members.len() + 1);
                for member in members {
                    if program.is_pointer(member.ty) {
                        bail_codegen_at!(member.span, "Pointer members are not supported");
                    }
                    operands.push(self.type_id(member.ty)?);
                }
                let id = self.alloc_id();
                operands.insert(0, id);
                self.write(Section::Globals, Op::TypeStruct, &operands);
                self.name(id, &t.name);
                for (index, member) in members.iter().enumerate() {
                    self.member_name(id, index as u32, &member.name);
                }
                id
            }
            TypeKind::Pointer { pointee, storage } => {
                let class = match storage {
                    StorageClass::Uniform => sp::StorageClass::Uniform,
                    StorageClass::Function => sp::StorageClass::Function,
                };
                let pointee = self.type_id(*pointee)?;
                self.pointer_type(class, pointee)
            }
        };
        self.type_ids.insert(ty, id);
        Ok(id)
    }

    pub fn pointer_type(&mut self, class: sp::StorageClass, pointee: Word) -> Word {
        let key = (class as u32, pointee);
        if let Some(&id) = self.pointer_type_ids.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        self.write(Section::Globals, Op::TypePointer, &[id, class as u32, pointee]);
        self.pointer_type_ids.insert(key, id);
        id
    }

    pub fn function_type(&mut self, ret: Word, params: Vec<Word>) -> Word {
        let key = (ret, params);
        if let Some(&id) = self.function_type_ids.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        let mut operands = vec![id, ret];
        operands.extend_from_slice(&key.1);
        self.write(Section::Globals, Op::TypeFunction, &operands);
        self.function_type_ids.insert(key, id);
        id
    }

    /// `(size, alignment)` of `ty` in a uniform buffer.
    fn uniform_layout(&mut self, ty: TypeId) -> Result<(u32, u32)> {
        let program = self.program;
        let t = &program.types[ty];
        match &t.kind {
            TypeKind::Primitive(PrimitiveType::Int { bits: 32, .. }) | TypeKind::Primitive(PrimitiveType::Float { bits: 32 }) => {
                Ok((4, 4))
            }
            TypeKind::Primitive(PrimitiveType::Int { bits: 64, .. }) | TypeKind::Primitive(PrimitiveType::Float { bits: 64 }) => {
                Ok((8, 8))
            }
            TypeKind::Struct { vector_width: Some(width), .. } => Ok(match width {
                2 => (8, 8),
                3 => (12, 16),
                _ => (16, 16),
            }),
            TypeKind::Struct { members, vector_width: None } => {
                let mut offset = 0;
                let mut align = 16;
                let mut offsets = Vec::with_capacity(members.len());
                for member in members {
                    let (size, member_align) = self.uniform_layout(member.ty)?;
                    offset = (offset + member_align - 1) / member_align * member_align;
                    offsets.push(offset);
                    offset += size;
                    align = align.max(member_align);
                }
                if self.laid_out.insert(ty) {
                    let id = self.type_id(ty)?;
                    for (index, member_offset) in offsets.into_iter().enumerate() {
                        self.member_decorate(id, index as u32, Decoration::Offset, &[member_offset]);
                    }
                }
                Ok(((offset + align - 1) / align * align, align))
            }
            _ => bail_codegen!("Type '{}' cannot be used in a uniform buffer", t.name),
        }
    }

    /// Block-decorated `struct { T }` that a uniform variable points to.
    pub(crate) fn uniform_wrapper(&mut self, pointee: TypeId) -> Result<Word> {
        if let Some(&id) = self.uniform_wrappers.get(&pointee) {
            return Ok(id);
        }
        self.uniform_layout(pointee)?;
        let inner = self.type_id(pointee)?;
        let id = self.alloc_id();
        self.write(Section::Globals, Op::TypeStruct, &[id, inner]);
        self.decorate(id, Decoration::Block, &[]);
        self.member_decorate(id, 0, Decoration::Offset, &[0]);
        let name = format!("{}_block", self.program.type_name(pointee));
        self.name(id, &name);
        self.uniform_wrappers.insert(pointee, id);
        Ok(id)
    }

    // Constants

    pub fn constant(&mut self, ty: TypeId, literal: Literal) -> Result<Word> {
        let type_id = self.type_id(ty)?;
        let primitive = self.program.primitive(ty);
        let bits = match (literal, primitive) {
            (Literal::Bool(b), Some(PrimitiveType::Bool)) => b as u64,
            (Literal::Int(v), Some(PrimitiveType::Int { bits, .. })) if bits < 64 => v & ((1u64 << bits) - 1),
            (Literal::Int(v), Some(PrimitiveType::Int { .. })) => v,
            (Literal::F32(v), Some(PrimitiveType::Float { bits: 32 })) => v.to_bits() as u64,
            (Literal::F64(v), Some(PrimitiveType::Float { bits: 64 })) => v.to_bits(),
            (Literal::F64(v), Some(PrimitiveType::Float { bits: 32 })) => (v as f32).to_bits() as u64,
            (Literal::F32(v), Some(PrimitiveType::Float { bits: 64 })) => (v as f64).to_bits(),
            _ => bail_codegen!("Literal {:?} does not fit type '{}'", literal, self.program.type_name(ty)),
        };
        if let Some(&id) = self.constant_ids.get(&(type_id, bits)) {
            return Ok(id);
        }
        let id = self.alloc_id();
        match primitive {
            Some(PrimitiveType::Bool) => {
                let op = if bits != 0 { Op::ConstantTrue } else { Op::ConstantFalse };
                self.write(Section::Globals, op, &[type_id, id]);
            }
            Some(PrimitiveType::Int { bits: 64, .. }) | Some(PrimitiveType::Float { bits: 64 }) => {
                self.write(Section::Globals, Op::Constant, &[type_id, id, bits as u32, (bits >> 32) as u32]);
            }
            _ => self.write(Section::Globals, Op::Constant, &[type_id, id, bits as u32]),
        }
        self.constant_ids.insert((type_id, bits), id);
        Ok(id)
    }

    pub fn constant_u32_index(&mut self, index: u32) -> Result<Word> {
        self.constant(self.program.builtins.s32, Literal::Int(index as u64))
    }

    pub fn constant_null(&mut self, ty: TypeId) -> Result<Word> {
        let type_id = self.type_id(ty)?;
        if let Some(&id) = self.null_ids.get(&type_id) {
            return Ok(id);
        }
        let id = self.alloc_id();
        self.write(Section::Globals, Op::ConstantNull, &[type_id, id]);
        self.null_ids.insert(type_id, id);
        Ok(id)
    }

    pub fn undef(&mut self, ty: TypeId) -> Result<Word> {
        let type_id = self.type_id(ty)?;
        if let Some(&id) = self.undef_ids.get(&type_id) {
            return Ok(id);
        }
        let id = self.alloc_id();
        self.write(Section::Globals, Op::Undef, &[type_id, id]);
        self.undef_ids.insert(type_id, id);
        Ok(id)
    }

    /// Global initializers must be literals, optionally negated.
    fn constant_initializer(&mut self, init: ExprId) -> Result<Word> {
        let program = self.program;
        let e = &program.exprs[init];
        let literal = match &e.kind {
            ExprKind::Literal(literal) => *literal,
            ExprKind::Unary { op: crate::operators::UnaryOp::Neg, operand } => match program.exprs[*operand].kind {
                ExprKind::Literal(Literal::Int(v)) => Literal::Int(v.wrapping_neg()),
                ExprKind::Literal(Literal::F32(v)) => Literal::F32(-v),
                ExprKind::Literal(Literal::F64(v)) => Literal::F64(-v),
                _ => bail_codegen_at!(e.span, "Global initializers must be constant"),
            },
            _ => bail_codegen_at!(e.span, "Global initializers must be constant"),
        };
        self.constant(e.ty, literal)
    }

    /// Private variable backing a global, created on first use.
    pub fn global_var(&mut self, var: VarId) -> Result<Word> {
        if let Some(&id) = self.global_vars.get(&var) {
            return Ok(id);
        }
        let program = self.program;
        let v = &program.vars[var];
        let pointee = self.type_id(v.ty)?;
        let pointer = self.pointer_type(sp::StorageClass::Private, pointee);
        let init = match v.init {
            Some(init) => Some(self.constant_initializer(init)?),
            None => None,
        };
        let id = self.alloc_id();
        let mut operands = vec![pointer, id, sp::StorageClass::Private as u32];
        operands.extend(init);
        self.write(Section::Globals, Op::Variable, &operands);
        self.name(id, &v.name);
        self.global_vars.insert(var, id);
        Ok(id)
    }

    pub fn function_id(&mut self, function: FunctionId) -> Word {
        if let Some(&id) = self.function_ids.get(&function) {
            return id;
        }
        let id = self.alloc_id();
        self.function_ids.insert(function, id);
        id
    }

    pub(crate) fn note_call(&mut self, function: FunctionId) {
        if !self.called_functions.contains(&function) {
            self.called_functions.push(function);
        }
    }

    pub(crate) fn append_function(&mut self, function: FunctionId, words: Vec<Word>) {
        self.functions.extend(words);
        self.emitted_functions.insert(function);
        if self.program.functions[function].is_entry_point() && !self.entry_order.contains(&function) {
            self.entry_order.push(function);
        }
    }

    /// Writes the header and every section. Nothing is returned unless the
    /// whole module is valid.
    pub fn finalize(&mut self) -> Result<Vec<Word>> {
        let program = self.program;
        for &function in &self.called_functions {
            if !self.emitted_functions.contains(&function) {
                let f = &program.functions[function];
                bail_codegen_at!(f.span, "Function '{}' is called but never defined", f.name);
            }
        }

        for &function in &self.entry_order.clone() {
            let f = &program.functions[function];
            let model = match f.kind {
                FunctionKind::Vertex => sp::ExecutionModel::Vertex,
                _ => sp::ExecutionModel::Fragment,
            };
            let id = self.function_id(function);
            let mut operands = vec![model as u32, id];
            operands.extend(string_words(&f.name));
            if let Some(interface) = self.entry_interfaces.get(&function) {
                operands.extend_from_slice(&interface.interface);
            }
            self.write(Section::EntryPoints, Op::EntryPoint, &operands);
            if f.kind == FunctionKind::Fragment {
                self.write(Section::ExecutionModes, Op::ExecutionMode, &[id, sp::ExecutionMode::OriginUpperLeft as u32]);
            }
        }

        let (major, minor) = self.options.spirv_version;
        let mut words = vec![
            sp::MAGIC_NUMBER,
            (u32::from(major) << 16) | (u32::from(minor) << 8),
            self.options.generator_id,
            self.id_bound(),
            0,
        ];
        for &capability in &self.capabilities {
            write_instruction(&mut words, Op::Capability, &[capability as u32]);
        }
        words.extend_from_slice(&self.ext_inst_imports);
        write_instruction(
            &mut words,
            Op::MemoryModel,
            &[sp::AddressingModel::Logical as u32, sp::MemoryModel::GLSL450 as u32],
        );
        for section in [
            &self.entry_points,
            &self.execution_modes,
            &self.debug_names,
            &self.annotations,
            &self.globals,
            &self.functions,
        ] {
            words.extend_from_slice(section);
        }
        debug!("Finalized module: id bound {}, {} words", self.id_bound(), words.len());
        Ok(words)
    }
}

/// Writes the finished module as words.
pub fn finalize_module(emitter: &mut SpirvEmitter) -> Result<Vec<Word>> {
    emitter.finalize()
}

/// Writes the finished module as little-endian bytes.
pub fn finalize_module_bytes(emitter: &mut SpirvEmitter) -> Result<Vec<u8>> {
    let words = emitter.finalize()?;
    Ok(words.iter().flat_map(|w| w.to_le_bytes()).collect())
}
