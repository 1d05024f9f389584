//! Lowering of one SSA function into SPIR-V instructions.

use super::entry::rewrite_entry_args;
use super::{write_instruction, EntryInterface, SpirvEmitter};
use crate::ast::*;
use crate::error::{CompilerError, Result};
use crate::ssa::{Aux, BlockId, Merge, Op, SsaContext, ValueId};
use crate::{bail_codegen, bail_codegen_at};
use log::{debug, trace};
use rspirv::spirv::{self as sp, GLOp, Op as SpirvOp};
use spirv::Word;
use std::collections::HashMap;

/// A pointer into a vector narrowed by a swizzle. Loads and stores go
/// through the whole vector.
#[derive(Debug, Clone)]
struct SwizzlePtr {
    pointer: Word,
    vector: TypeId,
    components: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumClass {
    Float,
    Signed,
    Unsigned,
    Bool,
}

struct FunctionWriter<'e, 'a> {
    emitter: &'e mut SpirvEmitter<'a>,
    ctx: &'e SsaContext<'e>,
    program: &'a Program,
    interface: Option<EntryInterface>,
    ids: HashMap<ValueId, Word>,
    labels: HashMap<BlockId, Word>,
    swizzled: HashMap<ValueId, SwizzlePtr>,
    body: Vec<Word>,
}

/// Emits `ctx`'s function. Entry points have their arguments rewritten to
/// interface reads first, so [`emit_entry_point_header`] must have run.
///
/// [`emit_entry_point_header`]: super::emit_entry_point_header
pub fn emit_function(emitter: &mut SpirvEmitter, ctx: &mut SsaContext) -> Result<()> {
    let program = emitter.program();
    let function = ctx.function;
    let f = &program.functions[function];
    debug!("Emitting SPIR-V for '{}'", f.name);

    let interface = if f.is_entry_point() {
        let Some(interface) = emitter.entry_interfaces.get(&function).cloned() else {
            bail_codegen_at!(f.span, "Entry point '{}' has no declared interface", f.name);
        };
        rewrite_entry_args(ctx, &interface)?;
        Some(interface)
    } else {
        None
    };

    let words = FunctionWriter {
        emitter: &mut *emitter,
        ctx: &*ctx,
        program,
        interface,
        ids: HashMap::new(),
        labels: HashMap::new(),
        swizzled: HashMap::new(),
        body: Vec::new(),
    }
    .write()?;
    emitter.append_function(function, words);
    Ok(())
}

impl<'e, 'a> FunctionWriter<'e, 'a> {
    fn inst(&mut self, op: SpirvOp, operands: &[Word]) {
        write_instruction(&mut self.body, op, operands);
    }

    fn write(mut self) -> Result<Vec<Word>> {
        let program = self.program;
        let function = self.ctx.function;
        let f = &program.functions[function];
        let function_id = self.emitter.function_id(function);

        let mut params = Vec::new();
        let return_type = if f.is_entry_point() {
            self.emitter.type_id(program.builtins.void)?
        } else {
            if program.is_pointer(f.return_type) {
                bail_codegen_at!(f.span, "Functions cannot return pointers");
            }
            for &arg in &f.args {
                let var = &program.vars[arg];
                if program.is_pointer(var.ty) {
                    bail_codegen_at!(var.span, "Pointer arguments are only supported on entry points");
                }
                params.push(self.emitter.type_id(var.ty)?);
            }
            self.emitter.type_id(f.return_type)?
        };
        let function_type = self.emitter.function_type(return_type, params.clone());
        self.inst(
            SpirvOp::Function,
            &[return_type, function_id, sp::FunctionControl::NONE.bits(), function_type],
        );
        self.emitter.name(function_id, &f.name);

        if !f.is_entry_point() {
            let mut param_ids = Vec::with_capacity(params.len());
            for &ty in &params {
                let id = self.emitter.alloc_id();
                self.inst(SpirvOp::FunctionParameter, &[ty, id]);
                param_ids.push(id);
            }
            let ctx = self.ctx;
            for &value in &ctx.blocks[ctx.entry].values {
                if let (Op::FunctionArg, Aux::Arg(index)) = (ctx.values[value].op, &ctx.values[value].aux) {
                    if let Some(&id) = param_ids.get(*index as usize) {
                        self.ids.insert(value, id);
                    }
                }
            }
        }

        for block in self.ctx.blocks.handles() {
            let label = self.emitter.alloc_id();
            self.labels.insert(block, label);
        }

        // Function-storage variables must open the first block.
        let mut variables = Vec::new();
        let allocas: Vec<ValueId> = self.ctx.live_values().filter(|v| self.ctx.values[*v].op == Op::Alloca).collect();
        for value in allocas {
            let ty = self.value_type(value)?;
            if program.is_pointer(ty) {
                bail_codegen!("Variables of pointer type '{}' are not supported", program.type_name(ty));
            }
            let pointee = self.emitter.type_id(ty)?;
            let pointer = self.emitter.pointer_type(sp::StorageClass::Function, pointee);
            let id = self.operand(value)?;
            write_instruction(&mut variables, SpirvOp::Variable, &[pointer, id, sp::StorageClass::Function as u32]);
        }

        let ctx = self.ctx;
        for (block, b) in ctx.blocks.iter() {
            if b.ending.is_none() {
                bail_codegen!("Block '{}' has no terminator", b.name);
            }
            let label = self.label(block)?;
            self.inst(SpirvOp::Label, &[label]);
            if block == ctx.entry {
                self.body.extend_from_slice(&variables);
            }
            for &value in &b.values {
                self.emit_value(block, value)?;
            }
        }
        self.inst(SpirvOp::FunctionEnd, &[]);
        Ok(self.body)
    }

    fn label(&self, block: BlockId) -> Result<Word> {
        self.labels
            .get(&block)
            .copied()
            .ok_or_else(|| CompilerError::CodegenError(format!("Block {} has no label", block.index()), Vec::new()))
    }

    fn value_type(&self, value: ValueId) -> Result<TypeId> {
        self.ctx.values[value]
            .ty
            .ok_or_else(|| CompilerError::CodegenError(format!("Value %{} has no type", value.index()), Vec::new()))
    }

    fn type_of(&mut self, value: ValueId) -> Result<Word> {
        let ty = self.value_type(value)?;
        self.emitter.type_id(ty)
    }

    /// The id of `value`. Constants and globals resolve to their module-level
    /// ids; anything else gets an id now and is defined when emitted.
    fn operand(&mut self, value: ValueId) -> Result<Word> {
        if let Some(&id) = self.ids.get(&value) {
            return Ok(id);
        }
        let ctx = self.ctx;
        let v = &ctx.values[value];
        let id = match (v.op, &v.aux) {
            (Op::Const, Aux::Const(literal)) => {
                let ty = self.value_type(value)?;
                self.emitter.constant(ty, *literal)?
            }
            (Op::ZeroInit, _) => {
                let ty = self.value_type(value)?;
                self.emitter.constant_null(ty)?
            }
            (Op::Undef, _) => {
                let ty = self.value_type(value)?;
                self.emitter.undef(ty)?
            }
            (Op::GlobalVar, Aux::Var(var)) => self.emitter.global_var(*var)?,
            (op, _) if op.is_marker() => bail_codegen!("Path marker %{} used as a value", value.index()),
            _ => self.emitter.alloc_id(),
        };
        self.ids.insert(value, id);
        Ok(id)
    }

    fn operands(&mut self, values: &[ValueId]) -> Result<Vec<Word>> {
        values.iter().map(|v| self.operand(*v)).collect()
    }

    fn storage_class(&self, pointer: ValueId) -> Result<sp::StorageClass> {
        let v = &self.ctx.values[pointer];
        match v.op {
            Op::Alloca => Ok(sp::StorageClass::Function),
            Op::GlobalVar => Ok(sp::StorageClass::Private),
            Op::UniformPtr => Ok(sp::StorageClass::Uniform),
            Op::GetElementPtr => self.storage_class(v.args[0]),
            _ => bail_codegen!("%{} ({:?}) is not a pointer", pointer.index(), v.op),
        }
    }

    fn num_class(&self, ty: TypeId) -> Result<NumClass> {
        if self.program.vector_width(ty).is_some() {
            return Ok(NumClass::Float);
        }
        match self.program.primitive(ty) {
            Some(PrimitiveType::Float { .. }) => Ok(NumClass::Float),
            Some(PrimitiveType::Int { signed: true, .. }) => Ok(NumClass::Signed),
            Some(PrimitiveType::Int { signed: false, .. }) => Ok(NumClass::Unsigned),
            Some(PrimitiveType::Bool) => Ok(NumClass::Bool),
            _ => bail_codegen!("No arithmetic on type '{}'", self.program.type_name(ty)),
        }
    }

    fn member_type(&self, ty: TypeId, member: u32) -> Result<TypeId> {
        match self.program.struct_members(ty).and_then(|m| m.get(member as usize)) {
            Some(m) => Ok(m.ty),
            None => bail_codegen!("Type '{}' has no member {}", self.program.type_name(ty), member),
        }
    }

    /// Splits markers into member indices and an optional trailing swizzle.
    fn split_path(&self, path: &[ValueId]) -> Result<(Vec<u32>, Option<Vec<u32>>)> {
        let mut members = Vec::with_capacity(path.len());
        let mut swizzle = None;
        for (i, &marker) in path.iter().enumerate() {
            match &self.ctx.values[marker].aux {
                Aux::Member(index) => members.push(*index),
                Aux::Swizzle(components) if i + 1 == path.len() => swizzle = Some(components.clone()),
                _ => bail_codegen!("Unsupported path element %{}", marker.index()),
            }
        }
        Ok((members, swizzle))
    }

    fn walk(&self, mut ty: TypeId, members: &[u32]) -> Result<TypeId> {
        for &member in members {
            ty = self.member_type(ty, member)?;
        }
        Ok(ty)
    }

    fn is_const_zero(&self, value: ValueId) -> bool {
        let v = &self.ctx.values[value];
        v.op == Op::Const && v.aux == Aux::Const(Literal::Int(0))
    }

    /// Converts an `f64` scalar to `f32` for vector arithmetic.
    fn f32_scalar(&mut self, value: ValueId) -> Result<Word> {
        let id = self.operand(value)?;
        if self.value_type(value)? != self.program.builtins.f64 {
            return Ok(id);
        }
        let f32_ty = self.emitter.type_id(self.program.builtins.f32)?;
        let converted = self.emitter.alloc_id();
        self.inst(SpirvOp::FConvert, &[f32_ty, converted, id]);
        Ok(converted)
    }

    /// Shuffle that overwrites `components` of `old` with `new`'s lanes.
    fn shuffle_insert(&mut self, vector: TypeId, result: Word, old: Word, new: Word, components: &[u32]) -> Result<()> {
        let width = self.program.vector_width(vector).unwrap_or(4);
        let ty = self.emitter.type_id(vector)?;
        let mut operands = vec![ty, result, old, new];
        for lane in 0..width {
            match components.iter().position(|c| *c == lane) {
                Some(j) => operands.push(width + j as u32),
                None => operands.push(lane),
            }
        }
        self.inst(SpirvOp::VectorShuffle, &operands);
        Ok(())
    }

    fn emit_merge(&mut self, block: BlockId) -> Result<()> {
        match self.ctx.blocks[block].merge {
            Some(Merge::Selection { merge }) => {
                let merge = self.label(merge)?;
                self.inst(SpirvOp::SelectionMerge, &[merge, sp::SelectionControl::NONE.bits()]);
            }
            Some(Merge::Loop { merge, continue_target }) => {
                let merge = self.label(merge)?;
                let continue_target = self.label(continue_target)?;
                self.inst(SpirvOp::LoopMerge, &[merge, continue_target, sp::LoopControl::NONE.bits()]);
            }
            None => {}
        }
        Ok(())
    }

    fn emit_value(&mut self, block: BlockId, value: ValueId) -> Result<()> {
        let ctx = self.ctx;
        let v = &ctx.values[value];
        trace!("emit_value: %{} = {:?}", value.index(), v.op);
        let args = v.args.as_slice();
        match v.op {
            Op::MemberAccess | Op::SwizzleIndices | Op::Alloca => {}
            Op::Const | Op::ZeroInit | Op::Undef | Op::GlobalVar => {
                self.operand(value)?;
            }
            Op::FunctionArg => {
                if self.interface.is_some() {
                    bail_codegen!("Entry point argument %{} was not rewritten", value.index());
                }
            }
            Op::UniformPtr => {
                let Aux::Var(var) = v.aux else {
                    bail_codegen!("Uniform pointer %{} has no variable", value.index());
                };
                let Some(&uniform) = self.interface.as_ref().and_then(|i| i.uniforms.get(&var)) else {
                    bail_codegen!("No uniform buffer is bound to '{}'", self.program.vars[var].name);
                };
                let pointee = self.type_of(value)?;
                let pointer = self.emitter.pointer_type(sp::StorageClass::Uniform, pointee);
                let zero = self.emitter.constant_u32_index(0)?;
                let id = self.operand(value)?;
                self.inst(SpirvOp::AccessChain, &[pointer, id, uniform, zero]);
            }
            Op::StageInput => {
                let Aux::Input { member } = v.aux else {
                    bail_codegen!("Stage input %{} has no member", value.index());
                };
                let Some(&input) = self.interface.as_ref().and_then(|i| i.inputs.get(member as usize)) else {
                    bail_codegen!("No input variable for stage_in member {}", member);
                };
                let ty = self.type_of(value)?;
                let id = self.operand(value)?;
                self.inst(SpirvOp::Load, &[ty, id, input]);
            }
            Op::MakeStruct => {
                let ty = self.type_of(value)?;
                let id = self.operand(value)?;
                let mut operands = vec![ty, id];
                operands.extend(self.operands(args)?);
                self.inst(SpirvOp::CompositeConstruct, &operands);
            }
            Op::GetElementPtr => self.emit_element_ptr(value)?,
            Op::Load => {
                let ty = self.type_of(value)?;
                match self.swizzled.get(&args[0]).cloned() {
                    Some(swizzle) => {
                        let vector = self.emitter.type_id(swizzle.vector)?;
                        let loaded = self.emitter.alloc_id();
                        self.inst(SpirvOp::Load, &[vector, loaded, swizzle.pointer]);
                        let id = self.operand(value)?;
                        let mut operands = vec![ty, id, loaded, loaded];
                        operands.extend_from_slice(&swizzle.components);
                        self.inst(SpirvOp::VectorShuffle, &operands);
                    }
                    None => {
                        let pointer = self.operand(args[0])?;
                        let id = self.operand(value)?;
                        self.inst(SpirvOp::Load, &[ty, id, pointer]);
                    }
                }
            }
            Op::Store => {
                let stored = self.operand(args[1])?;
                match self.swizzled.get(&args[0]).cloned() {
                    Some(swizzle) => {
                        let vector = self.emitter.type_id(swizzle.vector)?;
                        let old = self.emitter.alloc_id();
                        self.inst(SpirvOp::Load, &[vector, old, swizzle.pointer]);
                        let merged = self.emitter.alloc_id();
                        self.shuffle_insert(swizzle.vector, merged, old, stored, &swizzle.components)?;
                        self.inst(SpirvOp::Store, &[swizzle.pointer, merged]);
                    }
                    None => {
                        let pointer = self.operand(args[0])?;
                        self.inst(SpirvOp::Store, &[pointer, stored]);
                    }
                }
            }
            Op::ExtractValue => {
                let aggregate = args[0];
                let (members, swizzle) = self.split_path(&args[1..])?;
                let source = self.operand(aggregate)?;
                let ty = self.type_of(value)?;
                let id = self.operand(value)?;
                match swizzle {
                    None => {
                        let mut operands = vec![ty, id, source];
                        operands.extend_from_slice(&members);
                        self.inst(SpirvOp::CompositeExtract, &operands);
                    }
                    Some(components) => {
                        let vector = if members.is_empty() {
                            source
                        } else {
                            let vector_ty = self.walk(self.value_type(aggregate)?, &members)?;
                            let vector_ty = self.emitter.type_id(vector_ty)?;
                            let extracted = self.emitter.alloc_id();
                            let mut operands = vec![vector_ty, extracted, source];
                            operands.extend_from_slice(&members);
                            self.inst(SpirvOp::CompositeExtract, &operands);
                            extracted
                        };
                        let mut operands = vec![ty, id, vector, vector];
                        operands.extend_from_slice(&components);
                        self.inst(SpirvOp::VectorShuffle, &operands);
                    }
                }
            }
            Op::InsertValue => {
                let aggregate = args[0];
                let (members, swizzle) = self.split_path(&args[2..])?;
                let source = self.operand(aggregate)?;
                let element = self.operand(args[1])?;
                let ty = self.type_of(value)?;
                let id = self.operand(value)?;
                match swizzle {
                    None => {
                        let mut operands = vec![ty, id, element, source];
                        operands.extend_from_slice(&members);
                        self.inst(SpirvOp::CompositeInsert, &operands);
                    }
                    Some(components) if members.is_empty() => {
                        let vector = self.value_type(aggregate)?;
                        self.shuffle_insert(vector, id, source, element, &components)?;
                    }
                    Some(components) => {
                        let vector = self.walk(self.value_type(aggregate)?, &members)?;
                        let vector_ty = self.emitter.type_id(vector)?;
                        let old = self.emitter.alloc_id();
                        let mut operands = vec![vector_ty, old, source];
                        operands.extend_from_slice(&members);
                        self.inst(SpirvOp::CompositeExtract, &operands);
                        let merged = self.emitter.alloc_id();
                        self.shuffle_insert(vector, merged, old, element, &components)?;
                        let mut operands = vec![ty, id, merged, source];
                        operands.extend_from_slice(&members);
                        self.inst(SpirvOp::CompositeInsert, &operands);
                    }
                }
            }
            Op::SwizzleExpr => {
                let Aux::Swizzle(components) = &ctx.values[args[1]].aux else {
                    bail_codegen!("Swizzle %{} has no components", value.index());
                };
                let base = self.operand(args[0])?;
                let ty = self.type_of(value)?;
                let id = self.operand(value)?;
                let mut operands = vec![ty, id, base, base];
                operands.extend_from_slice(components);
                self.inst(SpirvOp::VectorShuffle, &operands);
            }
            Op::Splat => {
                let scalar = self.f32_scalar(args[0])?;
                let vector = self.value_type(value)?;
                let width = self.program.vector_width(vector).unwrap_or(1);
                let ty = self.emitter.type_id(vector)?;
                let id = self.operand(value)?;
                let mut operands = vec![ty, id];
                operands.extend(std::iter::repeat(scalar).take(width as usize));
                self.inst(SpirvOp::CompositeConstruct, &operands);
            }
            Op::Call => self.emit_call(value)?,
            Op::Phi => {
                let ty = self.type_of(value)?;
                let id = self.operand(value)?;
                let mut operands = vec![ty, id];
                let preds = &ctx.blocks[block].preds;
                if preds.len() != args.len() {
                    bail_codegen!("Phi %{} has {} operands for {} predecessors", value.index(), args.len(), preds.len());
                }
                for (&arg, &pred) in args.iter().zip(preds) {
                    operands.push(self.operand(arg)?);
                    operands.push(self.label(pred)?);
                }
                self.inst(SpirvOp::Phi, &operands);
            }
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::BitAnd
            | Op::BitOr
            | Op::BitXor
            | Op::Shl
            | Op::Shr
            | Op::LogicalAnd
            | Op::LogicalOr
            | Op::Equal
            | Op::NotEqual
            | Op::Less
            | Op::LessEqual
            | Op::Greater
            | Op::GreaterEqual => self.emit_binary(value)?,
            Op::UnaryNeg | Op::UnaryNot | Op::BitNot => self.emit_unary(value)?,
            Op::Jump => {
                let Aux::Block(target) = v.aux else {
                    bail_codegen!("Jump %{} has no target", value.index());
                };
                self.emit_merge(block)?;
                let target = self.label(target)?;
                self.inst(SpirvOp::Branch, &[target]);
            }
            Op::CondJump => {
                let Aux::CondJump { then, els } = v.aux else {
                    bail_codegen!("Conditional jump %{} has no targets", value.index());
                };
                let cond = self.operand(args[0])?;
                self.emit_merge(block)?;
                let then = self.label(then)?;
                let els = self.label(els)?;
                self.inst(SpirvOp::BranchConditional, &[cond, then, els]);
            }
            Op::Return => {
                let result = self.operand(args[0])?;
                match self.interface.clone() {
                    Some(interface) => {
                        for (member, output) in interface.outputs {
                            match member {
                                None => self.inst(SpirvOp::Store, &[output, result]),
                                Some(member) => {
                                    let member_ty = self.member_type(self.value_type(args[0])?, member)?;
                                    let member_ty = self.emitter.type_id(member_ty)?;
                                    let extracted = self.emitter.alloc_id();
                                    self.inst(SpirvOp::CompositeExtract, &[member_ty, extracted, result, member]);
                                    self.inst(SpirvOp::Store, &[output, extracted]);
                                }
                            }
                        }
                        self.inst(SpirvOp::Return, &[]);
                    }
                    None => self.inst(SpirvOp::ReturnValue, &[result]),
                }
            }
            Op::ReturnVoid => self.inst(SpirvOp::Return, &[]),
            Op::Unreachable => self.inst(SpirvOp::Unreachable, &[]),
        }
        Ok(())
    }

    fn emit_element_ptr(&mut self, value: ValueId) -> Result<()> {
        let ctx = self.ctx;
        let v = &ctx.values[value];
        let base = v.args[0];
        let mut indices = &v.args[1..];
        if ctx.values[base].op == Op::UniformPtr {
            if let Some(&first) = indices.first() {
                if !self.is_const_zero(first) {
                    bail_codegen!("Only index 0 is supported on a buffer pointer");
                }
                indices = &indices[1..];
            }
        }
        let (members, swizzle) = self.split_path(indices)?;
        let class = self.storage_class(base)?;
        let target = self.walk(self.value_type(base)?, &members)?;
        let base_id = self.operand(base)?;

        let pointer = if members.is_empty() {
            base_id
        } else {
            let pointee = self.emitter.type_id(target)?;
            let pointer_ty = self.emitter.pointer_type(class, pointee);
            let id = if swizzle.is_some() { self.emitter.alloc_id() } else { self.operand(value)? };
            let mut operands = vec![pointer_ty, id, base_id];
            for member in members {
                operands.push(self.emitter.constant_u32_index(member)?);
            }
            self.inst(SpirvOp::AccessChain, &operands);
            id
        };
        match swizzle {
            Some(components) => {
                self.swizzled.insert(value, SwizzlePtr { pointer, vector: target, components });
            }
            None => {
                self.ids.insert(value, pointer);
            }
        }
        Ok(())
    }

    fn emit_call(&mut self, value: ValueId) -> Result<()> {
        let ctx = self.ctx;
        let v = &ctx.values[value];
        let Aux::Function(callee) = v.aux else {
            bail_codegen!("Call %{} has no callee", value.index());
        };
        let args = self.operands(&v.args)?;
        let callee_fn = &self.program.functions[callee];
        let ty = self.type_of(value)?;
        let id = self.operand(value)?;
        let glsl = match callee_fn.intrinsic {
            None => {
                if callee_fn.is_entry_point() {
                    bail_codegen_at!(callee_fn.span, "Entry point '{}' cannot be called", callee_fn.name);
                }
                self.emitter.note_call(callee);
                let function_id = self.emitter.function_id(callee);
                let mut operands = vec![ty, id, function_id];
                operands.extend(args);
                self.inst(SpirvOp::FunctionCall, &operands);
                return Ok(());
            }
            Some(Intrinsic::DotVec3) => {
                let mut operands = vec![ty, id];
                operands.extend(args);
                self.inst(SpirvOp::Dot, &operands);
                return Ok(());
            }
            Some(Intrinsic::Hsv) => bail_codegen!("Intrinsic 'hsv' has no SPIR-V lowering"),
            Some(Intrinsic::Sin) => GLOp::Sin,
            Some(Intrinsic::Cos) => GLOp::Cos,
            Some(Intrinsic::Atan) => GLOp::Atan,
            Some(Intrinsic::Log) => GLOp::Log,
            Some(Intrinsic::Abs) => GLOp::FAbs,
            Some(Intrinsic::Length) => GLOp::Length,
        };
        let import = self.emitter.glsl_import();
        let mut operands = vec![ty, id, import, glsl as u32];
        operands.extend(args);
        self.inst(SpirvOp::ExtInst, &operands);
        Ok(())
    }

    fn emit_binary(&mut self, value: ValueId) -> Result<()> {
        let v = &self.ctx.values[value];
        let op = v.op;
        let (lhs, rhs) = (v.args[0], v.args[1]);
        let lhs_ty = self.value_type(lhs)?;
        let rhs_ty = self.value_type(rhs)?;
        let ty = self.type_of(value)?;

        if op == Op::Mul {
            let lhs_vector = self.program.vector_width(lhs_ty).is_some();
            let rhs_vector = self.program.vector_width(rhs_ty).is_some();
            if lhs_vector != rhs_vector {
                let (vector, scalar) = if lhs_vector { (lhs, rhs) } else { (rhs, lhs) };
                let vector = self.operand(vector)?;
                let scalar = self.f32_scalar(scalar)?;
                let id = self.operand(value)?;
                self.inst(SpirvOp::VectorTimesScalar, &[ty, id, vector, scalar]);
                return Ok(());
            }
        }

        let class = self.num_class(lhs_ty)?;
        use NumClass::*;
        let spirv_op = match (op, class) {
            (Op::Add, Float) => SpirvOp::FAdd,
            (Op::Add, Signed | Unsigned) => SpirvOp::IAdd,
            (Op::Sub, Float) => SpirvOp::FSub,
            (Op::Sub, Signed | Unsigned) => SpirvOp::ISub,
            (Op::Mul, Float) => SpirvOp::FMul,
            (Op::Mul, Signed | Unsigned) => SpirvOp::IMul,
            (Op::Div, Float) => SpirvOp::FDiv,
            (Op::Div, Signed) => SpirvOp::SDiv,
            (Op::Div, Unsigned) => SpirvOp::UDiv,
            (Op::Rem, Float) => SpirvOp::FRem,
            (Op::Rem, Signed) => SpirvOp::SRem,
            (Op::Rem, Unsigned) => SpirvOp::UMod,
            (Op::BitAnd, Signed | Unsigned) => SpirvOp::BitwiseAnd,
            (Op::BitOr, Signed | Unsigned) => SpirvOp::BitwiseOr,
            (Op::BitXor, Signed | Unsigned) => SpirvOp::BitwiseXor,
            (Op::Shl, Signed | Unsigned) => SpirvOp::ShiftLeftLogical,
            (Op::Shr, Signed) => SpirvOp::ShiftRightArithmetic,
            (Op::Shr, Unsigned) => SpirvOp::ShiftRightLogical,
            (Op::LogicalAnd, Bool) => SpirvOp::LogicalAnd,
            (Op::LogicalOr, Bool) => SpirvOp::LogicalOr,
            (Op::Equal, Float) => SpirvOp::FOrdEqual,
            (Op::Equal, Signed | Unsigned) => SpirvOp::IEqual,
            (Op::Equal, Bool) => SpirvOp::LogicalEqual,
            (Op::NotEqual, Float) => SpirvOp::FOrdNotEqual,
            (Op::NotEqual, Signed | Unsigned) => SpirvOp::INotEqual,
            (Op::NotEqual, Bool) => SpirvOp::LogicalNotEqual,
            (Op::Less, Float) => SpirvOp::FOrdLessThan,
            (Op::Less, Signed) => SpirvOp::SLessThan,
            (Op::Less, Unsigned) => SpirvOp::ULessThan,
            (Op::LessEqual, Float) => SpirvOp::FOrdLessThanEqual,
            (Op::LessEqual, Signed) => SpirvOp::SLessThanEqual,
            (Op::LessEqual, Unsigned) => SpirvOp::ULessThanEqual,
            (Op::Greater, Float) => SpirvOp::FOrdGreaterThan,
            (Op::Greater, Signed) => SpirvOp::SGreaterThan,
            (Op::Greater, Unsigned) => SpirvOp::UGreaterThan,
            (Op::GreaterEqual, Float) => SpirvOp::FOrdGreaterThanEqual,
            (Op::GreaterEqual, Signed) => SpirvOp::SGreaterThanEqual,
            (Op::GreaterEqual, Unsigned) => SpirvOp::UGreaterThanEqual,
            (op, class) => bail_codegen!("No {:?} instruction for {:?} operands", op, class),
        };
        let lhs = self.operand(lhs)?;
        let rhs = self.operand(rhs)?;
        let id = self.operand(value)?;
        self.inst(spirv_op, &[ty, id, lhs, rhs]);
        Ok(())
    }

    fn emit_unary(&mut self, value: ValueId) -> Result<()> {
        let v = &self.ctx.values[value];
        let op = v.op;
        let operand_value = v.args[0];
        let operand_ty = self.value_type(operand_value)?;
        let class = self.num_class(operand_ty)?;
        let ty = self.type_of(value)?;
        let operand = self.operand(operand_value)?;
        match (op, class) {
            (Op::UnaryNeg, NumClass::Float) => {
                let id = self.operand(value)?;
                self.inst(SpirvOp::FNegate, &[ty, id, operand]);
            }
            (Op::UnaryNeg, NumClass::Signed | NumClass::Unsigned) => {
                let id = self.operand(value)?;
                self.inst(SpirvOp::SNegate, &[ty, id, operand]);
            }
            (Op::UnaryNot, NumClass::Bool) => {
                let id = self.operand(value)?;
                self.inst(SpirvOp::LogicalNot, &[ty, id, operand]);
            }
            (Op::UnaryNot, NumClass::Signed | NumClass::Unsigned) => {
                // !x is (x == 0 ? 1 : 0)
                let bool_ty = self.emitter.type_id(self.program.builtins.bool)?;
                let zero = self.emitter.constant(operand_ty, Literal::Int(0))?;
                let one = self.emitter.constant(operand_ty, Literal::Int(1))?;
                let is_zero = self.emitter.alloc_id();
                self.inst(SpirvOp::IEqual, &[bool_ty, is_zero, operand, zero]);
                let id = self.operand(value)?;
                self.inst(SpirvOp::Select, &[ty, id, is_zero, one, zero]);
            }
            (Op::BitNot, NumClass::Signed | NumClass::Unsigned) => {
                let id = self.operand(value)?;
                self.inst(SpirvOp::Not, &[ty, id, operand]);
            }
            (op, class) => bail_codegen!("No {:?} instruction for {:?} operands", op, class),
        }
        Ok(())
    }
}
