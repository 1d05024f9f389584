//! Entry point interfaces: uniform buffers, stage inputs and fragment
//! outputs.

use super::{EntryInterface, SpirvEmitter};
use crate::ast::*;
use crate::error::Result;
use crate::ssa::{Aux, Op, SsaContext, ValueId};
use crate::{bail_codegen, bail_codegen_at};
use log::debug;
use rspirv::spirv::{self as sp, Decoration, Op as SpirvOp};

/// Declares the interface variables of an entry point. Must run before the
/// entry point's body is emitted. Plain functions are ignored.
pub fn emit_entry_point_header(emitter: &mut SpirvEmitter, function: FunctionId) -> Result<()> {
    let program = emitter.program();
    let f = &program.functions[function];
    if !f.is_entry_point() {
        return Ok(());
    }
    debug!("Declaring interface of entry point '{}'", f.name);
    let mut interface = EntryInterface::default();

    for (&(set, binding), b) in &f.vk_bindings {
        let arg = &program.vars[b.arg];
        let Some(pointee) = program.pointee(arg.ty) else {
            bail_codegen_at!(arg.span, "Buffer argument '{}' is not a pointer", arg.name);
        };
        let wrapper = emitter.uniform_wrapper(pointee)?;
        let pointer = emitter.pointer_type(sp::StorageClass::Uniform, wrapper);
        let var = emitter.declare_variable(pointer, sp::StorageClass::Uniform);
        emitter.decorate(var, Decoration::DescriptorSet, &[set]);
        emitter.decorate(var, Decoration::Binding, &[binding]);
        emitter.name(var, &arg.name);
        interface.uniforms.insert(b.arg, var);
    }

    if let Some(stage_in) = f.stage_in {
        let arg = &program.vars[stage_in];
        let members = program.struct_members(arg.ty).unwrap_or(&[]);
        let mut location = 0;
        for member in members {
            let ty = emitter.type_id(member.ty)?;
            let pointer = emitter.pointer_type(sp::StorageClass::Input, ty);
            let var = emitter.declare_variable(pointer, sp::StorageClass::Input);
            if f.kind == FunctionKind::Fragment && member.is_position() {
                emitter.decorate(var, Decoration::BuiltIn, &[sp::BuiltIn::FragCoord as u32]);
            } else {
                emitter.decorate(var, Decoration::Location, &[location]);
                location += 1;
                if f.kind == FunctionKind::Fragment && program.is_integer(member.ty) {
                    emitter.decorate(var, Decoration::Flat, &[]);
                }
            }
            emitter.name(var, &format!("{}.{}", arg.name, member.name));
            interface.inputs.push(var);
            interface.interface.push(var);
        }
    }

    if f.kind == FunctionKind::Fragment && !program.is_void(f.return_type) {
        if f.return_type == program.builtins.float4 {
            let var = emitter.declare_output(f.return_type, 0, "out_color")?;
            interface.outputs.push((None, var));
            interface.interface.push(var);
        } else {
            let members = program.struct_members(f.return_type).unwrap_or(&[]);
            for (index, member) in members.iter().enumerate() {
                let Some(color) = member.color() else {
                    bail_codegen_at!(member.span, "Fragment output member '{}' has no color index", member.name);
                };
                let var = emitter.declare_output(member.ty, color, &format!("out_{}", member.name))?;
                interface.outputs.push((Some(index as u32), var));
                interface.interface.push(var);
            }
        }
    }

    emitter.function_id(function);
    emitter.entry_interfaces.insert(function, interface);
    Ok(())
}

impl<'a> SpirvEmitter<'a> {
    pub(crate) fn declare_variable(&mut self, pointer: spirv::Word, class: sp::StorageClass) -> spirv::Word {
        let id = self.alloc_id();
        self.write(super::Section::Globals, SpirvOp::Variable, &[pointer, id, class as u32]);
        id
    }

    fn declare_output(&mut self, ty: TypeId, location: u32, name: &str) -> Result<spirv::Word> {
        let ty = self.type_id(ty)?;
        let pointer = self.pointer_type(sp::StorageClass::Output, ty);
        let var = self.declare_variable(pointer, sp::StorageClass::Output);
        self.decorate(var, Decoration::Location, &[location]);
        self.name(var, name);
        Ok(var)
    }
}

/// Replaces an entry point's buffer and `stage_in` arguments by reads of
/// its interface variables. Member reads of a `stage_in` argument are
/// forwarded to the matching input; any other use sees a rebuilt struct.
pub(crate) fn rewrite_entry_args(ctx: &mut SsaContext, interface: &EntryInterface) -> Result<()> {
    let program = ctx.program;
    let f = &program.functions[ctx.function];
    let entry = ctx.entry;
    let args: Vec<ValueId> = ctx.blocks[entry]
        .values
        .iter()
        .copied()
        .filter(|v| ctx.values[*v].op == Op::FunctionArg)
        .collect();

    let mut tx = ctx.start_rewrite();
    for arg_value in args {
        let Aux::Arg(index) = ctx.values[arg_value].aux else {
            bail_codegen!("Function argument %{} has no index", arg_value.index());
        };
        let Some(&var) = f.args.get(index as usize) else {
            bail_codegen!("Function argument index {} is out of range", index);
        };
        let var_ty = program.vars[var].ty;

        if interface.uniforms.contains_key(&var) {
            let pointee = program.pointee(var_ty);
            let pointer = ctx.insert_before(&mut tx, entry, Op::UniformPtr, &[], Aux::Var(var), pointee, arg_value);
            ctx.replace_uses(arg_value, pointer);
            ctx.remove(&mut tx, arg_value);
        } else if f.stage_in == Some(var) {
            let members = program.struct_members(var_ty).unwrap_or(&[]);
            let mut inputs = Vec::with_capacity(members.len());
            for (member, m) in members.iter().enumerate() {
                let input = ctx.insert_before(
                    &mut tx,
                    entry,
                    Op::StageInput,
                    &[],
                    Aux::Input { member: member as u32 },
                    Some(m.ty),
                    arg_value,
                );
                inputs.push(input);
            }

            let mut users = ctx.values[arg_value].uses.clone();
            users.dedup();
            let mut forwarded = Vec::new();
            for user in users {
                let u = &ctx.values[user];
                if u.op != Op::ExtractValue || u.args.len() != 2 || u.args[0] != arg_value {
                    continue;
                }
                let Aux::Member(member) = ctx.values[u.args[1]].aux else {
                    continue;
                };
                if let Some(&input) = inputs.get(member as usize) {
                    ctx.replace_uses(user, input);
                    ctx.remove(&mut tx, user);
                    forwarded.push(user);
                }
            }
            if ctx.values[arg_value].uses.iter().any(|u| !forwarded.contains(u)) {
                let rebuilt = ctx.insert_before(&mut tx, entry, Op::MakeStruct, &inputs, Aux::None, Some(var_ty), arg_value);
                ctx.replace_uses(arg_value, rebuilt);
            }
            ctx.remove(&mut tx, arg_value);
        } else {
            bail_codegen_at!(program.vars[var].span, "Unexpected entry point argument '{}'", program.vars[var].name);
        }
    }
    ctx.finish_rewrite(tx);
    Ok(())
}
