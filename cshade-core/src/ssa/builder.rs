//! Lowering of typed function bodies into SSA.

use super::{Aux, BlockId, Merge, Op, SsaContext, ValueId};
use crate::ast::*;
use crate::error::Result;
use crate::operators::{BinaryOp, UnaryOp};
use crate::{bail_ssa_at, bail_ssa};
use log::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LvalueKind {
    /// A renamed variable; `value` is its current definition.
    Ssa,
    /// Memory; `value` is a pointer.
    Ptr,
}

/// An assignable location: a base plus a path of indices and markers.
#[derive(Debug, Clone)]
struct Lvalue {
    kind: LvalueKind,
    var: Option<VarId>,
    value: ValueId,
    args: Vec<ValueId>,
}

/// Builds the SSA graph of `function`'s body.
pub fn emit_function_ssa(program: &Program, function: FunctionId) -> Result<SsaContext<'_>> {
    let f = &program.functions[function];
    let Some(body) = f.body else {
        bail_ssa_at!(f.span, "Function '{}' has no body", f.name);
    };
    debug!("Building SSA for '{}'", f.name);

    let mut ctx = SsaContext::new(program, function);
    let entry = ctx.entry;
    for (index, &arg) in f.args.iter().enumerate() {
        let ty = Some(program.vars[arg].ty);
        let value = ctx.make_value(entry, Op::FunctionArg, &[], Aux::Arg(index as u32), ty);
        ctx.write_var(entry, arg, value);
    }

    ctx.emit_stmt(body)?;
    ctx.finish_body()?;
    debug_assert!(ctx.verify_use_def().is_ok());
    Ok(ctx)
}

impl<'a> SsaContext<'a> {
    fn finish_body(&mut self) -> Result<()> {
        let block = self.current;
        if self.is_terminated(block) {
            return Ok(());
        }
        if self.is_unreachable(block) {
            self.end_unreachable(block);
            return Ok(());
        }
        let f = &self.program.functions[self.function];
        if !self.program.is_void(f.return_type) {
            bail_ssa_at!(f.span, "Function '{}' reaches its end without returning a value", f.name);
        }
        self.end_return_void(block);
        Ok(())
    }

    /// Statements after a terminator go into a fresh, sealed block that
    /// nothing jumps to.
    fn ensure_open_block(&mut self) {
        if self.is_terminated(self.current) {
            let id = self.next_construct_id();
            let block = self.new_block(id, "unreachable");
            self.seal_block(block);
            self.current = block;
        }
    }

    fn jump_if_open(&mut self, target: BlockId) {
        if !self.is_terminated(self.current) {
            self.end_jump(self.current, target);
        }
    }

    fn emit_stmt(&mut self, stmt: StmtId) -> Result<()> {
        let program = self.program;
        trace!("emit_stmt: {:?}", program.stmts[stmt].kind);
        self.ensure_open_block();
        match &program.stmts[stmt].kind {
            StmtKind::Expr(expr) => {
                self.emit_expr(*expr)?;
            }
            StmtKind::VarDecl { vars, init } => self.emit_var_decl(vars, *init)?,
            StmtKind::Block(stmts) => {
                for &s in stmts {
                    self.emit_stmt(s)?;
                }
            }
            StmtKind::If { cond, then, els } => self.emit_if(*cond, *then, *els)?,
            StmtKind::For { init, cond, incr, body } => self.emit_for(*init, *cond, *incr, *body)?,
            StmtKind::Return(value) => match value {
                Some(expr) => {
                    let value = self.emit_expr(*expr)?;
                    self.end_return(self.current, value);
                }
                None => {
                    self.end_return_void(self.current);
                }
            },
        }
        Ok(())
    }

    fn emit_var_decl(&mut self, vars: &[VarId], init: Option<ExprId>) -> Result<()> {
        let init = match init {
            Some(expr) => Some(self.emit_expr(expr)?),
            None => None,
        };
        for &var in vars {
            let ty = self.program.vars[var].ty;
            if self.can_ssa(var) {
                let value = match init {
                    Some(value) => value,
                    None => self.make_value(self.current, Op::ZeroInit, &[], Aux::None, Some(ty)),
                };
                self.write_var(self.current, var, value);
            } else {
                let slot = self.make_value(self.current, Op::Alloca, &[], Aux::Var(var), Some(ty));
                self.set_non_ssa_slot(var, slot);
                if let Some(value) = init {
                    self.make_value(self.current, Op::Store, &[slot, value], Aux::None, None);
                }
            }
        }
        Ok(())
    }

    fn emit_if(&mut self, cond: ExprId, then: StmtId, els: Option<StmtId>) -> Result<()> {
        let cond = self.emit_expr(cond)?;
        let id = self.next_construct_id();
        let then_block = self.new_block(id, "if_body");
        let else_block = els.map(|_| self.new_block(id, "if_else"));
        let after = self.new_block(id, "if_after");

        let head = self.current;
        self.blocks[head].merge = Some(Merge::Selection { merge: after });
        self.end_cond_jump(head, cond, then_block, else_block.unwrap_or(after));
        self.seal_block(then_block);

        self.current = then_block;
        self.emit_stmt(then)?;
        self.jump_if_open(after);

        if let (Some(els), Some(else_block)) = (els, else_block) {
            self.seal_block(else_block);
            self.current = else_block;
            self.emit_stmt(els)?;
            self.jump_if_open(after);
        }

        self.seal_block(after);
        self.current = after;
        Ok(())
    }

    fn emit_for(&mut self, init: Option<ExprId>, cond: Option<ExprId>, incr: Option<ExprId>, body: StmtId) -> Result<()> {
        let id = self.next_construct_id();
        let init_block = self.new_block(id, "for_init");
        self.end_jump(self.current, init_block);
        self.seal_block(init_block);
        self.current = init_block;
        if let Some(init) = init {
            self.emit_expr(init)?;
        }

        // The back edge must target the block holding the loop merge, and a
        // condition that branches needs that block to itself.
        let branching = cond.map_or(false, |cond| self.program.expr_branches(cond));
        let header = if branching {
            let header = self.new_block(id, "for_header");
            self.end_jump(self.current, header);
            Some(header)
        } else {
            None
        };
        let cond_block = self.new_block(id, "for_cond");
        match header {
            Some(header) => {
                self.end_jump(header, cond_block);
                self.seal_block(cond_block);
            }
            None => {
                self.end_jump(self.current, cond_block);
            }
        }
        let loop_header = header.unwrap_or(cond_block);
        self.current = cond_block;
        let cond = match cond {
            Some(cond) => self.emit_expr(cond)?,
            None => {
                let ty = Some(self.program.builtins.bool);
                self.make_value(self.current, Op::Const, &[], Aux::Const(Literal::Bool(true)), ty)
            }
        };

        let body_block = self.new_block(id, "for_body");
        let after = self.new_block(id, "for_after");
        let cond_end = self.current;
        self.end_cond_jump(cond_end, cond, body_block, after);
        self.seal_block(body_block);
        self.seal_block(after);

        self.current = body_block;
        self.emit_stmt(body)?;
        let incr_block = self.new_block(id, "for_incr");
        self.jump_if_open(incr_block);
        self.seal_block(incr_block);
        self.current = incr_block;
        if let Some(incr) = incr {
            self.emit_expr(incr)?;
        }
        self.end_jump(self.current, loop_header);
        self.seal_block(loop_header);

        self.blocks[loop_header].merge = Some(Merge::Loop { merge: after, continue_target: incr_block });
        self.current = after;
        Ok(())
    }

    // Expressions

    fn emit_expr(&mut self, expr: ExprId) -> Result<ValueId> {
        let program = self.program;
        let e = &program.exprs[expr];
        trace!("emit_expr: {:?}", e.kind);
        let ty = Some(e.ty);
        match &e.kind {
            ExprKind::Literal(literal) => Ok(self.make_value(self.current, Op::Const, &[], Aux::Const(*literal), ty)),
            ExprKind::Variable(_) | ExprKind::Deref(_) | ExprKind::Index { .. } => {
                let lvalue = self.emit_lvalue(expr)?;
                Ok(self.emit_load(&lvalue, e.ty))
            }
            ExprKind::Member { .. } | ExprKind::Swizzle { .. } if e.is_lvalue => {
                let lvalue = self.emit_lvalue(expr)?;
                Ok(self.emit_load(&lvalue, e.ty))
            }
            ExprKind::Member { base, index } => {
                let base = self.emit_base_value(*base)?;
                let marker = self.make_value(self.current, Op::MemberAccess, &[], Aux::Member(*index), None);
                Ok(self.make_value(self.current, Op::ExtractValue, &[base, marker], Aux::None, ty))
            }
            ExprKind::Swizzle { base, components } => {
                let base = self.emit_base_value(*base)?;
                let marker = self.make_value(self.current, Op::SwizzleIndices, &[], Aux::Swizzle(components.clone()), None);
                Ok(self.make_value(self.current, Op::SwizzleExpr, &[base, marker], Aux::None, ty))
            }
            ExprKind::Binary { op, lhs, rhs, .. } => self.emit_binary(*op, *lhs, *rhs, e.ty),
            ExprKind::Unary { op, operand } => self.emit_unary(*op, *operand, e),
            ExprKind::Ternary { cond, then, els } => self.emit_ternary(*cond, *then, *els, e.ty),
            ExprKind::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.emit_expr(arg)?);
                }
                Ok(self.make_value(self.current, Op::Call, &values, Aux::Function(*function), ty))
            }
            ExprKind::StructInit { ty: struct_ty, args } => self.emit_struct_init(*struct_ty, args),
        }
    }

    /// The aggregate a non-addressable member access or swizzle reads from.
    fn emit_base_value(&mut self, base: ExprId) -> Result<ValueId> {
        let base_ty = self.program.exprs[base].ty;
        let value = self.emit_expr(base)?;
        match self.program.pointee(base_ty) {
            Some(pointee) => Ok(self.make_value(self.current, Op::Load, &[value], Aux::None, Some(pointee))),
            None => Ok(value),
        }
    }

    fn emit_lvalue(&mut self, expr: ExprId) -> Result<Lvalue> {
        let program = self.program;
        let e = &program.exprs[expr];
        match &e.kind {
            ExprKind::Variable(var) => {
                let var = *var;
                let v = &program.vars[var];
                if v.kind == VarKind::Global {
                    let global = self.make_value(self.current, Op::GlobalVar, &[], Aux::Var(var), Some(v.ty));
                    Ok(Lvalue { kind: LvalueKind::Ptr, var: Some(var), value: global, args: Vec::new() })
                } else if self.can_ssa(var) {
                    let value = self.read_var(self.current, var);
                    Ok(Lvalue { kind: LvalueKind::Ssa, var: Some(var), value, args: Vec::new() })
                } else {
                    let Some(slot) = self.non_ssa_slot(var) else {
                        bail_ssa_at!(e.span, "Variable '{}' has no storage", v.name);
                    };
                    Ok(Lvalue { kind: LvalueKind::Ptr, var: Some(var), value: slot, args: Vec::new() })
                }
            }
            ExprKind::Deref(pointer) => {
                let value = self.emit_expr(*pointer)?;
                Ok(Lvalue { kind: LvalueKind::Ptr, var: None, value, args: Vec::new() })
            }
            ExprKind::Member { base, index } => {
                let mut lvalue = self.emit_path_base(*base)?;
                let marker = self.make_value(self.current, Op::MemberAccess, &[], Aux::Member(*index), None);
                lvalue.args.push(marker);
                Ok(lvalue)
            }
            ExprKind::Swizzle { base, components } => {
                let mut lvalue = self.emit_path_base(*base)?;
                let marker = self.make_value(self.current, Op::SwizzleIndices, &[], Aux::Swizzle(components.clone()), None);
                lvalue.args.push(marker);
                Ok(lvalue)
            }
            ExprKind::Index { base, index } => {
                let pointer = self.emit_expr(*base)?;
                let index = self.emit_expr(*index)?;
                Ok(Lvalue { kind: LvalueKind::Ptr, var: None, value: pointer, args: vec![index] })
            }
            _ => bail_ssa_at!(e.span, "Expression cannot be assigned to"),
        }
    }

    /// The location a member access or swizzle extends. A pointer base is
    /// dereferenced with a leading zero index.
    fn emit_path_base(&mut self, base: ExprId) -> Result<Lvalue> {
        let base_ty = self.program.exprs[base].ty;
        if !self.program.is_pointer(base_ty) {
            return self.emit_lvalue(base);
        }
        let pointer = self.emit_expr(base)?;
        let zero = self.make_value(
            self.current,
            Op::Const,
            &[],
            Aux::Const(Literal::Int(0)),
            Some(self.program.builtins.s32),
        );
        Ok(Lvalue { kind: LvalueKind::Ptr, var: None, value: pointer, args: vec![zero] })
    }

    fn lvalue_pointer(&mut self, lvalue: &Lvalue, ty: TypeId) -> ValueId {
        if lvalue.args.is_empty() {
            return lvalue.value;
        }
        let mut args = vec![lvalue.value];
        args.extend_from_slice(&lvalue.args);
        self.make_value(self.current, Op::GetElementPtr, &args, Aux::None, Some(ty))
    }

    fn emit_load(&mut self, lvalue: &Lvalue, ty: TypeId) -> ValueId {
        match lvalue.kind {
            LvalueKind::Ssa if lvalue.args.is_empty() => lvalue.value,
            LvalueKind::Ssa => {
                let mut args = vec![lvalue.value];
                args.extend_from_slice(&lvalue.args);
                self.make_value(self.current, Op::ExtractValue, &args, Aux::None, Some(ty))
            }
            LvalueKind::Ptr => {
                let pointer = self.lvalue_pointer(lvalue, ty);
                self.make_value(self.current, Op::Load, &[pointer], Aux::None, Some(ty))
            }
        }
    }

    fn emit_store(&mut self, lvalue: &Lvalue, value: ValueId, ty: TypeId) -> Result<()> {
        match lvalue.kind {
            LvalueKind::Ssa => {
                let Some(var) = lvalue.var else {
                    bail_ssa!("Renamed location without a variable");
                };
                let new_value = if lvalue.args.is_empty() {
                    value
                } else {
                    let mut args = vec![lvalue.value, value];
                    args.extend_from_slice(&lvalue.args);
                    let aggregate_ty = self.values[lvalue.value].ty;
                    self.make_value(self.current, Op::InsertValue, &args, Aux::None, aggregate_ty)
                };
                self.write_var(self.current, var, new_value);
            }
            LvalueKind::Ptr => {
                let pointer = self.lvalue_pointer(lvalue, ty);
                self.make_value(self.current, Op::Store, &[pointer, value], Aux::None, None);
            }
        }
        Ok(())
    }

    fn emit_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId, ty: TypeId) -> Result<ValueId> {
        let lhs_ty = self.program.exprs[lhs].ty;
        match op {
            BinaryOp::Comma => {
                self.emit_expr(lhs)?;
                self.emit_expr(rhs)
            }
            BinaryOp::Assign => {
                let value = self.emit_expr(rhs)?;
                let value = self.coerce_to_vector(value, lhs_ty);
                let lvalue = self.emit_lvalue(lhs)?;
                self.emit_store(&lvalue, value, lhs_ty)?;
                Ok(value)
            }
            _ if op.is_assignment() => {
                let lvalue = self.emit_lvalue(lhs)?;
                let old = self.emit_load(&lvalue, lhs_ty);
                let rhs = self.emit_expr(rhs)?;
                let value = self.emit_arith(op.base(), old, rhs, lhs_ty)?;
                self.emit_store(&lvalue, value, lhs_ty)?;
                Ok(value)
            }
            _ => {
                let l = self.emit_expr(lhs)?;
                let r = self.emit_expr(rhs)?;
                self.emit_arith(op, l, r, ty)
            }
        }
    }

    fn emit_arith(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId, ty: TypeId) -> Result<ValueId> {
        let ssa_op = match op {
            BinaryOp::Add => Op::Add,
            BinaryOp::Sub => Op::Sub,
            BinaryOp::Mul => Op::Mul,
            BinaryOp::Div => Op::Div,
            BinaryOp::Rem => Op::Rem,
            BinaryOp::BitAnd => Op::BitAnd,
            BinaryOp::BitOr => Op::BitOr,
            BinaryOp::BitXor => Op::BitXor,
            BinaryOp::Shl => Op::Shl,
            BinaryOp::Shr => Op::Shr,
            BinaryOp::LogicalAnd => Op::LogicalAnd,
            BinaryOp::LogicalOr => Op::LogicalOr,
            BinaryOp::Equal => Op::Equal,
            BinaryOp::NotEqual => Op::NotEqual,
            BinaryOp::Less => Op::Less,
            BinaryOp::LessEqual => Op::LessEqual,
            BinaryOp::Greater => Op::Greater,
            BinaryOp::GreaterEqual => Op::GreaterEqual,
            other => bail_ssa!("Operator '{}' has no SSA form", other.token()),
        };
        // Vector-times-scalar has its own instruction; other vector ops
        // broadcast the scalar first.
        let lhs_ty = self.values[lhs].ty;
        let rhs = match lhs_ty {
            Some(vector) if ssa_op != Op::Mul => self.coerce_to_vector(rhs, vector),
            _ => rhs,
        };
        Ok(self.make_value(self.current, ssa_op, &[lhs, rhs], Aux::None, Some(ty)))
    }

    /// Splats a scalar when `target` is a vector type.
    fn coerce_to_vector(&mut self, value: ValueId, target: TypeId) -> ValueId {
        let value_ty = self.values[value].ty;
        if self.program.vector_width(target).is_none() || value_ty == Some(target) {
            return value;
        }
        self.make_value(self.current, Op::Splat, &[value], Aux::None, Some(target))
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: ExprId, e: &Expr) -> Result<ValueId> {
        let ty = Some(e.ty);
        match op {
            UnaryOp::Plus => self.emit_expr(operand),
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::BitNot => {
                let value = self.emit_expr(operand)?;
                let ssa_op = match op {
                    UnaryOp::Neg => Op::UnaryNeg,
                    UnaryOp::Not => Op::UnaryNot,
                    _ => Op::BitNot,
                };
                Ok(self.make_value(self.current, ssa_op, &[value], Aux::None, ty))
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let lvalue = self.emit_lvalue(operand)?;
                let old = self.emit_load(&lvalue, e.ty);
                let one = match self.program.primitive(e.ty) {
                    Some(PrimitiveType::Float { bits: 64 }) => Literal::F64(1.0),
                    Some(PrimitiveType::Float { .. }) => Literal::F32(1.0),
                    _ => Literal::Int(1),
                };
                let one = self.make_value(self.current, Op::Const, &[], Aux::Const(one), ty);
                let step = if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) { Op::Add } else { Op::Sub };
                let new = self.make_value(self.current, step, &[old, one], Aux::None, ty);
                self.emit_store(&lvalue, new, e.ty)?;
                Ok(if matches!(op, UnaryOp::PostInc | UnaryOp::PostDec) { old } else { new })
            }
            UnaryOp::AddrOf => bail_ssa_at!(e.span, "Taking the address of a value is not supported"),
            UnaryOp::Deref => bail_ssa_at!(e.span, "Dereference outside of a dereference expression"),
        }
    }

    fn emit_ternary(&mut self, cond: ExprId, then: ExprId, els: ExprId, ty: TypeId) -> Result<ValueId> {
        let cond = self.emit_expr(cond)?;
        let id = self.next_construct_id();
        let then_block = self.new_block(id, "ternary_then");
        let else_block = self.new_block(id, "ternary_else");
        let after = self.new_block(id, "ternary_after");

        let head = self.current;
        self.blocks[head].merge = Some(Merge::Selection { merge: after });
        self.end_cond_jump(head, cond, then_block, else_block);
        self.seal_block(then_block);
        self.seal_block(else_block);

        self.current = then_block;
        let then_value = self.emit_expr(then)?;
        self.end_jump(self.current, after);

        self.current = else_block;
        let else_value = self.emit_expr(els)?;
        self.end_jump(self.current, after);

        self.seal_block(after);
        self.current = after;
        let phi = self.make_value(after, Op::Phi, &[then_value, else_value], Aux::None, Some(ty));
        Ok(self.try_remove_trivial_phi(phi))
    }

    fn emit_struct_init(&mut self, ty: TypeId, args: &[ExprId]) -> Result<ValueId> {
        let slot = self.make_value(self.current, Op::Alloca, &[], Aux::None, Some(ty));
        let members: Vec<TypeId> = self.program.struct_members(ty).unwrap_or(&[]).iter().map(|m| m.ty).collect();
        for (index, (&arg, member_ty)) in args.iter().zip(members).enumerate() {
            let value = self.emit_expr(arg)?;
            let marker = self.make_value(self.current, Op::MemberAccess, &[], Aux::Member(index as u32), None);
            let pointer = self.make_value(self.current, Op::GetElementPtr, &[slot, marker], Aux::None, Some(member_ty));
            self.make_value(self.current, Op::Store, &[pointer, value], Aux::None, None);
        }
        Ok(self.make_value(self.current, Op::Load, &[slot], Aux::None, Some(ty)))
    }
}
