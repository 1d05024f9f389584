//! `[[...]]` attributes and the entry-point rules they drive.

use super::Parser;
use crate::ast::*;
use crate::error::Result;
use crate::lexer::{Token, TokenKind};
use crate::operators::{UnaryOp, ASSIGN_PREC};
use crate::{bail_syntax_at, bail_type_at, bail_type_dual};
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryArg {
    Buffer,
    StageIn,
}

impl<'a> Parser<'a> {
    pub(super) fn parse_attrs(&mut self) -> Result<Vec<Attr>> {
        let mut attrs = Vec::new();
        while self.peek()?.kind == TokenKind::AttrOpen {
            trace!("parse_attrs: next token = {:?}", self.peek()?);
            let open = self.advance()?;
            let name = self.expect_identifier()?;
            let mut args = Vec::new();
            if self.eat("(")? {
                loop {
                    let tok = self.peek()?;
                    if self.eat(")")? {
                        break;
                    }
                    if tok.kind == TokenKind::Eof {
                        bail_syntax_at!(tok.span, "Expected ')'.");
                    }
                    if !args.is_empty() && !self.eat(",")? {
                        bail_syntax_at!(tok.span, "Expected ','");
                    }
                    args.push(self.parse_expr(ASSIGN_PREC)?);
                }
            }
            let close = self.peek()?;
            if close.kind != TokenKind::AttrClose {
                bail_syntax_at!(close.span, "Expected ]]");
            }
            self.advance()?;
            let span = open.span.to(close.span);
            attrs.push(self.build_attr(name, &args, span)?);
        }
        Ok(attrs)
    }

    fn build_attr(&self, name: Token, args: &[ExprId], span: Span) -> Result<Attr> {
        let text = self.text(name);
        let no_args = |kind: AttrKind| -> Result<AttrKind> {
            if !args.is_empty() {
                bail_type_at!(span, "Expected 0 arguments for {} attribute, got {}", text, args.len());
            }
            Ok(kind)
        };
        let kind = match text {
            "vk_uniform" => match args {
                [] => AttrKind::VkUniform { set: 0, binding: 0 },
                [binding] => AttrKind::VkUniform { set: 0, binding: self.eval_attr_index(*binding)? },
                [set, binding] => AttrKind::VkUniform {
                    set: self.eval_attr_index(*set)?,
                    binding: self.eval_attr_index(*binding)?,
                },
                _ => bail_type_at!(span, "Expected (set, binding) or (set)."),
            },
            "mtl_buffer" | "mtl_constant" => {
                let index = match args {
                    [] => 0,
                    [index] => self.eval_attr_index(*index)?,
                    _ => bail_type_at!(span, "Expected (index)."),
                };
                if text == "mtl_buffer" {
                    AttrKind::MtlBuffer { index }
                } else {
                    AttrKind::MtlConstant { index }
                }
            }
            "position" => no_args(AttrKind::Position)?,
            "stage_in" => no_args(AttrKind::StageIn)?,
            "fragment" => no_args(AttrKind::Fragment)?,
            "vertex" => no_args(AttrKind::Vertex)?,
            "color" => match args {
                [index] => AttrKind::Color(self.eval_attr_index(*index)?),
                _ => bail_type_at!(span, "Expected 1 argument for color attribute, got {}", args.len()),
            },
            _ => bail_type_at!(name.span, "Unknown attribute"),
        };
        Ok(Attr { kind, span, used: false })
    }

    /// Attribute arguments are integer literals, optionally negated.
    fn eval_const_int(&self, expr: ExprId) -> Result<i64> {
        let e = &self.program.exprs[expr];
        match &e.kind {
            ExprKind::Literal(Literal::Int(value)) => Ok(*value as i64),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => Ok(-self.eval_const_int(*operand)?),
            ExprKind::Unary { op, .. } => bail_type_at!(e.span, "Unexpected unary operator '{}'", op.token()),
            _ => bail_type_at!(e.span, "Expected literal, got '{}'", self.program.type_name(e.ty)),
        }
    }

    fn eval_attr_index(&self, expr: ExprId) -> Result<u32> {
        let value = self.eval_const_int(expr)?;
        let span = self.program.exprs[expr].span;
        if value < 0 {
            bail_type_at!(span, "Expected >= 0, got {}.", value);
        }
        u32::try_from(value).or_else(|_| bail_type_at!(span, "Expected <= {}, got {}.", u32::MAX, value))
    }

    pub(super) fn check_attrs_used(&self, attrs: &[Attr]) -> Result<()> {
        if let Some(attr) = attrs.iter().find(|a| !a.used) {
            bail_type_at!(attr.span, "Attribute '{}' is not used.", attr.kind.name());
        }
        Ok(())
    }

    pub(super) fn resolve_function_kind(&self, attrs: &mut [Attr]) -> Result<FunctionKind> {
        let mut kind = FunctionKind::Plain;
        let mut kind_span: Option<Span> = None;
        for attr in attrs.iter_mut() {
            let attr_kind = match attr.kind {
                AttrKind::Fragment => FunctionKind::Fragment,
                AttrKind::Vertex => FunctionKind::Vertex,
                _ => continue,
            };
            if let Some(prev) = kind_span {
                bail_type_dual!(prev, attr.span, "Function kind already defined.");
            }
            kind = attr_kind;
            kind_span = Some(attr.span);
            attr.used = true;
        }
        Ok(kind)
    }

    pub(super) fn typecheck_function_return_value(&self, function: &Function) -> Result<()> {
        let ty = function.return_type;
        let b = self.program.builtins;
        match function.kind {
            FunctionKind::Plain => Ok(()),
            FunctionKind::Vertex => {
                if ty != b.void {
                    bail_type_at!(function.span, "Vertex function must return void.");
                }
                Ok(())
            }
            FunctionKind::Fragment => {
                if ty == b.void || ty == b.float4 {
                    return Ok(());
                }
                if !self.program.is_struct(ty) || self.program.vector_width(ty).is_some() {
                    bail_type_at!(function.span, "Fragment function must return void, float4, or struct.");
                }
                self.validate_fragment_output(ty)
            }
        }
    }

    /// Every member of a fragment output struct carries exactly one
    /// `color(n)`, and no two members share an index.
    fn validate_fragment_output(&self, ty: TypeId) -> Result<()> {
        let members = self.program.struct_members(ty).unwrap_or(&[]);
        let mut seen: Vec<(u32, Span)> = Vec::new();
        for member in members {
            let mut color: Option<(u32, Span)> = None;
            for attr in &member.attrs {
                if let AttrKind::Color(index) = attr.kind {
                    if let Some((_, prev)) = color {
                        bail_type_dual!(prev, attr.span, "Color attribute is already specified.");
                    }
                    color = Some((index, attr.span));
                }
            }
            let Some((index, span)) = color else {
                bail_type_at!(member.span, "Color attribute must be specified.");
            };
            if let Some(&(_, prev)) = seen.iter().find(|(i, _)| *i == index) {
                bail_type_dual!(prev, span, "Color index ({}) is already used.", index);
            }
            seen.push((index, span));
        }
        Ok(())
    }

    pub(super) fn handle_entry_point_args(&mut self, function: &mut Function) -> Result<()> {
        for arg in function.args.clone() {
            if function.is_entry_point() {
                self.handle_entry_point_arg(function, arg)?;
            }
            self.check_attrs_used(&self.program.vars[arg].attrs)?;
        }
        Ok(())
    }

    fn handle_entry_point_arg(&mut self, function: &mut Function, arg: VarId) -> Result<()> {
        let var = &self.program.vars[arg];
        let (ty, span) = (var.ty, var.span);
        let attrs = var.attrs.clone();
        let role = attrs.iter().find_map(|a| match a.kind {
            AttrKind::StageIn => Some(EntryArg::StageIn),
            AttrKind::VkUniform { .. } | AttrKind::MtlBuffer { .. } | AttrKind::MtlConstant { .. } => {
                Some(EntryArg::Buffer)
            }
            _ => None,
        });

        match role {
            None => bail_type_at!(span, "Unexpected entry point argument."),
            Some(EntryArg::StageIn) => {
                if !self.program.is_struct(ty) {
                    bail_type_at!(span, "Expected struct type for a stage_in argument.");
                }
                if let Some(prev) = function.stage_in {
                    bail_type_dual!(self.program.vars[prev].span, span, "Stage_in argument is already specified.");
                }
                function.stage_in = Some(arg);
                self.mark_used(arg, |kind| matches!(kind, AttrKind::StageIn));
            }
            Some(EntryArg::Buffer) => {
                if !self.program.is_pointer(ty) {
                    bail_type_at!(span, "Expected pointer type for a buffer.");
                }
                let mut vk: Option<((u32, u32), Span)> = None;
                // Buffer and constant share the one Metal index slot.
                let mut mtl: Option<(u32, Span)> = None;
                for attr in &attrs {
                    match attr.kind {
                        AttrKind::VkUniform { set, binding } => {
                            if let Some((_, prev)) = vk {
                                bail_type_dual!(prev, attr.span, "Vk uniform attribute is already specified.");
                            }
                            vk = Some(((set, binding), attr.span));
                        }
                        AttrKind::MtlBuffer { index } => {
                            if let Some((_, prev)) = mtl {
                                bail_type_dual!(prev, attr.span, "Metal buffer attribute is already specified.");
                            }
                            mtl = Some((index, attr.span));
                        }
                        AttrKind::MtlConstant { index } => {
                            if let Some((_, prev)) = mtl {
                                bail_type_dual!(prev, attr.span, "Metal constant attribute is already specified.");
                            }
                            mtl = Some((index, attr.span));
                        }
                        _ => bail_type_at!(attr.span, "Unexpected attribute."),
                    }
                }
                let Some((set_binding, vk_span)) = vk else {
                    bail_type_at!(span, "Vk uniform attribute must be specified.");
                };
                let Some((index, mtl_span)) = mtl else {
                    bail_type_at!(span, "Metal buffer attribute must be specified.");
                };
                if let Some(prev) = function.mtl_buffers.get(&index) {
                    bail_type_dual!(prev.span, mtl_span, "Metal buffer index ({}) is already used.", index);
                }
                if let Some(prev) = function.vk_bindings.get(&set_binding) {
                    bail_type_dual!(
                        prev.span,
                        vk_span,
                        "Vulkan set/binding ({}, {}) is already used.",
                        set_binding.0,
                        set_binding.1
                    );
                }
                function.mtl_buffers.insert(index, Binding { arg, span: mtl_span });
                function.vk_bindings.insert(set_binding, Binding { arg, span: vk_span });
                self.mark_used(arg, |kind| {
                    matches!(kind, AttrKind::VkUniform { .. } | AttrKind::MtlBuffer { .. } | AttrKind::MtlConstant { .. })
                });
            }
        }
        Ok(())
    }

    fn mark_used(&mut self, var: VarId, pred: impl Fn(AttrKind) -> bool) {
        for attr in self.program.vars[var].attrs.iter_mut() {
            if pred(attr.kind) {
                attr.used = true;
            }
        }
    }

    /// A function with a non-void result must end in a `return`.
    pub(super) fn ensure_function_has_return(&self, function: &Function) -> Result<()> {
        if self.program.is_void(function.return_type) {
            return Ok(());
        }
        let Some(body) = function.body else {
            return Ok(());
        };
        let body_stmt = &self.program.stmts[body];
        let last = match &body_stmt.kind {
            StmtKind::Block(stmts) => stmts.last().copied(),
            _ => Some(body),
        };
        match last.map(|s| &self.program.stmts[s].kind) {
            Some(StmtKind::Return(_)) => Ok(()),
            _ => bail_type_at!(Span::new(body_stmt.span.end.saturating_sub(1), body_stmt.span.end), "Expected return statement"),
        }
    }
}
