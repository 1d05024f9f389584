//! Diagnostic utilities for AST and SSA formatting and display.
//!
//! The AST formatter prints source the parser accepts again: every
//! compound expression is parenthesized and single statements are braced,
//! so printing a reparsed program gives the same text.

use crate::ast::*;
use crate::operators::{BinaryOp, UnaryOp};
use crate::ssa::{Aux, Op, SsaContext};
use std::fmt::{self, Display, Formatter, Write};

/// Formatter for a typed [`Program`] that produces parseable source.
pub struct AstFormatter<'a> {
    program: &'a Program,
    output: String,
    indent: usize,
}

impl<'a> AstFormatter<'a> {
    pub fn new(program: &'a Program) -> Self {
        AstFormatter { program, output: String::new(), indent: 0 }
    }

    /// Format an expression and return the formatted string.
    pub fn format_expression(program: &Program, expr: ExprId) -> String {
        AstFormatter::new(program).expr(expr)
    }

    /// Format every declaration of a program, in source order.
    pub fn format_program(program: &Program) -> String {
        let mut formatter = AstFormatter::new(program);
        for decl in &program.decls {
            formatter.write_decl(*decl);
        }
        formatter.output
    }

    fn write_line(&mut self, content: &str) {
        let indent = "    ".repeat(self.indent);
        let _ = writeln!(self.output, "{}{}", indent, content);
    }

    fn write_decl(&mut self, decl: Decl) {
        let program = self.program;
        match decl {
            Decl::Struct(ty) => {
                let t = &program.types[ty];
                self.write_line(&format!("struct {} {{", t.name));
                self.indent += 1;
                for member in program.struct_members(ty).unwrap_or(&[]) {
                    let mut line = format!("{} {}", program.type_name(member.ty), member.name);
                    if let Some(init) = member.init {
                        line.push_str(&format!(" = {}", self.expr(init)));
                    }
                    line.push_str(&format_attrs(&member.attrs));
                    line.push(';');
                    self.write_line(&line);
                }
                self.indent -= 1;
                self.write_line("}");
            }
            Decl::Function(function) => self.write_function(function),
            Decl::Globals(stmt) => self.write_stmt(stmt),
        }
    }

    fn write_function(&mut self, function: FunctionId) {
        let program = self.program;
        let f = &program.functions[function];
        let args: Vec<String> = f
            .args
            .iter()
            .map(|&arg| {
                let var = &program.vars[arg];
                format!("{} {}{}", program.type_name(var.ty), var.name, format_attrs(&var.attrs))
            })
            .collect();
        let mut header = format!("{} {}({})", program.type_name(f.return_type), f.name, args.join(", "));
        if !f.attrs.is_empty() {
            header = format!("{} {}", format_attrs(&f.attrs).trim_start(), header);
        }
        match f.body {
            None => self.write_line(&format!("{};", header)),
            Some(body) => {
                self.write_line(&header);
                self.write_stmt(body);
            }
        }
    }

    fn write_stmt(&mut self, stmt: StmtId) {
        let program = self.program;
        match &program.stmts[stmt].kind {
            StmtKind::Expr(expr) => {
                let line = format!("{};", self.expr(*expr));
                self.write_line(&line);
            }
            StmtKind::VarDecl { vars, init } => {
                let Some(&first) = vars.first() else {
                    return;
                };
                let names: Vec<&str> = vars.iter().map(|v| program.vars[*v].name.as_str()).collect();
                let mut line = format!("{} {}", program.type_name(program.vars[first].ty), names.join(", "));
                if let Some(init) = init {
                    line.push_str(&format!(" = {}", self.expr(*init)));
                }
                line.push(';');
                self.write_line(&line);
            }
            StmtKind::Block(stmts) => {
                self.write_line("{");
                self.indent += 1;
                for &s in stmts {
                    self.write_stmt(s);
                }
                self.indent -= 1;
                self.write_line("}");
            }
            StmtKind::If { .. } => self.write_if(stmt, ""),
            StmtKind::For { init, cond, incr, body } => {
                let part = |this: &Self, e: &Option<ExprId>| e.map(|e| this.expr(e)).unwrap_or_default();
                let line = format!("for ({}; {}; {})", part(self, init), part(self, cond), part(self, incr));
                self.write_line(&line);
                self.write_stmt(*body);
            }
            StmtKind::Return(value) => {
                let line = match value {
                    Some(value) => format!("return {};", self.expr(*value)),
                    None => "return;".to_string(),
                };
                self.write_line(&line);
            }
        }
    }

    fn write_if(&mut self, stmt: StmtId, prefix: &str) {
        let program = self.program;
        let StmtKind::If { cond, then, els } = &program.stmts[stmt].kind else {
            return;
        };
        let line = format!("{}if ({})", prefix, self.expr(*cond));
        self.write_line(&line);
        self.write_stmt(*then);
        match els {
            Some(els) if matches!(program.stmts[*els].kind, StmtKind::If { .. }) => self.write_if(*els, "else "),
            Some(els) => {
                self.write_line("else");
                self.write_stmt(*els);
            }
            None => {}
        }
    }

    fn expr(&self, expr: ExprId) -> String {
        let program = self.program;
        let e = &program.exprs[expr];
        match &e.kind {
            ExprKind::Literal(literal) => format_literal(*literal),
            ExprKind::Binary { op: BinaryOp::Comma, lhs, rhs, .. } => format!("({}, {})", self.expr(*lhs), self.expr(*rhs)),
            ExprKind::Binary { op, lhs, rhs, .. } => format!("({} {} {})", self.expr(*lhs), op.token(), self.expr(*rhs)),
            ExprKind::Unary { op: op @ (UnaryOp::PostInc | UnaryOp::PostDec), operand } => {
                format!("({}{})", self.expr(*operand), op.token())
            }
            ExprKind::Unary { op, operand } => format!("({}{})", op.token(), self.expr(*operand)),
            ExprKind::Deref(pointer) => format!("(*{})", self.expr(*pointer)),
            ExprKind::Ternary { cond, then, els } => {
                format!("({} ? {} : {})", self.expr(*cond), self.expr(*then), self.expr(*els))
            }
            ExprKind::Variable(var) => program.vars[*var].name.clone(),
            ExprKind::Member { base, index } => {
                let base_ty = program.exprs[*base].ty;
                let struct_ty = program.pointee(base_ty).unwrap_or(base_ty);
                let name = program
                    .struct_members(struct_ty)
                    .and_then(|m| m.get(*index as usize))
                    .map_or("?", |m| m.name.as_str());
                format!("{}.{}", self.expr(*base), name)
            }
            ExprKind::Swizzle { base, components } => {
                let lanes: String = components.iter().map(|c| ['x', 'y', 'z', 'w'][*c as usize % 4]).collect();
                format!("{}.{}", self.expr(*base), lanes)
            }
            ExprKind::Index { base, index } => format!("{}[{}]", self.expr(*base), self.expr(*index)),
            ExprKind::Call { function, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(*a)).collect();
                format!("{}({})", program.functions[*function].name, args.join(", "))
            }
            ExprKind::StructInit { ty, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(*a)).collect();
                format!("{}({})", program.type_name(*ty), args.join(", "))
            }
        }
    }
}

pub fn format_literal(literal: Literal) -> String {
    match literal {
        Literal::Int(v) => v.to_string(),
        Literal::F32(v) => format!("{:?}f", v),
        Literal::F64(v) => format!("{:?}", v),
        Literal::Bool(b) => b.to_string(),
    }
}

fn format_attr(attr: &Attr) -> String {
    match attr.kind {
        AttrKind::VkUniform { set, binding } => format!("[[vk_uniform({}, {})]]", set, binding),
        AttrKind::MtlBuffer { index } => format!("[[mtl_buffer({})]]", index),
        AttrKind::MtlConstant { index } => format!("[[mtl_constant({})]]", index),
        AttrKind::Color(index) => format!("[[color({})]]", index),
        other => format!("[[{}]]", other.name()),
    }
}

/// Attributes, each preceded by a space.
fn format_attrs(attrs: &[Attr]) -> String {
    attrs.iter().map(|a| format!(" {}", format_attr(a))).collect()
}

// SSA Display implementations

impl Display for SsaContext<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let program = self.program;
        writeln!(f, "function {}:", program.functions[self.function].name)?;
        for (block, b) in self.blocks.iter() {
            let preds: Vec<String> = b.preds.iter().map(|p| p.index().to_string()).collect();
            writeln!(f, "  block {} '{}' (preds: {}):", block.index(), b.name, preds.join(", "))?;
            for &value in &b.values {
                let v = &self.values[value];
                let args: Vec<String> = v.args.iter().map(|a| format!("%{}", a.index())).collect();
                write!(f, "    %{} = {:?}", value.index(), v.op)?;
                if !args.is_empty() {
                    write!(f, " {}", args.join(", "))?;
                }
                match &v.aux {
                    Aux::None => {}
                    Aux::Const(literal) => write!(f, " {}", format_literal(*literal))?,
                    Aux::Var(var) => write!(f, " [{}]", program.vars[*var].name)?,
                    Aux::Function(function) => write!(f, " @{}", program.functions[*function].name)?,
                    Aux::Block(target) => write!(f, " -> {}", target.index())?,
                    Aux::CondJump { then, els } => write!(f, " ? {} : {}", then.index(), els.index())?,
                    Aux::Member(index) => write!(f, " .{}", index)?,
                    Aux::Swizzle(components) => write!(f, " .{:?}", components)?,
                    Aux::Arg(index) => write!(f, " arg{}", index)?,
                    Aux::Input { member } => write!(f, " input{}", member)?,
                }
                if let Some(ty) = v.ty {
                    if v.op != Op::Store {
                        write!(f, " : {}", program.type_name(ty))?;
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
