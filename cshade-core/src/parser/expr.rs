use super::{Parser, Symbol};
use crate::ast::*;
use crate::error::{Result, Site};
use crate::lexer::{Token, TokenFlags, TokenKind};
use crate::operators::{BinaryOp, OpFlags, UnaryOp, ASSIGN_PREC, PREFIX_PREC, TERNARY_PREC};
use crate::{bail_syntax_at, bail_type_at, bail_type_sites};
use log::trace;

const SWIZZLE_SETS: [&str; 2] = ["xyzw", "rgba"];

/// Component indices of a swizzle like `xy` or `bgr`, if `name` is one for
/// a vector of `width` components.
fn parse_swizzle(name: &str, width: u32) -> Option<Vec<u32>> {
    if name.is_empty() || name.len() > 4 {
        return None;
    }
    SWIZZLE_SETS.iter().find_map(|set| {
        name.chars()
            .map(|c| set.find(c).map(|i| i as u32).filter(|i| *i < width))
            .collect::<Option<Vec<u32>>>()
    })
}

fn parse_integer(text: &str) -> Option<u64> {
    let radix = match text.get(..2) {
        Some("0x" | "0X") => 16,
        Some("0b" | "0B") => 2,
        Some("0o" | "0O") => 8,
        _ => return text.parse().ok(),
    };
    u64::from_str_radix(&text[2..], radix).ok()
}

impl<'a> Parser<'a> {
    fn make_expr(&mut self, kind: ExprKind, ty: TypeId, is_lvalue: bool, span: Span) -> ExprId {
        self.program.exprs.append(Expr { kind, ty, is_lvalue, span })
    }

    fn type_str(&self, ty: TypeId) -> String {
        self.program.type_name(ty).to_string()
    }

    pub(super) fn parse_expr(&mut self, min_prec: u32) -> Result<ExprId> {
        trace!("parse_expr({}): next token = {:?}", min_prec, self.peek()?);
        let lhs = self.parse_primary()?;
        self.parse_binary_rhs(lhs, min_prec)
    }

    fn parse_binary_rhs(&mut self, mut lhs: ExprId, min_prec: u32) -> Result<ExprId> {
        loop {
            let tok = self.peek()?;
            if tok.kind != TokenKind::Punct {
                break;
            }
            let text = self.text(tok);
            if text == "?" {
                if TERNARY_PREC < min_prec {
                    break;
                }
                self.advance()?;
                lhs = self.parse_ternary(lhs)?;
                continue;
            }
            let Some(op) = BinaryOp::from_token(text) else {
                break;
            };
            if op.precedence() < min_prec {
                break;
            }
            self.advance()?;
            let next_prec = if op.flags().contains(OpFlags::LEFT_ASSOC) { op.precedence() + 1 } else { op.precedence() };
            let rhs = self.parse_expr(next_prec)?;
            lhs = self.typecheck_binary(op, tok.span, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_ternary(&mut self, cond: ExprId) -> Result<ExprId> {
        trace!("parse_ternary: next token = {:?}", self.peek()?);
        let then = self.parse_expr(0)?;
        let colon = self.peek()?;
        if !self.eat(":")? {
            bail_syntax_at!(colon.span, "Expected :");
        }
        let els = self.parse_expr(TERNARY_PREC)?;

        let (cond_ty, cond_span) = (self.program.exprs[cond].ty, self.program.exprs[cond].span);
        if !self.program.is_bool(cond_ty) {
            bail_type_at!(cond_span, "Ternary condition must be bool, but it's '{}'", self.type_str(cond_ty));
        }
        let (then_ty, then_span) = (self.program.exprs[then].ty, self.program.exprs[then].span);
        let (els_ty, els_span) = (self.program.exprs[els].ty, self.program.exprs[els].span);
        if then_ty != els_ty {
            bail_type_sites!(
                [Site::green(then_span), Site::red(els_span)],
                "Ternary expression type mismatch, expected '{}' but got '{}'.",
                self.type_str(then_ty),
                self.type_str(els_ty)
            );
        }
        Ok(self.make_expr(ExprKind::Ternary { cond, then, els }, then_ty, false, cond_span.to(els_span)))
    }

    fn typecheck_binary(&mut self, op: BinaryOp, op_span: Span, lhs: ExprId, rhs: ExprId) -> Result<ExprId> {
        let (l_ty, l_lvalue, l_span) = {
            let l = &self.program.exprs[lhs];
            (l.ty, l.is_lvalue, l.span)
        };
        let (r_ty, r_span) = (self.program.exprs[rhs].ty, self.program.exprs[rhs].span);
        let span = l_span.to(r_span);
        let kind = ExprKind::Binary { op, op_span, lhs, rhs };

        if op == BinaryOp::Comma {
            return Ok(self.make_expr(kind, r_ty, false, span));
        }
        if op.is_assignment() && !l_lvalue {
            bail_type_sites!(
                [Site::red(l_span), Site::cyan(op_span)],
                "Left side of '{}' must be an lvalue.",
                op.token()
            );
        }
        if self.program.is_void(l_ty) {
            bail_type_at!(op_span, "Cannot apply operator '{}' to void", op.token());
        }

        let pure = op.base();
        if self.program.vector_width(l_ty).is_some() {
            use BinaryOp::*;
            if !matches!(pure, Mul | Div | Add | Sub | Assign) {
                bail_type_sites!(
                    [Site::green(l_span), Site::red(op_span), Site::cyan(r_span)],
                    "Operator '{}' cannot be applied to '{}'.",
                    op.token(),
                    self.type_str(l_ty)
                );
            }
            let b = self.program.builtins;
            if r_ty != b.f32 && r_ty != b.f64 && r_ty != l_ty {
                bail_type_at!(
                    op_span,
                    "Operator '{}' for vector requires rhs to be float or double or matching vector type, got '{}'. lhs type = '{}'",
                    op.token(),
                    self.type_str(r_ty),
                    self.type_str(l_ty)
                );
            }
            return Ok(self.make_expr(kind, l_ty, false, span));
        }

        let flags = pure.flags();
        let domain = [
            (OpFlags::BOOL, "bool", self.program.is_bool(l_ty)),
            (OpFlags::INT, "integer", self.program.is_integer(l_ty)),
            (OpFlags::PRIMITIVE, "primitive", self.program.is_primitive(l_ty)),
            (OpFlags::NUMERIC, "numeric", self.program.is_numeric(l_ty)),
        ];
        for (flag, what, ok) in domain {
            if flags.contains(flag) && !ok {
                bail_type_at!(
                    op_span,
                    "Operator '{}' can only be applied to {} types, got '{}'.",
                    op.token(),
                    what,
                    self.type_str(l_ty)
                );
            }
        }
        if l_ty != r_ty {
            bail_type_sites!(
                [Site::green(l_span), Site::cyan(op_span), Site::red(r_span)],
                "Binary expression type mismatch, expected '{}' but got '{}'",
                self.type_str(l_ty),
                self.type_str(r_ty)
            );
        }

        let ty = if pure.is_comparison() { self.program.builtins.bool } else { l_ty };
        Ok(self.make_expr(kind, ty, false, span))
    }

    fn parse_primary(&mut self) -> Result<ExprId> {
        trace!("parse_primary: next token = {:?}", self.peek()?);
        let tok = self.peek()?;
        let text = self.text(tok);
        let expr = match tok.kind {
            TokenKind::Number => self.parse_number(tok)?,
            TokenKind::Ident => self.parse_identifier_expr(tok)?,
            TokenKind::Punct => {
                if let Some(op) = UnaryOp::prefix_from_token(text) {
                    self.advance()?;
                    let operand = self.parse_expr(PREFIX_PREC)?;
                    return self.typecheck_prefix(op, tok.span, operand);
                }
                if text != "(" {
                    bail_syntax_at!(tok.span, "Expected expression, got '{}'.", text);
                }
                self.advance()?;
                let inner = self.parse_expr(0)?;
                if !self.eat(")")? {
                    bail_syntax_at!(tok.span, "Expected ')'.");
                }
                inner
            }
            _ => bail_syntax_at!(tok.span, "Expected expression, got '{}'.", text),
        };
        self.parse_postfix(expr)
    }

    fn parse_number(&mut self, tok: Token) -> Result<ExprId> {
        let text = self.text(tok);
        self.advance()?;
        let b = self.program.builtins;
        if tok.flags.contains(TokenFlags::FLOAT) {
            let (body, single) = match text.chars().last() {
                Some('f' | 'F') => (&text[..text.len() - 1], true),
                Some('d' | 'D') => (&text[..text.len() - 1], false),
                _ => (text, false),
            };
            let literal = if single {
                body.parse::<f32>().ok().map(|v| (Literal::F32(v), b.f32))
            } else {
                body.parse::<f64>().ok().map(|v| (Literal::F64(v), b.f64))
            };
            let Some((literal, ty)) = literal else {
                bail_syntax_at!(tok.span, "Could not parse floating point literal.");
            };
            return Ok(self.make_expr(ExprKind::Literal(literal), ty, false, tok.span));
        }
        let Some(value) = parse_integer(text) else {
            bail_syntax_at!(tok.span, "Could not parse integer literal.");
        };
        Ok(self.make_expr(ExprKind::Literal(Literal::Int(value)), b.s32, false, tok.span))
    }

    fn parse_identifier_expr(&mut self, tok: Token) -> Result<ExprId> {
        let text = self.text(tok);
        if text == "true" || text == "false" {
            self.advance()?;
            let literal = Literal::Bool(text == "true");
            return Ok(self.make_expr(ExprKind::Literal(literal), self.program.builtins.bool, false, tok.span));
        }
        let symbol = match self.find_type(text) {
            Some(ty) => Symbol::Type(ty),
            None => match self.lookup(text) {
                Some(entry) => entry.symbol,
                None => bail_type_at!(tok.span, "Unknown identifier."),
            },
        };
        self.advance()?;
        match symbol {
            Symbol::Type(ty) => self.parse_struct_init(ty, tok),
            Symbol::Function(function) => self.parse_call(function, tok),
            Symbol::Var(var) => {
                let ty = self.program.vars[var].ty;
                Ok(self.make_expr(ExprKind::Variable(var), ty, true, tok.span))
            }
        }
    }

    /// Comma-separated expressions up to `)`. The opening paren is consumed.
    fn parse_arguments(&mut self) -> Result<(Vec<ExprId>, Span)> {
        let mut args = Vec::new();
        loop {
            let tok = self.peek()?;
            if self.eat(")")? {
                return Ok((args, tok.span));
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

    fn parse_struct_init(&mut self, ty: TypeId, type_tok: Token) -> Result<ExprId> {
        trace!("parse_struct_init: next token = {:?}", self.peek()?);
        let open = self.peek()?;
        if !self.eat("(")? {
            bail_syntax_at!(open.span, "Expected struct initializer, got '{}'.", self.text(open));
        }
        let Some(members) = self.program.struct_members(ty) else {
            bail_type_at!(type_tok.span, "Expected struct type but got '{}'", self.type_str(ty));
        };
        let member_types: Vec<TypeId> = members.iter().map(|m| m.ty).collect();

        let (args, close) = self.parse_arguments()?;
        for (i, &arg) in args.iter().enumerate() {
            let (arg_ty, arg_span) = (self.program.exprs[arg].ty, self.program.exprs[arg].span);
            let Some(&expected) = member_types.get(i) else {
                bail_type_at!(
                    arg_span,
                    "Exceeded arguments count in initializer, struct '{}' has {} members.",
                    self.type_str(ty),
                    member_types.len()
                );
            };
            if arg_ty != expected {
                bail_type_at!(
                    arg_span,
                    "Initializer type mismatch, expected '{}' but got '{}'.",
                    self.type_str(expected),
                    self.type_str(arg_ty)
                );
            }
        }
        if args.len() != member_types.len() {
            bail_type_at!(
                close,
                "Expected {} arguments in initializer but got '{}'.",
                member_types.len(),
                args.len()
            );
        }
        Ok(self.make_expr(ExprKind::StructInit { ty, args }, ty, false, type_tok.span.to(close)))
    }

    fn parse_call(&mut self, function: FunctionId, name_tok: Token) -> Result<ExprId> {
        trace!("parse_call: next token = {:?}", self.peek()?);
        self.expect("(", "Expected (")?;
        let callee = &self.program.functions[function];
        let name = callee.name.clone();
        let return_type = callee.return_type;
        if callee.is_entry_point() {
            bail_type_at!(name_tok.span, "Entry point '{}' cannot be called.", name);
        }
        let arg_types: Vec<TypeId> = callee.args.iter().map(|&v| self.program.vars[v].ty).collect();

        let (args, close) = self.parse_arguments()?;
        if args.len() != arg_types.len() {
            bail_type_at!(
                name_tok.span.to(close),
                "Expected {} arguments in call to '{}' but got {}.",
                arg_types.len(),
                name,
                args.len()
            );
        }
        for (&arg, &expected) in args.iter().zip(&arg_types) {
            let (arg_ty, arg_span) = (self.program.exprs[arg].ty, self.program.exprs[arg].span);
            if arg_ty != expected {
                bail_type_at!(
                    arg_span,
                    "Argument type mismatch, expected '{}' but got '{}'.",
                    self.type_str(expected),
                    self.type_str(arg_ty)
                );
            }
        }
        Ok(self.make_expr(ExprKind::Call { function, args }, return_type, false, name_tok.span.to(close)))
    }

    fn typecheck_prefix(&mut self, op: UnaryOp, op_span: Span, operand: ExprId) -> Result<ExprId> {
        let (ty, is_lvalue, operand_span, is_swizzle) = {
            let e = &self.program.exprs[operand];
            (e.ty, e.is_lvalue, e.span, matches!(e.kind, ExprKind::Swizzle { .. }))
        };
        let span = op_span.to(operand_span);
        match op {
            UnaryOp::Deref => {
                let Some(pointee) = self.program.pointee(ty) else {
                    bail_type_at!(op_span, "Operator '*' can only be applied to pointer types, got '{}'", self.type_str(ty));
                };
                return Ok(self.make_expr(ExprKind::Deref(operand), pointee, true, span));
            }
            UnaryOp::AddrOf => {
                if !is_lvalue {
                    bail_type_at!(op_span, "Operator '&' can only be applied to lvalues.");
                }
                if is_swizzle {
                    bail_type_sites!([Site::red(op_span), Site::green(operand_span)], "Cannot take an address of a swizzle");
                }
                let pointer = self.program.pointer_to(ty, StorageClass::Function);
                return Ok(self.make_expr(ExprKind::Unary { op, operand }, pointer, false, span));
            }
            UnaryOp::PreInc | UnaryOp::PreDec if !is_lvalue => {
                bail_type_at!(op_span, "Operator '{}' can only be applied to lvalues.", op.token());
            }
            UnaryOp::Not if self.program.is_bool(ty) => {
                return Ok(self.make_expr(ExprKind::Unary { op, operand }, ty, false, span));
            }
            UnaryOp::Not | UnaryOp::BitNot if !self.program.is_integer(ty) => {
                bail_type_at!(op_span, "Operator '{}' can only be applied to integer types.", op.token());
            }
            _ => {}
        }
        if !self.program.is_numeric(ty) {
            bail_type_at!(
                op_span,
                "Operator '{}' can only be applied to numeric types, got '{}'.",
                op.token(),
                self.type_str(ty)
            );
        }
        Ok(self.make_expr(ExprKind::Unary { op, operand }, ty, false, span))
    }

    fn parse_postfix(&mut self, mut lhs: ExprId) -> Result<ExprId> {
        loop {
            let tok = self.peek()?;
            if tok.kind != TokenKind::Punct {
                return Ok(lhs);
            }
            let text = self.text(tok);
            lhs = if let Some(op) = UnaryOp::postfix_from_token(text) {
                self.advance()?;
                self.typecheck_postfix(op, tok.span, lhs)?
            } else if text == "." {
                self.advance()?;
                self.parse_member(lhs, tok)?
            } else if text == "[" {
                self.advance()?;
                self.parse_index(lhs, tok)?
            } else {
                return Ok(lhs);
            };
        }
    }

    fn typecheck_postfix(&mut self, op: UnaryOp, op_span: Span, operand: ExprId) -> Result<ExprId> {
        let (ty, is_lvalue, operand_span) = {
            let e = &self.program.exprs[operand];
            (e.ty, e.is_lvalue, e.span)
        };
        if !self.program.is_numeric(ty) {
            bail_type_at!(
                op_span,
                "Operator '{}' can only be applied to numeric types. Got '{}'.",
                op.token(),
                self.type_str(ty)
            );
        }
        if !is_lvalue {
            bail_type_at!(op_span, "Operator '{}' can only be applied to lvalues.", op.token());
        }
        Ok(self.make_expr(ExprKind::Unary { op, operand }, ty, false, operand_span.to(op_span)))
    }

    fn parse_member(&mut self, base: ExprId, dot: Token) -> Result<ExprId> {
        let (base_ty, base_lvalue, base_span) = {
            let e = &self.program.exprs[base];
            (e.ty, e.is_lvalue, e.span)
        };
        let struct_ty = match self.program.pointee(base_ty) {
            _ if self.program.is_struct(base_ty) => base_ty,
            Some(pointee) if self.program.is_struct(pointee) => pointee,
            Some(pointee) => bail_type_at!(dot.span, "Expected struct type but got '{}'", self.type_str(pointee)),
            None => bail_type_at!(dot.span, "Expected a struct, got '{}'", self.type_str(base_ty)),
        };
        let is_lvalue = base_lvalue || struct_ty != base_ty;

        let ident = self.expect_identifier()?;
        let name = self.text(ident);
        let span = base_span.to(ident.span);

        if let Some(width) = self.program.vector_width(struct_ty) {
            if let Some(components) = parse_swizzle(name, width) {
                if let [index] = components[..] {
                    let ty = self.program.builtins.f32;
                    return Ok(self.make_expr(ExprKind::Member { base, index }, ty, is_lvalue, span));
                }
                let Some(ty) = self.program.float_vector(components.len()) else {
                    bail_type_at!(ident.span, "Invalid swizzle '{}'.", name);
                };
                let unique = components.iter().enumerate().all(|(i, c)| !components[..i].contains(c));
                return Ok(self.make_expr(ExprKind::Swizzle { base, components }, ty, is_lvalue && unique, span));
            }
        }

        let members = self.program.struct_members(struct_ty).unwrap_or(&[]);
        let Some(index) = members.iter().position(|m| m.name == name) else {
            bail_type_at!(ident.span, "Member '{}' not found in struct '{}'.", name, self.type_str(struct_ty));
        };
        let ty = members[index].ty;
        Ok(self.make_expr(ExprKind::Member { base, index: index as u32 }, ty, is_lvalue, span))
    }

    fn parse_index(&mut self, base: ExprId, open: Token) -> Result<ExprId> {
        let (base_ty, base_span) = (self.program.exprs[base].ty, self.program.exprs[base].span);
        let Some(element) = self.program.pointee(base_ty) else {
            bail_type_at!(open.span, "Expected an array or pointer, got '{}'", self.type_str(base_ty));
        };
        let index = self.parse_expr(0)?;
        let index_ty = self.program.exprs[index].ty;
        if !self.program.is_integer(index_ty) {
            bail_type_at!(open.span, "Array index must be an integer, got '{}'", self.type_str(index_ty));
        }
        let close = self.expect_close_bracket()?;
        Ok(self.make_expr(ExprKind::Index { base, index }, element, true, base_span.to(close)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_swizzle_sets() {
        assert_eq!(parse_swizzle("xy", 4), Some(vec![0, 1]));
        assert_eq!(parse_swizzle("bgr", 3), Some(vec![2, 1, 0]));
        assert_eq!(parse_swizzle("w", 3), None);
        assert_eq!(parse_swizzle("xg", 4), None);
        assert_eq!(parse_swizzle("xxxxx", 4), None);
    }

    #[test]
    fn test_parse_integer_radix() {
        assert_eq!(parse_integer("0x1F"), Some(31));
        assert_eq!(parse_integer("0b101"), Some(5));
        assert_eq!(parse_integer("0o17"), Some(15));
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("0xZZ"), None);
    }
}
