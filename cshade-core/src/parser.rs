use crate::ast::*;
use crate::error::{CompilerError, Result, Site};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::{bail_syntax_at, bail_type_at, bail_type_dual, bail_type_sites};
use log::{debug, trace};
use std::collections::HashMap;

mod attrs;
mod expr;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy)]
enum Symbol {
    Type(TypeId),
    Var(VarId),
    Function(FunctionId),
}

#[derive(Debug, Clone, Copy)]
struct ScopeEntry {
    symbol: Symbol,
    span: Option<Span>,
}

/// A type name plus `*`s, before attributes pick the pointer storage class.
#[derive(Debug, Clone, Copy)]
struct PreType {
    base: TypeId,
    pointer_depth: u32,
    span: Span,
}

/// Recursive-descent parser with a Pratt expression core. Every expression
/// is type-checked as soon as it is built.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    source: &'a str,
    peeked: Option<Token>,
    prev_end: usize,
    program: Program,
    scopes: Vec<HashMap<String, ScopeEntry>>,
    return_type: Option<TypeId>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(source),
            source,
            peeked: None,
            prev_end: 0,
            program: Program::new(),
            scopes: vec![HashMap::new()],
            return_type: None,
        }
    }

    pub fn parse(self) -> Result<Program> {
        match self.parse_partial() {
            (program, None) => Ok(program),
            (_, Some(err)) => Err(err),
        }
    }

    /// Parses until the first error. Declarations completed before the
    /// error stay in the returned program.
    pub fn parse_partial(mut self) -> (Program, Option<CompilerError>) {
        if let Err(err) = self.register_builtins() {
            return (self.program, Some(err));
        }
        loop {
            match self.peek() {
                Ok(token) if token.kind == TokenKind::Eof => break,
                Ok(_) => {}
                Err(err) => return (self.program, Some(err)),
            }
            if let Err(err) = self.parse_top_level() {
                return (self.program, Some(err));
            }
        }
        (self.program, None)
    }

    fn register_builtins(&mut self) -> Result<()> {
        self.declare_builtins()
            .map_err(|err| CompilerError::Internal(format!("Failed to register built-ins: {}", err)))
    }

    fn declare_builtins(&mut self) -> Result<()> {
        let b = self.program.builtins;
        let types = [
            ("void", b.void),
            ("bool", b.bool),
            ("s8", b.s8),
            ("s16", b.s16),
            ("s32", b.s32),
            ("s64", b.s64),
            ("u8", b.u8),
            ("u16", b.u16),
            ("u32", b.u32),
            ("u64", b.u64),
            ("f32", b.f32),
            ("f64", b.f64),
            ("float2", b.float2),
            ("float3", b.float3),
            ("float4", b.float4),
        ];
        let intrinsics = [
            ("hsv", Intrinsic::Hsv, b.float3, vec![b.f32, b.f32, b.f32]),
            ("log", Intrinsic::Log, b.f32, vec![b.f32]),
            ("sin", Intrinsic::Sin, b.f32, vec![b.f32]),
            ("cos", Intrinsic::Cos, b.f32, vec![b.f32]),
            ("atan", Intrinsic::Atan, b.f32, vec![b.f32]),
            ("abs", Intrinsic::Abs, b.f32, vec![b.f32]),
            ("dot_vec3", Intrinsic::DotVec3, b.f32, vec![b.float3, b.float3]),
            ("length", Intrinsic::Length, b.f32, vec![b.float3]),
        ];

        for (name, ty) in types {
            self.add_global(name, Symbol::Type(ty), None)?;
        }
        for (name, intrinsic, return_type, arg_types) in intrinsics {
            let args = arg_types
                .into_iter()
                .enumerate()
                .map(|(i, ty)| {
                    self.program.vars.append(Var {
                        name: format!("a{}", i),
                        ty,
                        kind: VarKind::Arg(i as u32),
                        init: None,
                        attrs: Vec::new(),
                        span: Span::default(),
                    })
                })
                .collect();
            let function = self.program.functions.append(Function {
                name: name.to_string(),
                return_type,
                args,
                body: None,
                kind: FunctionKind::Plain,
                attrs: Vec::new(),
                mtl_buffers: Default::default(),
                vk_bindings: Default::default(),
                stage_in: None,
                intrinsic: Some(intrinsic),
                span: Span::default(),
            });
            self.add_global(name, Symbol::Function(function), None)?;
        }
        Ok(())
    }

    // Declarations

    fn parse_top_level(&mut self) -> Result<()> {
        trace!("parse_top_level: next token = {:?}", self.peek()?);
        if self.eat(";")? {
            return Ok(());
        }
        let attrs = self.parse_attrs()?;
        let start = self.peek()?;

        if self.check("struct")? {
            self.advance()?;
            let ty = self.parse_struct(start)?;
            self.check_attrs_used(&attrs)?;
            debug!("Parsed struct '{}'", self.program.type_name(ty));
            self.program.decls.push(Decl::Struct(ty));
            return Ok(());
        }

        let pre_type = self.parse_pre_type()?;
        let ident = self.expect_identifier()?;
        let tok = self.peek()?;
        match (tok.kind, self.text(tok)) {
            (TokenKind::Punct, "(") => {
                let function = self.parse_function(pre_type, attrs, start, ident)?;
                debug!("Parsed function '{}'", self.program.functions[function].name);
                self.program.decls.push(Decl::Function(function));
            }
            (TokenKind::Punct, "," | ";" | "=") | (TokenKind::AttrOpen, _) => {
                let group = self.parse_var_decl(pre_type, ident, VarKind::Global)?;
                self.check_attrs_used(&attrs)?;
                debug!("Parsed global declaration group");
                self.program.decls.push(Decl::Globals(group));
            }
            _ => bail_syntax_at!(tok.span, "Expected ( or , or ; or ="),
        }
        Ok(())
    }

    fn parse_pre_type(&mut self) -> Result<PreType> {
        trace!("parse_pre_type: next token = {:?}", self.peek()?);
        let tok = self.peek()?;
        let base = match tok.kind {
            TokenKind::Ident => self.find_type(self.text(tok)),
            _ => None,
        };
        let Some(base) = base else {
            bail_type_at!(tok.span, "Could not find type.");
        };
        self.advance()?;
        let mut pre_type = PreType { base, pointer_depth: 0, span: tok.span };
        while self.check("*")? {
            let star = self.advance()?;
            pre_type.pointer_depth += 1;
            pre_type.span = pre_type.span.to(star.span);
        }
        Ok(pre_type)
    }

    /// Pointer types need a storage class, which only `vk_uniform` provides.
    fn finalize_type(&mut self, pre_type: PreType, attrs: &[Attr]) -> Result<TypeId> {
        if pre_type.pointer_depth == 0 {
            return Ok(pre_type.base);
        }
        let mut storage = None;
        for attr in attrs {
            if let AttrKind::VkUniform { .. } = attr.kind {
                if storage.is_some() {
                    bail_type_at!(pre_type.span, "Vulkan storage class must be specified for pointer type only once");
                }
                storage = Some(StorageClass::Uniform);
            }
        }
        let Some(storage) = storage else {
            bail_type_at!(pre_type.span, "Vulkan storage class must be specified for pointer type.");
        };
        let mut ty = pre_type.base;
        for _ in 0..pre_type.pointer_depth {
            ty = self.program.pointer_to(ty, storage);
        }
        Ok(ty)
    }

    fn parse_var_decl(&mut self, pre_type: PreType, ident: Token, kind: VarKind) -> Result<StmtId> {
        trace!("parse_var_decl: next token = {:?}", self.peek()?);
        let attrs = self.parse_attrs()?;
        let ty = self.finalize_type(pre_type, &attrs)?;
        if let Some(attr) = attrs.first() {
            let scope = if kind == VarKind::Global { "Global" } else { "Local" };
            bail_type_at!(attr.span, "{} variables cannot have attributes", scope);
        }
        if self.program.is_void(ty) {
            bail_type_at!(pre_type.span, "Variables cannot have type 'void'.");
        }

        let mut names = vec![ident];
        while self.eat(",")? {
            names.push(self.expect_identifier()?);
        }

        let mut init = None;
        if self.eat("=")? {
            let expr = self.parse_expr(0)?;
            let (expr_ty, expr_span) = (self.program.exprs[expr].ty, self.program.exprs[expr].span);
            if expr_ty != ty {
                bail_type_at!(
                    expr_span,
                    "Initializer type mismatch, expected '{}' but got '{}'.",
                    self.program.type_name(ty),
                    self.program.type_name(expr_ty)
                );
            }
            init = Some(expr);
        }

        let semi = self.peek()?;
        if !self.eat(";")? {
            bail_syntax_at!(semi.span, "Expected , or ;");
        }

        let mut vars = Vec::with_capacity(names.len());
        for name in names {
            let var = self.program.vars.append(Var {
                name: self.text(name).to_string(),
                ty,
                kind,
                init,
                attrs: Vec::new(),
                span: name.span,
            });
            if kind == VarKind::Global {
                self.add_global(self.text(name), Symbol::Var(var), Some(name.span))?;
            } else {
                self.declare_local(self.text(name), Symbol::Var(var), name.span)?;
            }
            vars.push(var);
        }

        Ok(self.program.stmts.append(Stmt {
            kind: StmtKind::VarDecl { vars, init },
            span: pre_type.span.to(semi.span),
        }))
    }

    fn parse_function(&mut self, pre_type: PreType, mut attrs: Vec<Attr>, start: Token, ident: Token) -> Result<FunctionId> {
        trace!("parse_function: next token = {:?}", self.peek()?);
        self.advance()?;

        let mut args: Vec<VarId> = Vec::new();
        let return_type;
        loop {
            let tok = self.peek()?;
            if tok.kind == TokenKind::Punct && self.text(tok) == ")" {
                self.advance()?;
                let return_attrs = self.parse_attrs()?;
                return_type = self.finalize_type(pre_type, &return_attrs)?;
                self.check_attrs_used(&return_attrs)?;
                break;
            }
            if !args.is_empty() && !self.eat(",")? {
                bail_syntax_at!(tok.span, "Expected ','");
            }
            let arg_start = self.peek()?.span.start;
            let arg_pre_type = self.parse_pre_type()?;
            let name = self.expect_identifier()?;
            let arg_attrs = self.parse_attrs()?;
            let ty = self.finalize_type(arg_pre_type, &arg_attrs)?;
            if self.program.is_void(ty) {
                bail_type_at!(arg_pre_type.span, "Arguments cannot have type 'void'.");
            }
            let end = arg_attrs.last().map_or(name.span.end, |a| a.span.end);
            args.push(self.program.vars.append(Var {
                name: self.text(name).to_string(),
                ty,
                kind: VarKind::Arg(args.len() as u32),
                init: None,
                attrs: arg_attrs,
                span: Span::new(arg_start, end),
            }));
        }

        let kind = self.resolve_function_kind(&mut attrs)?;
        let mut function = Function {
            name: self.text(ident).to_string(),
            return_type,
            args,
            body: None,
            kind,
            attrs,
            mtl_buffers: Default::default(),
            vk_bindings: Default::default(),
            stage_in: None,
            intrinsic: None,
            span: Span::new(start.span.start, self.prev_end),
        };
        self.typecheck_function_return_value(&function)?;
        self.handle_entry_point_args(&mut function)?;
        self.check_attrs_used(&function.attrs)?;

        let tok = self.peek()?;
        if self.eat(";")? {
            function.span.end = tok.span.end;
        } else if self.check("{")? {
            self.scopes.push(HashMap::new());
            for &arg in &function.args {
                let (name, span) = (self.program.vars[arg].name.clone(), self.program.vars[arg].span);
                self.declare_local(&name, Symbol::Var(arg), span)?;
            }
            self.return_type = Some(return_type);
            let body = self.parse_block()?;
            self.return_type = None;
            self.scopes.pop();

            function.span.end = self.program.stmts[body].span.end;
            function.body = Some(body);
            self.ensure_function_has_return(&function)?;
        } else {
            bail_syntax_at!(tok.span, "Expected ; or {{ after function header");
        }

        let id = self.program.functions.append(function);
        self.add_global(self.text(ident), Symbol::Function(id), Some(ident.span))?;
        Ok(id)
    }

    fn parse_struct(&mut self, start: Token) -> Result<TypeId> {
        trace!("parse_struct: next token = {:?}", self.peek()?);
        let ident = self.expect_identifier()?;
        self.expect("{", "Expected {")?;

        let mut members: Vec<StructMember> = Vec::new();
        let mut position: Option<Span> = None;
        let end = loop {
            let tok = self.peek()?;
            if self.eat("}")? {
                break tok.span;
            }
            let pre_type = self.parse_pre_type()?;
            let name = self.expect_identifier()?;
            let mut init = None;
            if self.eat("=")? {
                init = Some(self.parse_expr(0)?);
            }
            let mut attrs = self.parse_attrs()?;
            let ty = self.finalize_type(pre_type, &attrs)?;
            self.expect(";", "Expected ;")?;

            if let Some(init) = init {
                let (init_ty, init_span) = (self.program.exprs[init].ty, self.program.exprs[init].span);
                if init_ty != ty {
                    bail_type_at!(
                        init_span,
                        "Initializer type mismatch, expected '{}' but got '{}'.",
                        self.program.type_name(ty),
                        self.program.type_name(init_ty)
                    );
                }
            }
            let member_name = self.text(name);
            if let Some(prev) = members.iter().find(|m| m.name == member_name) {
                bail_type_dual!(prev.span, name.span, "Duplicate member '{}'.", member_name);
            }

            let end = attrs.last().map_or(self.prev_end, |a| a.span.end);
            let span = Span::new(pre_type.span.start, end);
            for attr in attrs.iter_mut() {
                match attr.kind {
                    AttrKind::Position => {
                        if position.is_some() {
                            bail_type_at!(attr.span, "Position attribute can only be specified once.");
                        }
                        position = Some(attr.span);
                        if ty != self.program.builtins.float4 {
                            bail_type_at!(attr.span, "Position attribute can only be specified for float4 member.");
                        }
                        attr.used = true;
                    }
                    AttrKind::Color(_) => attr.used = true,
                    _ => {}
                }
            }
            self.check_attrs_used(&attrs)?;
            members.push(StructMember { name: member_name.to_string(), ty, init, attrs, span });
        };

        let ty = self.program.types.append(Type {
            name: self.text(ident).to_string(),
            kind: TypeKind::Struct { members, vector_width: None },
            span: Some(start.span.to(end)),
        });
        self.add_global(self.text(ident), Symbol::Type(ty), Some(ident.span))?;
        Ok(ty)
    }

    // Statements

    fn parse_statement(&mut self) -> Result<StmtId> {
        trace!("parse_statement: next token = {:?}", self.peek()?);
        let tok = self.peek()?;
        match (tok.kind, self.text(tok)) {
            (TokenKind::Punct, "{") => return self.parse_block(),
            (TokenKind::Punct, ";") => {
                self.advance()?;
                return Ok(self.program.stmts.append(Stmt { kind: StmtKind::Block(Vec::new()), span: tok.span }));
            }
            (TokenKind::Ident, "if") => {
                self.advance()?;
                return self.parse_if(tok);
            }
            (TokenKind::Ident, "for") => {
                self.advance()?;
                return self.parse_for(tok);
            }
            (TokenKind::Ident, "return") => {
                self.advance()?;
                return self.parse_return(tok);
            }
            (TokenKind::Ident, name) if self.find_type(name).is_some() => {
                let pre_type = self.parse_pre_type()?;
                let ident = self.expect_identifier()?;
                return self.parse_var_decl(pre_type, ident, VarKind::Local);
            }
            _ => {}
        }

        let expr = self.parse_expr(0)?;
        let semi = self.expect(";", "Expected ;")?;
        let span = self.program.exprs[expr].span.to(semi.span);
        Ok(self.program.stmts.append(Stmt { kind: StmtKind::Expr(expr), span }))
    }

    fn parse_block(&mut self) -> Result<StmtId> {
        trace!("parse_block: next token = {:?}", self.peek()?);
        let open = self.expect("{", "Expected {")?;
        self.scopes.push(HashMap::new());
        let mut stmts = Vec::new();
        let close = loop {
            let tok = self.peek()?;
            if self.eat("}")? {
                break tok;
            }
            if tok.kind == TokenKind::Eof {
                bail_syntax_at!(tok.span, "Expected }}");
            }
            stmts.push(self.parse_statement()?);
        };
        self.scopes.pop();
        Ok(self.program.stmts.append(Stmt { kind: StmtKind::Block(stmts), span: open.span.to(close.span) }))
    }

    /// A braced block, or a single statement wrapped into one.
    fn parse_block_or_one_stmt(&mut self) -> Result<StmtId> {
        if self.check("{")? {
            return self.parse_block();
        }
        self.scopes.push(HashMap::new());
        let stmt = self.parse_statement()?;
        self.scopes.pop();
        let span = self.program.stmts[stmt].span;
        Ok(self.program.stmts.append(Stmt { kind: StmtKind::Block(vec![stmt]), span }))
    }

    fn parse_condition(&mut self) -> Result<ExprId> {
        let cond = self.parse_expr(0)?;
        let (ty, span) = (self.program.exprs[cond].ty, self.program.exprs[cond].span);
        if !self.program.is_bool(ty) {
            bail_type_at!(span, "Condition must be bool, but it's '{}'", self.program.type_name(ty));
        }
        Ok(cond)
    }

    fn parse_if(&mut self, if_tok: Token) -> Result<StmtId> {
        trace!("parse_if: next token = {:?}", self.peek()?);
        self.expect("(", "Expected (")?;
        let cond = self.parse_condition()?;
        self.expect(")", "Expected )")?;
        let then = self.parse_block_or_one_stmt()?;

        let mut els = None;
        if self.eat("else")? {
            let tok = self.peek()?;
            if self.eat("if")? {
                els = Some(self.parse_if(tok)?);
            } else {
                els = Some(self.parse_block_or_one_stmt()?);
            }
        }
        let span = Span::new(if_tok.span.start, self.prev_end);
        Ok(self.program.stmts.append(Stmt { kind: StmtKind::If { cond, then, els }, span }))
    }

    fn parse_for(&mut self, for_tok: Token) -> Result<StmtId> {
        trace!("parse_for: next token = {:?}", self.peek()?);
        self.expect("(", "Expected (")?;
        let init = if self.check(";")? { None } else { Some(self.parse_expr(0)?) };
        self.expect(";", "Expected ;")?;
        let cond = if self.check(";")? { None } else { Some(self.parse_condition()?) };
        self.expect(";", "Expected ;")?;
        let incr = if self.check(")")? { None } else { Some(self.parse_expr(0)?) };
        self.expect(")", "Expected )")?;
        let body = self.parse_block_or_one_stmt()?;
        let span = Span::new(for_tok.span.start, self.prev_end);
        Ok(self.program.stmts.append(Stmt { kind: StmtKind::For { init, cond, incr, body }, span }))
    }

    fn parse_return(&mut self, return_tok: Token) -> Result<StmtId> {
        trace!("parse_return: next token = {:?}", self.peek()?);
        let Some(return_type) = self.return_type else {
            bail_syntax_at!(return_tok.span, "return must be inside a function");
        };
        let mut value = None;
        if !self.program.is_void(return_type) {
            let expr = self.parse_expr(0)?;
            let (ty, span) = (self.program.exprs[expr].ty, self.program.exprs[expr].span);
            if ty != return_type {
                bail_type_at!(
                    span,
                    "Expected return type '{}' but got '{}'",
                    self.program.type_name(return_type),
                    self.program.type_name(ty)
                );
            }
            value = Some(expr);
        }
        let semi = self.expect(";", "Expected ;")?;
        Ok(self.program.stmts.append(Stmt { kind: StmtKind::Return(value), span: return_tok.span.to(semi.span) }))
    }

    // Scopes

    fn lookup(&self, name: &str) -> Option<ScopeEntry> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn find_type(&self, name: &str) -> Option<TypeId> {
        let name = match name {
            "float" => "f32",
            "double" => "f64",
            "int" => "s32",
            other => other,
        };
        match self.lookup(name)?.symbol {
            Symbol::Type(ty) => Some(ty),
            _ => None,
        }
    }

    fn add_global(&mut self, name: &str, symbol: Symbol, span: Option<Span>) -> Result<()> {
        if let Some(prev) = self.lookup(name) {
            let mut sites = Vec::new();
            if let Some(span) = span {
                sites.push(Site::red(span));
            }
            if let Some(prev_span) = prev.span {
                sites.push(Site::green(prev_span));
            }
            return Err(CompilerError::TypeError(format!("Duplicate global variable '{}'", name), sites));
        }
        self.scopes[0].insert(name.to_string(), ScopeEntry { symbol, span });
        Ok(())
    }

    fn declare_local(&mut self, name: &str, symbol: Symbol, span: Span) -> Result<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(CompilerError::Internal("Scope stack is empty".to_string()));
        };
        if let Some(prev) = scope.get(name) {
            let prev_span = prev.span.unwrap_or_default();
            bail_type_sites!([Site::green(prev_span), Site::red(span)], "'{}' is already declared in this scope.", name);
        }
        scope.insert(name.to_string(), ScopeEntry { symbol, span: Some(span) });
        Ok(())
    }

    // Token helpers

    fn peek(&mut self) -> Result<Token> {
        if let Some(token) = self.peeked {
            return Ok(token);
        }
        let token = self.lexer.next_token()?;
        self.peeked = Some(token);
        Ok(token)
    }

    fn advance(&mut self) -> Result<Token> {
        let token = self.peek()?;
        self.peeked = None;
        self.prev_end = token.span.end;
        Ok(token)
    }

    fn text(&self, token: Token) -> &'a str {
        token.text(self.source)
    }

    fn check(&mut self, text: &str) -> Result<bool> {
        let token = self.peek()?;
        Ok(token.kind != TokenKind::Eof && self.text(token) == text)
    }

    fn eat(&mut self, text: &str) -> Result<bool> {
        if self.check(text)? {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, text: &str, message: &str) -> Result<Token> {
        if self.check(text)? {
            self.advance()
        } else {
            let token = self.peek()?;
            bail_syntax_at!(token.span, "{}", message)
        }
    }

    fn expect_identifier(&mut self) -> Result<Token> {
        let token = self.peek()?;
        if token.kind != TokenKind::Ident {
            bail_syntax_at!(token.span, "Expected identifier, got '{}'.", self.text(token));
        }
        self.advance()
    }

    /// Consumes one `]`. A `]]` token closing nested indexing is split in two.
    fn expect_close_bracket(&mut self) -> Result<Span> {
        let token = self.peek()?;
        match (token.kind, self.text(token)) {
            (TokenKind::Punct, "]") => Ok(self.advance()?.span),
            (TokenKind::AttrClose, _) => {
                let first = Span::new(token.span.start, token.span.start + 1);
                self.peeked = Some(Token {
                    span: Span::new(first.end, token.span.end),
                    kind: TokenKind::Punct,
                    flags: token.flags,
                });
                self.prev_end = first.end;
                Ok(first)
            }
            _ => bail_syntax_at!(token.span, "Expected a ]"),
        }
    }
}
