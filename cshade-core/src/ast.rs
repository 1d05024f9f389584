use crate::arena::{Arena, Handle};
use crate::operators::{BinaryOp, UnaryOp};
use std::collections::{BTreeMap, HashMap};

/// Byte range in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

pub type TypeId = Handle<Type>;
pub type ExprId = Handle<Expr>;
pub type StmtId = Handle<Stmt>;
pub type VarId = Handle<Var>;
pub type FunctionId = Handle<Function>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Void,
    Bool,
    Int { bits: u32, signed: bool },
    Float { bits: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    /// Bound buffer memory, selected with `vk_uniform`.
    Uniform,
    /// Function-local memory; only produced by taking an address.
    Function,
}

#[derive(Debug, Clone)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeId,
    pub init: Option<ExprId>,
    pub attrs: Vec<Attr>,
    pub span: Span,
}

impl StructMember {
    pub fn color(&self) -> Option<u32> {
        self.attrs.iter().find_map(|a| match a.kind {
            AttrKind::Color(index) => Some(index),
            _ => None,
        })
    }

    pub fn is_position(&self) -> bool {
        self.attrs.iter().any(|a| a.kind == AttrKind::Position)
    }
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Primitive(PrimitiveType),
    /// `vector_width` is set for the built-in `float2`, `float3` and `float4`.
    Struct {
        members: Vec<StructMember>,
        vector_width: Option<u32>,
    },
    Pointer {
        pointee: TypeId,
        storage: StorageClass,
    },
}

#[derive(Debug, Clone)]
pub struct Type {
    pub name: String,
    pub kind: TypeKind,
    pub span: Option<Span>,
}

/// Handles of the types every program starts with.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTypes {
    pub void: TypeId,
    pub bool: TypeId,
    pub s8: TypeId,
    pub s16: TypeId,
    pub s32: TypeId,
    pub s64: TypeId,
    pub u8: TypeId,
    pub u16: TypeId,
    pub u32: TypeId,
    pub u64: TypeId,
    pub f32: TypeId,
    pub f64: TypeId,
    pub float2: TypeId,
    pub float3: TypeId,
    pub float4: TypeId,
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    VkUniform { set: u32, binding: u32 },
    MtlBuffer { index: u32 },
    MtlConstant { index: u32 },
    Position,
    StageIn,
    Color(u32),
    Vertex,
    Fragment,
}

impl AttrKind {
    pub fn name(&self) -> &'static str {
        match self {
            AttrKind::VkUniform { .. } => "vk_uniform",
            AttrKind::MtlBuffer { .. } => "mtl_buffer",
            AttrKind::MtlConstant { .. } => "mtl_constant",
            AttrKind::Position => "position",
            AttrKind::StageIn => "stage_in",
            AttrKind::Color(_) => "color",
            AttrKind::Vertex => "vertex",
            AttrKind::Fragment => "fragment",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attr {
    pub kind: AttrKind,
    pub span: Span,
    /// Set by whichever validator consumed the attribute.
    pub used: bool,
}

// ---------------------------------------------------------------------------
// Variables and functions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Global,
    Local,
    Arg(u32),
}

#[derive(Debug, Clone)]
pub struct Var {
    pub name: String,
    pub ty: TypeId,
    pub kind: VarKind,
    pub init: Option<ExprId>,
    pub attrs: Vec<Attr>,
    pub span: Span,
}

impl Var {
    pub fn vk_uniform(&self) -> Option<(u32, u32)> {
        self.attrs.iter().find_map(|a| match a.kind {
            AttrKind::VkUniform { set, binding } => Some((set, binding)),
            _ => None,
        })
    }

    pub fn is_stage_in(&self) -> bool {
        self.attrs.iter().any(|a| a.kind == AttrKind::StageIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Hsv,
    Log,
    Sin,
    Cos,
    Atan,
    Abs,
    DotVec3,
    Length,
}

/// An argument bound to a buffer slot, with the span of the binding attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub arg: VarId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub return_type: TypeId,
    pub args: Vec<VarId>,
    pub body: Option<StmtId>,
    pub kind: FunctionKind,
    pub attrs: Vec<Attr>,
    pub mtl_buffers: BTreeMap<u32, Binding>,
    pub vk_bindings: BTreeMap<(u32, u32), Binding>,
    pub stage_in: Option<VarId>,
    pub intrinsic: Option<Intrinsic>,
    pub span: Span,
}

impl Function {
    pub fn is_entry_point(&self) -> bool {
        self.kind != FunctionKind::Plain
    }
}

// ---------------------------------------------------------------------------
// Expressions and statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Binary {
        op: BinaryOp,
        op_span: Span,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Deref(ExprId),
    Ternary {
        cond: ExprId,
        then: ExprId,
        els: ExprId,
    },
    Variable(VarId),
    /// Member `index` of the struct `base` has, or points to.
    Member {
        base: ExprId,
        index: u32,
    },
    Swizzle {
        base: ExprId,
        components: Vec<u32>,
    },
    Index {
        base: ExprId,
        index: ExprId,
    },
    Call {
        function: FunctionId,
        args: Vec<ExprId>,
    },
    StructInit {
        ty: TypeId,
        args: Vec<ExprId>,
    },
}

/// Type and lvalue-ness are fixed when the node is created.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub is_lvalue: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(ExprId),
    /// `T a, b = init;` shares one initializer between all names.
    VarDecl {
        vars: Vec<VarId>,
        init: Option<ExprId>,
    },
    Block(Vec<StmtId>),
    /// `then` is a block; `els` is a block or a nested `If` for `else if`.
    If {
        cond: ExprId,
        then: StmtId,
        els: Option<StmtId>,
    },
    For {
        init: Option<ExprId>,
        cond: Option<ExprId>,
        incr: Option<ExprId>,
        body: StmtId,
    },
    Return(Option<ExprId>),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// Top-level declarations in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decl {
    Struct(TypeId),
    Function(FunctionId),
    Globals(StmtId),
}

// ---------------------------------------------------------------------------
// Program
// ---------------------------------------------------------------------------

/// A parsed and type-checked translation unit. Owns every node.
#[derive(Debug)]
pub struct Program {
    pub types: Arena<Type>,
    pub exprs: Arena<Expr>,
    pub stmts: Arena<Stmt>,
    pub vars: Arena<Var>,
    pub functions: Arena<Function>,
    pub decls: Vec<Decl>,
    pub builtins: BuiltinTypes,
    pointer_types: HashMap<(TypeId, StorageClass), TypeId>,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Creates a program holding only the built-in types.
    pub fn new() -> Self {
        let mut types = Arena::new();
        let mut prim = |name: &str, p: PrimitiveType| {
            types.append(Type {
                name: name.to_string(),
                kind: TypeKind::Primitive(p),
                span: None,
            })
        };
        let void = prim("void", PrimitiveType::Void);
        let bool = prim("bool", PrimitiveType::Bool);
        let s8 = prim("s8", PrimitiveType::Int { bits: 8, signed: true });
        let s16 = prim("s16", PrimitiveType::Int { bits: 16, signed: true });
        let s32 = prim("s32", PrimitiveType::Int { bits: 32, signed: true });
        let s64 = prim("s64", PrimitiveType::Int { bits: 64, signed: true });
        let u8 = prim("u8", PrimitiveType::Int { bits: 8, signed: false });
        let u16 = prim("u16", PrimitiveType::Int { bits: 16, signed: false });
        let u32 = prim("u32", PrimitiveType::Int { bits: 32, signed: false });
        let u64 = prim("u64", PrimitiveType::Int { bits: 64, signed: false });
        let f32 = prim("f32", PrimitiveType::Float { bits: 32 });
        let f64 = prim("f64", PrimitiveType::Float { bits: 64 });

        let mut vector = |width: u32| {
            let members = ["x", "y", "z", "w"][..width as usize]
                .iter()
                .map(|name| StructMember {
                    name: name.to_string(),
                    ty: f32,
                    init: None,
                    attrs: Vec::new(),
                    span: Span::default(),
                })
                .collect();
            types.append(Type {
                name: format!("float{}", width),
                kind: TypeKind::Struct { members, vector_width: Some(width) },
                span: None,
            })
        };
        let float2 = vector(2);
        let float3 = vector(3);
        let float4 = vector(4);

        Program {
            types,
            exprs: Arena::new(),
            stmts: Arena::new(),
            vars: Arena::new(),
            functions: Arena::new(),
            decls: Vec::new(),
            builtins: BuiltinTypes {
                void,
                bool,
                s8,
                s16,
                s32,
                s64,
                u8,
                u16,
                u32,
                u64,
                f32,
                f64,
                float2,
                float3,
                float4,
            },
            pointer_types: HashMap::new(),
        }
    }

    pub fn type_name(&self, ty: TypeId) -> &str {
        &self.types[ty].name
    }

    pub fn primitive(&self, ty: TypeId) -> Option<PrimitiveType> {
        match self.types[ty].kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_void(&self, ty: TypeId) -> bool {
        ty == self.builtins.void
    }

    pub fn is_bool(&self, ty: TypeId) -> bool {
        ty == self.builtins.bool
    }

    pub fn is_integer(&self, ty: TypeId) -> bool {
        matches!(self.primitive(ty), Some(PrimitiveType::Int { .. }))
    }

    pub fn is_float(&self, ty: TypeId) -> bool {
        matches!(self.primitive(ty), Some(PrimitiveType::Float { .. }))
    }

    pub fn is_numeric(&self, ty: TypeId) -> bool {
        self.is_integer(ty) || self.is_float(ty)
    }

    /// Bool, integer or float.
    pub fn is_primitive(&self, ty: TypeId) -> bool {
        self.is_bool(ty) || self.is_numeric(ty)
    }

    pub fn is_pointer(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Pointer { .. })
    }

    pub fn is_struct(&self, ty: TypeId) -> bool {
        matches!(self.types[ty].kind, TypeKind::Struct { .. })
    }

    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match self.types[ty].kind {
            TypeKind::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    pub fn vector_width(&self, ty: TypeId) -> Option<u32> {
        match self.types[ty].kind {
            TypeKind::Struct { vector_width, .. } => vector_width,
            _ => None,
        }
    }

    pub fn struct_members(&self, ty: TypeId) -> Option<&[StructMember]> {
        match &self.types[ty].kind {
            TypeKind::Struct { members, .. } => Some(members),
            _ => None,
        }
    }

    /// `f32` for one component, `floatN` otherwise.
    pub fn float_vector(&self, width: usize) -> Option<TypeId> {
        match width {
            1 => Some(self.builtins.f32),
            2 => Some(self.builtins.float2),
            3 => Some(self.builtins.float3),
            4 => Some(self.builtins.float4),
            _ => None,
        }
    }

    /// Interned pointer type. Equal pointee and storage class give the same handle.
    pub fn pointer_to(&mut self, pointee: TypeId, storage: StorageClass) -> TypeId {
        if let Some(&ty) = self.pointer_types.get(&(pointee, storage)) {
            return ty;
        }
        let ty = self.types.append(Type {
            name: format!("{}*", self.types[pointee].name),
            kind: TypeKind::Pointer { pointee, storage },
            span: None,
        });
        self.pointer_types.insert((pointee, storage), ty);
        ty
    }

    pub fn find_function(&self, name: &str) -> Option<FunctionId> {
        self.functions.iter().find(|(_, f)| f.name == name).map(|(h, _)| h)
    }

    /// Functions that carry a body, in declaration order.
    pub fn defined_functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.decls.iter().filter_map(move |decl| match *decl {
            Decl::Function(f) if self.functions[f].body.is_some() => Some(f),
            _ => None,
        })
    }

    /// Whether lowering `expr` splits the current block.
    pub fn expr_branches(&self, expr: ExprId) -> bool {
        match &self.exprs[expr].kind {
            ExprKind::Ternary { .. } => true,
            ExprKind::Literal(_) | ExprKind::Variable(_) => false,
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Index { base: lhs, index: rhs } => {
                self.expr_branches(*lhs) || self.expr_branches(*rhs)
            }
            ExprKind::Unary { operand, .. } | ExprKind::Deref(operand) => self.expr_branches(*operand),
            ExprKind::Member { base, .. } | ExprKind::Swizzle { base, .. } => self.expr_branches(*base),
            ExprKind::Call { args, .. } | ExprKind::StructInit { args, .. } => {
                args.iter().any(|arg| self.expr_branches(*arg))
            }
        }
    }
}
