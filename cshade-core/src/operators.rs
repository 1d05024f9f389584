//! Operator table: spelling, precedence and operand-domain flags.

use bitflags::bitflags;

bitflags! {
    pub struct OpFlags: u32 {
        const LEFT_ASSOC = 1 << 0;
        /// Compound assignment, `a op= b`.
        const MOD_ASSIGN = 1 << 1;
        /// Left operand must be `bool`.
        const BOOL = 1 << 2;
        /// Left operand must be an integer.
        const INT = 1 << 3;
        /// Left operand must be bool, integer or float.
        const PRIMITIVE = 1 << 4;
        /// Left operand must be an integer or float.
        const NUMERIC = 1 << 5;
        const PREFIX = 1 << 6;
        const POSTFIX = 1 << 7;
    }
}

pub const COMMA_PREC: u32 = 10;
pub const ASSIGN_PREC: u32 = 11;
pub const TERNARY_PREC: u32 = 12;
pub const PREFIX_PREC: u32 = 30;
pub const POSTFIX_PREC: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Comma,
    Assign,
    OrAssign,
    XorAssign,
    AndAssign,
    ShlAssign,
    ShrAssign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    RemAssign,
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

const BINARY_OPS: [BinaryOp; 30] = {
    use BinaryOp::*;
    [
        Comma, Assign, OrAssign, XorAssign, AndAssign, ShlAssign, ShrAssign, AddAssign, SubAssign,
        MulAssign, DivAssign, RemAssign, LogicalOr, LogicalAnd, BitOr, BitXor, BitAnd, Equal,
        NotEqual, Less, Greater, LessEqual, GreaterEqual, Shl, Shr, Add, Sub, Mul, Div, Rem,
    ]
};

impl BinaryOp {
    pub fn from_token(token: &str) -> Option<BinaryOp> {
        BINARY_OPS.iter().copied().find(|op| op.token() == token)
    }

    pub fn token(self) -> &'static str {
        use BinaryOp::*;
        match self {
            Comma => ",",
            Assign => "=",
            OrAssign => "|=",
            XorAssign => "^=",
            AndAssign => "&=",
            ShlAssign => "<<=",
            ShrAssign => ">>=",
            AddAssign => "+=",
            SubAssign => "-=",
            MulAssign => "*=",
            DivAssign => "/=",
            RemAssign => "%=",
            LogicalOr => "||",
            LogicalAnd => "&&",
            BitOr => "|",
            BitXor => "^",
            BitAnd => "&",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            Greater => ">",
            LessEqual => "<=",
            GreaterEqual => ">=",
            Shl => "<<",
            Shr => ">>",
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Rem => "%",
        }
    }

    pub fn precedence(self) -> u32 {
        use BinaryOp::*;
        match self {
            Comma => COMMA_PREC,
            Assign | OrAssign | XorAssign | AndAssign | ShlAssign | ShrAssign | AddAssign
            | SubAssign | MulAssign | DivAssign | RemAssign => ASSIGN_PREC,
            LogicalOr => 13,
            LogicalAnd => 14,
            BitOr => 15,
            BitXor => 16,
            BitAnd => 17,
            Equal | NotEqual => 18,
            Less | Greater | LessEqual | GreaterEqual => 19,
            Shl | Shr => 20,
            Add | Sub => 21,
            Mul | Div | Rem => 22,
        }
    }

    pub fn flags(self) -> OpFlags {
        use BinaryOp::*;
        let left = OpFlags::LEFT_ASSOC;
        match self {
            Comma => left,
            Assign => OpFlags::empty(),
            OrAssign | XorAssign | AndAssign | ShlAssign | ShrAssign | AddAssign | SubAssign
            | MulAssign | DivAssign | RemAssign => OpFlags::MOD_ASSIGN,
            LogicalOr | LogicalAnd => left | OpFlags::BOOL,
            BitOr | BitXor | BitAnd | Shl | Shr | Rem => left | OpFlags::INT,
            Equal | NotEqual => left | OpFlags::PRIMITIVE,
            Less | Greater | LessEqual | GreaterEqual | Add | Sub | Mul | Div => {
                left | OpFlags::NUMERIC
            }
        }
    }

    pub fn is_assignment(self) -> bool {
        self == BinaryOp::Assign || self.flags().contains(OpFlags::MOD_ASSIGN)
    }

    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(self, Equal | NotEqual | Less | Greater | LessEqual | GreaterEqual)
    }

    /// The plain operator a compound assignment applies: `+=` gives `+`.
    pub fn base(self) -> BinaryOp {
        use BinaryOp::*;
        match self {
            OrAssign => BitOr,
            XorAssign => BitXor,
            AndAssign => BitAnd,
            ShlAssign => Shl,
            ShrAssign => Shr,
            AddAssign => Add,
            SubAssign => Sub,
            MulAssign => Mul,
            DivAssign => Div,
            RemAssign => Rem,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    BitNot,
    Plus,
    Neg,
    PreInc,
    PreDec,
    Deref,
    AddrOf,
    PostInc,
    PostDec,
}

const PREFIX_OPS: &[(UnaryOp, &str)] = &[
    (UnaryOp::Not, "!"),
    (UnaryOp::BitNot, "~"),
    (UnaryOp::Plus, "+"),
    (UnaryOp::Neg, "-"),
    (UnaryOp::PreInc, "++"),
    (UnaryOp::PreDec, "--"),
    (UnaryOp::Deref, "*"),
    (UnaryOp::AddrOf, "&"),
];

const POSTFIX_OPS: &[(UnaryOp, &str)] = &[(UnaryOp::PostInc, "++"), (UnaryOp::PostDec, "--")];

impl UnaryOp {
    pub fn prefix_from_token(token: &str) -> Option<UnaryOp> {
        PREFIX_OPS.iter().find(|entry| entry.1 == token).map(|entry| entry.0)
    }

    pub fn postfix_from_token(token: &str) -> Option<UnaryOp> {
        POSTFIX_OPS.iter().find(|entry| entry.1 == token).map(|entry| entry.0)
    }

    pub fn token(self) -> &'static str {
        PREFIX_OPS
            .iter()
            .chain(POSTFIX_OPS)
            .find(|entry| entry.0 == self)
            .map_or("?", |entry| entry.1)
    }

    pub fn flags(self) -> OpFlags {
        match self {
            UnaryOp::PostInc | UnaryOp::PostDec => OpFlags::POSTFIX,
            _ => OpFlags::PREFIX,
        }
    }

    pub fn precedence(self) -> u32 {
        if self.flags().contains(OpFlags::POSTFIX) {
            POSTFIX_PREC
        } else {
            PREFIX_PREC
        }
    }

    pub fn is_increment(self) -> bool {
        matches!(self, UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec)
    }
}

/// Every multi- and single-character operator the lexer recognizes,
/// longest spelling first so that maximal munch falls out of a linear scan.
pub fn lexer_operators() -> Vec<&'static str> {
    let mut ops: Vec<&'static str> = BINARY_OPS
        .iter()
        .map(|op| op.token())
        .chain(PREFIX_OPS.iter().map(|entry| entry.1))
        .chain(POSTFIX_OPS.iter().map(|entry| entry.1))
        .chain(["?", "[[", "]]"])
        .collect();
    ops.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    ops.dedup();
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(BinaryOp::Mul.precedence() > BinaryOp::Add.precedence());
        assert!(BinaryOp::Add.precedence() > BinaryOp::Shl.precedence());
        assert!(BinaryOp::Less.precedence() > BinaryOp::Equal.precedence());
        assert!(BinaryOp::LogicalAnd.precedence() > BinaryOp::LogicalOr.precedence());
        assert!(BinaryOp::LogicalOr.precedence() > TERNARY_PREC);
        assert!(TERNARY_PREC > BinaryOp::Assign.precedence());
        assert!(BinaryOp::Assign.precedence() > BinaryOp::Comma.precedence());
    }

    #[test]
    fn test_compound_assignment_base() {
        let op = BinaryOp::from_token("<<=").unwrap();
        assert!(op.is_assignment());
        assert_eq!(op.base(), BinaryOp::Shl);
        assert_eq!(op.base().token(), "<<");
        assert!(!BinaryOp::Assign.flags().contains(OpFlags::LEFT_ASSOC));
    }

    #[test]
    fn test_lexer_operators_longest_first() {
        let ops = lexer_operators();
        let shl_assign = ops.iter().position(|op| *op == "<<=").unwrap();
        let shl = ops.iter().position(|op| *op == "<<").unwrap();
        let lt = ops.iter().position(|op| *op == "<").unwrap();
        assert!(shl_assign < shl && shl < lt);
        assert_eq!(ops.iter().filter(|op| **op == "++").count(), 1);
    }
}
