// the AST the parser produces and lowering consumes. a program body is a
// singly-linked sequence in tiny.c (each node has a `next` pointer); we
// use `Vec<Expr>` for statement lists instead, which is the idiomatic
// equivalent and lets `compiler.rs` iterate without walking pointers.

use crate::symbols::CalleeId;

/// A binary operator, kept as its own enum instead of a raw token/char so
/// `compiler.rs` can match on it exhaustively. Per spec.md §9's design
/// note, `.` is retained here (the lexer still produces it at its table
/// precedence) purely so the compiler can reject it with a proper
/// diagnostic instead of the parser never reaching that branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitOr,
    BitAnd,
    Lt,
    Lte,
    Gt,
    Gte,
    Equ,
    Nequ,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
}

pub struct CallExpr {
    pub callee: CalleeId,
    pub args: Vec<Expr>,
}

pub struct ProcExpr {
    pub callee_id: u32,
    pub num_locals: i32,
    pub body: Vec<Expr>,
}

pub struct IfExpr {
    pub cond: Box<Expr>,
    pub body: Vec<Expr>,
}

pub struct WhileExpr {
    pub cond: Box<Expr>,
    pub body: Vec<Expr>,
}

/// One entry of a `read a $b c end` statement.
pub enum ReadTarget {
    Global(u32),
    Local(i32),
}

/// A node that names a global or local variable (directly or through an
/// index). `Expr::Binary` with `op == Assign` is lowered by matching on
/// its `lhs` being one of these shapes — not validated here, since
/// spec.md classifies "invalid LHS of `=`" as a compile-time semantic
/// error rather than a parse error, so the check belongs in
/// `compiler.rs`, matching tiny.c's `CompileExpr` doing the same
/// re-dispatch on `exp->binary.lhs->type`.
pub enum Expr {
    Number(u32),
    Str(u32),
    Global(u32),
    LocalRef(i32),
    /// `local name` — declares a slot; evaluates to nothing by itself.
    LocalDecl(i32),
    GlobalIndex { array_index: u32, index: Box<Expr> },
    LocalIndex { slot: i32, index: Box<Expr> },
    Call(CallExpr),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `lhs = rhs`, kept distinct from `Binary` (rather than `Binary`
    /// with `op: Assign`) because its lowering is a full re-dispatch on
    /// `lhs`'s shape rather than a single opcode emission.
    Assign { lhs: Box<Expr>, rhs: Box<Expr> },
    Paren(Box<Expr>),
    Unary { op: UnaryOp, expr: Box<Expr> },
    MakeArray(Box<Expr>),
    Proc(ProcExpr),
    If(IfExpr),
    While(WhileExpr),
    Return(Option<Box<Expr>>),
    Read(Vec<ReadTarget>),
    Write(Vec<Expr>),
    /// `{ a, b, c }` — only legal as the RHS of `global = { ... }`;
    /// consumed entirely at lowering time and never reached by a runtime
    /// opcode.
    NamedMemberArrayLiteral(Vec<String>),
}
