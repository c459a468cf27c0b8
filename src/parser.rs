// a hand-written recursive-descent parser with a Pratt precedence-climbing
// layer for binary operators, producing the AST in ast.rs. constant,
// global, and function registration all happen inline during parsing
// (not deferred to a later pass), matching tiny.c's ParseFactor calling
// RegisterNumber/RegisterVariableName/RegisterFunction as it goes.

use crate::ast::{BinOp, CallExpr, Expr, IfExpr, ProcExpr, ReadTarget, UnaryOp, WhileExpr};
use crate::constants::ConstantPool;
use crate::error::{ParseError, TinyError, TinyResult};
use crate::lexer::{Lexer, Token};
use crate::symbols::{FunctionTable, GlobalTable, LocalScope};

const MAX_ARGS: usize = 32;
const MAX_MEMBERS: usize = 32;
const MAX_READ_WRITE: usize = 128;

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    constants: &'a mut ConstantPool,
    globals: &'a mut GlobalTable,
    functions: &'a mut FunctionTable,
    locals: LocalScope,
}

impl<'a> Parser<'a> {
    pub fn new(
        source: &'a [u8],
        constants: &'a mut ConstantPool,
        globals: &'a mut GlobalTable,
        functions: &'a mut FunctionTable,
    ) -> TinyResult<Self> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        Ok(Parser { lexer, current, constants, globals, functions, locals: LocalScope::new() })
    }

    fn bump(&mut self) -> TinyResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect_char(&mut self, c: char, context: &'static str) -> TinyResult<()> {
        match &self.current {
            Token::Char(found) if *found == c => {
                self.bump()?;
                Ok(())
            }
            other => Err(TinyError::Parse(ParseError::UnexpectedToken {
                found: format!("{other:?}"),
                expected: context,
            })),
        }
    }

    fn at_char(&self, c: char) -> bool {
        matches!(&self.current, Token::Char(found) if *found == c)
    }

    /// Parse the whole top-level program: a sequence of statement
    /// expressions, optionally wrapped in a `begin ... end` block (both
    /// forms appear in tiny.c test programs; a bare statement sequence
    /// with no wrapper is accepted as an equivalent shorthand).
    pub fn parse_program(&mut self) -> TinyResult<Vec<Expr>> {
        if self.current == Token::Begin {
            self.bump()?;
            let statements = self.parse_block_until_end()?;
            if self.current != Token::Eof {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: format!("{:?}", self.current),
                    expected: "end of input after the top-level 'end'",
                }));
            }
            return Ok(statements);
        }

        let mut statements = Vec::new();
        while self.current != Token::Eof {
            statements.push(self.parse_expr()?);
        }
        Ok(statements)
    }

    fn parse_block_until_end(&mut self) -> TinyResult<Vec<Expr>> {
        let mut statements = Vec::new();
        while self.current != Token::End {
            statements.push(self.parse_expr()?);
        }
        self.bump()?; // consume 'end'
        Ok(statements)
    }

    pub fn parse_expr(&mut self) -> TinyResult<Expr> {
        let lhs = self.parse_factor()?;
        self.parse_bin_rhs(0, lhs)
    }

    fn token_prec(tok: &Token) -> i32 {
        match tok {
            Token::Char('*') | Token::Char('/') | Token::Char('%') | Token::Char('&') | Token::Char('|') => 5,
            Token::Char('+') | Token::Char('-') => 4,
            Token::Lte | Token::Gte | Token::Equals | Token::NotEquals | Token::Char('<') | Token::Char('>') => 3,
            Token::Char('=') => 1,
            _ => -1,
        }
    }

    fn token_to_binop(tok: &Token) -> BinOp {
        match tok {
            Token::Char('*') => BinOp::Mul,
            Token::Char('/') => BinOp::Div,
            Token::Char('%') => BinOp::Mod,
            Token::Char('&') => BinOp::BitAnd,
            Token::Char('|') => BinOp::BitOr,
            Token::Char('+') => BinOp::Add,
            Token::Char('-') => BinOp::Sub,
            Token::Char('<') => BinOp::Lt,
            Token::Char('>') => BinOp::Gt,
            Token::Lte => BinOp::Lte,
            Token::Gte => BinOp::Gte,
            Token::Equals => BinOp::Equ,
            Token::NotEquals => BinOp::Nequ,
            other => unreachable!("{other:?} is not a binary operator token"),
        }
    }

    fn parse_bin_rhs(&mut self, min_prec: i32, mut lhs: Expr) -> TinyResult<Expr> {
        loop {
            let prec = Self::token_prec(&self.current);
            if prec < min_prec {
                return Ok(lhs);
            }

            let op_token = self.current.clone();
            let is_assign = matches!(op_token, Token::Char('='));
            self.bump()?;

            let mut rhs = self.parse_factor()?;
            let next_prec = Self::token_prec(&self.current);
            if prec < next_prec {
                rhs = self.parse_bin_rhs(prec + 1, rhs)?;
            }

            lhs = if is_assign {
                Expr::Assign { lhs: Box::new(lhs), rhs: Box::new(rhs) }
            } else {
                Expr::Binary { op: Self::token_to_binop(&op_token), lhs: Box::new(lhs), rhs: Box::new(rhs) }
            };
        }
    }

    fn parse_factor(&mut self) -> TinyResult<Expr> {
        match self.current.clone() {
            Token::Ident(name) => self.parse_ident_factor(name),
            Token::Char('{') => self.parse_named_member_array(),
            Token::Char('[') => {
                self.bump()?;
                let len = self.parse_expr()?;
                self.expect_char(']', "']' after array length")?;
                Ok(Expr::MakeArray(Box::new(len)))
            }
            Token::Char('-') => {
                self.bump()?;
                Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.parse_factor()?) })
            }
            Token::Char('+') => {
                self.bump()?;
                Ok(Expr::Unary { op: UnaryOp::Pos, expr: Box::new(self.parse_factor()?) })
            }
            Token::Number(n) => {
                self.bump()?;
                Ok(Expr::Number(self.constants.register_number(n)?))
            }
            Token::Str(s) => {
                self.bump()?;
                Ok(Expr::Str(self.constants.register_string(&s)?))
            }
            Token::Local => self.parse_local_decl(),
            Token::LocalRef(name) => self.parse_local_ref(name),
            Token::Proc => self.parse_proc(),
            Token::If => self.parse_if(),
            Token::While => self.parse_while(),
            Token::Return => self.parse_return(),
            Token::Read => self.parse_read(),
            Token::Write => self.parse_write(),
            Token::Char('(') => {
                self.bump()?;
                let inner = self.parse_expr()?;
                self.expect_char(')', "matching ')'")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(TinyError::Parse(ParseError::UnexpectedToken {
                found: format!("{other:?}"),
                expected: "a statement or expression",
            })),
        }
    }

    fn parse_ident_factor(&mut self, name: String) -> TinyResult<Expr> {
        self.bump()?;
        if self.at_char('(') {
            self.bump()?;
            let mut args = Vec::new();
            while !self.at_char(')') {
                args.push(self.parse_expr()?);
                if self.at_char(',') {
                    self.bump()?;
                } else if !self.at_char(')') {
                    return Err(TinyError::Parse(ParseError::UnexpectedToken {
                        found: format!("{:?}", self.current),
                        expected: "',' or ')' in call argument list",
                    }));
                }
                if args.len() > MAX_ARGS {
                    return Err(TinyError::Compile(crate::error::CompileError::TooManyArguments { max: MAX_ARGS }));
                }
            }
            self.bump()?; // consume ')'
            let callee = self.functions.resolve_callee(&name)?;
            return Ok(Expr::Call(CallExpr { callee, args }));
        }
        if self.at_char('[') {
            self.bump()?;
            let array_index = self.globals.register(&name)?;
            let index = self.parse_expr()?;
            self.expect_char(']', "']' after array index")?;
            return Ok(Expr::GlobalIndex { array_index, index: Box::new(index) });
        }
        Ok(Expr::Global(self.globals.register(&name)?))
    }

    fn parse_named_member_array(&mut self) -> TinyResult<Expr> {
        self.bump()?; // consume '{'
        let mut members = Vec::new();
        while !self.at_char('}') {
            match self.current.clone() {
                Token::Ident(name) => {
                    members.push(name);
                    self.bump()?;
                }
                other => {
                    return Err(TinyError::Parse(ParseError::UnexpectedToken {
                        found: format!("{other:?}"),
                        expected: "a member name",
                    }))
                }
            }
            if self.at_char(',') {
                self.bump()?;
            } else if !self.at_char('}') {
                return Err(TinyError::Parse(ParseError::UnclosedDelimiter { opener: '{' }));
            }
            if members.len() > MAX_MEMBERS {
                return Err(TinyError::Compile(crate::error::CompileError::TooManyMembers { max: MAX_MEMBERS }));
            }
        }
        self.bump()?; // consume '}'
        Ok(Expr::NamedMemberArrayLiteral(members))
    }

    fn parse_local_decl(&mut self) -> TinyResult<Expr> {
        if self.locals.depth() == 0 {
            return Err(TinyError::Parse(ParseError::LocalAtGlobalScope));
        }
        self.bump()?; // consume 'local'
        let name = match self.current.clone() {
            Token::Ident(name) => name,
            other => {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: format!("{other:?}"),
                    expected: "a local name",
                }))
            }
        };
        self.bump()?;
        Ok(Expr::LocalDecl(self.locals.declare_local(&name)))
    }

    fn parse_local_ref(&mut self, name: String) -> TinyResult<Expr> {
        let slot = self.locals.reference(&name)?;
        self.bump()?;
        if self.at_char('[') {
            self.bump()?;
            let index = self.parse_expr()?;
            self.expect_char(']', "']' after array index")?;
            return Ok(Expr::LocalIndex { slot, index: Box::new(index) });
        }
        Ok(Expr::LocalRef(slot))
    }

    fn parse_proc(&mut self) -> TinyResult<Expr> {
        if self.locals.depth() != 0 {
            return Err(TinyError::Parse(ParseError::ProcInLocalScope));
        }
        self.bump()?; // consume 'proc'
        let name = match self.current.clone() {
            Token::Ident(name) => name,
            other => {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: format!("{other:?}"),
                    expected: "a procedure name",
                }))
            }
        };
        self.bump()?;

        let callee = self.functions.resolve_callee(&name)?;
        let callee_id = match callee {
            crate::symbols::CalleeId::User(id) => id,
            crate::symbols::CalleeId::Foreign(_) => {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: name,
                    expected: "a name not already bound to a foreign function",
                }))
            }
        };

        self.locals.enter();
        self.expect_char('(', "'(' after procedure name")?;
        let mut arg_names = Vec::new();
        while !self.at_char(')') {
            match self.current.clone() {
                Token::Ident(arg) => {
                    arg_names.push(arg);
                    self.bump()?;
                }
                other => {
                    return Err(TinyError::Parse(ParseError::UnexpectedToken {
                        found: format!("{other:?}"),
                        expected: "a parameter name",
                    }))
                }
            }
            if self.at_char(',') {
                self.bump()?;
            } else if !self.at_char(')') {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: format!("{:?}", self.current),
                    expected: "',' or ')' in parameter list",
                }));
            }
        }
        self.bump()?; // consume ')'
        let nargs = arg_names.len() as i32;
        for (position, arg_name) in arg_names.iter().enumerate() {
            self.locals.declare_argument(arg_name, position as i32, nargs);
        }

        let body = if self.current == Token::End {
            self.bump()?;
            Vec::new()
        } else {
            self.parse_block_until_end()?
        };
        let num_locals = self.locals.num_locals();
        self.locals.exit();
        self.locals.clear();

        Ok(Expr::Proc(ProcExpr { callee_id, num_locals, body }))
    }

    fn parse_if(&mut self) -> TinyResult<Expr> {
        self.bump()?; // consume 'if'
        let cond = Box::new(self.parse_expr()?);
        if self.current != Token::Then {
            return Err(TinyError::Parse(ParseError::MissingThen { found: format!("{:?}", self.current) }));
        }
        self.bump()?; // consume 'then'
        self.locals.enter();
        let body = if self.current == Token::End {
            self.bump()?;
            Vec::new()
        } else {
            self.parse_block_until_end()?
        };
        self.locals.exit();
        Ok(Expr::If(IfExpr { cond, body }))
    }

    fn parse_while(&mut self) -> TinyResult<Expr> {
        self.bump()?; // consume 'while'
        let cond = Box::new(self.parse_expr()?);
        self.locals.enter();
        let body = if self.current == Token::End {
            self.bump()?;
            Vec::new()
        } else {
            self.parse_block_until_end()?
        };
        self.locals.exit();
        Ok(Expr::While(WhileExpr { cond, body }))
    }

    fn parse_return(&mut self) -> TinyResult<Expr> {
        self.bump()?; // consume 'return'
        if self.at_char(';') {
            self.bump()?;
            return Ok(Expr::Return(None));
        }
        let value = self.parse_expr()?;
        Ok(Expr::Return(Some(Box::new(value))))
    }

    fn parse_read(&mut self) -> TinyResult<Expr> {
        self.bump()?; // consume 'read'
        let mut targets = Vec::new();
        while self.current != Token::End {
            match self.current.clone() {
                Token::Ident(name) => {
                    targets.push(ReadTarget::Global(self.globals.register(&name)?));
                    self.bump()?;
                }
                Token::LocalRef(name) => {
                    targets.push(ReadTarget::Local(self.locals.reference(&name)?));
                    self.bump()?;
                }
                other => {
                    return Err(TinyError::Parse(ParseError::UnexpectedToken {
                        found: format!("{other:?}"),
                        expected: "a variable in a read list",
                    }))
                }
            }
            if targets.len() > MAX_READ_WRITE {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: "...".into(),
                    expected: "no more than 128 read targets",
                }));
            }
        }
        self.bump()?; // consume 'end'
        Ok(Expr::Read(targets))
    }

    fn parse_write(&mut self) -> TinyResult<Expr> {
        self.bump()?; // consume 'write'
        let mut exprs = Vec::new();
        while self.current != Token::End {
            exprs.push(self.parse_expr()?);
            if exprs.len() > MAX_READ_WRITE {
                return Err(TinyError::Parse(ParseError::UnexpectedToken {
                    found: "...".into(),
                    expected: "no more than 128 write expressions",
                }));
            }
        }
        self.bump()?; // consume 'end'
        Ok(Expr::Write(exprs))
    }
}
