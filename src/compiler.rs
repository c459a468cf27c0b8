// lowers the AST (ast.rs) into the flat bytecode stream bytecode.rs's
// Assembler emits, matching tiny.c's `CompileExpr`/`CompileProgram`.
//
// stack convention: every value-producing expression leaves exactly one
// value on the stack. `Set`/`SetLocal`/`SetIndex` fully consume the value
// being stored (no net push), so assignment is a statement, not an
// expression, and needs no compensating `Pop`; every other statement that
// sits directly in a block and produces a value still gets an explicit
// `Pop` to discard it, mirroring tiny.c's `CompileProgram` emitting
// `OP_POP` after each top-level expression statement.

use crate::ast::{BinOp, Expr, ReadTarget, UnaryOp};
use crate::bytecode::{Assembler, Op};
use crate::constants::ConstantPool;
use crate::error::{CompileError, CompileResult};
use crate::symbols::{CalleeId, FunctionTable, GlobalTable};

pub struct Compiler<'a> {
    asm: Assembler,
    constants: &'a mut ConstantPool,
    globals: &'a mut GlobalTable,
    functions: &'a mut FunctionTable,
    /// call sites to a user function whose body may not be lowered yet;
    /// patched with the real entry pc once the whole program is compiled.
    pending_calls: Vec<(u32, u32)>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        constants: &'a mut ConstantPool,
        globals: &'a mut GlobalTable,
        functions: &'a mut FunctionTable,
    ) -> Self {
        Compiler { asm: Assembler::new(), constants, globals, functions, pending_calls: Vec::new() }
    }

    pub fn compile(mut self, program: &[Expr]) -> CompileResult<Vec<u8>> {
        self.compile_block(program)?;
        self.asm.emit_op(Op::Halt)?;
        for (patch_pc, user_id) in &self.pending_calls {
            let target = self.functions.entry_pc(*user_id);
            self.asm.patch_int_at(*patch_pc, target as i32);
        }
        Ok(self.asm.into_bytes())
    }

    fn compile_block(&mut self, body: &[Expr]) -> CompileResult<()> {
        for stmt in body {
            if is_member_literal_assign(stmt) {
                self.compile_expr(stmt)?;
                continue;
            }
            self.compile_expr(stmt)?;
            if stmt_leaves_value(stmt) {
                self.asm.emit_op(Op::Pop)?;
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Number(idx) | Expr::Str(idx) => {
                self.asm.emit_op(Op::Push)?;
                self.asm.emit_i32(*idx as i32)?;
            }
            Expr::Global(idx) => {
                self.check_initialized(*idx)?;
                self.asm.emit_op(Op::Get)?;
                self.asm.emit_i32(*idx as i32)?;
            }
            Expr::LocalRef(slot) => {
                self.asm.emit_op(Op::GetLocal)?;
                self.asm.emit_i32(*slot)?;
            }
            // a bare `local x;` with no initializer: the slot was already
            // reserved by the prologue's zero-pushes, nothing to emit here.
            Expr::LocalDecl(_) => {}
            Expr::GlobalIndex { array_index, index } => {
                self.check_initialized(*array_index)?;
                self.asm.emit_op(Op::Get)?;
                self.asm.emit_i32(*array_index as i32)?;
                self.compile_expr(index)?;
                self.asm.emit_op(Op::GetIndex)?;
            }
            Expr::LocalIndex { slot, index } => {
                self.asm.emit_op(Op::GetLocal)?;
                self.asm.emit_i32(*slot)?;
                self.compile_expr(index)?;
                self.asm.emit_op(Op::GetIndex)?;
            }
            Expr::Call(call) => self.compile_call(call)?,
            Expr::Binary { op, lhs, rhs } => self.compile_binary(*op, lhs, rhs)?,
            Expr::Assign { lhs, rhs } => self.compile_assign(lhs, rhs)?,
            Expr::Paren(inner) => self.compile_expr(inner)?,
            Expr::Unary { op, expr } => self.compile_unary(*op, expr)?,
            Expr::MakeArray(len) => {
                self.compile_expr(len)?;
                self.asm.emit_op(Op::MakeArray)?;
            }
            Expr::Proc(proc) => self.compile_proc(proc)?,
            Expr::If(if_expr) => self.compile_if(if_expr)?,
            Expr::While(while_expr) => self.compile_while(while_expr)?,
            Expr::Return(value) => self.compile_return(value)?,
            Expr::Read(targets) => self.compile_read(targets)?,
            Expr::Write(exprs) => self.compile_write(exprs)?,
            Expr::NamedMemberArrayLiteral(_) => return Err(CompileError::MemberAccessUnsupported),
        }
        Ok(())
    }

    fn check_initialized(&self, idx: u32) -> CompileResult<()> {
        let global = self.globals.get(idx);
        if !global.initialized {
            return Err(CompileError::UninitializedGlobal { name: global.name.clone() });
        }
        Ok(())
    }

    fn compile_call(&mut self, call: &crate::ast::CallExpr) -> CompileResult<()> {
        for arg in &call.args {
            self.compile_expr(arg)?;
        }
        let nargs = call.args.len() as i32;
        match call.callee {
            CalleeId::User(id) => {
                self.asm.emit_op(Op::Call)?;
                let patch_pc = self.asm.reserve_i32()?;
                self.asm.emit_i32(nargs)?;
                self.pending_calls.push((patch_pc, id));
            }
            CalleeId::Foreign(id) => {
                self.asm.emit_op(Op::Callf)?;
                self.asm.emit_i32(id as i32)?;
                self.asm.emit_i32(nargs)?;
            }
        }
        Ok(())
    }

    fn compile_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<()> {
        if op == BinOp::Member {
            return Err(CompileError::MemberAccessUnsupported);
        }
        self.compile_expr(lhs)?;
        self.compile_expr(rhs)?;
        let opcode = match op {
            BinOp::Add => Op::Add,
            BinOp::Sub => Op::Sub,
            BinOp::Mul => Op::Mul,
            BinOp::Div => Op::Div,
            BinOp::Mod => Op::Mod,
            BinOp::BitOr => Op::Or,
            BinOp::BitAnd => Op::And,
            BinOp::Lt => Op::Lt,
            BinOp::Lte => Op::Lte,
            BinOp::Gt => Op::Gt,
            BinOp::Gte => Op::Gte,
            BinOp::Equ => Op::Equ,
            BinOp::Nequ => Op::Nequ,
            BinOp::Member => unreachable!("handled above"),
        };
        self.asm.emit_op(opcode)
    }

    fn compile_unary(&mut self, op: UnaryOp, expr: &Expr) -> CompileResult<()> {
        self.compile_expr(expr)?;
        if op == UnaryOp::Neg {
            let neg_one = self.constants.register_number(-1.0)?;
            self.asm.emit_op(Op::Push)?;
            self.asm.emit_i32(neg_one as i32)?;
            self.asm.emit_op(Op::Mul)?;
        }
        Ok(())
    }

    fn compile_assign(&mut self, lhs: &Expr, rhs: &Expr) -> CompileResult<()> {
        if let (Expr::Global(idx), Expr::NamedMemberArrayLiteral(members)) = (lhs, rhs) {
            self.globals.get_mut(*idx).members = members.clone();
            return Ok(());
        }

        match lhs {
            Expr::Global(idx) => {
                self.compile_expr(rhs)?;
                self.asm.emit_op(Op::Set)?;
                self.asm.emit_i32(*idx as i32)?;
                let global = self.globals.get_mut(*idx);
                global.initialized = true;
                self.globals.note_runtime_store(*idx);
            }
            Expr::LocalRef(slot) | Expr::LocalDecl(slot) => {
                self.compile_expr(rhs)?;
                self.asm.emit_op(Op::SetLocal)?;
                self.asm.emit_i32(*slot)?;
            }
            Expr::GlobalIndex { array_index, index } => {
                self.check_initialized(*array_index)?;
                self.asm.emit_op(Op::Get)?;
                self.asm.emit_i32(*array_index as i32)?;
                self.compile_expr(index)?;
                self.compile_expr(rhs)?;
                self.asm.emit_op(Op::SetIndex)?;
            }
            Expr::LocalIndex { slot, index } => {
                self.asm.emit_op(Op::GetLocal)?;
                self.asm.emit_i32(*slot)?;
                self.compile_expr(index)?;
                self.compile_expr(rhs)?;
                self.asm.emit_op(Op::SetIndex)?;
            }
            _ => return Err(CompileError::InvalidAssignmentTarget),
        }
        Ok(())
    }

    fn compile_proc(&mut self, proc: &crate::ast::ProcExpr) -> CompileResult<()> {
        self.asm.emit_op(Op::Goto)?;
        let skip_patch = self.asm.reserve_i32()?;

        let entry_pc = self.asm.len();
        self.functions.set_entry_pc(proc.callee_id, entry_pc);

        let zero = self.constants.register_number(0.0)?;
        for _ in 0..proc.num_locals {
            self.asm.emit_op(Op::Push)?;
            self.asm.emit_i32(zero as i32)?;
        }
        self.compile_block(&proc.body)?;
        self.asm.emit_op(Op::Return)?;

        let after = self.asm.len();
        self.asm.patch_int_at(skip_patch, after as i32);
        Ok(())
    }

    fn compile_if(&mut self, if_expr: &crate::ast::IfExpr) -> CompileResult<()> {
        self.compile_expr(&if_expr.cond)?;
        self.asm.emit_op(Op::Gotoz)?;
        let patch_pc = self.asm.reserve_i32()?;
        self.compile_block(&if_expr.body)?;
        let after = self.asm.len();
        self.asm.patch_int_at(patch_pc, after as i32);
        Ok(())
    }

    fn compile_while(&mut self, while_expr: &crate::ast::WhileExpr) -> CompileResult<()> {
        let loop_start = self.asm.len();
        self.compile_expr(&while_expr.cond)?;
        self.asm.emit_op(Op::Gotoz)?;
        let patch_pc = self.asm.reserve_i32()?;
        self.compile_block(&while_expr.body)?;
        self.asm.emit_op(Op::Goto)?;
        self.asm.emit_i32(loop_start as i32)?;
        let after = self.asm.len();
        self.asm.patch_int_at(patch_pc, after as i32);
        Ok(())
    }

    fn compile_return(&mut self, value: &Option<Box<Expr>>) -> CompileResult<()> {
        match value {
            Some(expr) => {
                self.compile_expr(expr)?;
                self.asm.emit_op(Op::ReturnValue)
            }
            None => self.asm.emit_op(Op::Return),
        }
    }

    fn compile_read(&mut self, targets: &[ReadTarget]) -> CompileResult<()> {
        for target in targets {
            self.asm.emit_op(Op::Read)?;
            match target {
                ReadTarget::Global(idx) => {
                    self.asm.emit_op(Op::Set)?;
                    self.asm.emit_i32(*idx as i32)?;
                    let global = self.globals.get_mut(*idx);
                    global.initialized = true;
                    self.globals.note_runtime_store(*idx);
                }
                ReadTarget::Local(slot) => {
                    self.asm.emit_op(Op::SetLocal)?;
                    self.asm.emit_i32(*slot)?;
                }
            }
        }
        Ok(())
    }

    fn compile_write(&mut self, exprs: &[Expr]) -> CompileResult<()> {
        for expr in exprs {
            self.compile_expr(expr)?;
            self.asm.emit_op(Op::Print)?;
        }
        Ok(())
    }
}

fn stmt_leaves_value(expr: &Expr) -> bool {
    !matches!(
        expr,
        Expr::If(_)
            | Expr::While(_)
            | Expr::Proc(_)
            | Expr::Return(_)
            | Expr::Read(_)
            | Expr::Write(_)
            | Expr::LocalDecl(_)
            | Expr::Assign { .. }
    )
}

fn is_member_literal_assign(expr: &Expr) -> bool {
    matches!(expr, Expr::Assign { lhs, rhs } if matches!((&**lhs, &**rhs), (Expr::Global(_), Expr::NamedMemberArrayLiteral(_))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;
    use crate::parser::Parser;

    fn compile_source(src: &str) -> (Vec<u8>, ConstantPool, GlobalTable, FunctionTable) {
        let mut constants = ConstantPool::new();
        let mut globals = GlobalTable::new();
        let mut functions = FunctionTable::new();
        let program = {
            let mut parser = Parser::new(src.as_bytes(), &mut constants, &mut globals, &mut functions).unwrap();
            parser.parse_program().unwrap()
        };
        let code = Compiler::new(&mut constants, &mut globals, &mut functions).compile(&program).unwrap();
        (code, constants, globals, functions)
    }

    #[test]
    fn arithmetic_statement_is_popped() {
        let (code, _, _, _) = compile_source("write 1 + 2 end");
        assert_eq!(code.last(), Some(&(Op::Halt as u8)));
    }

    #[test]
    fn uninitialized_global_read_is_rejected() {
        let mut constants = ConstantPool::new();
        let mut globals = GlobalTable::new();
        let mut functions = FunctionTable::new();
        let program = {
            let mut parser = Parser::new(b"write x end", &mut constants, &mut globals, &mut functions).unwrap();
            parser.parse_program().unwrap()
        };
        let result = Compiler::new(&mut constants, &mut globals, &mut functions).compile(&program);
        assert!(matches!(result, Err(CompileError::UninitializedGlobal { .. })));
    }

    #[test]
    fn named_member_array_literal_emits_no_bytecode_for_its_assignment() {
        let (code, _, globals, _) = compile_source("point = { x, y }");
        // the assignment bookkeeping is purely compile-time: only the
        // trailing Halt should be present.
        assert_eq!(code, vec![Op::Halt as u8]);
        assert_eq!(globals.get(0).members, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn forward_call_to_a_later_proc_is_backpatched() {
        let (code, _, _, functions) = compile_source("write fact(5) end proc fact(n) return n end");
        assert!(!code.is_empty());
        assert!(functions.entry_pc(0) > 0);
    }
}
