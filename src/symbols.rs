// symbol tables: global variables, user/foreign function tables, and the
// scope-tagged local declaration list the parser consults while lowering
// a procedure body.

use crate::error::{CompileError, CompileResult};
use crate::value::Handle;

/// A single global variable's record, including the compile-time member
/// map used for `name = { a, b, c }` named-member-array sugar.
pub struct Global {
    pub name: String,
    pub initialized: bool,
    pub value: Option<Handle>,
    /// member name -> array index, populated only for named-member arrays.
    pub members: Vec<String>,
}

/// The global variable table plus the function and foreign-function
/// tables that share its compile-time name scope.
///
/// `tiny.c` keeps these as three flat arrays (`Variables`,
/// `FunctionNames`/`FunctionPcs`, `ForeignFunctionNames`/`ForeignFunctions`)
/// searched linearly by name. We keep the linear-scan lookup (tables stay
/// well under a few hundred entries, and it reproduces the "first match
/// wins" declaration-order semantics exactly) but store the association
/// itself in `Vec`s of records for clarity.
pub struct GlobalTable {
    globals: Vec<Global>,
    /// one past the highest index ever SET at runtime; mirrors tiny.c's
    /// `RuntimeVariableAmount`, which is distinct from `VariableAmount`
    /// (every name ever mentioned at compile time).
    pub runtime_len: usize,
}

impl GlobalTable {
    pub const MAX_GLOBALS: usize = 128;

    pub fn new() -> Self {
        GlobalTable { globals: Vec::new(), runtime_len: 0 }
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn get(&self, index: u32) -> &Global {
        &self.globals[index as usize]
    }

    pub fn get_mut(&mut self, index: u32) -> &mut Global {
        &mut self.globals[index as usize]
    }

    /// Register a global by name, auto-creating an uninitialized record on
    /// first mention — including in a read context, matching tiny.c's
    /// `RegisterVariableName`. Per spec.md §9's Open Question this means a
    /// misspelled identifier silently becomes a new global and only later
    /// fails the uninitialized-use check; that quirk is preserved
    /// deliberately, not fixed, since spec.md's Non-goals don't ask for a
    /// stricter declaration model.
    pub fn register(&mut self, name: &str) -> CompileResult<u32> {
        if let Some(idx) = self.globals.iter().position(|g| g.name == name) {
            return Ok(idx as u32);
        }
        if self.globals.len() >= Self::MAX_GLOBALS {
            return Err(CompileError::TooManyGlobals { max: Self::MAX_GLOBALS });
        }
        self.globals.push(Global {
            name: name.to_string(),
            initialized: false,
            value: None,
            members: Vec::new(),
        });
        Ok(self.globals.len() as u32 - 1)
    }

    pub fn note_runtime_store(&mut self, index: u32) {
        self.runtime_len = self.runtime_len.max(index as usize + 1);
    }

    pub fn initialized_handles(&self) -> Vec<Option<Handle>> {
        self.globals[..self.runtime_len.min(self.globals.len())]
            .iter()
            .map(|g| if g.initialized { g.value } else { None })
            .collect()
    }
}

/// A user-defined procedure: its name and the PC its body starts at.
/// `entry_pc` is `None` until the body has been lowered (a forward
/// declaration created by a call that precedes the `proc` definition).
pub struct UserFunction {
    pub name: String,
    pub entry_pc: Option<u32>,
}

/// A foreign function bound by the embedder before `compile` is called.
pub type ForeignFn = fn(&mut crate::Interpreter) -> crate::error::RuntimeResult<()>;

pub struct ForeignFunction {
    pub name: String,
    pub callable: ForeignFn,
}

/// The encoded result of resolving a call's callee name: foreign functions
/// are distinguished from user functions by carrying a negative id,
/// exactly as tiny.c's `RegisterFunction` does (`-(index+1)` for a
/// foreign hit). Kept here as a tiny enum instead of a raw `i32` so the
/// sign convention only needs to be decoded in exactly one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalleeId {
    User(u32),
    Foreign(u32),
}

pub struct FunctionTable {
    user: Vec<UserFunction>,
    foreign: Vec<ForeignFunction>,
}

impl FunctionTable {
    pub const MAX_FUNCTIONS: usize = 128;

    pub fn new() -> Self {
        FunctionTable { user: Vec::new(), foreign: Vec::new() }
    }

    pub fn bind_foreign(&mut self, name: &str, callable: ForeignFn) -> CompileResult<()> {
        if self.foreign.len() >= Self::MAX_FUNCTIONS {
            return Err(CompileError::TooManyFunctions { max: Self::MAX_FUNCTIONS });
        }
        self.foreign.push(ForeignFunction { name: name.to_string(), callable });
        Ok(())
    }

    /// Resolve a callee name at parse time: foreign table first, user
    /// table second (creating a forward declaration if absent), matching
    /// tiny.c's `RegisterFunction`.
    pub fn resolve_callee(&mut self, name: &str) -> CompileResult<CalleeId> {
        if let Some(idx) = self.foreign.iter().position(|f| f.name == name) {
            return Ok(CalleeId::Foreign(idx as u32));
        }
        if let Some(idx) = self.user.iter().position(|f| f.name == name) {
            return Ok(CalleeId::User(idx as u32));
        }
        if self.user.len() >= Self::MAX_FUNCTIONS {
            return Err(CompileError::TooManyFunctions { max: Self::MAX_FUNCTIONS });
        }
        self.user.push(UserFunction { name: name.to_string(), entry_pc: None });
        Ok(CalleeId::User(self.user.len() as u32 - 1))
    }

    pub fn set_entry_pc(&mut self, id: u32, pc: u32) {
        self.user[id as usize].entry_pc = Some(pc);
    }

    /// Look up an already-defined user procedure by name, for
    /// embedding-initiated calls (`call_proc`). Unlike `resolve_callee`
    /// this never creates a forward declaration: an embedder calling a
    /// name that was never `proc`-defined should see a clear error rather
    /// than a pending-call entry that can never be patched.
    pub fn find_user(&self, name: &str) -> Option<u32> {
        self.user.iter().position(|f| f.name == name).map(|i| i as u32)
    }

    pub fn entry_pc(&self, id: u32) -> u32 {
        self.user[id as usize]
            .entry_pc
            .unwrap_or_else(|| panic!("function {} called before its body was lowered", self.user[id as usize].name))
    }

    pub fn foreign(&self, id: u32) -> &ForeignFunction {
        &self.foreign[id as usize]
    }

    pub fn foreign_len(&self) -> usize {
        self.foreign.len()
    }
}

/// A single local declaration: name, frame-relative slot, and the scope
/// depth it was declared at. Parameters get negative slots (`-N..-1`),
/// body locals get non-negative ones (`0..`), matching tiny.c's
/// `DeclareArgument`/`DeclareLocal`.
struct LocalDecl {
    name: String,
    slot: i32,
    scope: u32,
}

/// The scope-tagged local declaration list, cleared at the end of every
/// procedure. Per spec.md §9's design note this could be a stack of scope
/// frames with `ClearLocals` as an exit hook; we keep the flat list (it's
/// already cleared in one place, `Parser::finish_procedure`) since a
/// frame stack would duplicate the same one responsibility.
#[derive(Default)]
pub struct LocalScope {
    decls: Vec<LocalDecl>,
    num_locals: i32,
    depth: u32,
}

impl LocalScope {
    pub fn new() -> Self {
        LocalScope::default()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn enter(&mut self) {
        self.depth += 1;
    }

    pub fn exit(&mut self) {
        self.depth -= 1;
    }

    pub fn num_locals(&self) -> i32 {
        self.num_locals
    }

    pub fn declare_local(&mut self, name: &str) -> i32 {
        let slot = self.num_locals;
        self.decls.push(LocalDecl { name: name.to_string(), slot, scope: self.depth });
        self.num_locals += 1;
        slot
    }

    /// Declare a parameter. `position` is this parameter's zero-based
    /// index among `nargs` total parameters, giving slot
    /// `position - nargs`, i.e. arg 0 of an N-arg call sits at
    /// `frame_pointer - N`.
    pub fn declare_argument(&mut self, name: &str, position: i32, nargs: i32) {
        let slot = position - nargs;
        self.decls.push(LocalDecl { name: name.to_string(), slot, scope: self.depth });
    }

    /// Resolve a `$name` reference to the most recently declared entry
    /// whose scope is still open, matching tiny.c's `ReferenceLocal`
    /// (last declaration wins, shadowing is allowed).
    pub fn reference(&self, name: &str) -> CompileResult<i32> {
        for decl in self.decls.iter().rev() {
            if decl.name == name && decl.scope <= self.depth {
                return Ok(decl.slot);
            }
        }
        Err(CompileError::UnresolvedLocal { name: name.to_string() })
    }

    pub fn clear(&mut self) {
        self.decls.clear();
        self.num_locals = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_registration_is_idempotent_by_name() {
        let mut globals = GlobalTable::new();
        let a = globals.register("x").unwrap();
        let b = globals.register("x").unwrap();
        assert_eq!(a, b);
        assert_eq!(globals.len(), 1);
    }

    #[test]
    fn function_resolution_prefers_foreign_table() {
        let mut functions = FunctionTable::new();
        functions.bind_foreign("print", |_| Ok(())).unwrap();
        assert_eq!(functions.resolve_callee("print").unwrap(), CalleeId::Foreign(0));
        assert_eq!(functions.resolve_callee("fact").unwrap(), CalleeId::User(0));
    }

    #[test]
    fn argument_slots_are_negative_and_ordered() {
        let mut scope = LocalScope::new();
        scope.enter();
        scope.declare_argument("n", 0, 2);
        scope.declare_argument("m", 1, 2);
        assert_eq!(scope.reference("n").unwrap(), -2);
        assert_eq!(scope.reference("m").unwrap(), -1);
    }

    #[test]
    fn most_recent_declaration_wins_on_shadowing() {
        let mut scope = LocalScope::new();
        scope.enter();
        scope.declare_local("x");
        scope.declare_local("x");
        assert_eq!(scope.reference("x").unwrap(), 1);
    }

    #[test]
    fn unresolved_local_is_an_error() {
        let scope = LocalScope::new();
        assert!(scope.reference("missing").is_err());
    }
}
