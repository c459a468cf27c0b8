// error handling and fallible return values

use thiserror::Error;

/// Errors raised while turning source bytes into tokens.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum LexError {
    #[error("string literal starting at byte {start} is never closed")]
    UnterminatedString { start: usize },
    #[error("token exceeded the {max}-byte identifier/token length limit")]
    TokenTooLong { max: usize },
    #[error("number literal '{text}' has more than one decimal point")]
    MalformedNumber { text: String },
}

/// Errors raised while turning tokens into an AST.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum ParseError {
    #[error("unexpected token {found:?}, expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },
    #[error("expected 'then' after if condition, found {found:?}")]
    MissingThen { found: String },
    #[error("unclosed '{opener}'")]
    UnclosedDelimiter { opener: char },
    #[error("procedure definitions are only allowed at the top level")]
    ProcInLocalScope,
    #[error("'local' and '$name' references are not allowed at the top level")]
    LocalAtGlobalScope,
}

/// Errors raised while lowering an AST to bytecode.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum CompileError {
    #[error("use of uninitialized variable '{name}'")]
    UninitializedGlobal { name: String },
    #[error("reference to undeclared local '${name}'")]
    UnresolvedLocal { name: String },
    #[error("invalid left-hand side of assignment")]
    InvalidAssignmentTarget,
    #[error("'.' member access is only supported as the right-hand side of a global assignment")]
    MemberAccessUnsupported,
    #[error("program exceeds the {max}-byte program size limit")]
    ProgramTooLarge { max: usize },
    #[error("constant pool exceeds its {max}-entry capacity")]
    ConstantPoolFull { max: usize },
    #[error("global variable table exceeds its {max}-entry capacity")]
    TooManyGlobals { max: usize },
    #[error("function table exceeds its {max}-entry capacity")]
    TooManyFunctions { max: usize },
    #[error("call has more than the {max} supported arguments")]
    TooManyArguments { max: usize },
    #[error("named-member array exceeds its {max}-member limit")]
    TooManyMembers { max: usize },
}

/// Errors raised while executing compiled bytecode.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum RuntimeError {
    #[error("stack overflow at pc {pc} (stack size {size})")]
    StackOverflow { pc: usize, size: usize },
    #[error("stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },
    #[error("indirect call stack overflow at pc {pc}")]
    IndirectStackOverflow { pc: usize },
    #[error("array index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },
    #[error("allocation failed: heap exhausted")]
    AllocationFailure,
    #[error("bad instruction opcode {opcode} at pc {pc}")]
    BadInstruction { opcode: u8, pc: usize },
    #[error("call to unbound foreign function index {index}")]
    UnboundForeignFunction { index: usize },
    #[error("call_proc: no procedure named '{name}' is defined")]
    UnknownProcedure { name: String },
    #[error("operand stack expected a value but none was present")]
    MissingReturnValue,
}

/// The union of every fatal error kind the interpreter can raise.
///
/// `tiny.c` terminates the process on any of these; this crate instead
/// returns `Result` so an embedder can recover. Per spec.md §7, VM state
/// must not be reused after a `Runtime` error.
#[derive(Debug, Error, PartialEq, Clone)]
pub enum TinyError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type LexResult<T> = Result<T, LexError>;
pub type ParseResult<T> = Result<T, ParseError>;
pub type CompileResult<T> = Result<T, CompileError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
pub type TinyResult<T> = Result<T, TinyError>;
