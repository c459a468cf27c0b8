// the bytecode stack machine's execution state: the code buffer, program
// counter, value stack of heap handles, and indirect stack of call
// frames. the fetch/decode/dispatch loop itself lives on `Interpreter`
// in lib.rs, since `OP_CALLF` needs a `&mut Interpreter` to invoke a
// foreign function and `Vm` alone can't construct one. matches tiny.c's
// `ExecuteCycle`, generalized to the handle-based heap from value.rs.

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{Handle, Value};

/// One entry of the indirect (call-frame) stack: the argument count, the
/// caller's frame pointer, and the pc to resume at on return.
pub(crate) struct Frame {
    pub nargs: i32,
    pub saved_fp: usize,
    pub return_pc: usize,
}

/// Something `READ` can pull a line of input from. Injectable so
/// embedding code can redirect stdin, matching spec.md §6.
pub trait LineSource {
    fn read_line(&mut self) -> std::io::Result<Option<String>>;
}

impl<R: std::io::BufRead> LineSource for R {
    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut buf = String::new();
        let n = std::io::BufRead::read_line(self, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(buf))
    }
}

pub struct Vm {
    pub(crate) code: Vec<u8>,
    pub(crate) pc: usize,
    pub(crate) stack: Vec<Handle>,
    pub(crate) indirect: Vec<Frame>,
    pub(crate) fp: usize,
}

impl Vm {
    pub const MAX_STACK_DEPTH: usize = 1024;
    pub const MAX_INDIRECT_DEPTH: usize = 1024;

    pub fn new(code: Vec<u8>) -> Self {
        Vm { code, pc: 0, stack: Vec::new(), indirect: Vec::new(), fp: 0 }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pc >= self.code.len()
    }

    pub(crate) fn fetch_byte(&mut self) -> RuntimeResult<u8> {
        let byte = *self
            .code
            .get(self.pc)
            .ok_or(RuntimeError::BadInstruction { opcode: 0, pc: self.pc })?;
        self.pc += 1;
        Ok(byte)
    }

    pub(crate) fn fetch_i32(&mut self) -> RuntimeResult<i32> {
        if self.pc + 4 > self.code.len() {
            return Err(RuntimeError::BadInstruction { opcode: 0, pc: self.pc });
        }
        let bytes: [u8; 4] = self.code[self.pc..self.pc + 4].try_into().unwrap();
        self.pc += 4;
        Ok(i32::from_le_bytes(bytes))
    }

    pub(crate) fn push(&mut self, handle: Handle) -> RuntimeResult<()> {
        if self.stack.len() >= Self::MAX_STACK_DEPTH {
            return Err(RuntimeError::StackOverflow { pc: self.pc, size: self.stack.len() });
        }
        self.stack.push(handle);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> RuntimeResult<Handle> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { pc: self.pc })
    }

    pub(crate) fn local_index(&self, slot: i32) -> RuntimeResult<usize> {
        let absolute = self.fp as i64 + slot as i64;
        if absolute < 0 || absolute as usize >= self.stack.len() {
            return Err(RuntimeError::StackUnderflow { pc: self.pc });
        }
        Ok(absolute as usize)
    }

    pub(crate) fn call(&mut self, target: usize, nargs: i32) -> RuntimeResult<()> {
        if self.indirect.len() >= Self::MAX_INDIRECT_DEPTH {
            return Err(RuntimeError::IndirectStackOverflow { pc: self.pc });
        }
        self.indirect.push(Frame { nargs, saved_fp: self.fp, return_pc: self.pc });
        self.fp = self.stack.len();
        self.pc = target;
        Ok(())
    }

    /// Pop the current call frame, truncating the stack back to just
    /// below the callee's arguments, then optionally push a return value.
    pub(crate) fn do_return(&mut self, value: Option<Handle>) -> RuntimeResult<()> {
        let frame = self
            .indirect
            .pop()
            .ok_or(RuntimeError::IndirectStackOverflow { pc: self.pc })?;
        let base = (self.fp as i64 - frame.nargs as i64).max(0) as usize;
        self.stack.truncate(base);
        if let Some(value) = value {
            self.push(value)?;
        }
        self.fp = frame.saved_fp;
        self.pc = frame.return_pc;
        Ok(())
    }

    pub(crate) fn at_top_level(&self) -> bool {
        self.indirect.is_empty()
    }
}

pub(crate) fn write_value(output: &mut dyn std::io::Write, value: &Value) -> std::io::Result<()> {
    match value {
        Value::Number(n) => writeln!(output, "{}", format_g(*n)),
        Value::String(bytes) => {
            output.write_all(bytes)?;
            writeln!(output)
        }
        Value::Array(_) => writeln!(output, "<array>"),
        Value::Native(_) => writeln!(output, "<native>"),
    }
}

/// Format a number the way `tiny.c`'s `printf("%g\n", ...)` does: six
/// significant digits, switching to exponential notation once the decimal
/// exponent falls outside `[-4, precision)`, with trailing zeros (and a
/// trailing decimal point) stripped either way.
fn format_g(n: f64) -> String {
    const PRECISION: i32 = 6;

    if n == 0.0 {
        return if n.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf".to_string() } else { "inf".to_string() };
    }

    let exponent = n.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= PRECISION {
        format_scientific(n, exponent, PRECISION)
    } else {
        let decimals = (PRECISION - 1 - exponent).max(0) as usize;
        strip_trailing(&format!("{n:.decimals$}"))
    }
}

fn format_scientific(n: f64, mut exponent: i32, precision: i32) -> String {
    let mut mantissa = n / 10f64.powi(exponent);
    // rounding the mantissa to `precision` significant digits can carry it
    // up to 10.0 (e.g. 9.9999995 rounding to 10.000000); bump the exponent
    // and rescale when that happens.
    let rounded = format!("{:.*}", (precision - 1) as usize, mantissa);
    if rounded.trim_start_matches('-').starts_with("10") {
        exponent += 1;
        mantissa /= 10.0;
    }
    let mantissa_str = strip_trailing(&format!("{:.*}", (precision - 1) as usize, mantissa));
    let sign = if exponent >= 0 { "+" } else { "-" };
    format!("{mantissa_str}e{sign}{:02}", exponent.abs())
}

fn strip_trailing(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    trimmed.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod format_tests {
    use super::format_g;

    #[test]
    fn integers_print_without_a_decimal_point() {
        assert_eq!(format_g(7.0), "7");
        assert_eq!(format_g(120.0), "120");
        assert_eq!(format_g(-1.0), "-1");
    }

    #[test]
    fn fractions_round_to_six_significant_digits() {
        assert_eq!(format_g(1.0 / 3.0), "0.333333");
    }

    #[test]
    fn large_magnitudes_switch_to_exponential_notation() {
        assert_eq!(format_g(1_000_000.0 * 1_000_000.0), "1e+12");
        assert_eq!(format_g(1_000_000.0), "1e+06");
    }

    #[test]
    fn small_magnitudes_switch_to_exponential_notation() {
        assert_eq!(format_g(0.0001), "0.0001");
        assert_eq!(format_g(0.00001), "1e-05");
    }

    #[test]
    fn zero_is_printed_plainly() {
        assert_eq!(format_g(0.0), "0");
    }
}
