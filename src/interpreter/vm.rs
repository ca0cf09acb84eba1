//! The execution engine.
//!
//! One [`Vm`] owns every piece of run state: the register table, the
//! sparse memory, the compare pair, the call stack, the output buffer,
//! and the program counter. Nothing is shared between runs; a fresh
//! `Vm` starts from a clean slate every time. All state is readable
//! through accessors so an external visualizer can render it between
//! steps without the engine knowing it exists.

use std::collections::HashMap;

use super::ast::Instruction;
use super::errors::{ErrorKind, RunError};
use super::program::Program;
use super::resolver::{resolve_address, resolve_value};

/// What a single executed instruction asks the driving loop to do next.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Step {
    /// Move to the next instruction.
    Advance,
    /// Set the program counter to the given instruction index.
    JumpTo(usize),
    /// Stop; the output buffer is the result.
    Halt,
}

/// Whether the machine wants another step.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    Running,
    Halted,
}

/// The virtual machine. Fetches, decodes, and executes one instruction
/// per [`Vm::step`] call.
pub struct Vm {
    program: Program,
    registers: HashMap<String, i64>,
    memory: HashMap<i64, i64>,
    compare: (i64, i64),
    call_stack: Vec<usize>,
    output: String,
    pc: usize,
    status: Status,
}

impl Vm {
    pub fn new(program: Program) -> Self {
        Vm {
            program,
            registers: HashMap::new(),
            memory: HashMap::new(),
            compare: (0, 0),
            call_stack: Vec::new(),
            output: String::new(),
            pc: 0,
            status: Status::Running,
        }
    }

    /// Runs the program to completion or to the first error.
    pub fn run(&mut self) -> Result<(), RunError> {
        while let Status::Running = self.step()? {}
        Ok(())
    }

    /// Executes a single fetch-decode-execute step.
    ///
    /// A `Label` at the program counter is a no-op that advances past
    /// itself. Stepping a halted machine stays halted.
    pub fn step(&mut self) -> Result<Status, RunError> {
        if let Status::Halted = self.status {
            return Ok(Status::Halted);
        }

        let instruction = match self.program.fetch(self.pc) {
            Some(instruction) => instruction.clone(),
            None => return Err(RunError::structural(ErrorKind::ProgramOverrun)),
        };
        trace!("{:04}: {}", self.pc, instruction);

        let step = match &instruction {
            Instruction::Label(_) => Ok(Step::Advance),
            Instruction::Op { mnemonic, operands } => self.exec(mnemonic, operands),
        };

        match step {
            Ok(Step::Advance) => {
                self.pc += 1;
                Ok(Status::Running)
            }
            Ok(Step::JumpTo(index)) => {
                self.pc = index;
                Ok(Status::Running)
            }
            Ok(Step::Halt) => {
                self.status = Status::Halted;
                Ok(Status::Halted)
            }
            Err(kind) => Err(RunError::at(kind, self.pc)),
        }
    }

    fn exec(&mut self, mnemonic: &str, operands: &[String]) -> Result<Step, ErrorKind> {
        match mnemonic {
            "mov" => self.op_mov(operands),
            "inc" => self.op_step_register(mnemonic, operands, 1),
            "dec" => self.op_step_register(mnemonic, operands, -1),
            "add" | "sub" | "mul" | "div" => self.op_arith(mnemonic, operands),
            "cmp" => self.op_cmp(operands),
            "jmp" => self.op_jmp(operands),
            "call" => self.op_call(operands),
            "ret" => self.op_ret(),
            "je" | "jne" | "jge" | "jg" | "jle" | "jl" => self.op_branch(mnemonic, operands, false),
            "ce" | "cne" | "cge" | "cg" | "cle" | "cl" => self.op_branch(mnemonic, operands, true),
            "stw" => self.op_stw(operands),
            "mvw" => self.op_mvw(operands),
            "msg" => self.op_msg(operands),
            "end" => Ok(Step::Halt),
            _ => Err(ErrorKind::UnknownCommand(mnemonic.to_owned())),
        }
    }

    fn op_mov(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        let dst = operand(operands, 0, "mov")?;
        let value = resolve_value(operand(operands, 1, "mov")?, &self.registers)?;
        self.registers.insert(dst.to_owned(), value);
        Ok(Step::Advance)
    }

    fn op_step_register(
        &mut self,
        mnemonic: &str,
        operands: &[String],
        delta: i64,
    ) -> Result<Step, ErrorKind> {
        let name = operand(operands, 0, mnemonic)?;
        let slot = register_mut(&mut self.registers, name)?;
        *slot = slot.wrapping_add(delta);
        Ok(Step::Advance)
    }

    fn op_arith(&mut self, mnemonic: &str, operands: &[String]) -> Result<Step, ErrorKind> {
        let dst = operand(operands, 0, mnemonic)?;
        let value = resolve_value(operand(operands, 1, mnemonic)?, &self.registers)?;
        if mnemonic == "div" && value == 0 {
            return Err(ErrorKind::DivisionByZero);
        }
        let slot = register_mut(&mut self.registers, dst)?;
        *slot = match mnemonic {
            "add" => slot.wrapping_add(value),
            "sub" => slot.wrapping_sub(value),
            "mul" => slot.wrapping_mul(value),
            "div" => floor_div(*slot, value),
            other => return Err(ErrorKind::UnknownCommand(other.to_owned())),
        };
        Ok(Step::Advance)
    }

    fn op_cmp(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        let a = resolve_value(operand(operands, 0, "cmp")?, &self.registers)?;
        let b = resolve_value(operand(operands, 1, "cmp")?, &self.registers)?;
        self.compare = (a, b);
        Ok(Step::Advance)
    }

    fn op_jmp(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        Ok(Step::JumpTo(self.branch_target("jmp", operands)?))
    }

    fn op_call(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        let target = self.branch_target("call", operands)?;
        self.call_stack.push(self.pc);
        Ok(Step::JumpTo(target))
    }

    fn op_ret(&mut self) -> Result<Step, ErrorKind> {
        match self.call_stack.pop() {
            // Resume at the instruction after the call site.
            Some(site) => Ok(Step::JumpTo(site + 1)),
            None => Err(ErrorKind::ReturnWithoutCall),
        }
    }

    /// Shared handler for the six conditional jumps and, with `link`
    /// set, the six conditional calls. The target label is resolved
    /// before the condition is consulted, so an unknown label fails
    /// even on a branch that would not be taken.
    fn op_branch(
        &mut self,
        mnemonic: &str,
        operands: &[String],
        link: bool,
    ) -> Result<Step, ErrorKind> {
        let target = self.branch_target(mnemonic, operands)?;
        if !condition_matches(mnemonic, self.compare)? {
            return Ok(Step::Advance);
        }
        if link {
            self.call_stack.push(self.pc);
        }
        Ok(Step::JumpTo(target))
    }

    fn op_stw(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        let address = resolve_address(operand(operands, 1, "stw")?, &self.registers)?;
        let value = resolve_value(operand(operands, 0, "stw")?, &self.registers)?;
        self.memory.insert(address, value);
        Ok(Step::Advance)
    }

    fn op_mvw(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        let dst = operand(operands, 0, "mvw")?;
        let address = resolve_address(operand(operands, 1, "mvw")?, &self.registers)?;
        // Unwritten memory reads as zero.
        let value = self.memory.get(&address).copied().unwrap_or(0);
        self.registers.insert(dst.to_owned(), value);
        Ok(Step::Advance)
    }

    fn op_msg(&mut self, operands: &[String]) -> Result<Step, ErrorKind> {
        let mut message = String::new();
        for part in operands {
            if part.len() >= 2 && part.starts_with('\'') && part.ends_with('\'') {
                message.push_str(&part[1..part.len() - 1]);
            } else if let Some(rest) = part.strip_prefix('\'') {
                // Unterminated quote: the text after the marker.
                message.push_str(rest);
            } else if part == "\\n" {
                message.push('\n');
            } else if let Some(value) = self.registers.get(part.as_str()) {
                // Any bare token naming a live register prints its
                // value, even one meant as a literal word.
                message.push_str(&value.to_string());
            } else {
                message.push_str(part);
            }
        }
        self.output.push_str(&message);
        if !message.ends_with('\n') {
            self.output.push('\n');
        }
        Ok(Step::Advance)
    }

    fn branch_target(&self, mnemonic: &str, operands: &[String]) -> Result<usize, ErrorKind> {
        let label = operand(operands, 0, mnemonic)?;
        self.program
            .label(label)
            .ok_or_else(|| ErrorKind::UnknownLabel(label.to_owned()))
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn registers(&self) -> &HashMap<String, i64> {
        &self.registers
    }

    pub fn memory(&self) -> &HashMap<i64, i64> {
        &self.memory
    }

    pub fn compare(&self) -> (i64, i64) {
        self.compare
    }

    pub fn call_stack(&self) -> &[usize] {
        &self.call_stack
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn program(&self) -> &Program {
        &self.program
    }
}

fn operand<'a>(operands: &'a [String], index: usize, mnemonic: &str) -> Result<&'a str, ErrorKind> {
    match operands.get(index) {
        Some(operand) => Ok(operand),
        None => Err(ErrorKind::MalformedOperands(mnemonic.to_owned())),
    }
}

fn register_mut<'a>(
    registers: &'a mut HashMap<String, i64>,
    name: &str,
) -> Result<&'a mut i64, ErrorKind> {
    match registers.get_mut(name) {
        Some(slot) => Ok(slot),
        None => Err(ErrorKind::UninitializedRegister(name.to_owned())),
    }
}

/// Maps a conditional mnemonic's suffix to its verdict on the compare
/// pair. Exactly one of the six conditions' complements holds for any
/// pair.
fn condition_matches(mnemonic: &str, (a, b): (i64, i64)) -> Result<bool, ErrorKind> {
    match &mnemonic[1..] {
        "e" => Ok(a == b),
        "ne" => Ok(a != b),
        "ge" => Ok(a >= b),
        "g" => Ok(a > b),
        "le" => Ok(a <= b),
        "l" => Ok(a < b),
        // exec only routes the twelve conditional mnemonics here.
        _ => Err(ErrorKind::UnknownCommand(mnemonic.to_owned())),
    }
}

/// Integer division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> i64 {
    let quotient = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {
        quotient - 1
    } else {
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::lexer;

    fn load(source: &str) -> Vm {
        Vm::new(Program::link(lexer::tokenize(source)).expect("link failed"))
    }

    fn run_vm(source: &str) -> Vm {
        let mut vm = load(source);
        vm.run().expect("run failed");
        vm
    }

    fn run_output(source: &str) -> String {
        run_vm(source).into_output()
    }

    fn run_expect_err(source: &str) -> (RunError, Vm) {
        let mut vm = load(source);
        let err = vm.run().expect_err("expected failure");
        (err, vm)
    }

    // ==================== Registers and arithmetic ====================

    #[test]
    fn test_mov_add() {
        let source = "mov a, 5\nmov b, 3\nadd a, b\nmsg 'Result: ', a\nend";
        assert_eq!(run_output(source), "Result: 8\n");
    }

    #[test]
    fn test_inc_dec() {
        let vm = run_vm("mov a, 5\ninc a\ninc a\ndec a\nend");
        assert_eq!(vm.registers()["a"], 6);
    }

    #[test]
    fn test_sub_mul() {
        let vm = run_vm("mov a, 10\nsub a, 4\nmov b, a\nmul b, 7\nend");
        assert_eq!(vm.registers()["a"], 6);
        assert_eq!(vm.registers()["b"], 42);
    }

    #[test]
    fn test_div_floors() {
        let vm = run_vm("mov a, 7\ndiv a, 2\nmov b, -7\ndiv b, 2\nend");
        assert_eq!(vm.registers()["a"], 3);
        assert_eq!(vm.registers()["b"], -4);
    }

    #[test]
    fn test_div_by_zero_leaves_register_unchanged() {
        let (err, vm) = run_expect_err("mov a, 10\nmov b, 0\ndiv a, b\nend");
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(err.index, Some(2));
        assert_eq!(vm.registers()["a"], 10);
    }

    #[test]
    fn test_uninitialized_register() {
        let (err, _) = run_expect_err("inc x\nend");
        assert_eq!(err.kind, ErrorKind::UninitializedRegister("x".to_owned()));
        assert_eq!(err.index, Some(0));

        let (err, _) = run_expect_err("add x, 1\nend");
        assert_eq!(err.kind, ErrorKind::UninitializedRegister("x".to_owned()));
    }

    #[test]
    fn test_invalid_value_operand() {
        let (err, _) = run_expect_err("mov a, 5\nadd a, bogus\nend");
        assert_eq!(err.kind, ErrorKind::InvalidValue("bogus".to_owned()));
        assert_eq!(err.index, Some(1));
    }

    #[test]
    fn test_malformed_operands() {
        let (err, _) = run_expect_err("mov a\nend");
        assert_eq!(err.kind, ErrorKind::MalformedOperands("mov".to_owned()));
    }

    #[test]
    fn test_floor_div_helper() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, -2), -4);
        assert_eq!(floor_div(-7, -2), 3);
        assert_eq!(floor_div(6, 3), 2);
        assert_eq!(floor_div(-6, 3), -2);
        assert_eq!(floor_div(i64::MIN, -1), i64::MIN);
    }

    // ==================== Memory ====================

    #[test]
    fn test_store_and_load() {
        assert_eq!(
            run_output("mov a, 10\nstw a, 100\nmvw b, 100\nmsg b\nend"),
            "10\n"
        );
    }

    #[test]
    fn test_store_at_register_offset() {
        let vm = run_vm("mov a, 50\nstw 7, a+2\nend");
        assert_eq!(vm.memory().get(&52), Some(&7));
    }

    #[test]
    fn test_unwritten_memory_reads_zero() {
        assert_eq!(run_output("mvw r, 999\nmsg r\nend"), "0\n");
    }

    // ==================== Control flow ====================

    #[test]
    fn test_unknown_label_fails_with_no_output() {
        let (err, vm) = run_expect_err("jmp missing\nend");
        assert_eq!(err.kind, ErrorKind::UnknownLabel("missing".to_owned()));
        assert_eq!(err.index, Some(0));
        assert_eq!(vm.output(), "");
    }

    #[test]
    fn test_unknown_label_checked_on_untaken_branch() {
        let (err, _) = run_expect_err("cmp 1, 2\nje missing\nend");
        assert_eq!(err.kind, ErrorKind::UnknownLabel("missing".to_owned()));
        assert_eq!(err.index, Some(1));
    }

    #[test]
    fn test_countdown_loop() {
        let source = "
        mov n, 5
        loop:
        msg n
        dec n
        cmp n, 0
        jne loop
        end
        ";
        assert_eq!(run_output(source), "5\n4\n3\n2\n1\n");
    }

    #[test]
    fn test_call_and_ret_round_trip() {
        let source = "
        call fn
        msg 'after'
        end
        fn:
        msg 'inside'
        ret
        ";
        let vm = run_vm(source);
        assert_eq!(vm.output(), "inside\nafter\n");
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn test_recursive_calls_unwind() {
        let source = "
        mov n, 3
        call rec
        msg 'done'
        end
        rec:
        cmp n, 0
        je base
        dec n
        call rec
        base:
        ret
        ";
        let vm = run_vm(source);
        assert_eq!(vm.output(), "done\n");
        assert_eq!(vm.registers()["n"], 0);
        assert!(vm.call_stack().is_empty());
    }

    #[test]
    fn test_ret_without_call() {
        let (err, _) = run_expect_err("ret\nend");
        assert_eq!(err.kind, ErrorKind::ReturnWithoutCall);
        assert_eq!(err.index, Some(0));
    }

    #[test]
    fn test_compare_defaults_to_equal_zeroes() {
        let source = "
        je yes
        msg 'no'
        end
        yes:
        msg 'yes'
        end
        ";
        assert_eq!(run_output(source), "yes\n");
    }

    fn branch_taken(mnemonic: &str, a: i64, b: i64) -> bool {
        let source = format!(
            "cmp {}, {}\n{} yes\nmsg 'no'\nend\nyes:\nmsg 'yes'\nend",
            a, b, mnemonic
        );
        run_output(&source) == "yes\n"
    }

    #[test]
    fn test_conditional_jump_matrix() {
        // (mnemonic, taken when a<b, a==b, a>b)
        let table = [
            ("je", false, true, false),
            ("jne", true, false, true),
            ("jge", false, true, true),
            ("jg", false, false, true),
            ("jle", true, true, false),
            ("jl", true, false, false),
        ];
        for &(mnemonic, lt, eq, gt) in table.iter() {
            assert_eq!(branch_taken(mnemonic, 1, 2), lt, "{} on (1, 2)", mnemonic);
            assert_eq!(branch_taken(mnemonic, 2, 2), eq, "{} on (2, 2)", mnemonic);
            assert_eq!(branch_taken(mnemonic, 3, 2), gt, "{} on (3, 2)", mnemonic);
        }
    }

    #[test]
    fn test_conditional_call_pushes_frame() {
        let source = "
        cmp 1, 1
        ce sub
        msg 'main'
        end
        sub:
        msg 'sub'
        ret
        ";
        assert_eq!(run_output(source), "sub\nmain\n");
    }

    #[test]
    fn test_conditional_call_not_taken() {
        let source = "
        cmp 1, 2
        ce sub
        msg 'main'
        end
        sub:
        msg 'sub'
        ret
        ";
        assert_eq!(run_output(source), "main\n");
    }

    #[test]
    fn test_program_overrun() {
        // `end` exists (satisfying the link check) but is jumped over.
        let source = "jmp skip\nend\nskip:\nmsg 'x'";
        let (err, vm) = run_expect_err(source);
        assert_eq!(err.kind, ErrorKind::ProgramOverrun);
        assert_eq!(vm.output(), "x\n");
    }

    #[test]
    fn test_unknown_command() {
        let (err, _) = run_expect_err("blah a, 5\nend");
        assert_eq!(err.kind, ErrorKind::UnknownCommand("blah".to_owned()));
        assert_eq!(err.index, Some(0));
    }

    #[test]
    fn test_step_after_halt_stays_halted() {
        let mut vm = load("end");
        assert_eq!(vm.step().unwrap(), Status::Halted);
        assert_eq!(vm.step().unwrap(), Status::Halted);
        assert_eq!(vm.status(), Status::Halted);
    }

    #[test]
    fn test_label_is_a_no_op() {
        let mut vm = load("start:\nend");
        assert_eq!(vm.step().unwrap(), Status::Running);
        assert_eq!(vm.pc(), 1);
    }

    // ==================== Output assembly ====================

    #[test]
    fn test_msg_register_substitution_is_textual() {
        // A bare word naming a live register prints its value; the same
        // word quoted prints literally; unknown words print as text.
        assert_eq!(run_output("mov a, 7\nmsg hello, a\nend"), "hello7\n");
        assert_eq!(run_output("mov a, 7\nmsg 'a'\nend"), "a\n");
        assert_eq!(run_output("msg hi\nend"), "hi\n");
    }

    #[test]
    fn test_msg_newline_escape() {
        // The message already ends in a newline, so none is appended.
        assert_eq!(run_output("msg 'a', \\n\nend"), "a\n");
        assert_eq!(run_output("msg \\n, 'b'\nend"), "\nb\n");
    }

    #[test]
    fn test_msg_appends_missing_newline() {
        assert_eq!(run_output("msg 'x'\nmsg 'y'\nend"), "x\ny\n");
    }

    #[test]
    fn test_msg_empty_line() {
        assert_eq!(run_output("msg\nend"), "\n");
    }

    #[test]
    fn test_msg_quoted_comma() {
        assert_eq!(
            run_output("mov n, 2\nmsg 'n, m = ', n\nend"),
            "n, m = 2\n"
        );
    }
}
