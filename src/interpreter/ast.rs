//! Instruction representation for tokenized iasm source.
//!
//! Execution begins with the first instruction in the file.
//! Comments are prefixed with semicolons (;) and are single-line only.
//! Instructions are delimited by newlines.
//!
//! Supported instructions:
//!
//! ```nasm
//! mov  d, v      ; d <= v (register or integer literal)
//! inc  d         ; d <= d + 1
//! dec  d         ; d <= d - 1
//! add  d, v      ; d <= d + v
//! sub  d, v      ; d <= d - v
//! mul  d, v      ; d <= d * v
//! div  d, v      ; d <= d / v, rounding toward negative infinity
//! cmp  a, b      ; remember (a, b) for the next conditional
//! jmp  lbl       ; jump to lbl
//! je   lbl       ; jump to lbl if a == b (jne, jge, jg, jle, jl likewise)
//! call lbl       ; jump to lbl, remembering the call site
//! ce   lbl       ; call lbl if a == b (cne, cge, cg, cle, cl likewise)
//! ret            ; resume after the most recent call site
//! stw  v, addr   ; memory[addr] <= v
//! mvw  d, addr   ; d <= memory[addr], 0 if never written
//! msg  ...       ; append text and register values to the output
//! end            ; halt; the output so far is the result
//! ```
//!
//! Labels are lines ending in a colon and give the next instruction
//! index a symbolic name. Instructions and register names are
//! case-sensitive.

use std::fmt;

/// A single tokenized source line.
///
/// Operands are stored as the raw trimmed text they appeared as; the
/// execution engine decides whether an operand names a register, an
/// integer literal, or quoted text at the point of use. Raw source is
/// never re-inspected after tokenization.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Instruction {
    /// Marker giving a symbolic name to its own instruction index.
    Label(String),
    /// An operation with zero or more operands.
    Op {
        mnemonic: String,
        operands: Vec<String>,
    },
}

impl Instruction {
    /// Returns true if this is the terminating `end` instruction.
    pub fn is_end(&self) -> bool {
        match self {
            Instruction::Op { mnemonic, .. } => mnemonic == "end",
            Instruction::Label(_) => false,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Label(name) => write!(f, "{}:", name),
            Instruction::Op { mnemonic, operands } => {
                if operands.is_empty() {
                    write!(f, "{}", mnemonic)
                } else {
                    write!(f, "{} {}", mnemonic, operands.join(", "))
                }
            }
        }
    }
}
