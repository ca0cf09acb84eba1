//! A linked program: the tokenized instruction sequence plus its label
//! map, ready for execution.

use std::collections::HashMap;

use super::ast::Instruction;
use super::errors::{ErrorKind, RunError};

/// An immutable instruction sequence indexed by instruction index, the
/// program counter's unit.
///
/// Linking performs the language's single structural check: at least
/// one `end` instruction must exist somewhere in the program, reachable
/// or not. Labels resolve to their own instruction index; a label
/// defined twice keeps its last definition.
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
}

impl Program {
    /// Builds the label map over `instructions` and verifies the
    /// terminator exists. Runs before any execution.
    pub fn link(instructions: Vec<Instruction>) -> Result<Self, RunError> {
        if !instructions.iter().any(Instruction::is_end) {
            return Err(RunError::structural(ErrorKind::MissingEnd));
        }

        let mut labels = HashMap::new();
        for (index, instruction) in instructions.iter().enumerate() {
            if let Instruction::Label(name) = instruction {
                labels.insert(name.clone(), index);
            }
        }

        debug!(
            "linked {} instruction(s), {} label(s)",
            instructions.len(),
            labels.len()
        );

        Ok(Program {
            instructions,
            labels,
        })
    }

    /// Returns the instruction at `index`, if any.
    pub fn fetch(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Resolves a label name to its instruction index.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::lexer;

    #[test]
    fn test_link_requires_end() {
        let err = Program::link(lexer::tokenize("mov a, 5")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEnd);
        assert_eq!(err.index, None);
    }

    #[test]
    fn test_link_empty_program() {
        let err = Program::link(Vec::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEnd);
    }

    #[test]
    fn test_label_named_end_is_not_a_terminator() {
        let err = Program::link(lexer::tokenize("end:")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingEnd);
    }

    #[test]
    fn test_unreachable_end_satisfies_the_check() {
        // The terminator scan is flat; reachability is irrelevant.
        let program = Program::link(lexer::tokenize("jmp nowhere\nend")).unwrap();
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn test_label_indices() {
        let program = Program::link(lexer::tokenize(
            "mov a, 1\nloop:\ndec a\ninner:\njne loop\nend",
        ))
        .unwrap();
        assert_eq!(program.label("loop"), Some(1));
        assert_eq!(program.label("inner"), Some(3));
        assert_eq!(program.label("missing"), None);
    }

    #[test]
    fn test_duplicate_label_last_wins() {
        let program = Program::link(lexer::tokenize("x:\nmov a, 1\nx:\nend")).unwrap();
        assert_eq!(program.label("x"), Some(2));
    }
}
