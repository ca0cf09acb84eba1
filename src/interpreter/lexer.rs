//! This lexer tokenizes iasm source text, one instruction per line.

use super::ast::Instruction;

/// Tokenizes a whole source text. Blank and comment-only lines produce
/// nothing.
pub fn tokenize(source: &str) -> Vec<Instruction> {
    source.lines().filter_map(tokenize_line).collect()
}

/// Tokenizes a single source line.
///
/// Everything from the first `;` onward is a comment. A line ending in
/// `:` is a label marker; `end` and `ret` take no operands. Anything
/// else splits into a mnemonic and its operand text.
fn tokenize_line(line: &str) -> Option<Instruction> {
    // One comment per line allowed.
    let line = match line.find(';') {
        Some(start) => &line[..start],
        None => line,
    };
    let line = line.trim();

    if line.is_empty() {
        return None;
    }

    if line.ends_with(':') {
        return Some(Instruction::Label(line.trim_end_matches(':').to_owned()));
    }

    if line == "end" || line == "ret" {
        return Some(Instruction::Op {
            mnemonic: line.to_owned(),
            operands: Vec::new(),
        });
    }

    let (mnemonic, rest) = match line.find(char::is_whitespace) {
        Some(split) => (&line[..split], line[split..].trim_start()),
        None => (line, ""),
    };

    if rest.is_empty() {
        return Some(Instruction::Op {
            mnemonic: mnemonic.to_owned(),
            operands: Vec::new(),
        });
    }

    let operands = if mnemonic == "msg" {
        split_message_operands(rest)
    } else {
        split_pair(rest)
    };

    Some(Instruction::Op {
        mnemonic: mnemonic.to_owned(),
        operands,
    })
}

/// Splits operand text on the first comma only, producing at most two
/// trimmed operands.
fn split_pair(rest: &str) -> Vec<String> {
    match rest.find(',') {
        Some(comma) => vec![
            rest[..comma].trim().to_owned(),
            rest[comma + 1..].trim().to_owned(),
        ],
        None => vec![rest.trim().to_owned()],
    }
}

/// Splits `msg` operand text on commas, except inside single-quoted
/// spans, which become one operand each with their quote markers kept.
///
/// A quote preceded by a backslash does not toggle the quoted state.
/// An unterminated quote leaves its opening marker on the trailing
/// operand.
fn split_message_operands(rest: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut prev: Option<char> = None;

    for c in rest.chars() {
        if c == '\'' && prev != Some('\\') {
            in_quote = !in_quote;
            if in_quote {
                push_bare(&mut parts, &mut current);
                current.push('\'');
            } else {
                current.push('\'');
                parts.push(current.clone());
                current.clear();
            }
        } else if c == ',' && !in_quote {
            push_bare(&mut parts, &mut current);
        } else {
            current.push(c);
        }
        prev = Some(c);
    }
    push_bare(&mut parts, &mut current);

    parts
}

/// Pushes the pending unquoted text as a trimmed operand. Whitespace
/// runs between separators produce nothing.
fn push_bare(parts: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_owned());
    }
    current.clear();
}
