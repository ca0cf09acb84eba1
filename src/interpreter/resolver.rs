//! Stateless operand resolution helpers.
//!
//! These interpret one operand string against the current register
//! table and nothing else; they never mutate state.

use std::collections::HashMap;

use super::errors::ErrorKind;

/// Interprets `token` as either a register name or a base-10 integer
/// literal, in that order. Register names take precedence, so a
/// register named `5` shadows the literal.
pub fn resolve_value(token: &str, registers: &HashMap<String, i64>) -> Result<i64, ErrorKind> {
    if let Some(value) = registers.get(token) {
        return Ok(*value);
    }
    token
        .parse::<i64>()
        .map_err(|_| ErrorKind::InvalidValue(token.to_owned()))
}

/// Interprets `token` as a memory address.
///
/// The token may carry a trailing `+N` or `-N` offset. An all-digit
/// base is the address itself, even when a register shares that name;
/// anything else is read as a register and the offset added to its
/// value.
pub fn resolve_address(token: &str, registers: &HashMap<String, i64>) -> Result<i64, ErrorKind> {
    let (base, offset) = split_offset(token);

    if !base.is_empty() && base.bytes().all(|b| b.is_ascii_digit()) {
        return base
            .parse::<i64>()
            .map_err(|_| ErrorKind::InvalidValue(token.to_owned()));
    }

    match registers.get(base) {
        Some(value) => Ok(value.wrapping_add(offset)),
        None => Err(ErrorKind::UninitializedRegister(base.to_owned())),
    }
}

/// Splits an address token at the first `+` or `-` whose remainder
/// parses as an integer. No such split means the whole token is the
/// base with offset 0.
fn split_offset(token: &str) -> (&str, i64) {
    if let Some(at) = token.find(|c| c == '+' || c == '-') {
        if let Ok(offset) = token[at + 1..].parse::<i64>() {
            let offset = if token.as_bytes()[at] == b'-' {
                -offset
            } else {
                offset
            };
            return (&token[..at], offset);
        }
    }
    (token, 0)
}
