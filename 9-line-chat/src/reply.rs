//! Reply rules for payload lines.
//!
//! Every non-command line a client sends gets exactly one reply computed
//! here. The evaluator is a pure function: it never sees the session or the
//! stores, so the same line always produces the same reply.

/// Computes the reply for a trimmed payload line.
///
/// Dispatch happens on the first whitespace-delimited token (`echo`, `add`,
/// `mul`). The `bytes ` and `words ` rules match a literal prefix of the
/// untokenized line instead. Anything else is echoed back with
/// ` from server` appended.
pub fn evaluate(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some((&first, rest)) = tokens.split_first() else {
        return format!("{line} from server");
    };

    match first {
        "echo" => rest.join(" "),
        "add" => binary_op("add", rest, i64::wrapping_add),
        "mul" => binary_op("mul", rest, i64::wrapping_mul),
        _ => evaluate_prefixed(line),
    }
}

fn evaluate_prefixed(line: &str) -> String {
    if let Some(text) = line.strip_prefix("bytes ") {
        return text.len().to_string();
    }
    if let Some(text) = line.strip_prefix("words ") {
        return text.split_whitespace().count().to_string();
    }
    format!("{line} from server")
}

/// Applies `op` to exactly two integer operands.
///
/// Arithmetic wraps on overflow.
fn binary_op(name: &str, args: &[&str], op: fn(i64, i64) -> i64) -> String {
    let [a, b] = args else {
        return format!("ERR: {name} expects two arguments");
    };

    match (parse_integer(a), parse_integer(b)) {
        (Some(a), Some(b)) => op(a, b).to_string(),
        _ => format!("ERR: {name} expects two integers"),
    }
}

/// Parses a base-10 `i64`; partial parses like `3x` are rejected.
fn parse_integer(token: &str) -> Option<i64> {
    token.parse::<i64>().ok()
}
