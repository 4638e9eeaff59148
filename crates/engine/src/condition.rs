//! Condition normalization and evaluation.
//!
//! The same syntax drives conditional `onSuccess` branches and subloop
//! continuation. Supported forms:
//!
//! - `a || b`, `a && b`, `!a`, and parenthesized groups
//!
//! `!` binds tighter than comparisons, as in JavaScript: `!a == b` is
//! `(!a) == b`, while `!list.includes(x)` negates the whole call.
//! - `left == right`, `!=`, `>`, `>=`, `<`, `<=`
//! - `list.includes(item)` (arrays, or substring match on strings)
//! - bare operands, tested for JSON truthiness
//!
//! Operands are JSON literals, single-quoted strings, or reference paths. A
//! reference that does not resolve evaluates to `null`, so `x == null` guards
//! are expressible. Evaluation is total: malformed input evaluates to `false`
//! rather than failing the run.

use std::cmp::Ordering;

use serde_json::Value;

use crate::resolve::{format_json_value, lookup_path};

const COMPARISON_OPERATORS: &[&str] = &["!=", "==", ">=", "<=", ">", "<"];

/// Evaluate `expression` against a JSON root document.
///
/// An empty expression is true.
pub fn evaluate_condition(expression: &str, root: &Value) -> bool {
    let normalized = normalize_condition_expression(expression);
    if normalized.is_empty() {
        return true;
    }
    evaluate_node(&normalized, root)
}

/// Trims whitespace, strips an outer `${{ ... }}` wrapper, and folds strict
/// equality operators into their loose forms. Quoted text is left alone.
pub fn normalize_condition_expression(raw_expression: &str) -> String {
    let unwrapped = unwrap_template(raw_expression.trim());
    let mut normalized = String::with_capacity(unwrapped.len());
    let mut quote: Option<char> = None;
    let mut rest = unwrapped;

    while let Some(character) = rest.chars().next() {
        if quote.is_none() && (rest.starts_with("===") || rest.starts_with("!==")) {
            normalized.push_str(&rest[..2]);
            rest = &rest[3..];
            continue;
        }
        match (quote, character) {
            (None, '\'' | '"') => quote = Some(character),
            (Some(open), _) if open == character => quote = None,
            _ => {}
        }
        normalized.push(character);
        rest = &rest[character.len_utf8()..];
    }
    normalized
}

/// Strips a single `${{ ... }}` or `{{ ... }}` wrapper spanning the whole input.
pub(crate) fn unwrap_template(expression: &str) -> &str {
    let trimmed = expression.trim();
    let inner = trimmed
        .strip_prefix("${{")
        .or_else(|| trimmed.strip_prefix("{{"))
        .and_then(|rest| rest.strip_suffix("}}"));
    match inner {
        Some(inner) if !inner.contains("}}") => inner.trim(),
        _ => trimmed,
    }
}

fn evaluate_node(expression: &str, root: &Value) -> bool {
    if let Some(parts) = split_expression(expression, "||") {
        return parts.iter().any(|part| evaluate_node(part, root));
    }
    if let Some(parts) = split_expression(expression, "&&") {
        return parts.iter().all(|part| evaluate_node(part, root));
    }

    evaluate_term(expression.trim(), root)
}

fn evaluate_term(expression: &str, root: &Value) -> bool {
    if let Some(inner) = strip_enclosing_parentheses(expression) {
        return evaluate_node(inner, root);
    }

    for operator in COMPARISON_OPERATORS {
        if let Some(position) = find_top_level_operator(expression, operator) {
            let left = resolve_operand(&expression[..position], root);
            let right = resolve_operand(&expression[position + operator.len()..], root);
            return compare(&left, &right, operator);
        }
    }

    if let Some(negated) = strip_negation(expression) {
        return !evaluate_term(negated, root);
    }

    if let Some(includes_index) = find_top_level_operator(expression, ".includes(") {
        let (left_expression, right_with_suffix) = expression.split_at(includes_index);
        let right_expression = right_with_suffix.trim_start_matches(".includes(").trim();
        let right_expression = right_expression.strip_suffix(')').unwrap_or(right_expression).trim();
        let haystack = resolve_operand(left_expression, root);
        let needle = resolve_operand(right_expression, root);
        return match haystack {
            Value::Array(items) => items.iter().any(|item| values_equal(item, &needle)),
            Value::String(text) => text.contains(&format_json_value(&needle)),
            _ => false,
        };
    }

    is_truthy(&resolve_operand(expression, root))
}

fn compare(left: &Value, right: &Value, operator: &str) -> bool {
    match operator {
        "==" => values_equal(left, right),
        "!=" => !values_equal(left, right),
        ">" => order_values(left, right) == Some(Ordering::Greater),
        ">=" => matches!(order_values(left, right), Some(Ordering::Greater | Ordering::Equal)),
        "<" => order_values(left, right) == Some(Ordering::Less),
        "<=" => matches!(order_values(left, right), Some(Ordering::Less | Ordering::Equal)),
        _ => false,
    }
}

/// Resolve an operand to a value: negation, then literal, then reference lookup.
fn resolve_operand(expression: &str, root: &Value) -> Value {
    let operand = unwrap_template(expression);
    if operand.is_empty() {
        return Value::Null;
    }
    if let Some(negated) = strip_negation(operand) {
        return Value::Bool(!evaluate_term(negated, root));
    }
    if let Some(literal) = parse_literal(operand) {
        return literal;
    }
    lookup_path(root, operand).unwrap_or(Value::Null)
}

/// Parse a literal operand: JSON scalars/arrays/objects or a single-quoted string.
pub(crate) fn parse_literal(expression: &str) -> Option<Value> {
    let trimmed = expression.trim();
    if trimmed == "undefined" {
        return Some(Value::Null);
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return Some(Value::String(trimmed[1..trimmed.len() - 1].to_string()));
    }
    if looks_like_json_literal(trimmed) {
        return serde_json::from_str::<Value>(trimmed).ok();
    }
    None
}

fn looks_like_json_literal(expression: &str) -> bool {
    let starts_like_number = expression
        .chars()
        .next()
        .map(|character| character == '-' || character.is_ascii_digit())
        .unwrap_or(false);
    expression.starts_with('[')
        || expression.starts_with('{')
        || expression.starts_with('"')
        || expression == "null"
        || expression == "true"
        || expression == "false"
        || starts_like_number
}

/// Loose equality: numeric when both sides are numeric, textual otherwise.
/// `null` only equals `null`.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return left.is_null() && right.is_null();
    }
    if let (Some(left_number), Some(right_number)) = (as_number(left), as_number(right)) {
        return left_number == right_number;
    }
    format_json_value(left) == format_json_value(right)
}

fn order_values(left: &Value, right: &Value) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    if let (Some(left_number), Some(right_number)) = (as_number(left), as_number(right)) {
        return left_number.partial_cmp(&right_number);
    }
    Some(format_json_value(left).cmp(&format_json_value(right)))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|number| number.is_finite()),
        _ => None,
    }
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn strip_enclosing_parentheses(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    // "(a) && (b)" also starts and ends with parentheses; only unwrap when balanced throughout.
    let mut depth = 0i32;
    for character in inner.chars() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner.trim())
}

pub(crate) fn split_expression<'a>(expression: &'a str, operator: &str) -> Option<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let length = expression.len();

    while start < length {
        if let Some(relative_index) = find_top_level_operator(&expression[start..], operator) {
            let absolute_index = start + relative_index;
            let part = expression[start..absolute_index].trim();
            if !part.is_empty() {
                parts.push(part);
            }
            start = absolute_index + operator.len();
        } else {
            let part = expression[start..].trim();
            if !part.is_empty() {
                parts.push(part);
            }
            break;
        }
    }

    if parts.len() > 1 { Some(parts) } else { None }
}

/// The operand of a leading `!`, unless the `!` starts a `!=`.
fn strip_negation(expression: &str) -> Option<&str> {
    let stripped = expression.trim_start().strip_prefix('!')?;
    (!stripped.starts_with('=')).then(|| stripped.trim_start())
}

/// Byte offset of `operator` outside quotes, parentheses, and brackets.
pub(crate) fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            '(' | '[' if !in_single_quote && !in_double_quote => {
                depth += 1;
                continue;
            }
            ')' | ']' if !in_single_quote && !in_double_quote => {
                if depth > 0 {
                    depth -= 1;
                }
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }

    None
}
