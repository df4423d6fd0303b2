//! Markup stripping for free-text payloads.

use serde_json::Value;

/// Remove HTML tags from every string in `value`, recursively.
pub fn strip_markup(value: Value) -> Value {
    match value {
        Value::String(text) => Value::String(strip_tags(&text)),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_markup).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, strip_markup(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Drop `<tag ...>` sequences. A `<` that does not open a tag is kept.
pub fn strip_tags(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        if c != '<' {
            output.push(c);
            continue;
        }
        let opens_tag = chars
            .peek()
            .is_some_and(|(_, next)| next.is_ascii_alphabetic() || matches!(next, '/' | '!' | '?'));
        let closes = text[index..].find('>');
        match (opens_tag, closes) {
            (true, Some(offset)) => {
                let end = index + offset;
                while chars.peek().is_some_and(|(i, _)| *i <= end) {
                    chars.next();
                }
            }
            _ => output.push(c),
        }
    }
    output
}
