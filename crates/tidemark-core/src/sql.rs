//! SQL text helpers.
//!
//! Every value reaching the store is rendered exactly once into a literal by
//! the command model; these helpers are the only place quoting happens.

/// Quotes an identifier, doubling embedded double quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders a string literal, doubling single quotes and dropping NUL bytes.
///
/// `PostgreSQL` rejects NUL in text values, so it never survives rendering.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\0' => {}
            '\'' => out.push_str("''"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Renders an optional value: `NULL` or a quoted literal.
#[must_use]
pub fn render_literal(value: Option<&str>) -> String {
    value.map_or_else(|| "NULL".to_string(), quote_literal)
}

/// Strips the characters [`quote_literal`] would drop.
#[must_use]
pub fn sanitize_text(value: &str) -> String {
    value.chars().filter(|c| *c != '\0').collect()
}
