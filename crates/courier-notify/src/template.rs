//! `{{name}}` template rendering. Stateless and pure.

/// Substitute `{{name}}` tokens from `vars` in a single left-to-right pass.
///
/// Substituted values are never re-scanned, so variable values containing
/// `{{...}}` come through verbatim. Tokens whose name is missing from
/// `vars` (or is not a valid identifier) are left as literal text.
pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) if is_identifier(&after_open[..end]) => {
                let name = &after_open[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("{{");
                        out.push_str(name);
                        out.push_str("}}");
                    }
                }
                rest = &after_open[end + 2..];
            }
            _ => {
                // Not a well-formed token; emit the braces and move on.
                out.push_str("{{");
                rest = after_open;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Check that every required variable is present in `vars`.
///
/// Returns the missing names in declaration order.
pub fn validate(
    required: &[String],
    vars: &std::collections::HashMap<String, String>,
) -> Result<(), Vec<String>> {
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !vars.contains_key(name.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
