use super::error::ConfigError;

/// Expands `${VAR_NAME}` references from the process environment.
///
/// An unterminated `${` or an empty name is kept literally. A well-formed
/// reference to an unset variable is an error.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

/// Same as [`resolve_variables`] with an injected lookup.
pub fn resolve_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find('}') {
            Some(close) if close > 0 => {
                let name = &after[..close];
                let value = lookup(name).ok_or_else(|| ConfigError::UndefinedVariable {
                    name: name.to_string(),
                })?;
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Interpolates an optional field, treating a value that resolves to an
/// empty string as absent.
pub fn resolve_optional(input: Option<&str>) -> Result<Option<String>, ConfigError> {
    match input {
        Some(raw) => {
            let resolved = resolve_variables(raw)?;
            Ok(if resolved.is_empty() { None } else { Some(resolved) })
        }
        None => Ok(None),
    }
}
