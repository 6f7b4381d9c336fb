//! Macro definitions tracked while preprocessing.

use std::collections::HashMap;

/// A `#define`d macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDef {
    /// Parameter names for function-like macros.
    pub params: Option<Vec<String>>,
    /// Whether the last parameter collects variadic arguments.
    pub variadic: bool,
    /// Replacement text.
    pub body: String,
}

impl MacroDef {
    pub fn object(body: impl Into<String>) -> Self {
        Self {
            params: None,
            variadic: false,
            body: body.into(),
        }
    }

    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }
}

pub type MacroTable = HashMap<String, MacroDef>;

/// Parse the body of a `#define` directive into a name and definition.
pub fn parse_define(body: &str) -> Option<(String, MacroDef)> {
    let body = body.trim_start();
    let name_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    let name = &body[..name_len];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let rest = &body[name_len..];

    if let Some(after_paren) = rest.strip_prefix('(') {
        let close = after_paren.find(')')?;
        let mut params = Vec::new();
        let mut variadic = false;
        for param in after_paren[..close].split(',').map(str::trim) {
            if param.is_empty() {
                continue;
            }
            if param == "..." {
                variadic = true;
                params.push("__VA_ARGS__".to_string());
            } else if let Some(named) = param.strip_suffix("...") {
                variadic = true;
                params.push(named.trim().to_string());
            } else {
                params.push(param.to_string());
            }
        }
        return Some((
            name.to_string(),
            MacroDef {
                params: Some(params),
                variadic,
                body: after_paren[close + 1..].trim().to_string(),
            },
        ));
    }

    Some((name.to_string(), MacroDef::object(rest.trim())))
}

/// Parse a `-D` value (`NAME`, `NAME=value` or `F(x)=value`).
pub fn parse_command_line_define(def: &str) -> Option<(String, MacroDef)> {
    match def.split_once('=') {
        Some((name, value)) => parse_define(&format!("{name} {value}")),
        None => parse_define(&format!("{def} 1")),
    }
}

/// The leading identifier of a directive body, as used by `#ifdef` and
/// `#undef`.
pub fn leading_identifier(body: &str) -> Option<&str> {
    let body = body.trim_start();
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    (end > 0).then(|| &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define_forms() {
        let (name, def) = parse_define("VERSION 3").unwrap();
        assert_eq!(name, "VERSION");
        assert_eq!(def, MacroDef::object("3"));

        let (name, def) = parse_define("MAX(a, b) ((a) > (b) ? (a) : (b))").unwrap();
        assert_eq!(name, "MAX");
        assert_eq!(def.params, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(def.body, "((a) > (b) ? (a) : (b))");

        let (_, def) = parse_define("LOG(fmt, ...) printf(fmt, __VA_ARGS__)").unwrap();
        assert!(def.variadic);

        // A space before the parenthesis makes an object-like macro.
        let (_, def) = parse_define("PAREN (1)").unwrap();
        assert!(!def.is_function_like());

        assert!(parse_define("").is_none());
        assert!(parse_define("1abc").is_none());
    }

    #[test]
    fn test_command_line_defines() {
        assert_eq!(parse_command_line_define("NDEBUG").unwrap().1.body, "1");
        assert_eq!(parse_command_line_define("LEVEL=2").unwrap().1.body, "2");
        assert!(parse_command_line_define("F(x)=x").unwrap().1.is_function_like());
    }
}
