//! Evaluation of `#if` and `#elif` expressions.

use super::macros::{MacroDef, MacroTable};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Num(i64),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "##", "(", ")", ",", "+", "-", "*", "/", "%",
    "<", ">", "&", "^", "|", "!", "~", "?", ":", "#",
];

/// Built-in function-like checks that are answered as false.
const UNSUPPORTED_FEATURE_CHECKS: &[&str] = &[
    "__has_feature",
    "__has_extension",
    "__has_builtin",
    "__has_attribute",
    "__has_cpp_attribute",
    "__has_c_attribute",
    "__has_declspec_attribute",
    "__has_warning",
    "__building_module",
];

const MAX_EXPANSION_DEPTH: usize = 64;

/// Callback answering `__has_include(spelling)`; the flag marks
/// `__has_include_next`.
pub type HasInclude<'a> = dyn FnMut(&str, bool) -> bool + 'a;

struct Evaluator<'m, 'h, 'c> {
    macros: &'m MacroTable,
    has_include: &'h mut HasInclude<'c>,
}

/// Evaluate a conditional expression. Errors carry a diagnostic message.
pub fn evaluate(expr: &str, macros: &MacroTable, has_include: &mut HasInclude<'_>) -> Result<bool, String> {
    let mut eval = Evaluator { macros, has_include };
    let tokens = eval.lex(expr)?;
    let tokens = eval.expand(tokens, &mut Vec::new(), 0)?;
    if tokens.is_empty() {
        return Err("#if with no expression".to_string());
    }
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.ternary(true)?;
    if parser.pos != tokens.len() {
        return Err("token is not a valid binary operator in a preprocessor subexpression".to_string());
    }
    Ok(value != 0)
}

impl Evaluator<'_, '_, '_> {
    fn lex(&mut self, text: &str) -> Result<Vec<Tok>, String> {
        let bytes = text.as_bytes();
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if c.is_ascii_whitespace() {
                i += 1;
            } else if c.is_ascii_alphabetic() || c == b'_' {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let ident = &text[start..i];
                let called = text[i..].trim_start().starts_with('(');
                if called && (ident == "__has_include" || ident == "__has_include_next") {
                    let (spelling, next) = header_operand(text, i)?;
                    tokens.push(Tok::Num((self.has_include)(spelling.trim(), ident.ends_with("next")) as i64));
                    i = next;
                } else {
                    tokens.push(Tok::Ident(ident.to_string()));
                }
            } else if c.is_ascii_digit() {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'\'') {
                    i += 1;
                }
                tokens.push(Tok::Num(parse_number(&text[start..i])?));
            } else if c == b'\'' {
                let (value, next) = parse_char(bytes, i)?;
                tokens.push(Tok::Num(value));
                i = next;
            } else if let Some(p) = PUNCTS.iter().find(|p| text[i..].starts_with(**p)) {
                tokens.push(Tok::Punct(*p));
                i += p.len();
            } else {
                return Err(format!("invalid token '{}' in preprocessor expression", c as char));
            }
        }
        Ok(tokens)
    }

    fn expand(&mut self, tokens: Vec<Tok>, active: &mut Vec<String>, depth: usize) -> Result<Vec<Tok>, String> {
        if depth > MAX_EXPANSION_DEPTH {
            return Err("macro expansion too deep".to_string());
        }
        let macros = self.macros;
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let Tok::Ident(name) = &tokens[i] else {
                if tokens[i] != Tok::Punct("#") && tokens[i] != Tok::Punct("##") {
                    out.push(tokens[i].clone());
                }
                i += 1;
                continue;
            };

            if name == "defined" {
                let (value, next) = self.defined_operand(&tokens, i + 1)?;
                out.push(Tok::Num(value as i64));
                i = next;
                continue;
            }
            if UNSUPPORTED_FEATURE_CHECKS.contains(&name.as_str()) && tokens.get(i + 1) == Some(&Tok::Punct("(")) {
                let (_, next) = collect_args(&tokens, i + 1)?;
                out.push(Tok::Num(0));
                i = next;
                continue;
            }

            let def = macros.get(name).filter(|_| !active.contains(name));
            match def {
                Some(def) if !def.is_function_like() => {
                    let body = self.lex(&def.body)?;
                    active.push(name.clone());
                    let expanded = self.expand(body, active, depth + 1)?;
                    active.pop();
                    out.extend(expanded);
                    i += 1;
                }
                Some(def) if tokens.get(i + 1) == Some(&Tok::Punct("(")) => {
                    let (args, next) = collect_args(&tokens, i + 1)?;
                    let substituted = self.substitute(def, args, active, depth)?;
                    active.push(name.clone());
                    let expanded = self.expand(substituted, active, depth + 1)?;
                    active.pop();
                    out.extend(expanded);
                    i = next;
                }
                _ => {
                    out.push(Tok::Num((name == "true") as i64));
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    fn defined_operand(&self, tokens: &[Tok], mut i: usize) -> Result<(bool, usize), String> {
        let parenthesized = tokens.get(i) == Some(&Tok::Punct("("));
        if parenthesized {
            i += 1;
        }
        let Some(Tok::Ident(name)) = tokens.get(i) else {
            return Err("macro name missing after 'defined'".to_string());
        };
        let value = self.macros.contains_key(name) || name.starts_with("__has_");
        i += 1;
        if parenthesized {
            if tokens.get(i) != Some(&Tok::Punct(")")) {
                return Err("missing ')' after 'defined'".to_string());
            }
            i += 1;
        }
        Ok((value, i))
    }

    fn substitute(
        &mut self,
        def: &MacroDef,
        mut args: Vec<Vec<Tok>>,
        active: &mut Vec<String>,
        depth: usize,
    ) -> Result<Vec<Tok>, String> {
        let params = def.params.as_deref().unwrap_or_default();
        if def.variadic && args.len() > params.len() {
            let rest = args.split_off(params.len() - 1);
            let mut joined = Vec::new();
            for (n, arg) in rest.into_iter().enumerate() {
                if n > 0 {
                    joined.push(Tok::Punct(","));
                }
                joined.extend(arg);
            }
            args.push(joined);
        }
        if args.len() == 1 && args[0].is_empty() && params.is_empty() {
            args.clear();
        }
        if args.len() != params.len() && !(def.variadic && args.len() + 1 == params.len()) {
            return Err(format!(
                "macro invoked with {} arguments, but takes {}",
                args.len(),
                params.len()
            ));
        }

        let mut expanded_args = Vec::with_capacity(args.len());
        for arg in args {
            expanded_args.push(self.expand(arg, active, depth + 1)?);
        }

        let body = self.lex(&def.body)?;
        let mut out = Vec::with_capacity(body.len());
        for tok in body {
            match &tok {
                Tok::Ident(ident) => match params.iter().position(|p| p == ident) {
                    Some(n) => out.extend(expanded_args.get(n).cloned().unwrap_or_default()),
                    None => out.push(tok),
                },
                _ => out.push(tok),
            }
        }
        Ok(out)
    }
}

/// Read the parenthesized operand of `__has_include` starting at `i`.
fn header_operand(text: &str, i: usize) -> Result<(&str, usize), String> {
    let rest = &text[i..];
    let open = rest
        .find(|c: char| !c.is_ascii_whitespace())
        .filter(|&n| rest[n..].starts_with('('))
        .ok_or_else(|| "missing '(' after '__has_include'".to_string())?;
    let inner = &rest[open + 1..];
    let trimmed = inner.trim_start();
    let skipped = inner.len() - trimmed.len();
    let end = match trimmed.chars().next() {
        Some('<') => trimmed.find('>').map(|n| n + 1),
        Some('"') => trimmed[1..].find('"').map(|n| n + 2),
        _ => trimmed.find(')'),
    }
    .ok_or_else(|| "expected a header name in '__has_include'".to_string())?;
    let after = &trimmed[end..];
    let close = after
        .find(')')
        .ok_or_else(|| "missing ')' after '__has_include' operand".to_string())?;
    let consumed = i + open + 1 + skipped + end + close + 1;
    Ok((&trimmed[..end], consumed))
}

/// Split the arguments of an invocation whose `(` is at `open`.
fn collect_args(tokens: &[Tok], open: usize) -> Result<(Vec<Vec<Tok>>, usize), String> {
    let mut args = vec![Vec::new()];
    let mut depth = 0usize;
    let mut i = open + 1;
    while let Some(tok) = tokens.get(i) {
        match tok {
            Tok::Punct("(") => depth += 1,
            Tok::Punct(")") if depth == 0 => return Ok((args, i + 1)),
            Tok::Punct(")") => depth -= 1,
            Tok::Punct(",") if depth == 0 => {
                args.push(Vec::new());
                i += 1;
                continue;
            }
            _ => {}
        }
        if let Some(last) = args.last_mut() {
            last.push(tok.clone());
        }
        i += 1;
    }
    Err("unterminated function-like macro invocation".to_string())
}

fn parse_number(text: &str) -> Result<i64, String> {
    let cleaned: String = text.chars().filter(|&c| c != '\'').collect();
    let digits = cleaned.trim_end_matches(['u', 'U', 'l', 'L']);
    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    u64::from_str_radix(digits, radix)
        .map(|v| v as i64)
        .map_err(|_| format!("invalid integer constant '{text}' in preprocessor expression"))
}

fn parse_char(bytes: &[u8], start: usize) -> Result<(i64, usize), String> {
    let err = || "invalid character constant in preprocessor expression".to_string();
    let c = *bytes.get(start + 1).ok_or_else(err)?;
    let (value, len) = if c == b'\\' {
        let e = *bytes.get(start + 2).ok_or_else(err)?;
        match e {
            b'n' => (10, 2),
            b't' => (9, 2),
            b'r' => (13, 2),
            b'0' => (0, 2),
            b'x' => {
                let hex_end = bytes[start + 3..]
                    .iter()
                    .position(|b| !b.is_ascii_hexdigit())
                    .map_or(bytes.len(), |n| start + 3 + n);
                let hex = std::str::from_utf8(&bytes[start + 3..hex_end]).map_err(|_| err())?;
                (i64::from_str_radix(hex, 16).map_err(|_| err())?, hex_end - start - 1)
            }
            other => (other as i64, 2),
        }
    } else {
        (c as i64, 1)
    };
    let close = start + 1 + len;
    if bytes.get(close) != Some(&b'\'') {
        return Err(err());
    }
    Ok((value, close + 1))
}

struct Parser<'t> {
    tokens: &'t [Tok],
    pos: usize,
}

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

impl Parser<'_> {
    fn peek_punct(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Tok::Punct(p)) => Some(p),
            _ => None,
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        if self.peek_punct() == Some(punct) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected '{punct}' in preprocessor expression"))
        }
    }

    fn ternary(&mut self, live: bool) -> Result<i64, String> {
        let cond = self.binary(1, live)?;
        if self.peek_punct() != Some("?") {
            return Ok(cond);
        }
        self.pos += 1;
        let then = self.ternary(live && cond != 0)?;
        self.expect(":")?;
        let otherwise = self.ternary(live && cond == 0)?;
        Ok(if cond != 0 { then } else { otherwise })
    }

    fn binary(&mut self, min_prec: u8, live: bool) -> Result<i64, String> {
        let mut lhs = self.unary(live)?;
        while let Some(op) = self.peek_punct() {
            let Some(prec) = binary_precedence(op) else { break };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs_live = match op {
                "&&" => live && lhs != 0,
                "||" => live && lhs == 0,
                _ => live,
            };
            let rhs = self.binary(prec + 1, rhs_live)?;
            lhs = apply(op, lhs, rhs, rhs_live)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self, live: bool) -> Result<i64, String> {
        match self.tokens.get(self.pos) {
            Some(Tok::Num(n)) => {
                self.pos += 1;
                Ok(*n)
            }
            Some(Tok::Punct("(")) => {
                self.pos += 1;
                let value = self.ternary(live)?;
                self.expect(")")?;
                Ok(value)
            }
            Some(Tok::Punct(op @ ("-" | "+" | "!" | "~"))) => {
                let op = *op;
                self.pos += 1;
                let value = self.unary(live)?;
                Ok(match op {
                    "-" => value.wrapping_neg(),
                    "!" => (value == 0) as i64,
                    "~" => !value,
                    _ => value,
                })
            }
            Some(Tok::Ident(name)) => Err(format!("unexpected identifier '{name}'")),
            Some(Tok::Punct(p)) => Err(format!("invalid token '{p}' at start of a preprocessor expression")),
            None => Err("expected value in expression".to_string()),
        }
    }
}

fn apply(op: &str, lhs: i64, rhs: i64, live: bool) -> Result<i64, String> {
    Ok(match op {
        "||" => (lhs != 0 || rhs != 0) as i64,
        "&&" => (lhs != 0 && rhs != 0) as i64,
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => (lhs == rhs) as i64,
        "!=" => (lhs != rhs) as i64,
        "<" => (lhs < rhs) as i64,
        ">" => (lhs > rhs) as i64,
        "<=" => (lhs <= rhs) as i64,
        ">=" => (lhs >= rhs) as i64,
        "<<" => lhs.wrapping_shl(rhs as u32),
        ">>" => lhs.wrapping_shr(rhs as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" | "%" if rhs == 0 => {
            if live {
                return Err("division by zero in preprocessor expression".to_string());
            }
            0
        }
        "/" => lhs.wrapping_div(rhs),
        "%" => lhs.wrapping_rem(rhs),
        _ => return Err(format!("unknown operator '{op}'")),
    })
}
