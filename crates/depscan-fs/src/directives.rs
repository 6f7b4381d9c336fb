//! Minimised preprocessor directive extraction.
//!
//! Scanning only needs the directives of a file, not its tokens. This lexer
//! walks the bytes once, skipping comments and literals, and keeps every
//! line that starts with `#` plus the module import and declaration forms.
//! It never fails: malformed input yields whatever directives were found.

/// Directive kinds the scanner records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Include,
    IncludeNext,
    Import,
    Define,
    Undef,
    If,
    Ifdef,
    Ifndef,
    Elif,
    Elifdef,
    Elifndef,
    Else,
    Endif,
    Pragma,
    Error,
    Warning,
    /// `@import Name;`
    AtImport,
    /// `import name;` or `export import name;`
    CxxImport,
    /// `module name;` or `export module name;`
    CxxModule,
}

impl DirectiveKind {
    fn from_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"include" => Self::Include,
            b"include_next" => Self::IncludeNext,
            b"import" => Self::Import,
            b"define" => Self::Define,
            b"undef" => Self::Undef,
            b"if" => Self::If,
            b"ifdef" => Self::Ifdef,
            b"ifndef" => Self::Ifndef,
            b"elif" => Self::Elif,
            b"elifdef" => Self::Elifdef,
            b"elifndef" => Self::Elifndef,
            b"else" => Self::Else,
            b"endif" => Self::Endif,
            b"pragma" => Self::Pragma,
            b"error" => Self::Error,
            b"warning" => Self::Warning,
            _ => return None,
        })
    }

    /// Whether the directive opens, continues or closes a conditional block.
    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            Self::If
                | Self::Ifdef
                | Self::Ifndef
                | Self::Elif
                | Self::Elifdef
                | Self::Elifndef
                | Self::Else
                | Self::Endif
        )
    }
}

/// One extracted directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// 1-based line the directive starts on.
    pub line: u32,
    /// Text after the directive name with comments and line continuations
    /// removed. For module forms, the name up to the terminating `;`.
    pub body: String,
}

/// Extract the directives of a source file.
pub fn scan_directives(source: &[u8]) -> Vec<Directive> {
    let source = source.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(source);
    let mut scanner = Scanner {
        src: source,
        pos: 0,
        line: 1,
        out: Vec::new(),
    };
    scanner.run();
    scanner.out
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

struct Scanner<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    out: Vec<Directive>,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn skip_continuation(&mut self) -> bool {
        if self.peek() != Some(b'\\') {
            return false;
        }
        match (self.peek_at(1), self.peek_at(2)) {
            (Some(b'\n'), _) => self.pos += 2,
            (Some(b'\r'), Some(b'\n')) => self.pos += 3,
            _ => return false,
        }
        self.line += 1;
        true
    }

    fn skip_horizontal(&mut self) {
        loop {
            if self.skip_continuation() {
                continue;
            }
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\x0b' | b'\x0c') => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'*') => self.skip_block_comment(),
                _ => break,
            }
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(b) = self.bump() {
            if b == b'*' && self.peek() == Some(b'/') {
                self.pos += 1;
                return;
            }
        }
    }

    /// Stops before the terminating newline.
    fn skip_line_comment(&mut self) {
        loop {
            if self.skip_continuation() {
                continue;
            }
            match self.peek() {
                None | Some(b'\n') => break,
                Some(_) => self.pos += 1,
            }
        }
    }

    fn skip_quoted(&mut self, quote: u8) {
        self.pos += 1;
        loop {
            if self.skip_continuation() {
                continue;
            }
            match self.peek() {
                None | Some(b'\n') => return,
                Some(b'\\') => self.pos = (self.pos + 2).min(self.src.len()),
                Some(b) => {
                    self.pos += 1;
                    if b == quote {
                        return;
                    }
                }
            }
        }
    }

    /// Cursor on the `R` of `R"delim(...)delim"`.
    fn skip_raw_string(&mut self) {
        self.pos += 2;
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'(') => break,
                Some(b'\n' | b'"' | b'\\' | b' ' | b')') | None => return,
                Some(_) if self.pos - start > 16 => return,
                Some(_) => self.pos += 1,
            }
        }
        let src = self.src;
        let delimiter = &src[start..self.pos];
        self.pos += 1;
        while let Some(b) = self.bump() {
            if b != b')' {
                continue;
            }
            let end = self.pos + delimiter.len();
            if src.get(self.pos..end) == Some(delimiter) && src.get(end) == Some(&b'"') {
                self.pos = end + 1;
                return;
            }
        }
    }

    fn at_raw_string(&self, prev: u8) -> bool {
        self.peek() == Some(b'R')
            && self.peek_at(1) == Some(b'"')
            && (!is_ident_char(prev) || matches!(prev, b'8' | b'u' | b'U' | b'L'))
    }

    /// Skip to just past the end of the logical line.
    fn skip_rest_of_line(&mut self) {
        let mut prev = b' ';
        loop {
            if self.skip_continuation() {
                continue;
            }
            let Some(b) = self.peek() else { return };
            match b {
                b'\n' => {
                    self.bump();
                    return;
                }
                b'R' if self.at_raw_string(prev) => self.skip_raw_string(),
                b'"' => self.skip_quoted(b'"'),
                b'\'' if prev.is_ascii_digit() => self.pos += 1,
                b'\'' => self.skip_quoted(b'\''),
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek_at(1) == Some(b'*') => self.skip_block_comment(),
                _ => self.pos += 1,
            }
            prev = b;
        }
    }

    fn ident(&mut self) -> &'a [u8] {
        let src = self.src;
        let start = self.pos;
        if self.peek().is_some_and(is_ident_start) {
            while self.peek().is_some_and(is_ident_char) {
                self.pos += 1;
            }
        }
        &src[start..self.pos]
    }

    fn copy_quoted(&mut self, quote: u8, out: &mut Vec<u8>) {
        out.push(quote);
        self.pos += 1;
        loop {
            if self.skip_continuation() {
                continue;
            }
            match self.peek() {
                None | Some(b'\n') => return,
                Some(b'\\') => {
                    out.push(b'\\');
                    self.pos += 1;
                    if let Some(next) = self.peek().filter(|&n| n != b'\n') {
                        out.push(next);
                        self.pos += 1;
                    }
                }
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                    if b == quote {
                        return;
                    }
                }
            }
        }
    }

    /// Collect the rest of the logical line, consuming its newline.
    fn read_body(&mut self) -> String {
        let mut out = Vec::new();
        loop {
            if self.skip_continuation() {
                continue;
            }
            let Some(b) = self.peek() else { break };
            match b {
                b'\n' => {
                    self.bump();
                    break;
                }
                b'"' => self.copy_quoted(b'"', &mut out),
                b'\'' if out.last().is_some_and(u8::is_ascii_digit) => {
                    out.push(b);
                    self.pos += 1;
                }
                b'\'' => self.copy_quoted(b'\'', &mut out),
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_line_comment(),
                b'/' if self.peek_at(1) == Some(b'*') => {
                    self.skip_block_comment();
                    out.push(b' ');
                }
                b'\r' => self.pos += 1,
                _ => {
                    out.push(b);
                    self.pos += 1;
                }
            }
        }
        String::from_utf8_lossy(&out).trim().to_string()
    }

    fn push(&mut self, kind: DirectiveKind, line: u32, body: String) {
        self.out.push(Directive { kind, line, body });
    }

    fn run(&mut self) {
        while self.pos < self.src.len() {
            self.skip_horizontal();
            let line = self.line;
            match self.peek() {
                None => break,
                Some(b'\n') => {
                    self.bump();
                }
                Some(b'#') => {
                    self.pos += 1;
                    self.lex_directive(line);
                }
                Some(b'@') => self.lex_at_import(line),
                Some(b) if is_ident_start(b) => self.lex_module_line(line),
                Some(_) => self.skip_rest_of_line(),
            }
        }
    }

    fn lex_directive(&mut self, line: u32) {
        self.skip_horizontal();
        let name = self.ident();
        match DirectiveKind::from_name(name) {
            Some(kind) => {
                let body = self.read_body();
                self.push(kind, line, body);
            }
            None => self.skip_rest_of_line(),
        }
    }

    fn lex_at_import(&mut self, line: u32) {
        let is_import = self.src[self.pos + 1..].starts_with(b"import")
            && !self.src.get(self.pos + 7).is_some_and(|&b| is_ident_char(b));
        if !is_import {
            self.skip_rest_of_line();
            return;
        }
        self.pos += 7;
        let body = module_name(self.read_body());
        self.push(DirectiveKind::AtImport, line, body);
    }

    fn lex_module_line(&mut self, line: u32) {
        let mut word = self.ident();
        if word == b"export" {
            self.skip_horizontal();
            word = self.ident();
        }
        let kind = match word {
            b"import" => DirectiveKind::CxxImport,
            b"module" => DirectiveKind::CxxModule,
            _ => {
                self.skip_rest_of_line();
                return;
            }
        };
        self.skip_horizontal();
        let starts_name = match self.peek() {
            Some(b) if is_ident_start(b) => true,
            // Header units and partitions.
            Some(b'<' | b'"' | b':') => kind == DirectiveKind::CxxImport,
            _ => false,
        };
        if !starts_name {
            self.skip_rest_of_line();
            return;
        }
        let body = module_name(self.read_body());
        self.push(kind, line, body);
    }
}

fn module_name(body: String) -> String {
    match body.split_once(';') {
        Some((name, _)) => name.trim().to_string(),
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(DirectiveKind, String)> {
        scan_directives(source.as_bytes())
            .into_iter()
            .map(|d| (d.kind, d.body))
            .collect()
    }

    #[test]
    fn test_basic_directives_and_lines() {
        let src = "#include \"a.h\"\n  #  include <b/c.h>\nint x;\n#define FOO 1\n";
        let dirs = scan_directives(src.as_bytes());
        assert_eq!(dirs.len(), 3);
        assert_eq!(dirs[0].kind, DirectiveKind::Include);
        assert_eq!(dirs[0].body, "\"a.h\"");
        assert_eq!(dirs[1].body, "<b/c.h>");
        assert_eq!(dirs[1].line, 2);
        assert_eq!(dirs[2].kind, DirectiveKind::Define);
        assert_eq!(dirs[2].line, 4);
    }

    #[test]
    fn test_comments_and_continuations() {
        let src = "/* #include \"no.h\"\n*/ #include \"yes.h\" // trailing\n\
                   #define LONG a \\\n  b\n// #include \"no2.h\"\n";
        assert_eq!(
            kinds(src),
            vec![
                (DirectiveKind::Include, "\"yes.h\"".to_string()),
                (DirectiveKind::Define, "LONG a   b".to_string()),
            ]
        );
    }

    #[test]
    fn test_literals_hide_hashes() {
        let src = "const char *s = \"\\\n#include \\\"x.h\\\"\";\n\
                   auto r = R\"(\n#include \"raw.h\"\n)\";\nint n = 1'000;\n#include \"real.h\"\n";
        assert_eq!(
            kinds(src),
            vec![(DirectiveKind::Include, "\"real.h\"".to_string())]
        );
    }

    #[test]
    fn test_module_forms() {
        let src = "@import Foo.Bar;\nexport module m:part;\nmodule;\nimport std;\n\
                   export import <vector>;\nimportant(x);\nimport (y);\n";
        assert_eq!(
            kinds(src),
            vec![
                (DirectiveKind::AtImport, "Foo.Bar".to_string()),
                (DirectiveKind::CxxModule, "m:part".to_string()),
                (DirectiveKind::CxxImport, "std".to_string()),
                (DirectiveKind::CxxImport, "<vector>".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_and_malformed_input() {
        assert!(scan_directives(b"#line 4\n#ident \"x\"\n#\n").is_empty());
        let dirs = scan_directives(b"#if defined(A) /* unterminated");
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].body, "defined(A)");
        assert!(scan_directives(b"\"unterminated\n'\n").is_empty());
    }
}
