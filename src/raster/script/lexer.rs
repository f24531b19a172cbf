use super::errors::ScriptError;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=",
    "%=", "->", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{",
    "}", ",", ":", ".", ";", "&", "|", "^", "~", "@",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        out: Vec::new(),
    }
    .run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    out: Vec<Token>,
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.out.push(Token {
            tok,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }
            let Some(c) = self.peek(0) else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\x0c' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '"' | '\'' => {
                    let s = self.string(c, false)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) => {
                    self.number()?
                }
                c if c == '_' || c.is_alphabetic() => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }
        if self.out.last().is_some_and(|t| t.tok != Tok::Newline) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.out)
    }

    /// Measures leading whitespace; returns true when the line is blank.
    fn handle_indentation(&mut self) -> Result<bool, ScriptError> {
        let mut width = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' | '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek(0) {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek(0) == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(ScriptError::syntax(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while self.peek(0).is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c == '_' || c.is_alphanumeric()) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        if let Some(q @ ('"' | '\'')) = self.peek(0) {
            let lower = word.to_ascii_lowercase();
            if matches!(lower.as_str(), "r" | "b" | "u" | "f" | "rb" | "br" | "fr" | "rf") {
                let raw = lower.contains('r');
                let s = self.string(q, raw)?;
                let tok = if lower.contains('f') {
                    Tok::FStr(s)
                } else {
                    Tok::Str(s)
                };
                self.push(tok);
                return Ok(());
            }
        }
        self.push(Tok::Name(word));
        Ok(())
    }

    fn string(&mut self, quote: char, raw: bool) -> Result<String, ScriptError> {
        let start_line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ScriptError::syntax(start_line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' && !raw {
                let Some(next) = self.peek(1) else {
                    return Err(ScriptError::syntax(start_line, "unterminated string literal"));
                };
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }
            if c == '\\' && raw {
                if let Some(next) = self.peek(1) {
                    out.push('\\');
                    out.push(next);
                    self.pos += 2;
                    continue;
                }
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B')) {
            let radix = match self.peek(1) {
                Some('x' | 'X') => 16,
                Some('o' | 'O') => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek(0).is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| ScriptError::syntax(self.line, "invalid integer literal"))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if matches!(c, 'e' | 'E')
                && (self.peek(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek(1), Some('+' | '-'))
                        && self.peek(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| ScriptError::syntax(self.line, "invalid float literal"))?,
            )
        } else {
            match text.parse::<i64>() {
                Ok(v) => Tok::Int(v),
                // Integers beyond 64 bits degrade to floats.
                Err(_) => Tok::Float(
                    text.parse()
                        .map_err(|_| ScriptError::syntax(self.line, "invalid integer literal"))?,
                ),
            }
        };
        self.push(tok);
        Ok(())
    }

    fn operator(&mut self) -> Result<(), ScriptError> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek(i) == Some(c));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek(0).unwrap_or(' ');
        Err(ScriptError::syntax(
            self.line,
            format!("invalid character '{}'", c),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).expect("tokenize").into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_indentation_tokens() {
        let got = toks("for i in x:\n    f(i)\n\n    # note\ng()\n");
        assert_eq!(
            got,
            vec![
                Tok::Name("for".into()),
                Tok::Name("i".into()),
                Tok::Name("in".into()),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("f".into()),
                Tok::Op("("),
                Tok::Name("i".into()),
                Tok::Op(")"),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("g".into()),
                Tok::Op("("),
                Tok::Op(")"),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_and_strings() {
        assert_eq!(
            toks("x = 1_000 + 2.5e1 - .5 + 0x1f\n"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1000),
                Tok::Op("+"),
                Tok::Float(25.0),
                Tok::Op("-"),
                Tok::Float(0.5),
                Tok::Op("+"),
                Tok::Int(31),
                Tok::Newline,
                Tok::Eof,
            ]
        );
        assert_eq!(toks("'a\\'b'")[0], Tok::Str("a'b".into()));
        assert_eq!(toks("f\"{x}!\"")[0], Tok::FStr("{x}!".into()));
        assert_eq!(toks("\"\"\"two\nlines\"\"\"")[0], Tok::Str("two\nlines".into()));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let got = toks("f(1,\n  2)\n");
        assert_eq!(got.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!got.contains(&Tok::Indent));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 3, .. }));
    }
}
