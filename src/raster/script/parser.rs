use std::rc::Rc;

use super::ast::{BinOp, CmpOp, Expr, FPart, FunctionDef, ImportNames, Stmt, StmtKind, Target, UnaryOp};
use super::errors::ScriptError;
use super::lexer::{Tok, Token, tokenize};

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

const AUG_OPS: &[(&str, BinOp)] = &[
    ("+=", BinOp::Add),
    ("-=", BinOp::Sub),
    ("*=", BinOp::Mul),
    ("/=", BinOp::Div),
    ("//=", BinOp::FloorDiv),
    ("%=", BinOp::Mod),
    ("**=", BinOp::Pow),
];

/// Expression nesting deeper than this is rejected before evaluation.
const MAX_NESTING: usize = 100;

pub fn parse(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        if parser.eat(&Tok::Newline) {
            continue;
        }
        parser.statement(&mut body)?;
    }
    Ok(body)
}

type PResult<T> = Result<T, ScriptError>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.at_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error<T>(&self, msg: impl Into<String>) -> PResult<T> {
        Err(ScriptError::syntax(self.line(), msg))
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", op))
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", kw))
        }
    }

    fn identifier(&mut self) -> PResult<String> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.pos += 1;
                Ok(n)
            }
            _ => self.error("expected a name"),
        }
    }

    fn end_of_simple(&mut self) -> PResult<()> {
        if self.eat(&Tok::Newline) || self.at(&Tok::Eof) {
            Ok(())
        } else {
            self.error("invalid syntax")
        }
    }

    fn statement(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        let line = self.line();
        let head = match self.peek() {
            Tok::Name(n) => n.clone(),
            Tok::Indent => return self.error("unexpected indent"),
            _ => String::new(),
        };
        let kind = match head.as_str() {
            "if" => self.if_stmt()?,
            "while" => {
                self.pos += 1;
                let cond = self.expression()?;
                let body = self.block()?;
                if self.at_kw("else") {
                    return self.error("while/else is not supported");
                }
                StmtKind::While(cond, body)
            }
            "for" => {
                self.pos += 1;
                let target = self.target_list()?;
                self.expect_kw("in")?;
                let iter = self.expression_list()?;
                let body = self.block()?;
                if self.at_kw("else") {
                    return self.error("for/else is not supported");
                }
                StmtKind::For(target, iter, body)
            }
            "def" => self.def_stmt()?,
            "class" => return self.error("class definitions are not supported"),
            "try" | "with" | "async" | "raise" | "del" | "assert" | "lambda" | "yield"
            | "nonlocal" => return self.error(format!("'{}' is not supported", head)),
            _ => return self.simple_statements(out),
        };
        out.push(Stmt { kind, line });
        Ok(())
    }

    fn simple_statements(&mut self, out: &mut Vec<Stmt>) -> PResult<()> {
        loop {
            let line = self.line();
            let kind = self.simple()?;
            out.push(Stmt { kind, line });
            if !self.eat_op(";") {
                break;
            }
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
        }
        self.end_of_simple()
    }

    fn simple(&mut self) -> PResult<StmtKind> {
        if self.eat_kw("pass") {
            return Ok(StmtKind::Pass);
        }
        if self.eat_kw("break") {
            return Ok(StmtKind::Break);
        }
        if self.eat_kw("continue") {
            return Ok(StmtKind::Continue);
        }
        if self.eat_kw("return") {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) || self.at_op(";") {
                return Ok(StmtKind::Return(None));
            }
            return Ok(StmtKind::Return(Some(self.expression_list()?)));
        }
        if self.eat_kw("global") {
            let mut names = vec![self.identifier()?];
            while self.eat_op(",") {
                names.push(self.identifier()?);
            }
            return Ok(StmtKind::Global(names));
        }
        if self.eat_kw("import") {
            let mut modules = Vec::new();
            loop {
                let name = self.dotted_name()?;
                let alias = if self.eat_kw("as") {
                    Some(self.identifier()?)
                } else {
                    None
                };
                modules.push((name, alias));
                if !self.eat_op(",") {
                    break;
                }
            }
            return Ok(StmtKind::Import(modules));
        }
        if self.eat_kw("from") {
            let module = self.dotted_name()?;
            self.expect_kw("import")?;
            if self.eat_op("*") {
                return Ok(StmtKind::ImportFrom(module, ImportNames::All));
            }
            let parens = self.eat_op("(");
            let mut names = Vec::new();
            loop {
                let name = self.identifier()?;
                let alias = if self.eat_kw("as") {
                    Some(self.identifier()?)
                } else {
                    None
                };
                names.push((name, alias));
                if !self.eat_op(",") || (parens && self.at_op(")")) {
                    break;
                }
            }
            if parens {
                self.expect_op(")")?;
            }
            return Ok(StmtKind::ImportFrom(module, ImportNames::Names(names)));
        }

        let first = self.expression_list()?;
        for (op, bin) in AUG_OPS {
            if self.eat_op(op) {
                let target = to_target(&first).ok_or_else(|| {
                    ScriptError::syntax(self.line(), "illegal expression for augmented assignment")
                })?;
                if matches!(target, Target::Tuple(_)) {
                    return self.error("illegal expression for augmented assignment");
                }
                let value = self.expression_list()?;
                return Ok(StmtKind::AugAssign(target, *bin, value));
            }
        }
        if self.at_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.expression_list()?);
            }
            let value = exprs.pop().unwrap_or(Expr::None);
            let mut targets = Vec::with_capacity(exprs.len());
            for e in &exprs {
                match to_target(e) {
                    Some(t) => targets.push(t),
                    None => return self.error("cannot assign to expression"),
                }
            }
            return Ok(StmtKind::Assign(targets, value));
        }
        Ok(StmtKind::Expr(first))
    }

    fn dotted_name(&mut self) -> PResult<String> {
        let mut name = self.identifier()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn if_stmt(&mut self) -> PResult<StmtKind> {
        self.pos += 1;
        let mut branches = Vec::new();
        let cond = self.expression()?;
        branches.push((cond, self.block()?));
        let mut other = None;
        loop {
            if self.eat_kw("elif") {
                let cond = self.expression()?;
                branches.push((cond, self.block()?));
            } else if self.eat_kw("else") {
                other = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If(branches, other))
    }

    fn def_stmt(&mut self) -> PResult<StmtKind> {
        self.pos += 1;
        let name = self.identifier()?;
        self.expect_op("(")?;
        let mut params: Vec<(String, Option<Expr>)> = Vec::new();
        while !self.at_op(")") {
            let param = self.identifier()?;
            let default = if self.eat_op("=") {
                Some(self.expression()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|(_, d)| d.is_some()) {
                return self.error("non-default argument follows default argument");
            }
            params.push((param, default));
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.expression()?;
        }
        let body = self.block()?;
        Ok(StmtKind::Def(Rc::new(FunctionDef {
            name,
            params,
            body: Rc::new(body),
        })))
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_op(":")?;
        let mut body = Vec::new();
        if !self.eat(&Tok::Newline) {
            self.simple_statements(&mut body)?;
            return Ok(body);
        }
        while self.eat(&Tok::Newline) {}
        if !self.eat(&Tok::Indent) {
            return self.error("expected an indented block");
        }
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            self.statement(&mut body)?;
        }
        Ok(body)
    }

    fn target_list(&mut self) -> PResult<Target> {
        let line = self.line();
        let mut items = vec![self.postfix()?];
        let mut tuple = false;
        while self.eat_op(",") {
            tuple = true;
            if self.at_kw("in") {
                break;
            }
            items.push(self.postfix()?);
        }
        let expr = if tuple {
            Expr::Tuple(items)
        } else {
            items.pop().unwrap_or(Expr::None)
        };
        to_target(&expr).ok_or_else(|| ScriptError::syntax(line, "cannot assign to expression"))
    }

    /// Comma separated expressions; more than one becomes a tuple.
    fn expression_list(&mut self) -> PResult<Expr> {
        let first = self.expression()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.starts_expression() {
                items.push(self.expression()?);
            } else {
                break;
            }
        }
        Ok(Expr::Tuple(items))
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(n) => {
                !KEYWORDS.contains(&n.as_str())
                    || matches!(n.as_str(), "True" | "False" | "None" | "not" | "lambda")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "-" | "+" | "~" | "{"),
            _ => false,
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error("too many nested expressions");
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expression(&mut self) -> PResult<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> PResult<Expr> {
        if self.at_kw("lambda") {
            return self.error("lambda expressions are not supported");
        }
        let body = self.or_expr()?;
        if self.eat_kw("if") {
            let cond = self.or_expr()?;
            self.expect_kw("else")?;
            let other = self.expression()?;
            return Ok(Expr::IfExp {
                cond: Box::new(cond),
                then: Box::new(body),
                other: Box::new(other),
            });
        }
        Ok(body)
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_kw("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_kw("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> PResult<Expr> {
        if self.eat_kw("not") {
            let inner = self.nested(Self::not_expr)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let tok = self.peek().clone();
            let next_is = |word: &str| matches!(self.peek_at(1), Tok::Name(m) if m == word);
            let op = match tok {
                Tok::Op("==") => CmpOp::Eq,
                Tok::Op("!=") => CmpOp::NotEq,
                Tok::Op("<") => CmpOp::Lt,
                Tok::Op("<=") => CmpOp::LtE,
                Tok::Op(">") => CmpOp::Gt,
                Tok::Op(">=") => CmpOp::GtE,
                Tok::Name(ref n) if n == "in" => CmpOp::In,
                Tok::Name(ref n) if n == "not" && next_is("in") => CmpOp::NotIn,
                Tok::Name(ref n) if n == "is" && next_is("not") => CmpOp::IsNot,
                Tok::Name(ref n) if n == "is" => CmpOp::Is,
                _ => break,
            };
            if matches!(op, CmpOp::NotIn | CmpOp::IsNot) {
                self.pos += 1;
            }
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare(Box::new(left), rest))
        }
    }

    fn arith(&mut self) -> PResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("//") {
                BinOp::FloorDiv
            } else if self.eat_op("%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.factor()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.nested(Self::factor)?)));
        }
        if self.eat_op("+") {
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.nested(Self::factor)?)));
        }
        if self.at_op("~") {
            return self.error("bitwise operators are not supported");
        }
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exp = self.nested(Self::factor)?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_op("(") {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_op("[") {
                if self.at_op(":") {
                    return self.error("slicing is not supported");
                }
                let index = self.expression_list()?;
                if self.at_op(":") {
                    return self.error("slicing is not supported");
                }
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat_op(".") {
                let attr = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return self.error("expected attribute name"),
                };
                expr = Expr::Attr(Box::new(expr), attr);
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> PResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_op(")") {
            if self.at_op("*") || self.at_op("**") {
                return self.error("argument unpacking is not supported");
            }
            let is_kwarg = matches!(self.peek(), Tok::Name(_)) && matches!(self.peek_at(1), Tok::Op("="));
            if is_kwarg {
                let name = self.identifier()?;
                self.expect_op("=")?;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return self.error(format!("keyword argument repeated: {}", name));
                }
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return self.error("positional argument follows keyword argument");
                }
                args.push(self.expression()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> PResult<Expr> {
        match self.advance() {
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Float(v) => Ok(Expr::Float(v)),
            Tok::Str(s) => self.string_tail(vec![FPart::Lit(s)], false),
            Tok::FStr(s) => {
                let line = self.line();
                self.string_tail(parse_fstring(&s, line)?, true)
            }
            Tok::Name(n) => match n.as_str() {
                "True" => Ok(Expr::Bool(true)),
                "False" => Ok(Expr::Bool(false)),
                "None" => Ok(Expr::None),
                _ if KEYWORDS.contains(&n.as_str()) => {
                    self.pos -= 1;
                    self.error("invalid syntax")
                }
                _ => Ok(Expr::Name(n)),
            },
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.at_kw("for") {
                    return self.error("generator expressions are not supported");
                }
                if self.eat_op(")") {
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op(")")?;
                Ok(Expr::Tuple(items))
            }
            Tok::Op("[") => {
                if self.eat_op("]") {
                    return Ok(Expr::List(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat_kw("for") {
                    let target = self.target_list()?;
                    self.expect_kw("in")?;
                    let iter = self.or_expr()?;
                    let cond = if self.eat_kw("if") {
                        Some(Box::new(self.or_expr()?))
                    } else {
                        None
                    };
                    self.expect_op("]")?;
                    return Ok(Expr::ListComp {
                        elt: Box::new(first),
                        target: Box::new(target),
                        iter: Box::new(iter),
                        cond,
                    });
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op("]") {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect_op("]")?;
                Ok(Expr::List(items))
            }
            Tok::Op("{") => {
                self.pos -= 1;
                self.error("dict and set literals are not supported")
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                self.error("invalid syntax")
            }
        }
    }

    /// Adjacent string literals concatenate.
    fn string_tail(&mut self, mut parts: Vec<FPart>, mut formatted: bool) -> PResult<Expr> {
        loop {
            match self.peek().clone() {
                Tok::Str(s) => {
                    self.pos += 1;
                    parts.push(FPart::Lit(s));
                }
                Tok::FStr(s) => {
                    self.pos += 1;
                    let line = self.line();
                    parts.extend(parse_fstring(&s, line)?);
                    formatted = true;
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(Expr::FStr(parts));
        }
        let text: String = parts
            .into_iter()
            .map(|p| match p {
                FPart::Lit(s) => s,
                FPart::Expr(..) => String::new(),
            })
            .collect();
        Ok(Expr::Str(text.into()))
    }
}

fn to_target(expr: &Expr) -> Option<Target> {
    match expr {
        Expr::Name(n) => Some(Target::Name(n.clone())),
        Expr::Tuple(items) | Expr::List(items) => {
            items.iter().map(to_target).collect::<Option<Vec<_>>>().map(Target::Tuple)
        }
        Expr::Index(base, index) => Some(Target::Index((**base).clone(), (**index).clone())),
        _ => None,
    }
}

fn parse_fstring(raw: &str, line: usize) -> PResult<Vec<FPart>> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            lit.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            lit.push('}');
            i += 2;
            continue;
        }
        if c == '}' {
            return Err(ScriptError::syntax(line, "f-string: single '}' is not allowed"));
        }
        if c != '{' {
            lit.push(c);
            i += 1;
            continue;
        }

        let start = i + 1;
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut j = start;
        let mut spec_start = None;
        while j < chars.len() {
            let d = chars[j];
            match quote {
                Some(q) if d == q => quote = None,
                Some(_) => {}
                None => match d {
                    '\'' | '"' => quote = Some(d),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' => depth = depth.saturating_sub(1),
                    '}' if depth > 0 => depth -= 1,
                    '}' => break,
                    ':' | '!'
                        if depth == 0
                            && spec_start.is_none()
                            && !(d == '!' && chars.get(j + 1) == Some(&'=')) =>
                    {
                        spec_start = Some(j)
                    }
                    _ => {}
                },
            }
            j += 1;
        }
        if j >= chars.len() {
            return Err(ScriptError::syntax(line, "f-string: expecting '}'"));
        }
        let expr_end = spec_start.unwrap_or(j);
        let source: String = chars[start..expr_end].iter().collect();
        let spec = spec_start.map(|s| chars[s..j].iter().collect::<String>());

        let mut sub = Parser {
            tokens: tokenize(source.trim())?,
            pos: 0,
            depth: 0,
        };
        let expr = sub
            .expression_list()
            .map_err(|_| ScriptError::syntax(line, "f-string: invalid expression"))?;
        if !matches!(sub.peek(), Tok::Newline | Tok::Eof) {
            return Err(ScriptError::syntax(line, "f-string: invalid expression"));
        }
        if !lit.is_empty() {
            parts.push(FPart::Lit(std::mem::take(&mut lit)));
        }
        parts.push(FPart::Expr(expr, spec));
        i = j + 1;
    }
    if !lit.is_empty() {
        parts.push(FPart::Lit(lit));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(src: &str) -> StmtKind {
        let mut body = parse(src).expect("parse");
        assert_eq!(body.len(), 1, "{:?}", body);
        body.remove(0).kind
    }

    #[test]
    fn test_precedence() {
        let StmtKind::Expr(e) = one("1 + 2 * 3 ** 2\n") else {
            panic!("expected expression");
        };
        assert_eq!(
            e,
            Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Int(1)),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Int(2)),
                    Box::new(Expr::Binary(BinOp::Pow, Box::new(Expr::Int(3)), Box::new(Expr::Int(2)))),
                )),
            )
        );
    }

    #[test]
    fn test_loops_and_functions() {
        let src = "def square(t, size=100):\n    for _ in range(4):\n        t.forward(size)\n        t.left(90)\n    return size\n";
        let StmtKind::Def(def) = one(src) else {
            panic!("expected def");
        };
        assert_eq!(def.name, "square");
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.params[1].1, Some(Expr::Int(100)));
        assert_eq!(def.body.len(), 2);
        assert!(matches!(def.body[0].kind, StmtKind::For(..)));
        assert_eq!(def.body[0].line, 2);
    }

    #[test]
    fn test_assignment_forms() {
        assert!(matches!(one("a, b = 1, 2\n"), StmtKind::Assign(ref t, _) if matches!(t[0], Target::Tuple(_))));
        assert!(matches!(one("x += 5\n"), StmtKind::AugAssign(Target::Name(_), BinOp::Add, _)));
        assert!(matches!(one("a = b = 0\n"), StmtKind::Assign(ref t, _) if t.len() == 2));
        assert!(parse("f() = 3\n").is_err());
    }

    #[test]
    fn test_if_chain_and_one_line_blocks() {
        let StmtKind::If(branches, other) = one("if a: x = 1\nelif b:\n    x = 2\nelse: pass\n") else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(other.is_some());
    }

    #[test]
    fn test_imports() {
        assert_eq!(
            one("from turtle import *\n"),
            StmtKind::ImportFrom("turtle".into(), ImportNames::All)
        );
        assert_eq!(
            one("import turtle as tt, math\n"),
            StmtKind::Import(vec![("turtle".into(), Some("tt".into())), ("math".into(), None)])
        );
    }

    #[test]
    fn test_fstring_parts() {
        let StmtKind::Expr(Expr::FStr(parts)) = one("f'n={n:.2f} {{x}}'\n") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FPart::Lit("n=".into()));
        assert_eq!(parts[1], FPart::Expr(Expr::Name("n".into()), Some(":.2f".into())));
        assert_eq!(parts[2], FPart::Lit(" {x}".into()));
    }

    #[test]
    fn test_kwargs_and_comprehension() {
        let StmtKind::Expr(Expr::Call { args, kwargs, .. }) = one("t.circle(50, steps=6)\n") else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "steps");
        assert!(matches!(one("xs = [i * 2 for i in range(3) if i]\n"), StmtKind::Assign(_, Expr::ListComp { .. })));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let src = format!("x = {}1{}\n", "(".repeat(500), ")".repeat(500));
        assert!(matches!(parse(&src), Err(ScriptError::Syntax { .. })));
        let src = format!("x = {}1\n", "-".repeat(500));
        assert!(parse(&src).is_err());
    }

    #[test]
    fn test_unsupported_constructs_are_syntax_errors() {
        for src in ["class A:\n    pass\n", "try:\n    x\nexcept:\n    y\n", "x = {1: 2}\n", "y = a[1:2]\n"] {
            assert!(matches!(parse(src), Err(ScriptError::Syntax { .. })), "{}", src);
        }
    }
}
