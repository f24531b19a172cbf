use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use super::ast::{BinOp, CmpOp, FunctionDef};
use super::errors::Raise;

/// Largest sequence the interpreter will materialise.
pub const MAX_SEQUENCE_LEN: usize = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Module {
    Turtle,
    Math,
    Time,
}

impl Module {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "turtle" => Some(Module::Turtle),
            "math" => Some(Module::Math),
            "time" => Some(Module::Time),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Module::Turtle => "turtle",
            Module::Math => "math",
            Module::Time => "time",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    Bool,
    Enumerate,
    Float,
    Input,
    Int,
    Len,
    List,
    Max,
    Min,
    Pow,
    Print,
    Range,
    Round,
    Str,
    Sum,
    Tuple,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Builtin::Abs,
            "bool" => Builtin::Bool,
            "enumerate" => Builtin::Enumerate,
            "float" => Builtin::Float,
            "input" => Builtin::Input,
            "int" => Builtin::Int,
            "len" => Builtin::Len,
            "list" => Builtin::List,
            "max" => Builtin::Max,
            "min" => Builtin::Min,
            "pow" => Builtin::Pow,
            "print" => Builtin::Print,
            "range" => Builtin::Range,
            "round" => Builtin::Round,
            "str" => Builtin::Str,
            "sum" => Builtin::Sum,
            "tuple" => Builtin::Tuple,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
}

#[derive(Clone, Debug)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Range { start: i64, stop: i64, step: i64 },
    Function(Rc<Function>),
    Builtin(Builtin),
    Method(Rc<Value>, Rc<str>),
    Module(Module),
    Turtle(usize),
    Screen,
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    /// Ints that fit are kept integral so `pensize()` reads back as `1`.
    pub fn number(v: f64) -> Self {
        if v.fract() == 0.0 && v.abs() < 1e15 {
            Value::Int(v as i64)
        } else {
            Value::Float(v)
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Range { .. } => "range",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Method(..) => "method",
            Value::Module(_) => "module",
            Value::Turtle(_) => "Turtle",
            Value::Screen => "_Screen",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn expect_f64(&self, what: &str) -> Result<f64, Raise> {
        self.as_f64().ok_or_else(|| {
            Raise::type_error(format!(
                "{} must be a number, not '{}'",
                what,
                self.type_name()
            ))
        })
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, Raise> {
        self.as_int().ok_or_else(|| {
            Raise::type_error(format!(
                "'{}' object cannot be interpreted as an integer ({})",
                self.type_name(),
                what
            ))
        })
    }

    /// Python `str()`.
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }

    /// Python `repr()`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(b) => (if *b { "True" } else { "False" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_repr(*f),
            Value::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        c => out.push(c),
                    }
                }
                out.push('\'');
                out
            }
            Value::List(items) => {
                let inner: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                if inner.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    format!("range({}, {})", start, stop)
                } else {
                    format!("range({}, {}, {})", start, stop, step)
                }
            }
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Builtin(b) => format!("<built-in function {:?}>", b).to_lowercase(),
            Value::Method(_, name) => format!("<bound method {}>", name),
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Turtle(i) => format!("<turtle.Turtle object #{}>", i),
            Value::Screen => "<turtle._Screen object>".into(),
        }
    }
}

pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{:e}", f);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }
    let mut out = format!("{}", f);
    if !out.contains('.') {
        out.push_str(".0");
    }
    out
}

pub fn range_len(v: &Value) -> usize {
    let Value::Range { start, stop, step } = *v else {
        return 0;
    };
    let (start, stop, step) = (start as i128, stop as i128, step as i128);
    let n = if step > 0 && start < stop {
        (stop - start + step - 1) / step
    } else if step < 0 && start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    n.min(usize::MAX as i128) as usize
}

pub fn py_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| py_eq(p, q))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| py_eq(p, q))
        }
        (Value::Turtle(x), Value::Turtle(y)) => x == y,
        (Value::Screen, Value::Screen) => true,
        (Value::Module(x), Value::Module(y)) => x == y,
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Range { .. }, Value::Range { .. }) => {
            a.repr() == b.repr()
        }
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => x == y,
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        },
    }
}

pub fn py_is(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => Rc::ptr_eq(x, y),
        (Value::Tuple(x), Value::Tuple(y)) => Rc::ptr_eq(x, y),
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(_), Value::Int(_)) | (Value::Str(_), Value::Str(_)) => py_eq(a, b),
        (Value::Float(_), _) | (_, Value::Float(_)) => false,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b) && py_eq(a, b),
    }
}

fn ordering(a: &Value, b: &Value) -> Result<std::cmp::Ordering, Raise> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => seq_ordering(&x.borrow(), &y.borrow()),
        (Value::Tuple(x), Value::Tuple(y)) => seq_ordering(x, y),
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Ok(x.cmp(&y)),
            _ => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal)),
                _ => Err(Raise::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ))),
            },
        },
    }
}

fn seq_ordering(x: &[Value], y: &[Value]) -> Result<std::cmp::Ordering, Raise> {
    for (p, q) in x.iter().zip(y.iter()) {
        if !py_eq(p, q) {
            return ordering(p, q);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

pub fn py_lt(a: &Value, b: &Value) -> Result<bool, Raise> {
    if a.as_f64().is_some_and(f64::is_nan) || b.as_f64().is_some_and(f64::is_nan) {
        return Ok(false);
    }
    Ok(ordering(a, b)? == std::cmp::Ordering::Less)
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, Raise> {
    match container {
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_ref())),
            other => Err(Raise::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| py_eq(v, item))),
        Value::Tuple(items) => Ok(items.iter().any(|v| py_eq(v, item))),
        Value::Range { start, stop, step } => {
            let Some(i) = item.as_int() else {
                return Ok(false);
            };
            let in_bounds = if *step > 0 {
                *start <= i && i < *stop
            } else {
                *stop < i && i <= *start
            };
            Ok(in_bounds && (i - start) % step == 0)
        }
        other => Err(Raise::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool, Raise> {
    Ok(match op {
        CmpOp::Eq => py_eq(a, b),
        CmpOp::NotEq => !py_eq(a, b),
        CmpOp::Lt => py_lt(a, b)?,
        CmpOp::Gt => py_lt(b, a)?,
        CmpOp::LtE => py_lt(a, b)? || py_eq(a, b),
        CmpOp::GtE => py_lt(b, a)? || py_eq(a, b),
        CmpOp::In => contains(b, a)?,
        CmpOp::NotIn => !contains(b, a)?,
        CmpOp::Is => py_is(a, b),
        CmpOp::IsNot => !py_is(a, b),
    })
}

fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    }
}

fn unsupported(op: BinOp, a: &Value, b: &Value) -> Raise {
    Raise::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op_symbol(op),
        a.type_name(),
        b.type_name()
    ))
}

fn zero_division(what: &str) -> Raise {
    Raise::new("ZeroDivisionError", what.to_string())
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>, Raise> {
    let times = times.max(0) as usize;
    if items.len().saturating_mul(times) > MAX_SEQUENCE_LEN {
        return Err(Raise::new("MemoryError", "sequence too large"));
    }
    Ok(items.iter().cloned().cycle().take(items.len() * times).collect())
}

pub fn binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, Raise> {
    match (op, a, b) {
        (BinOp::Add, Value::Str(x), Value::Str(y)) => {
            if x.len() + y.len() > MAX_SEQUENCE_LEN {
                return Err(Raise::new("MemoryError", "string too large"));
            }
            let mut s = String::with_capacity(x.len() + y.len());
            s.push_str(x);
            s.push_str(y);
            return Ok(Value::str(s));
        }
        (BinOp::Add, Value::List(x), Value::List(y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            return Ok(Value::list(items));
        }
        (BinOp::Add, Value::Tuple(x), Value::Tuple(y)) => {
            let mut items = x.as_ref().clone();
            items.extend(y.iter().cloned());
            return Ok(Value::tuple(items));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_int().is_some() => {
            let chars: Vec<char> = s.chars().collect();
            let out: String = repeat(&chars, n.as_int().unwrap_or(0))?.into_iter().collect();
            return Ok(Value::str(out));
        }
        (BinOp::Mul, Value::List(l), n) | (BinOp::Mul, n, Value::List(l)) if n.as_int().is_some() => {
            let items = repeat(l.borrow().as_slice(), n.as_int().unwrap_or(0))?;
            return Ok(Value::list(items));
        }
        (BinOp::Mul, Value::Tuple(t), n) | (BinOp::Mul, n, Value::Tuple(t)) if n.as_int().is_some() => {
            return Ok(Value::tuple(repeat(t.as_slice(), n.as_int().unwrap_or(0))?));
        }
        _ => {}
    }

    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return int_binary(op, x, y);
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => float_binary(op, x, y),
        _ => Err(unsupported(op, a, b)),
    }
}

fn int_binary(op: BinOp, x: i64, y: i64) -> Result<Value, Raise> {
    let overflow = || float_binary(op, x as f64, y as f64);
    match op {
        BinOp::Add => x.checked_add(y).map(Value::Int).map_or_else(overflow, Ok),
        BinOp::Sub => x.checked_sub(y).map(Value::Int).map_or_else(overflow, Ok),
        BinOp::Mul => x.checked_mul(y).map(Value::Int).map_or_else(overflow, Ok),
        BinOp::Div => float_binary(op, x as f64, y as f64),
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let Some(mut q) = x.checked_div(y) else {
                return overflow();
            };
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q -= 1;
            }
            Ok(Value::Int(q))
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let mut r = x.checked_rem(y).unwrap_or(0);
            if r != 0 && ((r < 0) != (y < 0)) {
                r += y;
            }
            Ok(Value::Int(r))
        }
        BinOp::Pow => {
            if y < 0 {
                return float_binary(op, x as f64, y as f64);
            }
            match u32::try_from(y).ok().and_then(|e| x.checked_pow(e)) {
                Some(v) => Ok(Value::Int(v)),
                None => overflow(),
            }
        }
    }
}

fn float_binary(op: BinOp, x: f64, y: f64) -> Result<Value, Raise> {
    let v = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = x % y;
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) { r + y } else { r }
        }
        BinOp::Pow => {
            if x == 0.0 && y < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            x.powf(y)
        }
    };
    Ok(Value::Float(v))
}

/// Reads the decimal run at `chars[*i..]`; widths and precisions beyond
/// `MAX_SEQUENCE_LEN` are refused before anything is allocated.
fn spec_number(chars: &[char], i: &mut usize) -> Result<usize, Raise> {
    let mut n = 0usize;
    while let Some(d) = chars.get(*i).and_then(|c| c.to_digit(10)) {
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(d as usize))
            .filter(|&n| n <= MAX_SEQUENCE_LEN)
            .ok_or_else(|| Raise::value_error("Too many decimal digits in format string"))?;
        *i += 1;
    }
    Ok(n)
}

/// Applies a `format()` specification such as `.2f`, `>8` or `d`.
pub fn format_with_spec(value: &Value, spec: &str) -> Result<String, Raise> {
    if let Some(conv) = spec.strip_prefix('!') {
        let (conv, rest) = conv.split_at(conv.len().min(1));
        let text = match conv {
            "r" => value.repr(),
            _ => value.to_text(),
        };
        let rest = rest.strip_prefix(':').unwrap_or(rest);
        return format_with_spec(&Value::str(text), rest);
    }
    let spec = spec.strip_prefix(':').unwrap_or(spec);
    if spec.is_empty() {
        return Ok(value.to_text());
    }

    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && matches!(chars[1], '<' | '>' | '^') {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if matches!(chars.first(), Some('<' | '>' | '^')) {
        align = Some(chars[0]);
        i = 1;
    }
    let width = spec_number(&chars, &mut i)?;
    let mut precision = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        precision = Some(spec_number(&chars, &mut i)?);
    }
    let kind = chars.get(i).copied();
    let invalid = || Raise::value_error(format!("Invalid format specifier '{}'", spec));
    if i + 1 < chars.len() {
        return Err(invalid());
    }

    let body = match kind {
        Some('f') | Some('F') => {
            let v = value.expect_f64("format value")?;
            format!("{:.*}", precision.unwrap_or(6), v)
        }
        Some('%') => {
            let v = value.expect_f64("format value")?;
            format!("{:.*}%", precision.unwrap_or(6), v * 100.0)
        }
        Some('d') => match value {
            Value::Int(_) | Value::Bool(_) => value.as_int().unwrap_or(0).to_string(),
            _ => return Err(invalid()),
        },
        Some('s') | None => {
            let text = match (value, precision) {
                (Value::Float(f), Some(p)) => format!("{:.*}", p, f),
                _ => value.to_text(),
            };
            match (value, precision) {
                (Value::Str(_), Some(p)) => text.chars().take(p).collect(),
                _ => text,
            }
        }
        _ => return Err(invalid()),
    };

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = width - len;
    let numeric = matches!(value, Value::Int(_) | Value::Float(_));
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    let mut out = String::with_capacity(width);
    let fill_n = |out: &mut String, n: usize| (0..n).for_each(|_| out.push(fill));
    match align {
        '>' => {
            fill_n(&mut out, pad);
            out.push_str(&body);
        }
        '^' => {
            fill_n(&mut out, pad / 2);
            out.push_str(&body);
            fill_n(&mut out, pad - pad / 2);
        }
        _ => {
            out.push_str(&body);
            fill_n(&mut out, pad);
        }
    }
    Ok(out)
}

/// `str.format` with positional `{}` / `{0}` fields.
pub fn str_format(template: &str, args: &[Value]) -> Result<String, Raise> {
    let mut out = String::with_capacity(template.len());
    let mut auto = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                for d in chars.by_ref() {
                    if d == '}' {
                        break;
                    }
                    field.push(d);
                }
                let (index, spec) = match field.find([':', '!']) {
                    Some(pos) => (&field[..pos], &field[pos..]),
                    None => (field.as_str(), ""),
                };
                let idx = if index.is_empty() {
                    auto += 1;
                    auto - 1
                } else {
                    index
                        .parse::<usize>()
                        .map_err(|_| Raise::new("KeyError", format!("'{}'", index)))?
                };
                let value = args.get(idx).ok_or_else(|| {
                    Raise::new("IndexError", "Replacement index out of range for positional args tuple")
                })?;
                let _ = write!(out, "{}", format_with_spec(value, spec)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}
