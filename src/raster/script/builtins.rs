use std::cell::RefCell;
use std::f64::consts::{E, PI, TAU};
use std::rc::Rc;

use super::ast::BinOp;
use super::errors::Raise;
use super::interp::{Interpreter, collect};
use super::value::{
    Builtin, MAX_SEQUENCE_LEN, Module, Value, binary, py_eq, py_lt, range_len, str_format,
};

const MATH_CONSTANTS: &[&str] = &["pi", "e", "tau", "inf", "nan"];
const MATH_FUNCTIONS: &[&str] = &[
    "sqrt", "sin", "cos", "tan", "asin", "acos", "atan", "atan2", "radians", "degrees",
    "floor", "ceil", "trunc", "fabs", "hypot", "pow", "exp", "log", "log10", "log2",
    "isfinite", "isinf", "isnan",
];
const TIME_FUNCTIONS: &[&str] = &["sleep", "time", "perf_counter", "monotonic"];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "reverse", "index", "count", "clear",
];
const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "format", "join", "split", "replace",
    "startswith", "endswith",
];

/// Names bound by `from <module> import *`.
pub fn module_exports(module: Module) -> Vec<&'static str> {
    match module {
        Module::Math => MATH_CONSTANTS.iter().chain(MATH_FUNCTIONS).copied().collect(),
        Module::Time => TIME_FUNCTIONS.to_vec(),
        Module::Turtle => Vec::new(),
    }
}

fn method(receiver: &Value, name: &str) -> Value {
    Value::Method(Rc::new(receiver.clone()), name.into())
}

fn no_attribute(value: &Value, name: &str) -> Raise {
    let msg = match value {
        Value::Module(m) => format!("module '{}' has no attribute '{}'", m.name(), name),
        other => format!("'{}' object has no attribute '{}'", other.type_name(), name),
    };
    Raise::new("AttributeError", msg)
}

pub(super) fn arg<'a>(
    args: &'a [Value],
    kwargs: &'a [(String, Value)],
    index: usize,
    name: &str,
) -> Option<&'a Value> {
    args.get(index)
        .or_else(|| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v))
        .filter(|v| !matches!(v, Value::None))
}

pub(super) fn required<'a>(
    args: &'a [Value],
    kwargs: &'a [(String, Value)],
    index: usize,
    name: &str,
    func: &str,
) -> Result<&'a Value, Raise> {
    arg(args, kwargs, index, name).ok_or_else(|| {
        Raise::type_error(format!(
            "{}() missing 1 required positional argument: '{}'",
            func, name
        ))
    })
}

pub(super) fn reject_kwargs(func: &str, kwargs: &[(String, Value)], allowed: &[&str]) -> Result<(), Raise> {
    match kwargs.iter().find(|(k, _)| !allowed.contains(&k.as_str())) {
        Some((k, _)) => Err(Raise::type_error(format!(
            "{}() got an unexpected keyword argument '{}'",
            func, k
        ))),
        None => Ok(()),
    }
}

fn domain_error() -> Raise {
    Raise::value_error("math domain error")
}

fn to_int(f: f64) -> Result<Value, Raise> {
    if !f.is_finite() {
        return Err(Raise::new(
            "OverflowError",
            "cannot convert float infinity or NaN to integer",
        ));
    }
    if f.abs() >= 9.2e18 {
        return Ok(Value::Float(f.trunc()));
    }
    Ok(Value::Int(f as i64))
}

impl Interpreter<'_> {
    pub(super) fn get_attr(&self, value: &Value, name: &str) -> Result<Value, Raise> {
        let known = match value {
            Value::Module(Module::Math) => {
                let constant = match name {
                    "pi" => Some(PI),
                    "e" => Some(E),
                    "tau" => Some(TAU),
                    "inf" => Some(f64::INFINITY),
                    "nan" => Some(f64::NAN),
                    _ => None,
                };
                if let Some(c) = constant {
                    return Ok(Value::Float(c));
                }
                MATH_FUNCTIONS.contains(&name)
            }
            Value::Module(Module::Time) => TIME_FUNCTIONS.contains(&name),
            Value::Module(Module::Turtle) => super::drawing::is_module_function(name),
            Value::Turtle(_) => super::drawing::TURTLE_METHODS.contains(&name),
            Value::Screen => super::drawing::SCREEN_METHODS.contains(&name),
            Value::List(_) => LIST_METHODS.contains(&name),
            Value::Str(_) => STR_METHODS.contains(&name),
            _ => false,
        };
        if known {
            Ok(method(value, name))
        } else {
            Err(no_attribute(value, name))
        }
    }

    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        match receiver {
            Value::Module(Module::Math) => {
                reject_kwargs(name, &kwargs, &[])?;
                math_call(name, &args)
            }
            Value::Module(Module::Time) => {
                reject_kwargs(name, &kwargs, &[])?;
                time_call(name, &args)
            }
            Value::Module(Module::Turtle) => self.turtle_module_call(name, args, kwargs),
            Value::Turtle(idx) => self.turtle_call(*idx, name, args, kwargs),
            Value::Screen => self.screen_call(name, args, kwargs),
            Value::List(items) => {
                reject_kwargs(name, &kwargs, &[])?;
                list_call(items, name, args)
            }
            Value::Str(s) => {
                reject_kwargs(name, &kwargs, &[])?;
                str_call(s, name, args)
            }
            other => Err(no_attribute(other, name)),
        }
    }

    pub(super) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        let name = format!("{:?}", builtin).to_lowercase();
        let allowed: &[&str] = match builtin {
            Builtin::Print => &["sep", "end", "flush"],
            Builtin::Sum | Builtin::Enumerate => &["start"],
            Builtin::Round => &["ndigits"],
            _ => &[],
        };
        reject_kwargs(&name, &kwargs, allowed)?;
        let first = args.first();

        match builtin {
            Builtin::Print => {
                let text_of = |key: &str, default: &str| -> Result<String, Raise> {
                    match kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v) {
                        None | Some(Value::None) => Ok(default.to_string()),
                        Some(Value::Str(s)) => Ok(s.to_string()),
                        Some(other) => Err(Raise::type_error(format!(
                            "{} must be None or a string, not {}",
                            key,
                            other.type_name()
                        ))),
                    }
                };
                let sep = text_of("sep", " ")?;
                let end = text_of("end", "\n")?;
                let parts: Vec<String> = args.iter().map(Value::to_text).collect();
                let line = format!("{}{}", parts.join(&sep), end);
                self.print(&line);
                Ok(Value::None)
            }
            Builtin::Input => Ok(Value::str("")),
            Builtin::Abs => match first {
                Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
                Some(v) if v.as_int().is_some() => {
                    let i = v.as_int().unwrap_or(0);
                    Ok(i.checked_abs()
                        .map(Value::Int)
                        .unwrap_or(Value::Float((i as f64).abs())))
                }
                Some(v) => Err(Raise::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    v.type_name()
                ))),
                None => Err(Raise::type_error("abs() takes exactly one argument (0 given)")),
            },
            Builtin::Bool => Ok(Value::Bool(first.is_some_and(Value::truthy))),
            Builtin::Float => match first {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(v) => v.expect_f64("float() argument").map(Value::Float),
            },
            Builtin::Int => match first {
                None => Ok(Value::Int(0)),
                Some(Value::Float(f)) => to_int(*f),
                Some(Value::Str(s)) => {
                    let trimmed = s.trim().replace('_', "");
                    trimmed.parse::<i64>().map(Value::Int).map_err(|_| {
                        Raise::value_error(format!(
                            "invalid literal for int() with base 10: {}",
                            Value::Str(s.clone()).repr()
                        ))
                    })
                }
                Some(v) => v.expect_int("int() argument").map(Value::Int),
            },
            Builtin::Len => {
                let v = first.ok_or_else(|| Raise::type_error("len() takes exactly one argument (0 given)"))?;
                let len = match v {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.borrow().len(),
                    Value::Tuple(items) => items.len(),
                    Value::Range { .. } => range_len(v),
                    other => {
                        return Err(Raise::type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                Ok(Value::Int(len as i64))
            }
            Builtin::List => match first {
                None => Ok(Value::list(Vec::new())),
                Some(v) => Ok(Value::list(collect(v)?)),
            },
            Builtin::Tuple => match first {
                None => Ok(Value::tuple(Vec::new())),
                Some(v) => Ok(Value::tuple(collect(v)?)),
            },
            Builtin::Max | Builtin::Min => {
                let items = match args.len() {
                    0 => return Err(Raise::type_error(format!("{} expected at least 1 argument, got 0", name))),
                    1 => collect(&args[0])?,
                    _ => args,
                };
                let mut best: Option<Value> = None;
                for item in items {
                    best = Some(match best {
                        None => item,
                        Some(current) => {
                            let better = if builtin == Builtin::Max {
                                py_lt(&current, &item)?
                            } else {
                                py_lt(&item, &current)?
                            };
                            if better { item } else { current }
                        }
                    });
                }
                best.ok_or_else(|| Raise::value_error(format!("{}() arg is an empty sequence", name)))
            }
            Builtin::Pow => match args.as_slice() {
                [base, exp] => binary(BinOp::Pow, base, exp),
                _ => Err(Raise::type_error("pow() expected 2 arguments")),
            },
            Builtin::Range => {
                let ints: Vec<i64> = args
                    .iter()
                    .map(|v| v.expect_int("range() argument"))
                    .collect::<Result<_, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => {
                        return Err(Raise::type_error(format!(
                            "range expected 1 to 3 arguments, got {}",
                            ints.len()
                        )));
                    }
                };
                if step == 0 {
                    return Err(Raise::value_error("range() arg 3 must not be zero"));
                }
                Ok(Value::Range { start, stop, step })
            }
            Builtin::Round => {
                let x = first.ok_or_else(|| Raise::type_error("round() missing required argument 'number'"))?;
                let digits = arg(&args, &kwargs, 1, "ndigits")
                    .map(|d| d.expect_int("ndigits"))
                    .transpose()?;
                match (x, digits) {
                    (Value::Int(_) | Value::Bool(_), _) => Ok(Value::Int(x.as_int().unwrap_or(0))),
                    (v, None) => to_int(v.expect_f64("round() argument")?.round_ties_even()),
                    (v, Some(d)) => {
                        let f = v.expect_f64("round() argument")?;
                        let scale = 10f64.powi(d.clamp(-308, 308) as i32);
                        let rounded = (f * scale).round_ties_even() / scale;
                        Ok(Value::Float(if rounded.is_finite() { rounded } else { f }))
                    }
                }
            }
            Builtin::Str => Ok(Value::str(first.map(Value::to_text).unwrap_or_default())),
            Builtin::Sum => {
                let iterable = first.ok_or_else(|| Raise::type_error("sum() takes at least 1 positional argument (0 given)"))?;
                let mut total = arg(&args, &kwargs, 1, "start").cloned().unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return Err(Raise::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
                }
                for item in collect(iterable)? {
                    total = binary(BinOp::Add, &total, &item)?;
                }
                Ok(total)
            }
            Builtin::Enumerate => {
                let iterable = first.ok_or_else(|| Raise::type_error("enumerate() missing required argument 'iterable'"))?;
                let start = arg(&args, &kwargs, 1, "start")
                    .map(|s| s.expect_int("start"))
                    .transpose()?
                    .unwrap_or(0);
                let pairs = collect(iterable)?
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
                    .collect();
                Ok(Value::list(pairs))
            }
        }
    }
}

fn parse_float(s: &str) -> Result<f64, Raise> {
    let t = s.trim().to_ascii_lowercase();
    let parsed = match t.trim_start_matches(['+', '-']) {
        "inf" | "infinity" | "nan" => t.parse::<f64>().ok(),
        _ if t.contains("inf") || t.contains("nan") => None,
        _ => t.replace('_', "").parse::<f64>().ok(),
    };
    parsed.ok_or_else(|| {
        Raise::value_error(format!(
            "could not convert string to float: {}",
            Value::str(s).repr()
        ))
    })
}

fn math_call(name: &str, args: &[Value]) -> Result<Value, Raise> {
    let num = |i: usize| -> Result<f64, Raise> {
        args.get(i)
            .ok_or_else(|| Raise::type_error(format!("{}() missing required argument", name)))?
            .expect_f64(&format!("{}() argument", name))
    };
    let checked = |v: f64| -> Result<Value, Raise> {
        if v.is_nan() && !args.iter().any(|a| a.as_f64().is_some_and(f64::is_nan)) {
            Err(domain_error())
        } else {
            Ok(Value::Float(v))
        }
    };
    match name {
        "sqrt" => {
            let x = num(0)?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "sin" => checked(num(0)?.sin()),
        "cos" => checked(num(0)?.cos()),
        "tan" => checked(num(0)?.tan()),
        "asin" => checked(num(0)?.asin()),
        "acos" => checked(num(0)?.acos()),
        "atan" => checked(num(0)?.atan()),
        "atan2" => checked(num(0)?.atan2(num(1)?)),
        "radians" => Ok(Value::Float(num(0)?.to_radians())),
        "degrees" => Ok(Value::Float(num(0)?.to_degrees())),
        "floor" => match args.first() {
            Some(v @ (Value::Int(_) | Value::Bool(_))) => Ok(Value::Int(v.as_int().unwrap_or(0))),
            _ => to_int(num(0)?.floor()),
        },
        "ceil" => match args.first() {
            Some(v @ (Value::Int(_) | Value::Bool(_))) => Ok(Value::Int(v.as_int().unwrap_or(0))),
            _ => to_int(num(0)?.ceil()),
        },
        "trunc" => to_int(num(0)?.trunc()),
        "fabs" => Ok(Value::Float(num(0)?.abs())),
        "hypot" => {
            let total: f64 = args
                .iter()
                .map(|a| a.expect_f64("hypot() argument").map(|v| v * v))
                .sum::<Result<f64, Raise>>()?;
            Ok(Value::Float(total.sqrt()))
        }
        "pow" => {
            let (x, y) = (num(0)?, num(1)?);
            if x == 0.0 && y < 0.0 {
                return Err(domain_error());
            }
            checked(x.powf(y))
        }
        "exp" => {
            let v = num(0)?.exp();
            if v.is_infinite() {
                return Err(Raise::new("OverflowError", "math range error"));
            }
            Ok(Value::Float(v))
        }
        "log" | "log10" | "log2" => {
            let x = num(0)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            let v = match name {
                "log10" => x.log10(),
                "log2" => x.log2(),
                _ if args.len() > 1 => {
                    let base = num(1)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error());
                    }
                    x.ln() / base.ln()
                }
                _ => x.ln(),
            };
            Ok(Value::Float(v))
        }
        "isfinite" => Ok(Value::Bool(num(0)?.is_finite())),
        "isinf" => Ok(Value::Bool(num(0)?.is_infinite())),
        "isnan" => Ok(Value::Bool(num(0)?.is_nan())),
        other => Err(no_attribute(&Value::Module(Module::Math), other)),
    }
}

fn time_call(name: &str, args: &[Value]) -> Result<Value, Raise> {
    match name {
        "sleep" => {
            let secs = args
                .first()
                .ok_or_else(|| Raise::type_error("sleep() takes exactly one argument (0 given)"))?
                .expect_f64("sleep() argument")?;
            if secs < 0.0 {
                return Err(Raise::value_error("sleep length must be non-negative"));
            }
            // Simulated runs never block.
            Ok(Value::None)
        }
        _ => {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            Ok(Value::Float(now))
        }
    }
}

fn list_call(items: &Rc<RefCell<Vec<Value>>>, name: &str, args: Vec<Value>) -> Result<Value, Raise> {
    let one = |args: &[Value]| -> Result<Value, Raise> {
        args.first()
            .cloned()
            .ok_or_else(|| Raise::type_error(format!("{}() takes exactly one argument (0 given)", name)))
    };
    match name {
        "append" => {
            let v = one(&args)?;
            let mut list = items.borrow_mut();
            if list.len() >= MAX_SEQUENCE_LEN {
                return Err(Raise::new("MemoryError", "list too large"));
            }
            list.push(v);
            Ok(Value::None)
        }
        "extend" => {
            let extra = collect(&one(&args)?)?;
            let mut list = items.borrow_mut();
            if list.len() + extra.len() > MAX_SEQUENCE_LEN {
                return Err(Raise::new("MemoryError", "list too large"));
            }
            list.extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            let mut list = items.borrow_mut();
            if list.is_empty() {
                return Err(Raise::new("IndexError", "pop from empty list"));
            }
            let len = list.len() as i64;
            let i = match args.first() {
                Some(v) => v.expect_int("pop index")?,
                None => len - 1,
            };
            let resolved = if i < 0 { i + len } else { i };
            if resolved < 0 || resolved >= len {
                return Err(Raise::new("IndexError", "pop index out of range"));
            }
            Ok(list.remove(resolved as usize))
        }
        "insert" => {
            let [index, value] = args.as_slice() else {
                return Err(Raise::type_error("insert expected 2 arguments"));
            };
            let mut list = items.borrow_mut();
            let len = list.len() as i64;
            let i = index.expect_int("insert index")?;
            let resolved = if i < 0 { (i + len).max(0) } else { i.min(len) };
            list.insert(resolved as usize, value.clone());
            Ok(Value::None)
        }
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }
        "index" => {
            let needle = one(&args)?;
            items
                .borrow()
                .iter()
                .position(|v| py_eq(v, &needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| Raise::value_error(format!("{} is not in list", needle.repr())))
        }
        "count" => {
            let needle = one(&args)?;
            let n = items.borrow().iter().filter(|v| py_eq(v, &needle)).count();
            Ok(Value::Int(n as i64))
        }
        "clear" => {
            items.borrow_mut().clear();
            Ok(Value::None)
        }
        other => Err(no_attribute(&Value::List(items.clone()), other)),
    }
}

fn str_call(s: &Rc<str>, name: &str, args: Vec<Value>) -> Result<Value, Raise> {
    let str_arg = |i: usize| -> Result<Rc<str>, Raise> {
        match args.get(i) {
            Some(Value::Str(v)) => Ok(v.clone()),
            Some(other) => Err(Raise::type_error(format!(
                "must be str, not {}",
                other.type_name()
            ))),
            None => Err(Raise::type_error(format!("{}() missing argument", name))),
        }
    };
    Ok(match name {
        "upper" => Value::str(s.to_uppercase()),
        "lower" => Value::str(s.to_lowercase()),
        "strip" => Value::str(s.trim()),
        "lstrip" => Value::str(s.trim_start()),
        "rstrip" => Value::str(s.trim_end()),
        "format" => Value::str(str_format(s, &args)?),
        "join" => {
            let parts = collect(args.first().unwrap_or(&Value::None))?;
            let mut out = String::new();
            for (i, part) in parts.iter().enumerate() {
                let Value::Str(p) = part else {
                    return Err(Raise::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        i,
                        part.type_name()
                    )));
                };
                if i > 0 {
                    out.push_str(s);
                }
                out.push_str(p);
                if out.len() > MAX_SEQUENCE_LEN {
                    return Err(Raise::new("MemoryError", "string too large"));
                }
            }
            Value::str(out)
        }
        "split" => {
            let pieces: Vec<Value> = match args.first() {
                None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
                Some(_) => {
                    let sep = str_arg(0)?;
                    if sep.is_empty() {
                        return Err(Raise::value_error("empty separator"));
                    }
                    s.split(sep.as_ref()).map(Value::str).collect()
                }
            };
            Value::list(pieces)
        }
        "replace" => {
            let (from, to) = (str_arg(0)?, str_arg(1)?);
            let hits = if from.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(from.as_ref()).count()
            };
            if s.len() + hits.saturating_mul(to.len()) > MAX_SEQUENCE_LEN {
                return Err(Raise::new("MemoryError", "string too large"));
            }
            Value::str(s.replace(from.as_ref(), &to))
        }
        "startswith" => Value::Bool(s.starts_with(str_arg(0)?.as_ref())),
        "endswith" => Value::Bool(s.ends_with(str_arg(0)?.as_ref())),
        other => return Err(no_attribute(&Value::Str(s.clone()), other)),
    })
}
