use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::ast::{BinOp, Expr, FPart, ImportNames, Stmt, StmtKind, Target, UnaryOp};
use super::errors::{Raise, ScriptError};
use super::value::{
    Builtin, Function, MAX_SEQUENCE_LEN, Module, Value, binary, compare, format_with_spec,
    range_len,
};
use crate::core::domain::{CanvasSize, Rgb};
use crate::raster::canvas::Canvas;
use crate::raster::color::ColorMode;
use crate::raster::turtle::DrawingInstance;
use crate::raster::watchdog::Watchdog;

const MAX_CALL_DEPTH: usize = 300;
const MAX_PRINTED_BYTES: usize = 1 << 20;

pub(super) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Frame {
    locals: HashMap<String, Value>,
    globals: HashSet<String>,
}

/// Tree-walking evaluator for the supported script subset. Instance 0 is the
/// anonymous pen that module-level drawing functions act on.
pub struct Interpreter<'w> {
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    pub(super) canvas: Canvas,
    pub(super) turtles: Vec<DrawingInstance>,
    pub(super) color_mode: ColorMode,
    printed: String,
    pub(super) watchdog: &'w mut Watchdog,
}

#[derive(Debug)]
pub struct Finished {
    pub canvas: Canvas,
    pub instances: Vec<DrawingInstance>,
    pub printed: String,
}

impl<'w> Interpreter<'w> {
    pub fn new(size: CanvasSize, default_instance: &str, watchdog: &'w mut Watchdog) -> Self {
        let mut globals = HashMap::new();
        globals.insert("turtle".to_string(), Value::Module(Module::Turtle));
        globals.insert("screen".to_string(), Value::Screen);
        Self {
            globals,
            frames: Vec::new(),
            canvas: Canvas::new(size, Rgb::WHITE),
            turtles: vec![DrawingInstance::new(default_instance)],
            color_mode: ColorMode::Unit,
            printed: String::new(),
            watchdog,
        }
    }

    pub fn bind(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn new_turtle(&mut self, name: &str) -> usize {
        self.turtles.push(DrawingInstance::new(name));
        self.turtles.len() - 1
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), ScriptError> {
        match self.exec_block(program)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(ScriptError::syntax(0, "'return' outside function")),
            Flow::Break | Flow::Continue => Err(ScriptError::syntax(0, "'break' outside loop")),
        }
    }

    /// Distinct drawing instances bound to `names`, in order; every created
    /// instance when none of the names holds one.
    pub fn collect_instances(&self, names: &[String]) -> Vec<usize> {
        let mut found: Vec<usize> = Vec::new();
        for name in names {
            if let Some(Value::Turtle(idx)) = self.globals.get(name) {
                if !found.contains(idx) {
                    found.push(*idx);
                }
            }
        }
        if found.is_empty() {
            found = (0..self.turtles.len())
                .filter(|i| *i > 0 || self.turtles[0].touched() || self.turtles.len() == 1)
                .collect();
        }
        found
    }

    pub fn finish(self) -> Finished {
        Finished {
            canvas: self.canvas,
            instances: self.turtles,
            printed: self.printed,
        }
    }

    pub(super) fn print(&mut self, text: &str) {
        let room = MAX_PRINTED_BYTES.saturating_sub(self.printed.len());
        if room == 0 {
            return;
        }
        let mut cut = text.len().min(room);
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.printed.push_str(&text[..cut]);
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.watchdog.tick().map_err(ScriptError::Interrupted)?;
        let line = stmt.line;
        let at = |r: Raise| r.at(line);
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e).map_err(at)?;
            }
            StmtKind::Assign(targets, value) => {
                let v = self.eval(value).map_err(at)?;
                for target in targets {
                    self.assign(target, v.clone()).map_err(at)?;
                }
            }
            StmtKind::AugAssign(target, op, value) => {
                self.aug_assign(target, *op, value).map_err(at)?;
            }
            StmtKind::If(branches, other) => {
                for (cond, body) in branches {
                    if self.eval(cond).map_err(at)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = other {
                    return self.exec_block(body);
                }
            }
            StmtKind::While(cond, body) => loop {
                self.watchdog.tick().map_err(ScriptError::Interrupted)?;
                if !self.eval(cond).map_err(at)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For(target, iter, body) => {
                let iterable = self.eval(iter).map_err(at)?;
                for item in SeqIter::new(&iterable).map_err(at)? {
                    self.watchdog.tick().map_err(ScriptError::Interrupted)?;
                    self.assign(target, item).map_err(at)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::Def(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for (_, default) in &def.params {
                    defaults.push(match default {
                        Some(e) => Some(self.eval(e).map_err(at)?),
                        None => None,
                    });
                }
                let function = Function {
                    def: def.clone(),
                    defaults,
                };
                self.store(&def.name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e).map_err(at)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(v));
            }
            StmtKind::Global(names) => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.globals.extend(names.iter().cloned());
                }
            }
            StmtKind::Import(modules) => {
                for (name, alias) in modules {
                    let module = import(name).map_err(at)?;
                    self.store(alias.as_deref().unwrap_or(name), Value::Module(module));
                }
            }
            StmtKind::ImportFrom(name, names) => {
                let module = import(name).map_err(at)?;
                match names {
                    // Star-imported turtle names resolve through the module
                    // fallback in `lookup`.
                    ImportNames::All if module == Module::Turtle => {}
                    ImportNames::All => {
                        for attr in super::builtins::module_exports(module) {
                            let v = self.get_attr(&Value::Module(module), attr).map_err(at)?;
                            self.store(attr, v);
                        }
                    }
                    ImportNames::Names(items) => {
                        for (attr, alias) in items {
                            let v = self.get_attr(&Value::Module(module), attr).map_err(|_| {
                                ScriptError::Runtime {
                                    line,
                                    kind: "ImportError",
                                    msg: format!("cannot import name '{}' from '{}'", attr, name),
                                }
                            })?;
                            self.store(alias.as_deref().unwrap_or(attr), v);
                        }
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn store(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            if !frame.globals.contains(name) {
                frame.locals.insert(name.to_string(), value);
                return;
            }
        }
        self.globals.insert(name.to_string(), value);
    }

    fn lookup(&mut self, name: &str) -> Result<Value, Raise> {
        if let Some(frame) = self.frames.last() {
            if !frame.globals.contains(name) {
                if let Some(v) = frame.locals.get(name) {
                    return Ok(v.clone());
                }
            }
        }
        if let Some(v) = self.globals.get(name) {
            return Ok(v.clone());
        }
        if let Some(b) = Builtin::lookup(name) {
            return Ok(Value::Builtin(b));
        }
        self.get_attr(&Value::Module(Module::Turtle), name)
            .map_err(|_| Raise::new("NameError", format!("name '{}' is not defined", name)))
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), Raise> {
        match target {
            Target::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = collect(&value)?;
                if items.len() != targets.len() {
                    let msg = if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    };
                    return Err(Raise::value_error(msg));
                }
                for (t, v) in targets.iter().zip(items) {
                    self.assign(t, v)?;
                }
                Ok(())
            }
            Target::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                set_item(&base, &index, value)
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<(), Raise> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                if let (BinOp::Add, Value::List(list)) = (op, &current) {
                    let extra = collect(&rhs)?;
                    list.borrow_mut().extend(extra);
                    return Ok(());
                }
                let updated = binary(op, &current, &rhs)?;
                self.store(name, updated);
                Ok(())
            }
            Target::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                let current = get_item(&base, &index)?;
                let rhs = self.eval(value)?;
                set_item(&base, &index, binary(op, &current, &rhs)?)
            }
            Target::Tuple(_) => Err(Raise::new(
                "SyntaxError",
                "illegal expression for augmented assignment",
            )),
        }
    }

    pub(super) fn eval(&mut self, expr: &Expr) -> Result<Value, Raise> {
        Ok(match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(i) => Value::Int(*i),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::FStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FPart::Lit(s) => out.push_str(s),
                        FPart::Expr(e, spec) => {
                            let v = self.eval(e)?;
                            out.push_str(&format_with_spec(&v, spec.as_deref().unwrap_or(""))?);
                        }
                    }
                }
                Value::str(out)
            }
            Expr::Name(name) => self.lookup(name)?,
            Expr::List(items) => Value::list(self.eval_all(items)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items)?),
            Expr::ListComp {
                elt,
                target,
                iter,
                cond,
            } => {
                let iterable = self.eval(iter)?;
                let mut out = Vec::new();
                for item in SeqIter::new(&iterable)? {
                    self.watchdog.tick()?;
                    self.assign(target, item)?;
                    if let Some(cond) = cond {
                        if !self.eval(cond)?.truthy() {
                            continue;
                        }
                    }
                    if out.len() >= MAX_SEQUENCE_LEN {
                        return Err(Raise::new("MemoryError", "list too large"));
                    }
                    out.push(self.eval(elt)?);
                }
                Value::list(out)
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Pos => match v {
                        Value::Bool(b) => Value::Int(b as i64),
                        Value::Int(_) | Value::Float(_) => v,
                        other => return Err(bad_operand("+", &other)),
                    },
                    UnaryOp::Neg => match v {
                        Value::Bool(b) => Value::Int(-(b as i64)),
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .unwrap_or(Value::Float(-(i as f64))),
                        Value::Float(f) => Value::Float(-f),
                        other => return Err(bad_operand("-", &other)),
                    },
                }
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, &l, &r)?
            }
            Expr::And(left, right) => {
                let l = self.eval(left)?;
                if l.truthy() { self.eval(right)? } else { l }
            }
            Expr::Or(left, right) => {
                let l = self.eval(left)?;
                if l.truthy() { l } else { self.eval(right)? }
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, operand) in rest {
                    let right = self.eval(operand)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::IfExp { cond, then, other } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)?
                } else {
                    self.eval(other)?
                }
            }
            Expr::Call { func, args, kwargs } => {
                let f = self.eval(func)?;
                let args = self.eval_all(args)?;
                let mut kw = Vec::with_capacity(kwargs.len());
                for (name, e) in kwargs {
                    kw.push((name.clone(), self.eval(e)?));
                }
                self.call(&f, args, kw)?
            }
            Expr::Attr(base, name) => {
                let b = self.eval(base)?;
                self.get_attr(&b, name)?
            }
            Expr::Index(base, index) => {
                let b = self.eval(base)?;
                let i = self.eval(index)?;
                get_item(&b, &i)?
            }
        })
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, Raise> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    pub(super) fn call(
        &mut self,
        f: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        match f {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::Builtin(b) => self.call_builtin(*b, args, kwargs),
            Value::Method(receiver, name) => self.call_method(receiver, name, args, kwargs),
            other => Err(Raise::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Raise::new(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        let def = &func.def;
        let params = &def.params;
        if args.len() > params.len() {
            return Err(Raise::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                def.name,
                params.len(),
                args.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        slots.resize(params.len(), None);
        for (key, value) in kwargs {
            let Some(i) = params.iter().position(|(p, _)| *p == key) else {
                return Err(Raise::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    def.name, key
                )));
            };
            if slots[i].is_some() {
                return Err(Raise::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    def.name, key
                )));
            }
            slots[i] = Some(value);
        }

        let mut locals = HashMap::with_capacity(params.len());
        for (i, slot) in slots.into_iter().enumerate() {
            let value = match slot.or_else(|| func.defaults[i].clone()) {
                Some(v) => v,
                None => {
                    return Err(Raise::type_error(format!(
                        "{}() missing required positional argument: '{}'",
                        def.name, params[i].0
                    )));
                }
            };
            locals.insert(params[i].0.clone(), value);
        }

        self.frames.push(Frame {
            locals,
            globals: HashSet::new(),
        });
        let body = def.body.clone();
        let result = self.exec_block(&body);
        self.frames.pop();

        match result {
            Ok(Flow::Return(v)) => Ok(v),
            Ok(Flow::Normal) => Ok(Value::None),
            Ok(Flow::Break | Flow::Continue) => Err(Raise::new(
                "SyntaxError",
                "'break' or 'continue' outside loop",
            )),
            Err(e) => Err(Raise::Located(e)),
        }
    }
}

fn import(name: &str) -> Result<Module, Raise> {
    Module::from_name(name).ok_or_else(|| {
        Raise::new(
            "ImportError",
            format!("import of '{}' is not allowed", name),
        )
    })
}

fn bad_operand(op: &str, v: &Value) -> Raise {
    Raise::type_error(format!(
        "bad operand type for unary {}: '{}'",
        op,
        v.type_name()
    ))
}

/// Iterator over anything a `for` loop accepts. Ranges stay lazy.
pub(super) enum SeqIter {
    Range { next: i64, stop: i64, step: i64 },
    Items(std::vec::IntoIter<Value>),
}

impl SeqIter {
    pub fn new(value: &Value) -> Result<Self, Raise> {
        Ok(match value {
            Value::Range { start, stop, step } => SeqIter::Range {
                next: *start,
                stop: *stop,
                step: *step,
            },
            Value::List(items) => SeqIter::Items(items.borrow().clone().into_iter()),
            Value::Tuple(items) => SeqIter::Items(items.as_ref().clone().into_iter()),
            Value::Str(s) => SeqIter::Items(
                s.chars()
                    .map(|c| Value::str(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            other => {
                return Err(Raise::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )));
            }
        })
    }
}

impl Iterator for SeqIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            SeqIter::Range { next, stop, step } => {
                let more = (*step > 0 && *next < *stop) || (*step < 0 && *next > *stop);
                if !more {
                    return None;
                }
                let current = *next;
                *next = next.checked_add(*step).unwrap_or(*stop);
                Some(Value::Int(current))
            }
            SeqIter::Items(items) => items.next(),
        }
    }
}

/// Materialises an iterable, refusing anything beyond the sequence cap.
pub(super) fn collect(value: &Value) -> Result<Vec<Value>, Raise> {
    if matches!(value, Value::Range { .. }) && range_len(value) > MAX_SEQUENCE_LEN {
        return Err(Raise::new("MemoryError", "range too large to materialise"));
    }
    Ok(SeqIter::new(value)?.collect())
}

fn normalize_index(index: &Value, len: usize, what: &str) -> Result<usize, Raise> {
    let i = index.as_int().ok_or_else(|| {
        Raise::type_error(format!(
            "{} indices must be integers, not {}",
            what,
            index.type_name()
        ))
    })?;
    let len = len as i64;
    let resolved = if i < 0 { i + len } else { i };
    if resolved < 0 || resolved >= len {
        return Err(Raise::new(
            "IndexError",
            format!("{} index out of range", what),
        ));
    }
    Ok(resolved as usize)
}

pub(super) fn get_item(base: &Value, index: &Value) -> Result<Value, Raise> {
    match base {
        Value::List(items) => {
            let items = items.borrow();
            let i = normalize_index(index, items.len(), "list")?;
            Ok(items[i].clone())
        }
        Value::Tuple(items) => {
            let i = normalize_index(index, items.len(), "tuple")?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(index, chars.len(), "string")?;
            Ok(Value::str(chars[i].to_string()))
        }
        Value::Range { start, step, .. } => {
            let i = normalize_index(index, range_len(base), "range object")?;
            Ok(Value::Int(start + step * i as i64))
        }
        other => Err(Raise::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn set_item(base: &Value, index: &Value, value: Value) -> Result<(), Raise> {
    match base {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = normalize_index(index, items.len(), "list assignment")?;
            items[i] = value;
            Ok(())
        }
        other => Err(Raise::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}
