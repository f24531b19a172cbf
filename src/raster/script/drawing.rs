use super::builtins::{arg, reject_kwargs, required};
use super::errors::Raise;
use super::interp::{Interpreter, collect};
use super::value::Value;
use crate::core::domain::Rgb;
use crate::raster::color::{ColorMode, describe, from_components, parse_color};

pub(super) const TURTLE_METHODS: &[&str] = &[
    "forward", "fd", "backward", "bk", "back", "right", "rt", "left", "lt", "goto", "setpos",
    "setposition", "setx", "sety", "setheading", "seth", "home", "circle", "dot", "stamp",
    "speed", "pos", "position", "xcor", "ycor", "heading", "towards", "distance", "pendown",
    "pd", "down", "penup", "pu", "up", "pensize", "width", "pencolor", "fillcolor", "color",
    "begin_fill", "end_fill", "filling", "hideturtle", "ht", "showturtle", "st", "isdown",
    "isvisible", "reset", "clear", "write", "shape", "shapesize", "turtlesize", "tilt",
    "settiltangle", "clearstamps", "getscreen", "push", "pop",
];

pub(super) const SCREEN_METHODS: &[&str] = &[
    "bgcolor", "colormode", "clear", "clearscreen", "reset", "resetscreen", "turtles",
    "textinput", "numinput", "window_width", "window_height", "tracer", "update", "title",
    "setup", "screensize", "delay", "listen", "onkey", "onkeypress", "onkeyrelease", "onclick",
    "onscreenclick", "ontimer", "mainloop", "done", "exitonclick", "bye",
];

const CONSTRUCTORS: &[&str] = &["Turtle", "RawTurtle", "Pen", "RawPen"];

pub(super) fn is_module_function(name: &str) -> bool {
    CONSTRUCTORS.contains(&name)
        || matches!(name, "Screen" | "getscreen" | "getturtle" | "getpen")
        || TURTLE_METHODS.contains(&name)
        || SCREEN_METHODS.contains(&name)
}

fn graphics_error(msg: impl Into<String>) -> Raise {
    Raise::new("TurtleGraphicsError", msg)
}

fn speed_value(v: &Value) -> Result<f64, Raise> {
    if let Value::Str(name) = v {
        return match name.as_ref() {
            "fastest" => Ok(0.0),
            "fast" => Ok(10.0),
            "normal" => Ok(6.0),
            "slow" => Ok(3.0),
            "slowest" => Ok(1.0),
            other => Err(graphics_error(format!("bad speed: '{}'", other))),
        };
    }
    let s = v.expect_f64("speed")?;
    Ok(if (0.5..=10.5).contains(&s) { s.round() } else { 0.0 })
}

impl Interpreter<'_> {
    pub(super) fn turtle_module_call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        if CONSTRUCTORS.contains(&name) {
            let label = format!("turtle{}", self.turtles.len());
            return Ok(Value::Turtle(self.new_turtle(&label)));
        }
        match name {
            "Screen" | "getscreen" => Ok(Value::Screen),
            "getturtle" | "getpen" => Ok(Value::Turtle(0)),
            n if TURTLE_METHODS.contains(&n) => self.turtle_call(0, name, args, kwargs),
            _ => self.screen_call(name, args, kwargs),
        }
    }

    /// Parses a colour given as a string, a 3-sequence or three numbers.
    fn color_arg(&self, args: &[Value]) -> Result<Rgb, Raise> {
        match args {
            [Value::Str(s)] => {
                parse_color(s).ok_or_else(|| graphics_error(format!("bad color string: {}", s)))
            }
            [seq @ (Value::Tuple(_) | Value::List(_))] => self.color_arg(&collect(seq)?),
            [r, g, b] => {
                let parts = (r.as_f64(), g.as_f64(), b.as_f64());
                let (Some(r), Some(g), Some(b)) = parts else {
                    return Err(graphics_error("bad color arguments"));
                };
                from_components(r, g, b, self.color_mode).ok_or_else(|| {
                    graphics_error(format!("bad color sequence: ({}, {}, {})", r, g, b))
                })
            }
            _ => Err(graphics_error("bad color arguments")),
        }
    }

    fn point_arg(
        &self,
        args: &[Value],
        kwargs: &[(String, Value)],
        func: &str,
    ) -> Result<(f64, f64), Raise> {
        match args {
            [Value::Turtle(i)] => Ok(self.turtles[*i].position()),
            [seq @ (Value::Tuple(_) | Value::List(_))] => self.point_arg(&collect(seq)?, &[], func),
            _ => {
                let x = required(args, kwargs, 0, "x", func)?.expect_f64("x")?;
                let y = required(args, kwargs, 1, "y", func)?.expect_f64("y")?;
                Ok((x, y))
            }
        }
    }

    pub(super) fn turtle_call(
        &mut self,
        idx: usize,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        let num = |i: usize, key: &str| -> Result<f64, Raise> {
            required(&args, &kwargs, i, key, name)?.expect_f64(key)
        };
        let canvas = &mut self.canvas;
        let turtle = &mut self.turtles[idx];

        match name {
            "forward" | "fd" => turtle.forward(canvas, num(0, "distance")?),
            "backward" | "bk" | "back" => turtle.backward(canvas, num(0, "distance")?),
            "right" | "rt" => turtle.right(num(0, "angle")?),
            "left" | "lt" => turtle.left(num(0, "angle")?),
            "goto" | "setpos" | "setposition" => {
                let (x, y) = self.point_arg(&args, &kwargs, name)?;
                self.turtles[idx].goto(&mut self.canvas, x, y);
            }
            "setx" => turtle.set_x(canvas, num(0, "x")?),
            "sety" => turtle.set_y(canvas, num(0, "y")?),
            "setheading" | "seth" => turtle.set_heading(num(0, "to_angle")?),
            "home" => turtle.home(canvas),
            "circle" => {
                let radius = num(0, "radius")?;
                let extent = arg(&args, &kwargs, 1, "extent")
                    .map(|v| v.expect_f64("extent"))
                    .transpose()?;
                let steps = arg(&args, &kwargs, 2, "steps")
                    .map(|v| v.expect_int("steps"))
                    .transpose()?
                    .map(|s| s.max(1) as usize);
                turtle.circle(canvas, &mut *self.watchdog, radius, extent, steps)?;
            }
            "dot" => {
                let (size, rest) = match args.first() {
                    Some(Value::None) => (None, &args[1..]),
                    Some(v) if v.as_f64().is_some() => (v.as_f64(), &args[1..]),
                    _ => (None, &args[..]),
                };
                let color = if rest.is_empty() {
                    None
                } else {
                    Some(self.color_arg(rest)?)
                };
                self.turtles[idx].dot(&mut self.canvas, size, color);
            }
            "stamp" => return Ok(Value::Int(idx as i64 + 1)),
            "speed" => match arg(&args, &kwargs, 0, "speed") {
                None => return Ok(Value::number(turtle.speed())),
                Some(v) => turtle.set_speed(speed_value(v)?),
            },
            "pos" | "position" => {
                let (x, y) = turtle.position();
                return Ok(Value::tuple(vec![Value::Float(x), Value::Float(y)]));
            }
            "xcor" => return Ok(Value::Float(turtle.position().0)),
            "ycor" => return Ok(Value::Float(turtle.position().1)),
            "heading" => return Ok(Value::Float(turtle.heading())),
            "towards" => {
                let (x, y) = self.point_arg(&args, &kwargs, name)?;
                return Ok(Value::Float(self.turtles[idx].towards(x, y)));
            }
            "distance" => {
                let (x, y) = self.point_arg(&args, &kwargs, name)?;
                return Ok(Value::Float(self.turtles[idx].distance(x, y)));
            }
            "pendown" | "pd" | "down" => turtle.put_pen_down(),
            "penup" | "pu" | "up" => turtle.pen_up(),
            "pensize" | "width" => match arg(&args, &kwargs, 0, "width") {
                None => return Ok(Value::number(turtle.pen_size())),
                Some(v) => {
                    let size = v.expect_f64("width")?;
                    if !(size > 0.0) {
                        return Err(graphics_error(format!("bad pen size: {}", size)));
                    }
                    turtle.set_pen_size(size);
                }
            },
            "pencolor" | "fillcolor" => {
                if args.is_empty() {
                    let current = if name == "pencolor" {
                        turtle.pen_color()
                    } else {
                        turtle.fill_color()
                    };
                    return Ok(Value::str(describe(current)));
                }
                let color = self.color_arg(&args)?;
                let turtle = &mut self.turtles[idx];
                if name == "pencolor" {
                    turtle.set_pen_color(color);
                } else {
                    turtle.set_fill_color(color);
                }
            }
            "color" => {
                let (pen, fill) = match args.as_slice() {
                    [] => {
                        return Ok(Value::tuple(vec![
                            Value::str(describe(turtle.pen_color())),
                            Value::str(describe(turtle.fill_color())),
                        ]));
                    }
                    [both] => {
                        let c = self.color_arg(std::slice::from_ref(both))?;
                        (c, c)
                    }
                    [pen, fill] => (
                        self.color_arg(std::slice::from_ref(pen))?,
                        self.color_arg(std::slice::from_ref(fill))?,
                    ),
                    many => {
                        let c = self.color_arg(many)?;
                        (c, c)
                    }
                };
                let turtle = &mut self.turtles[idx];
                turtle.set_pen_color(pen);
                turtle.set_fill_color(fill);
            }
            "begin_fill" => turtle.begin_fill(),
            "end_fill" => turtle.end_fill(canvas),
            "filling" => return Ok(Value::Bool(turtle.filling())),
            "hideturtle" | "ht" => turtle.hide(),
            "showturtle" | "st" => turtle.show(),
            "isdown" => return Ok(Value::Bool(turtle.is_down())),
            "isvisible" => return Ok(Value::Bool(turtle.is_visible())),
            "reset" => {
                canvas.clear();
                turtle.reset();
            }
            "clear" => canvas.clear(),
            "push" => turtle.push(),
            "pop" => turtle.pop(),
            "getscreen" => return Ok(Value::Screen),
            "shape" if args.is_empty() => return Ok(Value::str("classic")),
            "write" | "shape" | "shapesize" | "turtlesize" | "tilt" | "settiltangle"
            | "clearstamps" => {}
            other => {
                return Err(Raise::new(
                    "AttributeError",
                    format!("'Turtle' object has no attribute '{}'", other),
                ));
            }
        }
        self.watchdog.charge(self.canvas.take_work())?;
        Ok(Value::None)
    }

    pub(super) fn screen_call(
        &mut self,
        name: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raise> {
        match name {
            "bgcolor" => {
                if args.is_empty() {
                    return Ok(Value::str(describe(self.canvas.background())));
                }
                let color = self.color_arg(&args)?;
                self.canvas.set_background(color);
            }
            "colormode" => {
                let Some(mode) = arg(&args, &kwargs, 0, "cmode") else {
                    return Ok(match self.color_mode {
                        ColorMode::Unit => Value::Float(1.0),
                        ColorMode::Byte => Value::Int(255),
                    });
                };
                self.color_mode = match mode.expect_f64("cmode")? {
                    v if v == 1.0 => ColorMode::Unit,
                    v if v == 255.0 => ColorMode::Byte,
                    v => return Err(graphics_error(format!("bad colormode: {}", v))),
                };
            }
            "clear" | "clearscreen" | "reset" | "resetscreen" => {
                self.canvas.clear();
                for turtle in &mut self.turtles {
                    turtle.reset();
                }
            }
            "turtles" => {
                let all = (0..self.turtles.len()).map(Value::Turtle).collect();
                return Ok(Value::list(all));
            }
            "textinput" => {
                reject_kwargs(name, &kwargs, &["title", "prompt"])?;
                return Ok(Value::str(""));
            }
            "numinput" => {
                return Ok(arg(&args, &kwargs, 2, "default")
                    .cloned()
                    .unwrap_or(Value::Int(0)));
            }
            "window_width" => return Ok(Value::Int(self.canvas.size().width as i64)),
            "window_height" => return Ok(Value::Int(self.canvas.size().height as i64)),
            n if SCREEN_METHODS.contains(&n) => {}
            other => {
                return Err(Raise::new(
                    "AttributeError",
                    format!("'_Screen' object has no attribute '{}'", other),
                ));
            }
        }
        self.watchdog.charge(self.canvas.take_work())?;
        Ok(Value::None)
    }
}
