//! Interpreter for the Python subset that turtle submissions are written in.
//!
//! Only `turtle`, `math` and `time` can be imported and only the builtins in
//! [`value::Builtin`] are reachable. This narrows what a submission can touch
//! but it is not a security boundary: resource use is bounded solely by the
//! [`Watchdog`](crate::raster::watchdog::Watchdog).

mod ast;
mod builtins;
mod drawing;
pub mod errors;
mod interp;
mod lexer;
mod parser;
mod value;

pub use errors::ScriptError;
pub use interp::{Finished, Interpreter};
pub use parser::parse;
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::CanvasSize;
    use crate::raster::watchdog::{Interrupt, Watchdog};

    fn run(src: &str) -> Result<Finished, ScriptError> {
        let src = src.to_string();
        std::thread::Builder::new()
            .stack_size(crate::raster::INTERPRETER_STACK_BYTES)
            .spawn(move || {
                let mut watchdog = Watchdog::new(None, 200_000);
                let program = parse(&src)?;
                let mut interp = Interpreter::new(CanvasSize::default(), "t", &mut watchdog);
                interp.run(&program)?;
                Ok(interp.finish())
            })
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_square_program_returns_home() {
        let src = "import turtle\nt = turtle.Turtle()\nfor _ in range(4):\n    t.forward(100)\n    t.left(90)\n";
        let done = run(src).unwrap();
        let t = &done.instances[1];
        assert!(t.position().0.abs() < 1e-9 && t.position().1.abs() < 1e-9);
        assert_eq!(t.heading(), 90.0);
    }

    #[test]
    fn test_module_level_calls_drive_default_instance() {
        let src = "from turtle import *\npensize(3)\nforward(50)\nright(90)\n";
        let done = run(src).unwrap();
        let t = &done.instances[0];
        assert_eq!(t.pen_size(), 3.0);
        assert!((t.position().1 - 50.0).abs() < 1e-9);
        assert_eq!(t.heading(), 0.0);
    }

    #[test]
    fn test_functions_defaults_and_recursion() {
        let src = "\
def spiral(n, step=5):
    if n == 0:
        return 0
    forward(step)
    left(10)
    return 1 + spiral(n - 1, step)

count = spiral(20)
print(count, sep='')
";
        let done = run(src).unwrap();
        assert_eq!(done.printed, "20\n");

        let err = run("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { kind: "RecursionError", .. }));
    }

    #[test]
    fn test_infinite_loop_is_interrupted() {
        let err = run("while True:\n    forward(1)\n").unwrap_err();
        assert_eq!(err, ScriptError::Interrupted(Interrupt::StepBudget));
    }

    #[test]
    fn test_disallowed_import_is_rejected() {
        let err = run("import os\nos.system('true')\n").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { kind: "ImportError", line: 1, .. }));
    }

    #[test]
    fn test_huge_format_widths_raise_instead_of_allocating() {
        let err = run("x = f\"{1:999999999999999}\"\n").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { kind: "ValueError", line: 1, .. }));
        let err = run("y = 2\nx = '{:.99999999999f}'.format(1.0)\n").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { kind: "ValueError", line: 2, .. }));
    }

    #[test]
    fn test_runtime_errors_carry_line_numbers() {
        let err = run("x = 1\ny = x / 0\n").unwrap_err();
        assert!(matches!(
            err,
            ScriptError::Runtime { kind: "ZeroDivisionError", line: 2, .. }
        ));
    }

    #[test]
    fn test_fstrings_builtins_and_lists() {
        let src = "\
sides = [3, 4, 5]
sides.append(6)
total = sum(sides)
names = [str(s) for s in sides if s % 2 == 0]
print(f'{total} {len(sides)} {max(sides)} {round(2.5)} {3.14159:.2f}')
print(', '.join(names))
";
        let done = run(src).unwrap();
        assert_eq!(done.printed, "18 4 6 2 3.14\n4, 6\n");
    }

    #[test]
    fn test_colors_and_colormode() {
        let src = "\
import turtle
screen = turtle.Screen()
screen.colormode(255)
t = turtle.Turtle()
t.color((255, 0, 0), 'blue')
t.pencolor(0, 128, 0)
";
        let done = run(src).unwrap();
        let t = &done.instances[1];
        assert_eq!(t.pen_color(), crate::core::domain::Rgb(0, 128, 0));
        assert_eq!(t.fill_color(), crate::core::domain::Rgb(0, 0, 255));

        let err = run("import turtle\nturtle.pencolor('not-a-colour')\n").unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { kind: "TurtleGraphicsError", .. }));
    }

    #[test]
    fn test_blocking_calls_are_harmless() {
        let src = "\
import turtle, time
name = input('name? ')
size = turtle.numinput('size', 'size?', 40)
time.sleep(5)
turtle.forward(size)
turtle.done()
";
        let done = run(src).unwrap();
        assert!((done.instances[0].position().1 - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_global_statement() {
        let src = "\
count = 0
def bump():
    global count
    count += 1
for _ in range(3):
    bump()
print(count)
";
        assert_eq!(run(src).unwrap().printed, "3\n");
    }
}
