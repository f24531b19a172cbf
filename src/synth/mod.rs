//! Builds the self-contained python program that wraps a submission.
//!
//! The script pre-creates every detected drawing object, runs the submission
//! inside a guarded block and, after a settle delay, prints the serialized
//! state of each object between sentinel lines (see [`protocol`]). A failure
//! anywhere prints the message and traceback between the error sentinels and
//! exits with status 1. Nothing is written to disk by the script itself.

pub mod errors;
pub mod protocol;

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};

use crate::analyzer::detect_instances_or_default;
use crate::constants::{
    DEFAULT_INSTANCE, ERROR_BEGIN_MARKER, ERROR_END_MARKER, MARKER_PREFIX, STATE_BEGIN_MARKER,
    STATE_END_MARKER,
};
use crate::core::domain::SubmissionCode;
use errors::SynthesisError;

/// A blocking call standing alone on its line, optionally followed by a comment.
static BLOCKING_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mR)^([ \t]*)((?:[A-Za-z_]\w*\.)*)(mainloop|exitonclick|done|bye)[ \t]*\([ \t]*\)[ \t]*(?:#.*)?$",
    )
    .expect("blocking call pattern is valid")
});
static FUNCTION_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*def[ \t]+([A-Za-z_]\w*)").expect("def pattern is valid")
});
static INPUT_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\binput\s*\(").expect("input pattern is valid"));
static TEXT_INPUT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Za-z_]\w*\.)*textinput\s*\(").expect("textinput pattern is valid")
});
static NUM_INPUT_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Za-z_]\w*\.)*numinput\s*\(").expect("numinput pattern is valid")
});

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

const PRELUDE: &str = r#"
import io
import sys
import time
import traceback


def _tg_escape(line):
    if line.startswith(_TG_ESCAPE) or line.startswith(_TG_PREFIX):
        return _TG_ESCAPE + line
    return line


def _tg_emit(begin, end, text):
    lines = [begin]
    lines.extend(_tg_escape(line) for line in text.splitlines())
    lines.append(end)
    sys.stdout.write("\n".join(lines) + "\n")
    sys.stdout.flush()


def _tg_no_input(*args, **kwargs):
    return ""


def _tg_no_numinput(title=None, prompt=None, default=None, *args, **kwargs):
    return default if default is not None else 0


def _tg_number(value):
    return "%.2f" % (round(float(value), 2) + 0.0)


def _tg_field(out, label, getter):
    try:
        out.write("%s: %s\n" % (label, getter()))
    except Exception as exc:
        out.write("%s: Error %s\n" % (label, exc))


def _tg_collect(namespace):
    found = []
    seen = set()
    for name in _TG_INSTANCES:
        obj = namespace.get(name)
        if obj is None or id(obj) in seen or not hasattr(obj, "heading"):
            continue
        seen.add(id(obj))
        found.append(obj)
    if not found:
        try:
            found = list(namespace["turtle"].getscreen().turtles())
        except Exception:
            found = []
    return found


def _tg_serialize(namespace):
    out = io.StringIO()
    drawings = _tg_collect(namespace)
    out.write("Number of turtles: %d\n" % len(drawings))
    for index, turt in enumerate(drawings):
        out.write("\nTurtle %d:\n" % (index + 1))
        _tg_field(out, "Position", lambda: "%s, %s" % tuple(_tg_number(v) for v in turt.position()))
        _tg_field(out, "Heading", lambda: _tg_number(turt.heading()))
        _tg_field(out, "Pen down", lambda: turt.isdown())
        _tg_field(out, "Pen color", lambda: turt.pencolor())
        _tg_field(out, "Fill color", lambda: turt.fillcolor())
        _tg_field(out, "Pen size", lambda: turt.pensize())
        _tg_field(out, "Visible", lambda: turt.isvisible())
    return out.getvalue()


def _tg_describe(exc):
    return "ERROR: %s\n\nTraceback:\n%s" % (exc, traceback.format_exc())


def _tg_shutdown(namespace):
    try:
        namespace["turtle"].bye()
    except Exception:
        pass


_tg_error = None
"#;

const SETUP: &str = r#"    import turtle
    from turtle import *

    try:
        screen = turtle.Screen()
    except Exception:
        screen = turtle.getscreen()
    try:
        screen.tracer(0)
    except Exception:
        pass
"#;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxScript {
    pub text: String,
    pub instances: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Synthesizer {
    settle_delay: Duration,
}

impl Synthesizer {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }

    #[tracing::instrument(skip(self, code), fields(len = code.text.len()))]
    pub fn synthesize(&self, code: &SubmissionCode) -> Result<SandboxScript, SynthesisError> {
        validate(&code.text)?;

        let sanitized = sanitize(&code.text);
        let body = normalize_indentation(&sanitized);
        if body.trim().is_empty() {
            return Err(SynthesisError::EmptySubmission);
        }

        let mut instances: Vec<String> = detect_instances_or_default(&body)
            .into_iter()
            .filter(|name| is_identifier(name))
            .collect();
        if instances.is_empty() {
            instances.push(DEFAULT_INSTANCE.to_string());
        }
        tracing::debug!(?instances, "synthesizing sandbox script");

        let text = self.render(&body, &instances);
        Ok(SandboxScript { text, instances })
    }

    fn render(&self, body: &str, instances: &[String]) -> String {
        let mut script = String::with_capacity(body.len() + PRELUDE.len() + 2048);
        script.push_str("# -*- coding: utf-8 -*-\n");
        script.push_str("# Synthesized sandbox script. Generated code, do not edit.\n");
        let _ = writeln!(script, "_TG_STATE_BEGIN = {:?}", STATE_BEGIN_MARKER);
        let _ = writeln!(script, "_TG_STATE_END = {:?}", STATE_END_MARKER);
        let _ = writeln!(script, "_TG_ERROR_BEGIN = {:?}", ERROR_BEGIN_MARKER);
        let _ = writeln!(script, "_TG_ERROR_END = {:?}", ERROR_END_MARKER);
        let _ = writeln!(script, "_TG_PREFIX = {:?}", MARKER_PREFIX);
        script.push_str("_TG_ESCAPE = \"\\\\\"\n");
        let quoted: Vec<String> = instances.iter().map(|i| format!("{:?}", i)).collect();
        let _ = writeln!(script, "_TG_INSTANCES = [{}]", quoted.join(", "));
        script.push_str(PRELUDE);

        script.push_str("\ntry:\n");
        script.push_str(SETUP);
        for instance in instances {
            script.push_str(&instance_init(instance));
        }
        script.push_str("\n    # submission\n");
        script.push_str(&indent(body, 4));
        script.push_str("\n    # end of submission\n");
        script.push_str("except SystemExit:\n    pass\n");
        script.push_str("except BaseException as _tg_exc:\n    _tg_error = _tg_describe(_tg_exc)\n");

        let _ = write!(
            script,
            r#"
if _tg_error is None:
    try:
        time.sleep({settle:.3})
        _tg_state = _tg_serialize(globals())
    except BaseException as _tg_exc:
        _tg_error = _tg_describe(_tg_exc)

if _tg_error is None:
    _tg_emit(_TG_STATE_BEGIN, _TG_STATE_END, _tg_state)
    _tg_shutdown(globals())
    sys.exit(0)

sys.stdout.write("Error running code\n")
_tg_emit(_TG_ERROR_BEGIN, _TG_ERROR_END, _tg_error)
_tg_shutdown(globals())
sys.exit(1)
"#,
            settle = self.settle_delay.as_secs_f64()
        );

        script
    }
}

/// Default instance binds to the anonymous pen so module-level calls and the
/// synthesized handle refer to the same object.
fn instance_init(name: &str) -> String {
    let primary = if name == DEFAULT_INSTANCE {
        "turtle.getturtle()"
    } else {
        "turtle.Turtle()"
    };
    format!(
        "    try:\n        {name} = {primary}\n    except Exception:\n        {name} = Turtle()\n",
        name = name,
        primary = primary
    )
}

pub(crate) fn validate(code: &str) -> Result<(), SynthesisError> {
    if code.trim().is_empty() {
        return Err(SynthesisError::EmptySubmission);
    }
    for (idx, line) in code.split('\n').enumerate() {
        if let Some(c) = line
            .chars()
            .find(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\x0c'))
        {
            return Err(SynthesisError::ControlCharacter {
                line: idx + 1,
                code: c as u32,
            });
        }
    }
    Ok(())
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic());
    valid_start
        && chars.all(|c| c == '_' || c.is_alphanumeric())
        && !PYTHON_KEYWORDS.contains(&name)
}

/// Removes calls that would block instead of returning to the epilogue.
pub fn sanitize(code: &str) -> String {
    let defined: HashSet<&str> = FUNCTION_DEF
        .captures_iter(code)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let code = BLOCKING_CALL.replace_all(code, |caps: &Captures| {
        // A bare call to a function the submission defines itself is kept.
        if caps[2].is_empty() && defined.contains(&caps[3]) {
            caps[0].to_string()
        } else {
            format!("{}pass", &caps[1])
        }
    });
    let code = reroute(&code, &TEXT_INPUT_CALL, "_tg_no_input(");
    let code = reroute(&code, &NUM_INPUT_CALL, "_tg_no_numinput(");
    reroute(&code, &INPUT_CALL, "_tg_no_input(")
}

/// Replaces call sites of `pattern` with `shim`, leaving `def` headers alone.
fn reroute(code: &str, pattern: &Regex, shim: &str) -> String {
    pattern
        .replace_all(code, |caps: &Captures| {
            let Some(whole) = caps.get(0) else {
                return String::new();
            };
            let before = code[..whole.start()].trim_end_matches([' ', '\t']);
            let is_def = before
                .strip_suffix("def")
                .is_some_and(|rest| !rest.ends_with(|c: char| c.is_alphanumeric() || c == '_'));
            if is_def {
                whole.as_str().to_string()
            } else {
                shim.to_string()
            }
        })
        .into_owned()
}

/// Unifies line endings, expands leading tabs and strips the common indentation.
pub fn normalize_indentation(code: &str) -> String {
    let unified = code.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| {
            let trimmed = line.trim_start_matches([' ', '\t']);
            let lead = &line[..line.len() - trimmed.len()];
            let width: usize = lead.chars().map(|c| if c == '\t' { 4 } else { 1 }).sum();
            format!("{}{}", " ".repeat(width), trimmed.trim_end())
        })
        .collect();

    let common = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let body: Vec<&str> = lines
        .iter()
        .map(|l| if l.trim().is_empty() { "" } else { &l[common..] })
        .collect();

    body.join("\n").trim_matches('\n').to_string()
}

pub fn indent(code: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    code.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth(code: &str) -> SandboxScript {
        Synthesizer::new(Duration::from_millis(200))
            .synthesize(&SubmissionCode::python(code))
            .expect("synthesis should succeed")
    }

    #[test]
    fn test_sanitize_strips_blocking_calls() {
        let code = "turtle.done()\nscreen.exitonclick()\nmainloop()\nname = input('who?')\nn = screen.numinput('a', 'b', 5)\n";
        let clean = sanitize(code);
        assert!(!clean.contains("done()"));
        assert!(!clean.contains("exitonclick"));
        assert!(!clean.contains("mainloop"));
        assert!(clean.contains("name = _tg_no_input('who?')"));
        assert!(clean.contains("n = _tg_no_numinput('a', 'b', 5)"));
        assert_eq!(clean.matches("pass").count(), 3);
    }

    #[test]
    fn test_sanitize_keeps_sole_statement_blocks_valid() {
        let clean = sanitize("if finished:\n    turtle.done()\n");
        assert_eq!(clean, "if finished:\n    pass\n");
    }

    #[test]
    fn test_sanitize_leaves_definitions_alone() {
        let code = "from turtle import *\ndef done():\n    print('x')\ndef input(prompt):\n    return '1'\ndone()\nturtle.done()\nv = input('n')\n";
        let clean = sanitize(code);
        assert!(clean.contains("def done():"));
        assert!(clean.contains("def input(prompt):"));
        assert!(clean.contains("\ndone()\n"));
        assert!(clean.contains("\npass\n"));
        assert!(clean.contains("v = _tg_no_input('n')"));
        assert!(!clean.contains("def pass"));
    }

    #[test]
    fn test_sanitize_only_rewrites_whole_call_statements() {
        let clean = sanitize("x = done_count()\nscreen.bye()  # close\nresult = finished or done()\n");
        assert!(clean.contains("x = done_count()"));
        assert!(clean.contains("\npass\n"));
        assert!(clean.contains("result = finished or done()"));

        let crlf = sanitize("forward(10)\r\nturtle.done()\r\n");
        assert_eq!(crlf, "forward(10)\r\npass\r\n");
    }

    #[test]
    fn test_normalize_indentation() {
        let code = "\r\n    for i in range(4):\r\n    \tt.forward(10)\r\n";
        assert_eq!(normalize_indentation(code), "for i in range(4):\n    t.forward(10)");
    }

    #[test]
    fn test_indent() {
        assert_eq!(indent("a\n\nb", 4), "    a\n\n    b");
    }

    #[test]
    fn test_default_instance_for_bare_calls() {
        let script = synth("from turtle import *\nforward(100)\nleft(90)\n");
        assert_eq!(script.instances, vec!["t"]);
        assert_eq!(script.text.matches("t = turtle.getturtle()").count(), 1);
        assert!(script.text.contains("_TG_INSTANCES = [\"t\"]"));
    }

    #[test]
    fn test_named_instances_are_initialized() {
        let script = synth("import turtle\npen = turtle.Turtle()\npen.forward(10)\nbob.left(5)\n");
        assert_eq!(script.instances, vec!["pen", "bob"]);
        assert!(script.text.contains("        pen = turtle.Turtle()\n"));
        assert!(script.text.contains("        bob = Turtle()\n"));
    }

    #[test]
    fn test_submission_is_embedded_in_guarded_block() {
        let script = synth("t.forward(100)\nt.right(90)");
        let guarded = script.text.find("\ntry:\n").expect("guard present");
        let body = script.text.find("    t.forward(100)\n    t.right(90)").expect("body present");
        let handler = script.text.find("except BaseException").expect("handler present");
        assert!(guarded < body && body < handler);
        assert!(script.text.contains("time.sleep(0.200)"));
    }

    #[test]
    fn test_markers_are_python_literals() {
        let script = synth("t.forward(1)");
        assert!(script.text.contains(&format!("_TG_STATE_BEGIN = \"{}\"", STATE_BEGIN_MARKER)));
        assert!(script.text.contains("_TG_ESCAPE = \"\\\\\""));
    }

    #[test]
    fn test_keywords_are_not_instances() {
        let script = synth("t.forward(1)\n");
        assert!(script.instances.iter().all(|i| is_identifier(i)));
        assert!(!is_identifier("for"));
        assert!(!is_identifier("1abc"));
    }

    #[test]
    fn test_rejects_unembeddable_code() {
        let synth = Synthesizer::new(Duration::ZERO);
        assert_eq!(
            synth.synthesize(&SubmissionCode::python("  \n\t\n")),
            Err(SynthesisError::EmptySubmission)
        );
        assert_eq!(
            synth.synthesize(&SubmissionCode::python("t.forward(1)\nx = 1\0")),
            Err(SynthesisError::ControlCharacter { line: 2, code: 0 })
        );
        assert_eq!(
            synth.synthesize(&SubmissionCode::python("turtle.done()\n")),
            Ok(SandboxScript {
                text: synth.render("pass", &["t".to_string()]),
                instances: vec!["t".to_string()],
            })
        );
    }
}
