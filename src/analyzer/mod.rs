//! Static scan of submitted drawing code.
//!
//! Everything here is best effort and diagnostic only: the profile ends up in
//! the report but never influences the score. Identifier detection is also
//! used by the synthesizer to decide which drawing objects to pre-create.

use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;
use serde::Serialize;

use crate::constants::DEFAULT_INSTANCE;

/// Method names that identify a receiver as a drawing object.
pub const DRAWING_METHODS: &[&str] = &[
    "forward",
    "fd",
    "backward",
    "bk",
    "back",
    "right",
    "rt",
    "left",
    "lt",
    "goto",
    "setpos",
    "setposition",
    "setx",
    "sety",
    "setheading",
    "seth",
    "home",
    "circle",
    "dot",
    "stamp",
    "speed",
    "position",
    "pos",
    "towards",
    "xcor",
    "ycor",
    "heading",
    "distance",
    "pendown",
    "pd",
    "down",
    "penup",
    "pu",
    "up",
    "pensize",
    "width",
    "isdown",
    "isvisible",
    "pencolor",
    "fillcolor",
    "color",
    "begin_fill",
    "end_fill",
    "filling",
    "reset",
    "clear",
    "hideturtle",
    "ht",
    "showturtle",
    "st",
    "write",
    "push",
    "pop",
];

static CREATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(\w+)\s*=\s*turtle\.Turtle\(\s*\)",
        r"(\w+)\s*=\s*Turtle\(\s*\)",
        r"(\w+)\s*=\s*turtle\.RawTurtle\(\s*\w+\s*\)",
        r"(\w+)\s*=\s*RawTurtle\(\s*\w+\s*\)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("creation pattern is valid"))
    .collect()
});

static METHOD_RECEIVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(\w+)\.({})\s*\(", DRAWING_METHODS.join("|")))
        .expect("receiver pattern is valid")
});

static BARE_DRAWING_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b({})\s*\(", DRAWING_METHODS.join("|")))
        .expect("bare call pattern is valid")
});

static QUALIFIED_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*import\s+turtle\b").expect("valid"));
static WILDCARD_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+turtle\s+import\s+\*").expect("valid"));
static SELECTIVE_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+turtle\s+import\s+([^\n]*)").expect("valid"));

static LOOP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(for|while)\b[^\n]*:").expect("valid"));
static RANGE_SIDES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"range\s*\(\s*([3-9])\s*\)").expect("valid"));
static STAR_TURN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(right|left|rt|lt)\s*\(\s*144(\.0*)?\s*\)").expect("valid"));
static SNOWFLAKE_TURN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(right|left|rt|lt)\s*\(\s*60(\.0*)?\s*\)").expect("valid"));
static OOP_CREATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+\s*=\s*(turtle\.)?(Raw)?Turtle\(").expect("valid"));
static ATTRIBUTE_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.\w+\(").expect("valid"));
static GOTO_CALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bgoto\s*\(").expect("valid"));

/// Operation name plus the call spellings that count as that operation.
const OPERATIONS: &[(&str, &[&str])] = &[
    ("circle", &["circle"]),
    ("goto", &["goto", "setpos", "setposition"]),
    ("forward", &["forward", "fd"]),
    ("backward", &["backward", "bk", "back"]),
    ("right", &["right", "rt"]),
    ("left", &["left", "lt"]),
    ("penup", &["penup", "pu", "up"]),
    ("pendown", &["pendown", "pd", "down"]),
    ("pensize", &["pensize", "width"]),
    ("pencolor", &["pencolor"]),
    ("fillcolor", &["fillcolor"]),
    ("begin_fill", &["begin_fill"]),
    ("end_fill", &["end_fill"]),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStyle {
    Qualified,
    Wildcard,
    Selective,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodingStyle {
    MultipleInstances,
    ObjectOriented,
    Procedural,
    Mixed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CodeAnalysis {
    pub instances: Vec<String>,
    pub import_style: ImportStyle,
    pub operations: Vec<String>,
    pub shapes: Vec<String>,
    pub style: CodingStyle,
    pub complexity: Complexity,
    pub description: String,
}

/// Finds identifiers that are (probably) drawing objects, in order of first
/// appearance: explicit constructions first, then method-call receivers.
pub fn detect_instances(code: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for pattern in CREATION_PATTERNS.iter() {
        for caps in pattern.captures_iter(code) {
            let m = caps.get(1).expect("group 1 always participates");
            found.push((m.start(), m.as_str().to_string()));
        }
    }
    found.sort_by_key(|(pos, _)| *pos);
    let mut names: Vec<String> = found.into_iter().map(|(_, name)| name).unique().collect();

    for caps in METHOD_RECEIVER.captures_iter(code) {
        let receiver = &caps[1];
        if receiver == "turtle" || receiver == "self" {
            continue;
        }
        if receiver.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if !names.iter().any(|n| n == receiver) {
            names.push(receiver.to_string());
        }
    }

    names
}

/// Same as [`detect_instances`] but never empty when the code draws at all:
/// bare or module-level drawing calls fall back to one default identifier.
pub fn detect_instances_or_default(code: &str) -> Vec<String> {
    let names = detect_instances(code);
    if names.is_empty() && BARE_DRAWING_CALL.is_match(code) {
        return vec![DEFAULT_INSTANCE.to_string()];
    }
    names
}

pub fn detect_import_style(code: &str) -> ImportStyle {
    if WILDCARD_IMPORT.is_match(code) {
        return ImportStyle::Wildcard;
    }
    let selective = SELECTIVE_IMPORT
        .captures_iter(code)
        .any(|caps| !caps[1].contains('*'));
    if selective {
        return ImportStyle::Selective;
    }
    if QUALIFIED_IMPORT.is_match(code) {
        return ImportStyle::Qualified;
    }
    ImportStyle::None
}

fn uses_call(code: &str, spelling: &str) -> bool {
    Regex::new(&format!(r"\b{}\s*\(", regex::escape(spelling)))
        .map(|re| re.is_match(code))
        .unwrap_or(false)
}

fn detect_operations(code: &str) -> Vec<String> {
    OPERATIONS
        .iter()
        .filter(|(_, spellings)| spellings.iter().any(|s| uses_call(code, s)))
        .map(|(name, _)| name.to_string())
        .collect()
}

fn detect_shapes(code: &str, operations: &[String]) -> Vec<String> {
    let has = |op: &str| operations.iter().any(|o| o == op);
    let turns = has("right") || has("left");
    let mut shapes = Vec::new();

    if has("circle") {
        shapes.push("circle".to_string());
    }

    let goto_count = GOTO_CALL.find_iter(code).count();
    match goto_count {
        0 | 1 => {}
        2 => shapes.push("line_segment".to_string()),
        3 => shapes.push("triangle".to_string()),
        4 => shapes.push("quadrilateral".to_string()),
        _ => shapes.push("polygon".to_string()),
    }

    if has("forward") && turns && LOOP_HEADER.is_match(code) {
        shapes.push("repeated_pattern".to_string());

        if let Some(caps) = RANGE_SIDES.captures(code) {
            let label = match &caps[1] {
                "3" => "triangle".to_string(),
                "4" => "square".to_string(),
                "5" => "pentagon".to_string(),
                "6" => "hexagon".to_string(),
                "8" => "octagon".to_string(),
                n => format!("{}-sided_polygon", n),
            };
            shapes.push(label);
        }

        if STAR_TURN.is_match(code) {
            shapes.push("star".to_string());
        } else if SNOWFLAKE_TURN.is_match(code) {
            shapes.push("snowflake".to_string());
        }
    }

    shapes.into_iter().unique().collect()
}

fn detect_style(code: &str, instances: &[String], import_style: ImportStyle) -> CodingStyle {
    if instances.len() > 1 {
        CodingStyle::MultipleInstances
    } else if OOP_CREATION.is_match(code) {
        CodingStyle::ObjectOriented
    } else if import_style == ImportStyle::Wildcard && !ATTRIBUTE_CALL.is_match(code) {
        CodingStyle::Procedural
    } else {
        CodingStyle::Mixed
    }
}

fn detect_complexity(code: &str, operations: &[String]) -> Complexity {
    let has_for = code.contains("for ");
    let has_while = code.contains("while ");
    if code.contains("def ") || code.contains("class ") || (has_for && has_while) {
        return Complexity::Complex;
    }
    let colored = ["pencolor", "fillcolor", "begin_fill"]
        .iter()
        .any(|op| operations.iter().any(|o| o == op));
    if colored || operations.len() > 5 || has_for || has_while {
        return Complexity::Moderate;
    }
    Complexity::Simple
}

/// Short phrase for what the code most likely draws ("a square", "a star").
pub fn describe_shape(shapes: &[String], operations: &[String], complexity: Complexity) -> String {
    let has_shape = |s: &str| shapes.iter().any(|x| x == s);
    let has_op = |s: &str| operations.iter().any(|x| x == s);

    if shapes.is_empty() {
        return if has_op("circle") {
            "a circle".to_string()
        } else if has_op("forward") && (has_op("right") || has_op("left")) {
            if complexity == Complexity::Simple {
                "a straight line".to_string()
            } else {
                "a geometric pattern".to_string()
            }
        } else if has_op("goto") {
            "line segments".to_string()
        } else {
            "an unknown shape".to_string()
        };
    }

    let named = [
        ("square", "a square"),
        ("star", "a star"),
        ("triangle", "a triangle"),
        ("pentagon", "a pentagon"),
        ("hexagon", "a hexagon"),
        ("octagon", "an octagon"),
        ("snowflake", "a snowflake pattern"),
        ("circle", "a circle"),
        ("polygon", "a polygon"),
        ("quadrilateral", "a quadrilateral"),
        ("line_segment", "line segments"),
        ("repeated_pattern", "a geometric pattern"),
    ];
    if let Some((_, phrase)) = named.iter().find(|(shape, _)| has_shape(shape)) {
        return phrase.to_string();
    }
    if let Some(sides) = shapes
        .iter()
        .find_map(|s| s.strip_suffix("-sided_polygon"))
    {
        return format!("a {}-sided polygon", sides);
    }
    "a shape".to_string()
}

#[tracing::instrument(skip(code), fields(len = code.len()))]
pub fn analyze(code: &str) -> CodeAnalysis {
    let instances = detect_instances(code);
    let import_style = detect_import_style(code);
    let operations = detect_operations(code);
    let shapes = detect_shapes(code, &operations);
    let style = detect_style(code, &instances, import_style);
    let complexity = detect_complexity(code, &operations);
    let description = describe_shape(&shapes, &operations, complexity);

    tracing::debug!(
        ?instances,
        ?import_style,
        ?shapes,
        %description,
        "analyzed submission"
    );

    CodeAnalysis {
        instances,
        import_style,
        operations,
        shapes,
        style,
        complexity,
        description,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = "import turtle\nt = turtle.Turtle()\nfor i in range(4):\n    t.forward(100)\n    t.right(90)\n";

    #[test]
    fn test_detects_explicit_and_receiver_instances() {
        let code = "import turtle\npen = turtle.Turtle()\nbob = Turtle()\nalice.forward(10)\npen.left(90)\nturtle.done()\n";
        assert_eq!(detect_instances(code), vec!["pen", "bob", "alice"]);
    }

    #[test]
    fn test_module_receiver_is_not_an_instance() {
        let code = "import turtle\nturtle.forward(100)\nturtle.left(90)\n";
        assert!(detect_instances(code).is_empty());
        assert_eq!(detect_instances_or_default(code), vec!["t"]);
    }

    #[test]
    fn test_bare_calls_fall_back_to_default_instance() {
        let code = "from turtle import *\nforward(100)\nleft(90)\n";
        assert_eq!(detect_instances_or_default(code), vec!["t"]);
    }

    #[test]
    fn test_code_without_drawing_has_no_instances() {
        assert!(detect_instances_or_default("x = 1 + 2\n").is_empty());
    }

    #[test]
    fn test_import_styles() {
        assert_eq!(detect_import_style("import turtle\n"), ImportStyle::Qualified);
        assert_eq!(detect_import_style("from turtle import *\n"), ImportStyle::Wildcard);
        assert_eq!(
            detect_import_style("from turtle import forward, left\n"),
            ImportStyle::Selective
        );
        assert_eq!(detect_import_style("print('hi')\n"), ImportStyle::None);
    }

    #[test]
    fn test_square_profile() {
        let analysis = analyze(SQUARE);
        assert_eq!(analysis.instances, vec!["t"]);
        assert!(analysis.shapes.contains(&"square".to_string()));
        assert_eq!(analysis.style, CodingStyle::ObjectOriented);
        assert_eq!(analysis.complexity, Complexity::Moderate);
        assert_eq!(analysis.description, "a square");
    }

    #[test]
    fn test_rotated_square_is_still_a_square() {
        let rotated = SQUARE.replace("for i", "t.left(90)\nfor i");
        assert_eq!(analyze(&rotated).description, "a square");
    }

    #[test]
    fn test_star_detection() {
        let code = "from turtle import *\nfor i in range(5):\n    forward(150)\n    right(144)\n";
        let analysis = analyze(code);
        assert!(analysis.shapes.contains(&"star".to_string()));
        assert_eq!(analysis.description, "a star");
        assert_eq!(analysis.style, CodingStyle::Procedural);
    }

    #[test]
    fn test_goto_counts_classify_polygons() {
        let code = "t.goto(0, 0)\nt.goto(100, 0)\nt.goto(50, 80)\n";
        let analysis = analyze(code);
        assert_eq!(analysis.shapes, vec!["triangle"]);
        assert_eq!(analysis.complexity, Complexity::Simple);
    }

    #[test]
    fn test_functions_are_complex() {
        let code = "def square(t):\n    for _ in range(4):\n        t.fd(10)\n        t.lt(90)\n";
        assert_eq!(analyze(code).complexity, Complexity::Complex);
    }

    #[test]
    fn test_hexagon_and_circle_descriptions() {
        let hexagon = "for i in range(6):\n    t.forward(50)\n    t.left(60)\n";
        assert_eq!(analyze(hexagon).description, "a hexagon");
        assert_eq!(analyze("t.circle(50)\n").description, "a circle");
        assert_eq!(analyze("x = 1\n").description, "an unknown shape");
    }
}
