//! In-process simulator: interprets a submission against a pixel canvas
//! instead of spawning an interpreter per run.
//!
//! Isolation here is weaker than the process path. The interpreter only
//! exposes an allow-list of modules and builtins, and a [`Watchdog`] bounds
//! execution cooperatively, but a panic or memory blow-up shares the host
//! process.

pub mod canvas;
pub mod color;
pub mod script;
pub mod turtle;
pub mod watchdog;

use std::time::{Duration, Instant};

use crate::analyzer::detect_instances_or_default;
use crate::constants::DEFAULT_INSTANCE;
use crate::core::domain::{
    CanvasSize, ExecutionLimits, ExecutionResult, FailureKind, SubmissionCode,
};
use crate::core::traits::renderer::{Renderer, Rendering};
use crate::synth::{is_identifier, normalize_indentation, validate};
use canvas::Canvas;
use script::{Interpreter, ScriptError, Value, parse};
use turtle::serialize_state;
use watchdog::Watchdog;

/// Stack for interpreter threads; deep recursion in submissions maps to deep
/// recursion in the evaluator.
pub const INTERPRETER_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Extra time granted to the interpreter thread to notice its deadline.
const DEADLINE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct Simulation {
    pub canvas: Canvas,
    /// Same text the process epilogue prints between the state sentinels.
    pub state: String,
    pub printed: String,
    pub steps: u64,
}

/// Runs `code` to completion on a fresh canvas.
pub fn simulate(
    code: &str,
    size: CanvasSize,
    watchdog: &mut Watchdog,
) -> Result<Simulation, ScriptError> {
    let body = normalize_indentation(code);
    let program = parse(&body)?;

    let names: Vec<String> = detect_instances_or_default(&body)
        .into_iter()
        .filter(|n| is_identifier(n) && n != "turtle" && n != "screen")
        .collect();

    let mut interp = Interpreter::new(size, DEFAULT_INSTANCE, watchdog);
    for name in &names {
        let idx = if name == DEFAULT_INSTANCE {
            0
        } else {
            interp.new_turtle(name)
        };
        interp.bind(name, Value::Turtle(idx));
    }
    interp.run(&program)?;

    let chosen = interp.collect_instances(&names);
    let finished = interp.finish();
    let state = serialize_state(chosen.iter().map(|&i| &finished.instances[i]));
    Ok(Simulation {
        canvas: finished.canvas,
        state,
        printed: finished.printed,
        steps: watchdog.steps(),
    })
}

/// [`Renderer`] backed by [`simulate`] on a dedicated thread.
#[derive(Debug, Clone, Default)]
pub struct RasterRenderer;

impl RasterRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Renderer for RasterRenderer {
    #[tracing::instrument(skip(self, code, limits))]
    async fn render(
        &self,
        code: &SubmissionCode,
        label: &str,
        limits: &ExecutionLimits,
    ) -> Rendering {
        let started = Instant::now();
        let failed = |kind: FailureKind, msg: String| Rendering {
            result: ExecutionResult::failed(kind, started.elapsed(), msg),
            canvas: None,
        };

        if let Err(e) = validate(&code.text) {
            tracing::warn!(%e, "submission rejected before simulation");
            return failed(FailureKind::Synthesis, e.to_string());
        }

        let mut watchdog = Watchdog::new(Some(limits.timeout), limits.step_budget);
        let cancel = watchdog.handle();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let text = code.text.clone();
        let size = limits.canvas;

        let spawned = std::thread::Builder::new()
            .name(format!("raster-{}", label))
            .stack_size(INTERPRETER_STACK_BYTES)
            .spawn(move || {
                let outcome = simulate(&text, size, &mut watchdog);
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            tracing::error!(%e, "failed to start simulator thread");
            return failed(FailureKind::Launch, e.to_string());
        }

        let outcome = match tokio::time::timeout(limits.timeout + DEADLINE_GRACE, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                tracing::error!("simulator thread ended without a result");
                return failed(
                    FailureKind::Runtime,
                    "simulator terminated unexpectedly".to_string(),
                );
            }
            Err(_) => {
                cancel.cancel();
                tracing::warn!(timeout = ?limits.timeout, "simulation did not stop in time");
                return failed(FailureKind::Timeout, "time limit exceeded".to_string());
            }
        };

        match outcome {
            Ok(sim) => {
                tracing::info!(
                    steps = sim.steps,
                    printed = sim.printed.len(),
                    elapsed = ?started.elapsed(),
                    "simulation finished"
                );
                Rendering {
                    result: ExecutionResult::succeeded(started.elapsed(), sim.state),
                    canvas: Some(sim.canvas),
                }
            }
            Err(e) if e.is_interrupt() => {
                tracing::info!(%e, "simulation interrupted");
                failed(FailureKind::Timeout, e.to_string())
            }
            Err(e) => {
                tracing::info!(%e, "submission raised");
                failed(FailureKind::Runtime, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Rgb;

    fn limits(timeout: Duration) -> ExecutionLimits {
        ExecutionLimits {
            timeout,
            ..ExecutionLimits::default()
        }
    }

    fn count(canvas: &Canvas, color: Rgb) -> usize {
        let size = canvas.size();
        (0..size.height)
            .flat_map(|y| (0..size.width).map(move |x| (x, y)))
            .filter(|&(x, y)| canvas.pixel(x, y) == Some(color))
            .count()
    }

    #[tokio::test]
    async fn test_filled_circle_paints_a_disc() {
        let code = SubmissionCode::python(
            "import turtle\nt = turtle.Turtle()\nt.fillcolor('red')\nt.begin_fill()\nt.circle(50, 360)\nt.end_fill()\n",
        );
        let rendering = RasterRenderer::new()
            .render(&code, "submission", &limits(Duration::from_secs(5)))
            .await;
        assert!(rendering.result.success, "{}", rendering.result.captured);
        let red = count(&rendering.canvas.unwrap(), Rgb(255, 0, 0));
        let area = std::f64::consts::PI * 50.0 * 50.0;
        assert!((red as f64 - area).abs() / area < 0.1, "red pixels: {}", red);
    }

    #[tokio::test]
    async fn test_fill_with_too_few_points_is_dropped() {
        let code = SubmissionCode::python(
            "t.fillcolor('red')\nt.begin_fill()\nt.forward(30)\nt.end_fill()\n",
        );
        let rendering = RasterRenderer::new()
            .render(&code, "submission", &limits(Duration::from_secs(5)))
            .await;
        assert!(rendering.result.success);
        assert_eq!(count(&rendering.canvas.unwrap(), Rgb(255, 0, 0)), 0);
    }

    #[tokio::test]
    async fn test_infinite_loop_reports_timeout() {
        let code = SubmissionCode::python("import turtle\nwhile True:\n    turtle.left(1)\n");
        let started = Instant::now();
        let rendering = RasterRenderer::new()
            .render(
                &code,
                "submission",
                &ExecutionLimits {
                    timeout: Duration::from_millis(300),
                    step_budget: u64::MAX,
                    ..ExecutionLimits::default()
                },
            )
            .await;
        assert!(rendering.result.timed_out());
        assert!(rendering.canvas.is_none());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_heavy_drawing_statement_stops_at_deadline() {
        let code = "t.pensize(400)\nfor i in range(300):\n    t.circle(200, 360, 400)\n";
        let mut watchdog = Watchdog::new(Some(Duration::from_millis(300)), u64::MAX);
        let started = Instant::now();
        let err = simulate(code, CanvasSize::default(), &mut watchdog).unwrap_err();
        assert_eq!(err, ScriptError::Interrupted(watchdog::Interrupt::Deadline));
        assert!(started.elapsed() < Duration::from_secs(3), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn test_runtime_error_is_reported() {
        let code = SubmissionCode::python("t.forward(10)\nt.undefined_call()\n");
        let rendering = RasterRenderer::new()
            .render(&code, "submission", &limits(Duration::from_secs(5)))
            .await;
        assert_eq!(rendering.result.failure, Some(FailureKind::Runtime));
        assert!(rendering.result.captured.contains("AttributeError"));
    }

    #[test]
    fn test_state_matches_epilogue_layout() {
        let mut watchdog = Watchdog::unbounded();
        let sim = simulate(
            "pen = turtle.Turtle()\npen.forward(10)\npen.pop()\n",
            CanvasSize::default(),
            &mut watchdog,
        )
        .unwrap();
        assert!(sim.state.starts_with("Number of turtles: 1\n"));
        assert!(sim.state.contains("Position: 0.00, 10.00"));
        assert!(sim.state.contains("Heading: 90.00"));
    }

    #[test]
    fn test_bare_calls_yield_one_default_instance() {
        let mut watchdog = Watchdog::unbounded();
        let sim = simulate("forward(20)\nleft(90)\n", CanvasSize::default(), &mut watchdog).unwrap();
        assert!(sim.state.starts_with("Number of turtles: 1\n"));
    }
}
