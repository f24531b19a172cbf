use std::fmt::Write as _;

use crate::core::domain::{CanvasSize, Rgb};
use crate::raster::canvas::{Canvas, Point};
use crate::raster::color;
use crate::raster::watchdog::{Interrupt, Watchdog};

pub const INITIAL_HEADING: f64 = 90.0;
const MAX_CIRCLE_STEPS: usize = 10_000;

#[derive(Clone, Debug, PartialEq)]
struct Snapshot {
    position: Point,
    heading: f64,
    pen_down: bool,
    pen_color: Rgb,
    fill_color: Rgb,
    pen_size: f64,
    visible: bool,
    fill: Option<Vec<Point>>,
}

/// A drawing cursor in logical coordinates: origin at the canvas centre,
/// y growing upwards, heading in degrees counter-clockwise from the x axis.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawingInstance {
    name: String,
    position: Point,
    heading: f64,
    pen_down: bool,
    pen_color: Rgb,
    fill_color: Rgb,
    pen_size: f64,
    visible: bool,
    speed: f64,
    fill: Option<Vec<Point>>,
    saved: Vec<Snapshot>,
    touched: bool,
}

impl DrawingInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: (0.0, 0.0),
            heading: INITIAL_HEADING,
            pen_down: true,
            pen_color: Rgb::BLACK,
            fill_color: Rgb::BLACK,
            pen_size: 1.0,
            visible: true,
            speed: 3.0,
            fill: None,
            saved: Vec::new(),
            touched: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once any instruction has been applied.
    pub fn touched(&self) -> bool {
        self.touched
    }

    fn touch(&mut self) {
        self.touched = true;
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn is_down(&self) -> bool {
        self.pen_down
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn filling(&self) -> bool {
        self.fill.is_some()
    }

    pub fn pen_color(&self) -> Rgb {
        self.pen_color
    }

    pub fn fill_color(&self) -> Rgb {
        self.fill_color
    }

    pub fn pen_size(&self) -> f64 {
        self.pen_size
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.touch();
        self.speed = speed;
    }

    pub fn forward(&mut self, canvas: &mut Canvas, distance: f64) {
        let rad = self.heading.to_radians();
        let target = (
            self.position.0 + distance * rad.cos(),
            self.position.1 + distance * rad.sin(),
        );
        self.move_to(canvas, target);
    }

    pub fn backward(&mut self, canvas: &mut Canvas, distance: f64) {
        self.forward(canvas, -distance);
    }

    pub fn left(&mut self, angle: f64) {
        self.set_heading(self.heading + angle);
    }

    pub fn right(&mut self, angle: f64) {
        self.set_heading(self.heading - angle);
    }

    pub fn set_heading(&mut self, angle: f64) {
        self.touch();
        self.heading = normalize_heading(angle);
    }

    pub fn goto(&mut self, canvas: &mut Canvas, x: f64, y: f64) {
        self.move_to(canvas, (x, y));
    }

    pub fn set_x(&mut self, canvas: &mut Canvas, x: f64) {
        self.move_to(canvas, (x, self.position.1));
    }

    pub fn set_y(&mut self, canvas: &mut Canvas, y: f64) {
        self.move_to(canvas, (self.position.0, y));
    }

    pub fn home(&mut self, canvas: &mut Canvas) {
        self.move_to(canvas, (0.0, 0.0));
        self.heading = INITIAL_HEADING;
    }

    fn move_to(&mut self, canvas: &mut Canvas, target: Point) {
        self.touch();
        if self.pen_down {
            let size = canvas.size();
            canvas.draw_line(
                to_canvas(self.position, size),
                to_canvas(target, size),
                self.pen_size,
                self.pen_color,
            );
        }
        if let Some(points) = self.fill.as_mut() {
            points.push(target);
        }
        self.position = target;
    }

    /// Arc approximated by `steps` chords; a negative radius turns clockwise.
    /// The painting of every chord is charged to `watchdog`, so a huge arc
    /// stops as soon as the deadline passes.
    pub fn circle(
        &mut self,
        canvas: &mut Canvas,
        watchdog: &mut Watchdog,
        radius: f64,
        extent: Option<f64>,
        steps: Option<usize>,
    ) -> Result<(), Interrupt> {
        self.touch();
        let extent = extent.unwrap_or(360.0);
        let steps = steps
            .unwrap_or_else(|| ((radius.abs() / 2.0) as usize).max(36))
            .clamp(1, MAX_CIRCLE_STEPS);
        let start = self.position;

        let mut w = extent / steps as f64;
        let mut w2 = w / 2.0;
        let mut l = 2.0 * radius * w2.to_radians().sin();
        if radius < 0.0 {
            l = -l;
            w = -w;
            w2 = -w2;
        }

        self.left(w2);
        for _ in 0..steps {
            self.forward(canvas, l);
            self.left(w);
            watchdog.charge(canvas.take_work())?;
        }
        self.left(-w2);

        if extent.abs() >= 359.0 {
            if let Some(points) = self.fill.as_mut() {
                points.push(start);
            }
        }
        Ok(())
    }

    pub fn dot(&mut self, canvas: &mut Canvas, size: Option<f64>, color: Option<Rgb>) {
        self.touch();
        let size = size.unwrap_or_else(|| (self.pen_size + 4.0).max(self.pen_size * 2.0));
        let center = to_canvas(self.position, canvas.size());
        canvas.fill_circle(center, size / 2.0, color.unwrap_or(self.pen_color));
    }

    pub fn pen_up(&mut self) {
        self.touch();
        self.pen_down = false;
    }

    pub fn put_pen_down(&mut self) {
        self.touch();
        self.pen_down = true;
    }

    pub fn set_pen_size(&mut self, size: f64) {
        self.touch();
        self.pen_size = size.max(0.0);
    }

    pub fn set_pen_color(&mut self, color: Rgb) {
        self.touch();
        self.pen_color = color;
    }

    pub fn set_fill_color(&mut self, color: Rgb) {
        self.touch();
        self.fill_color = color;
    }

    pub fn begin_fill(&mut self) {
        self.touch();
        self.fill = Some(vec![self.position]);
    }

    /// Rasterises the recorded polygon when it has at least three points.
    pub fn end_fill(&mut self, canvas: &mut Canvas) {
        self.touch();
        let Some(points) = self.fill.take() else {
            return;
        };
        if points.len() < 3 {
            tracing::debug!(instance = %self.name, points = points.len(), "fill dropped");
            return;
        }
        let size = canvas.size();
        let polygon: Vec<Point> = points.into_iter().map(|p| to_canvas(p, size)).collect();
        canvas.fill_polygon(&polygon, self.fill_color);
    }

    pub fn hide(&mut self) {
        self.touch();
        self.visible = false;
    }

    pub fn show(&mut self) {
        self.touch();
        self.visible = true;
    }

    pub fn push(&mut self) {
        self.touch();
        self.saved.push(Snapshot {
            position: self.position,
            heading: self.heading,
            pen_down: self.pen_down,
            pen_color: self.pen_color,
            fill_color: self.fill_color,
            pen_size: self.pen_size,
            visible: self.visible,
            fill: self.fill.clone(),
        });
    }

    /// Restores the last pushed state; an empty stack leaves everything as is.
    pub fn pop(&mut self) {
        self.touch();
        let Some(snapshot) = self.saved.pop() else {
            return;
        };
        self.position = snapshot.position;
        self.heading = snapshot.heading;
        self.pen_down = snapshot.pen_down;
        self.pen_color = snapshot.pen_color;
        self.fill_color = snapshot.fill_color;
        self.pen_size = snapshot.pen_size;
        self.visible = snapshot.visible;
        self.fill = snapshot.fill;
    }

    pub fn reset(&mut self) {
        let name = std::mem::take(&mut self.name);
        *self = Self::new(name);
        self.touch();
    }

    pub fn towards(&self, x: f64, y: f64) -> f64 {
        let (dx, dy) = (x - self.position.0, y - self.position.1);
        normalize_heading(dy.atan2(dx).to_degrees())
    }

    pub fn distance(&self, x: f64, y: f64) -> f64 {
        (x - self.position.0).hypot(y - self.position.1)
    }

    /// Writes the per-instance block of the state text.
    pub fn describe(&self, index: usize, out: &mut String) {
        let _ = writeln!(out, "\nTurtle {}:", index);
        let _ = writeln!(
            out,
            "Position: {}, {}",
            format_number(self.position.0),
            format_number(self.position.1)
        );
        let _ = writeln!(out, "Heading: {}", format_number(self.heading));
        let _ = writeln!(out, "Pen down: {}", python_bool(self.pen_down));
        let _ = writeln!(out, "Pen color: {}", color::describe(self.pen_color));
        let _ = writeln!(out, "Fill color: {}", color::describe(self.fill_color));
        let _ = writeln!(out, "Pen size: {}", self.pen_size);
        let _ = writeln!(out, "Visible: {}", python_bool(self.visible));
    }
}

/// State text in the same layout the sandbox epilogue prints.
pub fn serialize_state<'a>(instances: impl IntoIterator<Item = &'a DrawingInstance>) -> String {
    let instances: Vec<&DrawingInstance> = instances.into_iter().collect();
    let mut out = format!("Number of turtles: {}\n", instances.len());
    for (i, instance) in instances.iter().enumerate() {
        instance.describe(i + 1, &mut out);
    }
    out
}

pub fn normalize_heading(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let normalized = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 { 0.0 } else { normalized }
}

pub fn to_canvas(p: Point, size: CanvasSize) -> Point {
    (size.width as f64 / 2.0 + p.0, size.height as f64 / 2.0 - p.1)
}

fn format_number(v: f64) -> String {
    format!("{:.2}", (v * 100.0).round() / 100.0 + 0.0)
}

fn python_bool(v: bool) -> &'static str {
    if v { "True" } else { "False" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canvas() -> Canvas {
        Canvas::new(CanvasSize::default(), Rgb::WHITE)
    }

    fn black_pixels(c: &Canvas) -> usize {
        let size = c.size();
        (0..size.height)
            .flat_map(|y| (0..size.width).map(move |x| (x, y)))
            .filter(|(x, y)| c.pixel(*x, *y) == Some(Rgb::BLACK))
            .count()
    }

    #[test]
    fn test_heading_is_normalized() {
        let mut t = DrawingInstance::new("t");
        t.left(300.0);
        assert_eq!(t.heading(), 30.0);
        t.right(450.0);
        assert_eq!(t.heading(), 300.0);
        t.set_heading(-1e-20);
        assert!(t.heading() >= 0.0 && t.heading() < 360.0);
    }

    #[test]
    fn test_square_returns_home() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        for _ in 0..4 {
            t.forward(&mut c, 100.0);
            t.right(90.0);
        }
        let (x, y) = t.position();
        assert!(x.abs() < 1e-9 && y.abs() < 1e-9);
        assert_eq!(t.heading(), 90.0);
        assert!(black_pixels(&c) > 350);
    }

    #[test]
    fn test_filled_circle_produces_region() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        t.begin_fill();
        t.circle(&mut c, &mut Watchdog::unbounded(), 50.0, Some(360.0), None)
            .unwrap();
        t.end_fill(&mut c);
        let area = black_pixels(&c) as f64;
        let expected = std::f64::consts::PI * 2500.0;
        assert!(area > expected * 0.9, "area {}", area);
        assert!(!t.filling());
    }

    #[test]
    fn test_fill_with_too_few_points_is_dropped() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        t.pen_up();
        t.begin_fill();
        t.forward(&mut c, 50.0);
        t.end_fill(&mut c);
        assert_eq!(black_pixels(&c), 0);
        assert!(!t.filling());
    }

    #[test]
    fn test_negative_radius_turns_clockwise() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        t.set_heading(0.0);
        t.circle(&mut c, &mut Watchdog::unbounded(), -50.0, Some(180.0), None)
            .unwrap();
        let (x, y) = t.position();
        assert!(x.abs() < 1e-6, "x {}", x);
        assert!((y + 100.0).abs() < 1e-6, "y {}", y);
        assert!((t.heading() - 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_pop_on_empty_stack_is_noop() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        t.forward(&mut c, 10.0);
        let before = t.clone();
        t.pop();
        assert_eq!(t.position(), before.position());
        assert_eq!(t.heading(), before.heading());
    }

    #[test]
    fn test_push_pop_restores_state() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        t.push();
        t.forward(&mut c, 40.0);
        t.left(45.0);
        t.set_pen_color(Rgb(255, 0, 0));
        t.pop();
        assert_eq!(t.position(), (0.0, 0.0));
        assert_eq!(t.heading(), INITIAL_HEADING);
        assert_eq!(t.pen_color(), Rgb::BLACK);
    }

    #[test]
    fn test_towards_and_distance() {
        let t = DrawingInstance::new("t");
        assert_eq!(t.towards(10.0, 0.0), 0.0);
        assert_eq!(t.towards(0.0, -5.0), 270.0);
        assert_eq!(t.distance(3.0, 4.0), 5.0);
    }

    #[test]
    fn test_serialized_state_layout() {
        let mut c = canvas();
        let mut t = DrawingInstance::new("t");
        t.right(90.0);
        t.forward(&mut c, 0.001);
        t.backward(&mut c, 0.002);
        let text = serialize_state([&t]);
        assert_eq!(
            text,
            "Number of turtles: 1\n\nTurtle 1:\nPosition: 0.00, 0.00\nHeading: 0.00\n\
             Pen down: True\nPen color: black\nFill color: black\nPen size: 1\nVisible: True\n"
        );
    }
}
