pub mod grading;

pub use grading::Grader;
