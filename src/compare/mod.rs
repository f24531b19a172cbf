//! Similarity between the reference and submission outcomes.
//!
//! Comparators never fail: missing or unreadable inputs produce a zero
//! [`SimilarityScore`](crate::core::domain::SimilarityScore) carrying a note.

pub mod visual;
pub mod state;

pub use visual::{BlendWeights, ImageComparison, compare_files, compare_optional_canvases};
pub use state::{compare_optional_states, compare_states};
