pub mod executor;
pub mod renderer;
