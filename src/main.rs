use std::panic;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, load_code};
use crate::core::pipeline::Grader;
use crate::native::executor::PythonExecutor;
use crate::raster::RasterRenderer;

mod analyzer;
mod cli;
mod compare;
mod config;
mod constants;
mod core;
mod native;
mod raster;
mod report;
mod stubs;
mod synth;


#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let grader = Grader::new(
        Arc::new(PythonExecutor::new(&config.scratch_dir, &config.python_path)),
        Arc::new(RasterRenderer::new()),
        config,
    );
    let report = if is_png(&args.reference) && is_png(&args.submission) {
        grader.grade_images(&args.reference, &args.submission)
    } else {
        let reference = load_code(&args.reference)?;
        let submission = load_code(&args.submission)?;
        grader.grade(&reference, &submission).await
    };

    let json = serde_json::to_string_pretty(&report)?;
    println!("{}", json);
    if let Some(path) = &args.results {
        std::fs::write(path, &json)?;
        tracing::info!(path = %path.display(), "report written");
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn is_png(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
