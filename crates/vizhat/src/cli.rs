use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use renderer::Resolution;

#[derive(Parser, Debug)]
#[command(
    name = "vizhat",
    author,
    version,
    about = "GLSL visualization host",
    arg_required_else_help = false
)]
pub struct Cli {
    /// Visualization to start with (falls back to `startup_visualizer`).
    #[arg(value_name = "VISUALIZATION")]
    pub visualization: Option<String>,

    /// Path to `vizhat.toml`; defaults to the user config directory.
    #[arg(long, value_name = "FILE", env = "VIZHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// FX chain to apply on top of the visualization.
    #[arg(long, value_name = "NAME")]
    pub fx: Option<String>,

    /// Render into a desktop window (the default).
    #[arg(long, conflicts_with = "headless")]
    pub window: bool,

    /// Render the given number of frames without a display, then exit.
    #[arg(long, value_name = "FRAMES")]
    pub headless: Option<u64>,

    /// Blend time between visualizations (e.g. `2s`, `500ms`, `0`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub crossfade: Option<Duration>,

    /// Window or headless viewport size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<Resolution>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

/// Accepts bare seconds (`1.5`) as well as humantime strings (`1500ms`).
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("duration must not be empty".to_string());
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(format!("invalid duration '{trimmed}'"));
        }
        return Ok(Duration::from_secs_f64(seconds));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid duration '{trimmed}': {err}"))
}

pub fn parse_size(value: &str) -> Result<Resolution, String> {
    let (w, h) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WIDTHxHEIGHT".to_string())?;
    let width = w
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid width '{}'", w.trim()))?;
    let height = h
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid height '{}'", h.trim()))?;
    if width == 0 || height == 0 {
        return Err("size dimensions must be greater than zero".into());
    }
    Ok(Resolution::new(width, height))
}
