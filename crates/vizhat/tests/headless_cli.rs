use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn create_library(root: &Path) {
    let viz = root.join("viz");
    let fx = root.join("fx");
    fs::create_dir_all(&viz).unwrap();
    fs::create_dir_all(&fx).unwrap();

    fs::write(
        root.join("vizhat.toml"),
        "visualizer_paths = [\"viz\"]\nfx_paths = [\"fx\"]\ncrossfade_duration = \"500ms\"\n",
    )
    .unwrap();

    fs::write(viz.join("wave.frag"), "void main() {}").unwrap();
    fs::write(
        viz.join("wave.toml"),
        "[shader]\ndescription = \"sine wave\"\nfragment_shader = \"wave.frag\"\n",
    )
    .unwrap();

    fs::write(viz.join("plain.frag"), "void main() {}").unwrap();
    fs::write(viz.join("blur.frag"), "void main() {}").unwrap();
    fs::write(
        viz.join("layered.toml"),
        "[multipass]\npasses = [\"0 * * plain.frag\", \"1 0 * blur.frag\"]\n",
    )
    .unwrap();

    fs::write(fx.join("glow.frag"), "void main() {}").unwrap();
    fs::write(fx.join("glow.toml"), "[fx]\npasses = [\"1 0 * glow.frag\"]\n").unwrap();
}

fn vizhat(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vizhat"))
        .env_remove("VIZHAT_CONFIG")
        .env("VIZHAT_CONFIG_DIR", root)
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(root.join("vizhat.toml"))
        .args(args)
        .output()
        .expect("failed to run vizhat")
}

#[test]
fn headless_renders_simple_visualization() {
    let root = TempDir::new().unwrap();
    create_library(root.path());

    let output = vizhat(root.path(), &["wave", "--headless", "5", "--size", "320x200"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("viewport 320x200"), "{stdout}");
    assert!(stdout.contains("simple 'wave'"), "{stdout}");
}

#[test]
fn headless_applies_fx_to_multipass_visualization() {
    let root = TempDir::new().unwrap();
    create_library(root.path());

    let output = vizhat(
        root.path(),
        &["layered", "--fx", "glow", "--headless", "3", "--crossfade", "0"],
    );
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fx 'layered+glow'"), "{stdout}");
    assert!(stdout.contains("multipass 'layered'"), "{stdout}");
}

#[test]
fn headless_fails_for_unknown_visualization() {
    let root = TempDir::new().unwrap();
    create_library(root.path());

    let output = vizhat(root.path(), &["missing", "--headless", "2"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load"), "{stderr}");
}

#[test]
fn missing_visualization_argument_is_an_error() {
    let root = TempDir::new().unwrap();
    create_library(root.path());

    let output = vizhat(root.path(), &["--headless", "1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("startup_visualizer"), "{stderr}");
}
