//! Build script for detecting system dependencies and model assets.
//!
//! Missing pieces only produce warnings with installation hints; the
//! `opencv` crate's own build fails hard if the library cannot be linked.

use std::env;
use std::path::Path;
use std::process::Command;

/// Model files looked up by the default configuration
const DEFAULT_MODELS: [&str; 3] = [
    "assets/face_detector.onnx",
    "assets/face_mesh.onnx",
    "assets/gaze_estimator.onnx",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=assets");
    println!("cargo:rerun-if-env-changed=PKG_CONFIG_PATH");
    println!("cargo:rerun-if-env-changed=OPENCV_LINK_PATHS");
    println!("cargo:rerun-if-env-changed=OPENCV_INCLUDE_PATHS");

    check_pkg_config();
    check_opencv();
    check_models();

    println!(
        "cargo:rustc-env=BUILD_TARGET={}",
        env::var("TARGET").unwrap_or_default()
    );
}

/// Version reported by `pkg-config --modversion`, if the package is known
fn pkg_config_version(package: &str) -> Option<String> {
    let output = Command::new("pkg-config").args(["--modversion", package]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn check_pkg_config() {
    let found = Command::new("pkg-config")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success());
    if !found {
        println!("cargo:warning=pkg-config not found. This is required to find OpenCV.");
        println!("cargo:warning=On Ubuntu: sudo apt-get install pkg-config");
        println!("cargo:warning=On macOS: brew install pkg-config");
    }
}

fn check_opencv() {
    match pkg_config_version("opencv4").or_else(|| pkg_config_version("opencv")) {
        Some(version) if version.starts_with('3') => {
            println!("cargo:warning=OpenCV {version} found; OpenCV 4 is recommended for calib3d and videoio");
        }
        Some(_) => {}
        None => {
            println!("cargo:warning=OpenCV not found via pkg-config. Make sure OpenCV is installed.");
            println!("cargo:warning=On Ubuntu: sudo apt-get install libopencv-dev");
            println!("cargo:warning=On macOS: brew install opencv");
        }
    }
}

fn check_models() {
    let missing: Vec<&str> = DEFAULT_MODELS
        .into_iter()
        .filter(|model| !Path::new(model).exists())
        .collect();
    if !missing.is_empty() {
        println!(
            "cargo:warning=Model files missing: {}. The binary needs them at runtime (see --example-config).",
            missing.join(", ")
        );
    }
}
