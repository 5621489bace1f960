// build.rs
// Compiles the GLSL sources in shaders/ to SPIR-V under target/shaders.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Some(glslc) = locate_glslc() else {
        println!("cargo:warning=glslc not found, shaders were not compiled");
        return;
    };

    let shader_dir = PathBuf::from("shaders");
    let target_dir = PathBuf::from("../../target/shaders");
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        println!("cargo:warning=Failed to create {}: {}", target_dir.display(), e);
        return;
    }

    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return;
        }
    };

    let mut compiled_count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(out_file) = output_path(&path, &target_dir) else {
            continue;
        };

        if !needs_compile(&path, &out_file) {
            continue;
        }

        match Command::new(&glslc).arg(&path).arg("-o").arg(&out_file).status() {
            Ok(status) if status.success() => compiled_count += 1,
            Ok(status) => println!(
                "cargo:warning=glslc failed for {} with exit code {}",
                path.display(),
                status.code().unwrap_or(-1)
            ),
            Err(e) => println!("cargo:warning=Failed to run glslc for {}: {}", path.display(), e),
        }
    }

    eprintln!("info: Compiled {} shader(s)", compiled_count);
}

/// `line.vert` becomes `line_vert.spv`, matching the runtime naming convention.
fn output_path(source: &Path, target_dir: &Path) -> Option<PathBuf> {
    let stage = source.extension()?.to_str()?;
    if !SHADER_STAGES.contains(&stage) {
        return None;
    }
    let stem = source.file_stem()?.to_str()?;
    Some(target_dir.join(format!("{stem}_{stage}.spv")))
}

fn needs_compile(source: &Path, output: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => src > dst,
        _ => true,
    }
}

fn locate_glslc() -> Option<PathBuf> {
    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let candidate = if cfg!(target_os = "windows") {
            PathBuf::from(sdk).join("Bin").join("glslc.exe")
        } else {
            PathBuf::from(sdk).join("bin").join("glslc")
        };
        if candidate.exists() {
            return Some(candidate);
        }
    }

    Command::new("glslc")
        .arg("--version")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|_| PathBuf::from("glslc"))
}
