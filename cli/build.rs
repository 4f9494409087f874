use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-env-changed=ROOTCOMPANION_GIT_REVISION");
    if let Err(e) = write_version_files() {
        panic!("Failed to create the version files: {:?}", e);
    }
}

fn build_var(key: &str) -> io::Result<String> {
    env::var(key).map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("{}: {}", key, e)))
}

/// `simple_version_string` holds the crate version for `--version`,
/// `version_string` adds the target and revision for `--help`/`version`
fn write_version_files() -> io::Result<()> {
    let out_dir = PathBuf::from(build_var("OUT_DIR")?);
    let version = build_var("CARGO_PKG_VERSION")?;
    let target = build_var("TARGET")?;
    let rev = git_rev().unwrap_or_else(|| String::from("unknown"));

    fs::write(out_dir.join("simple_version_string"), format!("{:?}", version))?;
    fs::write(
        out_dir.join("version_string"),
        format!("{:?}", format!("{} ({})\nrev {}", version, target, rev)),
    )?;
    Ok(())
}

fn git_rev() -> Option<String> {
    if let Ok(rev) = env::var("ROOTCOMPANION_GIT_REVISION") {
        return Some(rev.trim().to_string());
    }
    let out = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout)
        .ok()
        .map(|it| it.trim().to_string())
        .filter(|it| !it.is_empty())
}
