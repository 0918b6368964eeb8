// SPDX-License-Identifier: MPL-2.0

use std::process::Command;

fn main() {
    // Re-run build script if git HEAD changes
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/tags");
    println!("cargo::rerun-if-env-changed=BURST_CAMERA_VERSION");

    // Packagers can pin the version explicitly
    let version = match std::env::var("BURST_CAMERA_VERSION") {
        Ok(v) => v,
        Err(_) => git_version().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
    };

    println!("cargo::rustc-env=GIT_VERSION={}", version);
}

/// "0.1.0-abcdef1" at a tag, "0.1.0-dirty-abcdef1" after it, bare hash without tags
fn git_version() -> Option<String> {
    let describe = run_git(&["describe", "--tags", "--always", "--match", "v*"])?;
    let describe = describe.strip_prefix('v').unwrap_or(&describe).to_string();
    let hash = run_git(&["rev-parse", "--short", "HEAD"])?;

    if describe == hash {
        return Some(hash);
    }

    let parts: Vec<&str> = describe.rsplitn(3, '-').collect();
    if parts.len() >= 3 {
        let commit = parts[0].strip_prefix('g').unwrap_or(parts[0]);
        Some(format!("{}-dirty-{}", parts[2], commit))
    } else {
        Some(format!("{}-{}", describe, hash))
    }
}

fn run_git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
