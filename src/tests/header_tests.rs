// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::fs;
use std::path::{Path, PathBuf};
use std::string::String;
use std::vec::Vec;

const HEADER: &str = "// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.";

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            rust_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

#[test]
fn test_kernel_sources_carry_license_header() {
    let mut files = Vec::new();
    rust_files(&Path::new(env!("CARGO_MANIFEST_DIR")).join("src"), &mut files);
    assert!(files.len() > 10);

    let missing: Vec<String> = files
        .iter()
        .filter(|path| !fs::read_to_string(path).unwrap().lines().take(2).any(|line| line == HEADER))
        .map(|path| path.display().to_string())
        .collect();
    assert!(missing.is_empty(), "missing license header: {missing:?}");
}
