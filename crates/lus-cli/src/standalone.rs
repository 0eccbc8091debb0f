// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `--standalone`: package a script and its includes with the
//! running interpreter into one executable.

use std::path::{Path, PathBuf};

use lus_bundle::BundleBuilder;

/// Derive a module name from a path: extension stripped, path
/// separators becoming dots. `lib/util.lus` → `lib.util`.
fn module_name(path: &str) -> String {
    let trimmed = path.strip_prefix("./").unwrap_or(path);
    let no_ext = trimmed.strip_suffix(".lus").unwrap_or(trimmed);
    no_ext.replace(['/', '\\'], ".")
}

/// `path[:alias]` — an explicit alias overrides derivation.
fn split_include(spec: &str) -> (&str, String) {
    match spec.split_once(':') {
        Some((path, alias)) if !alias.is_empty() => (path, alias.to_string()),
        _ => (spec, module_name(spec)),
    }
}

/// Validate and load one source module for packaging.
fn load_module(path: &str) -> Result<Vec<u8>, String> {
    let source =
        std::fs::read_to_string(path).map_err(|e| format!("cannot open {path}: {e}"))?;
    // A bundle that cannot parse would only fail at run time on the
    // user's machine; reject it here instead.
    lus_parser::parse(&source).map_err(|e| format!("{path}: {e}"))?;
    Ok(source.into_bytes())
}

/// Build the standalone executable next to the entry script.
/// Returns the output path.
pub fn build(
    entry: &str,
    includes: &[String],
    preserved: &[String],
) -> Result<PathBuf, String> {
    let entry_name = module_name(
        Path::new(entry)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("bad script path '{entry}'"))?,
    );

    let mut builder = BundleBuilder::new(&entry_name);
    for option in preserved {
        builder.preserve_arg(option);
    }

    builder.add_file(&entry_name, &load_module(entry)?);
    for spec in includes {
        let (path, alias) = split_include(spec);
        builder.add_file(&alias, &load_module(path)?);
    }

    let exe = std::env::current_exe().map_err(|e| format!("cannot locate interpreter: {e}"))?;
    let mut output = Path::new(entry).with_extension("");
    if output == Path::new(entry) {
        output = output.with_extension("out");
    }
    builder
        .write(&exe, &output)
        .map_err(|e| format!("cannot write {}: {e}", output.display()))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_name_derivation() {
        assert_eq!(module_name("main.lus"), "main");
        assert_eq!(module_name("./main.lus"), "main");
        assert_eq!(module_name("lib/util.lus"), "lib.util");
        assert_eq!(module_name("plain"), "plain");
    }

    #[test]
    fn include_alias_overrides_derivation() {
        assert_eq!(split_include("lib/util.lus"), ("lib/util.lus", "lib.util".to_string()));
        assert_eq!(split_include("lib/util.lus:util"), ("lib/util.lus", "util".to_string()));
    }
}
