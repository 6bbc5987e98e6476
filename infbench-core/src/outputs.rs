use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::report::ReportFile;

fn sanitize_relative_output_path(rel: &str) -> Result<PathBuf> {
    if Path::new(rel).is_absolute() {
        return Err(Error::InvalidOutputPath(rel.to_string()));
    }

    let mut clean = PathBuf::new();
    for c in Path::new(rel).components() {
        match c {
            Component::CurDir => {}
            Component::Normal(p) => clean.push(p),
            // Forbid parent traversal and any absolute/prefix/root components.
            _ => return Err(Error::InvalidOutputPath(rel.to_string())),
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(Error::InvalidOutputPath(rel.to_string()));
    }

    Ok(clean)
}

/// Writes report artifacts under `base_dir`, optionally prefixing each file
/// name. File names must be relative and must not contain parent traversal
/// (`..`).
pub fn write_report_files(
    base_dir: &Path,
    prefix: Option<&str>,
    files: &[ReportFile],
) -> Result<()> {
    for file in files {
        let name = match prefix {
            Some(prefix) => format!("{prefix}-{}", file.name),
            None => file.name.clone(),
        };
        let rel = sanitize_relative_output_path(&name)?;
        let path = base_dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &file.contents)?;
    }

    Ok(())
}
