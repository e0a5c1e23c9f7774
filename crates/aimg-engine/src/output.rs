use std::path::{Path, PathBuf};

const FALLBACK_STEM: &str = "image";

/// Path for the `index`-th image written from `template`.
///
/// `images/Image.png` becomes `images/Image0.png`, `images/Image1.png`, ...
/// The template's own extension is dropped; outputs are always `.png`.
pub fn output_path(template: &Path, index: usize) -> PathBuf {
    let stem = template
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    let file_name = format!("{stem}{index}.png");
    // Empty paths, `/` and `a/..` have no file stem; write inside the directory.
    let parent = if template.file_stem().is_some() {
        template.parent()
    } else {
        Some(template)
    };
    match parent {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name),
        _ => PathBuf::from(file_name),
    }
}
