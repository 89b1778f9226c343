//! Project manifest inference: which files does a LaTeX source refer to?
//!
//! A converted document is stored as a single `.tex` file, but its source
//! may `\input` sections, cite a bibliography or include figures. The editor
//! shows these as a project tree so the user can see what is missing.
//!
//! Scanning is textual. Four directive shapes are recognised:
//!
//! | Directive | Arguments | Default extension | Kind |
//! |-----------|-----------|-------------------|------|
//! | `\input{..}`, `\include{..}` | comma list | `.tex` | tex |
//! | `\bibliography{..}` | comma list | `.bib` | bib |
//! | `\addbibresource[..]{..}` | single | none | bib |
//! | `\includegraphics[..]{..}` | single | none | image or asset |
//!
//! Anything else, including malformed directives, is simply not matched.
//! Inference never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// File name used when the stored document has none.
pub const DEFAULT_MAIN_FILENAME: &str = "main.tex";

/// Extensions classified as images for `\includegraphics`.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "bmp", "tiff", "pdf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Tex,
    Bib,
    Image,
    Asset,
    Dir,
}

/// One entry of the project manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFileEntry {
    /// Relative path without a leading `./`.
    pub path: String,
    pub kind: FileKind,
    pub editable: bool,
    /// True only for the stored main document.
    pub stored: bool,
}

impl ProjectFileEntry {
    fn referenced(path: String, kind: FileKind) -> Self {
        Self {
            path,
            kind,
            editable: false,
            stored: false,
        }
    }
}

static RE_INPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:input|include)\s*\{([^}]*)\}").unwrap());

static RE_BIBLIOGRAPHY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\bibliography\s*\{([^}]*)\}").unwrap());

static RE_BIBRESOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\addbibresource\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap());

static RE_GRAPHICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\includegraphics\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap());

/// Infer the project manifest for a stored document.
///
/// The main file comes first (`stored` and `editable`). Every other entry,
/// including a directory for each path prefix, follows sorted with
/// directories before files and by lowercased path within each group.
pub fn infer_project_files(main_filename: &str, source: &str) -> Vec<ProjectFileEntry> {
    let main_path = main_file_path(main_filename);
    let mut manifest = Manifest::default();

    manifest.add(ProjectFileEntry {
        path: main_path.clone(),
        kind: FileKind::Tex,
        editable: true,
        stored: true,
    });
    manifest.add_dirs(&main_path);

    for caps in RE_INPUT.captures_iter(source) {
        for name in caps[1].split(',') {
            manifest.add_reference(name, Some("tex"), |_| FileKind::Tex);
        }
    }
    for caps in RE_BIBLIOGRAPHY.captures_iter(source) {
        for name in caps[1].split(',') {
            manifest.add_reference(name, Some("bib"), |_| FileKind::Bib);
        }
    }
    for caps in RE_BIBRESOURCE.captures_iter(source) {
        manifest.add_reference(&caps[1], None, |_| FileKind::Bib);
    }
    for caps in RE_GRAPHICS.captures_iter(source) {
        manifest.add_reference(&caps[1], None, graphics_kind);
    }

    manifest.into_sorted(&main_path)
}

#[derive(Default)]
struct Manifest {
    entries: Vec<ProjectFileEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Insert or merge. First-seen kind wins; flags are OR-ed.
    fn add(&mut self, entry: ProjectFileEntry) {
        match self.index.get(&entry.path) {
            Some(&i) => {
                let existing = &mut self.entries[i];
                existing.editable |= entry.editable;
                existing.stored |= entry.stored;
            }
            None => {
                self.index.insert(entry.path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn add_dirs(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('/').filter(|seg| !seg.is_empty()).collect();
        for len in 1..segments.len() {
            let dir = segments[..len].join("/");
            self.add(ProjectFileEntry::referenced(dir, FileKind::Dir));
        }
    }

    fn add_reference(
        &mut self,
        raw: &str,
        default_ext: Option<&str>,
        kind_of: impl Fn(&str) -> FileKind,
    ) {
        let mut path = normalize_path(raw);
        if path.is_empty() {
            return;
        }
        if let Some(ext) = default_ext {
            if !has_extension(&path) {
                path = format!("{path}.{ext}");
            }
        }
        let kind = kind_of(&path);
        self.add_dirs(&path);
        self.add(ProjectFileEntry::referenced(path, kind));
    }

    fn into_sorted(mut self, main_path: &str) -> Vec<ProjectFileEntry> {
        let main_idx = self.index.get(main_path).copied().unwrap_or(0);
        let main = self.entries.remove(main_idx);

        let mut rest = self.entries;
        rest.sort_by_cached_key(|e| (e.kind != FileKind::Dir, e.path.to_lowercase()));

        let mut out = Vec::with_capacity(rest.len() + 1);
        out.push(main);
        out.extend(rest);
        out
    }
}

fn main_file_path(filename: &str) -> String {
    let path = normalize_path(filename);
    if path.is_empty() {
        return DEFAULT_MAIN_FILENAME.to_string();
    }
    if has_extension(&path) {
        path
    } else {
        format!("{path}.tex")
    }
}

/// Relative form of a referenced path: no leading `/` or `./`, no empty or
/// `.` segments, no trailing `/`.
fn normalize_path(raw: &str) -> String {
    raw.trim()
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn has_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or(path);
    Path::new(last).extension().is_some()
}

fn graphics_kind(path: &str) -> FileKind {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => FileKind::Image,
        _ => FileKind::Asset,
    }
}
