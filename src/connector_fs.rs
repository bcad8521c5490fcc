//! Filesystem side of a selection: folder walks and PDF page expansion.
//!
//! A picker hands back folders and/or files. [`expand_selection`] turns that
//! into the ordered list of image paths fed to the ingestion pass.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::FilesConfig;
use crate::traits::PdfRasterizer;

const PDF_EXTENSION: &str = "pdf";

/// Every supported image (and PDF) below `root`, sorted.
pub fn scan_folder(root: &Path, files: &FilesConfig) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Selected folder does not exist: {}", root.display());
    }

    let accepted = build_extension_set(&files.image_extensions, true)?;
    let mut paths = Vec::new();

    let walker = WalkDir::new(root).follow_links(files.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if matches_file_name(&accepted, entry.path()) {
            paths.push(entry.into_path());
        }
    }

    // Sort for deterministic ordering
    paths.sort();

    Ok(paths)
}

/// Expand a picker result into image paths.
///
/// Folders are scanned recursively, PDFs are rasterized and capped at
/// `max_pages`, other files are kept only if their extension is a supported
/// image type. Order follows the selection; duplicates are dropped.
pub fn expand_selection(
    selection: &[PathBuf],
    files: &FilesConfig,
    rasterizer: &dyn PdfRasterizer,
    max_pages: usize,
) -> Result<Vec<PathBuf>> {
    let images = build_extension_set(&files.image_extensions, false)?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let mut push = |path: PathBuf, out: &mut Vec<PathBuf>| {
        if seen.insert(path.clone()) {
            out.push(path);
        }
    };

    for selected in selection {
        let candidates = if selected.is_dir() {
            scan_folder(selected, files)?
        } else {
            vec![selected.clone()]
        };

        for path in candidates {
            if is_pdf(&path) {
                match rasterizer.rasterize(&path, max_pages) {
                    Some(pages) => {
                        for page in pages.into_iter().take(max_pages) {
                            push(page, &mut out);
                        }
                    }
                    None => warn!("PDF skipped, failed to read: {}", path.display()),
                }
            } else if matches_file_name(&images, &path) {
                push(path, &mut out);
            } else {
                debug!("Unsupported file skipped: {}", path.display());
            }
        }
    }

    Ok(out)
}

pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(PDF_EXTENSION))
        .unwrap_or(false)
}

fn matches_file_name(set: &GlobSet, path: &Path) -> bool {
    path.file_name()
        .map(|name| set.is_match(Path::new(name)))
        .unwrap_or(false)
}

fn build_extension_set(extensions: &[String], include_pdf: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let pdf = include_pdf.then(|| PDF_EXTENSION.to_string());
    for ext in extensions.iter().chain(pdf.iter()) {
        let glob = GlobBuilder::new(&format!("*.{}", ext))
            .case_insensitive(true)
            .build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// [`PdfRasterizer`] over pages rendered ahead of time.
///
/// Page `n` (from 1) of `dir/name.pdf` is `dir/name_n.png`. Pages are taken
/// in order until one is missing or the cap is reached.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrerenderedPages;

impl PrerenderedPages {
    pub fn page_path(pdf: &Path, page: usize) -> Option<PathBuf> {
        let stem = pdf.file_stem()?.to_string_lossy();
        Some(pdf.with_file_name(format!("{}_{}.png", stem, page)))
    }
}

impl PdfRasterizer for PrerenderedPages {
    fn rasterize(&self, pdf: &Path, max_pages: usize) -> Option<Vec<PathBuf>> {
        if !pdf.is_file() {
            return None;
        }
        let pages: Vec<PathBuf> = (1..=max_pages)
            .map_while(|page| Self::page_path(pdf, page).filter(|p| p.is_file()))
            .collect();
        if pages.is_empty() {
            None
        } else {
            Some(pages)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Pretends every PDF has `pages` pages rendered next to it.
    struct FixedPages {
        pages: usize,
    }

    impl PdfRasterizer for FixedPages {
        fn rasterize(&self, pdf: &Path, _max_pages: usize) -> Option<Vec<PathBuf>> {
            if pdf.to_string_lossy().contains("broken") {
                return None;
            }
            Some(
                (1..=self.pages)
                    .filter_map(|n| PrerenderedPages::page_path(pdf, n))
                    .collect(),
            )
        }
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn scan_filters_by_extension_case_insensitively() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("a.png"));
        touch(&root.join("nested/b.JPG"));
        touch(&root.join("nested/deeper/c.pdf"));
        touch(&root.join("notes.txt"));

        let found = scan_folder(root, &FilesConfig::default()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.png", "nested/b.JPG", "nested/deeper/c.pdf"]);
    }

    #[test]
    fn scan_rejects_missing_folder() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_folder(&tmp.path().join("nope"), &FilesConfig::default()).is_err());
    }

    #[test]
    fn pdf_pages_beyond_cap_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("doc.pdf");
        touch(&pdf);

        let out = expand_selection(
            &[pdf.clone()],
            &FilesConfig::default(),
            &FixedPages { pages: 25 },
            20,
        )
        .unwrap();
        assert_eq!(out.len(), 20);
        assert_eq!(out[0], tmp.path().join("doc_1.png"));
        assert_eq!(out[19], tmp.path().join("doc_20.png"));
    }

    #[test]
    fn unreadable_pdf_and_unsupported_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let img = tmp.path().join("a.png");
        let broken = tmp.path().join("broken.pdf");
        let txt = tmp.path().join("readme.txt");
        for p in [&img, &broken, &txt] {
            touch(p);
        }

        let out = expand_selection(
            &[broken, txt, img.clone(), img.clone()],
            &FilesConfig::default(),
            &FixedPages { pages: 2 },
            20,
        )
        .unwrap();
        assert_eq!(out, vec![img]);
    }

    #[test]
    fn prerendered_pages_stop_at_first_gap_and_cap() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("scan.pdf");
        touch(&pdf);
        for n in [1, 2, 3, 5] {
            touch(&tmp.path().join(format!("scan_{}.png", n)));
        }

        let pages = PrerenderedPages.rasterize(&pdf, 20).unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(PrerenderedPages.rasterize(&pdf, 2).unwrap().len(), 2);
        assert!(PrerenderedPages
            .rasterize(&tmp.path().join("other.pdf"), 20)
            .is_none());
    }
}
