//! Folder handling for the intake, quarantine and hand-off directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const PDF_EXTENSIONS: &[&str] = &["pdf"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg"];

/// `"DEED-42_ocred.pdf"` → `"DEED-42"`.
pub fn document_id_from_filename(path: &Path) -> String {
    let stem = file_stem(path);
    stem.strip_suffix("_ocred").unwrap_or(&stem).to_string()
}

/// Resolve a cropped fee-table image back to its deed.
///
/// `"<id>_page_3.png"` and `"<id>_table.png"` both resolve to `"<id>"`.
pub fn document_id_from_image(path: &Path) -> String {
    let stem = file_stem(path);
    let parts: Vec<&str> = stem.split("_page_").collect();
    if parts.len() == 2 {
        parts[0].to_string()
    } else {
        stem.replace("_table", "")
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Regular files in `dir` with one of `extensions`, sorted by name.
/// A missing directory yields an empty list.
pub fn list_files(dir: &Path, extensions: &[&str]) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "Directory does not exist");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn count_files(dir: &Path, extensions: &[&str]) -> usize {
    list_files(dir, extensions).map(|f| f.len()).unwrap_or(0)
}

/// Move `source` into `dest_dir`, keeping its file name.
///
/// Falls back to copy-then-delete when a rename crosses filesystems.
pub fn move_into(source: &Path, dest_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let name = source
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "source has no file name"))?;
    let dest = dest_dir.join(name);

    if fs::rename(source, &dest).is_err() {
        fs::copy(source, &dest)?;
        fs::remove_file(source)?;
    }
    tracing::debug!(from = %source.display(), to = %dest.display(), "Moved file");
    Ok(dest)
}

/// Move every PDF from `from` back into `to`. Returns how many moved.
pub fn requeue(from: &Path, to: &Path) -> io::Result<usize> {
    let mut moved = 0;
    for pdf in list_files(from, PDF_EXTENSIONS)? {
        match move_into(&pdf, to) {
            Ok(_) => moved += 1,
            Err(e) => tracing::warn!(file = %pdf.display(), error = %e, "Failed to requeue file"),
        }
    }
    Ok(moved)
}

/// Write the matching files of `dir` into a gzip tarball at `output`.
/// Returns how many files were archived.
pub fn bundle_dir(dir: &Path, extensions: &[&str], output: &Path) -> io::Result<usize> {
    let files = list_files(dir, extensions)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = fs::File::create(output)?;
    let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut tar = tar::Builder::new(gz);
    for path in &files {
        if let Some(name) = path.file_name() {
            tar.append_path_with_name(path, name)?;
        }
    }
    tar.into_inner()?.finish()?;

    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"%PDF-1.4").unwrap();
        path
    }

    #[test]
    fn document_id_strips_ocred_suffix() {
        assert_eq!(document_id_from_filename(Path::new("/in/DEED-42_ocred.pdf")), "DEED-42");
        assert_eq!(document_id_from_filename(Path::new("DEED-43.pdf")), "DEED-43");
    }

    #[test]
    fn image_id_resolves_page_and_table_forms() {
        assert_eq!(document_id_from_image(Path::new("DEED-1_page_3.png")), "DEED-1");
        assert_eq!(document_id_from_image(Path::new("DEED-1_table.png")), "DEED-1");
        assert_eq!(document_id_from_image(Path::new("DEED-1.jpg")), "DEED-1");
    }

    #[test]
    fn list_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.pdf");
        touch(dir.path(), "a.PDF");
        touch(dir.path(), "notes.txt");
        fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let files = list_files(dir.path(), PDF_EXTENSIONS).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(&dir.path().join("nope"), PDF_EXTENSIONS).unwrap().is_empty());
    }

    #[test]
    fn move_creates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = touch(dir.path(), "x.pdf");
        let dest = move_into(&src, &dir.path().join("processed")).unwrap();
        assert!(!src.exists());
        assert!(dest.exists());
        assert_eq!(dest.file_name().unwrap(), "x.pdf");
    }

    #[test]
    fn requeue_moves_only_pdfs() {
        let root = tempfile::tempdir().unwrap();
        let failed = root.path().join("failed");
        let intake = root.path().join("newly_uploaded");
        fs::create_dir_all(&failed).unwrap();
        touch(&failed, "a.pdf");
        touch(&failed, "b.pdf");
        touch(&failed, "a.log");

        assert_eq!(requeue(&failed, &intake).unwrap(), 2);
        assert_eq!(count_files(&intake, PDF_EXTENSIONS), 2);
        assert_eq!(count_files(&failed, &["log"]), 1);
    }

    #[test]
    fn bundle_contains_every_pdf() {
        let root = tempfile::tempdir().unwrap();
        touch(root.path(), "a.pdf");
        touch(root.path(), "b.pdf");
        let out = root.path().join("out/failed.tar.gz");

        assert_eq!(bundle_dir(root.path(), PDF_EXTENSIONS, &out).unwrap(), 2);

        let gz = flate2::read::GzDecoder::new(fs::File::open(&out).unwrap());
        let mut archive = tar::Archive::new(gz);
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
    }
}
