//! Input discovery.
//!
//! Candidate twix files are the `.dat` files directly inside the subject's
//! data directory. File names often, but not always, say what a scan is;
//! the hint found there is only used to cross-check the classifier.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use crate::classify::ScanCategory;

/// A candidate input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path to the file
    pub path: PathBuf,
    /// Category suggested by the file name
    pub hint: Option<ScanCategory>,
}

impl DiscoveredFile {
    /// Wrap a path, deriving the hint from its file name
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hint = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(category_hint);
        Self { path, hint }
    }
}

/// Category suggested by a file name, if exactly one category matches.
///
/// Calibration files are also recognised by `dynamic`, which the `dyn`
/// marker already covers.
pub fn category_hint(file_name: &str) -> Option<ScanCategory> {
    match ScanCategory::matching(file_name).as_slice() {
        [category] => Some(*category),
        _ => None,
    }
}

fn is_twix(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dat"))
}

/// List `.dat` files in `dir`, sorted by path.
pub fn discover(dir: impl AsRef<Path>) -> io::Result<Vec<DiscoveredFile>> {
    let mut files: Vec<DiscoveredFile> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_twix(path))
        .map(DiscoveredFile::new)
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(
        "Discovered {} twix file(s) in {}",
        files.len(),
        dir.as_ref().display()
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_hints() {
        assert_eq!(
            category_hint("meas_MID00123_FID45678_Xe_cali.dat"),
            Some(ScanCategory::Calibration)
        );
        assert_eq!(
            category_hint("meas_MID00124_dynamic_spectroscopy.dat"),
            Some(ScanCategory::Calibration)
        );
        assert_eq!(
            category_hint("meas_MID00125_xe_radial_Dixon.dat"),
            Some(ScanCategory::Dixon)
        );
        assert_eq!(
            category_hint("meas_MID00126_1H_BHUTE_Radial.dat"),
            Some(ScanCategory::Proton)
        );
        assert_eq!(category_hint("meas_MID00127_scout.dat"), None);
        // Both dixon and dyn markers: no hint.
        assert_eq!(category_hint("dixon_dyn.dat"), None);
    }

    #[test]
    fn test_discover_lists_dat_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_dixon.dat", "a_cali.DAT", "notes.txt", "c_unknown.dat"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("sub.dat")).unwrap();

        let files = discover(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();

        assert_eq!(names, vec!["a_cali.DAT", "b_dixon.dat", "c_unknown.dat"]);
        assert_eq!(files[0].hint, Some(ScanCategory::Calibration));
        assert_eq!(files[2].hint, None);
    }

    #[test]
    fn test_discover_missing_dir() {
        assert!(discover("/nonexistent/twix2mrd").is_err());
    }
}
