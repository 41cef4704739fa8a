//! Case discovery over paired image/label directories.

use std::path::{Path, PathBuf};

use crate::error::{Result, SegIoError};

/// One scan paired with its reference label file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasePaths {
    /// File name shared by image and label.
    pub name: String,
    /// Path of the scan.
    pub image: PathBuf,
    /// Path of the label map.
    pub label: PathBuf,
}

impl CasePaths {
    /// Case identifier with the modality suffix and extension stripped.
    pub fn case_id(&self) -> &str {
        let stem = self.name.split('.').next().unwrap_or(&self.name);
        stem.strip_suffix("_0000").unwrap_or(stem)
    }
}

/// Regular files in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Pair every file in `image_dir` with the identically named file in `label_dir`.
///
/// Sub-directories are skipped. A scan without a label is an error.
pub fn discover_cases(image_dir: &Path, label_dir: &Path) -> Result<Vec<CasePaths>> {
    let cases = list_files(image_dir)?
        .into_iter()
        .map(|name| {
            let image = image_dir.join(&name);
            let label = label_dir.join(&name);
            if !label.is_file() {
                return Err(SegIoError::MissingLabel { image, label });
            }
            Ok(CasePaths { name, image, label })
        })
        .collect::<Result<Vec<_>>>()?;
    log::debug!("discovered {} cases in {}", cases.len(), image_dir.display());
    Ok(cases)
}

/// Output name for a prediction: the first two `_`-separated components of
/// `name` joined by `_`, with `ext` appended.
///
/// `FLARE22_0001_0000.svol` becomes `FLARE22_0001.svol`.
pub fn prediction_file_name(name: &str, ext: &str) -> Result<String> {
    let mut parts = name.split('_');
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
            // A two-component name keeps its extension on the second part.
            let b = b.split('.').next().unwrap_or(b);
            Ok(format!("{a}_{b}.{ext}"))
        }
        _ => Err(SegIoError::InvalidCaseName {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_prediction_file_name() {
        assert_eq!(
            prediction_file_name("FLARE22_0001_0000.svol", "svol").unwrap(),
            "FLARE22_0001.svol"
        );
        assert_eq!(
            prediction_file_name("amos_0042.svol", "svol").unwrap(),
            "amos_0042.svol"
        );
        assert!(prediction_file_name("case.svol", "svol").is_err());
    }

    #[test]
    fn test_case_id() {
        let case = CasePaths {
            name: "FLARE22_0007_0000.svol".into(),
            image: PathBuf::new(),
            label: PathBuf::new(),
        };
        assert_eq!(case.case_id(), "FLARE22_0007");
    }

    #[test]
    fn test_discover_cases_sorted_and_paired() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        let labels = root.path().join("labels");
        fs::create_dir_all(images.join("nested")).unwrap();
        fs::create_dir_all(&labels).unwrap();
        for name in ["b_0002_0000.svol", "a_0001_0000.svol"] {
            fs::write(images.join(name), b"x").unwrap();
            fs::write(labels.join(name), b"y").unwrap();
        }

        let cases = discover_cases(&images, &labels).unwrap();
        let names: Vec<&str> = cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a_0001_0000.svol", "b_0002_0000.svol"]);
        assert_eq!(cases[0].label, labels.join("a_0001_0000.svol"));
    }

    #[test]
    fn test_missing_label_is_error() {
        let root = tempfile::tempdir().unwrap();
        let images = root.path().join("images");
        let labels = root.path().join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        fs::write(images.join("c_0003_0000.svol"), b"x").unwrap();

        let err = discover_cases(&images, &labels).unwrap_err();
        assert!(matches!(err, SegIoError::MissingLabel { .. }));
    }
}
