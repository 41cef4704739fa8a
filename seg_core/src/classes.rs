//! Class tables for the supported abdominal CT datasets.

use core::fmt;
use core::str::FromStr;

const FLARE22_CLASSES: [&str; 14] = [
    "background",
    "liver",
    "right kidney",
    "spleen",
    "pancreas",
    "aorta",
    "inferior vena cava",
    "right adrenal gland",
    "left adrenal gland",
    "gallbladder",
    "esophagus",
    "stomach",
    "duodenum",
    "left kidney",
];

const AMOS_CLASSES: [&str; 16] = [
    "background",
    "spleen",
    "right kidney",
    "left kidney",
    "gallbladder",
    "esophagus",
    "liver",
    "stomach",
    "aorta",
    "postcava",
    "pancreas",
    "right adrenal gland",
    "left adrenal gland",
    "duodenum",
    "bladder",
    "prostate/uterus",
];

/// Dataset a model is trained or evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    /// FLARE 2022 abdominal organs.
    Flare22,
    /// AMOS 2022 abdominal organs.
    Amos,
}

impl DatasetKind {
    /// Class names, background first.
    pub fn class_names(&self) -> &'static [&'static str] {
        match self {
            Self::Flare22 => &FLARE22_CLASSES,
            Self::Amos => &AMOS_CLASSES,
        }
    }

    /// Number of classes including background.
    pub fn num_classes(&self) -> usize {
        self.class_names().len()
    }

    /// Default number of held-out test volumes.
    pub fn default_test_num(&self) -> usize {
        match self {
            Self::Flare22 => 14,
            Self::Amos => 60,
        }
    }

    /// Name of a class id, or `None` if out of range.
    pub fn class_name(&self, class: usize) -> Option<&'static str> {
        self.class_names().get(class).copied()
    }

    /// Short identifier used in configs and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flare22 => "flare22",
            Self::Amos => "amos",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flare22" | "flare" => Ok(Self::Flare22),
            "amos" => Ok(Self::Amos),
            other => Err(format!("unknown dataset '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_counts() {
        assert_eq!(DatasetKind::Flare22.num_classes(), 14);
        assert_eq!(DatasetKind::Amos.num_classes(), 16);
        assert_eq!(DatasetKind::Flare22.class_name(0), Some("background"));
        assert_eq!(DatasetKind::Amos.class_name(16), None);
    }

    #[test]
    fn test_parse_roundtrip() {
        for kind in [DatasetKind::Flare22, DatasetKind::Amos] {
            assert_eq!(kind.to_string().parse::<DatasetKind>().unwrap(), kind);
        }
        assert!("brats".parse::<DatasetKind>().is_err());
    }
}
