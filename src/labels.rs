//! Custom registration labels dropped into a labels directory

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

pub type Labels = BTreeMap<String, String>;

pub trait LabelSource {
    /// Static labels for one service port; never fails
    fn labels(&self, service_name: &str, port: u16) -> Labels;
}

/// Reads YAML mapping files named `<service><port>*`
pub struct LabelsDir {
    dir: PathBuf,
}

impl LabelsDir {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl LabelSource for LabelsDir {
    fn labels(&self, service_name: &str, port: u16) -> Labels {
        let prefix = format!("{}{}", service_name, port);
        let mut labels = Labels::new();

        let Ok(entries) = fs::read_dir(&self.dir) else {
            return labels;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect();
        files.sort();

        for path in files {
            let parsed = fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_yaml::from_str::<Labels>(&content).ok());
            match parsed {
                Some(file_labels) => labels.extend(file_labels),
                None => {
                    tracing::debug!(path = %path.display(), "Skipping unreadable label file");
                    break;
                }
            }
        }
        labels
    }
}
