use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::dataset::DatasetTable;
use crate::error::{Error, Result};

/// Fixed-name artifacts on disk: one dataset CSV and one serialized model.
/// Each write replaces the previous file atomically.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dataset_path: PathBuf,
    model_path: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl AsRef<Path>, dataset_file: &str, model_file: &str) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            dataset_path: data_dir.join(dataset_file),
            model_path: data_dir.join(model_file),
        })
    }

    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn has_dataset(&self) -> bool {
        self.dataset_path.is_file()
    }

    pub fn has_model(&self) -> bool {
        self.model_path.is_file()
    }

    pub fn save_dataset(&self, table: &DatasetTable) -> Result<&Path> {
        let mut buf = Vec::new();
        table.write_csv(&mut buf)?;
        write_atomic(&self.dataset_path, &buf)?;
        info!(rows = table.len(), "dataset written to {}", self.dataset_path.display());
        Ok(&self.dataset_path)
    }

    pub fn load_dataset(&self, points: usize) -> Result<DatasetTable> {
        if !self.has_dataset() {
            return Err(Error::DataMissing(self.dataset_path.clone()));
        }
        DatasetTable::read_path(&self.dataset_path, points)
    }

    pub fn save_model(&self, bytes: &[u8]) -> Result<&Path> {
        write_atomic(&self.model_path, bytes)?;
        info!(bytes = bytes.len(), "model written to {}", self.model_path.display());
        Ok(&self.model_path)
    }

    pub fn load_model_bytes(&self) -> Result<Vec<u8>> {
        if !self.has_model() {
            return Err(Error::ModelNotFound(self.model_path.clone()));
        }
        Ok(fs::read(&self.model_path)?)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LandmarkVector, Sample};

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir.join("data"), "facial_expressions.csv", "expression_model.bin").unwrap()
    }

    #[test]
    fn missing_artifacts_map_to_domain_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(store.load_dataset(1), Err(Error::DataMissing(_))));
        assert!(matches!(store.load_model_bytes(), Err(Error::ModelNotFound(_))));
    }

    #[test]
    fn dataset_is_overwritten_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let first = DatasetTable::new(1, vec![Sample::new("a", LandmarkVector::new(vec![1.0, 2.0, 3.0]))]).unwrap();
        store.save_dataset(&first).unwrap();
        let second = DatasetTable::new(1, Vec::new()).unwrap();
        store.save_dataset(&second).unwrap();

        assert!(store.load_dataset(1).unwrap().is_empty());
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("data")).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn model_bytes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.save_model(b"model").unwrap();
        assert!(store.has_model());
        assert_eq!(store.load_model_bytes().unwrap(), b"model");
    }
}
