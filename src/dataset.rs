//! In-memory sample accumulation and its tabular (CSV) form.
//!
//! Rows are `[label, 0_x, 0_y, 0_z, 1_x, ...]`. Column names are derived from
//! the number of mesh points only, so an exported table can always be
//! checked against the shape a trainer expects.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::types::{LandmarkVector, Sample};

pub const LABEL_COLUMN: &str = "label";

/// Feature column names for `points` mesh points, in flattening order.
pub fn feature_columns(points: usize) -> Vec<String> {
    (0..points)
        .flat_map(|i| ["x", "y", "z"].into_iter().map(move |axis| format!("{i}_{axis}")))
        .collect()
}

#[derive(Debug, Default)]
struct Rows {
    samples: Vec<Sample>,
    feature_len: Option<usize>,
}

/// Append-only store of labeled samples shared between the frame pipeline
/// and operator requests.
#[derive(Debug, Default)]
pub struct Dataset {
    rows: Mutex<Rows>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Rows> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample. Every sample must have the length of the first one.
    pub fn append(&self, sample: Sample) -> Result<usize> {
        let mut rows = self.lock();
        let len = sample.features.len();
        match rows.feature_len {
            Some(expected) if expected != len => {
                return Err(Error::ShapeMismatch {
                    expected,
                    actual: len,
                })
            }
            Some(_) => {}
            None => rows.feature_len = Some(len),
        }
        rows.samples.push(sample);
        Ok(rows.samples.len())
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feature_len(&self) -> Option<usize> {
        self.lock().feature_len
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().samples.clone()
    }

    pub fn counts_by_label(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.lock().samples {
            *counts.entry(sample.label.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Drop every sample and forget the feature length. Returns the number dropped.
    pub fn clear(&self) -> usize {
        let mut rows = self.lock();
        let dropped = rows.samples.len();
        *rows = Rows::default();
        dropped
    }

    /// Swap the contents for a previously exported table.
    pub fn replace_all(&self, table: DatasetTable) -> usize {
        let mut rows = self.lock();
        let feature_len = table.samples.first().map(|s| s.features.len());
        rows.samples = table.samples;
        rows.feature_len = feature_len.or(Some(table.points * 3)).filter(|n| *n > 0);
        rows.samples.len()
    }

    /// Snapshot the dataset as a table with columns for `points` mesh points.
    pub fn export_table(&self, points: usize) -> Result<DatasetTable> {
        DatasetTable::new(points, self.snapshot())
    }
}

/// A dataset snapshot with a fixed column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetTable {
    points: usize,
    samples: Vec<Sample>,
}

impl DatasetTable {
    pub fn new(points: usize, samples: Vec<Sample>) -> Result<Self> {
        let expected = points * 3;
        if let Some(bad) = samples.iter().find(|s| s.features.len() != expected) {
            return Err(Error::ShapeMismatch {
                expected,
                actual: bad.features.len(),
            });
        }
        Ok(Self { points, samples })
    }

    pub fn points(&self) -> usize {
        self.points
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.points * 3 + 1);
        header.push(LABEL_COLUMN.to_string());
        header.extend(feature_columns(self.points));
        header
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(self.header())?;
        for sample in &self.samples {
            let mut record = Vec::with_capacity(sample.features.len() + 1);
            record.push(sample.label.clone());
            record.extend(sample.features.as_slice().iter().map(f32::to_string));
            csv.write_record(&record)?;
        }
        csv.flush()?;
        Ok(())
    }

    /// Parse a table written by [`DatasetTable::write_csv`]. The header must
    /// be exactly the layout for `points` mesh points.
    pub fn read_csv<R: Read>(reader: R, points: usize) -> Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let expected: Vec<String> = std::iter::once(LABEL_COLUMN.to_string())
            .chain(feature_columns(points))
            .collect();
        let header = csv.headers()?;
        if header.len() != expected.len() {
            return Err(Error::ShapeMismatch {
                expected: expected.len() - 1,
                actual: header.len().saturating_sub(1),
            });
        }
        if let Some((got, want)) = header.iter().zip(&expected).find(|(got, want)| got != want) {
            return Err(Error::InvalidArgument(format!(
                "unexpected column '{got}', expected '{want}'"
            )));
        }

        let mut samples = Vec::new();
        for record in csv.records() {
            let record = record?;
            let mut fields = record.iter();
            let label = fields.next().unwrap_or_default().to_string();
            let values = fields
                .map(|field| {
                    field.trim().parse::<f32>().map_err(|e| {
                        Error::InvalidArgument(format!("bad feature value '{field}': {e}"))
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            let features = LandmarkVector::with_len(values, points * 3)?;
            samples.push(Sample::new(label, features));
        }
        Ok(Self { points, samples })
    }

    pub fn read_path(path: &Path, points: usize) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_csv(std::io::BufReader::new(file), points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(points: usize, seed: f32) -> LandmarkVector {
        LandmarkVector::new((0..points * 3).map(|i| seed + i as f32 * 0.001).collect())
    }

    #[test]
    fn column_names_follow_point_order() {
        assert_eq!(feature_columns(2), vec!["0_x", "0_y", "0_z", "1_x", "1_y", "1_z"]);
        assert_eq!(feature_columns(468).len(), 1404);
    }

    #[test]
    fn append_keeps_insertion_order_and_shape() {
        let dataset = Dataset::new();
        dataset.append(Sample::new("a", vector(2, 0.1))).unwrap();
        dataset.append(Sample::new("b", vector(2, 0.2))).unwrap();
        dataset.append(Sample::new("a", vector(2, 0.1))).unwrap();

        let labels: Vec<_> = dataset.snapshot().into_iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["a", "b", "a"]);
        assert_eq!(dataset.counts_by_label()["a"], 2);

        let err = dataset.append(Sample::new("c", vector(3, 0.0))).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 6, actual: 9 }));
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn empty_export_is_header_only() {
        let table = Dataset::new().export_table(2).unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "label,0_x,0_y,0_z,1_x,1_y,1_z\n");

        let back = DatasetTable::read_csv(&b"label,0_x,0_y,0_z,1_x,1_y,1_z\n"[..], 2).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn csv_round_trip_is_exact() {
        let dataset = Dataset::new();
        let awkward = LandmarkVector::new(vec![
            0.1,
            1.0 / 3.0,
            -0.000_012_345_678,
            f32::MIN_POSITIVE,
            123_456.79,
            0.0,
        ]);
        dataset.append(Sample::new("happy", awkward)).unwrap();
        dataset.append(Sample::new("needs, quoting", vector(2, 0.5))).unwrap();

        let table = dataset.export_table(2).unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        let back = DatasetTable::read_csv(out.as_slice(), 2).unwrap();

        assert_eq!(back, table);
    }

    #[test]
    fn read_rejects_wrong_layout() {
        let err = DatasetTable::read_csv(&b"label,0_x,0_y\nhappy,1,2\n"[..], 2).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let short_row = "label,0_x,0_y,0_z\nhappy,1,2\n";
        assert!(DatasetTable::read_csv(short_row.as_bytes(), 1).is_err());
    }

    #[test]
    fn clear_and_replace() {
        let dataset = Dataset::new();
        dataset.append(Sample::new("a", vector(1, 0.0))).unwrap();
        assert_eq!(dataset.clear(), 1);
        assert_eq!(dataset.feature_len(), None);

        let table = DatasetTable::new(1, vec![Sample::new("z", vector(1, 1.0))]).unwrap();
        assert_eq!(dataset.replace_all(table), 1);
        assert_eq!(dataset.feature_len(), Some(3));
    }
}
