//! Synthetic image data for the example pipelines.
//!
//! Each row is a tiny grayscale "image" of [`NUM_PIXELS`] intensities in
//! `0..=255`. Class 1 lights up the first half of the pixels, class 0 the
//! second half. Values come from SHA-256 of `(seed, index)`, so a seed always
//! yields the same dataset.

use mlstack_core::artifact::ArtifactType;
use mlstack_core::dataset::{Column, ColumnData, Dataset};
use mlstack_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const NUM_PIXELS: usize = 8;
pub const LABEL: &str = "label";
const PIXEL_MAX: f64 = 255.0;

pub fn pixel_name(index: usize) -> String {
    format!("pixel_{index}")
}

/// Uniform value in `[0, 1)`.
fn unit(seed: u64, index: u64) -> f64 {
    let digest = Sha256::digest(format!("{seed}:{index}"));
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

pub fn synthetic_images(rows: usize, seed: u64, labeled: bool) -> Result<Dataset> {
    let mut pixels = vec![Vec::with_capacity(rows); NUM_PIXELS];
    let mut labels = Vec::with_capacity(rows);
    for row in 0..rows {
        let base = (row * (NUM_PIXELS + 1)) as u64;
        let label = if unit(seed, base) < 0.5 { 0.0 } else { 1.0 };
        for (j, column) in pixels.iter_mut().enumerate() {
            let lit = (j < NUM_PIXELS / 2) == (label == 1.0);
            let noise = unit(seed, base + 1 + j as u64);
            let intensity = if lit { 0.45 + 0.55 * noise } else { 0.6 * noise };
            column.push((intensity * PIXEL_MAX).round());
        }
        labels.push(label);
    }

    let mut columns: Vec<Column> = pixels
        .into_iter()
        .enumerate()
        .map(|(j, values)| Column::float(pixel_name(j), values))
        .collect();
    if labeled {
        columns.push(Column::float(LABEL, labels));
    }
    Dataset::new(columns)
}

/// Scale pixel intensities to `[0, 1]`. Other columns pass through.
pub fn normalize(dataset: &Dataset) -> Result<Dataset> {
    let columns = dataset
        .columns()
        .iter()
        .map(|column| match &column.data {
            ColumnData::Float(values) if column.name != LABEL => Column {
                name: column.name.clone(),
                data: ColumnData::Float(
                    values.iter().map(|v| v.map(|x| x / PIXEL_MAX)).collect(),
                ),
            },
            _ => column.clone(),
        })
        .collect();
    Dataset::new(columns)
}

/// Pixel rows of `dataset`. Missing pixels read as 0.
pub fn feature_rows(dataset: &Dataset) -> Result<Vec<Vec<f64>>> {
    let columns = (0..NUM_PIXELS)
        .map(|j| dataset.float_column(&pixel_name(j)))
        .collect::<Result<Vec<_>>>()?;
    Ok((0..dataset.num_rows())
        .map(|row| columns.iter().map(|c| c[row].unwrap_or(0.0)).collect())
        .collect())
}

pub fn labels(dataset: &Dataset) -> Result<Vec<f64>> {
    dataset
        .float_column(LABEL)?
        .iter()
        .enumerate()
        .map(|(row, v)| v.ok_or_else(|| Error::Validation(format!("row {row} has no label"))))
        .collect()
}

/// Training and evaluation halves of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainTestSplit {
    pub train: Dataset,
    pub test: Dataset,
}

impl ArtifactType for TrainTestSplit {
    const TYPE_NAME: &'static str = "train_test_split";
}

impl TrainTestSplit {
    pub fn new(dataset: &Dataset, test_fraction: f64) -> Self {
        let (train, test) = dataset.split(1.0 - test_fraction);
        Self { train, test }
    }

    pub fn normalized(&self) -> Result<Self> {
        Ok(Self {
            train: normalize(&self.train)?,
            test: normalize(&self.test)?,
        })
    }
}
