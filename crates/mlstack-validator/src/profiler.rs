//! Dataset profiling.

use chrono::{DateTime, Utc};
use mlstack_core::dataset::{ColumnData, Dataset};
use mlstack_core::profile::{ColumnDrift, ColumnProfile, InferredType, NumericSummary, ProfileView};
use std::collections::{BTreeMap, BTreeSet};

/// Profile `dataset`, with per-column drift against `comparison` when given.
pub fn profile_dataset(
    dataset: &Dataset,
    comparison: Option<&Dataset>,
    categories: Option<&[String]>,
    timestamp: Option<DateTime<Utc>>,
) -> ProfileView {
    let columns: BTreeMap<String, ColumnProfile> = dataset
        .columns()
        .iter()
        .map(|c| (c.name.clone(), profile_column(&c.data)))
        .collect();

    let drift = comparison.map(|baseline| {
        let baseline: BTreeMap<&str, ColumnProfile> = baseline
            .columns()
            .iter()
            .map(|c| (c.name.as_str(), profile_column(&c.data)))
            .collect();
        columns
            .iter()
            .map(|(name, profile)| {
                let drift = match baseline.get(name.as_str()) {
                    Some(base) => column_drift(profile, base),
                    None => ColumnDrift {
                        null_ratio_delta: 0.0,
                        mean_delta: None,
                        stddev_ratio: None,
                        missing_in_comparison: true,
                    },
                };
                (name.clone(), drift)
            })
            .collect()
    });

    ProfileView {
        dataset_timestamp: timestamp.unwrap_or_else(Utc::now),
        num_rows: dataset.num_rows() as u64,
        columns,
        drift,
        categories: categories.map(<[String]>::to_vec).unwrap_or_default(),
    }
}

fn profile_column(data: &ColumnData) -> ColumnProfile {
    match data {
        ColumnData::Float(values) => {
            let present: Vec<f64> = values
                .iter()
                .filter_map(|v| v.filter(|f| f.is_finite()))
                .collect();
            // -0.0 and 0.0 count as one value.
            let distinct: BTreeSet<u64> = present.iter().map(|f| (f + 0.0).to_bits()).collect();
            ColumnProfile {
                inferred_type: if present.is_empty() {
                    InferredType::Null
                } else {
                    InferredType::Fractional
                },
                count: present.len() as u64,
                null_count: (values.len() - present.len()) as u64,
                distinct_count: distinct.len() as u64,
                numeric: summarize(&present),
            }
        }
        ColumnData::Text(values) => {
            let present: Vec<&str> = values.iter().filter_map(|v| v.as_deref()).collect();
            let distinct: BTreeSet<&str> = present.iter().copied().collect();
            ColumnProfile {
                inferred_type: if present.is_empty() {
                    InferredType::Null
                } else {
                    InferredType::String
                },
                count: present.len() as u64,
                null_count: (values.len() - present.len()) as u64,
                distinct_count: distinct.len() as u64,
                numeric: None,
            }
        }
    }
}

fn summarize(values: &[f64]) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(NumericSummary {
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean,
        stddev: variance.sqrt(),
    })
}

fn null_ratio(profile: &ColumnProfile) -> f64 {
    let total = profile.count + profile.null_count;
    if total == 0 {
        0.0
    } else {
        profile.null_count as f64 / total as f64
    }
}

fn column_drift(profile: &ColumnProfile, baseline: &ColumnProfile) -> ColumnDrift {
    let (mean_delta, stddev_ratio) = match (&profile.numeric, &baseline.numeric) {
        (Some(cur), Some(base)) => (
            Some(cur.mean - base.mean),
            (base.stddev > 0.0).then(|| cur.stddev / base.stddev),
        ),
        _ => (None, None),
    };
    ColumnDrift {
        null_ratio_delta: null_ratio(profile) - null_ratio(baseline),
        mean_delta,
        stddev_ratio,
        missing_in_comparison: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mlstack_core::dataset::Column;

    fn dataset() -> Dataset {
        Dataset::new(vec![
            Column {
                name: "x".into(),
                data: ColumnData::Float(vec![Some(1.0), Some(3.0), None, Some(3.0)]),
            },
            Column {
                name: "label".into(),
                data: ColumnData::Text(vec![
                    Some("a".into()),
                    None,
                    Some("b".into()),
                    Some("a".into()),
                ]),
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_column_metrics() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let view = profile_dataset(&dataset(), None, None, Some(ts));

        assert_eq!(view.num_rows, 4);
        assert_eq!(view.dataset_timestamp, ts);
        assert!(view.drift.is_none());

        let x = &view.columns["x"];
        assert_eq!(x.inferred_type, InferredType::Fractional);
        assert_eq!((x.count, x.null_count, x.distinct_count), (3, 1, 2));
        let summary = x.numeric.as_ref().unwrap();
        assert_eq!((summary.min, summary.max), (1.0, 3.0));
        assert!((summary.mean - 7.0 / 3.0).abs() < 1e-12);

        let label = &view.columns["label"];
        assert_eq!(label.inferred_type, InferredType::String);
        assert_eq!((label.count, label.null_count, label.distinct_count), (3, 1, 2));
        assert!(label.numeric.is_none());
    }

    #[test]
    fn test_deterministic_for_same_input() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = profile_dataset(&dataset(), Some(&dataset()), None, Some(ts));
        let b = profile_dataset(&dataset(), Some(&dataset()), None, Some(ts));
        assert_eq!(a, b);
    }

    #[test]
    fn test_drift_against_baseline() {
        let baseline = Dataset::new(vec![Column::float("x", vec![1.0, 1.0, 1.0, 1.0])]).unwrap();
        let categories = vec!["drift".to_string()];
        let view = profile_dataset(&dataset(), Some(&baseline), Some(&categories), None);
        let drift = view.drift.unwrap();

        let x = &drift["x"];
        assert!((x.null_ratio_delta - 0.25).abs() < 1e-12);
        assert!((x.mean_delta.unwrap() - (7.0 / 3.0 - 1.0)).abs() < 1e-12);
        assert_eq!(x.stddev_ratio, None);
        assert!(drift["label"].missing_in_comparison);
        assert_eq!(view.categories, vec!["drift".to_string()]);
    }

    #[test]
    fn test_all_missing_column() {
        let ds = Dataset::new(vec![Column {
            name: "empty".into(),
            data: ColumnData::Float(vec![None, None]),
        }])
        .unwrap();
        let view = profile_dataset(&ds, None, None, None);
        let profile = &view.columns["empty"];
        assert_eq!(profile.inferred_type, InferredType::Null);
        assert_eq!(profile.null_count, 2);
        assert!(profile.numeric.is_none());
    }

    #[test]
    fn test_non_finite_cells_count_as_missing() {
        let data = ColumnData::Float(vec![
            Some(1.0),
            Some(f64::INFINITY),
            Some(3.0),
            Some(f64::NAN),
        ]);
        let profile = profile_column(&data);
        assert_eq!((profile.count, profile.null_count), (2, 2));
        let summary = profile.numeric.unwrap();
        assert_eq!((summary.mean, summary.stddev), (2.0, 1.0));
    }

    #[test]
    fn test_profile_survives_artifact_encoding() {
        use mlstack_core::artifact::Artifact;

        let view = profile_dataset(&dataset(), Some(&dataset()), None, None);
        let decoded: ProfileView = Artifact::new(&view).unwrap().decode().unwrap();
        assert_eq!(decoded.num_rows, view.num_rows);
        assert_eq!(decoded.columns["x"].count, 3);
        let mean = decoded.columns["x"].numeric.as_ref().unwrap().mean;
        assert!((mean - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(decoded.drift.map(|d| d.len()), Some(2));
    }
}
