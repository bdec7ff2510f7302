//! Offline feature export from a recorded stream file.
//!
//! Rows are grouped by `(session_id, level_number)` in the order the groups
//! first appear, each group's values are chunked into fixed-size segments,
//! and every segment becomes one labelled feature row. Levels 2 and 4 are
//! positive, levels 1 and 3 negative, anything else is labelled `-1`.

use crate::collector::types::SampleField;
use crate::core::features::{extract_lenient, FeatureError, FeatureVector};
use crate::storage::csv::{format_row, parse_row};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Header of the exported feature file.
pub const FEATURE_HEADER: [&str; 6] = ["WL", "AAC", "DASDV", "AR", "CC", "Output"];

/// Default file name for averaged recordings.
pub const CLEANED_FILE: &str = "emg_streamed_cleaned.csv";

/// Header of the averaged-recordings file.
pub const CLEANED_HEADER: [&str; 4] = [
    "session_id",
    "level_number",
    "filtered_values",
    "envelope_values",
];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path:?} has no {column:?} column")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Values recorded for one level of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamGroup {
    pub session_id: String,
    pub level_number: u32,
    pub values: Vec<f64>,
}

/// A feature row with its training label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelledFeatures {
    pub features: FeatureVector,
    pub output: i8,
}

impl LabelledFeatures {
    pub fn to_row(&self) -> String {
        format_row(&[
            self.features.wl.to_string(),
            self.features.aac.to_string(),
            self.features.dasdv.to_string(),
            format_array(&self.features.ar),
            format_array(&self.features.cc),
            self.output.to_string(),
        ])
    }
}

/// Training label for a level.
pub fn label_for_level(level_number: u32) -> i8 {
    match level_number {
        2 | 4 => 1,
        1 | 3 => 0,
        _ => -1,
    }
}

/// Extract one value from a logged `value` field.
///
/// Plain numbers are returned as-is; `(filtered, envelope)` pairs yield the
/// requested component. Empty fields (read failures) yield `None`.
pub fn parse_logged_value(raw: &str, field: SampleField) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(inner) = raw.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        let mut parts = inner.split(',').map(str::trim);
        let (filtered, envelope) = (parts.next()?, parts.next()?);
        return match field {
            SampleField::Filtered => filtered.parse().ok(),
            SampleField::Envelope => envelope.parse().ok(),
            SampleField::Signal => None,
        };
    }

    raw.parse().ok()
}

/// Read a stream file and group its values by session and level.
pub fn read_stream_groups(
    path: &Path,
    field: SampleField,
) -> Result<Vec<StreamGroup>, ExportError> {
    let grouped = read_grouped(path, |raw| parse_logged_value(raw, field))?;
    Ok(grouped
        .into_iter()
        .map(|(session_id, level_number, values)| StreamGroup {
            session_id,
            level_number,
            values,
        })
        .collect())
}

/// Read a stream of `(filtered, envelope)` readings, keeping both
/// components per session and level. Rows missing either are skipped.
pub fn read_reading_groups(path: &Path) -> Result<Vec<CleanedGroup>, ExportError> {
    let grouped = read_grouped(path, |raw| {
        if !raw.trim_start().starts_with('(') {
            return None;
        }
        Some((
            parse_logged_value(raw, SampleField::Filtered)?,
            parse_logged_value(raw, SampleField::Envelope)?,
        ))
    })?;
    Ok(grouped
        .into_iter()
        .map(|(session_id, level_number, pairs)| {
            let (filtered, envelope) = pairs.into_iter().unzip();
            CleanedGroup {
                session_id,
                level_number,
                filtered,
                envelope,
            }
        })
        .collect())
}

/// Group parsed values by `(session_id, level_number)` in first-seen order.
fn read_grouped<T>(
    path: &Path,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Vec<(String, u32, Vec<T>)>, ExportError> {
    let content = std::fs::read_to_string(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut lines = content.lines();
    let header = lines.next().map(parse_row).unwrap_or_default();
    let column = |name: &'static str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ExportError::MissingColumn {
                path: path.to_path_buf(),
                column: name,
            })
    };
    let session_col = column("session_id")?;
    let level_col = column("level_number")?;
    let value_col = column("value")?;

    let mut groups: Vec<(String, u32, Vec<T>)> = Vec::new();
    let mut skipped = 0usize;

    for line in lines {
        let fields = parse_row(line);
        let (Some(session_id), Some(level), Some(raw)) = (
            fields.get(session_col),
            fields.get(level_col).and_then(|l| l.trim().parse::<u32>().ok()),
            fields.get(value_col),
        ) else {
            skipped += 1;
            continue;
        };
        let Some(value) = parse(raw) else {
            skipped += 1;
            continue;
        };

        match groups
            .iter_mut()
            .find(|(s, l, _)| s == session_id && *l == level)
        {
            Some((_, _, values)) => values.push(value),
            None => groups.push((session_id.clone(), level, vec![value])),
        }
    }

    if skipped > 0 {
        warn!("Skipped {skipped} rows without a usable value in {}", path.display());
    }
    Ok(groups)
}

/// How many parts each recording is folded into before feature extraction.
///
/// A level's recording is split into equal consecutive parts which are
/// averaged element-wise, so repeated attempts within one level collapse
/// into a single trace. Individual sessions may use a different count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentAveraging {
    pub segments: usize,
    pub per_session: BTreeMap<String, usize>,
}

impl SegmentAveraging {
    pub fn new(segments: usize) -> Self {
        Self {
            segments,
            per_session: BTreeMap::new(),
        }
    }

    /// Use `segments` parts for `session_id`.
    pub fn with_session(mut self, session_id: impl Into<String>, segments: usize) -> Self {
        self.per_session.insert(session_id.into(), segments);
        self
    }

    pub fn segments_for(&self, session_id: &str) -> usize {
        self.per_session
            .get(session_id)
            .copied()
            .unwrap_or(self.segments)
    }
}

/// Split `values` into `n_segments` equal parts of `len / n_segments`
/// values (the remainder is dropped) and average them element-wise.
///
/// Too few values for one element per part yields an empty list.
pub fn average_segments(values: &[f64], n_segments: usize) -> Vec<f64> {
    if n_segments == 0 {
        return Vec::new();
    }
    let n = values.len() / n_segments;
    (0..n)
        .map(|i| {
            let sum: f64 = (0..n_segments).map(|k| values[k * n + i]).sum();
            sum / n_segments as f64
        })
        .collect()
}

/// Both components of one session level, after optional averaging.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedGroup {
    pub session_id: String,
    pub level_number: u32,
    pub filtered: Vec<f64>,
    pub envelope: Vec<f64>,
}

impl CleanedGroup {
    /// Fold both components with the session's segment count.
    pub fn averaged(&self, averaging: &SegmentAveraging) -> Self {
        let n_segments = averaging.segments_for(&self.session_id);
        Self {
            session_id: self.session_id.clone(),
            level_number: self.level_number,
            filtered: average_segments(&self.filtered, n_segments),
            envelope: average_segments(&self.envelope, n_segments),
        }
    }

    /// The selected component as a feature-export group. Only filtered and
    /// envelope values are kept; `Signal` selects the envelope.
    pub fn to_stream_group(&self, field: SampleField) -> StreamGroup {
        let values = match field {
            SampleField::Filtered => self.filtered.clone(),
            SampleField::Envelope | SampleField::Signal => self.envelope.clone(),
        };
        StreamGroup {
            session_id: self.session_id.clone(),
            level_number: self.level_number,
            values,
        }
    }

    pub fn to_row(&self) -> String {
        format_row(&[
            self.session_id.clone(),
            self.level_number.to_string(),
            format_list(&self.filtered),
            format_list(&self.envelope),
        ])
    }
}

/// Append cleaned groups to `path`, writing the header only when the file
/// is created.
pub fn append_cleaned(path: &Path, groups: &[CleanedGroup]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let rows: String = groups.iter().map(CleanedGroup::to_row).collect();
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(format_row(&CLEANED_HEADER).as_bytes())
                .map_err(io_err)?;
            file.write_all(rows.as_bytes()).map_err(io_err)?;
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let mut file = OpenOptions::new().append(true).open(path).map_err(io_err)?;
            file.write_all(rows.as_bytes()).map_err(io_err)?;
        }
        Err(e) => return Err(io_err(e)),
    }

    info!("Appended {} cleaned groups to {}", groups.len(), path.display());
    Ok(())
}

/// Chunk each group into `segment_size` segments and extract features.
pub fn segment_features(
    groups: &[StreamGroup],
    segment_size: usize,
    ar_order: usize,
) -> Result<Vec<LabelledFeatures>, ExportError> {
    let mut rows = Vec::new();
    for group in groups {
        let output = label_for_level(group.level_number);
        if output < 0 {
            warn!(
                "Unexpected level {} in session {}",
                group.level_number, group.session_id
            );
        }
        for segment in group.values.chunks(segment_size.max(1)) {
            rows.push(LabelledFeatures {
                features: extract_lenient(segment, ar_order)?,
                output,
            });
        }
    }
    Ok(rows)
}

/// Write feature rows, replacing any existing file.
pub fn write_features(path: &Path, rows: &[LabelledFeatures]) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut out = format_row(&FEATURE_HEADER);
    for row in rows {
        out.push_str(&row.to_row());
    }

    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(out.as_bytes()).map_err(io_err)?;
    info!("Wrote {} feature rows to {}", rows.len(), path.display());
    Ok(())
}

/// Comma-separated values in brackets, e.g. `[1.0, 2.5]`.
fn format_list(values: &[f64]) -> String {
    let joined = values
        .iter()
        .map(|v| format!("{v:?}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}

/// Space-separated values in brackets, e.g. `[0.5 -0.25]`.
fn format_array(values: &[f64]) -> String {
    let joined = values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" ");
    format!("[{joined}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("emg-{name}-{}.csv", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_average_segments_drops_remainder() {
        let values: Vec<f64> = (1..=7).map(f64::from).collect();
        // Parts [1, 2], [3, 4], [5, 6]; the trailing 7 is dropped
        assert_eq!(average_segments(&values, 3), vec![3.0, 4.0]);
        assert_eq!(average_segments(&values, 1), values);
        assert!(average_segments(&values[..2], 3).is_empty());
        assert!(average_segments(&values, 0).is_empty());
    }

    #[test]
    fn test_session_override() {
        let averaging = SegmentAveraging::new(3).with_session("595", 2);
        assert_eq!(averaging.segments_for("595"), 2);
        assert_eq!(averaging.segments_for("596"), 3);

        let group = CleanedGroup {
            session_id: "595".into(),
            level_number: 2,
            filtered: vec![1.0, 2.0, 3.0, 4.0],
            envelope: vec![10.0, 20.0, 30.0, 40.0],
        };
        let averaged = group.averaged(&averaging);
        assert_eq!(averaged.filtered, vec![2.0, 3.0]);
        assert_eq!(averaged.envelope, vec![20.0, 30.0]);
        assert_eq!(averaged.to_stream_group(SampleField::Envelope).values, vec![20.0, 30.0]);
    }

    #[test]
    fn test_reading_groups_need_both_components() {
        let path = temp_path("readings");
        std::fs::write(
            &path,
            "timestamp,session_id,level_number,value\n\
             1.000,a,1,\"(1.0, 10.0)\"\n\
             1.100,a,1,5.0\n\
             1.200,a,1,\"(2.0, 20.0)\"\n\
             1.300,b,2,\"(3.0, 30.0)\"\n",
        )
        .unwrap();

        let groups = read_reading_groups(&path).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].filtered, vec![1.0, 2.0]);
        assert_eq!(groups[0].envelope, vec![10.0, 20.0]);
        assert_eq!(groups[1].session_id, "b");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_cleaned_header_written_once() {
        let path = temp_path("cleaned");
        let group = CleanedGroup {
            session_id: "s".into(),
            level_number: 1,
            filtered: vec![1.0, 2.5],
            envelope: vec![3.0],
        };
        append_cleaned(&path, std::slice::from_ref(&group)).unwrap();
        append_cleaned(&path, &[group]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "session_id,level_number,filtered_values,envelope_values\n\
             s,1,\"[1.0, 2.5]\",[3.0]\n\
             s,1,\"[1.0, 2.5]\",[3.0]\n"
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_labels() {
        assert_eq!(label_for_level(2), 1);
        assert_eq!(label_for_level(4), 1);
        assert_eq!(label_for_level(1), 0);
        assert_eq!(label_for_level(3), 0);
        assert_eq!(label_for_level(7), -1);
    }

    #[test]
    fn test_parse_logged_value() {
        assert_eq!(parse_logged_value("12.5", SampleField::Envelope), Some(12.5));
        assert_eq!(
            parse_logged_value("(1.5, 2.5)", SampleField::Filtered),
            Some(1.5)
        );
        assert_eq!(
            parse_logged_value("(1.5, 2.5)", SampleField::Envelope),
            Some(2.5)
        );
        assert_eq!(parse_logged_value("", SampleField::Envelope), None);
    }

    #[test]
    fn test_segments_include_short_tail() {
        let groups = vec![StreamGroup {
            session_id: "s".into(),
            level_number: 2,
            values: (0..101).map(|i| i as f64).collect(),
        }];
        let rows = segment_features(&groups, 50, 4).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].features.wl, 49.0);
        assert_eq!(rows[2].features.wl, 0.0);
        assert!(rows.iter().all(|r| r.output == 1));
    }

    #[test]
    fn test_feature_row_format() {
        let row = LabelledFeatures {
            features: FeatureVector {
                wl: 49.0,
                aac: 0.98,
                dasdv: 1.0,
                ar: vec![0.5, -0.25],
                cc: vec![-0.5, 0.125],
            },
            output: 0,
        };
        assert_eq!(row.to_row(), "49,0.98,1,[0.5 -0.25],[-0.5 0.125],0\n");
    }
}
