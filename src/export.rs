//! Tabular exports.
//!
//! Two CSV files leave the pipeline:
//!
//! - the **feature table** (`ModelData.csv`), one row per merged hour with
//!   both providers' readings and the three blend columns. Training reads
//!   this file back, so the writer and `read_feature_table` must agree on the
//!   schema exactly.
//! - the **predictions** file (`Predictions.csv`): a metrics block, a blank
//!   line, then one row per predicted hour.
//!
//! Unset values are written as `NaN`, never `0`, so a missing reading cannot
//! be mistaken for a real one by anything training on the file. Files are
//! written to a temporary sibling and renamed into place, so readers never
//! observe a partial file.

use crate::model::{EvaluationMetric, ExportError, HourlyRecord, PredictedFields, Target};
use crate::time_key::{ParseZone, TimeKey, EXPORT_FORMAT};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const FEATURE_FILE_NAME: &str = "ModelData.csv";
pub const PREDICTIONS_FILE_NAME: &str = "Predictions.csv";

pub const FEATURE_HEADER: [&str; 12] = [
    "Time",
    "Latitude",
    "Longitude",
    "omTemp",
    "omFeelLike",
    "omPrecipProb",
    "wTemp",
    "wFeelLike",
    "wPrecipProb",
    "TEMPERATURE",
    "FEELING",
    "PRECIPITATION",
];

pub const METRICS_HEADER: [&str; 5] = ["Target", "MAE", "MSE", "RMSE", "R2"];
pub const PREDICTIONS_HEADER: [&str; 4] = ["Time", "Temperature", "Feels Like", "Precipitation"];

/// Marker written for an unset numeric value.
pub const UNSET: &str = "NaN";

// ---------------------------------------------------------------------------
// Feature table
// ---------------------------------------------------------------------------

/// One re-read row of the feature table. Unset values come back as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub time: TimeKey,
    pub latitude: f64,
    pub longitude: f64,
    /// The nine numeric columns after `Longitude`, in header order.
    pub values: [f64; 9],
}

impl FeatureRow {
    /// Looks up a numeric column by its header name.
    pub fn column(&self, name: &str) -> Option<f64> {
        let index = FEATURE_HEADER[3..].iter().position(|h| *h == name)?;
        Some(self.values[index])
    }

    /// The two feature values for `target`, Open-Meteo first.
    pub fn features(&self, target: Target) -> [f64; 2] {
        let [a, b] = target.feature_columns();
        [
            self.column(a).unwrap_or(f64::NAN),
            self.column(b).unwrap_or(f64::NAN),
        ]
    }

    /// The blend column `target` is trained against.
    pub fn target_value(&self, target: Target) -> f64 {
        self.column(target.column()).unwrap_or(f64::NAN)
    }
}

fn fmt_value(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => v.to_string(),
        _ => UNSET.to_string(),
    }
}

fn fmt_percent(value: Option<u8>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| UNSET.to_string())
}

fn feature_row(record: &HourlyRecord) -> [String; 12] {
    [
        record.time.export_label(),
        record.latitude.to_string(),
        record.longitude.to_string(),
        fmt_value(record.open_meteo.temperature),
        fmt_value(record.open_meteo.feels_like),
        fmt_percent(record.open_meteo.precip_probability),
        fmt_value(record.weather_api.temperature),
        fmt_value(record.weather_api.feels_like),
        fmt_percent(record.weather_api.precip_probability),
        fmt_value(record.blend(Target::Temperature)),
        fmt_value(record.blend(Target::Feeling)),
        fmt_value(record.blend(Target::Precipitation)),
    ]
}

/// Writes the feature table (header plus one row per record).
pub fn write_feature_table<W: Write>(writer: W, records: &[HourlyRecord]) -> Result<(), ExportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(FEATURE_HEADER)?;
    for record in records {
        wtr.write_record(feature_row(record))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Renders the feature table into memory.
pub fn export_feature_table(records: &[HourlyRecord]) -> Result<Vec<u8>, ExportError> {
    let mut buf = Vec::new();
    write_feature_table(&mut buf, records)?;
    Ok(buf)
}

/// Parses a feature table written by `write_feature_table`.
pub fn read_feature_table<R: Read>(reader: R) -> Result<Vec<FeatureRow>, ExportError> {
    let mut rdr = csv::Reader::from_reader(reader);

    let headers = rdr.headers()?.clone();
    if headers.iter().ne(FEATURE_HEADER.iter().copied()) {
        return Err(ExportError::MalformedRow {
            line: 1,
            reason: format!("unexpected header: {:?}", headers.iter().collect::<Vec<_>>()),
        });
    }

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let malformed = |reason: String| ExportError::MalformedRow { line, reason };

        let time_field = record.get(0).unwrap_or_default();
        let time = TimeKey::parse(time_field, EXPORT_FORMAT, ParseZone::Utc)
            .ok_or_else(|| malformed(format!("unparseable time '{}'", time_field)))?;

        let mut numbers = [f64::NAN; 11];
        for (slot, index) in numbers.iter_mut().zip(1..FEATURE_HEADER.len()) {
            let raw = record.get(index).unwrap_or_default().trim();
            *slot = raw
                .parse::<f64>()
                .map_err(|_| malformed(format!("column {} is not a number: '{}'", FEATURE_HEADER[index], raw)))?;
        }

        let mut values = [f64::NAN; 9];
        values.copy_from_slice(&numbers[2..]);
        rows.push(FeatureRow {
            time,
            latitude: numbers[0],
            longitude: numbers[1],
            values,
        });
    }

    Ok(rows)
}

// ---------------------------------------------------------------------------
// Predictions
// ---------------------------------------------------------------------------

/// Renders the metrics block, a blank line, then the prediction rows.
pub fn export_predictions<'a, I>(metrics: &[EvaluationMetric], predictions: I) -> Result<Vec<u8>, ExportError>
where
    I: IntoIterator<Item = (&'a TimeKey, &'a PredictedFields)>,
{
    let mut buf = Vec::new();

    {
        let mut wtr = csv::Writer::from_writer(&mut buf);
        wtr.write_record(METRICS_HEADER)?;
        for metric in metrics {
            wtr.write_record([
                metric.target.column().to_string(),
                format!("{:.2}", metric.mae),
                format!("{:.2}", metric.mse),
                format!("{:.2}", metric.rmse),
                format!("{:.2}", metric.r2),
            ])?;
        }
        wtr.flush()?;
    }

    buf.push(b'\n');

    {
        let mut wtr = csv::Writer::from_writer(&mut buf);
        wtr.write_record(PREDICTIONS_HEADER)?;
        for (time, predicted) in predictions {
            wtr.write_record([
                time.export_label(),
                fmt_value(predicted.temperature),
                fmt_value(predicted.feels_like),
                fmt_value(predicted.precipitation),
            ])?;
        }
        wtr.flush()?;
    }

    Ok(buf)
}

// ---------------------------------------------------------------------------
// Atomic persistence
// ---------------------------------------------------------------------------

/// Writes `bytes` to `dir/file_name` via a temporary file and rename.
///
/// If anything fails before the rename, the temporary file is removed and
/// any previous file at the destination is left untouched.
pub fn persist_atomically(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".wxblend-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    let path = dir.join(file_name);
    tmp.persist(&path)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Coordinate, ProviderFields};

    fn record(day: u32, hour: u32, a: Option<(f64, f64, u8)>, b: Option<(f64, f64, u8)>) -> HourlyRecord {
        let mut rec = HourlyRecord::empty(
            Coordinate { latitude: 46.75, longitude: 23.57 },
            TimeKey::new(2025, 3, day, hour).unwrap(),
        );
        let fields = |v: Option<(f64, f64, u8)>| match v {
            Some((t, f, p)) => ProviderFields {
                temperature: Some(t),
                feels_like: Some(f),
                precip_probability: Some(p),
            },
            None => ProviderFields::default(),
        };
        rec.open_meteo = fields(a);
        rec.weather_api = fields(b);
        rec
    }

    fn as_text(bytes: &[u8]) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_feature_table_header_and_row() {
        let bytes = export_feature_table(&[record(8, 4, Some((10.0, 9.0, 20)), Some((10.5, 9.5, 25)))]).unwrap();
        let text = as_text(&bytes);
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Time,Latitude,Longitude,omTemp,omFeelLike,omPrecipProb,wTemp,wFeelLike,wPrecipProb,TEMPERATURE,FEELING,PRECIPITATION"
        );
        assert_eq!(lines.next().unwrap(), "2025-3-8 4:00,46.75,23.57,10,9,20,10.5,9.5,25,10.25,9.25,22.5");
    }

    #[test]
    fn test_unset_values_serialize_as_nan_not_zero() {
        let bytes = export_feature_table(&[record(8, 5, Some((12.0, 11.0, 0)), None)]).unwrap();
        let text = as_text(&bytes);
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, "2025-3-8 5:00,46.75,23.57,12,11,0,NaN,NaN,NaN,NaN,NaN,NaN");
    }

    #[test]
    fn test_round_trip_recovers_time_keys() {
        let records = vec![
            record(8, 23, Some((1.0, 1.0, 0)), None),
            record(9, 0, Some((2.0, 2.0, 5)), Some((3.0, 3.0, 15))),
            record(10, 12, Some((3.0, 3.0, 50)), Some((4.0, 4.0, 60))),
        ];
        let bytes = export_feature_table(&records).unwrap();
        let rows = read_feature_table(bytes.as_slice()).unwrap();

        let written: Vec<_> = records.iter().map(|r| r.time).collect();
        let read: Vec<_> = rows.iter().map(|r| r.time).collect();
        assert_eq!(written, read);
    }

    #[test]
    fn test_read_preserves_nan_and_values() {
        let bytes = export_feature_table(&[
            record(8, 5, Some((12.0, 11.0, 30)), None),
            record(8, 6, Some((12.0, 11.0, 30)), Some((14.0, 13.0, 40))),
        ])
        .unwrap();
        let rows = read_feature_table(bytes.as_slice()).unwrap();

        assert_eq!(rows[0].column("omTemp"), Some(12.0));
        assert!(rows[0].column("wTemp").unwrap().is_nan());
        assert!(rows[0].target_value(Target::Temperature).is_nan());
        assert_eq!(rows[1].features(Target::Precipitation), [30.0, 40.0]);
        assert_eq!(rows[1].target_value(Target::Feeling), 12.0);
        assert_eq!(rows[1].latitude, 46.75);
        assert_eq!(rows[1].column("nope"), None);
    }

    #[test]
    fn test_read_rejects_wrong_header() {
        let result = read_feature_table("Time,Foo\n2025-3-8 4:00,1\n".as_bytes());
        assert!(matches!(result, Err(ExportError::MalformedRow { line: 1, .. })));
    }

    #[test]
    fn test_read_rejects_bad_time() {
        let mut text = FEATURE_HEADER.join(",");
        text.push_str("\nyesterday,1,1,1,1,1,1,1,1,1,1,1\n");
        let result = read_feature_table(text.as_bytes());
        assert!(matches!(result, Err(ExportError::MalformedRow { line: 2, .. })));
    }

    #[test]
    fn test_predictions_export_layout() {
        let metric = EvaluationMetric {
            target: Target::Temperature,
            mae: 0.5,
            mse: 0.25,
            rmse: 0.5,
            r2: 0.987,
            samples: 24,
        };
        let time = TimeKey::new(2025, 3, 19, 0).unwrap();
        let mut predicted = PredictedFields::default();
        predicted.set(Target::Temperature, 3.25);

        let bytes = export_predictions(&[metric], [(&time, &predicted)]).unwrap();
        let text = as_text(&bytes);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Target,MAE,MSE,RMSE,R2",
                "TEMPERATURE,0.50,0.25,0.50,0.99",
                "",
                "Time,Temperature,Feels Like,Precipitation",
                "2025-3-19 0:00,3.25,NaN,NaN",
            ]
        );
    }

    #[test]
    fn test_persist_atomically_replaces_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        persist_atomically(dir.path(), FEATURE_FILE_NAME, b"old").unwrap();
        let path = persist_atomically(dir.path(), FEATURE_FILE_NAME, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temporary file must not survive");
    }
}
