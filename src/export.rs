//! Bundle and drift exports: pretty JSON and a flat CSV feature table

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::bundle::Bundle;
use crate::error::Result;
use crate::numeric::finite_or_zero;
use crate::scorer::FeatureRecord;

/// One row of the flat feature table
#[derive(Debug, Serialize)]
struct FeatureRow<'a> {
    feature_row: usize,
    feature_id: usize,
    preferred_role: &'a str,
    score: f64,
    stability: f64,
    sd: f64,
    mu: f64,
    pref_ratio: f64,
    active_frac: f64,
    cv: f64,
    mean_activation: f64,
    max_activation: f64,
    bridge_entropy: f64,
    description: &'a str,
    url: &'a str,
}

impl<'a> From<&'a FeatureRecord> for FeatureRow<'a> {
    fn from(record: &'a FeatureRecord) -> Self {
        let stats = &record.stats;
        let description = record.description.as_ref();
        Self {
            feature_row: record.feature_row,
            feature_id: record.feature_id,
            preferred_role: &record.preferred_role,
            score: finite_or_zero(stats.score),
            stability: finite_or_zero(stats.stability),
            sd: finite_or_zero(stats.sd),
            mu: finite_or_zero(stats.mu),
            pref_ratio: finite_or_zero(stats.pref_ratio),
            active_frac: finite_or_zero(stats.active_frac),
            cv: finite_or_zero(stats.cv),
            mean_activation: finite_or_zero(stats.mean_activation),
            max_activation: finite_or_zero(stats.max_activation),
            bridge_entropy: finite_or_zero(stats.bridge_entropy),
            description: description
                .and_then(|d| d.description.as_deref())
                .unwrap_or(""),
            url: description.and_then(|d| d.url.as_deref()).unwrap_or(""),
        }
    }
}

/// Write one CSV row per feature record, with a header
pub fn write_feature_table<W: Write>(records: &[FeatureRecord], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(FeatureRow::from(record))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_feature_csv(records: &[FeatureRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    write_feature_table(records, BufWriter::new(File::create(path)?))?;
    info!("Wrote {} feature rows to {}", records.len(), path.display());
    Ok(())
}

/// Pretty-print any serializable report (bundle, drift report) as JSON
pub fn write_json<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    info!("Wrote {}", path.display());
    Ok(())
}

pub fn write_bundle_json(bundle: &Bundle, path: impl AsRef<Path>) -> Result<()> {
    bundle.validate()?;
    write_json(bundle, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptions::FeatureDescription;
    use crate::scorer::FeatureStats;

    fn record(description: Option<FeatureDescription>) -> FeatureRecord {
        FeatureRecord {
            feature_row: 0,
            feature_id: 42,
            profile: vec![1.0, 0.0],
            preferred_role_idx: 0,
            preferred_role: "pirate".into(),
            top_roles: vec![],
            stats: FeatureStats {
                mu: 0.5,
                sd: 0.5,
                cv: 1.0,
                active_frac: 0.5,
                pref_ratio: f64::INFINITY,
                bridge_entropy: 0.0,
                stability: 1.0,
                score: 0.5,
                mean_activation: 0.5,
                max_activation: 1.0,
            },
            description,
        }
    }

    #[test]
    fn test_feature_table_columns() {
        let mut out = Vec::new();
        let records = vec![record(Some(FeatureDescription {
            description: Some("nautical slang".into()),
            url: Some("https://example.org/42".into()),
        }))];
        write_feature_table(&records, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "feature_row,feature_id,preferred_role,score,stability,sd,mu,pref_ratio,\
             active_frac,cv,mean_activation,max_activation,bridge_entropy,description,url"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("0,42,pirate,0.5,1.0,"));
        // Non-finite pref_ratio exported as 0
        assert!(row.contains(",0.0,0.5,1.0,"));
        assert!(row.ends_with("nautical slang,https://example.org/42"));
    }

    #[test]
    fn test_missing_description_is_empty() {
        let mut out = Vec::new();
        write_feature_table(&[record(None)], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.lines().nth(1).unwrap().ends_with(",,"));
    }
}
