//! JSON run reports.
//!
//! Files are grouped by the local date the run started and named after the
//! target's host plus the start time, so repeated runs never overwrite each
//! other:
//! ```text
//! json_output_dir/
//! └── 2024-01-10/
//!     └── techcrunch-com_081500.json
//! ```

use crate::pipeline::RunReport;
use crate::utils::{host_of, slugify};
use chrono::Local;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Path a report is written to: `{json_output_dir}/{date}/{source}_{HHMMSS}.json`.
pub fn report_path(report: &RunReport, json_output_dir: &str) -> PathBuf {
    let started = report.started_at.with_timezone(&Local);
    let source = host_of(&report.root_url)
        .map(|h| slugify(&h))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "target".to_string());
    Path::new(json_output_dir)
        .join(started.date_naive().to_string())
        .join(format!("{}_{}.json", source, started.format("%H%M%S")))
}

/// Write a [`RunReport`] under `json_output_dir` and return its path.
///
/// # Errors
///
/// Returns an error if directory creation, serialization or the write fails.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report(report: &RunReport, json_output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report, json_output_dir);

    if let Some(dir) = path.parent() {
        info!(dir = %dir.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), accepted = report.summary.accepted, "Wrote run report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RunSummary;
    use chrono::{TimeZone, Utc};

    fn report() -> RunReport {
        let started = Local.with_ymd_and_hms(2024, 1, 10, 8, 15, 0).unwrap().with_timezone(&Utc);
        RunReport {
            root_url: "https://www.techcrunch.com/".into(),
            strategy: "sitemap".into(),
            started_at: started,
            finished_at: started,
            cancelled: false,
            summary: RunSummary {
                candidates: 3,
                accepted: 1,
                ..RunSummary::default()
            },
            accepted: vec![],
            merged: vec![],
            failures: vec![],
            attempts: vec![],
        }
    }

    #[test]
    fn test_report_path_layout() {
        let path = report_path(&report(), "/tmp/out");
        assert_eq!(path, PathBuf::from("/tmp/out/2024-01-10/www-techcrunch-com_081500.json"));
    }

    #[tokio::test]
    async fn test_write_report_round_trips_summary() {
        let dir = std::env::temp_dir().join(format!("afn_json_{}", std::process::id()));
        let dir = dir.to_string_lossy().to_string();
        let path = write_report(&report(), &dir).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["summary"]["accepted"], 1);
        assert_eq!(value["strategy"], "sitemap");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
