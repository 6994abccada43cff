use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rlf_core::LeadSource;
use rlf_storage::FetchError;
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::TargetYield;

/// Per-source outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: LeadSource,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_targets: usize,
    pub succeeded_targets: usize,
    pub failed_targets: usize,
    pub skipped_targets: usize,
    pub failed_urls: Vec<String>,
    /// Records accepted after dedup and validation.
    pub total_listings: usize,
    pub parsed_records: usize,
    pub duplicates: usize,
    pub rejected_records: usize,
    pub inserted: usize,
    pub insert_failures: usize,
    pub runtime_seconds: f64,
    pub listings_per_minute: f64,
}

impl RunReport {
    pub(crate) fn new(source: LeadSource, run_id: Uuid, started_at: DateTime<Utc>, total_targets: usize) -> Self {
        Self {
            source,
            run_id,
            started_at,
            finished_at: started_at,
            total_targets,
            succeeded_targets: 0,
            failed_targets: 0,
            skipped_targets: 0,
            failed_urls: Vec::new(),
            total_listings: 0,
            parsed_records: 0,
            duplicates: 0,
            rejected_records: 0,
            inserted: 0,
            insert_failures: 0,
            runtime_seconds: 0.0,
            listings_per_minute: 0.0,
        }
    }

    pub(crate) fn record(&mut self, url: String, outcome: Result<TargetYield, FetchError>) {
        match outcome {
            Ok(yielded) if yielded.skipped => self.skipped_targets += 1,
            Ok(yielded) => {
                self.succeeded_targets += 1;
                self.parsed_records += yielded.parsed;
                self.total_listings += yielded.accepted;
                self.duplicates += yielded.duplicates;
                self.rejected_records += yielded.rejected;
                self.inserted += yielded.inserted;
                self.insert_failures += yielded.insert_failures;
            }
            Err(_) => {
                self.failed_targets += 1;
                self.failed_urls.push(url);
            }
        }
    }

    /// A target whose worker died before reporting it counts as failed.
    pub(crate) fn record_abandoned(&mut self, url: String) {
        self.failed_targets += 1;
        self.failed_urls.push(url);
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.finished_at = Utc::now();
        self.failed_urls.sort();
        self.runtime_seconds = elapsed.as_secs_f64();
        self.listings_per_minute = if self.runtime_seconds > 0.0 {
            self.total_listings as f64 / self.runtime_seconds * 60.0
        } else {
            0.0
        };
    }

    /// Share of attempted (non-skipped) targets that fetched successfully, in percent.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.succeeded_targets + self.failed_targets;
        if attempted == 0 {
            return 0.0;
        }
        self.succeeded_targets as f64 / attempted as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sink: String,
    pub reports: Vec<RunReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reports_dir: Option<String>,
}

impl SyncRunSummary {
    pub fn total_listings(&self) -> usize {
        self.reports.iter().map(|r| r.total_listings).sum()
    }

    pub fn total_inserted(&self) -> usize {
        self.reports.iter().map(|r| r.inserted).sum()
    }

    pub fn failed_targets(&self) -> usize {
        self.reports.iter().map(|r| r.failed_targets).sum()
    }
}

pub fn render_brief(summary: &SyncRunSummary) -> String {
    let rows = summary
        .reports
        .iter()
        .map(|r| {
            format!(
                "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {:.1} |",
                r.source,
                r.total_targets,
                r.succeeded_targets,
                r.failed_targets,
                r.skipped_targets,
                r.parsed_records,
                r.total_listings,
                r.duplicates,
                r.inserted,
                r.listings_per_minute
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let failed = summary
        .reports
        .iter()
        .flat_map(|r| r.failed_urls.iter().map(move |url| format!("- {}: {}", r.source, url)))
        .collect::<Vec<_>>();
    let failed = if failed.is_empty() {
        "None".to_string()
    } else {
        failed.join("\n")
    };

    format!(
        "# Roofing Lead Finder Run Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Sink: {}\n- Leads accepted: {}\n- Rows inserted: {}\n\n## Sources\n| source | targets | ok | failed | skipped | parsed | accepted | duplicates | inserted | leads/min |\n|---|---|---|---|---|---|---|---|---|---|\n{}\n\n## Failed Targets\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.sink,
        summary.total_listings(),
        summary.total_inserted(),
        rows,
        failed
    )
}

/// Writes `run_report.json` and `brief.md` under `<reports_dir>/<run_id>/`.
pub async fn write_reports(reports_dir: &Path, summary: &SyncRunSummary) -> Result<PathBuf> {
    let dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing run report")?;
    fs::write(dir.join("run_report.json"), json)
        .await
        .context("writing run_report.json")?;
    fs::write(dir.join("brief.md"), render_brief(summary))
        .await
        .context("writing brief.md")?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let mut storm = RunReport::new(LeadSource::Storm, run_id, Utc::now(), 3);
        storm.record(
            "https://www.spc.noaa.gov/climo/reports/today.html".into(),
            Ok(TargetYield {
                parsed: 4,
                accepted: 3,
                duplicates: 1,
                inserted: 3,
                ..TargetYield::default()
            }),
        );
        storm.record(
            "https://www.weather.gov/fwd/".into(),
            Err(FetchError::Timeout {
                url: "https://www.weather.gov/fwd/".into(),
            }),
        );
        storm.record("https://www.weather.gov/fwd/".into(), Ok(TargetYield::skipped()));
        storm.finish(Duration::from_secs(30));

        SyncRunSummary {
            run_id,
            started_at: storm.started_at,
            finished_at: Utc::now(),
            sink: "dry-run".into(),
            reports: vec![storm],
            reports_dir: None,
        }
    }

    #[test]
    fn outcomes_are_tallied() {
        let summary = summary();
        let storm = &summary.reports[0];
        assert_eq!(storm.succeeded_targets, 1);
        assert_eq!(storm.failed_targets, 1);
        assert_eq!(storm.skipped_targets, 1);
        assert_eq!(storm.failed_urls, vec!["https://www.weather.gov/fwd/".to_string()]);
        assert_eq!(storm.total_listings, 3);
        assert_eq!(storm.listings_per_minute, 6.0);
        assert_eq!(storm.success_rate(), 50.0);
        assert_eq!(summary.failed_targets(), 1);
    }

    #[test]
    fn abandoned_targets_count_as_failed() {
        let mut report = RunReport::new(LeadSource::Cad, Uuid::new_v4(), Utc::now(), 2);
        report.record("https://www.dallascad.org/a".into(), Ok(TargetYield::default()));
        report.record_abandoned("https://www.dallascad.org/b".into());
        report.finish(Duration::from_secs(1));

        assert_eq!(report.succeeded_targets + report.failed_targets, report.total_targets);
        assert_eq!(report.failed_urls, vec!["https://www.dallascad.org/b".to_string()]);
        assert_eq!(report.success_rate(), 50.0);
    }

    #[test]
    fn brief_lists_sources_and_failures() {
        let brief = render_brief(&summary());
        assert!(brief.contains("| storm | 3 | 1 | 1 | 1 | 4 | 3 | 1 | 3 | 6.0 |"));
        assert!(brief.contains("- storm: https://www.weather.gov/fwd/"));
        assert!(brief.contains("- Leads accepted: 3"));
    }

    #[tokio::test]
    async fn reports_are_written_under_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let summary = summary();

        let written = write_reports(dir.path(), &summary).await.unwrap();

        assert_eq!(written, dir.path().join(summary.run_id.to_string()));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(written.join("run_report.json")).unwrap()).unwrap();
        assert_eq!(json["reports"][0]["source"], "storm");
        assert_eq!(json["reports"][0]["failed_targets"], 1);
        assert!(std::fs::read_to_string(written.join("brief.md"))
            .unwrap()
            .starts_with("# Roofing Lead Finder Run Brief"));
    }
}
