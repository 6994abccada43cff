//! Sync pipeline orchestration: source registry, environment configuration,
//! the bounded fetch-worker pool and run reports.

mod report;

pub use report::{render_brief, write_reports, RunReport, SyncRunSummary};

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rlf_adapters::{adapter_for_source, SourceAdapter};
use rlf_core::contact::extract_contacts;
use rlf_core::score::score_lead;
use rlf_core::{FetchTarget, LeadRecord, LeadSource};
use rlf_storage::{
    DryRunSink, FetchError, HttpClientConfig, HttpFetcher, PageFetcher, ProxyFetchConfig, RestConfig,
    RestInserter, RowSink, TokenBucketConfig, DEFAULT_MAX_BODY_BYTES,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rlf-sync";

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: LeadSource,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceRegistry {
    /// Every source enabled, each with its adapter's built-in targets.
    pub fn builtin() -> Self {
        Self {
            sources: LeadSource::ALL
                .iter()
                .map(|&source| SourceConfig {
                    source,
                    enabled: true,
                    targets: Vec::new(),
                    notes: None,
                })
                .collect(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    /// Reads `<root>/sources.yaml`; a missing file means [`SourceRegistry::builtin`].
    pub async fn load(root: &Path) -> Result<Self> {
        let path = root.join("sources.yaml");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no source registry found; using built-in targets");
                Ok(Self::builtin())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn enabled_sources(&self) -> Vec<LeadSource> {
        let mut enabled = Vec::new();
        for config in self.sources.iter().filter(|c| c.enabled) {
            if !enabled.contains(&config.source) {
                enabled.push(config.source);
            }
        }
        enabled
    }

    /// Listed targets for the adapter's source, or the adapter defaults when none are listed.
    pub fn targets_for(&self, adapter: &dyn SourceAdapter) -> Vec<FetchTarget> {
        let source = adapter.source();
        let urls: Vec<&str> = self
            .sources
            .iter()
            .filter(|c| c.source == source)
            .flat_map(|c| c.targets.iter())
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .collect();

        if urls.is_empty() {
            return adapter.default_targets();
        }
        urls.into_iter().map(|url| FetchTarget::new(source, url)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub upsert: bool,
    pub scraper_api_key: Option<String>,
    pub workers: usize,
    pub http_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
    pub requests_per_second: Option<f64>,
    pub workspace_root: PathBuf,
    pub reports_dir: PathBuf,
    pub dry_run: bool,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let workers: usize = parse_var(&var, "RLF_WORKERS", DEFAULT_WORKERS)?;
        if workers == 0 {
            bail!("RLF_WORKERS must be at least 1");
        }
        let requests_per_second = var("RLF_REQUESTS_PER_SECOND")
            .map(|raw| {
                raw.parse::<f64>()
                    .with_context(|| format!("RLF_REQUESTS_PER_SECOND must be a number, got `{raw}`"))
            })
            .transpose()?;
        let workspace_root = var("RLF_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let reports_dir = var("RLF_REPORTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspace_root.join("reports"));

        Ok(Self {
            supabase_url: var("SUPABASE_URL"),
            supabase_key: var("SUPABASE_KEY"),
            upsert: var("RLF_UPSERT")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            scraper_api_key: var("SCRAPER_API_KEY"),
            workers,
            http_timeout_secs: parse_var(&var, "RLF_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            max_body_bytes: parse_var(&var, "RLF_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            user_agent: var("RLF_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            requests_per_second,
            workspace_root,
            reports_dir,
            dry_run: false,
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            max_body_bytes: self.max_body_bytes,
            proxy: self.scraper_api_key.as_deref().map(ProxyFetchConfig::new),
            token_bucket: self.requests_per_second.and_then(TokenBucketConfig::per_second),
        }
    }

    /// Datastore settings, present only when both URL and key are configured.
    pub fn rest_config(&self) -> Option<RestConfig> {
        match (&self.supabase_url, &self.supabase_key) {
            (Some(url), Some(key)) => {
                let mut config = RestConfig::new(url.clone(), key.clone());
                config.upsert = self.upsert;
                Some(config)
            }
            _ => None,
        }
    }

    pub fn build_sink(&self) -> Result<Arc<dyn RowSink>> {
        if self.dry_run {
            info!("dry run: rows are logged, not inserted");
            return Ok(Arc::new(DryRunSink));
        }
        match self.rest_config() {
            Some(config) => Ok(Arc::new(RestInserter::new(config)?)),
            None => {
                warn!("SUPABASE_URL / SUPABASE_KEY not set; rows are logged, not inserted");
                Ok(Arc::new(DryRunSink))
            }
        }
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a non-negative integer, got `{raw}`")),
        None => Ok(default),
    }
}

/// Run-scoped dedup keys and visited targets, shared by handle with every worker.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    state: Mutex<RunState>,
}

#[derive(Debug, Default)]
struct RunState {
    seen_keys: HashSet<String>,
    visited_targets: HashSet<String>,
}

impl RunContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// `true` when `key` was already accepted in this run; otherwise registers it.
    pub fn is_duplicate(&self, key: &str) -> bool {
        !self.state().seen_keys.insert(key.to_string())
    }

    /// Marks `url` visited. Returns `false` when it was already claimed.
    pub fn claim_target(&self, url: &str) -> bool {
        self.state().visited_targets.insert(url.trim().to_string())
    }

    pub fn accepted_keys(&self) -> usize {
        self.state().seen_keys.len()
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What one successfully handled target contributed to the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetYield {
    pub skipped: bool,
    pub parsed: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub insert_failures: usize,
}

impl TargetYield {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

pub struct SyncPipeline {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn RowSink>,
    workers: usize,
}

impl SyncPipeline {
    pub fn new(fetcher: Arc<dyn PageFetcher>, sink: Arc<dyn RowSink>, workers: usize) -> Self {
        Self {
            fetcher,
            sink,
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.http_client_config())?;
        if fetcher.uses_proxy() {
            info!("fetching through the rendering proxy");
        }
        Ok(Self::new(Arc::new(fetcher), config.build_sink()?, config.workers))
    }

    /// Runs each source in turn, each with a fresh [`RunContext`] under one run id.
    pub async fn run_sources(&self, registry: &SourceRegistry, sources: &[LeadSource]) -> SyncRunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(sources.len());

        for &source in sources {
            let adapter = adapter_for_source(source);
            let targets = registry.targets_for(adapter.as_ref());
            let ctx = Arc::new(RunContext::new(run_id));
            reports.push(self.run_source(ctx, adapter, targets).await);
        }

        SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sink: self.sink.name().to_string(),
            reports,
            reports_dir: None,
        }
    }

    /// Pushes every target through fetch, parse, contact extraction, scoring,
    /// validation, dedup and insert on at most `workers` concurrent tasks.
    /// Outcomes are kept as each target finishes, so a worker that dies only
    /// loses the target it held, which is reported as failed.
    pub async fn run_source(
        &self,
        ctx: Arc<RunContext>,
        adapter: Arc<dyn SourceAdapter>,
        targets: Vec<FetchTarget>,
    ) -> RunReport {
        let source = adapter.source();
        let run_id = ctx.run_id();
        let clock = Instant::now();
        let mut report = RunReport::new(source, run_id, Utc::now(), targets.len());
        info!(%run_id, %source, targets = targets.len(), workers = self.workers, "starting source");

        let worker_count = self.workers.min(targets.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(Mutex::new(vec![None::<String>; worker_count]));
        let mut workers = JoinSet::new();

        for worker in 0..worker_count {
            let queue = Arc::clone(&queue);
            let outcomes = Arc::clone(&outcomes);
            let in_flight = Arc::clone(&in_flight);
            let ctx = Arc::clone(&ctx);
            let adapter = Arc::clone(&adapter);
            let fetcher = Arc::clone(&self.fetcher);
            let sink = Arc::clone(&self.sink);
            let span = info_span!("sync_worker", %run_id, %source, worker);

            workers.spawn(
                async move {
                    loop {
                        let next = lock(&queue).pop_front();
                        let Some(target) = next else {
                            break;
                        };
                        lock(&in_flight)[worker] = Some(target.url.clone());
                        let outcome =
                            process_target(&ctx, fetcher.as_ref(), adapter.as_ref(), sink.as_ref(), &target).await;
                        lock(&outcomes).push((target.url, outcome));
                        lock(&in_flight)[worker] = None;
                    }
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(%source, error = %err, "worker task ended abnormally");
            }
        }

        for (url, outcome) in lock(&outcomes).drain(..) {
            report.record(url, outcome);
        }
        // Targets a dead worker held, or that no surviving worker reached.
        let abandoned: Vec<String> = lock(&in_flight)
            .iter_mut()
            .filter_map(Option::take)
            .chain(lock(&queue).drain(..).map(|target| target.url))
            .collect();
        for url in abandoned {
            warn!(%source, %url, "target abandoned by a failed worker");
            report.record_abandoned(url);
        }

        report.finish(clock.elapsed());
        info!(
            %run_id,
            %source,
            succeeded = report.succeeded_targets,
            failed = report.failed_targets,
            listings = report.total_listings,
            inserted = report.inserted,
            runtime_secs = report.runtime_seconds,
            "source finished"
        );
        report
    }
}

async fn process_target(
    ctx: &RunContext,
    fetcher: &dyn PageFetcher,
    adapter: &dyn SourceAdapter,
    sink: &dyn RowSink,
    target: &FetchTarget,
) -> Result<TargetYield, FetchError> {
    if !ctx.claim_target(&target.url) {
        debug!(url = %target.url, "target already visited in this run");
        return Ok(TargetYield::skipped());
    }

    let page = match fetcher.fetch_page(ctx.run_id(), target).await {
        Ok(page) => page,
        Err(err) => {
            warn!(url = %target.url, error = %err, "fetch failed");
            return Err(err);
        }
    };

    let drafts = adapter.parse_listing(&page);
    let mut yielded = TargetYield {
        parsed: drafts.len(),
        ..TargetYield::default()
    };

    for draft in drafts {
        let key = draft.dedup_key();
        let contact = extract_contacts(&draft.contact_text);
        let score = score_lead(draft.value);
        let record = match LeadRecord::from_draft(draft, contact, score, page.fetched_at) {
            Ok(record) => record,
            Err(err) => {
                yielded.rejected += 1;
                warn!(url = %target.url, error = %err, "lead rejected");
                continue;
            }
        };
        if ctx.is_duplicate(&key) {
            yielded.duplicates += 1;
            debug!(address = %record.address_text(), "duplicate lead skipped");
            continue;
        }

        yielded.accepted += 1;
        if sink.insert(record.table_name(), &record.to_row()).await {
            yielded.inserted += 1;
        } else {
            yielded.insert_failures += 1;
        }
    }

    info!(
        url = %target.url,
        parsed = yielded.parsed,
        accepted = yielded.accepted,
        inserted = yielded.inserted,
        "target processed"
    );
    Ok(yielded)
}

/// Loads the registry, runs the requested sources (every enabled one when
/// `only` is empty) and writes the run reports.
pub async fn run_sync_once(config: &PipelineConfig, only: &[LeadSource]) -> Result<SyncRunSummary> {
    let registry = SourceRegistry::load(&config.workspace_root).await?;
    let sources = if only.is_empty() {
        registry.enabled_sources()
    } else {
        let mut selected = Vec::new();
        for &source in only {
            if !selected.contains(&source) {
                selected.push(source);
            }
        }
        selected
    };
    if sources.is_empty() {
        warn!("no sources enabled; nothing to scrape");
    }

    let pipeline = SyncPipeline::from_config(config)?;
    let mut summary = pipeline.run_sources(&registry, &sources).await;

    match write_reports(&config.reports_dir, &summary).await {
        Ok(dir) => summary.reports_dir = Some(dir.display().to_string()),
        Err(err) => warn!(error = %format!("{err:#}"), "writing run reports failed"),
    }
    Ok(summary)
}
