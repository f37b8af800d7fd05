use anyhow::Result;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::fetch::{Batch, FetchOutcome, Fetcher, PageRequest, Segment};
use crate::normalize::normalize;
use crate::sink::StampSink;
use crate::types::{RejectionKind, Tag};

/// How the catalog is partitioned to work around the source's result ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Walk pages 1, 2, 3... of the whole catalog
    Paginated,
    CategorySplit(Vec<String>),
    ConditionSplit(Vec<String>),
    /// One search per leading character
    AlphaSplit(Vec<String>),
    /// Follow "next product" links from a start URL
    LinkWalk(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPolicy {
    /// Stop after this many batches in a row accept nothing
    EmptyStreak(u32),
    /// Stop when the reported last page is reached, or after an empty streak
    Exhaustion { streak: u32 },
    /// Stop when there is no usable "next" link
    LinkWalk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmptyStreak,
    Exhausted,
    EndOfLinks,
    PageLimit,
    ProductLimit,
}

/// Batch-level fetch events, counted for the run report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FetchSignal {
    Throttled,
    TransportError,
    EmptyPage,
}

impl fmt::Display for FetchSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchSignal::Throttled => "throttled",
            FetchSignal::TransportError => "transport error",
            FetchSignal::EmptyPage => "empty page",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PassStart {
    Pages(Option<Segment>),
    Walk(String),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Paginated => "paginated",
            Strategy::CategorySplit(_) => "category split",
            Strategy::ConditionSplit(_) => "condition split",
            Strategy::AlphaSplit(_) => "alphabetic split",
            Strategy::LinkWalk(_) => "link walk",
        }
    }

    pub fn stop_policy(&self) -> StopPolicy {
        match self {
            Strategy::Paginated => StopPolicy::EmptyStreak(3),
            Strategy::CategorySplit(_) | Strategy::ConditionSplit(_) => {
                StopPolicy::Exhaustion { streak: 2 }
            }
            Strategy::AlphaSplit(_) => StopPolicy::Exhaustion { streak: 3 },
            Strategy::LinkWalk(_) => StopPolicy::LinkWalk,
        }
    }

    fn passes(&self) -> Vec<PassStart> {
        let segments = |list: &[String], make: fn(String) -> Segment| -> Vec<PassStart> {
            list.iter()
                .map(|s| PassStart::Pages(Some(make(s.clone()))))
                .collect()
        };
        match self {
            Strategy::Paginated => vec![PassStart::Pages(None)],
            Strategy::CategorySplit(list) => segments(list.as_slice(), Segment::Category),
            Strategy::ConditionSplit(list) => segments(list.as_slice(), Segment::Condition),
            Strategy::AlphaSplit(list) => segments(list.as_slice(), Segment::Query),
            Strategy::LinkWalk(start) => vec![PassStart::Walk(start.clone())],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Pause between fetches and between passes
    pub delay: Duration,
    /// Pause before retrying a throttled fetch
    pub backoff: Duration,
    /// Page ceiling for each pass
    pub max_pages: Option<u32>,
    /// Accepted-record ceiling for the whole run
    pub max_products: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            backoff: Duration::from_secs(30),
            max_pages: None,
            max_products: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub passes: usize,
    pub batches: usize,
    pub raw_records: usize,
    pub accepted: usize,
    pub unique_ids: usize,
    pub rejected: BTreeMap<RejectionKind, usize>,
    pub signals: BTreeMap<FetchSignal, usize>,
    pub stops: Vec<StopReason>,
}

impl RunReport {
    fn signal(&mut self, signal: FetchSignal) {
        *self.signals.entry(signal).or_default() += 1;
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Runs each pass of a strategy until its stop policy fires. The seen-set
/// spans the whole run, so a product listed under two segments is accepted once.
pub struct Coordinator<F, S> {
    fetcher: F,
    sink: S,
    config: RunConfig,
    seen: HashSet<String>,
}

impl<F: Fetcher, S: StampSink> Coordinator<F, S> {
    pub fn new(fetcher: F, sink: S, config: RunConfig) -> Self {
        Self {
            fetcher,
            sink,
            config,
            seen: HashSet::new(),
        }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Run every pass of `strategy`. Only a persistence failure aborts the run;
    /// fetch problems are counted and handled by the stop policy.
    pub fn run(&mut self, strategy: &Strategy) -> Result<RunReport> {
        let policy = strategy.stop_policy();
        let passes = strategy.passes();
        let mut report = RunReport::default();

        info!(strategy = strategy.name(), passes = passes.len(), "starting run");

        for (i, pass) in passes.iter().enumerate() {
            if self.product_limit_reached(&report) {
                report.stops.push(StopReason::ProductLimit);
                break;
            }

            let before = report.accepted;
            let reason = match pass {
                PassStart::Pages(segment) => self.run_pages(segment.as_ref(), policy, &mut report)?,
                PassStart::Walk(start) => self.run_walk(start, &mut report)?,
            };
            report.passes += 1;
            report.stops.push(reason);

            info!(
                pass = i + 1,
                of = passes.len(),
                segment = ?pass,
                accepted = report.accepted - before,
                stop = ?reason,
                "pass complete"
            );

            if i + 1 < passes.len() {
                pause(self.config.delay);
            }
        }

        report.unique_ids = self.seen.len();
        Ok(report)
    }

    fn product_limit_reached(&self, report: &RunReport) -> bool {
        self.config
            .max_products
            .is_some_and(|limit| report.accepted >= limit)
    }

    fn run_pages(
        &mut self,
        segment: Option<&Segment>,
        policy: StopPolicy,
        report: &mut RunReport,
    ) -> Result<StopReason> {
        let streak_limit = match policy {
            StopPolicy::EmptyStreak(n) | StopPolicy::Exhaustion { streak: n } => n,
            StopPolicy::LinkWalk => 1,
        };
        let tag = segment.and_then(Segment::tag);
        let mut page = 1u32;
        let mut empty_streak = 0u32;

        loop {
            if self.config.max_pages.is_some_and(|max| page > max) {
                return Ok(StopReason::PageLimit);
            }
            if self.product_limit_reached(report) {
                return Ok(StopReason::ProductLimit);
            }

            let request = PageRequest::Page {
                page,
                segment: segment.cloned(),
            };
            let batch = self.fetch_with_retry(&request, report);
            report.batches += 1;

            let accepted = match &batch {
                Some(batch) => self.process_batch(batch, tag.as_ref(), report)?,
                None => 0,
            };
            info!(page, accepted, "page done");

            if accepted == 0 {
                empty_streak += 1;
            } else {
                empty_streak = 0;
            }

            if let (StopPolicy::Exhaustion { .. }, Some(batch)) = (policy, &batch) {
                match batch.pagination {
                    Some(p) if p.current_page < p.total_pages => {
                        debug!(current = p.current_page, total = p.total_pages, "more pages");
                    }
                    _ => return Ok(StopReason::Exhausted),
                }
            }
            if empty_streak >= streak_limit {
                return Ok(StopReason::EmptyStreak);
            }

            page += 1;
            pause(self.config.delay);
        }
    }

    fn run_walk(&mut self, start: &str, report: &mut RunReport) -> Result<StopReason> {
        let mut visited = HashSet::new();
        let mut url = start.to_string();
        let mut pages = 0u32;

        loop {
            if self.config.max_pages.is_some_and(|max| pages >= max) {
                return Ok(StopReason::PageLimit);
            }
            if self.product_limit_reached(report) {
                return Ok(StopReason::ProductLimit);
            }

            visited.insert(url.clone());
            let batch = self.fetch_with_retry(&PageRequest::Url(url.clone()), report);
            report.batches += 1;
            pages += 1;

            let next = match batch {
                Some(batch) => {
                    let accepted = self.process_batch(&batch, None, report)?;
                    info!(url = %url, accepted, "product page done");
                    batch.next
                }
                None => None,
            };

            match next {
                Some(next) if !visited.contains(&next) => url = next,
                Some(next) => {
                    warn!(url = %next, "next link loops back, ending walk");
                    return Ok(StopReason::EndOfLinks);
                }
                None => return Ok(StopReason::EndOfLinks),
            }
            pause(self.config.delay);
        }
    }

    /// Fetch once, backing off and retrying a single time if throttled.
    /// `None` means the batch yielded nothing usable.
    fn fetch_with_retry(&mut self, request: &PageRequest, report: &mut RunReport) -> Option<Batch> {
        let mut outcome = self.fetcher.fetch(request);
        if matches!(outcome, FetchOutcome::Throttled) {
            report.signal(FetchSignal::Throttled);
            warn!(
                backoff_secs = self.config.backoff.as_secs_f64(),
                "rate limited, backing off"
            );
            pause(self.config.backoff);
            outcome = self.fetcher.fetch(request);
        }

        match outcome {
            FetchOutcome::Batch(batch) => {
                if batch.records.is_empty() {
                    report.signal(FetchSignal::EmptyPage);
                }
                Some(batch)
            }
            FetchOutcome::Throttled => {
                report.signal(FetchSignal::Throttled);
                warn!(?request, "still rate limited after backoff, skipping");
                None
            }
            FetchOutcome::Failed(e) => {
                report.signal(FetchSignal::TransportError);
                warn!(?request, error = %format!("{:#}", e), "fetch failed");
                None
            }
        }
    }

    /// Normalize every record of a batch and persist the accepted ones in one write
    fn process_batch(&mut self, batch: &Batch, tag: Option<&Tag>, report: &mut RunReport) -> Result<usize> {
        let mut accepted = Vec::new();
        for raw in &batch.records {
            if self
                .config
                .max_products
                .is_some_and(|limit| report.accepted + accepted.len() >= limit)
            {
                break;
            }
            match normalize(raw, &mut self.seen, tag) {
                Ok(stamp) => accepted.push(stamp),
                Err(rejection) => {
                    debug!(record = raw.describe(), reason = %rejection, "rejected");
                    *report.rejected.entry(rejection.kind()).or_default() += 1;
                }
            }
        }
        report.raw_records += batch.records.len();

        if !accepted.is_empty() {
            self.sink.persist(&accepted)?;
        }
        report.accepted += accepted.len();
        Ok(accepted.len())
    }
}
