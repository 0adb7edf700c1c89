//! Asynchronous report jobs: submit, poll until the provider is done,
//! download and decode the result.

pub mod decode;

use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ExtractError, ExtractResult};
use crate::extract::DateRange;

pub use decode::decode_report;

/// One decoded report row, keyed by column header in file order.
pub type Record = serde_json::Map<String, Value>;

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ReportKind {
    #[value(name = "campaign")]
    CampaignPerformance,
    #[value(name = "ad-group")]
    AdGroupPerformance,
}

impl ReportKind {
    pub fn request_type(&self) -> &'static str {
        match self {
            ReportKind::CampaignPerformance => "CampaignPerformanceReportRequest",
            ReportKind::AdGroupPerformance => "AdGroupPerformanceReportRequest",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            ReportKind::CampaignPerformance => &[
                "TimePeriod",
                "AccountId",
                "CampaignId",
                "CampaignName",
                "CampaignStatus",
                "Impressions",
                "Clicks",
                "Spend",
                "Conversions",
                "Revenue",
                "Ctr",
            ],
            ReportKind::AdGroupPerformance => &[
                "TimePeriod",
                "AccountId",
                "CampaignId",
                "AdGroupId",
                "AdGroupName",
                "Impressions",
                "Clicks",
                "Spend",
                "Conversions",
                "Ctr",
            ],
        }
    }

    /// Name of the collection this report lands in.
    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::CampaignPerformance => "campaign_performance",
            ReportKind::AdGroupPerformance => "ad_group_performance",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub account_id: String,
    pub kind: ReportKind,
    pub range: DateRange,
}

/// Provider answer to a status poll, before interpretation.
#[derive(Debug, Clone)]
pub struct PollResponse {
    pub status: Option<String>,
    pub download_url: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Success { download_url: String },
    Error(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ReportJob {
    pub id: String,
    pub account_id: String,
    pub kind: ReportKind,
    pub range: DateRange,
    pub status: JobStatus,
}

impl ReportJob {
    fn submitted(id: String, request: &ReportRequest) -> Self {
        Self {
            id,
            account_id: request.account_id.clone(),
            kind: request.kind,
            range: request.range,
            status: JobStatus::Pending,
        }
    }

    fn record_poll(&mut self, poll: PollResponse) {
        self.status = match poll.status.as_deref() {
            Some("Success") => match poll.download_url.filter(|u| !u.is_empty()) {
                Some(download_url) => JobStatus::Success { download_url },
                None => JobStatus::Error(format!(
                    "report succeeded without a download URL: {}",
                    poll.raw
                )),
            },
            Some("Error") => JobStatus::Error(poll.raw.to_string()),
            _ => JobStatus::Pending,
        };
    }
}

/// The three calls a provider's reporting API must offer.
pub trait ReportService {
    /// Submits a report definition and returns the job id.
    fn submit(&self, request: &ReportRequest) -> ExtractResult<String>;
    fn poll(&self, job_id: &str) -> ExtractResult<PollResponse>;
    fn download(&self, url: &str) -> ExtractResult<Vec<u8>>;
}

pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Drives one report job from submission to decoded rows.
///
/// The wall-clock budget is checked before every poll, so a budget that is
/// already spent when polling starts produces a timeout without any poll.
pub struct ReportRunner<'a, S: ReportService, C: Clock = SystemClock> {
    service: &'a S,
    clock: C,
    poll_interval: Duration,
    max_wait: Duration,
}

impl<'a, S: ReportService> ReportRunner<'a, S, SystemClock> {
    pub fn new(service: &'a S, max_wait: Duration) -> Self {
        Self::with_clock(service, SystemClock, max_wait)
    }
}

impl<'a, S: ReportService, C: Clock> ReportRunner<'a, S, C> {
    pub fn with_clock(service: &'a S, clock: C, max_wait: Duration) -> Self {
        Self {
            service,
            clock,
            poll_interval: POLL_INTERVAL,
            max_wait,
        }
    }

    pub fn run(&self, request: &ReportRequest) -> ExtractResult<Vec<Record>> {
        info!(
            account = %request.account_id,
            report = request.kind.request_type(),
            "submitting report"
        );
        let job_id = self.service.submit(request)?;
        if job_id.is_empty() {
            return Err(ExtractError::Submission(
                "provider returned an empty report id".to_string(),
            ));
        }

        let mut job = ReportJob::submitted(job_id, request);
        info!(
            account = %job.account_id,
            job = %job.id,
            report = job.kind.request_type(),
            start = %job.range.start,
            end = %job.range.end,
            "polling for report completion"
        );

        let download_url = self.wait_for(&mut job)?;

        info!(job = %job.id, "downloading report");
        let payload = self.service.download(&download_url)?;
        decode_report(&payload)
    }

    fn wait_for(&self, job: &mut ReportJob) -> ExtractResult<String> {
        let started = self.clock.now();
        let mut polls = 0u32;

        loop {
            if self.clock.now().duration_since(started) >= self.max_wait {
                job.status = JobStatus::TimedOut;
                return Err(ExtractError::ReportTimeout(self.max_wait.as_secs()));
            }

            let poll = self.service.poll(&job.id)?;
            polls += 1;
            job.record_poll(poll);
            debug!(job = %job.id, polls, status = ?job.status, "polled report");

            match &job.status {
                JobStatus::Success { download_url } => return Ok(download_url.clone()),
                JobStatus::Error(payload) => {
                    return Err(ExtractError::ReportGeneration(payload.clone()))
                }
                JobStatus::Pending | JobStatus::TimedOut => self.clock.sleep(self.poll_interval),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    const CSV: &str = "TimePeriod,Clicks\n2026-10-01,4\n2026-10-02,9\n";

    /// Time only moves when the runner sleeps or a poll is configured to be slow.
    struct FakeClock<'a> {
        origin: Instant,
        elapsed: &'a Cell<Duration>,
        sleeps: &'a RefCell<Vec<Duration>>,
    }

    impl Clock for FakeClock<'_> {
        fn now(&self) -> Instant {
            self.origin + self.elapsed.get()
        }

        fn sleep(&self, duration: Duration) {
            self.sleeps.borrow_mut().push(duration);
            self.elapsed.set(self.elapsed.get() + duration);
        }
    }

    struct ScriptedService<'a> {
        job_id: &'static str,
        rejects_submit: bool,
        statuses: RefCell<Vec<PollResponse>>,
        polls: Cell<u32>,
        polls_at_download: Cell<Option<u32>>,
        poll_cost: Duration,
        elapsed: &'a Cell<Duration>,
    }

    impl<'a> ScriptedService<'a> {
        fn new(statuses: Vec<PollResponse>, elapsed: &'a Cell<Duration>) -> Self {
            Self {
                job_id: "job-42",
                rejects_submit: false,
                statuses: RefCell::new(statuses),
                polls: Cell::new(0),
                polls_at_download: Cell::new(None),
                poll_cost: Duration::ZERO,
                elapsed,
            }
        }
    }

    impl ReportService for ScriptedService<'_> {
        fn submit(&self, _request: &ReportRequest) -> ExtractResult<String> {
            if self.rejects_submit {
                return Err(ExtractError::Submission("HTTP 400: invalid scope".into()));
            }
            Ok(self.job_id.to_string())
        }

        fn poll(&self, job_id: &str) -> ExtractResult<PollResponse> {
            assert_eq!(job_id, self.job_id);
            self.polls.set(self.polls.get() + 1);
            self.elapsed.set(self.elapsed.get() + self.poll_cost);
            let mut statuses = self.statuses.borrow_mut();
            // the last scripted status repeats forever
            if statuses.len() > 1 {
                Ok(statuses.remove(0))
            } else {
                Ok(statuses[0].clone())
            }
        }

        fn download(&self, url: &str) -> ExtractResult<Vec<u8>> {
            assert_eq!(url, "https://download.example/report.zip");
            self.polls_at_download.set(Some(self.polls.get()));
            Ok(CSV.as_bytes().to_vec())
        }
    }

    fn status(name: &str) -> PollResponse {
        let url = (name == "Success").then(|| "https://download.example/report.zip".to_string());
        PollResponse {
            status: Some(name.to_string()),
            download_url: url.clone(),
            raw: json!({"ReportRequestStatus": {"Status": name, "ReportDownloadUrl": url}}),
        }
    }

    fn request() -> ReportRequest {
        ReportRequest {
            account_id: "111".into(),
            kind: ReportKind::CampaignPerformance,
            range: DateRange {
                start: NaiveDate::from_ymd_opt(2026, 9, 17).unwrap(),
                end: NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(),
            },
        }
    }

    #[test]
    fn success_on_third_poll_downloads_after_exactly_three_polls() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let service = ScriptedService::new(
            vec![status("Pending"), status("InProgress"), status("Success")],
            &elapsed,
        );
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let records = ReportRunner::with_clock(&service, clock, DEFAULT_MAX_WAIT)
            .run(&request())
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["Clicks"], "9");
        assert_eq!(service.polls.get(), 3);
        assert_eq!(service.polls_at_download.get(), Some(3));
        assert_eq!(*sleeps.borrow(), vec![POLL_INTERVAL, POLL_INTERVAL]);
    }

    #[test]
    fn error_status_fails_after_one_poll() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let service = ScriptedService::new(vec![status("Error")], &elapsed);
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result = ReportRunner::with_clock(&service, clock, DEFAULT_MAX_WAIT).run(&request());

        match result {
            Err(ExtractError::ReportGeneration(payload)) => assert!(payload.contains("Error")),
            other => panic!("expected report generation error, got {:?}", other),
        }
        assert_eq!(service.polls.get(), 1);
        assert!(sleeps.borrow().is_empty());
        assert_eq!(service.polls_at_download.get(), None);
    }

    #[test]
    fn budget_runs_out_while_pending() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let service = ScriptedService::new(vec![status("Pending")], &elapsed);
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result =
            ReportRunner::with_clock(&service, clock, Duration::from_secs(25)).run(&request());

        assert!(matches!(result, Err(ExtractError::ReportTimeout(25))));
        // polls at t=0, 10 and 20; the check at t=30 gives up
        assert_eq!(service.polls.get(), 3);
    }

    #[test]
    fn spent_budget_times_out_without_polling() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let service = ScriptedService::new(vec![status("Success")], &elapsed);
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result = ReportRunner::with_clock(&service, clock, Duration::ZERO).run(&request());

        assert!(matches!(result, Err(ExtractError::ReportTimeout(0))));
        assert_eq!(service.polls.get(), 0);
    }

    #[test]
    fn slow_first_poll_still_happens_under_a_tiny_budget() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let mut service = ScriptedService::new(vec![status("Pending")], &elapsed);
        service.poll_cost = Duration::from_secs(5);
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result =
            ReportRunner::with_clock(&service, clock, Duration::from_secs(1)).run(&request());

        assert!(matches!(result, Err(ExtractError::ReportTimeout(1))));
        assert_eq!(service.polls.get(), 1);
    }

    #[test]
    fn success_without_download_url_is_a_generation_error() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let broken = PollResponse {
            status: Some("Success".into()),
            download_url: None,
            raw: json!({"ReportRequestStatus": {"Status": "Success"}}),
        };
        let service = ScriptedService::new(vec![broken], &elapsed);
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result = ReportRunner::with_clock(&service, clock, DEFAULT_MAX_WAIT).run(&request());
        assert!(matches!(result, Err(ExtractError::ReportGeneration(_))));
    }

    #[test]
    fn empty_job_id_fails_submission_without_polling() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let mut service = ScriptedService::new(vec![status("Success")], &elapsed);
        service.job_id = "";
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result = ReportRunner::with_clock(&service, clock, DEFAULT_MAX_WAIT).run(&request());

        assert!(matches!(result, Err(ExtractError::Submission(_))));
        assert_eq!(service.polls.get(), 0);
        assert_eq!(service.polls_at_download.get(), None);
    }

    #[test]
    fn rejected_submission_is_passed_through_without_polling() {
        let elapsed = Cell::new(Duration::ZERO);
        let sleeps = RefCell::new(Vec::new());
        let mut service = ScriptedService::new(vec![status("Success")], &elapsed);
        service.rejects_submit = true;
        let clock = FakeClock {
            origin: Instant::now(),
            elapsed: &elapsed,
            sleeps: &sleeps,
        };

        let result = ReportRunner::with_clock(&service, clock, DEFAULT_MAX_WAIT).run(&request());

        match result {
            Err(ExtractError::Submission(msg)) => assert!(msg.contains("invalid scope")),
            other => panic!("expected submission error, got {:?}", other),
        }
        assert_eq!(service.polls.get(), 0);
        assert!(sleeps.borrow().is_empty());
    }

    #[test]
    fn report_kinds_carry_fixed_columns() {
        assert_eq!(ReportKind::CampaignPerformance.columns().len(), 11);
        assert!(ReportKind::AdGroupPerformance.columns().contains(&"AdGroupName"));
        assert!(!ReportKind::AdGroupPerformance.columns().contains(&"Revenue"));
    }
}
