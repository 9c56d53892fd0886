//! Result Parser
//!
//! Streams the engine's CSV result file (JTL) and reduces it to a
//! [`MetricsSummary`]. Content problems are reported through
//! [`ParseStatus`]; only genuine I/O failures surface as errors.

use crate::artifacts::ArtifactStore;
use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

pub const ELAPSED_COLUMN: &str = "elapsed";
pub const SUCCESS_COLUMN: &str = "success";
pub const TIMESTAMP_COLUMN: &str = "timeStamp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseStatus {
    Ok,
    /// Well-formed file without data rows
    Empty,
    Malformed,
}

impl std::fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseStatus::Ok => write!(f, "OK"),
            ParseStatus::Empty => write!(f, "EMPTY"),
            ParseStatus::Malformed => write!(f, "MALFORMED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MalformedReason {
    /// The result file was never written
    Missing,
    /// The header lacks required columns
    MissingColumns { columns: Vec<String> },
    /// A row could not be decoded; counts cover the rows before it
    CorruptRow { line: u64, message: String },
}

impl MalformedReason {
    /// Whether the data is unavailable rather than merely badly shaped
    pub fn is_io(&self) -> bool {
        matches!(self, MalformedReason::Missing)
    }
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::Missing => write!(f, "result file is missing"),
            MalformedReason::MissingColumns { columns } => {
                write!(f, "header lacks columns: {}", columns.join(", "))
            }
            MalformedReason::CorruptRow { line, message } => {
                write!(f, "corrupt row at line {line}: {message}")
            }
        }
    }
}

/// Nearest-rank latency percentiles in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
}

/// Aggregate view of one result file.
///
/// Latency fields are `None` when no row carried a parseable elapsed value;
/// they are never reported as zero for an empty run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub status: ParseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub malformed: Option<MalformedReason>,
    pub total_samples: u64,
    pub failed_samples: u64,
    pub mean_latency_ms: Option<f64>,
    pub max_latency_ms: Option<u64>,
    pub min_latency_ms: Option<u64>,
    pub percentiles: Option<LatencyPercentiles>,
    /// Rows counted in the totals but left out of the latency aggregate
    pub rows_without_latency: u64,
    pub throughput_per_sec: Option<f64>,
}

impl MetricsSummary {
    fn blank(status: ParseStatus) -> Self {
        Self {
            status,
            malformed: None,
            total_samples: 0,
            failed_samples: 0,
            mean_latency_ms: None,
            max_latency_ms: None,
            min_latency_ms: None,
            percentiles: None,
            rows_without_latency: 0,
            throughput_per_sec: None,
        }
    }

    pub fn empty() -> Self {
        Self::blank(ParseStatus::Empty)
    }

    pub fn malformed(reason: MalformedReason) -> Self {
        Self {
            malformed: Some(reason),
            ..Self::blank(ParseStatus::Malformed)
        }
    }

    pub fn successful_samples(&self) -> u64 {
        self.total_samples - self.failed_samples
    }

    /// Failed share of all samples, `None` without samples
    pub fn error_rate(&self) -> Option<f64> {
        (self.total_samples > 0).then(|| self.failed_samples as f64 / self.total_samples as f64)
    }
}

#[derive(Default)]
struct Accumulator {
    total: u64,
    failed: u64,
    latencies: Vec<u64>,
    latency_sum: u128,
    without_latency: u64,
    first_start: Option<u64>,
    last_end: Option<u64>,
}

impl Accumulator {
    fn push(&mut self, elapsed: Option<u64>, failed: bool, timestamp: Option<u64>) {
        self.total += 1;
        if failed {
            self.failed += 1;
        }
        match elapsed {
            Some(ms) => {
                self.latencies.push(ms);
                self.latency_sum += u128::from(ms);
            }
            None => self.without_latency += 1,
        }
        if let Some(start) = timestamp {
            let end = start.saturating_add(elapsed.unwrap_or(0));
            self.first_start = Some(self.first_start.map_or(start, |s| s.min(start)));
            self.last_end = Some(self.last_end.map_or(end, |e| e.max(end)));
        }
    }

    fn finish(mut self) -> MetricsSummary {
        if self.total == 0 {
            return MetricsSummary::empty();
        }
        let mut summary = MetricsSummary::blank(ParseStatus::Ok);
        summary.total_samples = self.total;
        summary.failed_samples = self.failed;
        summary.rows_without_latency = self.without_latency;

        if !self.latencies.is_empty() {
            self.latencies.sort_unstable();
            let n = self.latencies.len();
            summary.mean_latency_ms = Some(self.latency_sum as f64 / n as f64);
            summary.min_latency_ms = self.latencies.first().copied();
            summary.max_latency_ms = self.latencies.last().copied();
            summary.percentiles = Some(LatencyPercentiles {
                p50: nearest_rank(&self.latencies, 50),
                p90: nearest_rank(&self.latencies, 90),
                p95: nearest_rank(&self.latencies, 95),
                p99: nearest_rank(&self.latencies, 99),
            });
        }

        if let (Some(start), Some(end)) = (self.first_start, self.last_end) {
            if end > start {
                summary.throughput_per_sec =
                    Some(self.total as f64 / ((end - start) as f64 / 1000.0));
            }
        }
        summary
    }
}

/// `sorted` must be non-empty and ascending
fn nearest_rank(sorted: &[u64], pct: u64) -> u64 {
    let n = sorted.len() as u64;
    let rank = (pct * n).div_ceil(100).max(1);
    sorted[(rank - 1) as usize]
}

fn parse_u64(field: Option<&[u8]>) -> Option<u64> {
    std::str::from_utf8(field?).ok()?.trim().parse().ok()
}

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn column_index(headers: &csv::ByteRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| trim_bytes(h).eq_ignore_ascii_case(name.as_bytes()))
}

pub struct ResultParser {
    store: Arc<ArtifactStore>,
}

impl ResultParser {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Summarize the result file at `result_path`.
    ///
    /// A missing file yields a `Malformed` summary; read failures are errors.
    pub async fn parse(&self, result_path: &Path) -> Result<MetricsSummary> {
        let Some(file) = self.store.open(result_path).await? else {
            debug!(path = %result_path.display(), "Result file missing");
            return Ok(MetricsSummary::malformed(MalformedReason::Missing));
        };

        let path = result_path.to_path_buf();
        let summary = tokio::task::spawn_blocking(move || {
            Self::summarize(std::io::BufReader::new(file))
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
        .map_err(|e| StorageError::io(path, e))?;

        debug!(
            path = %result_path.display(),
            status = %summary.status,
            total = summary.total_samples,
            failed = summary.failed_samples,
            "Parsed results"
        );
        Ok(summary)
    }

    /// Summarize a CSV stream with a header row
    pub fn summarize<R: Read>(reader: R) -> std::io::Result<MetricsSummary> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = match csv.byte_headers() {
            Ok(headers) => headers.clone(),
            Err(e) => return Self::classify_error(e, 1, Accumulator::default()),
        };
        if headers.iter().all(|h| trim_bytes(h).is_empty()) {
            // Zero-byte file: the engine never got as far as writing a header
            return Ok(MetricsSummary::empty());
        }

        let elapsed_idx = column_index(&headers, ELAPSED_COLUMN);
        let success_idx = column_index(&headers, SUCCESS_COLUMN);
        let (Some(elapsed_idx), Some(success_idx)) = (elapsed_idx, success_idx) else {
            let columns = [(ELAPSED_COLUMN, elapsed_idx), (SUCCESS_COLUMN, success_idx)]
                .into_iter()
                .filter(|(_, idx)| idx.is_none())
                .map(|(name, _)| name.to_string())
                .collect();
            return Ok(MetricsSummary::malformed(
                MalformedReason::MissingColumns { columns },
            ));
        };
        let timestamp_idx = column_index(&headers, TIMESTAMP_COLUMN);

        let mut acc = Accumulator::default();
        let mut record = csv::ByteRecord::new();
        loop {
            match csv.read_byte_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    let line = e.position().map_or(0, |p| p.line());
                    return Self::classify_error(e, line, acc);
                }
            }

            let elapsed = parse_u64(record.get(elapsed_idx));
            let failed = record
                .get(success_idx)
                .is_some_and(|flag| trim_bytes(flag).eq_ignore_ascii_case(b"false"));
            let timestamp = timestamp_idx.and_then(|idx| parse_u64(record.get(idx)));
            if elapsed.is_none() {
                let line = record.position().map_or(0, |p| p.line());
                trace!(line, "Row without elapsed value");
            }
            acc.push(elapsed, failed, timestamp);
        }

        Ok(acc.finish())
    }

    fn classify_error(
        err: csv::Error,
        line: u64,
        acc: Accumulator,
    ) -> std::io::Result<MetricsSummary> {
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Err(io),
            _ => {
                let mut summary = acc.finish();
                summary.status = ParseStatus::Malformed;
                summary.malformed = Some(MalformedReason::CorruptRow { line, message });
                Ok(summary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "timeStamp,elapsed,label,responseCode,responseMessage,threadName,dataType,success,failureMessage,bytes,sentBytes,grpThreads,allThreads,URL,Latency,IdleTime,Connect\n";

    fn row(ts: u64, elapsed: &str, success: bool) -> String {
        format!(
            "{ts},{elapsed},GET /,200,OK,Thread Group 1-1,text,{success},,512,120,1,1,https://example.com/,{elapsed},0,3\n"
        )
    }

    fn summarize(text: &str) -> MetricsSummary {
        ResultParser::summarize(text.as_bytes()).unwrap()
    }

    #[test]
    fn hundred_rows_five_failed() {
        let mut text = HEADER.to_string();
        for i in 1..=100u64 {
            text.push_str(&row(1_700_000_000_000 + i * 10, &(i * 10).to_string(), i % 20 != 0));
        }
        let summary = summarize(&text);

        assert_eq!(summary.status, ParseStatus::Ok);
        assert_eq!(summary.total_samples, 100);
        assert_eq!(summary.failed_samples, 5);
        // mean of 10, 20, ..., 1000
        assert_eq!(summary.mean_latency_ms, Some(505.0));
        assert_eq!(summary.max_latency_ms, Some(1000));
        assert_eq!(summary.min_latency_ms, Some(10));
        assert_eq!(
            summary.percentiles,
            Some(LatencyPercentiles {
                p50: 500,
                p90: 900,
                p95: 950,
                p99: 990
            })
        );
        assert_eq!(summary.error_rate(), Some(0.05));
    }

    #[test]
    fn header_only_is_empty_not_malformed() {
        let summary = summarize(HEADER);
        assert_eq!(summary.status, ParseStatus::Empty);
        assert_eq!(summary.total_samples, 0);
        assert_eq!(summary.mean_latency_ms, None);
        assert_eq!(summary.max_latency_ms, None);
        assert_eq!(summary.error_rate(), None);
    }

    #[test]
    fn zero_byte_file_is_empty() {
        assert_eq!(summarize("").status, ParseStatus::Empty);
    }

    #[test]
    fn header_without_required_columns_is_malformed() {
        let summary = summarize("timeStamp,label,responseCode\n1,GET,200\n");
        assert_eq!(summary.status, ParseStatus::Malformed);
        assert_eq!(
            summary.malformed,
            Some(MalformedReason::MissingColumns {
                columns: vec!["elapsed".into(), "success".into()]
            })
        );
    }

    #[test]
    fn failed_rows_still_count_toward_latency() {
        let text = format!("{HEADER}{}{}", row(1000, "100", false), row(1100, "300", true));
        let summary = summarize(&text);
        assert_eq!(summary.failed_samples, 1);
        assert_eq!(summary.mean_latency_ms, Some(200.0));
    }

    #[test]
    fn unparseable_elapsed_is_excluded_from_latency_only() {
        let text = format!(
            "{HEADER}{}{}{}",
            row(1000, "100", true),
            row(1100, "n/a", false),
            row(1200, "", true)
        );
        let summary = summarize(&text);

        assert_eq!(summary.total_samples, 3);
        assert_eq!(summary.failed_samples, 1);
        assert_eq!(summary.rows_without_latency, 2);
        assert_eq!(summary.mean_latency_ms, Some(100.0));
        assert_eq!(summary.max_latency_ms, Some(100));
    }

    #[test]
    fn rows_without_any_latency_keep_sentinels() {
        let summary = summarize("elapsed,success\n,false\n,true\n");
        assert_eq!(summary.status, ParseStatus::Ok);
        assert_eq!(summary.total_samples, 2);
        assert_eq!(summary.failed_samples, 1);
        assert_eq!(summary.mean_latency_ms, None);
        assert_eq!(summary.percentiles, None);
    }

    #[test]
    fn only_literal_false_marks_failure() {
        let summary = summarize("elapsed,success\n1,FALSE\n2,true\n3,\n4,maybe\n");
        assert_eq!(summary.total_samples, 4);
        assert_eq!(summary.failed_samples, 1);
    }

    #[test]
    fn short_rows_are_tolerated() {
        let summary = summarize("elapsed,label,success\n5,GET\n7,GET,false\n");
        assert_eq!(summary.total_samples, 2);
        assert_eq!(summary.failed_samples, 1);
        assert_eq!(summary.max_latency_ms, Some(7));
    }

    #[test]
    fn quoted_fields_with_commas_and_newlines() {
        let text = "elapsed,failureMessage,success\n12,\"Non HTTP response code: java.net.ConnectException,\nConnection refused\",false\n";
        let summary = summarize(text);
        assert_eq!(summary.total_samples, 1);
        assert_eq!(summary.failed_samples, 1);
        assert_eq!(summary.max_latency_ms, Some(12));
    }

    #[test]
    fn throughput_uses_timestamp_span() {
        // 3 samples between t=0 and t=2000ms
        let text = "timeStamp,elapsed,success\n0,100,true\n1000,100,true\n1900,100,true\n";
        let summary = summarize(text);
        assert_eq!(summary.throughput_per_sec, Some(1.5));
    }

    #[test]
    fn nearest_rank_small_sets() {
        assert_eq!(nearest_rank(&[7], 99), 7);
        assert_eq!(nearest_rank(&[1, 2], 50), 1);
        assert_eq!(nearest_rank(&[1, 2], 51), 2);
    }

    #[tokio::test]
    async fn missing_file_is_malformed_with_io_reason() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()));
        let parser = ResultParser::new(store);

        let summary = parser.parse(&dir.path().join("gone.jtl")).await.unwrap();
        assert_eq!(summary.status, ParseStatus::Malformed);
        assert!(summary.malformed.as_ref().is_some_and(MalformedReason::is_io));
    }

    #[tokio::test]
    async fn parse_reads_through_the_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.jtl");
        std::fs::write(&path, "elapsed,success\n10,true\n30,false\n").unwrap();
        let parser = ResultParser::new(Arc::new(ArtifactStore::new(dir.path())));

        let summary = parser.parse(&path).await.unwrap();
        assert_eq!(summary.total_samples, 2);
        assert_eq!(summary.mean_latency_ms, Some(20.0));
    }

    #[test]
    fn summary_serializes_status_in_caps() {
        let json = serde_json::to_value(MetricsSummary::empty()).unwrap();
        assert_eq!(json["status"], "EMPTY");
        assert!(json["mean_latency_ms"].is_null());
    }
}
