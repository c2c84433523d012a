//! Outcome tallies for a finished run.

use futures::{Stream, StreamExt};
use serde::Serialize;
use sweep_cache::ResponseRecord;
use sweep_pipeline::{QueryError, QueryOutcome};
use tracing::{info, warn};

/// Counts what a run produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Records emitted successfully.
    pub succeeded: usize,
    /// Backend calls that failed softly.
    pub soft_failures: usize,
    /// Records obtained but not written to the cache.
    pub persistence_failures: usize,
    /// Prompts whose cache lookup failed.
    pub lookup_failures: usize,
    /// Responses across every record obtained, persisted or not.
    pub responses: usize,
}

impl RunReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one outcome to the tally.
    pub fn record(&mut self, outcome: &QueryOutcome) {
        match outcome {
            Ok(record) => {
                self.succeeded += 1;
                self.responses += record.responses().len();
            }
            Err(QueryError::Backend(_)) => self.soft_failures += 1,
            Err(QueryError::Persist { record, .. }) => {
                self.persistence_failures += 1;
                self.responses += record.responses().len();
            }
            Err(QueryError::Lookup { .. }) => self.lookup_failures += 1,
        }
    }

    /// Total number of outcomes seen.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.soft_failures + self.persistence_failures + self.lookup_failures
    }

    /// Returns `true` when every outcome was a success.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.total() == self.succeeded
    }

    /// Logs a one-line summary.
    pub fn log_summary(&self) {
        if self.is_clean() {
            info!(
                prompts = self.total(),
                responses = self.responses,
                "query run finished"
            );
        } else {
            warn!(
                prompts = self.total(),
                succeeded = self.succeeded,
                soft_failures = self.soft_failures,
                persistence_failures = self.persistence_failures,
                lookup_failures = self.lookup_failures,
                responses = self.responses,
                "query run finished with failures"
            );
        }
    }

    /// Drains `outcomes`, returning every record obtained and the tally.
    ///
    /// Records whose save failed are included; failures are counted and
    /// dropped.
    pub async fn drain<S>(outcomes: S) -> (Vec<ResponseRecord>, Self)
    where
        S: Stream<Item = QueryOutcome>,
    {
        let mut report = Self::new();
        let mut records = Vec::new();
        let mut outcomes = Box::pin(outcomes);

        while let Some(outcome) = outcomes.next().await {
            report.record(&outcome);
            match outcome {
                Ok(record) => records.push(record),
                Err(QueryError::Persist { record, .. }) => records.push(*record),
                Err(_) => {}
            }
        }

        report.log_summary();
        (records, report)
    }
}

impl<'a> Extend<&'a QueryOutcome> for RunReport {
    fn extend<I: IntoIterator<Item = &'a QueryOutcome>>(&mut self, outcomes: I) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use sweep_pipeline::BackendCallError;

    fn success(prompt: &str, responses: usize) -> QueryOutcome {
        Ok(ResponseRecord::builder(prompt, "m")
            .responses((0..responses).map(|i| i.to_string()).collect())
            .build())
    }

    fn soft(prompt: &str) -> QueryOutcome {
        Err(QueryError::Backend(BackendCallError::Aborted {
            prompt: prompt.to_owned(),
            reason: "cancelled".to_owned(),
        }))
    }

    #[test]
    fn tallies_each_kind() {
        let mut report = RunReport::new();
        report.extend(&[success("a", 2), soft("b"), success("c", 3)]);

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.soft_failures, 1);
        assert_eq!(report.responses, 5);
        assert_eq!(report.total(), 3);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn drain_keeps_records_in_stream_order() {
        let outcomes = stream::iter(vec![success("a", 1), soft("b"), success("c", 1)]);
        let (records, report) = RunReport::drain(outcomes).await;

        let prompts: Vec<_> = records.iter().map(ResponseRecord::prompt).collect();
        assert_eq!(prompts, ["a", "c"]);
        assert_eq!(report.soft_failures, 1);
        assert_eq!(
            serde_json::to_value(&report).unwrap()["succeeded"],
            serde_json::json!(2)
        );
    }
}
