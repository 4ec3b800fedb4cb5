//! Sequential test execution.

use std::time::Instant;

use cxxsuite_config::Configuration;

use crate::error::Result;
use crate::format::{TestCase, TestFormat};
use crate::report::TestRow;

/// Runs discovered tests against a configuration and collects result rows.
pub struct TestRunner<'a> {
    config: &'a Configuration,
    filter: Option<String>,
}

impl<'a> TestRunner<'a> {
    #[must_use]
    pub fn new(config: &'a Configuration) -> Self {
        Self {
            config,
            filter: None,
        }
    }

    /// Restrict the run to tests whose path contains `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    /// Execute the tests in order and return one row per executed test.
    pub fn run(&self, tests: &[TestCase]) -> Result<Vec<TestRow>> {
        let format = TestFormat::new(self.config);
        let mut rows = Vec::new();
        for test in tests {
            let path = test.relative_path.display().to_string();
            if let Some(filter) = &self.filter
                && !path.contains(filter.as_str())
            {
                continue;
            }
            let started = Instant::now();
            let result = format.execute(test)?;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            rows.push(TestRow {
                path,
                kind: test.kind.as_str().to_string(),
                outcome: result.outcome,
                detail: result.detail,
                duration_ms,
            });
        }
        Ok(rows)
    }
}
