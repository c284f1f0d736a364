//! Per-test envelope: the test record and its setup, body and teardown
//! keywords.
//!
//! A test that requests no function scoped fixture is recorded as a bare
//! test. As soon as one such fixture starts the test gets an explicit
//! envelope, `setup` keywords (one per fixture), a `body` keyword and a
//! `teardown` keyword.

use std::collections::HashMap;

use anyhow::{Result, bail};
use log::{debug, warn};

use crate::plugin::TestItem;
use crate::recorder::{KeywordHandle, KeywordKind, Recorder, TestHandle};

/// Name of the teardown keyword; finalizers of all fixtures run inside it.
pub const TEARDOWN_KEYWORD: &str = "fixture(s)";

/// Where a test currently is within its envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Body,
    Teardown,
    Finished,
}

/// Lifecycle record for one test item.
#[derive(Debug)]
pub struct TestEnvelope {
    pub test: Option<TestHandle>,
    pub explicit: bool,
    pub setup: Option<KeywordHandle>,
    pub body: Option<KeywordHandle>,
    pub teardown: Option<KeywordHandle>,
    /// First failure seen, reported on the test when it is finalized.
    pub pending_error: Option<String>,
    pub stage: Stage,
    opened: u64,
}

impl TestEnvelope {
    fn new(test: TestHandle, explicit: bool, opened: u64) -> Self {
        Self {
            test: Some(test),
            explicit,
            setup: None,
            body: None,
            teardown: None,
            pending_error: None,
            stage: Stage::Setup,
            opened,
        }
    }

    fn record_error(&mut self, error: &Option<String>) {
        if self.pending_error.is_none() {
            self.pending_error = error.clone();
        }
    }
}

/// Envelopes of the test items currently in flight, by node id.
#[derive(Debug, Default)]
pub struct EnvelopeTracker {
    envelopes: HashMap<String, TestEnvelope>,
    opened: u64,
    recorded: usize,
    failed: usize,
}

impl EnvelopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nodeid: &str) -> Option<&TestEnvelope> {
        self.envelopes.get(nodeid)
    }

    /// Number of items with an envelope that has not seen its teardown.
    pub fn in_flight(&self) -> usize {
        self.envelopes.len()
    }

    /// Tests finalized so far and how many of them failed.
    pub fn stats(&self) -> (usize, usize) {
        (self.recorded, self.failed)
    }

    fn open_test<R>(&mut self, recorder: &mut R, item: &TestItem, explicit: bool) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        debug!("Starting test envelope for {} (explicit: {explicit})", item.nodeid);
        let test = recorder.begin_test(&item.name, &item.markers)?;
        self.opened += 1;
        self.envelopes
            .insert(item.nodeid.clone(), TestEnvelope::new(test, explicit, self.opened));
        Ok(())
    }

    /// A function scoped fixture of `item` is about to be set up.
    pub fn fixture_setup_begin<R>(&mut self, recorder: &mut R, item: &TestItem, fixture: &str) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        if !self.envelopes.contains_key(&item.nodeid) {
            self.open_test(recorder, item, true)?;
        }
        let Some(envelope) = self.envelopes.get_mut(&item.nodeid) else {
            bail!("No envelope for {}", item.nodeid);
        };

        if envelope.stage != Stage::Setup || !envelope.explicit {
            debug!(
                "Fixture {fixture} requested by {} outside of its setup, not recorded",
                item.nodeid
            );
            return Ok(());
        }

        if let Some(previous) = envelope.setup.take() {
            recorder.end_keyword(previous, None)?;
        }
        debug!("Starting setup {fixture} for {}", item.nodeid);
        envelope.setup = Some(recorder.begin_keyword(fixture, KeywordKind::Setup)?);
        Ok(())
    }

    /// The setup phase of `item` has completed.
    pub fn setup_done<R>(&mut self, recorder: &mut R, item: &TestItem, error: Option<String>) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        if !self.envelopes.contains_key(&item.nodeid) {
            self.open_test(recorder, item, false)?;
        }
        let Some(envelope) = self.envelopes.get_mut(&item.nodeid) else {
            bail!("No envelope for {}", item.nodeid);
        };
        if envelope.stage != Stage::Setup {
            bail!("Setup of {} reported twice", item.nodeid);
        }

        if let Some(setup) = envelope.setup.take() {
            recorder.end_keyword(setup, error.clone())?;
        }

        if error.is_some() {
            debug!("Setup of {} failed, skipping body", item.nodeid);
            envelope.record_error(&error);
            return self.finalize(recorder, &item.nodeid);
        }

        envelope.stage = Stage::Body;
        if envelope.explicit {
            envelope.body = Some(recorder.begin_keyword(&item.name, KeywordKind::Body)?);
        }
        Ok(())
    }

    /// The call phase (test body) of `item` has completed.
    pub fn call_done<R>(&mut self, recorder: &mut R, nodeid: &str, error: Option<String>) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let Some(envelope) = self.envelopes.get_mut(nodeid) else {
            bail!("Call phase reported for {nodeid}, which was never set up");
        };

        match envelope.stage {
            Stage::Finished => {
                debug!("Call phase of finished test {nodeid} ignored");
                return Ok(());
            }
            Stage::Body => {}
            stage => bail!("Call phase reported for {nodeid} during {stage:?}"),
        }

        envelope.record_error(&error);
        if !envelope.explicit {
            return self.finalize(recorder, nodeid);
        }

        if let Some(body) = envelope.body.take() {
            recorder.end_keyword(body, error)?;
        }
        envelope.stage = Stage::Teardown;
        envelope.teardown = Some(recorder.begin_keyword(TEARDOWN_KEYWORD, KeywordKind::Teardown)?);
        Ok(())
    }

    /// The teardown phase of `item` has completed. The envelope is dropped.
    pub fn teardown_done<R>(&mut self, recorder: &mut R, nodeid: &str, error: Option<String>) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let Some(envelope) = self.envelopes.get_mut(nodeid) else {
            bail!("Teardown reported for {nodeid}, which was never set up");
        };

        match envelope.stage {
            Stage::Finished => {}
            Stage::Teardown => {
                if let Some(teardown) = envelope.teardown.take() {
                    recorder.end_keyword(teardown, error.clone())?;
                }
                envelope.record_error(&error);
                self.finalize(recorder, nodeid)?;
            }
            stage => {
                warn!("Teardown of {nodeid} reported during {stage:?}, closing the test");
                envelope.record_error(&error);
                self.finalize(recorder, nodeid)?;
            }
        }

        self.envelopes.remove(nodeid);
        Ok(())
    }

    /// Ends the test of `nodeid` with its pending error, closing any phase
    /// keyword left open. No-op when the test is not open.
    fn finalize<R>(&mut self, recorder: &mut R, nodeid: &str) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let Some(envelope) = self.envelopes.get_mut(nodeid) else {
            return Ok(());
        };
        envelope.stage = Stage::Finished;

        for keyword in [envelope.setup.take(), envelope.body.take(), envelope.teardown.take()]
            .into_iter()
            .flatten()
        {
            warn!("Closing keyword left open in {nodeid}");
            recorder.end_keyword(keyword, None)?;
        }

        let Some(test) = envelope.test.take() else {
            return Ok(());
        };
        let error = envelope.pending_error.clone();
        debug!("Finishing test {nodeid}, error: {error:?}");
        self.recorded += 1;
        if error.is_some() {
            self.failed += 1;
        }
        recorder.end_test(test, error)
    }

    /// Finalizes every envelope still open with `message`, most recently
    /// opened first, and forgets them.
    pub fn abort_all<R>(&mut self, recorder: &mut R, message: &str) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let mut open: Vec<(u64, String)> = self
            .envelopes
            .iter()
            .filter(|(_, envelope)| envelope.test.is_some())
            .map(|(nodeid, envelope)| (envelope.opened, nodeid.clone()))
            .collect();
        open.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for (_, nodeid) in open {
            warn!("Test {nodeid} did not complete, closing it");
            if let Some(envelope) = self.envelopes.get_mut(&nodeid) {
                envelope.record_error(&Some(message.to_string()));
            }
            self.finalize(recorder, &nodeid)?;
        }
        self.envelopes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::call_log::CallLog;

    fn item(name: &str) -> TestItem {
        TestItem {
            nodeid: format!("tests/test_a.py::{name}"),
            name: name.to_string(),
            markers: vec!["critical".to_string()],
        }
    }

    fn err(message: &str) -> Option<String> {
        Some(message.to_string())
    }

    #[test]
    fn test_bare_test_single_span() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_passing");

        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.call_done(&mut log, &t.nodeid, None).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, None).unwrap();

        assert_eq!(
            log.take(),
            vec!["begin_test test_passing [critical]", "end_test test_passing -"]
        );
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.stats(), (1, 0));
    }

    #[test]
    fn test_bare_test_call_failure() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_direct_assert");

        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.call_done(&mut log, &t.nodeid, err("AssertionError: foo")).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, None).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "begin_test test_direct_assert [critical]",
                "end_test test_direct_assert AssertionError: foo"
            ]
        );
        assert_eq!(tracker.stats(), (1, 1));
    }

    #[test]
    fn test_bare_test_setup_failure_skips_body() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_skipped_body");

        tracker.setup_done(&mut log, &t, err("Skipped: no db")).unwrap();
        tracker.call_done(&mut log, &t.nodeid, None).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, None).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "begin_test test_skipped_body [critical]",
                "end_test test_skipped_body Skipped: no db"
            ]
        );
    }

    #[test]
    fn test_explicit_envelope_order() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_fixture_setup_and_teardown");

        tracker.fixture_setup_begin(&mut log, &t, "fixtureWithSetupAndTeardown1").unwrap();
        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.call_done(&mut log, &t.nodeid, None).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, None).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "begin_test test_fixture_setup_and_teardown [critical]",
                "begin_keyword fixtureWithSetupAndTeardown1 setup",
                "end_keyword fixtureWithSetupAndTeardown1 -",
                "begin_keyword test_fixture_setup_and_teardown body",
                "end_keyword test_fixture_setup_and_teardown -",
                "begin_keyword fixture(s) teardown",
                "end_keyword fixture(s) -",
                "end_test test_fixture_setup_and_teardown -",
            ]
        );
    }

    #[test]
    fn test_two_fixtures_get_one_setup_keyword_each() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_two_fixtures");

        tracker.fixture_setup_begin(&mut log, &t, "first").unwrap();
        tracker.fixture_setup_begin(&mut log, &t, "second").unwrap();
        tracker.setup_done(&mut log, &t, None).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "begin_test test_two_fixtures [critical]",
                "begin_keyword first setup",
                "end_keyword first -",
                "begin_keyword second setup",
                "end_keyword second -",
                "begin_keyword test_two_fixtures body",
            ]
        );
    }

    #[test]
    fn test_setup_failure_closes_test_without_body() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_setup_assert");

        tracker.fixture_setup_begin(&mut log, &t, "fixtureWithSetupError").unwrap();
        tracker.setup_done(&mut log, &t, err("assert False")).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, None).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "begin_test test_setup_assert [critical]",
                "begin_keyword fixtureWithSetupError setup",
                "end_keyword fixtureWithSetupError assert False",
                "end_test test_setup_assert assert False",
            ]
        );
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_teardown_failure_fails_test() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_teardown_assert");

        tracker.fixture_setup_begin(&mut log, &t, "fixtureWithTeardownError").unwrap();
        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.call_done(&mut log, &t.nodeid, None).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, err("assert False")).unwrap();

        let calls = log.take();
        assert_eq!(calls[calls.len() - 2], "end_keyword fixture(s) assert False");
        assert_eq!(calls[calls.len() - 1], "end_test test_teardown_assert assert False");
    }

    #[test]
    fn test_body_failure_wins_over_teardown_failure() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_both_fail");

        tracker.fixture_setup_begin(&mut log, &t, "fix").unwrap();
        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.call_done(&mut log, &t.nodeid, err("body failed")).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, err("teardown failed")).unwrap();

        let calls = log.take();
        assert!(calls.contains(&"end_keyword test_both_fail body failed".to_string()));
        assert!(calls.contains(&"end_keyword fixture(s) teardown failed".to_string()));
        assert_eq!(calls.last().unwrap(), "end_test test_both_fail body failed");
        assert_eq!(tracker.stats(), (1, 1));
    }

    #[test]
    fn test_fixture_during_body_is_not_recorded() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_dynamic");

        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.fixture_setup_begin(&mut log, &t, "late").unwrap();
        tracker.call_done(&mut log, &t.nodeid, None).unwrap();

        assert_eq!(
            log.take(),
            vec!["begin_test test_dynamic [critical]", "end_test test_dynamic -"]
        );
    }

    #[test]
    fn test_unknown_item_is_structural_error() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();

        let err = tracker.call_done(&mut log, "nowhere::test", None).unwrap_err();
        assert!(err.to_string().contains("never set up"));
        assert!(tracker.teardown_done(&mut log, "nowhere::test", None).is_err());
        assert!(log.take().is_empty());
    }

    #[test]
    fn test_teardown_without_call_closes_open_keywords() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let t = item("test_interrupted");

        tracker.fixture_setup_begin(&mut log, &t, "fix").unwrap();
        tracker.setup_done(&mut log, &t, None).unwrap();
        tracker.teardown_done(&mut log, &t.nodeid, None).unwrap();

        let calls = log.take();
        assert_eq!(
            &calls[calls.len() - 2..],
            ["end_keyword test_interrupted -", "end_test test_interrupted -"]
        );
    }

    #[test]
    fn test_abort_all_closes_latest_first() {
        let mut log = CallLog::default();
        let mut tracker = EnvelopeTracker::new();
        let first = item("test_first");
        let second = item("test_second");

        tracker.fixture_setup_begin(&mut log, &first, "fix").unwrap();
        tracker.setup_done(&mut log, &second, None).unwrap();
        log.take();

        tracker.abort_all(&mut log, "interrupted").unwrap();
        assert_eq!(
            log.take(),
            vec![
                "end_test test_second interrupted",
                "end_keyword fix -",
                "end_test test_first interrupted",
            ]
        );
        assert_eq!(tracker.in_flight(), 0);
        tracker.abort_all(&mut log, "interrupted").unwrap();
        assert!(log.take().is_empty());
    }
}
