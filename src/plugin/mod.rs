//! Test runner hooks mapped onto the recorder.
//!
//! `TraceRobotPlugin` receives the runner's lifecycle hooks one at a time
//! and hands each to the tracker that owns it: test locations go to the
//! suite tracker, function scoped fixtures and phase reports to the
//! envelope tracker, every other fixture to a keyword span.

use std::fmt;

use anyhow::{Result, ensure};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::plugin_config::{FailureStyle, PluginConfig};
use crate::recorder::Recorder;

pub mod envelope;
pub mod fixture;
pub mod suite_tracker;

pub use envelope::{EnvelopeTracker, Stage, TestEnvelope};
pub use fixture::FixtureSpan;
pub use suite_tracker::{SuiteFrame, SuitePathTracker};

/// Message attached to tests still open when the session finishes.
pub const INCOMPLETE_TEST_MESSAGE: &str = "test did not complete before session end";

/// A collected test as the runner identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestItem {
    /// Unique id, e.g. `tests/test_a.py::test_x[1]`
    pub nodeid: String,
    /// Display name
    pub name: String,
    /// Marker names, recorded as tags
    #[serde(default)]
    pub markers: Vec<String>,
}

/// Lifetime of a fixture value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Function,
    Class,
    Module,
    Package,
    Session,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Function => "function",
            Scope::Class => "class",
            Scope::Module => "module",
            Scope::Package => "package",
            Scope::Session => "session",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureDef {
    /// Argument name the fixture is requested by
    pub name: String,
    pub scope: Scope,
}

/// Phase of a test reported by the runner after it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

/// A captured failure: exception type, text and where it was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// One line rendering for report bodies, never a traceback.
    pub fn render(&self, style: FailureStyle) -> String {
        let exception = if self.message.is_empty() {
            self.kind.clone()
        } else {
            format!("{}: {}", self.kind, self.message)
        };
        match (style, &self.location) {
            (FailureStyle::Short, Some(location)) => format!("{location}: {exception}"),
            _ => exception,
        }
    }
}

/// What a fixture setup produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureOutcome {
    /// Rendered fixture value, if the runner reports one
    Value(Option<String>),
    Failed(Failure),
}

impl FixtureOutcome {
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            FixtureOutcome::Failed(failure) => Some(failure),
            FixtureOutcome::Value(_) => None,
        }
    }
}

/// Hook handlers for one test session.
pub struct TraceRobotPlugin<R: Recorder> {
    config: PluginConfig,
    recorder: R,
    suites: SuitePathTracker,
    envelopes: EnvelopeTracker,
    started: bool,
}

impl<R: Recorder> TraceRobotPlugin<R> {
    pub fn new(config: PluginConfig, recorder: R) -> Self {
        let suites = SuitePathTracker::new(config.suite_separator.clone());
        Self {
            config,
            recorder,
            suites,
            envelopes: EnvelopeTracker::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn into_recorder(self) -> R {
        self.recorder
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Open suites, outermost first.
    pub fn current_suites(&self) -> Vec<&str> {
        self.suites.current_path()
    }

    pub fn envelope(&self, nodeid: &str) -> Option<&TestEnvelope> {
        self.envelopes.get(nodeid)
    }

    /// Tests recorded so far and how many of them failed.
    pub fn stats(&self) -> (usize, usize) {
        self.envelopes.stats()
    }

    fn render(&self, failure: Option<&Failure>) -> Option<String> {
        failure.map(|f| f.render(self.config.failure_style))
    }

    pub fn session_start(&mut self) -> Result<()> {
        ensure!(!self.started, "Session started twice");
        info!(
            "Session started, Robot output: {}",
            self.config.robot_output.display()
        );
        self.recorder.configure(&self.config.robot_output)?;
        self.started = true;
        Ok(())
    }

    /// A test is about to run at `path` (directories, then file).
    pub fn runtest_logstart(&mut self, nodeid: &str, path: &[String]) -> Result<()> {
        debug!("runtest_logstart {nodeid} {path:?}");
        ensure!(self.started, "Test {nodeid} announced before session start");
        self.suites.notify_test_location(&mut self.recorder, path)
    }

    /// A fixture requested by `item` is about to be set up.
    ///
    /// The returned span must be passed to [`Self::fixture_setup_end`] once
    /// the fixture has run.
    pub fn fixture_setup_begin(&mut self, fixture: &FixtureDef, item: &TestItem) -> Result<FixtureSpan> {
        debug!("fixture_setup {} ({}) for {}", fixture.name, fixture.scope, item.nodeid);
        ensure!(self.started, "Fixture {} set up before session start", fixture.name);
        match fixture.scope {
            Scope::Function => {
                self.envelopes
                    .fixture_setup_begin(&mut self.recorder, item, &fixture.name)?;
                Ok(FixtureSpan::passthrough(&fixture.name))
            }
            _ => FixtureSpan::begin(&mut self.recorder, fixture),
        }
    }

    pub fn fixture_setup_end(&mut self, span: FixtureSpan, outcome: &FixtureOutcome) -> Result<()> {
        let value = match outcome {
            FixtureOutcome::Value(value) => value.as_deref(),
            FixtureOutcome::Failed(_) => None,
        };
        let error = self.render(outcome.failure());
        span.finish(&mut self.recorder, value, error)
    }

    /// Runs a fixture setup supplied by the runner inside its span.
    pub fn run_fixture_setup<F>(&mut self, fixture: &FixtureDef, item: &TestItem, run: F) -> Result<FixtureOutcome>
    where
        F: FnOnce() -> FixtureOutcome,
    {
        let span = self.fixture_setup_begin(fixture, item)?;
        let outcome = run();
        self.fixture_setup_end(span, &outcome)?;
        Ok(outcome)
    }

    /// A phase of `item` has completed, with its failure if any.
    pub fn phase_report(&mut self, item: &TestItem, phase: Phase, failure: Option<&Failure>) -> Result<()> {
        debug!("runtest_makereport {} {phase:?} failed: {}", item.nodeid, failure.is_some());
        ensure!(self.started, "Phase reported for {} before session start", item.nodeid);
        let error = self.render(failure);
        match phase {
            Phase::Setup => self.envelopes.setup_done(&mut self.recorder, item, error),
            Phase::Call => self.envelopes.call_done(&mut self.recorder, &item.nodeid, error),
            Phase::Teardown => self
                .envelopes
                .teardown_done(&mut self.recorder, &item.nodeid, error),
        }
    }

    /// Closes everything still open and lets the recorder write its output.
    pub fn session_finish(&mut self, status: i32) -> Result<()> {
        ensure!(self.started, "Session finished before it started");
        self.envelopes
            .abort_all(&mut self.recorder, INCOMPLETE_TEST_MESSAGE)?;
        self.suites.flush_all(&mut self.recorder)?;
        self.recorder.close()?;
        self.started = false;

        let (recorded, failed) = self.envelopes.stats();
        info!("Session finished with status {status}: {recorded} tests recorded, {failed} failed");
        Ok(())
    }
}
