//! Host runner event stream.
//!
//! The runner (or a shim inside it) writes one JSON object per line for each
//! hook it dispatches. [`EventDriver`] parses the lines and replays them on a
//! [`TraceRobotPlugin`].

use std::io::BufRead;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::plugin::{Failure, FixtureDef, FixtureOutcome, FixtureSpan, Phase, TestItem, TraceRobotPlugin};
use crate::recorder::Recorder;
use crate::utils;

/// Message attached to fixture spans still open when the session finishes.
pub const INCOMPLETE_FIXTURE_MESSAGE: &str = "fixture did not complete before session end";

/// Location of a test: a file path or its segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Segments(Vec<String>),
    Path(String),
}

impl Location {
    pub fn segments(&self) -> Vec<String> {
        match self {
            Location::Segments(segments) => segments.clone(),
            Location::Path(path) => utils::split_location(path),
        }
    }
}

/// One hook dispatched by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    SessionStart,
    TestLocation {
        nodeid: String,
        location: Location,
    },
    FixtureSetupBegin {
        fixture: FixtureDef,
        item: TestItem,
    },
    FixtureSetupEnd {
        fixture: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<Failure>,
    },
    PhaseReport {
        item: TestItem,
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure: Option<Failure>,
    },
    SessionFinish {
        #[serde(default)]
        status: i32,
    },
}

/// Counts of a replayed stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: usize,
    pub tests: usize,
    pub failed: usize,
}

/// Replays host events on a plugin, pairing fixture begin/end events.
pub struct EventDriver<R: Recorder> {
    plugin: TraceRobotPlugin<R>,
    /// Fixture setups in progress, innermost last
    fixtures: Vec<FixtureSpan>,
    finished: bool,
    events: usize,
}

impl<R: Recorder> EventDriver<R> {
    pub fn new(plugin: TraceRobotPlugin<R>) -> Self {
        Self {
            plugin,
            fixtures: Vec::new(),
            finished: false,
            events: 0,
        }
    }

    pub fn plugin(&self) -> &TraceRobotPlugin<R> {
        &self.plugin
    }

    pub fn into_plugin(self) -> TraceRobotPlugin<R> {
        self.plugin
    }

    /// Dispatches one event to the matching hook.
    pub fn handle(&mut self, event: HostEvent) -> Result<()> {
        self.events += 1;
        match event {
            HostEvent::SessionStart => {
                self.finished = false;
                self.plugin.session_start()
            }
            HostEvent::TestLocation { nodeid, location } => {
                self.plugin.runtest_logstart(&nodeid, &location.segments())
            }
            HostEvent::FixtureSetupBegin { fixture, item } => {
                let span = self.plugin.fixture_setup_begin(&fixture, &item)?;
                self.fixtures.push(span);
                Ok(())
            }
            HostEvent::FixtureSetupEnd { fixture, value, failure } => {
                let Some(span) = self.fixtures.pop() else {
                    bail!("Fixture {fixture} finished but no fixture setup is in progress");
                };
                if span.fixture() != fixture {
                    let expected = span.fixture().to_string();
                    self.fixtures.push(span);
                    bail!("Fixture {fixture} finished while {expected} is still being set up");
                }
                let outcome = match failure {
                    Some(failure) => FixtureOutcome::Failed(failure),
                    None => FixtureOutcome::Value(value),
                };
                self.plugin.fixture_setup_end(span, &outcome)
            }
            HostEvent::PhaseReport { item, phase, failure } => {
                self.plugin.phase_report(&item, phase, failure.as_ref())
            }
            HostEvent::SessionFinish { status } => self.finish(status),
        }
    }

    fn finish(&mut self, status: i32) -> Result<()> {
        let incomplete = Failure::new(INCOMPLETE_FIXTURE_MESSAGE, "");
        while let Some(span) = self.fixtures.pop() {
            warn!("Fixture {} did not complete, closing it", span.fixture());
            self.plugin
                .fixture_setup_end(span, &FixtureOutcome::Failed(incomplete.clone()))?;
        }
        self.plugin.session_finish(status)?;
        self.finished = true;
        Ok(())
    }

    /// Replays a whole JSON lines stream. Blank lines and `#` comments are
    /// skipped. A stream that stops before `session_finish` is finished here.
    pub fn run<B: BufRead>(&mut self, input: B) -> Result<RunSummary> {
        for (index, line) in input.lines().enumerate() {
            let line_no = index + 1;
            let line = line.with_context(|| format!("Failed to read event line {line_no}"))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let event: HostEvent = serde_json::from_str(line)
                .with_context(|| format!("Invalid event on line {line_no}"))?;
            debug!("line {line_no}: {event:?}");
            self.handle(event)
                .with_context(|| format!("Event on line {line_no} violates the hook order"))?;
        }

        if self.plugin.is_started() && !self.finished {
            warn!("Event stream ended without session_finish, finishing the session");
            self.finish(0)?;
        }

        let (tests, failed) = self.plugin.stats();
        info!("Replayed {} events", self.events);
        Ok(RunSummary {
            events: self.events,
            tests,
            failed,
        })
    }
}
