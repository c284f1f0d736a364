//! Directory and file suites.
//!
//! The runner has no "enter directory" or "leave directory" hook, only the
//! location of each test about to run. The open suites are kept as a stack
//! of path segments and reconciled against every new location.

use anyhow::{Result, bail, ensure};
use log::debug;

use crate::recorder::{Recorder, SuiteHandle};
use crate::utils;

/// One open suite, i.e. one path segment.
#[derive(Debug, Clone)]
pub struct SuiteFrame {
    pub name: String,
    /// Segments from the root up to and including this one, joined.
    pub identity: String,
    pub handle: SuiteHandle,
}

/// Stack of open suites, outermost first.
#[derive(Debug)]
pub struct SuitePathTracker {
    stack: Vec<SuiteFrame>,
    separator: String,
}

impl SuitePathTracker {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            stack: Vec::new(),
            separator: separator.into(),
        }
    }

    /// Names of the open suites, outermost first.
    pub fn current_path(&self) -> Vec<&str> {
        self.stack.iter().map(|frame| frame.name.as_str()).collect()
    }

    pub fn frames(&self) -> &[SuiteFrame] {
        &self.stack
    }

    /// Moves the open suites to `path`, the location of the next test.
    ///
    /// Suites past the common prefix of the open stack and `path` are ended
    /// deepest first, then the missing segments are begun shallowest first.
    /// A segment containing the separator is rejected, its identity would
    /// collide with a deeper path.
    pub fn notify_test_location<R>(&mut self, recorder: &mut R, path: &[String]) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let separator = self.separator.as_str();
        if let Some(segment) = path
            .iter()
            .find(|s| !separator.is_empty() && s.contains(separator))
        {
            bail!(
                "Location segment {segment:?} contains the suite separator {:?}",
                self.separator
            );
        }

        let common = utils::common_prefix_len(
            self.stack.iter().map(|frame| frame.name.as_str()),
            path.iter().map(String::as_str),
        );

        while self.stack.len() > common {
            self.leave_suite(recorder)?;
        }

        for segment in &path[common..] {
            self.enter_suite(recorder, segment)?;
        }

        ensure!(
            self.current_path() == path,
            "Suite stack {:?} does not match test location {:?}",
            self.current_path(),
            path
        );
        Ok(())
    }

    /// Ends every open suite, deepest first.
    pub fn flush_all<R>(&mut self, recorder: &mut R) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        while !self.stack.is_empty() {
            self.leave_suite(recorder)?;
        }
        Ok(())
    }

    fn enter_suite<R>(&mut self, recorder: &mut R, name: &str) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let identity = match self.stack.last() {
            Some(parent) => format!("{}{}{}", parent.identity, self.separator, name),
            None => name.to_string(),
        };
        debug!("Entering suite {identity}");
        let handle = recorder.begin_suite(&identity, name)?;
        self.stack.push(SuiteFrame {
            name: name.to_string(),
            identity,
            handle,
        });
        Ok(())
    }

    fn leave_suite<R>(&mut self, recorder: &mut R) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        if let Some(frame) = self.stack.pop() {
            debug!("Leaving suite {}", frame.identity);
            recorder.end_suite(frame.handle)?;
        }
        Ok(())
    }
}
