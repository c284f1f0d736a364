//! Report recorder interface.
//!
//! The trackers never look inside a recorder: they open spans, keep the
//! handle that comes back and pass it in again to close the span.

use std::fmt;
use std::path::Path;

use anyhow::Result;

mod trace;

#[cfg(test)]
pub(crate) mod call_log;

pub use trace::TraceRecorder;

/// Handle of an open suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuiteHandle(u64);

/// Handle of an open test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TestHandle(u64);

/// Handle of an open keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeywordHandle(u64);

macro_rules! raw_handle {
    ($($handle:ident),*) => {
        $(
            impl $handle {
                /// Wraps a recorder specific identifier.
                pub fn new(raw: u64) -> Self {
                    Self(raw)
                }

                /// The identifier this handle was created from.
                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

raw_handle!(SuiteHandle, TestHandle, KeywordHandle);

/// Category label attached to a keyword when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordKind {
    /// A function scoped fixture running before the test body
    Setup,
    /// The test function itself
    Body,
    /// Fixture finalizers running after the test body
    Teardown,
    /// Any other span, e.g. a module scoped fixture
    Keyword,
}

impl KeywordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeywordKind::Setup => "setup",
            KeywordKind::Body => "body",
            KeywordKind::Teardown => "teardown",
            KeywordKind::Keyword => "kw",
        }
    }
}

impl fmt::Display for KeywordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for the suite/test/keyword hierarchy.
///
/// Calls arrive strictly nested: every `end_*` closes the span most
/// recently opened and not yet closed. An `error` of `None` means the span
/// passed.
#[cfg_attr(test, mockall::automock)]
pub trait Recorder {
    /// Prepares the recorder for a new run writing to `output`.
    fn configure(&mut self, output: &Path) -> Result<()>;

    /// Opens a suite. `identity` is unique for the run, `name` is for display.
    fn begin_suite(&mut self, identity: &str, name: &str) -> Result<SuiteHandle>;

    fn end_suite(&mut self, suite: SuiteHandle) -> Result<()>;

    fn begin_test(&mut self, name: &str, tags: &[String]) -> Result<TestHandle>;

    fn end_test(&mut self, test: TestHandle, error: Option<String>) -> Result<()>;

    fn begin_keyword(&mut self, name: &str, kind: KeywordKind) -> Result<KeywordHandle>;

    fn end_keyword(&mut self, keyword: KeywordHandle, error: Option<String>) -> Result<()>;

    /// Attaches an informational message, e.g. a fixture's value, to an
    /// open keyword.
    fn log_message(&mut self, keyword: KeywordHandle, message: &str) -> Result<()>;

    /// Flushes the recorded run and releases it.
    fn close(&mut self) -> Result<()>;
}
