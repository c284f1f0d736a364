//! Keyword spans around fixtures shared by several tests.
//!
//! Class, module, package and session fixtures are recorded as a single
//! keyword wrapping the fixture's own execution. Function scoped fixtures
//! belong to the test envelope and get a pass-through span.

use anyhow::Result;
use log::debug;

use crate::plugin::FixtureDef;
use crate::recorder::{KeywordHandle, KeywordKind, Recorder};

/// Token returned when a fixture setup begins, handed back when it ends.
#[derive(Debug)]
#[must_use = "an unfinished fixture span leaves its keyword open"]
pub struct FixtureSpan {
    fixture: String,
    keyword: Option<KeywordHandle>,
}

impl FixtureSpan {
    /// Span that records nothing of its own.
    pub(crate) fn passthrough(fixture: &str) -> Self {
        Self {
            fixture: fixture.to_string(),
            keyword: None,
        }
    }

    /// Opens the keyword for a fixture broader than a single test.
    pub(crate) fn begin<R>(recorder: &mut R, fixture: &FixtureDef) -> Result<Self>
    where
        R: Recorder + ?Sized,
    {
        debug!("Starting {} fixture {}", fixture.scope, fixture.name);
        let keyword = recorder.begin_keyword(&fixture.name, KeywordKind::Keyword)?;
        Ok(Self {
            fixture: fixture.name.clone(),
            keyword: Some(keyword),
        })
    }

    pub fn fixture(&self) -> &str {
        &self.fixture
    }

    /// Whether this span owns a keyword.
    pub fn is_recorded(&self) -> bool {
        self.keyword.is_some()
    }

    /// Closes the keyword, if any, with the fixture's outcome: the rendered
    /// value is logged on the keyword, the error fails it.
    pub(crate) fn finish<R>(self, recorder: &mut R, value: Option<&str>, error: Option<String>) -> Result<()>
    where
        R: Recorder + ?Sized,
    {
        let Some(keyword) = self.keyword else {
            return Ok(());
        };
        debug!("Finished fixture {}, error: {error:?}", self.fixture);
        if let Some(value) = value {
            recorder.log_message(keyword, value)?;
        }
        recorder.end_keyword(keyword, error)
    }
}
