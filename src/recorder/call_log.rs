//! Recorder fake that keeps every call as a line of text.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

use super::{KeywordHandle, KeywordKind, Recorder, SuiteHandle, TestHandle};

#[derive(Debug, Default)]
pub(crate) struct CallLog {
    pub calls: Vec<String>,
    names: HashMap<u64, String>,
    next: u64,
}

impl CallLog {
    fn next_id(&mut self, name: &str) -> u64 {
        self.next += 1;
        self.names.insert(self.next, name.to_string());
        self.next
    }

    fn name(&self, raw: u64) -> &str {
        self.names.get(&raw).map_or("?", String::as_str)
    }

    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.calls)
    }
}

fn message(error: &Option<String>) -> &str {
    error.as_deref().unwrap_or("-")
}

impl Recorder for CallLog {
    fn configure(&mut self, output: &Path) -> Result<()> {
        self.calls.push(format!("configure {}", output.display()));
        Ok(())
    }

    fn begin_suite(&mut self, identity: &str, name: &str) -> Result<SuiteHandle> {
        self.calls.push(format!("begin_suite {identity} {name}"));
        Ok(SuiteHandle::new(self.next_id(name)))
    }

    fn end_suite(&mut self, suite: SuiteHandle) -> Result<()> {
        let line = format!("end_suite {}", self.name(suite.raw()));
        self.calls.push(line);
        Ok(())
    }

    fn begin_test(&mut self, name: &str, tags: &[String]) -> Result<TestHandle> {
        self.calls.push(format!("begin_test {name} [{}]", tags.join(",")));
        Ok(TestHandle::new(self.next_id(name)))
    }

    fn end_test(&mut self, test: TestHandle, error: Option<String>) -> Result<()> {
        let line = format!("end_test {} {}", self.name(test.raw()), message(&error));
        self.calls.push(line);
        Ok(())
    }

    fn begin_keyword(&mut self, name: &str, kind: KeywordKind) -> Result<KeywordHandle> {
        self.calls.push(format!("begin_keyword {name} {kind}"));
        Ok(KeywordHandle::new(self.next_id(name)))
    }

    fn end_keyword(&mut self, keyword: KeywordHandle, error: Option<String>) -> Result<()> {
        let line = format!("end_keyword {} {}", self.name(keyword.raw()), message(&error));
        self.calls.push(line);
        Ok(())
    }

    fn log_message(&mut self, keyword: KeywordHandle, message: &str) -> Result<()> {
        let line = format!("log_message {} {message}", self.name(keyword.raw()));
        self.calls.push(line);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.calls.push("close".to_string());
        Ok(())
    }
}
