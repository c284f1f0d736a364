//! Robot Framework output recorder
//!
//! Keeps the recorded run as a tree in memory and serializes it as a Robot
//! Framework `output.xml` when the recorder is closed.

use std::fmt::{self, Write};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use chrono::{DateTime, Local};
use log::{debug, info};

use super::{KeywordHandle, KeywordKind, Recorder, SuiteHandle, TestHandle};

const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S%.3f";

#[derive(Debug)]
enum NodeKind {
    Suite { identity: String, name: String },
    Test { name: String, tags: Vec<String> },
    Keyword { name: String, kind: KeywordKind },
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            NodeKind::Suite { .. } => "suite",
            NodeKind::Test { .. } => "test",
            NodeKind::Keyword { .. } => "keyword",
        }
    }

    fn name(&self) -> &str {
        match self {
            NodeKind::Suite { name, .. }
            | NodeKind::Test { name, .. }
            | NodeKind::Keyword { name, .. } => name,
        }
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    children: Vec<usize>,
    start: DateTime<Local>,
    end: Option<DateTime<Local>>,
    error: Option<String>,
    /// INFO messages, in the order they were logged
    messages: Vec<(DateTime<Local>, String)>,
}

/// Recorder producing a Robot Framework XML report.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    output: Option<PathBuf>,
    nodes: Vec<Node>,
    roots: Vec<usize>,
    open: Vec<usize>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path the report will be written to, once configured.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    /// Number of spans opened and not yet ended.
    pub fn open_spans(&self) -> usize {
        self.open.len()
    }

    fn open_node(&mut self, kind: NodeKind) -> Result<u64> {
        ensure!(
            self.output.is_some(),
            "Recorder is not configured, cannot begin {} '{}'",
            kind.label(),
            kind.name()
        );

        let parent = self.open.last().copied();
        let allowed = match (&kind, parent.map(|p| &self.nodes[p].kind)) {
            (NodeKind::Suite { .. }, None | Some(NodeKind::Suite { .. })) => true,
            (NodeKind::Test { .. }, Some(NodeKind::Suite { .. })) => true,
            (NodeKind::Keyword { .. }, Some(_)) => true,
            _ => false,
        };
        if !allowed {
            let inside = parent
                .map(|p| format!("{} '{}'", self.nodes[p].kind.label(), self.nodes[p].kind.name()))
                .unwrap_or_else(|| "the run root".to_string());
            bail!(
                "Cannot begin {} '{}' inside {inside}",
                kind.label(),
                kind.name()
            );
        }

        let index = self.nodes.len();
        debug!("begin {} '{}' (#{index})", kind.label(), kind.name());
        self.nodes.push(Node {
            kind,
            children: Vec::new(),
            start: Local::now(),
            end: None,
            error: None,
            messages: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(index),
            None => self.roots.push(index),
        }
        self.open.push(index);
        Ok(index as u64)
    }

    fn close_node(&mut self, raw: u64, expected: &'static str, error: Option<String>) -> Result<()> {
        let index = usize::try_from(raw)
            .ok()
            .filter(|i| *i < self.nodes.len())
            .with_context(|| format!("Unknown {expected} handle {raw}"))?;

        let node = &self.nodes[index];
        ensure!(
            node.kind.label() == expected,
            "Handle {raw} refers to {} '{}', not a {expected}",
            node.kind.label(),
            node.kind.name()
        );

        match self.open.last() {
            Some(&top) if top == index => {}
            Some(&top) => bail!(
                "Cannot end {expected} '{}' while {} '{}' is still open",
                node.kind.name(),
                self.nodes[top].kind.label(),
                self.nodes[top].kind.name()
            ),
            None => bail!("Cannot end {expected} '{}': nothing is open", node.kind.name()),
        }

        debug!("end {expected} '{}' (#{index})", node.kind.name());
        let node = &mut self.nodes[index];
        node.end = Some(Local::now());
        node.error = error;
        self.open.pop();
        Ok(())
    }

    fn failed(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        match node.kind {
            NodeKind::Suite { .. } => node.children.iter().any(|&c| self.failed(c)),
            NodeKind::Test { .. } | NodeKind::Keyword { .. } => node.error.is_some(),
        }
    }

    /// Renders the recorded tree as a Robot Framework XML document.
    fn render(&self, generated: DateTime<Local>) -> Result<String, fmt::Error> {
        let mut out = String::new();
        out.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n")?;
        writeln!(
            out,
            "<robot generator=\"tracerobot {}\" generated=\"{}\" rpa=\"false\">",
            env!("CARGO_PKG_VERSION"),
            timestamp(&generated)
        )?;

        match self.roots.as_slice() {
            [] => {}
            [root] => self.write_suite(&mut out, *root, "s1")?,
            roots => {
                // several top level suites share one synthetic parent
                let names: Vec<&str> = roots.iter().map(|&r| self.nodes[r].kind.name()).collect();
                out.write_str("<suite id=\"s1\" name=\"")?;
                write_escaped(&mut out, &names.join(" & "))?;
                out.write_str("\">\n")?;
                for (i, &root) in roots.iter().enumerate() {
                    self.write_suite(&mut out, root, &format!("s1-s{}", i + 1))?;
                }
                let first = &self.nodes[roots[0]];
                let last = &self.nodes[roots[roots.len() - 1]];
                let failed = roots.iter().any(|&r| self.failed(r));
                write_status(&mut out, failed, &first.start, last.end.as_ref(), None, false)?;
                out.write_str("</suite>\n")?;
            }
        }

        out.write_str("<errors>\n</errors>\n")?;
        out.write_str("</robot>\n")?;
        Ok(out)
    }

    fn write_suite(&self, out: &mut String, index: usize, id: &str) -> fmt::Result {
        let node = &self.nodes[index];
        let NodeKind::Suite { identity, name } = &node.kind else {
            return Err(fmt::Error);
        };
        write!(out, "<suite id=\"{id}\" name=\"")?;
        write_escaped(out, name)?;
        out.write_str("\" source=\"")?;
        write_escaped(out, identity)?;
        out.write_str("\">\n")?;

        let (mut suites, mut tests) = (0, 0);
        for &child in &node.children {
            match self.nodes[child].kind {
                NodeKind::Suite { .. } => {
                    suites += 1;
                    self.write_suite(out, child, &format!("{id}-s{suites}"))?;
                }
                NodeKind::Test { .. } => {
                    tests += 1;
                    self.write_test(out, child, &format!("{id}-t{tests}"))?;
                }
                NodeKind::Keyword { .. } => self.write_keyword(out, child)?,
            }
        }

        write_status(out, self.failed(index), &node.start, node.end.as_ref(), None, false)?;
        out.write_str("</suite>\n")
    }

    fn write_test(&self, out: &mut String, index: usize, id: &str) -> fmt::Result {
        let node = &self.nodes[index];
        let NodeKind::Test { name, tags } = &node.kind else {
            return Err(fmt::Error);
        };
        write!(out, "<test id=\"{id}\" name=\"")?;
        write_escaped(out, name)?;
        out.write_str("\">\n")?;

        for &child in &node.children {
            self.write_keyword(out, child)?;
        }

        if !tags.is_empty() {
            out.write_str("<tags>\n")?;
            for tag in tags {
                out.write_str("<tag>")?;
                write_escaped(out, tag)?;
                out.write_str("</tag>\n")?;
            }
            out.write_str("</tags>\n")?;
        }

        write_status(
            out,
            node.error.is_some(),
            &node.start,
            node.end.as_ref(),
            node.error.as_deref(),
            true,
        )?;
        out.write_str("</test>\n")
    }

    fn write_keyword(&self, out: &mut String, index: usize) -> fmt::Result {
        let node = &self.nodes[index];
        let NodeKind::Keyword { name, kind } = &node.kind else {
            return Err(fmt::Error);
        };
        let kw_type = match kind {
            KeywordKind::Setup => "setup",
            KeywordKind::Teardown => "teardown",
            KeywordKind::Body | KeywordKind::Keyword => "kw",
        };
        out.write_str("<kw name=\"")?;
        write_escaped(out, name)?;
        writeln!(out, "\" type=\"{kw_type}\">")?;

        for &child in &node.children {
            self.write_keyword(out, child)?;
        }

        for (at, message) in &node.messages {
            write!(out, "<msg timestamp=\"{}\" level=\"INFO\">", timestamp(at))?;
            write_escaped(out, message)?;
            out.write_str("</msg>\n")?;
        }
        if let Some(error) = &node.error {
            let at = node.end.as_ref().unwrap_or(&node.start);
            write!(out, "<msg timestamp=\"{}\" level=\"FAIL\">", timestamp(at))?;
            write_escaped(out, error)?;
            out.write_str("</msg>\n")?;
        }
        write_status(out, node.error.is_some(), &node.start, node.end.as_ref(), None, false)?;
        out.write_str("</kw>\n")
    }
}

fn timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn write_status(
    out: &mut String,
    failed: bool,
    start: &DateTime<Local>,
    end: Option<&DateTime<Local>>,
    message: Option<&str>,
    critical: bool,
) -> fmt::Result {
    write!(
        out,
        "<status status=\"{}\" starttime=\"{}\" endtime=\"{}\"",
        if failed { "FAIL" } else { "PASS" },
        timestamp(start),
        timestamp(end.unwrap_or(start))
    )?;
    if critical {
        out.write_str(" critical=\"yes\"")?;
    }
    match message {
        Some(message) => {
            out.write_char('>')?;
            write_escaped(out, message)?;
            out.write_str("</status>\n")
        }
        None => out.write_str("/>\n"),
    }
}

fn write_escaped<W: Write>(writer: &mut W, value: &str) -> fmt::Result {
    const INVALID_REPLACEMENT: &str = "&#xFFFD;";
    for ch in value.chars() {
        if !is_valid_xml_character(ch) {
            writer.write_str(INVALID_REPLACEMENT)?;
            continue;
        }
        match ch {
            '&' => writer.write_str("&amp;")?,
            '<' => writer.write_str("&lt;")?,
            '>' => writer.write_str("&gt;")?,
            '"' => writer.write_str("&quot;")?,
            '\'' => writer.write_str("&apos;")?,
            _ => writer.write_char(ch)?,
        }
    }
    Ok(())
}

/// Characters allowed by XML 1.0; anything else (ANSI escapes, NUL) is replaced.
fn is_valid_xml_character(ch: char) -> bool {
    matches!(
        u32::from(ch),
        0x09 | 0x0A | 0x0D | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x1_0000..=0x10_FFFF
    )
}

impl Recorder for TraceRecorder {
    fn configure(&mut self, output: &Path) -> Result<()> {
        debug!("Recorder configured, output: {}", output.display());
        *self = Self {
            output: Some(output.to_path_buf()),
            ..Self::default()
        };
        Ok(())
    }

    fn begin_suite(&mut self, identity: &str, name: &str) -> Result<SuiteHandle> {
        self.open_node(NodeKind::Suite {
            identity: identity.to_string(),
            name: name.to_string(),
        })
        .map(SuiteHandle::new)
    }

    fn end_suite(&mut self, suite: SuiteHandle) -> Result<()> {
        self.close_node(suite.raw(), "suite", None)
    }

    fn begin_test(&mut self, name: &str, tags: &[String]) -> Result<TestHandle> {
        self.open_node(NodeKind::Test {
            name: name.to_string(),
            tags: tags.to_vec(),
        })
        .map(TestHandle::new)
    }

    fn end_test(&mut self, test: TestHandle, error: Option<String>) -> Result<()> {
        self.close_node(test.raw(), "test", error)
    }

    fn begin_keyword(&mut self, name: &str, kind: KeywordKind) -> Result<KeywordHandle> {
        self.open_node(NodeKind::Keyword {
            name: name.to_string(),
            kind,
        })
        .map(KeywordHandle::new)
    }

    fn end_keyword(&mut self, keyword: KeywordHandle, error: Option<String>) -> Result<()> {
        self.close_node(keyword.raw(), "keyword", error)
    }

    fn log_message(&mut self, keyword: KeywordHandle, message: &str) -> Result<()> {
        let raw = keyword.raw();
        let index = usize::try_from(raw)
            .ok()
            .filter(|i| self.open.contains(i))
            .with_context(|| format!("Cannot log to keyword handle {raw}: it is not open"))?;
        let node = &mut self.nodes[index];
        ensure!(
            matches!(node.kind, NodeKind::Keyword { .. }),
            "Handle {raw} refers to {} '{}', not a keyword",
            node.kind.label(),
            node.kind.name()
        );
        node.messages.push((Local::now(), message.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(output) = self.output.clone() else {
            bail!("Recorder closed without being configured");
        };
        if !self.open.is_empty() {
            let still_open: Vec<String> = self
                .open
                .iter()
                .map(|&i| format!("{} '{}'", self.nodes[i].kind.label(), self.nodes[i].kind.name()))
                .collect();
            bail!("Recorder closed with open spans: {}", still_open.join(", "));
        }

        let content = self
            .render(Local::now())
            .map_err(|_| anyhow::anyhow!("Failed to render Robot output"))?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }
        fs::write(&output, content)
            .with_context(|| format!("Failed to write Robot output: {}", output.display()))?;

        info!("Robot output written to {}", output.display());
        *self = Self::default();
        Ok(())
    }
}
