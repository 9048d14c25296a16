//! Accumulating note buffer attached to the incident at the end of a run.

use std::fmt::Write as _;

/// Note lines collected while an investigation runs.
#[derive(Debug, Clone)]
pub struct Notes {
    investigation: String,
    lines: Vec<String>,
}

impl Notes {
    pub fn new(investigation: impl Into<String>) -> Self {
        Self {
            investigation: investigation.into(),
            lines: Vec::new(),
        }
    }

    pub fn append_success(&mut self, message: impl AsRef<str>) {
        self.push("✅", message.as_ref());
    }

    pub fn append_warning(&mut self, message: impl AsRef<str>) {
        self.push("⚠️", message.as_ref());
    }

    pub fn append_info(&mut self, message: impl AsRef<str>) {
        self.push("ℹ️", message.as_ref());
    }

    /// Record an action the automation took on its own.
    pub fn append_automation(&mut self, message: impl AsRef<str>) {
        self.push("🤖", message.as_ref());
    }

    fn push(&mut self, marker: &str, message: &str) {
        self.lines.push(format!("{marker} {message}"));
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Render the buffer as incident note text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "🤖 Automated {} investigation 🤖", self.investigation);
        out.push_str("===========================\n");
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
