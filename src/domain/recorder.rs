use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordedAction {
    Click {
        selector: String,
        #[serde(default)]
        text: Option<String>,
    },
    Navigate {
        url: String,
    },
    Input {
        selector: String,
        value: String,
    },
    Screenshot {
        name: String,
    },
}

/// Accumulates interactions and turns them into a Playwright test.
#[derive(Debug, Default)]
pub struct TestRecorder {
    recording: bool,
    lines: Vec<String>,
}

impl TestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, started_at: DateTime<Utc>) {
        self.recording = true;
        self.lines.clear();
        self.push(format!(
            "// Test recorded on {}",
            started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }

    pub fn stop(&mut self) -> String {
        self.recording = false;
        self.generate_test()
    }

    pub fn record(&mut self, action: &RecordedAction) {
        match action {
            RecordedAction::Click { selector, text } => self.record_click(selector, text.as_deref()),
            RecordedAction::Navigate { url } => self.record_navigation(url),
            RecordedAction::Input { selector, value } => self.record_input(selector, value),
            RecordedAction::Screenshot { name } => self.record_screenshot(name),
        }
    }

    pub fn record_click(&mut self, selector: &str, text: Option<&str>) {
        let mut line = format!("await page.click('{}');", quote(selector));
        if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
            line.push_str(&format!(" // Clicked \"{}\"", text.trim()));
        }
        self.push(line);
    }

    pub fn record_navigation(&mut self, url: &str) {
        self.push(format!("await page.goto('{}');", quote(url)));
    }

    pub fn record_input(&mut self, selector: &str, value: &str) {
        self.push(format!(
            "await page.fill('{}', '{}');",
            quote(selector),
            quote(value)
        ));
    }

    pub fn record_screenshot(&mut self, name: &str) {
        self.push(format!(
            "await page.screenshot({{ path: '{}.png' }});",
            quote(name)
        ));
    }

    pub fn generate_test(&self) -> String {
        let body = self.lines.join("\n    ");
        format!(
            "import {{ test, expect }} from '@playwright/test';\n\ntest('Recorded Test', async ({{ page }}) => {{\n    {body}\n}});"
        )
    }

    fn push(&mut self, line: String) {
        if self.recording {
            self.lines.push(line);
        }
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
