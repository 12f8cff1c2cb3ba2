//! The Brain's own action log, surfaced back to the LLM so it does not
//! repeat itself across cycles.

/// Records older than this are pruned after every cycle.
const RETENTION_SECS: f64 = 2.0 * 3600.0;
/// How far back the prompt block reaches.
const PROMPT_WINDOW_SECS: f64 = 30.0 * 60.0;
/// At most this many actions are shown to the LLM.
const PROMPT_MAX_ACTIONS: usize = 8;

#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub time: f64,
    pub tool: String,
    pub summary: String,
    pub success: bool,
}

#[derive(Debug, Default)]
pub struct ActionHistory {
    records: Vec<ActionRecord>,
}

impl ActionHistory {
    pub fn record(&mut self, time: f64, tool: &str, summary: String, success: bool) {
        self.records.push(ActionRecord {
            time,
            tool: tool.to_string(),
            summary,
            success,
        });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records older than two hours.
    pub fn prune(&mut self, now: f64) {
        self.records.retain(|r| now - r.time < RETENTION_SECS);
    }

    /// Actions inside the prompt window, oldest first.
    pub fn recent(&self, now: f64) -> Vec<&ActionRecord> {
        self.records
            .iter()
            .filter(|r| now - r.time < PROMPT_WINDOW_SECS)
            .collect()
    }

    /// Render the anti-repetition block for the user message, or `None`
    /// when there is nothing recent to warn about.
    pub fn prompt_block(&self, now: f64) -> Option<String> {
        let recent = self.recent(now);
        if recent.is_empty() {
            return None;
        }

        let mut block = String::from("## Recent Brain actions (do not repeat)\n");
        let start = recent.len().saturating_sub(PROMPT_MAX_ACTIONS);
        for record in &recent[start..] {
            let minutes_ago = ((now - record.time) / 60.0) as i64;
            let status = if record.success { "ok" } else { "FAILED" };
            block.push_str(&format!(
                "- {minutes_ago} min ago: {}({}) [{status}]\n",
                record.tool, record.summary
            ));
        }
        if recent.iter().any(|r| !r.success) {
            block.push_str("Do not retry actions that already failed with the same arguments.\n");
        }
        block.push_str(
            "Do not repeat any of the actions above within 30 minutes. In particular, \
             never send the same speak message twice within 30 minutes.\n",
        );
        Some(block)
    }
}
