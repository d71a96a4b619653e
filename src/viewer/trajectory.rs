//! Claude stream-JSON transcript parsing.
//!
//! The agent's transcript (`agent/claude-code.txt`) is one JSON object per
//! line. Assistant messages carry content blocks (thinking, text, tool_use);
//! user messages carry tool results. A single API response may be split
//! across several lines that all repeat its usage, so tokens are counted once
//! per message id.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::secrets::SecretMasker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read: u64,
    pub cache_creation: u64,
}

impl TokenUsage {
    fn from_usage(usage: &Value) -> Self {
        let n = |k: &str| usage.get(k).and_then(Value::as_u64).unwrap_or(0);
        Self {
            input_tokens: n("input_tokens"),
            output_tokens: n("output_tokens"),
            cache_read: n("cache_read_input_tokens"),
            cache_creation: n("cache_creation_input_tokens"),
        }
    }

    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_read + self.cache_creation
    }

    fn add(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read += other.cache_read;
        self.cache_creation += other.cache_creation;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    System,
    Agent,
    User,
    ToolResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub step: usize,
    pub source: Source,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub line_num: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    pub events: Vec<Event>,
    pub total_lines: usize,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Breakdown {
    pub name: String,
    pub count: usize,
    pub pct: f64,
}

impl Transcript {
    pub fn token_totals(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for tokens in self.events.iter().filter_map(|e| e.tokens.as_ref()) {
            total.add(tokens);
        }
        total
    }

    /// Tool call counts, most used first.
    pub fn tool_breakdown(&self) -> Vec<Breakdown> {
        breakdown(self.events.iter().filter_map(|e| e.tool_name.as_deref()))
    }

    /// Agent event categories, most frequent first.
    pub fn event_type_breakdown(&self) -> Vec<Breakdown> {
        breakdown(
            self.events
                .iter()
                .filter(|e| e.source == Source::Agent)
                .map(|e| e.event_type.as_str()),
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn breakdown<'a>(names: impl Iterator<Item = &'a str>) -> Vec<Breakdown> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for name in names {
        *counts.entry(name).or_default() += 1;
    }
    let total = counts.values().sum::<usize>().max(1);
    let mut out: Vec<Breakdown> = counts
        .into_iter()
        .map(|(name, count)| Breakdown {
            name: name.to_string(),
            count,
            pct: (count as f64 / total as f64 * 1000.0).round() / 10.0,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn base_name(path: &str) -> &str {
    if path.is_empty() {
        return "?";
    }
    path.rsplit('/').next().unwrap_or(path)
}

fn experiment_cmd() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"python3?\s+[\w/]*experiment").unwrap())
}

/// Research-phase category of a tool call.
pub fn categorize_tool(name: &str, input: &Value) -> &'static str {
    match name {
        "Skill" => {
            if str_field(input, "skill").contains("search-papers") {
                "literature_review"
            } else {
                "other"
            }
        }
        "Bash" => {
            let cmd = str_field(input, "command");
            if cmd.contains("submit_for_review") || cmd.contains("extract_and_generate_questions") {
                "submission"
            } else if cmd.contains("git clone") {
                "git_clone"
            } else if experiment_cmd().is_match(cmd) {
                "experiment"
            } else if cmd.contains("pip install") {
                "pip_install"
            } else if cmd.contains("compile_latex") {
                "paper_write"
            } else if cmd.contains("matplotlib") || cmd.contains("create_figures") {
                "plotting"
            } else if ["semantic_scholar", "openalex", "S2_API_KEY"].iter().any(|k| cmd.contains(k)) {
                "literature_review"
            } else {
                "bash"
            }
        }
        "Read" | "Glob" | "Grep" => "file_read",
        "Write" | "Edit" => {
            let path = str_field(input, "file_path");
            if path.contains(".tex") || path.contains(".bib") || path.contains("/latex/") {
                "paper_write"
            } else if path.contains("/figures/") {
                "plotting"
            } else {
                "file_write"
            }
        }
        "Task" => "subagent",
        "WebFetch" | "WebSearch" => "web",
        "TodoWrite" | "TaskOutput" | "TaskStop" => "task_mgmt",
        _ => "other",
    }
}

fn summarize_tool(name: &str, input: &Value) -> String {
    match name {
        "Bash" => {
            let desc = str_field(input, "description");
            if desc.is_empty() {
                let first = str_field(input, "command").lines().next().unwrap_or("");
                format!("Bash: {}", truncate(first, 120))
            } else {
                format!("Bash: {desc}")
            }
        }
        "Read" | "Write" | "Edit" => format!("{name}: {}", base_name(str_field(input, "file_path"))),
        "Glob" => format!("Glob: {}", str_field(input, "pattern")),
        "Grep" => format!("Grep: {}", truncate(str_field(input, "pattern"), 80)),
        "WebFetch" => format!("WebFetch: {}", truncate(str_field(input, "url"), 80)),
        "WebSearch" => format!("WebSearch: {}", truncate(str_field(input, "query"), 80)),
        "Skill" => format!(
            "Skill: {} {}",
            str_field(input, "skill"),
            truncate(str_field(input, "args"), 60)
        ),
        "Task" => format!("Subagent: {}", str_field(input, "description")),
        "TaskOutput" => format!("TaskOutput: {}", str_field(input, "task_id")),
        other => other.to_string(),
    }
}

fn tool_detail(name: &str, input: &Value) -> Option<String> {
    match name {
        "Bash" => {
            let cmd = str_field(input, "command");
            (cmd.chars().count() > 120).then(|| truncate(cmd, 500))
        }
        "Write" | "Edit" => Some(str_field(input, "file_path").to_string()),
        "Task" => {
            let prompt = str_field(input, "prompt");
            (!prompt.is_empty()).then(|| truncate(prompt, 300))
        }
        _ => None,
    }
}

/// Render tool_result content; inline images are replaced by a marker.
fn result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("type").and_then(Value::as_str) {
                Some("image") => "[image]".to_string(),
                Some("text") => str_field(item, "text").to_string(),
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

struct Parser<'m> {
    masker: &'m SecretMasker,
    out: Transcript,
    step: usize,
    seen_messages: HashSet<String>,
}

impl Parser<'_> {
    fn push(&mut self, mut event: Event) {
        event.step = self.step;
        event.summary = self.masker.mask(&event.summary);
        event.detail = event.detail.map(|d| self.masker.mask(&d));
        self.out.events.push(event);
        self.step += 1;
    }

    fn line(&mut self, line_num: usize, entry: &Value) {
        let event = |source, event_type: &str, summary: String| Event {
            step: 0,
            source,
            event_type: event_type.to_string(),
            tool_name: None,
            summary,
            detail: None,
            tokens: None,
            line_num,
            tool_id: None,
        };

        match str_field(entry, "type") {
            "system" if str_field(entry, "subtype") == "init" => {
                self.out.session_id = entry.get("session_id").and_then(Value::as_str).map(str::to_string);
                self.out.model = entry.get("model").and_then(Value::as_str).map(str::to_string);
                let model = self.out.model.clone().unwrap_or_default();
                self.push(event(Source::System, "system", format!("Session started, model={model}")));
            }
            "assistant" => {
                let message = entry.get("message").unwrap_or(&Value::Null);
                let id = str_field(message, "id");
                // Usage attaches to the first block only.
                let mut tokens = if !id.is_empty() && self.seen_messages.contains(id) {
                    None
                } else {
                    if !id.is_empty() {
                        self.seen_messages.insert(id.to_string());
                    }
                    Some(TokenUsage::from_usage(message.get("usage").unwrap_or(&Value::Null)))
                };
                let blocks = message.get("content").and_then(Value::as_array).cloned().unwrap_or_default();
                for block in &blocks {
                    match str_field(block, "type") {
                        "thinking" => {
                            let text = str_field(block, "thinking");
                            let mut e = event(Source::Agent, "thinking", format!("Thinking: {}...", truncate(text, 100)));
                            e.detail = (text.chars().count() > 100).then(|| truncate(text, 500));
                            e.tokens = tokens.take();
                            self.push(e);
                        }
                        "text" => {
                            let text = str_field(block, "text");
                            let mut e = event(Source::Agent, "text", truncate(text, 150));
                            e.detail = (text.chars().count() > 150).then(|| text.to_string());
                            e.tokens = tokens.take();
                            self.push(e);
                        }
                        "tool_use" => {
                            let name = str_field(block, "name");
                            let input = block.get("input").unwrap_or(&Value::Null);
                            let mut e = event(Source::Agent, categorize_tool(name, input), summarize_tool(name, input));
                            e.tool_name = Some(name.to_string());
                            e.detail = tool_detail(name, input);
                            e.tokens = tokens.take();
                            e.tool_id = Some(str_field(block, "id").to_string());
                            self.push(e);
                        }
                        _ => {}
                    }
                }
            }
            "user" => {
                let message = entry.get("message").unwrap_or(&Value::Null);
                let stdout = entry
                    .get("tool_use_result")
                    .map(|r| str_field(r, "stdout"))
                    .unwrap_or("");
                let blocks = message.get("content").and_then(Value::as_array).cloned().unwrap_or_default();
                for block in &blocks {
                    match str_field(block, "type") {
                        "tool_result" => {
                            let content = result_text(block.get("content").unwrap_or(&Value::Null));
                            let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                            let preview = if content.is_empty() { "(empty)".to_string() } else { truncate(&content, 200) };
                            let summary = if is_error {
                                format!("Error: {preview}")
                            } else if !stdout.is_empty() {
                                format!("Result: {}", truncate(stdout, 200))
                            } else {
                                format!("Result: {preview}")
                            };
                            let mut e = event(Source::ToolResult, "tool_result", summary);
                            e.detail = (content.chars().count() > 200).then(|| truncate(&content, 1000));
                            e.tool_id = Some(str_field(block, "tool_use_id").to_string());
                            self.push(e);
                        }
                        "text" => {
                            let text = str_field(block, "text");
                            if !text.trim().is_empty() {
                                let mut e = event(Source::User, "user_message", truncate(text, 150));
                                e.detail = (text.chars().count() > 150).then(|| text.to_string());
                                self.push(e);
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

/// Parse a transcript starting at `after_line` (0-based), for incremental reads.
pub fn parse_transcript(path: &Path, after_line: usize, masker: &SecretMasker) -> anyhow::Result<Transcript> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut parser = Parser {
        masker,
        out: Transcript::default(),
        step: after_line,
        seen_messages: HashSet::new(),
    };
    let mut total = 0;
    for (line_num, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        total = line_num + 1;
        if line_num < after_line {
            continue;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<Value>(text) {
            parser.line(line_num, &entry);
        }
    }
    parser.out.total_lines = total;
    Ok(parser.out)
}

/// Per-million-token prices (input, output, cache read, cache write).
const PRICING: &[(&str, [f64; 4])] = &[
    ("claude-opus-4-6", [5.0, 25.0, 0.50, 6.25]),
    ("claude-opus-4-5", [5.0, 25.0, 0.50, 6.25]),
    ("claude-sonnet-4-6", [3.0, 15.0, 0.30, 3.75]),
    ("claude-sonnet-4-5", [3.0, 15.0, 0.30, 3.75]),
    ("claude-haiku-4-5", [1.0, 5.0, 0.10, 1.25]),
    ("gemini-3-pro", [2.0, 12.0, 0.20, 2.0]),
    ("gemini-2.5-pro", [1.25, 10.0, 0.125, 1.25]),
];

/// Rough USD cost of a token total; unknown models price as the first entry.
#[allow(clippy::cast_precision_loss)]
pub fn estimate_cost_usd(tokens: &TokenUsage, model: &str) -> f64 {
    let prices = PRICING
        .iter()
        .find(|(name, _)| model.contains(name))
        .map_or(PRICING[0].1, |(_, p)| *p);
    let per_m = |n: u64, price: f64| n as f64 / 1_000_000.0 * price;
    let cost = per_m(tokens.input_tokens, prices[0])
        + per_m(tokens.output_tokens, prices[1])
        + per_m(tokens.cache_read, prices[2])
        + per_m(tokens.cache_creation, prices[3]);
    (cost * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = r#"{"type":"system","subtype":"init","session_id":"abc","model":"claude-opus-4-6"}
{"type":"assistant","message":{"id":"m1","usage":{"input_tokens":10,"output_tokens":5},"content":[{"type":"thinking","thinking":"plan the ablation"}]}}
{"type":"assistant","message":{"id":"m1","usage":{"input_tokens":10,"output_tokens":5},"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"python experiment_codebase/run.py","description":"Run baseline"}}]}}
not json at all
{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"acc=0.91 key sk-ant-REDACTED"}]}}

{"type":"assistant","message":{"id":"m2","usage":{"input_tokens":7,"output_tokens":3,"cache_read_input_tokens":100},"content":[{"type":"text","text":"Baseline done."},{"type":"tool_use","id":"t2","name":"Write","input":{"file_path":"/app/latex/template.tex"}}]}}
{"type":"user","message":{"content":[{"type":"text","text":"keep going"}]}}
"#;

    fn parse(after: usize) -> Transcript {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claude-code.txt");
        std::fs::write(&path, TRANSCRIPT).unwrap();
        parse_transcript(&path, after, &SecretMasker::new()).unwrap()
    }

    #[test]
    fn parses_all_event_kinds() {
        let t = parse(0);
        assert_eq!(t.session_id.as_deref(), Some("abc"));
        assert_eq!(t.model.as_deref(), Some("claude-opus-4-6"));
        assert_eq!(t.total_lines, 8);
        let kinds: Vec<&str> = t.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            ["system", "thinking", "experiment", "tool_result", "text", "paper_write", "user_message"]
        );
        assert_eq!(t.events[2].summary, "Bash: Run baseline");
    }

    #[test]
    fn tokens_counted_once_per_message() {
        let totals = parse(0).token_totals();
        assert_eq!(totals.input_tokens, 17);
        assert_eq!(totals.output_tokens, 8);
        assert_eq!(totals.cache_read, 100);
    }

    #[test]
    fn tool_results_are_masked() {
        let t = parse(0);
        let result = t.events.iter().find(|e| e.source == Source::ToolResult).unwrap();
        assert!(result.summary.contains("[REDACTED]"));
        assert!(!result.summary.contains("sk-ant"));
    }

    #[test]
    fn incremental_parse_skips_earlier_lines() {
        let t = parse(5);
        assert_eq!(t.events.len(), 3);
        assert_eq!(t.events[0].step, 5);
        assert_eq!(t.events[0].line_num, 6);
        assert_eq!(t.total_lines, 8);
    }

    #[test]
    fn breakdowns_sorted_by_count() {
        let t = parse(0);
        let tools = t.tool_breakdown();
        assert_eq!(tools.len(), 2);
        assert!((tools.iter().map(|b| b.pct).sum::<f64>() - 100.0).abs() < 0.01);
        let types = t.event_type_breakdown();
        assert!(types.iter().all(|b| b.count == 1));
    }

    #[test]
    fn categorization_examples() {
        let v = |s: &str| serde_json::json!({"command": s});
        assert_eq!(categorize_tool("Bash", &v("pip install torch")), "pip_install");
        assert_eq!(categorize_tool("Bash", &v("git clone https://x")), "git_clone");
        assert_eq!(categorize_tool("Bash", &v("ls")), "bash");
        assert_eq!(
            categorize_tool("Edit", &serde_json::json!({"file_path": "/app/figures/plot.py"})),
            "plotting"
        );
        assert_eq!(categorize_tool("WebSearch", &Value::Null), "web");
    }

    #[test]
    fn cost_estimate_uses_model_prices() {
        let tokens = TokenUsage { input_tokens: 1_000_000, output_tokens: 1_000_000, ..TokenUsage::default() };
        assert!((estimate_cost_usd(&tokens, "anthropic/claude-sonnet-4-6") - 18.0).abs() < 1e-9);
        assert!((estimate_cost_usd(&tokens, "mystery") - 30.0).abs() < 1e-9);
    }
}
