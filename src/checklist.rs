// src/checklist.rs
//! Structured result parser: rubric reply text -> typed checklist.
//!
//! Recognized line: `- [x] **Title**: description` (or `- [ ] ...`). A
//! following line that starts with `|` and holds a `[...]` span supplies the
//! evidence. Text with no matching lines is free-form prose, never an error.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequirement {
    pub title: String,
    pub description: String,
    pub passed: bool,
    pub evidence: Option<String>,
}

fn item_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^- \[([x ])\] \*\*(.*?)\*\*: (.*)$").unwrap())
}

fn evidence_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\|\s*\[(.*?)\]").unwrap())
}

/// Parse every checklist line, in input order. Duplicates are kept.
pub fn parse(text: &str) -> Vec<ValidationRequirement> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = item_re().captures(line) else {
            continue;
        };
        let evidence = lines
            .get(i + 1)
            .filter(|next| next.trim().starts_with('|'))
            .and_then(|next| evidence_re().captures(next))
            .map(|c| c[1].to_string());

        out.push(ValidationRequirement {
            title: caps[2].to_string(),
            description: caps[3].to_string(),
            passed: &caps[1] == "x",
            evidence,
        });
    }
    out
}

/// Parsed reply, or the raw text when nothing matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationReport {
    Checklist { requirements: Vec<ValidationRequirement> },
    FreeForm { text: String },
}

impl ValidationReport {
    pub fn from_text(text: &str) -> Self {
        let requirements = parse(text);
        if requirements.is_empty() {
            ValidationReport::FreeForm {
                text: text.to_string(),
            }
        } else {
            ValidationReport::Checklist { requirements }
        }
    }

    pub fn passed_count(&self) -> usize {
        match self {
            ValidationReport::Checklist { requirements } => {
                requirements.iter().filter(|r| r.passed).count()
            }
            ValidationReport::FreeForm { .. } => 0,
        }
    }

    pub fn total(&self) -> usize {
        match self {
            ValidationReport::Checklist { requirements } => requirements.len(),
            ValidationReport::FreeForm { .. } => 0,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.total() > 0 && self.passed_count() == self.total()
    }

    /// Plain-text rendering for terminals and logs.
    pub fn render(&self) -> String {
        match self {
            ValidationReport::FreeForm { text } => text.clone(),
            ValidationReport::Checklist { requirements } => {
                let mut out = format!(
                    "{} of {} requirements met{}\n",
                    self.passed_count(),
                    self.total(),
                    if self.all_passed() { " (all passed)" } else { "" }
                );
                for (i, r) in requirements.iter().enumerate() {
                    let mark = if r.passed { "PASS" } else { "FAIL" };
                    out.push_str(&format!("{:>2}. [{mark}] {}: {}\n", i + 1, r.title, r.description));
                    if let Some(ev) = &r.evidence {
                        out.push_str(&format!("       evidence: \"{ev}\"\n"));
                    }
                }
                out
            }
        }
    }
}
