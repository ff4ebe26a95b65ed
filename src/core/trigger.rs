//! Trigger matching for repository events

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A repository event that may start a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Commits pushed to a branch
    Push { branch: String },
    /// A pull request targeting a branch
    PullRequest { target_branch: String },
}

/// Kind of event, as named in workflow files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>) -> Self {
        TriggerEvent::Push { branch: branch.into() }
    }

    pub fn pull_request(target_branch: impl Into<String>) -> Self {
        TriggerEvent::PullRequest {
            target_branch: target_branch.into(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TriggerEvent::Push { .. } => EventKind::Push,
            TriggerEvent::PullRequest { .. } => EventKind::PullRequest,
        }
    }

    /// The branch that branch filters and the gate look at
    pub fn branch(&self) -> &str {
        match self {
            TriggerEvent::Push { branch } => branch,
            TriggerEvent::PullRequest { target_branch } => target_branch,
        }
    }

    /// Fully qualified git ref of the branch
    pub fn git_ref(&self) -> String {
        format!("refs/heads/{}", self.branch())
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { branch } => write!(f, "push to {}", branch),
            TriggerEvent::PullRequest { target_branch } => {
                write!(f, "pull request into {}", target_branch)
            }
        }
    }
}

/// A compiled branch glob.
///
/// `*` matches within one path segment, `**` matches across segments,
/// `?` matches a single non-slash character.
#[derive(Debug, Clone)]
pub struct BranchPattern {
    source: String,
    regex: Regex,
}

impl BranchPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let mut re = String::from("^");
        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' if chars.get(i + 1) == Some(&'*') => {
                    re.push_str(".*");
                    i += 2;
                }
                '*' => {
                    re.push_str("[^/]*");
                    i += 1;
                }
                '?' => {
                    re.push_str("[^/]");
                    i += 1;
                }
                c => {
                    re.push_str(&regex::escape(&c.to_string()));
                    i += 1;
                }
            }
        }
        re.push('$');

        Ok(Self {
            source: pattern.to_string(),
            regex: Regex::new(&re)?,
        })
    }

    pub fn matches(&self, branch: &str) -> bool {
        self.regex.is_match(branch)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Compile a list of branch globs
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<BranchPattern>, regex::Error> {
    patterns.iter().map(|p| BranchPattern::new(p)).collect()
}

/// Decides whether an event starts a run
#[derive(Debug, Clone, Default)]
pub struct TriggerMatcher {
    /// Branch filter for push events; `None` means push does not trigger
    push: Option<Vec<BranchPattern>>,
    /// Target-branch filter for pull requests; `None` means PRs do not trigger
    pull_request: Option<Vec<BranchPattern>>,
}

impl TriggerMatcher {
    pub fn new(
        push: Option<Vec<BranchPattern>>,
        pull_request: Option<Vec<BranchPattern>>,
    ) -> Self {
        Self { push, pull_request }
    }

    /// Check whether the event triggers a run.
    ///
    /// An empty branch list matches every branch.
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let filter = match event.kind() {
            EventKind::Push => &self.push,
            EventKind::PullRequest => &self.pull_request,
        };

        match filter {
            None => false,
            Some(patterns) if patterns.is_empty() => true,
            Some(patterns) => patterns.iter().any(|p| p.matches(event.branch())),
        }
    }

    /// Event kinds this matcher listens for
    pub fn listens_for(&self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        if self.push.is_some() {
            kinds.push(EventKind::Push);
        }
        if self.pull_request.is_some() {
            kinds.push(EventKind::PullRequest);
        }
        kinds
    }
}
