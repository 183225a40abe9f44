// Trigger Filtering
// Decides whether an incoming event schedules a workflow run

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

/// Trigger configuration for when the workflow should run.
///
/// Supports multiple trigger formats:
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [master] }, pull_request: }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Single(String),
    Multiple(Vec<String>),
    Detailed(BTreeMap<String, Option<EventConfig>>),
}

/// Filters for a specific trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventConfig {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, rename = "tags-ignore")]
    pub tags_ignore: Vec<String>,

    /// Path filters (parsed; the changed file set is not known locally)
    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default, rename = "paths-ignore")]
    pub paths_ignore: Vec<String>,

    /// Activity types (parsed but not filtered on)
    #[serde(default)]
    pub types: Vec<String>,
}

/// A git reference pushed to the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum GitRef {
    Branch(String),
    Tag(String),
}

impl GitRef {
    /// Fully qualified ref: `refs/heads/master`, `refs/tags/v1.0`
    pub fn qualified(&self) -> String {
        match self {
            GitRef::Branch(name) => format!("refs/heads/{}", name),
            GitRef::Tag(name) => format!("refs/tags/{}", name),
        }
    }

    /// Short name without the `refs/...` prefix
    pub fn short_name(&self) -> &str {
        match self {
            GitRef::Branch(name) | GitRef::Tag(name) => name,
        }
    }
}

/// The event that may start a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// A push of a branch or tag
    Push { git_ref: GitRef },

    /// A pull request targeting `base`
    PullRequest { base: String, head: Option<String> },

    /// Any other event name (workflow_dispatch, schedule, ...)
    Other { name: String },
}

impl TriggerEvent {
    pub fn push_branch(branch: impl Into<String>) -> Self {
        Self::Push {
            git_ref: GitRef::Branch(branch.into()),
        }
    }

    pub fn push_tag(tag: impl Into<String>) -> Self {
        Self::Push {
            git_ref: GitRef::Tag(tag.into()),
        }
    }

    pub fn pull_request(base: impl Into<String>, head: Option<String>) -> Self {
        Self::PullRequest {
            base: base.into(),
            head,
        }
    }

    /// Event name as used in the workflow `on:` section
    pub fn event_name(&self) -> &str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::PullRequest { .. } => "pull_request",
            TriggerEvent::Other { name } => name,
        }
    }

    /// Value of `github.ref` for this event
    pub fn qualified_ref(&self) -> Option<String> {
        match self {
            TriggerEvent::Push { git_ref } => Some(git_ref.qualified()),
            TriggerEvent::PullRequest { head, base } => Some(format!(
                "refs/heads/{}",
                head.as_deref().unwrap_or(base)
            )),
            TriggerEvent::Other { .. } => None,
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerEvent::Push { git_ref } => write!(f, "push to {}", git_ref.qualified()),
            TriggerEvent::PullRequest { base, head } => match head {
                Some(head) => write!(f, "pull request {} -> {}", head, base),
                None => write!(f, "pull request into {}", base),
            },
            TriggerEvent::Other { name } => write!(f, "{}", name),
        }
    }
}

impl Trigger {
    /// Whether `event` schedules a run of this workflow
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        let name = event.event_name();
        match self {
            Trigger::Single(s) => s == name,
            Trigger::Multiple(events) => events.iter().any(|s| s == name),
            Trigger::Detailed(events) => match events.get(name) {
                None => false,
                Some(None) => true,
                Some(Some(config)) => config.accepts(event),
            },
        }
    }

    /// Names of the events this workflow listens to
    pub fn event_names(&self) -> Vec<String> {
        match self {
            Trigger::Single(s) => vec![s.clone()],
            Trigger::Multiple(events) => events.clone(),
            Trigger::Detailed(events) => events.keys().cloned().collect(),
        }
    }
}

impl EventConfig {
    /// Apply branch and tag filters to an event
    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Push {
                git_ref: GitRef::Branch(branch),
            } => {
                if self.has_branch_filter() {
                    self.branch_allowed(branch)
                } else {
                    // A tags-only filter ignores branch pushes
                    !self.has_tag_filter()
                }
            }
            TriggerEvent::Push {
                git_ref: GitRef::Tag(tag),
            } => {
                if self.has_tag_filter() {
                    if !self.tags.is_empty() {
                        matches_filters(&self.tags, tag)
                    } else {
                        !matches_filters(&self.tags_ignore, tag)
                    }
                } else {
                    !self.has_branch_filter()
                }
            }
            TriggerEvent::PullRequest { base, .. } => {
                !self.has_branch_filter() || self.branch_allowed(base)
            }
            TriggerEvent::Other { .. } => true,
        }
    }

    fn has_branch_filter(&self) -> bool {
        !self.branches.is_empty() || !self.branches_ignore.is_empty()
    }

    fn has_tag_filter(&self) -> bool {
        !self.tags.is_empty() || !self.tags_ignore.is_empty()
    }

    fn branch_allowed(&self, branch: &str) -> bool {
        if !self.branches.is_empty() {
            matches_filters(&self.branches, branch)
        } else {
            !matches_filters(&self.branches_ignore, branch)
        }
    }
}

/// Evaluate an ordered filter list; `!pattern` negates and the last
/// matching pattern decides.
pub fn matches_filters(patterns: &[String], name: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if glob_match(negated, name) {
                matched = false;
            }
        } else if glob_match(pattern, name) {
            matched = true;
        }
    }
    matched
}

/// `*` stops at `/`, `**` crosses it; invalid patterns compare literally
fn glob_match(pattern: &str, name: &str) -> bool {
    match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher().is_match(name),
        Err(_) => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded_trigger() -> Trigger {
        serde_yaml::from_str(
            r#"
push:
  branches: [ master ]
pull_request:
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_push_to_master_schedules() {
        assert!(embedded_trigger().matches(&TriggerEvent::push_branch("master")));
    }

    #[test]
    fn test_push_to_other_branch_does_not_schedule() {
        let trigger = embedded_trigger();
        assert!(!trigger.matches(&TriggerEvent::push_branch("develop")));
        assert!(!trigger.matches(&TriggerEvent::push_branch("master-old")));
    }

    #[test]
    fn test_any_pull_request_schedules() {
        let trigger = embedded_trigger();
        assert!(trigger.matches(&TriggerEvent::pull_request("master", None)));
        assert!(trigger.matches(&TriggerEvent::pull_request(
            "release/1.x",
            Some("feature/dma".to_string())
        )));
    }

    #[test]
    fn test_branch_filter_rejects_tag_push() {
        assert!(!embedded_trigger().matches(&TriggerEvent::push_tag("v0.1.0")));
    }

    #[test]
    fn test_unlisted_event_does_not_schedule() {
        let trigger = embedded_trigger();
        assert!(!trigger.matches(&TriggerEvent::Other {
            name: "workflow_dispatch".to_string()
        }));
    }

    #[test]
    fn test_simple_and_list_triggers() {
        let single = Trigger::Single("push".to_string());
        assert!(single.matches(&TriggerEvent::push_branch("anything")));
        assert!(!single.matches(&TriggerEvent::pull_request("master", None)));

        let list = Trigger::Multiple(vec!["push".to_string(), "pull_request".to_string()]);
        assert!(list.matches(&TriggerEvent::pull_request("master", None)));
    }

    #[test]
    fn test_glob_filters_and_negation() {
        let patterns = vec![
            "release/**".to_string(),
            "!release/*-alpha".to_string(),
        ];
        assert!(matches_filters(&patterns, "release/1.0"));
        assert!(matches_filters(&patterns, "release/v1/rc"));
        assert!(!matches_filters(&patterns, "release/2.0-alpha"));
        assert!(!matches_filters(&patterns, "main"));

        let single_star = vec!["feature/*".to_string()];
        assert!(matches_filters(&single_star, "feature/usart"));
        assert!(!matches_filters(&single_star, "feature/dma/ch1"));
    }

    #[test]
    fn test_branches_ignore() {
        let config = EventConfig {
            branches_ignore: vec!["gh-pages".to_string()],
            ..Default::default()
        };
        assert!(config.accepts(&TriggerEvent::push_branch("master")));
        assert!(!config.accepts(&TriggerEvent::push_branch("gh-pages")));
    }

    #[test]
    fn test_tags_only_filter() {
        let config = EventConfig {
            tags: vec!["v*".to_string()],
            ..Default::default()
        };
        assert!(config.accepts(&TriggerEvent::push_tag("v1.2.0")));
        assert!(!config.accepts(&TriggerEvent::push_tag("nightly")));
        assert!(!config.accepts(&TriggerEvent::push_branch("master")));
    }

    #[test]
    fn test_pull_request_branch_filter_uses_base() {
        let config = EventConfig {
            branches: vec!["master".to_string()],
            ..Default::default()
        };
        assert!(config.accepts(&TriggerEvent::pull_request("master", Some("fix".to_string()))));
        assert!(!config.accepts(&TriggerEvent::pull_request("develop", None)));
    }

    #[test]
    fn test_qualified_ref() {
        assert_eq!(
            TriggerEvent::push_branch("master").qualified_ref().as_deref(),
            Some("refs/heads/master")
        );
        assert_eq!(
            TriggerEvent::push_tag("v1").qualified_ref().as_deref(),
            Some("refs/tags/v1")
        );
    }
}
