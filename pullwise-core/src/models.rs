//! Domain types shared by the pipeline stages

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::Stage;
use crate::Error;

/// Embedding vector, fixed dimensionality per model
pub type Embedding = Vec<f32>;

/// A pull request review job as it travels over the queue
///
/// Field aliases accept the capitalized keys emitted by the webhook ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewEvent {
    /// Repository owner/organization
    #[serde(alias = "Owner")]
    pub owner: String,
    /// Repository name
    #[serde(alias = "Repo")]
    pub repo: String,
    /// Pull request number
    #[serde(alias = "Number")]
    pub number: u64,
    /// URL to clone the head repository from
    #[serde(alias = "CloneURL")]
    pub clone_url: String,
    /// Head branch of the pull request
    #[serde(alias = "Branch")]
    pub branch: String,
    /// URL returning the pull request diff
    #[serde(alias = "DiffURL")]
    pub diff_url: String,
    #[serde(default, alias = "Title", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, alias = "Author", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl ReviewEvent {
    /// Create an event for a GitHub pull request, deriving clone and diff URLs
    pub fn github(
        owner: impl Into<String>,
        repo: impl Into<String>,
        number: u64,
        branch: impl Into<String>,
    ) -> Self {
        let owner = owner.into();
        let repo = repo.into();
        Self {
            clone_url: format!("https://github.com/{}/{}.git", owner, repo),
            diff_url: format!("https://github.com/{}/{}/pull/{}.diff", owner, repo, number),
            owner,
            repo,
            number,
            branch: branch.into(),
            title: None,
            author: None,
        }
    }

    /// Partition key scoping snippets to this repository/branch/PR
    pub fn project_id(&self) -> String {
        format!("{}/{}/{}/{}", self.owner, self.repo, self.branch, self.number)
    }

    /// Deserialize an event from a queue payload
    pub fn from_json(payload: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Serialize the event for the queue
    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl fmt::Display for ReviewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// One extracted code unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// Unique id (UUID v4)
    pub id: String,
    /// Source text of the code unit
    pub content: String,
    /// File the unit was extracted from
    pub filename: String,
    /// Language tag (e.g. "go", "python")
    pub language: String,
    /// Project the snippet is indexed under, set by the indexer
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Snippet {
    /// Create a snippet with a fresh id
    pub fn new(
        content: impl Into<String>,
        filename: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            filename: filename.into(),
            language: language.into(),
            project_id: String::new(),
            embedding: None,
        }
    }

    /// Set the owning project
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    /// Attach an embedding
    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Most common language among the snippets, ties broken alphabetically
pub fn dominant_language(snippets: &[Snippet]) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for snippet in snippets {
        *counts.entry(snippet.language.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a_lang, a), (b_lang, b)| a.cmp(b).then_with(|| b_lang.cmp(a_lang)))
        .map(|(lang, _)| lang.to_string())
}

/// Outcome status used as a metrics label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failure => "failure",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one queued event
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    /// The event that was processed
    pub event: ReviewEvent,
    pub status: Status,
    /// Error detail on failure
    pub error: Option<String>,
    /// Stage that failed, when attributable
    pub stage: Option<Stage>,
    /// Whether the failure is an expected, user-facing condition
    pub user_facing: bool,
    pub elapsed: Duration,
}

impl ProcessingOutcome {
    /// Build an outcome from a pipeline result
    pub fn from_result<T>(event: ReviewEvent, result: &Result<T, Error>, elapsed: Duration) -> Self {
        match result {
            Ok(_) => Self {
                event,
                status: Status::Success,
                error: None,
                stage: None,
                user_facing: false,
                elapsed,
            },
            Err(err) => Self {
                event,
                status: Status::Failure,
                error: Some(err.to_string()),
                stage: err.stage(),
                user_facing: err.is_user_facing(),
                elapsed,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id() {
        let event = ReviewEvent::github("acme", "widget", 7, "fix-1");
        assert_eq!(event.project_id(), "acme/widget/fix-1/7");
        assert_eq!(event.clone_url, "https://github.com/acme/widget.git");
        assert_eq!(event.to_string(), "acme/widget#7");
    }

    #[test]
    fn test_event_json() {
        let event = ReviewEvent::github("acme", "widget", 7, "fix-1");
        let json = event.to_json().unwrap();
        let parsed = ReviewEvent::from_json(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_accepts_ingress_field_names() {
        let payload = br#"{
            "Owner": "acme",
            "Repo": "widget",
            "Number": 7,
            "CloneURL": "https://github.com/acme/widget.git",
            "Branch": "fix-1",
            "Title": "Fix the thing",
            "Author": "octocat",
            "DiffURL": "https://github.com/acme/widget/pull/7.diff"
        }"#;
        let event = ReviewEvent::from_json(payload).unwrap();
        assert_eq!(event.project_id(), "acme/widget/fix-1/7");
        assert_eq!(event.title.as_deref(), Some("Fix the thing"));
    }

    #[test]
    fn test_malformed_event() {
        assert!(ReviewEvent::from_json(b"not json").is_err());
        assert!(ReviewEvent::from_json(br#"{"owner":"acme"}"#).is_err());
    }

    #[test]
    fn test_snippet_ids_are_unique() {
        let a = Snippet::new("func A() {}", "a.go", "go");
        let b = Snippet::new("func A() {}", "a.go", "go");
        assert_ne!(a.id, b.id);
        assert!(a.embedding.is_none());
    }

    #[test]
    fn test_dominant_language() {
        let snippets = vec![
            Snippet::new("a", "a.go", "go"),
            Snippet::new("b", "b.py", "python"),
            Snippet::new("c", "c.go", "go"),
        ];
        assert_eq!(dominant_language(&snippets).as_deref(), Some("go"));
        assert_eq!(dominant_language(&[]), None);
    }

    #[test]
    fn test_dominant_language_tie_is_deterministic() {
        let snippets = vec![
            Snippet::new("b", "b.py", "python"),
            Snippet::new("a", "a.go", "go"),
        ];
        assert_eq!(dominant_language(&snippets).as_deref(), Some("go"));
    }

    #[test]
    fn test_outcome_from_error() {
        let event = ReviewEvent::github("acme", "widget", 7, "fix-1");
        let result: Result<(), Error> = Err(Error::NothingToReview);
        let outcome = ProcessingOutcome::from_result(event, &result, Duration::from_millis(5));
        assert_eq!(outcome.status, Status::Failure);
        assert!(outcome.user_facing);
        assert!(outcome.stage.is_none());
    }
}
