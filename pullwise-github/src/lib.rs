//! Pullwise GitHub - GitHub integration for Pullwise
//!
//! This crate provides the version control provider used by the review
//! pipeline: shallow clones of pull request branches, diff downloads, and
//! review comments on pull requests.

mod client;
mod clone;
mod error;

pub use client::{is_github_url, parse_github_url, GitHubClient, DIFF_MEDIA_TYPE};
pub use clone::shallow_clone;
pub use error::{Error, Result};
