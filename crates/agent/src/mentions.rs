//! Mention expansion for user content

use async_trait::async_trait;
use ratchet_provider::ContentBlock;
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::tools::path_utils::validate_workspace_path;

/// Rewrites user content before it enters the history
#[async_trait]
pub trait MentionExpander: Send + Sync {
    async fn expand(&self, content: Vec<ContentBlock>) -> Vec<ContentBlock>;
}

/// Leaves content untouched
pub struct NoMentions;

#[async_trait]
impl MentionExpander for NoMentions {
    async fn expand(&self, content: Vec<ContentBlock>) -> Vec<ContentBlock> {
        content
    }
}

/// Inlines workspace files referenced as `@/path/to/file`.
///
/// The mention becomes `'path' (see below for file content)` and the file
/// follows the text inside a `<file_content path="...">` block. Files that
/// cannot be read are reported inside the block instead.
pub struct FileMentionExpander {
    workspace: PathBuf,
    pattern: Regex,
}

impl FileMentionExpander {
    pub fn new(workspace: PathBuf) -> Result<Self, regex::Error> {
        Ok(Self {
            workspace,
            pattern: Regex::new(r"(^|\s)@(/[^\s]+)")?,
        })
    }

    async fn expand_text(&self, text: &str) -> String {
        let mut mentioned: Vec<String> = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let path = caps[2].trim_end_matches(['.', ',', ';', ':', '!', '?']);
            if !mentioned.iter().any(|p| p == path) {
                mentioned.push(path.to_string());
            }
        }
        if mentioned.is_empty() {
            return text.to_string();
        }

        let mut expanded = self
            .pattern
            .replace_all(text, |caps: &regex::Captures| {
                let path = caps[2].trim_end_matches(['.', ',', ';', ':', '!', '?']);
                let tail = &caps[2][path.len()..];
                format!("{}'{}' (see below for file content){}", &caps[1], path, tail)
            })
            .into_owned();

        for path in mentioned {
            let body = self.read_mention(&path).await;
            expanded.push_str(&format!(
                "\n\n<file_content path=\"{}\">\n{}\n</file_content>",
                path, body
            ));
        }
        expanded
    }

    async fn read_mention(&self, mention: &str) -> String {
        let relative = mention.trim_start_matches('/');
        let path = match validate_workspace_path(relative, &self.workspace).await {
            Ok(path) => path,
            Err(e) => return format!("Error fetching content: {}", e),
        };
        debug!("expanding mention {:?}", path);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!("failed to read mentioned file {:?}: {}", path, e);
                format!("Error fetching content: {}", e)
            }
        }
    }
}

#[async_trait]
impl MentionExpander for FileMentionExpander {
    async fn expand(&self, content: Vec<ContentBlock>) -> Vec<ContentBlock> {
        let mut out = Vec::with_capacity(content.len());
        for block in content {
            match block {
                ContentBlock::Text { text } => {
                    let text = self.expand_text(&text).await;
                    out.push(ContentBlock::Text { text });
                }
                other => out.push(other),
            }
        }
        out
    }
}
