//! Incremental parser for inline tool tags
//!
//! Under the xml protocol a model writes tool calls straight into its text:
//!
//! ```text
//! Let me check.<read_file><path>src/main.rs</path></read_file>
//! ```
//!
//! [`TagParser`] consumes that text one fragment at a time and keeps an
//! ordered list of [`AssistantBlock`]s. It never looks ahead, so the result
//! is the same however the stream happens to be split.
//!
//! Inside a parameter only that parameter's own closing tag is recognized.
//! A `content` value may contain `</write_to_file>` or any other tool tag,
//! but not the literal `</content>`.

use std::collections::BTreeSet;

use ratchet_provider::{schema_properties, ToolInput, ToolUse};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::block::{AssistantBlock, BlockBody};
use crate::error::{Result, StreamFailure, TaskError};
use crate::tools::ToolRegistry;

/// Default ceiling for the whole accumulated message
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;
/// Default ceiling for a single parameter value
pub const DEFAULT_MAX_PARAM_BYTES: usize = 100 * 1024;

/// Tool and parameter names the parser treats as tags
#[derive(Debug, Clone, Default)]
pub struct TagVocabulary {
    tools: BTreeSet<String>,
    params: BTreeSet<String>,
}

impl TagVocabulary {
    pub fn new<T, P>(tools: T, params: P) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            tools: tools.into_iter().map(Into::into).collect(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Tool names plus every property name in their schemas
    pub fn from_registry(registry: &ToolRegistry) -> Self {
        let mut vocabulary = Self::default();
        for tool in registry.tools() {
            vocabulary.tools.insert(tool.name().to_string());
            vocabulary
                .params
                .extend(schema_properties(&tool.parameters()));
        }
        vocabulary
    }

    pub fn is_tool(&self, name: &str) -> bool {
        self.tools.contains(name)
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.contains(name)
    }

    /// Name of the tool whose opening tag ends `acc`
    fn opening_tool(&self, acc: &str) -> Option<String> {
        self.tools
            .iter()
            .find(|name| ends_with_tag(acc, name, false))
            .cloned()
    }

    fn opening_param(&self, acc: &str) -> Option<String> {
        self.params
            .iter()
            .find(|name| ends_with_tag(acc, name, false))
            .cloned()
    }
}

fn ends_with_tag(acc: &str, name: &str, closing: bool) -> bool {
    let Some(rest) = acc.strip_suffix('>') else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(name) else {
        return false;
    };
    if closing {
        rest.ends_with("</")
    } else {
        rest.ends_with('<')
    }
}

fn tag_len(name: &str, closing: bool) -> usize {
    name.len() + if closing { 3 } else { 2 }
}

/// Where the parser is within the accumulated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserState {
    Scanning,
    InTool {
        block: usize,
        tool: String,
    },
    InParam {
        block: usize,
        tool: String,
        param: String,
        /// Byte offset in the accumulator where the value starts
        start: usize,
        /// Value passed the ceiling; skip to its closing tag
        discarding: bool,
    },
}

#[derive(Debug)]
pub struct TagParser {
    vocabulary: TagVocabulary,
    max_message_bytes: usize,
    max_param_bytes: usize,
    acc: String,
    state: ParserState,
    blocks: Vec<AssistantBlock>,
    /// Index of the draft text block collecting the current tail
    open_text: Option<usize>,
    overflowed: bool,
}

impl TagParser {
    pub fn new(vocabulary: TagVocabulary) -> Self {
        Self::with_limits(
            vocabulary,
            DEFAULT_MAX_MESSAGE_BYTES,
            DEFAULT_MAX_PARAM_BYTES,
        )
    }

    pub fn with_limits(
        vocabulary: TagVocabulary,
        max_message_bytes: usize,
        max_param_bytes: usize,
    ) -> Self {
        Self {
            vocabulary,
            max_message_bytes,
            max_param_bytes,
            acc: String::new(),
            state: ParserState::Scanning,
            blocks: Vec::new(),
            open_text: None,
            overflowed: false,
        }
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn blocks(&self) -> &[AssistantBlock] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<AssistantBlock> {
        self.blocks
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    /// Feed one streamed fragment.
    ///
    /// Fails once with a fatal `MessageTooLarge` when the fragment would push
    /// the accumulator past its ceiling. The fragment is rejected whole and
    /// every later fragment is ignored.
    pub fn push(&mut self, fragment: &str) -> Result<()> {
        if self.overflowed {
            return Ok(());
        }
        if self.acc.len() + fragment.len() > self.max_message_bytes {
            self.overflowed = true;
            warn!(
                "assistant message passed {} bytes, refusing further input",
                self.max_message_bytes
            );
            return Err(TaskError::StreamingFailed(StreamFailure::MessageTooLarge {
                limit: self.max_message_bytes,
            }));
        }

        for c in fragment.chars() {
            self.acc.push(c);
            self.step(c);
        }
        Ok(())
    }

    fn step(&mut self, c: char) {
        match self.state.clone() {
            ParserState::Scanning => self.scan(c),
            ParserState::InTool { block, tool } => {
                if c != '>' {
                    return;
                }
                if ends_with_tag(&self.acc, &tool, true) {
                    self.blocks[block].finalize_in_place();
                    trace!("closed tool block {}", tool);
                    self.state = ParserState::Scanning;
                } else if let Some(param) = self.vocabulary.opening_param(&self.acc) {
                    self.state = ParserState::InParam {
                        block,
                        tool,
                        param,
                        start: self.acc.len(),
                        discarding: false,
                    };
                }
            }
            ParserState::InParam {
                block,
                tool,
                param,
                start,
                discarding,
            } => {
                let close = tag_len(&param, true);
                if c == '>' && ends_with_tag(&self.acc, &param, true) {
                    let end = self.acc.len() - close;
                    if discarding {
                        trace!("skipped oversized {} value", param);
                    } else if end - start > self.max_param_bytes {
                        self.discard_param(&tool, &param);
                    } else {
                        let value = self.acc[start..end].to_string();
                        self.store_param(block, &param, &value);
                    }
                    self.state = ParserState::InTool { block, tool };
                } else if !discarding && self.acc.len() - start > self.max_param_bytes + close {
                    self.discard_param(&tool, &param);
                    self.state = ParserState::InParam {
                        block,
                        tool,
                        param,
                        start,
                        discarding: true,
                    };
                }
            }
        }
    }

    fn scan(&mut self, c: char) {
        let index = match self.open_text {
            Some(index) => index,
            None => {
                self.blocks.push(AssistantBlock::draft_text(String::new()));
                let index = self.blocks.len() - 1;
                self.open_text = Some(index);
                index
            }
        };
        if let Some(BlockBody::Text(text)) = self.blocks[index].draft_mut() {
            text.push(c);
        }

        if c != '>' {
            return;
        }
        let Some(tool) = self.vocabulary.opening_tool(&self.acc) else {
            return;
        };

        // The opening tag itself is not text
        self.open_text = None;
        let keep = match self.blocks[index].body() {
            BlockBody::Text(text) => {
                let cut = text.len().saturating_sub(tag_len(&tool, false));
                text[..cut].trim().to_string()
            }
            BlockBody::ToolUse(_) => String::new(),
        };
        if keep.is_empty() {
            self.blocks.remove(index);
        } else {
            self.blocks[index] = AssistantBlock::Final(BlockBody::Text(keep));
        }

        let id = format!("toolu_{}", Uuid::new_v4().simple());
        self.blocks.push(AssistantBlock::draft_tool(ToolUse::new(
            id,
            tool.clone(),
            ToolInput::default(),
        )));
        trace!("opened tool block {}", tool);
        self.state = ParserState::InTool {
            block: self.blocks.len() - 1,
            tool,
        };
    }

    /// Place a block produced outside the text at the current stream position.
    ///
    /// Text collected so far is closed first, so later text starts a new block.
    pub fn push_block(&mut self, block: AssistantBlock) {
        if let Some(index) = self.open_text.take() {
            let text = match self.blocks[index].body() {
                BlockBody::Text(text) => text.trim().to_string(),
                BlockBody::ToolUse(_) => String::new(),
            };
            if text.is_empty() {
                self.blocks.remove(index);
            } else {
                self.blocks[index] = AssistantBlock::Final(BlockBody::Text(text));
            }
        }
        self.blocks.push(block);
    }

    fn discard_param(&self, tool: &str, param: &str) {
        warn!(
            "parameter '{}' of '{}' exceeded {} bytes, discarding it",
            param, tool, self.max_param_bytes
        );
    }

    fn store_param(&mut self, block: usize, param: &str, raw: &str) {
        let value = if param == "content" {
            let raw = raw.strip_prefix('\n').unwrap_or(raw);
            raw.strip_suffix('\n').unwrap_or(raw)
        } else {
            raw.trim()
        };
        if let Some(BlockBody::ToolUse(tool_use)) = self.blocks[block].draft_mut() {
            if let ToolInput::Params(params) = &mut tool_use.input {
                params.insert(param.to_string(), value.to_string());
            }
        }
    }

    /// Close every draft block. Safe to call more than once.
    ///
    /// Text is trimmed and dropped when empty; an unterminated parameter keeps
    /// what arrived so far.
    pub fn finalize(&mut self) {
        if let ParserState::InParam {
            block,
            param,
            start,
            discarding,
            ..
        } = self.state.clone()
        {
            if !discarding && self.acc.len() - start <= self.max_param_bytes {
                let value = self.acc[start..].to_string();
                self.store_param(block, &param, &value);
            }
        }
        self.state = ParserState::Scanning;
        self.open_text = None;

        let blocks = std::mem::take(&mut self.blocks);
        self.blocks = blocks
            .into_iter()
            .filter_map(|block| match block {
                AssistantBlock::Draft(BlockBody::Text(text)) => {
                    let text = text.trim();
                    if text.is_empty() {
                        None
                    } else {
                        Some(AssistantBlock::Final(BlockBody::Text(text.to_string())))
                    }
                }
                other => Some(other.finalize()),
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn vocabulary() -> TagVocabulary {
        TagVocabulary::new(
            ["attempt_completion", "write_to_file", "read_file"],
            ["result", "path", "content"],
        )
    }

    fn params(block: &AssistantBlock) -> BTreeMap<String, String> {
        match &block.as_tool_use().expect("tool block").input {
            ToolInput::Params(params) => params.clone(),
            other => panic!("unexpected input {:?}", other),
        }
    }

    #[test]
    fn test_single_fragment() {
        let mut parser = TagParser::new(vocabulary());
        parser
            .push("before<attempt_completion><result>ok</result></attempt_completion>after")
            .unwrap();
        parser.finalize();

        let blocks = parser.blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].as_text(), Some("before"));
        assert_eq!(
            blocks[1].as_tool_use().map(|t| t.name.as_str()),
            Some("attempt_completion")
        );
        assert_eq!(params(&blocks[1]).get("result").map(String::as_str), Some("ok"));
        assert_eq!(blocks[2].as_text(), Some("after"));
        assert!(blocks.iter().all(|b| !b.is_partial()));
    }

    #[test]
    fn test_text_grows_while_scanning() {
        let mut parser = TagParser::new(vocabulary());
        parser.push("hel").unwrap();
        assert_eq!(parser.blocks().len(), 1);
        assert!(parser.blocks()[0].is_partial());
        parser.push("lo").unwrap();
        assert_eq!(parser.blocks()[0].as_text(), Some("hello"));
    }

    #[test]
    fn test_tool_closes_before_stream_end() {
        let mut parser = TagParser::new(vocabulary());
        parser
            .push("<read_file><path> a.txt </path></read_file>")
            .unwrap();
        assert_eq!(parser.state(), &ParserState::Scanning);
        assert!(!parser.blocks()[0].is_partial());
        assert_eq!(params(&parser.blocks()[0])["path"], "a.txt");
    }

    #[test]
    fn test_content_keeps_inner_whitespace() {
        let mut parser = TagParser::new(vocabulary());
        parser
            .push("<write_to_file><path>x.rs</path><content>\n  fn main() {}\n\n</content></write_to_file>")
            .unwrap();
        parser.finalize();
        assert_eq!(params(&parser.blocks()[0])["content"], "  fn main() {}\n");
    }

    #[test]
    fn test_content_may_contain_tool_closing_tag() {
        let mut parser = TagParser::new(vocabulary());
        parser
            .push("<write_to_file><path>doc.md</path><content>see </write_to_file> here</content></write_to_file>")
            .unwrap();
        parser.finalize();

        assert_eq!(parser.blocks().len(), 1);
        assert_eq!(
            params(&parser.blocks()[0])["content"],
            "see </write_to_file> here"
        );
    }

    #[test]
    fn test_unknown_tags_are_text() {
        let mut parser = TagParser::new(vocabulary());
        parser.push("<thinking>hmm</thinking>").unwrap();
        parser.finalize();
        assert_eq!(parser.blocks().len(), 1);
        assert_eq!(parser.blocks()[0].as_text(), Some("<thinking>hmm</thinking>"));
    }

    #[test]
    fn test_finalize_keeps_unterminated_param() {
        let mut parser = TagParser::new(vocabulary());
        parser.push("<read_file><path>notes.txt").unwrap();
        parser.finalize();

        let block = &parser.blocks()[0];
        assert!(!block.is_partial());
        assert_eq!(params(block)["path"], "notes.txt");
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut parser = TagParser::new(vocabulary());
        parser
            .push("  intro  <attempt_completion><result>done")
            .unwrap();
        parser.finalize();
        let first = parser.blocks().to_vec();
        parser.finalize();
        assert_eq!(parser.blocks(), first.as_slice());
        assert_eq!(first[0].as_text(), Some("intro"));
    }

    #[test]
    fn test_whitespace_only_text_dropped() {
        let mut parser = TagParser::new(vocabulary());
        parser
            .push("\n  <attempt_completion><result>x</result></attempt_completion>\n")
            .unwrap();
        parser.finalize();
        assert_eq!(parser.blocks().len(), 1);
    }

    #[test]
    fn test_message_ceiling_fails_once() {
        let mut parser = TagParser::with_limits(vocabulary(), 16, 8);
        parser.push("<read_file>").unwrap();

        let err = parser.push("0123456789").unwrap_err();
        assert!(matches!(
            err,
            TaskError::StreamingFailed(StreamFailure::MessageTooLarge { limit: 16 })
        ));
        assert!(!err.is_retryable());
        assert!(parser.has_overflowed());

        let before = parser.blocks().to_vec();
        parser.push("more").unwrap();
        assert_eq!(parser.blocks(), before.as_slice());
    }

    #[test]
    fn test_param_ceiling_discards_value() {
        let mut parser = TagParser::with_limits(vocabulary(), 1024, 4);
        parser
            .push("<write_to_file><path>a</path><content>far too long</content></write_to_file>")
            .unwrap();
        parser.finalize();

        let params = params(&parser.blocks()[0]);
        assert_eq!(params.get("path").map(String::as_str), Some("a"));
        assert!(!params.contains_key("content"));
    }

    #[test]
    fn test_discarded_value_keeps_tool_tags_literal() {
        let mut parser = TagParser::with_limits(vocabulary(), 4096, 8);
        parser
            .push(concat!(
                "<write_to_file><path>a</path><content>0123456789 </write_to_file>",
                "<attempt_completion><result>x</result></attempt_completion>",
                "</content></write_to_file>",
            ))
            .unwrap();
        parser.finalize();

        assert_eq!(parser.blocks().len(), 1);
        let tool = parser.blocks()[0].as_tool_use().expect("tool block");
        assert_eq!(tool.name, "write_to_file");
        let params = params(&parser.blocks()[0]);
        assert_eq!(params.get("path").map(String::as_str), Some("a"));
        assert!(!params.contains_key("content"));
        assert_eq!(parser.state(), &ParserState::Scanning);
    }

    #[test]
    fn test_discarded_value_unterminated_at_finalize() {
        let mut parser = TagParser::with_limits(vocabulary(), 4096, 4);
        parser
            .push("<write_to_file><path>a</path><content>much longer than four")
            .unwrap();
        assert!(matches!(
            parser.state(),
            ParserState::InParam { discarding: true, .. }
        ));
        parser.finalize();

        let params = params(&parser.blocks()[0]);
        assert!(!params.contains_key("content"));
    }

    #[test]
    fn test_push_block_keeps_arrival_order() {
        let mut parser = TagParser::new(vocabulary());
        parser.push("First. ").unwrap();
        parser.push_block(
            AssistantBlock::draft_tool(ToolUse::new(
                "legacy",
                "read_file",
                ToolInput::default(),
            ))
            .finalize(),
        );
        parser.push("Then.").unwrap();
        parser.push("<attempt_completion><result>ok</result></attempt_completion>").unwrap();
        parser.finalize();

        let kinds: Vec<String> = parser
            .blocks()
            .iter()
            .map(|b| match b.body() {
                BlockBody::Text(t) => format!("text:{}", t),
                BlockBody::ToolUse(t) => format!("tool:{}", t.name),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "text:First.",
                "tool:read_file",
                "text:Then.",
                "tool:attempt_completion"
            ]
        );
    }
}
