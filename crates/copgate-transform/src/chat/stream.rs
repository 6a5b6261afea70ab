use std::collections::HashMap;

use copgate_protocol::chat::ChatCompletionChunk;
use copgate_protocol::claude::{
    ContentBlock, ContentDelta, DeltaUsage, MessageDeltaBody, MessagesResponse, StreamEvent, Usage,
};

use super::response::map_stop_reason;
use crate::normalize::is_claude;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Streaming translation from Chat Completions chunks to Anthropic SSE
/// events. One instance per request; feed chunks in arrival order and flush
/// the returned events before the next call.
#[derive(Debug)]
pub struct ChatStreamState {
    block_index: i64,
    open_block: OpenBlock,
    tool_call_blocks: HashMap<i64, u32>,
    started: bool,
    is_claude: bool,
    input_tokens: i64,
    output_tokens: i64,
    cached_tokens: i64,
}

impl ChatStreamState {
    pub fn new(model: &str) -> Self {
        Self {
            block_index: -1,
            open_block: OpenBlock::None,
            tool_call_blocks: HashMap::new(),
            started: false,
            is_claude: is_claude(model),
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
        }
    }

    /// Accumulated `(input, output, cached)` token counts.
    pub fn token_counts(&self) -> (i64, i64, i64) {
        (self.input_tokens, self.output_tokens, self.cached_tokens)
    }

    pub fn translate_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            let mut usage = Usage::default();
            if let Some(chunk_usage) = &chunk.usage {
                let cached = chunk_usage
                    .prompt_tokens_details
                    .map(|details| details.cached_tokens)
                    .unwrap_or(0);
                usage.input_tokens = chunk_usage.prompt_tokens - cached;
                usage.cache_read_input_tokens = cached;
                self.input_tokens = usage.input_tokens;
                self.cached_tokens = cached;
            }
            events.push(StreamEvent::MessageStart {
                message: MessagesResponse::skeleton(chunk.id.clone(), chunk.model.clone(), usage),
            });
        }

        let Some(choice) = chunk.choices.first() else {
            // Usage-only trailer chunk.
            if let Some(usage) = &chunk.usage {
                self.output_tokens = usage.completion_tokens;
            }
            return events;
        };
        let delta = &choice.delta;

        if let Some(reasoning) = delta.reasoning_text.as_deref().filter(|text| !text.is_empty()) {
            if self.open_block == OpenBlock::Text && self.is_claude {
                // Copilot sometimes tags plain text as reasoning mid-answer;
                // keep it in the open text block for Claude targets.
                events.push(self.delta_event(ContentDelta::TextDelta {
                    text: reasoning.to_string(),
                }));
                return events;
            }

            if self.open_block != OpenBlock::Thinking {
                self.close_current_block(&mut events);
                self.open_block(OpenBlock::Thinking, &mut events);
            }
            events.push(self.delta_event(ContentDelta::ThinkingDelta {
                thinking: reasoning.to_string(),
            }));
        }

        if let Some(opaque) = delta.reasoning_opaque.as_deref().filter(|sig| !sig.is_empty()) {
            if self.open_block == OpenBlock::Thinking {
                events.push(self.delta_event(ContentDelta::SignatureDelta {
                    signature: opaque.to_string(),
                }));
                self.close_current_block(&mut events);
            } else {
                // Self-contained opaque reasoning with no preceding text.
                self.close_current_block(&mut events);
                self.open_block(OpenBlock::Thinking, &mut events);
                events.push(self.delta_event(ContentDelta::ThinkingDelta {
                    thinking: "Thinking...".to_string(),
                }));
                events.push(self.delta_event(ContentDelta::SignatureDelta {
                    signature: opaque.to_string(),
                }));
                self.close_current_block(&mut events);
            }
        }

        if let Some(content) = delta.content.as_deref().filter(|text| !text.is_empty()) {
            if self.open_block == OpenBlock::Thinking {
                events.push(self.delta_event(ContentDelta::SignatureDelta {
                    signature: String::new(),
                }));
                self.close_current_block(&mut events);
            }
            if self.open_block != OpenBlock::Text {
                self.close_current_block(&mut events);
                self.open_block(OpenBlock::Text, &mut events);
            }
            events.push(self.delta_event(ContentDelta::TextDelta {
                text: content.to_string(),
            }));
        }

        for call in &delta.tool_calls {
            let block_index = match self.tool_call_blocks.get(&call.index) {
                Some(index) => *index,
                None => {
                    self.close_current_block(&mut events);
                    self.block_index += 1;
                    self.open_block = OpenBlock::ToolUse;
                    let index = self.block_index as u32;
                    self.tool_call_blocks.insert(call.index, index);

                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: ContentBlock::ToolUse {
                            id: call.id.clone().unwrap_or_default(),
                            name: call
                                .function
                                .as_ref()
                                .and_then(|function| function.name.clone())
                                .unwrap_or_default(),
                            input: serde_json::json!({}),
                        },
                    });
                    index
                }
            };

            if let Some(arguments) = call
                .function
                .as_ref()
                .and_then(|function| function.arguments.as_deref())
                .filter(|arguments| !arguments.is_empty())
            {
                events.push(StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: ContentDelta::InputJsonDelta {
                        partial_json: arguments.to_string(),
                    },
                });
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.close_current_block(&mut events);

            if let Some(usage) = &chunk.usage {
                self.output_tokens = usage.completion_tokens;
            }

            events.push(StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(map_stop_reason(reason)),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: self.output_tokens,
                },
            });
            events.push(StreamEvent::MessageStop);
        }

        events
    }

    fn open_block(&mut self, kind: OpenBlock, events: &mut Vec<StreamEvent>) {
        self.block_index += 1;
        self.open_block = kind;
        let content_block = match kind {
            OpenBlock::Thinking => ContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
            _ => ContentBlock::Text {
                text: String::new(),
            },
        };
        events.push(StreamEvent::ContentBlockStart {
            index: self.block_index as u32,
            content_block,
        });
    }

    fn close_current_block(&mut self, events: &mut Vec<StreamEvent>) {
        if self.open_block == OpenBlock::None {
            return;
        }
        events.push(StreamEvent::ContentBlockStop {
            index: self.block_index as u32,
        });
        self.open_block = OpenBlock::None;
    }

    fn delta_event(&self, delta: ContentDelta) -> StreamEvent {
        StreamEvent::ContentBlockDelta {
            index: self.block_index as u32,
            delta,
        }
    }
}
