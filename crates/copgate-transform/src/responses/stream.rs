use std::collections::HashMap;

use copgate_protocol::claude::{
    ContentBlock, ContentDelta, DeltaUsage, ErrorDetail, MessageDeltaBody, MessagesResponse,
    StreamEvent, Usage,
};
use copgate_protocol::responses::{
    CompletedEvent, CreatedEvent, FailedEvent, FunctionArgumentsDeltaEvent,
    FunctionArgumentsDoneEvent, ItemHeader, OutputItem, OutputItemEvent, OutputItemKnown,
    OutputTextDeltaEvent, OutputTextDoneEvent, ResponsesResult, StreamErrorEvent,
    SummaryTextDeltaEvent, SummaryTextDoneEvent,
};

use super::response::translate_result;

/// Consecutive `\r`/`\n`/`\t` characters tolerated in function-call argument
/// deltas before the stream is treated as a runaway loop.
const MAX_WHITESPACE_RUN: u32 = 20;

const WHITESPACE_ABORT_MESSAGE: &str =
    "Function call arguments contain excessive whitespace (possible infinite loop). Stream aborted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Streaming translation from Responses API events to Anthropic SSE events.
/// One instance per request, driven by `(event_type, data)` pairs.
#[derive(Debug)]
pub struct ResponsesStreamState {
    block_index: i64,
    open_block: OpenBlock,
    message_completed: bool,
    aborted: bool,

    tool_call_blocks: HashMap<i64, u32>,
    reasoning_summary_block: HashMap<i64, u32>,
    text_block_by_key: HashMap<(i64, i64), u32>,
    ws_run_length: HashMap<i64, u32>,
    block_has_delta: HashMap<u32, bool>,

    input_tokens: i64,
    output_tokens: i64,
    cached_tokens: i64,
}

impl ResponsesStreamState {
    pub fn new() -> Self {
        Self {
            block_index: -1,
            open_block: OpenBlock::None,
            message_completed: false,
            aborted: false,
            tool_call_blocks: HashMap::new(),
            reasoning_summary_block: HashMap::new(),
            text_block_by_key: HashMap::new(),
            ws_run_length: HashMap::new(),
            block_has_delta: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
        }
    }

    /// True once a completion, failure, or abort terminated the message.
    pub fn is_complete(&self) -> bool {
        self.message_completed
    }

    /// True after the whitespace guard fired; the caller must stop feeding.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn token_counts(&self) -> (i64, i64, i64) {
        (self.input_tokens, self.output_tokens, self.cached_tokens)
    }

    pub fn translate_event(
        &mut self,
        event_type: &str,
        data: &str,
    ) -> Result<Vec<StreamEvent>, serde_json::Error> {
        if self.aborted {
            return Ok(Vec::new());
        }

        match event_type {
            "response.created" => self.on_created(data),
            "response.output_item.added" => self.on_output_item_added(data),
            "response.output_item.done" => self.on_output_item_done(data),
            "response.reasoning_summary_text.delta" => self.on_summary_delta(data),
            "response.reasoning_summary_text.done" => self.on_summary_done(data),
            "response.output_text.delta" => self.on_text_delta(data),
            "response.output_text.done" => self.on_text_done(data),
            "response.function_call_arguments.delta" => self.on_arguments_delta(data),
            "response.function_call_arguments.done" => self.on_arguments_done(data),
            "response.completed" | "response.incomplete" => self.on_completed(data),
            "response.failed" => self.on_failed(data),
            "error" => self.on_error(data),
            _ => Ok(Vec::new()),
        }
    }

    fn on_created(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: CreatedEvent = serde_json::from_str(data)?;

        let mut usage = Usage::default();
        if let Some(event_usage) = &event.response.usage {
            let cached = event_usage
                .input_tokens_details
                .map(|details| details.cached_tokens)
                .unwrap_or(0);
            usage.input_tokens = event_usage.input_tokens - cached;
            usage.cache_read_input_tokens = cached;
            self.input_tokens = usage.input_tokens;
            self.cached_tokens = cached;
        }

        Ok(vec![StreamEvent::MessageStart {
            message: MessagesResponse::skeleton(
                event.response.id.clone(),
                event.response.model.clone(),
                usage,
            ),
        }])
    }

    fn on_output_item_added(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: OutputItemEvent = serde_json::from_str(data)?;
        let header: ItemHeader =
            serde_json::from_value(event.item.clone()).unwrap_or_default();

        let mut events = Vec::new();
        if header.item_type == "function_call" {
            self.close_current_block(&mut events);
            self.block_index += 1;
            let index = self.block_index as u32;
            self.open_block = OpenBlock::ToolUse;
            self.tool_call_blocks.insert(event.output_index, index);
            self.ws_run_length.insert(event.output_index, 0);

            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse {
                    id: header.call_id,
                    name: header.name,
                    input: serde_json::json!({}),
                },
            });
        }
        Ok(events)
    }

    fn on_output_item_done(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: OutputItemEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        let Ok(item) = serde_json::from_value::<OutputItem>(event.item.clone()) else {
            return Ok(events);
        };

        match item {
            OutputItem::Known(OutputItemKnown::Reasoning {
                id,
                encrypted_content,
                summary,
            }) => {
                self.close_current_block(&mut events);
                self.block_index += 1;
                let index = self.block_index as u32;
                self.open_block = OpenBlock::Thinking;

                let thinking = if summary.is_empty() {
                    "Thinking...".to_string()
                } else {
                    summary
                        .iter()
                        .map(|entry| entry.text.clone())
                        .collect::<Vec<_>>()
                        .join("\n")
                };

                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: String::new(),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::ThinkingDelta { thinking },
                });
                if !encrypted_content.is_empty() {
                    let signature = if id.is_empty() {
                        encrypted_content
                    } else {
                        format!("{encrypted_content}@{id}")
                    };
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentDelta::SignatureDelta { signature },
                    });
                }
                self.close_current_block(&mut events);
            }
            OutputItem::Known(OutputItemKnown::FunctionCall { .. }) => {
                if let Some(block) = self.tool_call_blocks.get(&event.output_index) {
                    if self.open_block == OpenBlock::ToolUse && self.block_index == *block as i64 {
                        self.close_current_block(&mut events);
                    }
                }
            }
            _ => {}
        }

        Ok(events)
    }

    fn on_summary_delta(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: SummaryTextDeltaEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        let index = self.open_or_get_summary_block(event.output_index, &mut events);
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::ThinkingDelta { thinking: event.delta },
        });
        self.block_has_delta.insert(index, true);
        Ok(events)
    }

    fn on_summary_done(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: SummaryTextDoneEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        let index = self.open_or_get_summary_block(event.output_index, &mut events);
        // Fallback for servers that send only the done event.
        if !event.text.is_empty() && !self.block_has_delta.get(&index).copied().unwrap_or(false) {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::ThinkingDelta {
                    thinking: event.text,
                },
            });
        }
        Ok(events)
    }

    fn on_text_delta(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: OutputTextDeltaEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        let index =
            self.open_or_get_text_block(event.output_index, event.content_index, &mut events);
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta { text: event.delta },
        });
        self.block_has_delta.insert(index, true);
        Ok(events)
    }

    fn on_text_done(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: OutputTextDoneEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        let index =
            self.open_or_get_text_block(event.output_index, event.content_index, &mut events);
        if !event.text.is_empty() && !self.block_has_delta.get(&index).copied().unwrap_or(false) {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::TextDelta { text: event.text },
            });
        }
        Ok(events)
    }

    fn on_arguments_delta(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: FunctionArgumentsDeltaEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        // Runaway-whitespace guard: only \r, \n and \t count, anything else
        // resets the run.
        let mut run = self
            .ws_run_length
            .get(&event.output_index)
            .copied()
            .unwrap_or(0);
        for character in event.delta.chars() {
            if matches!(character, '\r' | '\n' | '\t') {
                run += 1;
            } else {
                run = 0;
            }
        }
        self.ws_run_length.insert(event.output_index, run);

        if run > MAX_WHITESPACE_RUN {
            self.close_current_block(&mut events);
            events.push(StreamEvent::Error {
                error: ErrorDetail::api_error(WHITESPACE_ABORT_MESSAGE),
            });
            self.aborted = true;
            self.message_completed = true;
            return Ok(events);
        }

        if let Some(index) = self.tool_call_blocks.get(&event.output_index).copied() {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: event.delta,
                },
            });
            self.block_has_delta.insert(index, true);
        }
        Ok(events)
    }

    fn on_arguments_done(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        let event: FunctionArgumentsDoneEvent = serde_json::from_str(data)?;
        let mut events = Vec::new();

        if let Some(index) = self.tool_call_blocks.get(&event.output_index).copied() {
            if !event.arguments.is_empty()
                && !self.block_has_delta.get(&index).copied().unwrap_or(false)
            {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta {
                        partial_json: event.arguments,
                    },
                });
            }
        }
        Ok(events)
    }

    fn on_completed(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        self.message_completed = true;
        let mut events = Vec::new();
        self.close_current_block(&mut events);

        let event: CompletedEvent = serde_json::from_str(data).unwrap_or_default();
        let result: ResponsesResult =
            serde_json::from_value(event.response).unwrap_or_default();

        let translated = translate_result(&result);
        self.output_tokens = translated.usage.output_tokens;

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: translated.stop_reason,
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: translated.usage.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);
        Ok(events)
    }

    fn on_failed(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        self.message_completed = true;
        let event: FailedEvent = serde_json::from_str(data).unwrap_or_default();

        let mut events = Vec::new();
        self.close_current_block(&mut events);
        let message = if event.response.error.message.is_empty() {
            "Response failed".to_string()
        } else {
            event.response.error.message
        };
        events.push(StreamEvent::Error {
            error: ErrorDetail::api_error(message),
        });
        Ok(events)
    }

    fn on_error(&mut self, data: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
        self.message_completed = true;
        let event: StreamErrorEvent = serde_json::from_str(data).unwrap_or_default();

        let mut events = Vec::new();
        self.close_current_block(&mut events);
        events.push(StreamEvent::Error {
            error: ErrorDetail::api_error(event.message),
        });
        Ok(events)
    }

    fn open_or_get_summary_block(
        &mut self,
        output_index: i64,
        events: &mut Vec<StreamEvent>,
    ) -> u32 {
        if let Some(index) = self.reasoning_summary_block.get(&output_index) {
            return *index;
        }

        self.close_current_block(events);
        self.block_index += 1;
        let index = self.block_index as u32;
        self.reasoning_summary_block.insert(output_index, index);
        self.open_block = OpenBlock::Thinking;

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::Thinking {
                thinking: String::new(),
                signature: String::new(),
            },
        });
        index
    }

    fn open_or_get_text_block(
        &mut self,
        output_index: i64,
        content_index: i64,
        events: &mut Vec<StreamEvent>,
    ) -> u32 {
        let key = (output_index, content_index);
        if let Some(index) = self.text_block_by_key.get(&key) {
            return *index;
        }

        self.close_current_block(events);
        self.block_index += 1;
        let index = self.block_index as u32;
        self.text_block_by_key.insert(key, index);
        self.open_block = OpenBlock::Text;

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::Text {
                text: String::new(),
            },
        });
        index
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
}

impl Default for ResponsesStreamState {
    fn default() -> Self {
        Self::new()
    }
}
