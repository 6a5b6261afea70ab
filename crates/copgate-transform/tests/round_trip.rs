//! Cross-translator properties: content that leaves through one side of a
//! translation pair must come back intact through the other.

use copgate_protocol::claude::{
    ContentBlock, Message, MessageContent, MessagesRequest, Role,
};
use copgate_transform::chat;
use copgate_transform::responses;

fn request_with_assistant(blocks: Vec<ContentBlock>) -> MessagesRequest {
    MessagesRequest {
        model: "gpt-5.1-codex-max".to_string(),
        messages: vec![Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }],
        max_tokens: 4096,
        system: None,
        tools: Vec::new(),
        tool_choice: None,
        stream: false,
        temperature: None,
        top_p: None,
        top_k: None,
        stop_sequences: Vec::new(),
        thinking: None,
        metadata: None,
    }
}

#[test]
fn chat_round_trip_preserves_tool_identity_and_text() {
    let request = request_with_assistant(vec![
        ContentBlock::Text {
            text: "I will ".to_string(),
        },
        ContentBlock::Text {
            text: "read the file.".to_string(),
        },
        ContentBlock::ToolUse {
            id: "toolu_01".to_string(),
            name: "Read".to_string(),
            input: serde_json::json!({"path": "src/main.rs"}),
        },
    ]);

    let outbound = chat::request::translate_request(&request, "", None);
    let assistant = &outbound.messages[0];

    // Text concatenates without separators; tool identity is verbatim.
    assert_eq!(
        assistant.content,
        Some(copgate_protocol::chat::ChatContent::Text(
            "I will read the file.".to_string()
        ))
    );
    assert_eq!(assistant.tool_calls[0].id, "toolu_01");
    assert_eq!(assistant.tool_calls[0].function.name, "Read");

    // Simulate the upstream echoing the same turn back.
    let upstream: copgate_protocol::chat::ChatCompletionResponse =
        serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-echo",
            "model": "gpt-5.1-codex-max",
            "choices": [{
                "message": {
                    "content": "I will read the file.",
                    "tool_calls": [{
                        "id": "toolu_01",
                        "type": "function",
                        "function": {
                            "name": "Read",
                            "arguments": assistant.tool_calls[0].function.arguments.clone()
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }))
        .unwrap();

    let inbound = chat::response::translate_response(&upstream);
    assert_eq!(
        inbound.content[0],
        ContentBlock::Text {
            text: "I will read the file.".to_string()
        }
    );
    match &inbound.content[1] {
        ContentBlock::ToolUse { id, name, input } => {
            assert_eq!(id, "toolu_01");
            assert_eq!(name, "Read");
            assert_eq!(input["path"], "src/main.rs");
        }
        other => panic!("unexpected block: {other:?}"),
    }
}

#[test]
fn reasoning_identity_survives_the_signature_encoding() {
    // Upstream returns a reasoning item; the client gets signature "E@r1".
    let result: copgate_protocol::responses::ResponsesResult =
        serde_json::from_value(serde_json::json!({
            "id": "resp_1",
            "model": "gpt-5.1-codex-max",
            "status": "completed",
            "output": [{
                "type": "reasoning",
                "id": "r1",
                "encrypted_content": "E",
                "summary": [{"type": "summary_text", "text": "careful plan"}]
            }]
        }))
        .unwrap();
    let reply = responses::response::translate_result(&result);

    let ContentBlock::Thinking {
        thinking,
        signature,
    } = reply.content[0].clone()
    else {
        panic!("expected thinking block");
    };
    assert_eq!(signature, "E@r1");

    // The client re-sends that block on the next turn; the outbound payload
    // must carry the original identity pair.
    let next_turn = request_with_assistant(vec![ContentBlock::Thinking {
        thinking,
        signature,
    }]);
    let payload = responses::request::translate_request(&next_turn, "", "high");

    assert_eq!(
        payload.input[0],
        copgate_protocol::responses::InputItem::Reasoning {
            id: "r1".to_string(),
            encrypted_content: "E".to_string(),
            summary: vec![copgate_protocol::responses::SummaryItem::summary_text(
                "careful plan"
            )],
        }
    );
}

#[test]
fn signature_split_joins_back_for_single_at_signatures() {
    for (encrypted, id) in [("E", "r1"), ("abc123", "rs_0b9"), ("x", "y")] {
        let signature = format!("{encrypted}@{id}");
        let (left, right) = signature.split_once('@').unwrap();
        assert_eq!(left, encrypted);
        assert_eq!(right, id);
        assert_eq!(format!("{left}@{right}"), signature);
    }
}
