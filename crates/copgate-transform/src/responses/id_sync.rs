use std::collections::HashMap;

use rand::Rng;
use serde_json::Value as JsonValue;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 16;

/// Reconciles item-id drift on the raw Responses passthrough stream.
///
/// Copilot occasionally emits `output_item.added` with an empty id, or a
/// `done` whose id disagrees with the `added`; JS SDKs crash on the
/// mismatch. The first observed (or synthesized) id per output index is
/// canonical and every later reference is rewritten to it.
#[derive(Debug, Default)]
pub struct StreamIdSync {
    canonical: HashMap<i64, String>,
}

impl StreamIdSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the (possibly rewritten) event data.
    pub fn process(&mut self, event_type: &str, data: &str) -> String {
        match event_type {
            "response.output_item.added" => self.process_added(data),
            "response.output_item.done" => self.process_done(data),
            _ => self.process_other(data),
        }
    }

    fn process_added(&mut self, data: &str) -> String {
        let Ok(mut value) = serde_json::from_str::<JsonValue>(data) else {
            return data.to_string();
        };
        let Some(output_index) = value.get("output_index").and_then(JsonValue::as_i64) else {
            return data.to_string();
        };

        let current_id = value
            .pointer("/item/id")
            .and_then(JsonValue::as_str)
            .unwrap_or("")
            .to_string();

        if current_id.is_empty() {
            let synthesized = synthesize_id(output_index);
            if let Some(item) = value.get_mut("item").and_then(JsonValue::as_object_mut) {
                item.insert("id".to_string(), JsonValue::String(synthesized.clone()));
            }
            self.canonical.insert(output_index, synthesized);
            return value.to_string();
        }

        self.canonical.insert(output_index, current_id);
        data.to_string()
    }

    fn process_done(&mut self, data: &str) -> String {
        let Ok(mut value) = serde_json::from_str::<JsonValue>(data) else {
            return data.to_string();
        };
        let Some(output_index) = value.get("output_index").and_then(JsonValue::as_i64) else {
            return data.to_string();
        };
        let Some(canonical) = self.canonical.get(&output_index) else {
            return data.to_string();
        };

        let current_id = value.pointer("/item/id").and_then(JsonValue::as_str);
        if current_id == Some(canonical.as_str()) {
            return data.to_string();
        }

        if let Some(item) = value.get_mut("item").and_then(JsonValue::as_object_mut) {
            item.insert("id".to_string(), JsonValue::String(canonical.clone()));
        }
        value.to_string()
    }

    fn process_other(&mut self, data: &str) -> String {
        let Ok(mut value) = serde_json::from_str::<JsonValue>(data) else {
            return data.to_string();
        };
        let Some(output_index) = value.get("output_index").and_then(JsonValue::as_i64) else {
            return data.to_string();
        };
        let Some(canonical) = self.canonical.get(&output_index) else {
            return data.to_string();
        };
        let Some(item_id) = value.get("item_id").and_then(JsonValue::as_str) else {
            return data.to_string();
        };

        if item_id == canonical {
            return data.to_string();
        }

        value
            .as_object_mut()
            .unwrap()
            .insert("item_id".to_string(), JsonValue::String(canonical.clone()));
        value.to_string()
    }
}

fn synthesize_id(output_index: i64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("oi_{output_index}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_added_id_is_synthesized_and_done_rewritten() {
        let mut sync = StreamIdSync::new();

        let added = sync.process(
            "response.output_item.added",
            r#"{"output_index":0,"item":{"id":"","type":"message"}}"#,
        );
        let added_value: JsonValue = serde_json::from_str(&added).unwrap();
        let synthesized = added_value["item"]["id"].as_str().unwrap().to_string();
        assert!(synthesized.starts_with("oi_0_"));
        assert_eq!(synthesized.len(), "oi_0_".len() + ID_SUFFIX_LEN);

        let done = sync.process(
            "response.output_item.done",
            r#"{"output_index":0,"item":{"id":"X","type":"message"}}"#,
        );
        let done_value: JsonValue = serde_json::from_str(&done).unwrap();
        assert_eq!(done_value["item"]["id"].as_str().unwrap(), synthesized);
    }

    #[test]
    fn matching_ids_pass_through_unmodified() {
        let mut sync = StreamIdSync::new();
        let added = r#"{"output_index":1,"item":{"id":"msg_1","type":"message"}}"#;
        assert_eq!(sync.process("response.output_item.added", added), added);

        let done = r#"{"output_index":1,"item":{"id":"msg_1","type":"message"}}"#;
        assert_eq!(sync.process("response.output_item.done", done), done);
    }

    #[test]
    fn interior_events_get_canonical_item_id() {
        let mut sync = StreamIdSync::new();
        sync.process(
            "response.output_item.added",
            r#"{"output_index":2,"item":{"id":"canon","type":"message"}}"#,
        );

        let rewritten = sync.process(
            "response.output_text.delta",
            r#"{"output_index":2,"item_id":"drifted","delta":"hi"}"#,
        );
        let value: JsonValue = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(value["item_id"].as_str().unwrap(), "canon");
    }

    #[test]
    fn unknown_output_index_left_alone() {
        let mut sync = StreamIdSync::new();
        let data = r#"{"output_index":9,"item_id":"whatever","delta":"x"}"#;
        assert_eq!(sync.process("response.output_text.delta", data), data);
    }
}
