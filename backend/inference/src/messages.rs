//! Chat payload construction and response text extraction.

use serde_json::{json, Map, Value};

/// Build the system + user messages for one batch.
///
/// The user turn carries the optional text prompt first, then one
/// `image_url` part per image, in batch order.
pub fn build_messages(system_prompt: &str, user_prompt: &str, image_data_urls: &[String]) -> Value {
    let mut content = Vec::with_capacity(image_data_urls.len() + 1);
    if !user_prompt.is_empty() {
        content.push(json!({ "type": "text", "text": user_prompt }));
    }
    for url in image_data_urls {
        content.push(json!({ "type": "image_url", "image_url": { "url": url } }));
    }
    json!([
        { "role": "system", "content": system_prompt },
        { "role": "user", "content": content },
    ])
}

/// Build the request body, merging `extra` fields over the defaults.
pub fn build_body(
    model: &str,
    messages: Value,
    temperature: f64,
    max_tokens: u32,
    extra: Option<&Map<String, Value>>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "temperature": temperature,
        "max_tokens": max_tokens,
    });
    if let (Some(extra), Some(obj)) = (extra, body.as_object_mut()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    body
}

/// Pull the assistant text out of a chat-completions response.
///
/// Prefers `choices[0].message.content` (a string, or an array of text parts),
/// falls back to `choices[0].text`, else returns an empty string.
pub fn extract_text(resp: &Value) -> String {
    let choice = &resp["choices"][0];
    match &choice["message"]["content"] {
        Value::String(s) => return s.clone(),
        Value::Array(parts) => {
            return parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("");
        }
        _ => {}
    }
    choice["text"].as_str().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_prefers_message_content() {
        let resp = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(extract_text(&resp), "hello");
    }

    #[test]
    fn extract_text_falls_back_to_text_key() {
        let resp = json!({"choices": [{"text": "fallback"}]});
        assert_eq!(extract_text(&resp), "fallback");
    }

    #[test]
    fn extract_text_joins_content_parts() {
        let resp = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "a "},
            {"type": "text", "text": "b"}
        ]}}]});
        assert_eq!(extract_text(&resp), "a b");
    }

    #[test]
    fn extract_text_handles_empty_response() {
        assert_eq!(extract_text(&json!({})), "");
        assert_eq!(extract_text(&json!({"choices": []})), "");
        assert_eq!(extract_text(&json!({"choices": [{"message": {"content": null}}]})), "");
    }

    #[test]
    fn messages_include_prompts_and_urls() {
        let urls = vec![
            "data:image/png;base64,AAA".to_string(),
            "data:image/jpeg;base64,BBB".to_string(),
        ];
        let messages = build_messages("system prompt", "describe", &urls);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "system prompt");
        assert_eq!(messages[1]["role"], "user");
        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        let image_urls: Vec<&str> = parts
            .iter()
            .filter(|p| p["type"] == "image_url")
            .filter_map(|p| p["image_url"]["url"].as_str())
            .collect();
        assert_eq!(image_urls, urls);
    }

    #[test]
    fn empty_user_prompt_sends_images_only() {
        let messages = build_messages("sys", "", &["data:x".to_string()]);
        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["type"], "image_url");
    }

    #[test]
    fn extra_fields_override_defaults() {
        let extra: Map<String, Value> =
            serde_json::from_str(r#"{"top_p": 0.9, "temperature": 0.7}"#).unwrap();
        let body = build_body("m", json!([]), 0.2, 100, Some(&extra));
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["max_tokens"], 100);
    }
}
