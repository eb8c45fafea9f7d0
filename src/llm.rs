use crate::{log_internal, profile::GenerationError};

/// Chat completion request in the OpenAI-compatible shape
#[derive(serde::Serialize)]
pub struct LlmChatRequest {
    /// LLM model name
    model: String,
    /// Chat conversation to continue.
    messages: Vec<ChatMessage>,
    /// LLM temperature
    temperature: f32,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ChatMessage {
    role: ChatMessageRole,
    content: String,
}

#[allow(non_camel_case_types)] // Serialized literally; case matters
#[derive(serde::Serialize, serde::Deserialize)]
enum ChatMessageRole {
    system,
    user,
    assistant,
}

#[derive(serde::Deserialize)]
struct LlmChatResponse {
    #[serde(default)]
    choices: Vec<LlmChatChoice>,
}

#[derive(serde::Deserialize)]
struct LlmChatChoice {
    message: Option<ChatMessage>,
}

impl LlmChatRequest {
    /// A fresh conversation consisting of one user message
    pub fn single_prompt(model_name: &str, prompt: String, temperature: f32) -> Self {
        Self {
            model: model_name.to_owned(),
            messages: vec![ChatMessage {
                role: ChatMessageRole::user,
                content: prompt,
            }],
            temperature,
        }
    }

    /// Send the request and return the content of the first choice.
    pub async fn post(
        &self,
        client: &reqwest::Client,
        url: &str,
        api_key: &str,
    ) -> Result<String, GenerationError> {
        log_internal!("Sending request to chat endpoint {}... ", url);
        let response = client
            .post(url)
            .bearer_auth(api_key)
            .json(self)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Status { status });
        }

        let response = response.json::<LlmChatResponse>().await?;
        log_internal!("Sending request to chat endpoint {}... done", url);

        response
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::MissingField { field: "choices" })?
            .message
            .ok_or(GenerationError::MissingField { field: "message" })
            .map(|message| message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_openai_shape() {
        let request = LlmChatRequest::single_prompt("llama", "hi".to_owned(), 0.5);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama",
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.5,
            })
        );
    }

    #[test]
    fn response_takes_first_choice() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": "hello"}}]}"#;
        let response: LlmChatResponse = serde_json::from_str(json).unwrap();
        let content = &response.choices[0].message.as_ref().unwrap().content;
        assert_eq!(content, "hello");

        let empty: LlmChatResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.choices.is_empty());
    }
}
