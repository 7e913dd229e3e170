//! services/api/src/adapters/vision_llm.rs
//!
//! Shared plumbing for the vision model adapters: sends a system prompt, a text
//! instruction and one or more inline images to an OpenAI chat model and
//! decodes its JSON reply.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use liveness_core::image::ImageFrame;
use liveness_core::ports::{PortError, PortResult};
use serde::de::DeserializeOwned;
use tracing::debug;

/// A thin wrapper around the OpenAI client bound to one vision-capable model.
#[derive(Clone)]
pub struct VisionClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl VisionClient {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Asks the model about `images` and parses its reply as `T`.
    pub async fn ask_json<T: DeserializeOwned>(
        &self,
        system_prompt: &str,
        instruction: &str,
        images: &[&ImageFrame],
    ) -> PortResult<T> {
        let build_err = |e: OpenAIError| PortError::Unexpected(e.to_string());

        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(instruction)
                .build()
                .map_err(build_err)?
                .into(),
        ];
        for image in images {
            debug!(bytes = image.len(), format = image.format().mime_type(), "Attaching image");
            parts.push(
                ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(
                        ImageUrlArgs::default()
                            .url(image.to_data_url())
                            .detail(ImageDetail::High)
                            .build()
                            .map_err(build_err)?,
                    )
                    .build()
                    .map_err(build_err)?
                    .into(),
            );
        }

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt)
                .build()
                .map_err(build_err)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(build_err)?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .temperature(0.0)
            .n(1)
            .build()
            .map_err(build_err)?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unavailable(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Vision model returned no content".to_string())
            })?;

        parse_reply(&content)
    }
}

/// Decodes a model reply, tolerating a surrounding markdown code fence.
pub fn parse_reply<T: DeserializeOwned>(content: &str) -> PortResult<T> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim())
        .map_err(|e| PortError::Unexpected(format!("Unparseable vision model reply: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Reply {
        ok: bool,
    }

    #[test]
    fn parses_plain_and_fenced_json() {
        assert_eq!(parse_reply::<Reply>(r#"{"ok": true}"#).unwrap(), Reply { ok: true });
        assert_eq!(
            parse_reply::<Reply>("```json\n{\"ok\": false}\n```").unwrap(),
            Reply { ok: false }
        );
        assert!(matches!(
            parse_reply::<Reply>("I think so"),
            Err(PortError::Unexpected(_))
        ));
    }
}
