//! Tools backed by the RenderForm and OpenAI vision connectors.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_str, required_str, Tool, ToolOutput};
use crate::connectors::{OpenAiConnector, RenderFormConnector, RenderRequest};
use crate::core::errors::ApiError;

const DEFAULT_IMAGE_QUESTION: &str = "What is in this image?";

pub struct RenderImageTool {
    renderform: Arc<RenderFormConnector>,
}

impl RenderImageTool {
    pub fn new(renderform: Arc<RenderFormConnector>) -> Self {
        Self { renderform }
    }
}

#[async_trait]
impl Tool for RenderImageTool {
    fn name(&self) -> &str {
        "render_image"
    }

    fn description(&self) -> &str {
        "Render an image from a RenderForm template, optionally placing an image URL and a caption into named template containers. Returns the image URL."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "template_id": { "type": "string" },
                "image_url": { "type": "string" },
                "text": { "type": "string" },
                "image_tag": { "type": "string", "description": "Container receiving image_url" },
                "text_tag": { "type": "string", "description": "Container receiving text" },
                "formatting": { "type": "object", "description": "Extra template properties" }
            },
            "required": ["template_id"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        required_str(&args, "template_id")?;
        let request: RenderRequest = serde_json::from_value(args)
            .map_err(|e| ApiError::BadRequest(format!("Invalid render_image arguments: {}", e)))?;

        let href = self.renderform.render_template(&request).await?;
        Ok(ToolOutput {
            content: format!("Rendered image: {}", href),
            sources: vec![href],
        })
    }
}

pub struct DescribeImageTool {
    openai: Arc<OpenAiConnector>,
}

impl DescribeImageTool {
    pub fn new(openai: Arc<OpenAiConnector>) -> Self {
        Self { openai }
    }
}

#[async_trait]
impl Tool for DescribeImageTool {
    fn name(&self) -> &str {
        "describe_image"
    }

    fn description(&self) -> &str {
        "Ask a vision model a question about an image at a URL."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "question": { "type": "string" }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ApiError> {
        let url = required_str(&args, "url")?;
        let question = optional_str(&args, "question").unwrap_or(DEFAULT_IMAGE_QUESTION);

        let completion = self.openai.vision_prompt(question, url, None).await?;
        Ok(ToolOutput {
            content: completion.content,
            sources: vec![url.to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::settings::{OpenAiSettings, RenderFormSettings};
    use httpmock::prelude::*;

    #[tokio::test]
    async fn render_image_maps_arguments() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v2/render").json_body(json!({
                    "template": "tpl",
                    "data": { "photo.src": "https://img/cat.png", "caption.text": "Cat" }
                }));
                then.status(200).json_body(json!({ "href": "https://cdn/out.jpg" }));
            })
            .await;

        let connector = RenderFormConnector::from_settings(&RenderFormSettings {
            api_key: Some("rf".to_string()),
            base_url: server.base_url(),
            ..Default::default()
        })
        .unwrap();

        let output = RenderImageTool::new(Arc::new(connector))
            .execute(json!({
                "template_id": "tpl",
                "image_url": "https://img/cat.png",
                "image_tag": "photo",
                "text": "Cat",
                "text_tag": "caption"
            }))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(output.sources, vec!["https://cdn/out.jpg"]);
    }

    #[tokio::test]
    async fn describe_image_uses_vision_model() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_contains("gpt-4-vision-preview")
                    .body_contains("What is in this image?");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": "A cat." } }]
                }));
            })
            .await;

        let connector = OpenAiConnector::from_settings(&OpenAiSettings {
            api_key: Some("sk".to_string()),
            use_organization_id: false,
            base_url: server.base_url(),
            ..Default::default()
        })
        .unwrap();

        let output = DescribeImageTool::new(Arc::new(connector))
            .execute(json!({ "url": "https://img/cat.png" }))
            .await
            .unwrap();
        assert_eq!(output.content, "A cat.");

        let err = DescribeImageTool::new(Arc::new(
            OpenAiConnector::from_settings(&OpenAiSettings {
                api_key: Some("sk".to_string()),
                use_organization_id: false,
                ..Default::default()
            })
            .unwrap(),
        ))
        .execute(json!({}))
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
