use std::fmt;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::config::settings::RenderFormSettings;
use crate::core::errors::ApiError;

/// Image render request against a RenderForm template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderRequest {
    pub template_id: String,
    /// Container tag receiving `image_url` (`<tag>.src`).
    #[serde(default, alias = "image_tag")]
    pub img_container_tag: Option<String>,
    /// Container tag receiving `image_text` (`<tag>.text`).
    #[serde(default, alias = "text_tag")]
    pub text_container_tag: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, alias = "text")]
    pub image_text: Option<String>,
    /// Extra template properties, e.g. `{"outputExtension": ".jpg", "mytext.color": "..."}`.
    #[serde(default)]
    pub formatting: Map<String, Value>,
}

impl RenderRequest {
    fn render_data(&self) -> Map<String, Value> {
        let mut data = self.formatting.clone();

        if let (Some(url), Some(tag)) = (&self.image_url, &self.img_container_tag) {
            data.insert(format!("{}.src", tag), Value::String(url.clone()));
        }

        if let (Some(text), Some(tag)) = (&self.image_text, &self.text_container_tag) {
            data.insert(format!("{}.text", tag), Value::String(text.clone()));
        }

        data
    }
}

#[derive(Clone)]
pub struct RenderFormConnector {
    base_url: String,
    api_version: String,
    api_key: String,
    client: Client,
}

impl fmt::Debug for RenderFormConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderFormConnector")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl RenderFormConnector {
    pub fn from_settings(settings: &RenderFormSettings) -> Result<Self, ApiError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ApiError::NotConfigured(
                    "Missing x-api-key key in settings: connector.renderform".to_string(),
                )
            })?
            .to_string();

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_version: settings.api_version.clone(),
            api_key,
            client: Client::new(),
        })
    }

    pub async fn get_template(&self, template_id: &str) -> Result<Value, ApiError> {
        let url = format!(
            "{}/{}/my-templates/{}",
            self.base_url, self.api_version, template_id
        );
        let res = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(format!("Template {} not found", template_id)));
        }
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "RenderForm template error ({}): {}",
                status, text
            )));
        }

        res.json().await.map_err(ApiError::upstream)
    }

    /// Renders the template and returns the resulting image URL.
    pub async fn render_template(&self, request: &RenderRequest) -> Result<String, ApiError> {
        if request.template_id.trim().is_empty() {
            return Err(ApiError::BadRequest("template_id is required".to_string()));
        }

        let url = format!("{}/{}/render", self.base_url, self.api_version);
        let body = json!({
            "template": request.template_id,
            "data": Value::Object(request.render_data()),
        });

        let res = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("output", "image")
            .json(&body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "RenderForm render error ({}): {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::upstream)?;
        payload["href"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Upstream(format!("Missing href in response: {}", payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn connector(base_url: String) -> RenderFormConnector {
        RenderFormConnector::from_settings(&RenderFormSettings {
            api_key: Some("rf-key".to_string()),
            base_url,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn render_data_uses_each_container_tag() {
        let mut formatting = Map::new();
        formatting.insert("outputExtension".to_string(), json!(".jpg"));
        let request = RenderRequest {
            template_id: "tpl".to_string(),
            img_container_tag: Some("photo".to_string()),
            text_container_tag: Some("caption".to_string()),
            image_url: Some("https://img/cat.png".to_string()),
            image_text: Some("Cats!".to_string()),
            formatting,
        };

        let data = request.render_data();
        assert_eq!(data["photo.src"], "https://img/cat.png");
        assert_eq!(data["caption.text"], "Cats!");
        assert_eq!(data["outputExtension"], ".jpg");
        assert!(!data.contains_key("photo.text"));
    }

    #[test]
    fn missing_key_is_not_configured() {
        let err = RenderFormConnector::from_settings(&RenderFormSettings::default()).unwrap_err();
        assert!(matches!(err, ApiError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn render_returns_href() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v2/render")
                    .header("x-api-key", "rf-key")
                    .json_body(json!({ "template": "tpl", "data": { "caption.text": "Hi" } }));
                then.status(200)
                    .json_body(json!({ "requestId": "r1", "href": "https://cdn.renderform.io/r1.jpg" }));
            })
            .await;

        let href = connector(server.base_url())
            .render_template(&RenderRequest {
                template_id: "tpl".to_string(),
                text_container_tag: Some("caption".to_string()),
                image_text: Some("Hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(href, "https://cdn.renderform.io/r1.jpg");
    }

    #[tokio::test]
    async fn get_template_maps_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v2/my-templates/missing");
                then.status(404);
            })
            .await;

        let err = connector(server.base_url())
            .get_template("missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
