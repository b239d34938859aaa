//! Clients for the hosted services the pipeline talks to.
//!
//! Each connector is optional: a missing `connector.<name>` section or key
//! leaves it disabled and the features depending on it unavailable.

pub mod huggingface;
pub mod openai;
pub mod renderform;

use std::sync::Arc;

pub use huggingface::HuggingFaceConnector;
pub use openai::OpenAiConnector;
pub use renderform::{RenderFormConnector, RenderRequest};

use crate::core::config::settings::ConnectorSettings;
use crate::core::errors::ApiError;

#[derive(Debug, Clone, Default)]
pub struct Connectors {
    pub openai: Option<Arc<OpenAiConnector>>,
    pub huggingface: Option<Arc<HuggingFaceConnector>>,
    pub renderform: Option<Arc<RenderFormConnector>>,
}

impl Connectors {
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        Self {
            openai: build("openai", settings.openai.as_ref(), OpenAiConnector::from_settings),
            huggingface: build(
                "huggingface",
                settings.huggingface.as_ref(),
                HuggingFaceConnector::from_settings,
            ),
            renderform: build(
                "renderform",
                settings.renderform.as_ref(),
                RenderFormConnector::from_settings,
            ),
        }
    }

    pub fn configured(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.openai.is_some() {
            names.push("openai");
        }
        if self.huggingface.is_some() {
            names.push("huggingface");
        }
        if self.renderform.is_some() {
            names.push("renderform");
        }
        names
    }
}

fn build<S, C>(
    name: &str,
    settings: Option<&S>,
    ctor: impl FnOnce(&S) -> Result<C, ApiError>,
) -> Option<Arc<C>> {
    let settings = settings?;
    match ctor(settings) {
        Ok(connector) => {
            tracing::info!("Connector '{}' configured", name);
            Some(Arc::new(connector))
        }
        Err(err) => {
            tracing::warn!("Connector '{}' disabled: {}", name, err);
            None
        }
    }
}
