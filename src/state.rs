use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::AgentRunner;
use crate::connectors::Connectors;
use crate::core::config::{AppPaths, ConfigService, Settings};
use crate::core::db;
use crate::core::errors::ApiError;
use crate::core::security::ApiToken;
use crate::embedding::EmbeddingService;
use crate::history::HistoryStore;
use crate::llm::{EmbeddingProvider, LlmProvider, LlmService};
use crate::metrics::MetricsRecorder;
use crate::rag::{KnowledgeBase, SqliteRagStore};
use crate::records::{DatasetLoader, RecordStore};
use crate::tools::{
    CreateRecordTool, DeleteRecordTool, DescribeImageTool, GetRecordTool, ListDatasetsTool,
    ListRecordsTool, RenderImageTool, SearchDocumentsTool, ToolRegistry, UpdateRecordTool,
};

/// Externally supplied pieces of the application state.
///
/// `initialize` derives these from the config file; tests build them with
/// fake providers.
pub struct StateParts {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub api_token: ApiToken,
    pub connectors: Connectors,
    pub llm_providers: Vec<Arc<dyn LlmProvider>>,
    pub embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
}

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: ConfigService,
    pub api_token: ApiToken,
    pub history: HistoryStore,
    pub records: RecordStore,
    pub loader: Arc<DatasetLoader>,
    /// `None` when no embedding provider is configured.
    pub knowledge: Option<Arc<KnowledgeBase>>,
    pub connectors: Connectors,
    pub llm: LlmService,
    pub tools: ToolRegistry,
    pub runner: AgentRunner,
    pub metrics: MetricsRecorder,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize() -> anyhow::Result<Arc<Self>> {
        let paths = Arc::new(AppPaths::new());
        let config = ConfigService::new(paths.clone());
        let settings = config.load_settings()?;
        let connectors = Connectors::from_settings(&settings.connector);

        let mut llm_providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        if let Some(openai) = &connectors.openai {
            llm_providers.push(openai.clone());
        }
        if let Some(huggingface) = &connectors.huggingface {
            llm_providers.push(huggingface.clone());
        }
        if llm_providers.is_empty() {
            tracing::warn!("No LLM provider configured; chat endpoints will return 503");
        }

        let embedding_provider = select_embedding_provider(&settings, &connectors);

        let parts = StateParts {
            paths,
            config,
            api_token: ApiToken::from_env(),
            connectors,
            llm_providers,
            embedding_provider,
        };
        Ok(Self::from_parts(parts).await?)
    }

    pub async fn from_parts(parts: StateParts) -> Result<Arc<Self>, ApiError> {
        let StateParts {
            paths,
            config,
            api_token,
            connectors,
            llm_providers,
            embedding_provider,
        } = parts;

        let settings = config.load_settings()?;
        let metrics = MetricsRecorder::new();

        let pool = db::connect(&paths.db_path).await?;
        let history = HistoryStore::with_pool(pool.clone()).await?;
        let records = RecordStore::with_pool(pool).await?;
        let loader = Arc::new(DatasetLoader::new(records.clone(), &settings.ingest)?);

        let llm = llm_providers
            .into_iter()
            .fold(LlmService::new(metrics.clone()), LlmService::with_provider);

        let knowledge = match embedding_provider {
            Some(provider) => {
                let store = SqliteRagStore::with_path(&paths.vector_db_path).await?;
                let embeddings = EmbeddingService::new(
                    provider,
                    settings.rag.embedding_batch_size,
                    metrics.clone(),
                );
                let knowledge =
                    KnowledgeBase::new(Arc::new(store), embeddings, &settings.rag, &settings.ingest)?;
                if knowledge.sync_embedding_model().await? {
                    tracing::warn!("Embedding model changed; stored vectors were cleared");
                }
                Some(Arc::new(knowledge))
            }
            None => {
                tracing::warn!("No embedding provider configured; document search is disabled");
                None
            }
        };

        let tools = build_tools(&metrics, &records, knowledge.as_ref(), &connectors);
        tracing::info!("Registered tools: {:?}", tools.names());
        let runner = AgentRunner::new(llm.clone(), tools.clone(), knowledge.clone());

        Ok(Arc::new(AppState {
            paths,
            config,
            api_token,
            history,
            records,
            loader,
            knowledge,
            connectors,
            llm,
            tools,
            runner,
            metrics,
            started_at: Utc::now(),
        }))
    }

    /// Per-request settings; edits through `/api/config` apply immediately.
    pub fn settings(&self) -> Result<Settings, ApiError> {
        self.config.load_settings()
    }

    pub fn knowledge(&self) -> Result<&Arc<KnowledgeBase>, ApiError> {
        self.knowledge.as_ref().ok_or_else(|| {
            ApiError::NotConfigured("no embedding provider is configured".to_string())
        })
    }
}

fn select_embedding_provider(
    settings: &Settings,
    connectors: &Connectors,
) -> Option<Arc<dyn EmbeddingProvider>> {
    match settings.rag.embedding_provider.as_str() {
        "openai" => connectors
            .openai
            .clone()
            .map(|openai| openai as Arc<dyn EmbeddingProvider>),
        "huggingface" => connectors
            .huggingface
            .clone()
            .filter(|hf| hf.embedding_model().is_some())
            .map(|hf| hf as Arc<dyn EmbeddingProvider>),
        other => {
            tracing::warn!("Unknown embedding provider '{}'", other);
            None
        }
    }
}

fn build_tools(
    metrics: &MetricsRecorder,
    records: &RecordStore,
    knowledge: Option<&Arc<KnowledgeBase>>,
    connectors: &Connectors,
) -> ToolRegistry {
    let mut tools = ToolRegistry::new(metrics.clone());

    if let Some(knowledge) = knowledge {
        tools.register(Arc::new(SearchDocumentsTool::new(knowledge.clone())));
    }

    tools.register(Arc::new(ListDatasetsTool::new(records.clone())));
    tools.register(Arc::new(ListRecordsTool::new(records.clone())));
    tools.register(Arc::new(GetRecordTool::new(records.clone())));
    tools.register(Arc::new(CreateRecordTool::new(records.clone())));
    tools.register(Arc::new(UpdateRecordTool::new(records.clone())));
    tools.register(Arc::new(DeleteRecordTool::new(records.clone(), knowledge.cloned())));

    if let Some(renderform) = &connectors.renderform {
        tools.register(Arc::new(RenderImageTool::new(renderform.clone())));
    }
    if let Some(openai) = &connectors.openai {
        tools.register(Arc::new(DescribeImageTool::new(openai.clone())));
    }

    tools
}
