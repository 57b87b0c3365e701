#![allow(dead_code)]

pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
pub mod workers;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::DatabaseProxy;
use crate::engine::config::EngineConfig;
use crate::engine::retrieval::ContentSource;
use crate::engine::PersonalizationEngine;
use crate::services::embedding_provider::EmbeddingProvider;
use crate::services::llm_provider::LLMProvider;
use crate::services::passage_search::{CorpusSearch, EmptyCorpus};
use crate::state::AppState;

/// Wires the engine to its collaborators. Without a database the corpus
/// is empty and profiles live in memory only.
pub fn build_engine(db_proxy: Option<Arc<DatabaseProxy>>) -> Arc<PersonalizationEngine> {
    let content: Arc<dyn ContentSource> = match db_proxy.clone() {
        Some(proxy) => Arc::new(CorpusSearch::new(
            proxy,
            Arc::new(EmbeddingProvider::from_env()),
        )),
        None => Arc::new(EmptyCorpus),
    };
    let generator = Arc::new(LLMProvider::from_env());

    Arc::new(PersonalizationEngine::new(
        EngineConfig::from_env(),
        content,
        generator,
        db_proxy,
    ))
}

pub async fn create_app() -> axum::Router {
    let db_proxy = match db::DatabaseProxy::from_env().await {
        Ok(proxy) => Some(proxy),
        Err(_) => None,
    };

    let engine = build_engine(db_proxy.clone());
    let state = AppState::new(db_proxy, engine, None);

    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
