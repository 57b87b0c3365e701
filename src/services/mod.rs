#![allow(dead_code)]

pub mod embedding_provider;
pub mod llm_provider;
pub mod passage_search;
pub mod trend_analysis;
