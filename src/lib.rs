//! Codesmith - code generation across interchangeable LLM backends.
//!
//! This library turns a natural-language prompt into source code using one of
//! several chat backends and learns from how users rate the results. It
//! provides:
//!
//! - **Provider routing** to OpenAI, Groq or a local Ollama server
//! - **Model selection** from each backend's advertised models
//! - **Output cleanup** that turns chatty model replies into plain code
//! - **Streaming** with cancellation
//! - **Feedback learning** that summarizes ratings and keeps hints per language
//!
//! # Architecture
//!
//! - [`config`] - Configuration management (API keys, endpoints, thresholds)
//! - [`orchestrator`] - Registry of providers and request dispatch
//! - [`adapter`] - The one provider adapter: model choice, fallback, extraction
//! - [`transport`] - Capability interface each backend implements
//! - [`openai_compat`], [`ollama`], [`mock`] - Backend transports
//! - [`model_selector`] - Per-backend model preference tables
//! - [`extractor`] - Raw model text to code
//! - [`prompts`] - Prompt templates
//! - [`stream`] - Cancellable generation streams
//! - [`store`] - Persistence of outputs, ratings and learned patterns
//! - [`learning`] - Trends and pattern maintenance
//! - [`suggestions`] - Hints derived from learned patterns
//! - [`language`] - Language detection from the prompt
//! - [`providers`] - Shared dependency injection traits
//! - [`http_client`] - HTTP client abstraction
//!
//! # Example
//!
//! ```ignore
//! use codesmith::config::Config;
//! use codesmith::generation::GenerationRequest;
//! use codesmith::http_client::ReqwestHttpClient;
//! use codesmith::orchestrator::GenerationOrchestrator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let http = Arc::new(ReqwestHttpClient::new(config.http.timeouts()));
//!     let orchestrator = GenerationOrchestrator::from_config(&config, http);
//!
//!     let request = GenerationRequest::new("parse an ISO date", "rust");
//!     let result = orchestrator.generate(&request, None).await;
//!     if result.success {
//!         println!("{}", result.code);
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod http_client;
pub mod language;
pub mod learning;
pub mod mock;
pub mod model_selector;
pub mod ollama;
pub mod openai_compat;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod store;
pub mod stream;
pub mod suggestions;
pub mod transport;
