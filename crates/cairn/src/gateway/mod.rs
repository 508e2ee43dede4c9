//! Model gateway
//!
//! Abstracts zero, one or many language-model providers behind a single
//! `complete(prompt, strategy)` call. Callers branch on the outcome only
//! (completion or `NoProviderAvailable`), never on which provider answered.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::future::join_all;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{CairnError, Result};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("no provider available: {0}")]
    NoProviderAvailable(String),
    #[error("provider {provider} failed: {message}")]
    ProviderFailed { provider: String, message: String },
    #[error("model call timed out")]
    Timeout,
}

impl From<GatewayError> for CairnError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NoProviderAvailable(msg) => CairnError::NoProviderAvailable(msg),
            other => CairnError::NoProviderAvailable(other.to_string()),
        }
    }
}

/// How the gateway uses its providers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "models", rename_all = "snake_case")]
pub enum Strategy {
    /// No models configured; every call is `NoProviderAvailable`
    None,
    Single(String),
    /// Try in order, first success wins
    Fallback(Vec<String>),
    /// Ask all concurrently; the first success in declared order wins
    Ensemble(Vec<String>),
}

impl Strategy {
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let models = config.models.clone();
        match config.mode.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Strategy::None),
            "single" => models
                .into_iter()
                .next()
                .map(Strategy::Single)
                .ok_or_else(|| CairnError::Config("gateway mode single needs a model".to_string())),
            "fallback" if !models.is_empty() => Ok(Strategy::Fallback(models)),
            "ensemble" if !models.is_empty() => Ok(Strategy::Ensemble(models)),
            "fallback" | "ensemble" => Err(CairnError::Config(format!(
                "gateway mode {} needs at least one model",
                config.mode
            ))),
            other => Err(CairnError::Config(format!("unknown gateway mode: {other}"))),
        }
    }

    pub fn models(&self) -> &[String] {
        match self {
            Strategy::None => &[],
            Strategy::Single(model) => std::slice::from_ref(model),
            Strategy::Fallback(models) | Strategy::Ensemble(models) => models,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub model_used: String,
    /// USD
    pub cost: f64,
    pub latency_ms: u64,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub metadata: CompletionMetadata,
}

/// Raw provider answer; the gateway adds timing and caching
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub cost: f64,
}

/// A single language-model backend
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Model name used in strategies
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn complete(&self, prompt: &str) -> std::result::Result<ProviderResponse, GatewayError>;
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        strategy: &Strategy,
    ) -> std::result::Result<Completion, GatewayError>;
}

/// Gateway over a set of registered providers, with an LRU response cache
pub struct ProviderGateway {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    cache: Mutex<LruCache<(Strategy, String), Completion>>,
}

impl ProviderGateway {
    pub fn new(cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            providers: HashMap::new(),
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn ModelProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    fn cached(&self, key: &(Strategy, String)) -> Option<Completion> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    fn remember(&self, key: (Strategy, String), completion: &Completion) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key, completion.clone());
    }

    /// Registered and currently available providers, in strategy order
    async fn usable(&self, models: &[String]) -> Vec<Arc<dyn ModelProvider>> {
        let mut usable = Vec::new();
        for model in models {
            let Some(provider) = self.providers.get(model) else {
                warn!(model = %model, "Strategy names an unregistered model");
                continue;
            };
            if provider.is_available().await {
                usable.push(provider.clone());
            } else {
                debug!(model = %model, "Provider unavailable");
            }
        }
        usable
    }

    async fn call(
        provider: &Arc<dyn ModelProvider>,
        prompt: &str,
    ) -> std::result::Result<Completion, GatewayError> {
        let started = Instant::now();
        let response = provider.complete(prompt).await?;
        Ok(Completion {
            text: response.text,
            metadata: CompletionMetadata {
                model_used: provider.name().to_string(),
                cost: response.cost,
                latency_ms: started.elapsed().as_millis() as u64,
                cached: false,
            },
        })
    }

    async fn run_fallback(
        &self,
        providers: &[Arc<dyn ModelProvider>],
        prompt: &str,
    ) -> std::result::Result<Completion, GatewayError> {
        let mut last_error = None;
        for provider in providers {
            match Self::call(provider, prompt).await {
                Ok(completion) => {
                    debug!(model = provider.name(), "Provider succeeded");
                    return Ok(completion);
                }
                Err(e) => {
                    warn!(model = provider.name(), error = %e, "Provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GatewayError::NoProviderAvailable("no usable provider".to_string())
        }))
    }

    async fn run_ensemble(
        &self,
        providers: &[Arc<dyn ModelProvider>],
        prompt: &str,
    ) -> std::result::Result<Completion, GatewayError> {
        let results = join_all(providers.iter().map(|p| Self::call(p, prompt))).await;
        let total_cost: f64 = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|c| c.metadata.cost)
            .sum();

        let mut last_error = None;
        for result in results {
            match result {
                Ok(mut completion) => {
                    completion.metadata.cost = total_cost;
                    return Ok(completion);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GatewayError::NoProviderAvailable("no usable provider".to_string())
        }))
    }
}

#[async_trait]
impl ModelGateway for ProviderGateway {
    async fn complete(
        &self,
        prompt: &str,
        strategy: &Strategy,
    ) -> std::result::Result<Completion, GatewayError> {
        if *strategy == Strategy::None {
            return Err(GatewayError::NoProviderAvailable(
                "gateway strategy is none".to_string(),
            ));
        }

        let key = (strategy.clone(), prompt.to_string());
        if let Some(mut hit) = self.cached(&key) {
            hit.metadata.cost = 0.0;
            hit.metadata.latency_ms = 0;
            hit.metadata.cached = true;
            return Ok(hit);
        }

        let providers = self.usable(strategy.models()).await;
        if providers.is_empty() {
            return Err(GatewayError::NoProviderAvailable(format!(
                "none of {:?} is available",
                strategy.models()
            )));
        }

        let completion = match strategy {
            Strategy::Ensemble(_) => self.run_ensemble(&providers, prompt).await?,
            _ => self.run_fallback(&providers, prompt).await?,
        };
        self.remember(key, &completion);
        Ok(completion)
    }
}
