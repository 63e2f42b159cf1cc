//! LLM provider adapters and the fallback gateway for aula.
//!
//! Each backend is adapted to the narrow `Provider` trait from `aula-core`;
//! the `ModelGateway` composes an ordered list of them and commits to
//! whichever emits the first output token.

pub mod anthropic;
pub mod gateway;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use gateway::{CommittedProvider, GatewayStream, ModelGateway};
pub use openai_compat::OpenAiCompatProvider;

use aula_config::ProviderConfig;
use aula_core::provider::Provider;
use std::sync::Arc;

/// Build a provider adapter from one config entry.
///
/// Unknown kinds are rejected by `PipelineConfig::validate`, so this only
/// sees "anthropic" and "openai".
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();
    match config.kind.as_str() {
        "anthropic" => {
            let mut p = AnthropicProvider::new(&config.name, api_key);
            if let Some(url) = &config.api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
        _ => {
            let mut p = OpenAiCompatProvider::new(&config.name, api_key);
            if let Some(url) = &config.api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
    }
}
