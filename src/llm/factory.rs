//! Profile name to provider instance.
//!
//! The factory validates a profile the first time it is asked for, expands
//! `${VAR}` credentials from the environment and keeps the instance for the
//! rest of the invocation.

use super::anthropic::{self, AnthropicProvider};
use super::gemini::{self, GeminiProvider};
use super::local::LocalProvider;
use super::openai::{self, OpenAiProvider};
use super::{AdapterSettings, Provider, ProviderInfo, Vendor};
use crate::config::{Config, EnvLookup, Profile, expand_env_with, process_env};
use crate::error::ProviderError;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// One row of `config list-providers`.
#[derive(Debug)]
pub struct ProviderListing {
    pub profile: String,
    pub is_default: bool,
    pub vendor: String,
    pub model: String,
    pub result: Result<ProviderInfo, ProviderError>,
}

pub struct ProviderFactory {
    config: Config,
    http: Arc<dyn HttpClient>,
    env: EnvLookup,
    memo: Mutex<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderFactory {
    /// Factory over the real network and process environment.
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, Arc::new(ReqwestHttpClient::new()), process_env())
    }

    pub fn with_parts(config: Config, http: Arc<dyn HttpClient>, env: EnvLookup) -> Self {
        Self {
            config,
            http,
            env,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the provider for `name`; `""` and `"default"` mean the default profile.
    ///
    /// Repeated calls for the same profile return the same instance.
    pub fn get_provider(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        let resolved = self.config.resolve_profile_name(name).to_string();

        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(provider) = memo.get(&resolved) {
            return Ok(Arc::clone(provider));
        }

        let profile = self
            .config
            .profile(&resolved)
            .map_err(|e| ProviderError::invalid_input(e.to_string()))?;
        let provider = self.build(&resolved, profile)?;
        debug!("Built provider for profile '{}' ({})", resolved, profile.provider);
        memo.insert(resolved, Arc::clone(&provider));
        Ok(provider)
    }

    /// Validates `profile` and constructs its adapter without memoizing it.
    pub fn build(&self, name: &str, profile: &Profile) -> Result<Arc<dyn Provider>, ProviderError> {
        let (vendor, settings) = self.resolve_settings(name, profile)?;
        let http = Arc::clone(&self.http);
        let provider: Arc<dyn Provider> = match vendor {
            Vendor::OpenAi => Arc::new(OpenAiProvider::new(settings, http)),
            Vendor::Anthropic => Arc::new(AnthropicProvider::new(settings, http)),
            Vendor::Gemini => Arc::new(GeminiProvider::new(settings, http)),
            Vendor::Local => Arc::new(LocalProvider::new(settings, http)),
        };
        Ok(provider)
    }

    /// Info for every profile, in name order. One broken profile never hides the rest.
    pub fn list_providers(&self) -> Vec<ProviderListing> {
        self.config
            .profiles
            .iter()
            .map(|(name, profile)| {
                let result = self.get_provider(name).map(|p| p.info());
                if let Err(e) = &result {
                    warn!("Profile '{}' is not usable: {}", name, e);
                }
                ProviderListing {
                    profile: name.clone(),
                    is_default: *name == self.config.default_profile,
                    vendor: profile.provider.clone(),
                    model: profile.model.clone(),
                    result,
                }
            })
            .collect()
    }

    fn resolve_settings(&self, name: &str, profile: &Profile) -> Result<(Vendor, AdapterSettings), ProviderError> {
        let vendor: Vendor = profile
            .provider
            .parse()
            .map_err(|e: String| ProviderError::invalid_input(format!("profile '{name}': {e}")))?;

        if profile.max_tokens == 0 {
            return Err(ProviderError::invalid_input(format!(
                "profile '{name}': max_tokens must be positive"
            )));
        }
        if !(0.0..=2.0).contains(&profile.temperature) {
            return Err(ProviderError::invalid_input(format!(
                "profile '{name}': temperature {} is outside [0, 2]",
                profile.temperature
            )));
        }
        if !vendor.accepts_model(&profile.model) {
            return Err(ProviderError::invalid_input(format!(
                "profile '{name}': model '{}' is not supported by {vendor} (supported: {})",
                profile.model,
                vendor.models().join(", ")
            )));
        }

        let lookup = |var: &str| (self.env)(var);
        let (api_key, missing_key_vars) = expand_env_with(&profile.api_key, lookup);
        let endpoint = profile
            .endpoint
            .as_deref()
            .map(|e| expand_env_with(e, lookup).0)
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        if vendor.is_hosted() && api_key.trim().is_empty() {
            let hint = if missing_key_vars.is_empty() {
                String::new()
            } else {
                format!(" (set {})", missing_key_vars.join(", "))
            };
            return Err(ProviderError::auth(format!(
                "profile '{name}': {vendor} requires an API key{hint}"
            )));
        }

        let base_url = match (vendor, endpoint) {
            (_, Some(endpoint)) => endpoint,
            (Vendor::OpenAi, None) => openai::DEFAULT_BASE_URL.to_string(),
            (Vendor::Anthropic, None) => anthropic::DEFAULT_BASE_URL.to_string(),
            (Vendor::Gemini, None) => gemini::DEFAULT_BASE_URL.to_string(),
            (Vendor::Local, None) => {
                return Err(ProviderError::invalid_input(format!(
                    "profile '{name}': the local provider requires an endpoint"
                )));
            }
        };

        Ok((
            vendor,
            AdapterSettings {
                api_key: api_key.trim().to_string(),
                model: profile.model.clone(),
                max_tokens: profile.max_tokens,
                temperature: profile.temperature,
                base_url,
            },
        ))
    }
}
