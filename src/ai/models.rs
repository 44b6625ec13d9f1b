use serde::Serialize;

use super::client::Provider;

pub const CATALOG_VERSION: u32 = 1;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub const DEFAULT_EMBEDDING_MODEL: &str = "mxbai-embed-large";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    HostedCompatible,
    LocalInference,
}

/// Everything the app needs to know about one AI service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub id: &'static str,
    pub kind: ProviderKind,
    pub base_url: &'static str,
    pub default_model: &'static str,
    /// Fixed model list for services that have one; empty means any name is allowed.
    pub models: &'static [&'static str],
    pub embedding_model: &'static str,
    /// Model name prefixes that belong to this service; empty accepts any name.
    pub model_prefixes: &'static [&'static str],
}

impl ServiceInfo {
    /// Provider for this service, with an optional base URL override.
    pub fn provider(&self, api_key: Option<&str>, base_url: Option<&str>) -> Provider {
        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(self.base_url)
            .to_string();
        match self.kind {
            ProviderKind::HostedCompatible => Provider::HostedCompatible {
                base_url,
                api_key: api_key.unwrap_or_default().to_string(),
            },
            ProviderKind::LocalInference => Provider::LocalInference { base_url },
        }
    }
}

/// Versioned table of known services and their model defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCatalog {
    pub version: u32,
    pub services: Vec<ServiceInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            services: vec![
                ServiceInfo {
                    id: "openai",
                    kind: ProviderKind::HostedCompatible,
                    base_url: OPENAI_BASE_URL,
                    default_model: "gpt-4o",
                    models: &[],
                    embedding_model: "text-embedding-3-small",
                    model_prefixes: &["gpt-", "o1-"],
                },
                ServiceInfo {
                    id: "gemini",
                    kind: ProviderKind::HostedCompatible,
                    base_url: GEMINI_BASE_URL,
                    default_model: "gemini-2.0-flash",
                    models: &[
                        "gemini-2.5-pro-preview-06-05",
                        "gemini-2.5-flash-preview-05-20",
                        "gemini-2.0-flash",
                        "gemini-2.0-flash-lite",
                    ],
                    embedding_model: "text-embedding-004",
                    model_prefixes: &["gemini-"],
                },
                ServiceInfo {
                    id: "ollama",
                    kind: ProviderKind::LocalInference,
                    base_url: OLLAMA_BASE_URL,
                    default_model: "llama3",
                    models: &[],
                    embedding_model: DEFAULT_EMBEDDING_MODEL,
                    model_prefixes: &[],
                },
            ],
        }
    }
}

impl ModelCatalog {
    pub fn service(&self, id: &str) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn default_model(&self, id: &str) -> Option<&'static str> {
        self.service(id).map(|s| s.default_model)
    }

    /// Whether `model` can be sent to `service`. Unknown services accept nothing.
    pub fn is_model_for(&self, service: &str, model: &str) -> bool {
        match self.service(service) {
            Some(info) if info.model_prefixes.is_empty() => !model.trim().is_empty(),
            Some(info) => info.model_prefixes.iter().any(|p| model.starts_with(p)),
            None => false,
        }
    }

    /// The configured model if it fits the service, otherwise the service default.
    pub fn resolve_model<'a>(&self, service: &str, model: &'a str) -> Option<std::borrow::Cow<'a, str>> {
        if self.is_model_for(service, model) {
            return Some(std::borrow::Cow::Borrowed(model));
        }
        self.default_model(service)
            .map(|m| std::borrow::Cow::Owned(m.to_string()))
    }
}
