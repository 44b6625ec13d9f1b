use serde::{Deserialize, Serialize};

use crate::ai::models::{ModelCatalog, DEFAULT_EMBEDDING_MODEL};
use crate::ai::{Provider, DEFAULT_PROMPT};
use crate::error::{PileError, Result};
use crate::index::EntryOrder;
use crate::store::EntryStore;

/// Per-pile settings, relative to the pile root.
pub const SETTINGS_FILE: &str = ".pile/settings.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Newest,
    RecentlyUpdated,
}

impl SortOrder {
    pub fn entry_order(self) -> EntryOrder {
        match self {
            Self::Newest => EntryOrder::RootsByCreation,
            Self::RecentlyUpdated => EntryOrder::AllByRecency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PileSettings {
    pub ai_service: String,
    pub model: String,
    pub embedding_model: String,
    /// Overrides the service's base URL (proxies, self-hosted gateways).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub prompt: String,
    pub sort_order: SortOrder,
    pub theme: String,
}

impl Default for PileSettings {
    fn default() -> Self {
        Self {
            ai_service: "openai".to_string(),
            model: "gpt-4o".to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: None,
            prompt: DEFAULT_PROMPT.to_string(),
            sort_order: SortOrder::default(),
            theme: "light".to_string(),
        }
    }
}

impl PileSettings {
    /// Read the settings file. A missing file means defaults.
    pub fn load<S: EntryStore + ?Sized>(store: &S) -> Result<Self> {
        match store.read_file(SETTINGS_FILE) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| PileError::parse(SETTINGS_FILE, e)),
            Err(e) if e.is_not_found() => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn save<S: EntryStore + ?Sized>(&self, store: &S) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        store.write_file(SETTINGS_FILE, &json)
    }

    /// Configured model, or the service default when it belongs to another service.
    pub fn resolved_model(&self, catalog: &ModelCatalog) -> String {
        catalog
            .resolve_model(&self.ai_service, &self.model)
            .map(|m| m.into_owned())
            .unwrap_or_else(|| self.model.clone())
    }

    /// Completion provider for the configured service. Unknown services fall
    /// back to a hosted OpenAI-compatible endpoint at `base_url`.
    pub fn provider(&self, catalog: &ModelCatalog, api_key: Option<&str>) -> Result<Provider> {
        match catalog.service(&self.ai_service) {
            Some(info) => Ok(info.provider(api_key, self.base_url.as_deref())),
            None => {
                let base_url = self
                    .base_url
                    .clone()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        PileError::Service(format!("unknown AI service '{}'", self.ai_service))
                    })?;
                Ok(Provider::HostedCompatible {
                    base_url,
                    api_key: api_key.unwrap_or_default().to_string(),
                })
            }
        }
    }
}
