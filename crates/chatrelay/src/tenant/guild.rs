//! Per-guild configuration with defaults on first access.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::store::{DashMapStore, KeyedStore};

/// Tenant key for direct messages and other unscoped sessions.
pub const DIRECT_TENANT: &str = "direct";

pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b:free";
pub const DEFAULT_RATE_LIMIT_MAX: u32 = 20;
pub const MIN_RATE_LIMIT_MAX: u32 = 1;
pub const MAX_RATE_LIMIT_MAX: u32 = 100;

/// Policy for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSettings {
    pub current_model: String,
    pub rate_limit_max: u32,
    pub memory_share_enabled: bool,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            current_model: DEFAULT_MODEL.to_string(),
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            memory_share_enabled: true,
        }
    }
}

/// A partial update of [`GuildSettings`], applied atomically.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSettingsPatch {
    #[serde(default)]
    pub current_model: Option<String>,
    #[serde(default)]
    pub rate_limit_max: Option<u32>,
    #[serde(default)]
    pub memory_share_enabled: Option<bool>,
}

/// Clamp a rate limit into the accepted range.
pub fn clamp_rate_limit(value: u32) -> u32 {
    value.clamp(MIN_RATE_LIMIT_MAX, MAX_RATE_LIMIT_MAX)
}

/// Guild settings keyed by tenant id.
#[derive(Clone)]
pub struct GuildConfigStore {
    store: Arc<dyn KeyedStore<GuildSettings>>,
    defaults: GuildSettings,
}

impl GuildConfigStore {
    pub fn new(store: Arc<dyn KeyedStore<GuildSettings>>, mut defaults: GuildSettings) -> Self {
        defaults.rate_limit_max = clamp_rate_limit(defaults.rate_limit_max);
        Self { store, defaults }
    }

    pub fn in_memory(defaults: GuildSettings) -> Self {
        Self::new(Arc::new(DashMapStore::new()), defaults)
    }

    /// Settings for `key`, created with defaults on first access.
    pub fn get(&self, key: &str) -> GuildSettings {
        let mut current = None;
        self.store.update(key, &|| self.defaults.clone(), &mut |settings| {
            current = Some(settings.clone());
        });
        current.unwrap_or_else(|| self.defaults.clone())
    }

    pub fn set_model(&self, key: &str, model: impl Into<String>) -> GuildSettings {
        self.apply(
            key,
            GuildSettingsPatch {
                current_model: Some(model.into()),
                ..Default::default()
            },
        )
    }

    /// Set the per-user limit, clamped to `[1, 100]`.
    pub fn set_rate_limit_max(&self, key: &str, limit: u32) -> GuildSettings {
        self.apply(
            key,
            GuildSettingsPatch {
                rate_limit_max: Some(limit),
                ..Default::default()
            },
        )
    }

    pub fn set_memory_share_enabled(&self, key: &str, enabled: bool) -> GuildSettings {
        self.apply(
            key,
            GuildSettingsPatch {
                memory_share_enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    /// Apply every field of `patch` in one update and return the result.
    pub fn apply(&self, key: &str, patch: GuildSettingsPatch) -> GuildSettings {
        let mut patch = Some(patch);
        let mut updated = None;
        self.store.update(key, &|| self.defaults.clone(), &mut |settings| {
            let Some(patch) = patch.take() else {
                return;
            };
            // Build the replacement first so the entry is swapped in one step.
            let mut next = settings.clone();
            if let Some(model) = patch.current_model {
                next.current_model = model;
            }
            if let Some(limit) = patch.rate_limit_max {
                next.rate_limit_max = clamp_rate_limit(limit);
            }
            if let Some(enabled) = patch.memory_share_enabled {
                next.memory_share_enabled = enabled;
            }
            *settings = next.clone();
            updated = Some(next);
        });
        updated.unwrap_or_else(|| self.get(key))
    }

    /// Every tenant key seen so far, sorted.
    pub fn list_keys(&self) -> Vec<String> {
        let mut keys = self.store.keys();
        keys.sort();
        keys
    }
}
