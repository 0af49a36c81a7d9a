//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::types::Generation;

/// Configuration for one worker generation.
///
/// Built once at process start and passed to the classifier, the fetch
/// strategies and the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuideConfig {
    /// Application name, prefix of every partition name
    pub app_name: String,

    /// Build version reported to sessions
    pub version: String,

    /// Partition tag of release builds
    pub generation: String,

    /// Scope the worker controls; relative manifest paths resolve against it
    pub scope: Url,

    /// Force development mode on or off; detected from `scope` when unset
    pub dev_mode: Option<bool>,

    /// Assets cached at install time
    pub static_assets: Vec<String>,

    /// JSON documents cached at install time
    pub api_endpoints: Vec<String>,

    /// Assets whose presence is checked after install
    pub critical_assets: Vec<String>,

    /// Directory holding the data documents
    pub data_prefix: String,

    /// Directory holding translation documents
    pub i18n_prefix: String,

    /// Activate right after install instead of waiting for the sessions
    pub skip_waiting_on_install: bool,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            app_name: "informatiktag".to_string(),
            version: "1.0.1".to_string(),
            generation: "v1".to_string(),
            scope: Url::parse("https://informatiktag.example/").expect("static URL is valid"),
            dev_mode: None,
            static_assets: to_strings(&[
                "/",
                "index.html",
                "js/app.js",
                "assets/css/style.css",
                "assets/icons/regular/style.css",
                "assets/icons/fill/style.css",
                "assets/favicon.png",
                "assets/logo_uni_oldenburg_it_department_white.png",
                "assets/logo_uni_oldenburg_it_department.png",
                "assets/logo-infoday.png",
                "assets/floorplan.png",
                "assets/background_gradient.svg",
                "assets/fonts/JetBrainsMono-Regular.ttf",
                "assets/fonts/JetBrainsMono-Bold.ttf",
                "assets/fonts/NotoSans-Regular.ttf",
                "assets/fonts/NotoSans-Bold.ttf",
                "assets/icons/regular/Phosphor.woff2",
                "assets/icons/regular/Phosphor.woff",
                "assets/icons/regular/Phosphor.ttf",
                "assets/icons/fill/Phosphor-Fill.woff2",
                "assets/icons/fill/Phosphor-Fill.woff",
                "assets/icons/fill/Phosphor-Fill.ttf",
            ]),
            api_endpoints: to_strings(&[
                "data/events.json",
                "data/theme.json",
                "data/i18n/de.json",
                "data/stations.json",
                "data/legend.json",
            ]),
            critical_assets: to_strings(&[
                "assets/floorplan.png",
                "assets/logo_uni_oldenburg_it_department.png",
                "assets/favicon.png",
            ]),
            data_prefix: "data/".to_string(),
            i18n_prefix: "data/i18n/".to_string(),
            skip_waiting_on_install: true,
        }
    }
}

impl GuideConfig {
    /// Minimal configuration for `scope` with empty manifests.
    pub fn for_scope(app_name: &str, scope: Url) -> Self {
        Self {
            app_name: app_name.to_string(),
            scope,
            static_assets: Vec::new(),
            api_endpoints: Vec::new(),
            critical_assets: Vec::new(),
            ..Default::default()
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate a JSON configuration. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker cannot operate with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.app_name.is_empty() {
            return Err(CoreError::config("app_name must not be empty"));
        }
        if self.generation.is_empty() || self.version.is_empty() {
            return Err(CoreError::config("generation and version must not be empty"));
        }
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(CoreError::config(format!(
                "scope must be an http(s) URL: {}",
                self.scope
            )));
        }
        for path in self
            .static_assets
            .iter()
            .chain(&self.api_endpoints)
            .chain(&self.critical_assets)
        {
            self.resolve(path)?;
        }
        Ok(())
    }

    /// Development mode: explicit setting, else a local host or explicit port.
    pub fn is_development(&self) -> bool {
        self.dev_mode.unwrap_or_else(|| detect_development(&self.scope))
    }

    /// Naming for the generation this configuration describes.
    pub fn current_generation(&self) -> Generation {
        if self.is_development() {
            Generation::development(&self.app_name)
        } else {
            Generation::release(&self.app_name, &self.generation, &self.version)
        }
    }

    /// Resolve a manifest path against the scope.
    pub fn resolve(&self, path: &str) -> CoreResult<Url> {
        Ok(self.scope.join(path)?)
    }
}

/// `localhost`, `127.0.0.1`, or any non-default port counts as development.
pub fn detect_development(scope: &Url) -> bool {
    matches!(scope.host_str(), Some("localhost") | Some("127.0.0.1")) || scope.port().is_some()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
