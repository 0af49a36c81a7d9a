//! Request classification.
//!
//! Decides which strategy, if any, answers a request. Rules are applied in
//! priority order: unsafe method, static asset, api data, navigation.
//! A URL that is both a static asset and api data is a static asset.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use url::Url;

use guidecache_core::GuideConfig;

use crate::fetch::{cache_key, FetchRequest};
use crate::Result;

/// File extensions served as static assets.
pub const STATIC_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "svg", "ico", "webp", "css", "js", "woff", "woff2", "ttf",
];

/// Extensions fetched network-first while developing.
const DEV_BYPASS_EXTENSIONS: &[&str] = &["html", "htm", "js", "css"];

/// Category of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestClass {
    /// Cache-first.
    StaticAsset,
    /// Network-first with cache fallback.
    ApiData,
    /// Network with cached entry document fallback.
    Navigation,
    /// Not intercepted.
    Unhandled,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StaticAsset => "static-asset",
            Self::ApiData => "api-data",
            Self::Navigation => "navigation",
            Self::Unhandled => "unhandled",
        }
    }
}

/// Classifier built once from the configuration.
#[derive(Debug, Clone)]
pub struct AssetClassifier {
    static_assets: HashSet<String>,
    api_endpoints: HashSet<String>,
    data_prefix: String,
    i18n_prefix: String,
    dev_mode: bool,
}

impl AssetClassifier {
    pub fn from_config(config: &GuideConfig) -> Result<Self> {
        let resolve_all = |paths: &[String]| -> Result<HashSet<String>> {
            paths
                .iter()
                .map(|path| -> Result<String> { Ok(without_query(&config.resolve(path)?)) })
                .collect()
        };

        Ok(Self {
            static_assets: resolve_all(&config.static_assets)?,
            api_endpoints: resolve_all(&config.api_endpoints)?,
            data_prefix: config.resolve(&config.data_prefix)?.into(),
            i18n_prefix: config.resolve(&config.i18n_prefix)?.into(),
            dev_mode: config.is_development(),
        })
    }

    /// Classify a request.
    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        if request.method != "GET" {
            return RequestClass::Unhandled;
        }

        let identity = without_query(&request.url);

        if self.static_assets.contains(&identity) || has_extension(&request.url, STATIC_EXTENSIONS)
        {
            return RequestClass::StaticAsset;
        }

        if identity.starts_with(&self.data_prefix) || self.api_endpoints.contains(&identity) {
            return RequestClass::ApiData;
        }

        let accepts_markup = request
            .header("accept")
            .is_some_and(|accept| accept.contains("text/html"));
        if request.is_navigation || accepts_markup {
            return RequestClass::Navigation;
        }

        RequestClass::Unhandled
    }

    /// Markup, script or style while developing: always try the network first.
    pub fn is_dev_bypass(&self, request: &FetchRequest) -> bool {
        self.dev_mode && has_extension(&request.url, DEV_BYPASS_EXTENSIONS)
    }

    /// Whether the request targets a translation document.
    pub fn is_translation(&self, request: &FetchRequest) -> bool {
        cache_key(&request.url).starts_with(&self.i18n_prefix)
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }
}

fn without_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.into()
}

fn has_extension(url: &Url, extensions: &[&str]) -> bool {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| extensions.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(scope: &str) -> GuideConfig {
        GuideConfig {
            scope: Url::parse(scope).unwrap(),
            ..Default::default()
        }
    }

    fn classifier() -> AssetClassifier {
        AssetClassifier::from_config(&config("https://guide.example/")).unwrap()
    }

    fn get(url: &str) -> FetchRequest {
        FetchRequest::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_non_get_is_unhandled() {
        let c = classifier();
        let request = get("https://guide.example/assets/favicon.png").with_method("POST");
        assert_eq!(c.classify(&request), RequestClass::Unhandled);

        let request = get("https://guide.example/data/events.json").with_method("head");
        assert_eq!(c.classify(&request), RequestClass::Unhandled);
    }

    #[test]
    fn test_manifest_and_extensions_are_static() {
        let c = classifier();
        for url in [
            "https://guide.example/",
            "https://guide.example/index.html",
            "https://guide.example/js/app.js?v=3",
            "https://guide.example/assets/photo.JPG",
            "https://guide.example/assets/fonts/Other.woff2",
            "https://cdn.example/lib.css",
        ] {
            assert_eq!(c.classify(&get(url)), RequestClass::StaticAsset, "{url}");
        }
    }

    #[test]
    fn test_data_documents_are_api() {
        let c = classifier();
        for url in [
            "https://guide.example/data/events.json",
            "https://guide.example/data/i18n/en.json",
            "https://guide.example/data/new-feed",
        ] {
            assert_eq!(c.classify(&get(url)), RequestClass::ApiData, "{url}");
        }
    }

    #[test]
    fn test_json_is_not_mistaken_for_js() {
        let c = classifier();
        let request = get("https://guide.example/data/legend.json");
        assert_eq!(c.classify(&request), RequestClass::ApiData);
    }

    #[test]
    fn test_static_wins_over_api() {
        let c = classifier();
        let request = get("https://guide.example/data/map-tiles/0.png");
        assert_eq!(c.classify(&request), RequestClass::StaticAsset);
    }

    #[test]
    fn test_navigation() {
        let c = classifier();
        let nav = FetchRequest::navigate(Url::parse("https://guide.example/agenda").unwrap());
        assert_eq!(c.classify(&nav), RequestClass::Navigation);

        let accept = get("https://guide.example/info").with_header("Accept", "text/html");
        assert_eq!(c.classify(&accept), RequestClass::Navigation);
    }

    #[test]
    fn test_missing_accept_is_unhandled() {
        let c = classifier();
        assert_eq!(
            c.classify(&get("https://guide.example/health")),
            RequestClass::Unhandled
        );
        let other = get("https://guide.example/feed").with_header("accept", "application/xml");
        assert_eq!(c.classify(&other), RequestClass::Unhandled);
    }

    #[test]
    fn test_dev_bypass_only_in_dev_mode() {
        let release = classifier();
        assert!(!release.is_dev_bypass(&get("https://guide.example/js/app.js")));

        let dev = AssetClassifier::from_config(&config("http://localhost:8080/")).unwrap();
        assert!(dev.dev_mode());
        assert!(dev.is_dev_bypass(&get("http://localhost:8080/js/app.js")));
        assert!(dev.is_dev_bypass(&get("http://localhost:8080/index.html")));
        assert!(dev.is_dev_bypass(&get("http://localhost:8080/assets/css/style.css")));
        assert!(!dev.is_dev_bypass(&get("http://localhost:8080/assets/floorplan.png")));
    }

    #[test]
    fn test_translation_detection() {
        let c = classifier();
        assert!(c.is_translation(&get("https://guide.example/data/i18n/fr.json")));
        assert!(!c.is_translation(&get("https://guide.example/data/events.json")));
    }
}
