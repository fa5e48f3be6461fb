//! Ad catalog
//!
//! Loads `config/ads.json` ({ads: [...], settings: {...}}) and picks the
//! entry to advertise for a given video theme. Selection is intentionally
//! simple: first enabled entry whose target scenario appears in the theme,
//! otherwise the enabled entry with the smallest priority number.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// Template key used when no category-specific template exists
const GENERAL_TEMPLATE_KEY: &str = "general";

/// One advertisable product
#[derive(Debug, Clone, Deserialize)]
pub struct AdEntry {
    pub id: String,
    pub name: String,
    pub product: String,
    pub category: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub selling_points: Vec<String>,
    #[serde(default)]
    pub target_scenarios: Vec<String>,
    /// Fallback ad copy keyed by video category, with a "general" fallback
    #[serde(default)]
    pub templates: HashMap<String, Vec<String>>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    1
}

impl AdEntry {
    /// Selling points joined for prompt embedding
    #[must_use]
    pub fn selling_points_text(&self) -> String {
        self.selling_points.join(", ")
    }

    /// First template for `category`, falling back to the "general" key.
    #[must_use]
    pub fn template_for(&self, category: &str) -> Option<&str> {
        if let Some(first) = self
            .templates
            .get(category)
            .and_then(|list| list.first())
        {
            return Some(first.as_str());
        }
        self.templates
            .get(GENERAL_TEMPLATE_KEY)
            .and_then(|list| list.first())
            .map(String::as_str)
    }
}

/// Catalog-wide knobs (kept opaque, forwarded to copy generation prompts)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub ad_script_style: String,
    #[serde(default)]
    pub ad_script_tone: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    ads: Vec<AdEntry>,
    #[serde(default)]
    settings: CatalogSettings,
}

/// Loaded ad catalog
#[derive(Debug, Clone)]
pub struct AdCatalog {
    ads: Vec<AdEntry>,
    pub settings: CatalogSettings,
}

impl AdCatalog {
    /// Load the catalog from a JSON file.
    ///
    /// A missing or unreadable file degrades to the built-in single-entry
    /// catalog so a fresh checkout can run end to end.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("ad catalog not found at {}, using built-in default", path.display());
            return Ok(Self::default_catalog());
        }

        let raw = std::fs::read_to_string(path)?;
        let file: CatalogFile = match serde_json::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!("ad catalog unreadable ({e}), using built-in default");
                return Ok(Self::default_catalog());
            }
        };

        let catalog = Self {
            ads: file.ads,
            settings: file.settings,
        };
        info!(
            "loaded {} ads ({} enabled)",
            catalog.ads.len(),
            catalog.enabled().count()
        );
        Ok(catalog)
    }

    fn default_catalog() -> Self {
        Self {
            ads: vec![AdEntry {
                id: "gpu_compute".into(),
                name: "GPU compute".into(),
                product: "NVIDIA GPU compute".into(),
                category: "tech".into(),
                enabled: true,
                priority: 1,
                description: String::new(),
                selling_points: vec![
                    "high-performance AI compute".into(),
                    "faster training".into(),
                ],
                target_scenarios: vec!["AI".into(), "deep learning".into(), "tech".into()],
                templates: HashMap::from([(
                    GENERAL_TEMPLATE_KEY.into(),
                    vec!["Powered by serious GPU compute.".into()],
                )]),
            }],
            settings: CatalogSettings::default(),
        }
    }

    /// Iterator over enabled entries
    pub fn enabled(&self) -> impl Iterator<Item = &AdEntry> {
        self.ads.iter().filter(|ad| ad.enabled)
    }

    /// Pick an ad for a video theme.
    ///
    /// First enabled entry with a non-empty scenario string contained in the
    /// theme wins; otherwise the enabled entry with the smallest priority.
    /// An empty scenario never matches.
    pub fn select_for_theme(&self, theme: &str) -> Result<&AdEntry> {
        for ad in self.enabled() {
            let hit = ad
                .target_scenarios
                .iter()
                .any(|scenario| !scenario.is_empty() && theme.contains(scenario.as_str()));
            if hit {
                info!("theme {theme:?} matched ad {:?}", ad.name);
                return Ok(ad);
            }
        }

        let fallback = self.enabled().min_by_key(|ad| ad.priority);
        match fallback {
            Some(ad) => {
                info!("no scenario match for theme {theme:?}, using primary ad {:?}", ad.name);
                Ok(ad)
            }
            None => Err(PipelineError::NoAdAvailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, priority: i32, enabled: bool, scenarios: &[&str]) -> AdEntry {
        AdEntry {
            id: id.into(),
            name: id.into(),
            product: id.into(),
            category: "tech".into(),
            enabled,
            priority,
            description: String::new(),
            selling_points: vec![],
            target_scenarios: scenarios.iter().map(|s| (*s).to_string()).collect(),
            templates: HashMap::new(),
        }
    }

    fn catalog(ads: Vec<AdEntry>) -> AdCatalog {
        AdCatalog {
            ads,
            settings: CatalogSettings::default(),
        }
    }

    #[test]
    fn scenario_match_wins_over_priority() {
        let cat = catalog(vec![
            entry("low", 1, true, &["cooking"]),
            entry("hit", 9, true, &["machine learning"]),
        ]);
        let chosen = cat.select_for_theme("intro to machine learning").unwrap();
        assert_eq!(chosen.id, "hit");
    }

    #[test]
    fn falls_back_to_smallest_priority() {
        let cat = catalog(vec![
            entry("b", 2, true, &["cooking"]),
            entry("a", 1, true, &["gardening"]),
        ]);
        let chosen = cat.select_for_theme("quantum physics").unwrap();
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn disabled_entries_are_ignored() {
        let cat = catalog(vec![
            entry("off", 1, false, &["physics"]),
            entry("on", 5, true, &[]),
        ]);
        let chosen = cat.select_for_theme("physics lecture").unwrap();
        assert_eq!(chosen.id, "on");
    }

    #[test]
    fn empty_scenario_matches_nothing() {
        let cat = catalog(vec![
            entry("empty", 2, true, &[""]),
            entry("primary", 1, true, &[]),
        ]);
        let chosen = cat.select_for_theme("anything at all").unwrap();
        assert_eq!(chosen.id, "primary");
    }

    #[test]
    fn no_enabled_entries_is_an_error() {
        let cat = catalog(vec![entry("off", 1, false, &["x"])]);
        assert!(matches!(
            cat.select_for_theme("x"),
            Err(PipelineError::NoAdAvailable)
        ));
    }

    #[test]
    fn template_falls_back_to_general() {
        let mut ad = entry("a", 1, true, &[]);
        ad.templates
            .insert("general".into(), vec!["generic line".into()]);
        ad.templates
            .insert("tech".into(), vec!["tech line".into()]);
        assert_eq!(ad.template_for("tech"), Some("tech line"));
        assert_eq!(ad.template_for("cooking"), Some("generic line"));

        let bare = entry("b", 1, true, &[]);
        assert_eq!(bare.template_for("tech"), None);
    }

    #[test]
    fn catalog_json_round_trip() {
        let json = r#"{
            "ads": [{
                "id": "x", "name": "X", "product": "X1", "category": "tech",
                "priority": 3,
                "selling_points": ["fast"],
                "target_scenarios": ["ai"],
                "templates": {"general": ["try X1"]}
            }],
            "settings": {"ad_script_style": "casual", "ad_script_tone": "warm"}
        }"#;
        let file: CatalogFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.ads.len(), 1);
        assert!(file.ads[0].enabled, "enabled defaults to true");
        assert_eq!(file.settings.ad_script_style, "casual");
    }
}
