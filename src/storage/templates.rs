//! Zone templates for ID cards
//!
//! A template lists the named zones of one card design as fractions of a
//! reference size. Built-in templates are compiled in; a template
//! directory from the configuration overrides them file by file.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::document::DocumentType;
use crate::error::{ExtractError, Result};
use crate::vision::{LanguageHint, PreprocessProfile};

const BUILTIN_CIN_NEW: &str = include_str!("../../templates/cin_new.toml");
const BUILTIN_CIN_OLD: &str = include_str!("../../templates/cin_old.toml");

/// Script of a zone's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneLanguage {
    Fr,
    Ar,
    Mixed,
}

impl ZoneLanguage {
    pub fn hint(&self) -> LanguageHint {
        match self {
            ZoneLanguage::Fr => LanguageHint::French,
            ZoneLanguage::Ar => LanguageHint::Arabic,
            ZoneLanguage::Mixed => LanguageHint::Mixed,
        }
    }
}

/// A named rectangular field area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Field name, e.g. `nom_fr`
    pub name: String,
    /// (x, y, width, height) as fractions of the reference size
    pub bounds: (f32, f32, f32, f32),
    pub language: ZoneLanguage,
    /// Replaces the variant's primary preprocessing for this zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<PreprocessProfile>,
}

/// Zone layout of one card design
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneTemplate {
    pub document: DocumentType,
    /// Images are resized to this size before zones are cut
    pub reference_width: u32,
    pub reference_height: u32,
    /// Zones in extraction order
    pub zones: Vec<Zone>,
}

impl ZoneTemplate {
    pub fn from_toml(content: &str) -> Result<Self> {
        let template: ZoneTemplate = toml::from_str(content)
            .map_err(|e| ExtractError::Configuration(format!("invalid template: {}", e)))?;
        template.validate()?;
        Ok(template)
    }

    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    /// Reject templates that could not be applied to any image
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ExtractError::Configuration(format!("{} template: {}", self.document, msg)));

        if !self.document.is_id_card() {
            return fail("zone templates only exist for ID cards".to_string());
        }
        if self.reference_width == 0 || self.reference_height == 0 {
            return fail("reference size must be positive".to_string());
        }
        if self.zones.is_empty() {
            return fail("no zones defined".to_string());
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.name.as_str()) {
                return fail(format!("zone '{}' defined twice", zone.name));
            }

            let (x, y, w, h) = zone.bounds;
            let in_unit = |v: f32| (0.0..=1.0).contains(&v);
            if !(in_unit(x) && in_unit(y) && w > 0.0 && h > 0.0 && x + w <= 1.001 && y + h <= 1.001) {
                return fail(format!("zone '{}' has out-of-range bounds {:?}", zone.name, zone.bounds));
            }
        }

        Ok(())
    }
}

/// Process-wide template cache; each template is loaded at most once
pub struct TemplateStore {
    dir: Option<PathBuf>,
    cache: RwLock<HashMap<DocumentType, Arc<ZoneTemplate>>>,
}

impl TemplateStore {
    /// Store reading overrides from `dir` (if any), built-ins otherwise
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Store pre-filled with the given templates
    pub fn from_templates(templates: impl IntoIterator<Item = ZoneTemplate>) -> Result<Self> {
        let mut cache = HashMap::new();
        for template in templates {
            template.validate()?;
            cache.insert(template.document, Arc::new(template));
        }
        Ok(Self {
            dir: None,
            cache: RwLock::new(cache),
        })
    }

    /// Load every ID-card template now so bad files fail at startup
    pub fn preload(&self) -> Result<()> {
        for document in DocumentType::ALL.into_iter().filter(DocumentType::is_id_card) {
            self.get(document)?;
        }
        Ok(())
    }

    pub fn get(&self, document: DocumentType) -> Result<Arc<ZoneTemplate>> {
        if let Some(template) = self.cache.read().get(&document) {
            return Ok(template.clone());
        }

        let mut cache = self.cache.write();
        // Another caller may have loaded it while we waited for the lock
        if let Some(template) = cache.get(&document) {
            return Ok(template.clone());
        }

        let template = Arc::new(self.load(document)?);
        info!("Loaded {} template with {} zones", document, template.zones.len());
        cache.insert(document, template.clone());
        Ok(template)
    }

    fn load(&self, document: DocumentType) -> Result<ZoneTemplate> {
        let builtin = match document {
            DocumentType::CinNew => BUILTIN_CIN_NEW,
            DocumentType::CinOld => BUILTIN_CIN_OLD,
            other => {
                return Err(ExtractError::Configuration(format!(
                    "no zone template for {}",
                    other
                )))
            }
        };

        let template = match self.override_path(document) {
            Some(path) => {
                debug!("Reading template override {:?}", path);
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    ExtractError::Configuration(format!("cannot read {:?}: {}", path, e))
                })?;
                ZoneTemplate::from_toml(&content)?
            }
            None => ZoneTemplate::from_toml(builtin)?,
        };

        if template.document != document {
            return Err(ExtractError::Configuration(format!(
                "template for {} declares document {}",
                document, template.document
            )));
        }
        Ok(template)
    }

    fn override_path(&self, document: DocumentType) -> Option<PathBuf> {
        let dir: &Path = self.dir.as_deref()?;
        let path = dir.join(format!("{}.toml", document.as_str()));
        path.exists().then_some(path)
    }
}
