//! Size-based rules deciding whether and how a page is upscaled

use std::cmp::Reverse;

use pageflow_cache::Dimensions;
use serde::{Deserialize, Serialize};

/// Model used when no rule applies and rules are disabled
pub const DEFAULT_MODEL: &str = "cunet";
pub const DEFAULT_SCALE: u32 = 2;

/// One upscale rule.
///
/// Size bounds of zero are unbounded. A matching rule with `skip` set
/// prevents upscaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleCondition {
    pub id: String,
    pub name: String,
    /// Higher priorities are evaluated first
    pub priority: i32,
    pub enabled: bool,
    pub skip: bool,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_megapixels: f64,
    pub max_megapixels: f64,
    pub model: String,
    pub scale: u32,
    /// Engine tile size, 0 for the engine default
    pub tile_size: u32,
    /// Denoise level, -1 for the engine default
    pub noise_level: i32,
}

impl Default for UpscaleCondition {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            priority: 0,
            enabled: true,
            skip: false,
            min_width: 0,
            max_width: 0,
            min_height: 0,
            max_height: 0,
            min_megapixels: 0.0,
            max_megapixels: 0.0,
            model: DEFAULT_MODEL.to_string(),
            scale: DEFAULT_SCALE,
            tile_size: 0,
            noise_level: -1,
        }
    }
}

impl UpscaleCondition {
    fn has_bounds(&self) -> bool {
        self.min_width > 0
            || self.max_width > 0
            || self.min_height > 0
            || self.max_height > 0
            || self.min_megapixels > 0.0
            || self.max_megapixels > 0.0
    }

    /// Whether a page of the given size satisfies every bound.
    ///
    /// With unknown dimensions only unbounded rules match.
    pub fn matches(&self, dimensions: Option<Dimensions>) -> bool {
        let Some(Dimensions { width, height }) = dimensions else {
            return !self.has_bounds();
        };
        let megapixels = Dimensions::new(width, height).megapixels();

        (self.min_width == 0 || width >= self.min_width)
            && (self.max_width == 0 || width <= self.max_width)
            && (self.min_height == 0 || height >= self.min_height)
            && (self.max_height == 0 || height <= self.max_height)
            && (self.min_megapixels <= 0.0 || megapixels >= self.min_megapixels)
            && (self.max_megapixels <= 0.0 || megapixels <= self.max_megapixels)
    }

    /// Bound violations, e.g. a minimum above its maximum
    pub fn check(&self) -> Result<(), String> {
        if self.max_width > 0 && self.min_width > self.max_width {
            return Err(format!("min_width {} > max_width {}", self.min_width, self.max_width));
        }
        if self.max_height > 0 && self.min_height > self.max_height {
            return Err(format!(
                "min_height {} > max_height {}",
                self.min_height, self.max_height
            ));
        }
        if self.max_megapixels > 0.0 && self.min_megapixels > self.max_megapixels {
            return Err(format!(
                "min_megapixels {} > max_megapixels {}",
                self.min_megapixels, self.max_megapixels
            ));
        }
        if !self.skip && self.scale == 0 {
            return Err("scale must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Ordered rule set plus the fallback used when rules are disabled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleConditions {
    /// When false every page is upscaled with the default model
    pub enabled: bool,
    pub default_model: String,
    pub default_scale: u32,
    pub rules: Vec<UpscaleCondition>,
}

impl Default for UpscaleConditions {
    fn default() -> Self {
        Self {
            enabled: false,
            default_model: DEFAULT_MODEL.to_string(),
            default_scale: DEFAULT_SCALE,
            rules: Vec::new(),
        }
    }
}

/// Outcome of evaluating the rules for one page
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionVerdict {
    Upscale {
        condition_id: Option<String>,
        model: String,
        scale: u32,
        tile_size: u32,
        noise_level: i32,
    },
    Skip {
        condition_id: Option<String>,
    },
}

impl ConditionVerdict {
    pub fn is_skip(&self) -> bool {
        matches!(self, ConditionVerdict::Skip { .. })
    }
}

impl UpscaleConditions {
    /// Decide what to do with a page.
    ///
    /// Enabled rules are tried by descending priority, ties in declaration
    /// order; the first match wins. If rules are enabled and none match the
    /// page is skipped.
    pub fn evaluate(&self, dimensions: Option<Dimensions>) -> ConditionVerdict {
        if !self.enabled {
            return ConditionVerdict::Upscale {
                condition_id: None,
                model: self.default_model.clone(),
                scale: self.default_scale,
                tile_size: 0,
                noise_level: -1,
            };
        }

        let mut rules: Vec<&UpscaleCondition> =
            self.rules.iter().filter(|rule| rule.enabled).collect();
        rules.sort_by_key(|rule| Reverse(rule.priority));

        match rules.into_iter().find(|rule| rule.matches(dimensions)) {
            Some(rule) if rule.skip => ConditionVerdict::Skip {
                condition_id: Some(rule.id.clone()),
            },
            Some(rule) => ConditionVerdict::Upscale {
                condition_id: Some(rule.id.clone()),
                model: rule.model.clone(),
                scale: rule.scale,
                tile_size: rule.tile_size,
                noise_level: rule.noise_level,
            },
            None => ConditionVerdict::Skip { condition_id: None },
        }
    }
}
