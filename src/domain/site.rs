//! Sites, their modules and the runtime environment signal.

use serde::{Deserialize, Serialize};

use super::resource::Language;
use super::style::ImageStyle;

/// Process-wide deployment environment.
///
/// Injected into the repository after construction; gates whether missing
/// or outdated previews trigger an eager rebuild at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Development,
}

/// A site module contributing image styles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub identifier: String,
    #[serde(default)]
    pub styles: Vec<ImageStyle>,
}

impl Module {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            styles: Vec::new(),
        }
    }

    pub fn with_style(mut self, style: ImageStyle) -> Self {
        self.styles.push(style);
        self
    }
}

/// The tenant a repository instance serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub identifier: String,
    #[serde(default)]
    pub languages: Vec<Language>,
    /// Image styles defined at the site level
    #[serde(default)]
    pub styles: Vec<ImageStyle>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl Site {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            languages: Vec::new(),
            styles: Vec::new(),
            modules: Vec::new(),
        }
    }

    pub fn with_language(mut self, language: impl Into<Language>) -> Self {
        self.languages.push(language.into());
        self
    }

    pub fn with_style(mut self, style: ImageStyle) -> Self {
        self.styles.push(style);
        self
    }

    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// The full style set: site-level styles plus every module's styles
    pub fn image_styles(&self) -> Vec<ImageStyle> {
        let mut styles = self.styles.clone();
        for module in &self.modules {
            styles.extend(module.styles.iter().cloned());
        }
        styles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::style::ScalingMode;

    #[test]
    fn test_image_styles_include_modules() {
        let site = Site::new("main")
            .with_style(ImageStyle::new("thumbnail", 80, 80, ScalingMode::Crop))
            .with_module(
                Module::new("gallery")
                    .with_style(ImageStyle::new("teaser", 320, 180, ScalingMode::Box)),
            );

        let styles = site.image_styles();
        assert_eq!(styles.len(), 2);
        assert_eq!(styles[0].identifier, "thumbnail");
        assert_eq!(styles[1].identifier, "teaser");
    }
}
