//! Image styles: named scaling configurations applied to previews.

use serde::{Deserialize, Serialize};

/// Identifier of the implicit unscaled style every preview run produces.
pub const ORIGINAL_STYLE: &str = "original";

/// How an image is mapped onto the style's target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingMode {
    /// Keep the original dimensions
    None,
    /// Fit inside the target box, never upscaling
    Box,
    /// Scale until the target box is covered
    Cover,
    /// Cover the target box, then center-crop to its exact dimensions
    Crop,
    /// Like crop; kept as a distinct mode for style compatibility
    Fill,
    /// Match the target width
    Width,
    /// Match the target height
    Height,
}

/// A named scaling and cropping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageStyle {
    pub identifier: String,
    pub width: u32,
    pub height: u32,
    pub mode: ScalingMode,
    /// Whether the style may be selected when composing pages
    #[serde(default)]
    pub composeable: bool,
}

impl ImageStyle {
    pub fn new(identifier: impl Into<String>, width: u32, height: u32, mode: ScalingMode) -> Self {
        Self {
            identifier: identifier.into(),
            width,
            height,
            mode,
            composeable: false,
        }
    }

    /// The implicit style representing the unscaled preview
    pub fn original() -> Self {
        Self::new(ORIGINAL_STYLE, 0, 0, ScalingMode::None)
    }

    pub fn is_original(&self) -> bool {
        self.mode == ScalingMode::None
    }

    /// Scaling factor for an image of the given dimensions
    pub fn scale(&self, width: u32, height: u32) -> f32 {
        if width == 0 || height == 0 {
            return 1.0;
        }
        let scale_x = self.width as f32 / width as f32;
        let scale_y = self.height as f32 / height as f32;
        match self.mode {
            ScalingMode::None => 1.0,
            ScalingMode::Box => {
                if width <= self.width && height <= self.height {
                    1.0
                } else {
                    scale_x.min(scale_y)
                }
            }
            ScalingMode::Cover | ScalingMode::Crop | ScalingMode::Fill => scale_x.max(scale_y),
            ScalingMode::Width => scale_x,
            ScalingMode::Height => scale_y,
        }
    }

    /// Dimensions after scaling, before any cropping
    pub fn scaled_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = self.scale(width, height);
        let w = ((width as f32) * scale).round().max(1.0) as u32;
        let h = ((height as f32) * scale).round().max(1.0) as u32;
        (w, h)
    }

    /// Whether the scaled result is center-cropped to the exact target box
    pub fn crops(&self) -> bool {
        matches!(self.mode, ScalingMode::Crop | ScalingMode::Fill)
    }
}
