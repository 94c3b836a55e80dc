//! Render request model and the layout vocabulary shared by every stage.

use super::error::DomainError;

pub const DEFAULT_TITLE: &str = "RUM Dashboard";
pub const HTML_REQUIRED_MESSAGE: &str = "HTML content is required";

/// CSS pixels per inch, used to convert pixel margins into print units.
const PX_PER_INCH: f64 = 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PageFormat {
    #[default]
    A4,
    Letter,
    Legal,
}

impl PageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageFormat::A4 => "A4",
            PageFormat::Letter => "Letter",
            PageFormat::Legal => "Legal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a4" => Some(PageFormat::A4),
            "letter" => Some(PageFormat::Letter),
            "legal" => Some(PageFormat::Legal),
            _ => None,
        }
    }

    /// Portrait paper dimensions as `(width, height)` in inches.
    pub fn paper_inches(&self) -> (f64, f64) {
        match self {
            PageFormat::A4 => (8.27, 11.69),
            PageFormat::Letter => (8.5, 11.0),
            PageFormat::Legal => (8.5, 14.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "portrait" => Some(Orientation::Portrait),
            "landscape" => Some(Orientation::Landscape),
            _ => None,
        }
    }

    pub fn is_landscape(&self) -> bool {
        matches!(self, Orientation::Landscape)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

/// Scale and page margin applied when printing at a given quality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityProfile {
    pub scale: f64,
    pub margin_px: u32,
}

const QUALITY_PROFILES: [(Quality, QualityProfile); 3] = [
    (
        Quality::High,
        QualityProfile {
            scale: 1.0,
            margin_px: 15,
        },
    ),
    (
        Quality::Medium,
        QualityProfile {
            scale: 0.85,
            margin_px: 10,
        },
    ),
    (
        Quality::Low,
        QualityProfile {
            scale: 0.7,
            margin_px: 8,
        },
    ),
];

impl Quality {
    /// Substituted when a caller names a quality level we do not know.
    pub const FALLBACK: Quality = Quality::Medium;

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::High => "high",
            Quality::Medium => "medium",
            Quality::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Quality::High),
            "medium" => Some(Quality::Medium),
            "low" => Some(Quality::Low),
            _ => None,
        }
    }

    pub fn profile(&self) -> QualityProfile {
        QUALITY_PROFILES
            .iter()
            .find(|(quality, _)| quality == self)
            .map(|(_, profile)| *profile)
            .unwrap_or(QUALITY_PROFILES[1].1)
    }
}

/// Caller-selected page layout. Every field participates in content addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LayoutOptions {
    pub format: PageFormat,
    pub orientation: Orientation,
    pub compress: bool,
    pub quality: Quality,
}

impl LayoutOptions {
    pub fn new(format: PageFormat, orientation: Orientation, compress: bool, quality: Quality) -> Self {
        Self {
            format,
            orientation,
            compress,
            quality,
        }
    }

    /// Resolve the layout into the concrete numbers handed to the engine.
    ///
    /// Without compression the document always prints at full scale; the margin still follows
    /// the quality profile.
    pub fn print_layout(&self) -> PrintLayout {
        let profile = self.quality.profile();
        let (paper_width_in, paper_height_in) = self.format.paper_inches();
        PrintLayout {
            paper_width_in,
            paper_height_in,
            landscape: self.orientation.is_landscape(),
            scale: if self.compress { profile.scale } else { 1.0 },
            margin_in: f64::from(profile.margin_px) / PX_PER_INCH,
        }
    }
}

/// Engine-facing print parameters, all lengths in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintLayout {
    pub paper_width_in: f64,
    pub paper_height_in: f64,
    pub landscape: bool,
    pub scale: f64,
    pub margin_in: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub html_body: String,
    pub css_text: String,
    pub title: String,
    pub layout: LayoutOptions,
    pub css_only: bool,
}

impl RenderRequest {
    pub fn new(html_body: impl Into<String>, css_text: impl Into<String>) -> Self {
        Self {
            html_body: html_body.into(),
            css_text: css_text.into(),
            title: DEFAULT_TITLE.to_string(),
            layout: LayoutOptions {
                compress: true,
                ..LayoutOptions::default()
            },
            css_only: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_layout(mut self, layout: LayoutOptions) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_css_only(mut self, css_only: bool) -> Self {
        self.css_only = css_only;
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.html_body.is_empty() {
            return Err(DomainError::validation(HTML_REQUIRED_MESSAGE));
        }
        Ok(())
    }
}
