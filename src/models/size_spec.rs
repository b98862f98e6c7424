//! Thumbnail size tokens.
//!
//! A size specification is either one of the named presets accepted by
//! `GET /photos/{id}?thumbnail=` or an explicit `w<digits>` width accepted by
//! `GET /photos/{id}/thumb/{spec}`. Both normalize to a [`ThumbnailWidth`],
//! whose `w<width>` token doubles as the cache directory name.

use std::{fmt, str::FromStr};
use thiserror::Error;

pub const MIN_THUMBNAIL_WIDTH: u32 = 1;
pub const MAX_THUMBNAIL_WIDTH: u32 = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeSpecError {
    #[error("invalid thumbnail spec, expected `w<width>`")]
    InvalidFormat,
    #[error("thumbnail width must be between 1 and 4096")]
    OutOfRange,
}

/// A validated thumbnail width in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbnailWidth(u32);

impl ThumbnailWidth {
    pub fn new(width: u32) -> Result<Self, SizeSpecError> {
        if (MIN_THUMBNAIL_WIDTH..=MAX_THUMBNAIL_WIDTH).contains(&width) {
            Ok(Self(width))
        } else {
            Err(SizeSpecError::OutOfRange)
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThumbnailWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

impl FromStr for ThumbnailWidth {
    type Err = SizeSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let digits = spec.strip_prefix('w').ok_or(SizeSpecError::InvalidFormat)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SizeSpecError::InvalidFormat);
        }
        // Anything that overflows u32 is far beyond the maximum anyway.
        let width = digits.parse::<u32>().map_err(|_| SizeSpecError::OutOfRange)?;
        Self::new(width)
    }
}

/// Named sizes for the redirect-style endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
    Small,
    #[default]
    Medium,
    Large,
    Original,
}

impl Preset {
    /// Parse the `thumbnail` query value. Missing or unknown values select
    /// [`Preset::Medium`].
    pub fn from_query(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "small" => Self::Small,
            "large" => Self::Large,
            "original" => Self::Original,
            _ => Self::Medium,
        }
    }

    /// The width this preset resizes to, or `None` for the original.
    pub fn width(self) -> Option<ThumbnailWidth> {
        let px = match self {
            Self::Small => 100,
            Self::Medium => 300,
            Self::Large => 1200,
            Self::Original => return None,
        };
        Some(ThumbnailWidth(px))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_width_tokens() {
        assert_eq!("w1".parse::<ThumbnailWidth>().unwrap().get(), 1);
        assert_eq!("w480".parse::<ThumbnailWidth>().unwrap().get(), 480);
        assert_eq!("w4096".parse::<ThumbnailWidth>().unwrap().get(), 4096);
        assert_eq!("w480".parse::<ThumbnailWidth>().unwrap().to_string(), "w480");
    }

    #[test]
    fn rejects_malformed_tokens() {
        for spec in ["abc", "w", "480", "w-1", "w+5", "w12a", "W480", "w 4"] {
            assert_eq!(
                spec.parse::<ThumbnailWidth>(),
                Err(SizeSpecError::InvalidFormat),
                "{spec}"
            );
        }
    }

    #[test]
    fn rejects_out_of_range_widths() {
        for spec in ["w0", "w4097", "w99999", "w99999999999999"] {
            assert_eq!(
                spec.parse::<ThumbnailWidth>(),
                Err(SizeSpecError::OutOfRange),
                "{spec}"
            );
        }
    }

    #[test]
    fn presets_fall_back_to_medium() {
        assert_eq!(Preset::from_query(None), Preset::Medium);
        assert_eq!(Preset::from_query(Some("")), Preset::Medium);
        assert_eq!(Preset::from_query(Some("huge")), Preset::Medium);
        assert_eq!(Preset::from_query(Some(" LARGE ")), Preset::Large);
        assert_eq!(Preset::from_query(Some("original")), Preset::Original);
    }

    #[test]
    fn preset_widths() {
        assert_eq!(Preset::Small.width().map(ThumbnailWidth::get), Some(100));
        assert_eq!(Preset::Medium.width().map(ThumbnailWidth::get), Some(300));
        assert_eq!(Preset::Large.width().map(ThumbnailWidth::get), Some(1200));
        assert_eq!(Preset::Original.width(), None);
    }
}
