mod allanime;

pub use allanime::AllAnimeCatalog;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const ALLANIME_REFERRER: &str = "https://allanime.day";
pub const ALLMANGA_REFERRER: &str = "https://allmanga.to";

/// A series as identified by the catalog provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimeRef {
    pub id: String,
    pub name: String,
    pub available_episodes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub url: String,
    pub referrer: Option<String>,
    pub quality: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Sub,
    Dub,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sub => "sub",
            Self::Dub => "dub",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "QualityRepr", into = "QualityRepr")]
pub enum Quality {
    Best,
    Worst,
    Height(u32),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum QualityRepr {
    Height(u32),
    Named(QualityPreset),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum QualityPreset {
    Best,
    Worst,
}

impl From<QualityRepr> for Quality {
    fn from(repr: QualityRepr) -> Self {
        match repr {
            QualityRepr::Height(height) => Self::Height(height),
            QualityRepr::Named(QualityPreset::Best) => Self::Best,
            QualityRepr::Named(QualityPreset::Worst) => Self::Worst,
        }
    }
}

impl From<Quality> for QualityRepr {
    fn from(quality: Quality) -> Self {
        match quality {
            Quality::Height(height) => Self::Height(height),
            Quality::Best => Self::Named(QualityPreset::Best),
            Quality::Worst => Self::Named(QualityPreset::Worst),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Best => f.write_str("best"),
            Self::Worst => f.write_str("worst"),
            Self::Height(height) => write!(f, "{height}p"),
        }
    }
}

/// Remote catalog the playback core pulls series, episodes and streams from.
pub trait Catalog: Send + Sync {
    fn search(&self, query: &str) -> Result<Vec<AnimeRef>>;

    fn list_episodes(&self, anime: &AnimeRef, lang: Language) -> Result<Vec<u32>>;

    fn get_stream(
        &self,
        anime: &AnimeRef,
        episode: u32,
        lang: Language,
        quality: Quality,
    ) -> Result<Option<Stream>>;
}

/// Referrer the CDN behind `url` expects.
pub fn classify_referrer(url: &str) -> &'static str {
    if url.contains("fast4speed") {
        ALLANIME_REFERRER
    } else if url.contains("sunshinerays") {
        ALLMANGA_REFERRER
    } else {
        ALLANIME_REFERRER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referrer_classification_matches_known_cdns() {
        assert_eq!(
            classify_referrer("https://fast4speed.example/v.m3u8"),
            "https://allanime.day"
        );
        assert_eq!(
            classify_referrer("https://subdomain.fast4speed.com/ep1"),
            "https://allanime.day"
        );
        assert_eq!(
            classify_referrer("https://sunshinerays.xyz/e1"),
            "https://allmanga.to"
        );
        assert_eq!(classify_referrer("https://random.cdn/v"), "https://allanime.day");
        assert_eq!(classify_referrer(""), "https://allanime.day");
    }

    #[test]
    fn quality_display_is_human_readable() {
        assert_eq!(Quality::Best.to_string(), "best");
        assert_eq!(Quality::Height(1080).to_string(), "1080p");
    }
}
