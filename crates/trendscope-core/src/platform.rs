use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// External social platform a piece of content was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Threads,
    Instagram,
    #[serde(rename = "tiktok")]
    TikTok,
    X,
    #[serde(rename = "youtube")]
    YouTube,
    Reddit,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Threads,
        Platform::Instagram,
        Platform::TikTok,
        Platform::X,
        Platform::YouTube,
        Platform::Reddit,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Threads => "threads",
            Platform::Instagram => "instagram",
            Platform::TikTok => "tiktok",
            Platform::X => "x",
            Platform::YouTube => "youtube",
            Platform::Reddit => "reddit",
        }
    }

    /// Default absolute engagement volume an item must reach before it can
    /// seed or join a trend.
    #[must_use]
    pub fn default_volume_threshold(self) -> u64 {
        match self {
            Platform::Threads | Platform::X => 50,
            Platform::Instagram | Platform::YouTube => 100,
            Platform::TikTok => 200,
            Platform::Reddit => 30,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threads" => Ok(Platform::Threads),
            "instagram" => Ok(Platform::Instagram),
            "tiktok" => Ok(Platform::TikTok),
            "x" | "twitter" => Ok(Platform::X),
            "youtube" => Ok(Platform::YouTube),
            "reddit" => Ok(Platform::Reddit),
            other => Err(format!("unknown platform \"{other}\"")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("Twitter".parse::<Platform>().unwrap(), Platform::X);
        assert_eq!(" TikTok ".parse::<Platform>().unwrap(), Platform::TikTok);
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Platform::YouTube).unwrap();
        assert_eq!(json, "\"youtube\"");
        let back: Platform = serde_json::from_str("\"tiktok\"").unwrap();
        assert_eq!(back, Platform::TikTok);
    }

    #[test]
    fn display_matches_as_str() {
        for platform in Platform::ALL {
            assert_eq!(platform.to_string(), platform.as_str());
        }
    }
}
