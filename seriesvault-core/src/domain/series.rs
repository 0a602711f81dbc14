use super::Resolution;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Broad class of a series. Only `Custom` series are handled by the
/// downloader; the rest exist so requests for them can be recognised and
/// skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Custom,
    Equity,
    Forex,
    Crypto,
    Future,
    Option,
    Index,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Custom => "custom",
            Category::Equity => "equity",
            Category::Forex => "forex",
            Category::Crypto => "crypto",
            Category::Future => "future",
            Category::Option => "option",
            Category::Index => "index",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "custom" | "base" => Ok(Category::Custom),
            "equity" => Ok(Category::Equity),
            "forex" => Ok(Category::Forex),
            "crypto" => Ok(Category::Crypto),
            "future" => Ok(Category::Future),
            "option" => Ok(Category::Option),
            "index" => Ok(Category::Index),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// Identity of one logical series: symbol, market and category.
///
/// A request against a composite identity may come back with points for
/// several underlying identities, which is why data points carry their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesId {
    pub symbol: String,
    pub market: String,
    pub category: Category,
}

impl SeriesId {
    pub fn new(symbol: impl Into<String>, market: impl Into<String>, category: Category) -> Self {
        Self {
            symbol: symbol.into(),
            market: market.into(),
            category,
        }
    }

    /// Shorthand for a custom series, the only category the downloader fetches.
    pub fn custom(symbol: impl Into<String>, market: impl Into<String>) -> Self {
        Self::new(symbol, market, Category::Custom)
    }

    /// Lower-cased symbol, as used in file and entry names.
    pub fn file_symbol(&self) -> String {
        self.symbol.to_lowercase()
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.market, self.symbol)
    }
}

/// A series identity at a given resolution. Two equal keys share one cached
/// archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub id: SeriesId,
    pub resolution: Resolution,
}

impl ResourceKey {
    pub fn new(id: SeriesId, resolution: Resolution) -> Self {
        Self { id, resolution }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.resolution)
    }
}
