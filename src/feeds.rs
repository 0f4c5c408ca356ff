//! Catalog of the market-data feeds the dashboard views read
//!
//! Each feed pairs a cache key with the public API URL behind it and the TTL
//! that suits how quickly the data moves: 60 seconds for live prices up to an
//! hour for protocol lists. Coin charts are parameterized by CoinGecko coin id.

use thiserror::Error;

/// Errors from looking up or parameterizing a feed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    /// No feed with this name exists
    #[error("Unknown feed: '{0}'. Run `marketcache feeds` to list available feeds")]
    UnknownFeed(String),

    /// The feed needs a coin id but none was given
    #[error("Feed '{0}' requires a coin id (e.g. tether)")]
    MissingCoin(String),

    /// A coin id was given to a feed that takes none
    #[error("Feed '{0}' does not take a coin id")]
    UnexpectedCoin(String),

    /// The coin id is not a CoinGecko-style slug
    #[error("Invalid coin id: '{0}'. Use lowercase letters, digits and '-'")]
    InvalidCoinId(String),
}

/// A fixed-URL feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feed {
    /// Name used on the command line
    pub name: &'static str,
    /// Cache key the dashboard stores this feed under
    pub key: &'static str,
    /// Upstream URL
    pub url: &'static str,
    /// Freshness window in seconds
    pub ttl_secs: u64,
    /// One-line description
    pub description: &'static str,
}

/// Static array of all fixed-URL feeds
pub static FEEDS: [Feed; 9] = [
    Feed {
        name: "global",
        key: "cg-global",
        url: "https://api.coingecko.com/api/v3/global",
        ttl_secs: 120,
        description: "Total market cap, volume and dominance",
    },
    Feed {
        name: "derivatives",
        key: "cg-derivatives",
        url: "https://api.coingecko.com/api/v3/derivatives",
        ttl_secs: 3600,
        description: "Derivative contracts with open interest and funding",
    },
    Feed {
        name: "markets",
        key: "cg-markets-250",
        url: "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=market_cap_desc&per_page=250&page=1&sparkline=false&price_change_percentage=1h%2C24h%2C7d",
        ttl_secs: 60,
        description: "Top 250 coins by market cap with 1h/24h/7d change",
    },
    Feed {
        name: "tvl-history",
        key: "llama-charts",
        url: "https://api.llama.fi/charts",
        ttl_secs: 600,
        description: "Historical total DeFi TVL",
    },
    Feed {
        name: "chains",
        key: "llama-chains",
        url: "https://api.llama.fi/v2/chains",
        ttl_secs: 3600,
        description: "Current TVL by chain",
    },
    Feed {
        name: "protocols",
        key: "llama-protocols",
        url: "https://api.llama.fi/protocols",
        ttl_secs: 3600,
        description: "All tracked DeFi protocols",
    },
    Feed {
        name: "fees",
        key: "llama-fees",
        url: "https://api.llama.fi/overview/fees?excludeTotalData=true",
        ttl_secs: 3600,
        description: "Protocol fees and revenue",
    },
    Feed {
        name: "stablecoins",
        key: "llama-stables",
        url: "https://stablecoins.llama.fi/stablecoins",
        ttl_secs: 300,
        description: "Stablecoin supplies and chain distribution",
    },
    Feed {
        name: "yield-pools",
        key: "llama-yield-pools",
        url: "https://yields.llama.fi/pools",
        ttl_secs: 600,
        description: "Yield pools with APY and TVL",
    },
];

/// Price history feeds that take a coin id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinChart {
    /// 90 days of prices, used for depeg detection
    Days90,
    /// 30 days of daily prices, used for peg comparison
    Days30,
}

impl CoinChart {
    pub fn all() -> &'static [CoinChart] {
        &[CoinChart::Days90, CoinChart::Days30]
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoinChart::Days90 => "coin-chart-90d",
            CoinChart::Days30 => "coin-chart-30d",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CoinChart::Days90 => "90-day price history for a coin",
            CoinChart::Days30 => "30-day daily price history for a coin",
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        600
    }

    pub fn from_name(name: &str) -> Option<CoinChart> {
        CoinChart::all().iter().copied().find(|c| c.name() == name)
    }

    /// Builds the request for `coin_id`
    pub fn request(&self, coin_id: &str) -> Result<FeedRequest, FeedError> {
        if !is_coin_slug(coin_id) {
            return Err(FeedError::InvalidCoinId(coin_id.to_string()));
        }
        let (key, url) = match self {
            CoinChart::Days90 => (
                format!("cg-chart-90d-{}", coin_id),
                format!(
                    "https://api.coingecko.com/api/v3/coins/{}/market_chart?vs_currency=usd&days=90",
                    coin_id
                ),
            ),
            CoinChart::Days30 => (
                format!("cg-chart-{}", coin_id),
                format!(
                    "https://api.coingecko.com/api/v3/coins/{}/market_chart?vs_currency=usd&days=30&interval=daily",
                    coin_id
                ),
            ),
        };
        Ok(FeedRequest {
            key,
            url,
            ttl_secs: self.ttl_secs(),
        })
    }
}

/// Everything `ResponseCache::get_or_fetch` needs for one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub key: String,
    pub url: String,
    pub ttl_secs: u64,
}

impl Feed {
    pub fn request(&self) -> FeedRequest {
        FeedRequest {
            key: self.key.to_string(),
            url: self.url.to_string(),
            ttl_secs: self.ttl_secs,
        }
    }
}

/// Looks up a fixed-URL feed by name
pub fn get_feed_by_name(name: &str) -> Option<&'static Feed> {
    FEEDS.iter().find(|feed| feed.name == name)
}

/// Returns all fixed-URL feeds
pub fn all_feeds() -> &'static [Feed] {
    &FEEDS
}

/// Resolves a feed name and optional coin id into a request
///
/// # Returns
/// * `Ok(FeedRequest)` for a known feed with the right arguments
/// * `Err(FeedError)` for an unknown name, a missing/unexpected coin, or a bad coin id
pub fn resolve(name: &str, coin: Option<&str>) -> Result<FeedRequest, FeedError> {
    if let Some(feed) = get_feed_by_name(name) {
        return match coin {
            None => Ok(feed.request()),
            Some(_) => Err(FeedError::UnexpectedCoin(name.to_string())),
        };
    }

    let chart = CoinChart::from_name(name).ok_or_else(|| FeedError::UnknownFeed(name.to_string()))?;
    let coin = coin.ok_or_else(|| FeedError::MissingCoin(name.to_string()))?;
    chart.request(coin)
}

/// CoinGecko ids are lowercase slugs such as `usd-coin` or `wrapped-bitcoin`
fn is_coin_slug(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
