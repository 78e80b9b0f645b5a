use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ALLANIME_REFERRER, ALLMANGA_REFERRER, AnimeRef, Catalog, Language, Quality, Stream};
use crate::error::{Error, Result};
use crate::http::{RetryPolicy, get_text_with_retries};

const API_URL: &str = "https://api.allanime.day/api";
const SITE_URL: &str = "https://allanime.day";

const SEARCH_GQL: &str = "query( $search: SearchInput $limit: Int $page: Int $translationType: VaildTranslationTypeEnumType $countryOrigin: VaildCountryOriginEnumType ) { shows( search: $search limit: $limit page: $page translationType: $translationType countryOrigin: $countryOrigin ) { edges { _id name availableEpisodes __typename } }}";
const EPISODES_GQL: &str = "query ($showId: String!) { show( _id: $showId ) { _id availableEpisodesDetail }}";
const SOURCES_GQL: &str = "query ($showId: String!, $translationType: VaildTranslationTypeEnumType!, $episodeString: String!) { episode( showId: $showId translationType: $translationType episodeString: $episodeString ) { episodeString sourceUrls }}";

/// Obfuscated source urls are hex-encoded bytes XOR-ed with this key.
const SOURCE_URL_KEY: u8 = 56;

#[derive(Debug, Default)]
pub struct AllAnimeCatalog {
    policy: RetryPolicy,
}

impl AllAnimeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let variables = variables.to_string();
        let raw = get_text_with_retries(
            API_URL,
            ALLMANGA_REFERRER,
            &[("variables", variables.as_str()), ("query", query)],
            self.policy,
        )?;
        let parsed: Value = serde_json::from_str(&raw)?;
        if let Some(errors) = parsed.get("errors").filter(|errors| !errors.is_null()) {
            return Err(Error::CatalogResponse(errors.to_string()));
        }
        Ok(parsed)
    }

    fn resolve_source(&self, path: &str) -> Result<Vec<Stream>> {
        let url = format!("{SITE_URL}{}", path.replacen("/clock", "/clock.json", 1));
        let raw = get_text_with_retries(&url, ALLANIME_REFERRER, &[], self.policy)?;
        let parsed: Value = serde_json::from_str(&raw)?;
        Ok(parse_clock_links(&parsed))
    }
}

impl Catalog for AllAnimeCatalog {
    fn search(&self, query: &str) -> Result<Vec<AnimeRef>> {
        let variables = json!({
            "search": {"allowAdult": false, "allowUnknown": false, "query": query},
            "limit": 40,
            "page": 1,
            "translationType": Language::Sub.as_str(),
            "countryOrigin": "ALL",
        });
        let parsed = self.graphql(SEARCH_GQL, variables)?;
        Ok(parse_search_results(&parsed))
    }

    fn list_episodes(&self, anime: &AnimeRef, lang: Language) -> Result<Vec<u32>> {
        let parsed = self.graphql(EPISODES_GQL, json!({ "showId": anime.id }))?;
        Ok(parse_episode_numbers(&parsed, lang))
    }

    fn get_stream(
        &self,
        anime: &AnimeRef,
        episode: u32,
        lang: Language,
        quality: Quality,
    ) -> Result<Option<Stream>> {
        let variables = json!({
            "showId": anime.id,
            "translationType": lang.as_str(),
            "episodeString": episode.to_string(),
        });
        let parsed = self.graphql(SOURCES_GQL, variables)?;

        for source in parse_source_urls(&parsed) {
            let Some(decoded) = decode_source_url(&source.url) else {
                debug!(source = %source.name, "skipping undecodable source url");
                continue;
            };

            let streams = if decoded.starts_with("http") {
                vec![Stream {
                    url: decoded,
                    referrer: None,
                    quality: None,
                }]
            } else if decoded.starts_with('/') {
                match self.resolve_source(&decoded) {
                    Ok(streams) => streams,
                    Err(err) => {
                        debug!(source = %source.name, error = %err, "source resolution failed");
                        continue;
                    }
                }
            } else {
                continue;
            };

            if let Some(stream) = select_quality(streams, quality) {
                info!(anime = %anime.name, episode, source = %source.name, "stream resolved");
                return Ok(Some(stream));
            }
        }

        Ok(None)
    }
}

pub(crate) fn parse_search_results(parsed: &Value) -> Vec<AnimeRef> {
    let Some(edges) = parsed
        .pointer("/data/shows/edges")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    edges
        .iter()
        .filter_map(|edge| {
            let id = edge.get("_id")?.as_str()?.trim();
            let name = edge.get("name")?.as_str()?.trim();
            if id.is_empty() || name.is_empty() {
                return None;
            }
            let available_episodes = edge
                .pointer("/availableEpisodes/sub")
                .and_then(Value::as_u64)
                .and_then(|count| u32::try_from(count).ok());
            Some(AnimeRef {
                id: id.to_string(),
                name: name.to_string(),
                available_episodes,
            })
        })
        .collect()
}

/// Whole-numbered episodes for `lang`, ascending; specials such as "13.5" are dropped.
pub(crate) fn parse_episode_numbers(parsed: &Value, lang: Language) -> Vec<u32> {
    let Some(items) = parsed
        .pointer("/data/show/availableEpisodesDetail")
        .and_then(|detail| detail.get(lang.as_str()))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut episodes: Vec<u32> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(text) => text.trim().parse::<u32>().ok(),
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        })
        .filter(|episode| *episode > 0)
        .collect();
    episodes.sort_unstable();
    episodes.dedup();
    episodes
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SourceUrl {
    pub(crate) url: String,
    pub(crate) name: String,
    pub(crate) priority: f64,
}

/// Episode sources, highest priority first.
pub(crate) fn parse_source_urls(parsed: &Value) -> Vec<SourceUrl> {
    let Some(items) = parsed
        .pointer("/data/episode/sourceUrls")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut sources: Vec<SourceUrl> = items
        .iter()
        .filter_map(|item| {
            let url = item.get("sourceUrl")?.as_str()?.trim();
            if url.is_empty() {
                return None;
            }
            Some(SourceUrl {
                url: url.to_string(),
                name: item
                    .get("sourceName")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                priority: item.get("priority").and_then(Value::as_f64).unwrap_or(0.0),
            })
        })
        .collect();
    sources.sort_by(|left, right| right.priority.total_cmp(&left.priority));
    sources
}

pub(crate) fn decode_source_url(raw: &str) -> Option<String> {
    let Some(encoded) = raw.strip_prefix("--") else {
        return Some(raw.to_string());
    };
    if encoded.len() % 2 != 0 {
        return None;
    }

    let bytes = encoded
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok().map(|byte| byte ^ SOURCE_URL_KEY)
        })
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

pub(crate) fn parse_clock_links(parsed: &Value) -> Vec<Stream> {
    let Some(links) = parsed.get("links").and_then(Value::as_array) else {
        return Vec::new();
    };

    links
        .iter()
        .filter_map(|link| {
            let url = link.get("link")?.as_str()?.trim();
            if url.is_empty() {
                return None;
            }
            let quality = link
                .get("resolutionStr")
                .and_then(Value::as_str)
                .and_then(parse_resolution);
            let referrer = link
                .pointer("/headers/Referer")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(Stream {
                url: url.to_string(),
                referrer,
                quality,
            })
        })
        .collect()
}

fn parse_resolution(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

pub(crate) fn select_quality(streams: Vec<Stream>, quality: Quality) -> Option<Stream> {
    let best = |streams: Vec<Stream>| streams.into_iter().max_by_key(|s| s.quality.unwrap_or(0));
    match quality {
        Quality::Best => best(streams),
        Quality::Worst => streams
            .into_iter()
            .min_by_key(|s| s.quality.unwrap_or(u32::MAX)),
        Quality::Height(height) => {
            if let Some(idx) = streams.iter().position(|s| s.quality == Some(height)) {
                let mut streams = streams;
                Some(streams.swap_remove(idx))
            } else {
                best(streams)
            }
        }
    }
}
