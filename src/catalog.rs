use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{DiscoveredItem, ItemId};
use crate::error::CategoryError;

pub const DEFAULT_CATALOG_URL: &str = "https://www.svtplay.se/kategori/filmer?tab=all";
const SITE_ROOT: &str = "https://www.svtplay.se";
const NEXT_DATA_PATTERN: &str = r#"<script\s+id="__NEXT_DATA__"[^>]*>(\{.+\})</script>"#;

/// Enumerates the items of a catalog page in a stable order.
pub trait Catalog {
    fn discover(&self, catalog_url: &str) -> Result<Vec<DiscoveredItem>, CategoryError>;
}

pub struct SvtPlayCatalog {
    client: Client,
    next_data: Regex,
}

impl SvtPlayCatalog {
    pub fn new() -> Result<Self, CategoryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
            ),
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("sv-SE,sv;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| CategoryError::CatalogHttp(err.to_string()))?;
        let next_data =
            Regex::new(NEXT_DATA_PATTERN).map_err(|err| CategoryError::CatalogParse(err.to_string()))?;
        Ok(Self { client, next_data })
    }

    fn fetch_html(&self, url: &str) -> Result<String, CategoryError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CategoryError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(CategoryError::CatalogStatus { status, message });
        }
        response
            .text()
            .map_err(|err| CategoryError::CatalogHttp(err.to_string()))
    }

    fn page_json(&self, html: &str) -> Option<Value> {
        let captures = self.next_data.captures(html)?;
        serde_json::from_str(captures.get(1)?.as_str()).ok()
    }

    fn series_item(&self, id: ItemId, fallback_name: String) -> Result<DiscoveredItem, CategoryError> {
        let html = self.fetch_html(id.as_str())?;
        let details = self.page_json(&html).and_then(|page| find_details(&page));
        let Some(details) = details else {
            return Err(CategoryError::CatalogParse(format!(
                "no details found on {id}"
            )));
        };
        let name = series_name(&details).unwrap_or(fallback_name);
        let children = episode_urls(&details);
        Ok(DiscoveredItem::series(id, children).with_name(name))
    }
}

impl Catalog for SvtPlayCatalog {
    fn discover(&self, catalog_url: &str) -> Result<Vec<DiscoveredItem>, CategoryError> {
        info!(url = catalog_url, "fetching category page");
        let html = self.fetch_html(catalog_url)?;
        let page = self.page_json(&html).ok_or_else(|| {
            CategoryError::CatalogParse("could not extract embedded JSON from category page".to_string())
        })?;
        let listing = category_listing(&page);
        if listing.is_empty() {
            return Err(CategoryError::EmptyCatalog);
        }
        info!(
            category = %category_name(&page, catalog_url),
            count = listing.len(),
            "found items in category listing"
        );

        let mut items = Vec::with_capacity(listing.len());
        for (index, entry) in listing.iter().enumerate() {
            let Some((id, is_single)) = listing_entry(entry) else {
                warn!(index, "skipping malformed catalog entry");
                continue;
            };
            if is_single {
                items.push(DiscoveredItem::standalone(id));
                continue;
            }
            debug!(series = %id, "fetching series page");
            let name = id.slug().to_string();
            match self.series_item(id.clone(), name) {
                Ok(item) => items.push(item),
                Err(err) => warn!(series = %id, error = %err, "skipping series this run"),
            }
        }
        Ok(items)
    }
}

fn urql_entries(page: &Value) -> Vec<Value> {
    let Some(state) = page
        .pointer("/props/urqlState")
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };
    state
        .values()
        .filter_map(|entry| entry.get("data")?.as_str())
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

fn category_name(page: &Value, url: &str) -> String {
    for entry in urql_entries(page) {
        if let Some(category) = entry.get("categoryPage") {
            for field in ["heading", "name"] {
                if let Some(value) = category.get(field).and_then(Value::as_str) {
                    if !value.is_empty() {
                        return value.to_string();
                    }
                }
            }
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let parts: Vec<&str> = path
        .trim_start_matches("https://")
        .split('/')
        .skip(1)
        .filter(|part| !part.is_empty())
        .collect();
    match parts.as_slice() {
        ["kategori", name, ..] => name.replace('-', " "),
        _ => "Unknown".to_string(),
    }
}

fn category_listing(page: &Value) -> Vec<Value> {
    let mut items = Vec::new();
    for entry in urql_entries(page) {
        let Some(tabs) = entry
            .pointer("/categoryPage/lazyLoadedTabs")
            .and_then(Value::as_array)
        else {
            continue;
        };
        for tab in tabs.iter().filter(|tab| tab.get("slug") == Some(&Value::from("all"))) {
            let modules = tab.get("modules").and_then(Value::as_array);
            for module in modules.into_iter().flatten() {
                if let Some(selection) = module.pointer("/selection/items").and_then(Value::as_array) {
                    items.extend(selection.iter().cloned());
                }
            }
        }
    }
    items
}

fn listing_entry(entry: &Value) -> Option<(ItemId, bool)> {
    let item = entry.get("item")?;
    let path = item.pointer("/urls/svtplay")?.as_str()?;
    let id = absolute_url(path).parse().ok()?;
    let is_single = item.get("__typename").and_then(Value::as_str) == Some("Single");
    Some((id, is_single))
}

fn find_details(page: &Value) -> Option<Value> {
    let details: Vec<Value> = urql_entries(page)
        .into_iter()
        .filter_map(|entry| entry.get("detailsPageByPath").cloned())
        .filter(Value::is_object)
        .collect();
    details
        .iter()
        .find(|data| data.get("smartStart").is_some())
        .or_else(|| details.iter().find(|data| data.get("item").is_some()))
        .cloned()
}

fn series_name(details: &Value) -> Option<String> {
    details
        .pointer("/item/parent/name")
        .or_else(|| details.pointer("/item/name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn episode_urls(details: &Value) -> Vec<ItemId> {
    let mut videos: Vec<ItemId> = Vec::new();
    let modules = details.get("modules").and_then(Value::as_array);
    for module in modules.into_iter().flatten() {
        let module_id = module.get("id").and_then(Value::as_str).unwrap_or_default();
        if matches!(module_id, "upcoming" | "related")
            || module_id.starts_with("details")
            || module_id.contains("clips")
        {
            continue;
        }
        let entries = module.pointer("/selection/items").and_then(Value::as_array);
        for entry in entries.into_iter().flatten() {
            let Some(path) = entry.pointer("/item/urls/svtplay").and_then(Value::as_str) else {
                continue;
            };
            if let Ok(id) = absolute_url(path).parse::<ItemId>() {
                if !videos.contains(&id) {
                    videos.push(id);
                }
            }
        }
    }
    videos
}

fn absolute_url(path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{SITE_ROOT}{path}")
    } else {
        format!("{SITE_ROOT}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn page(entries: Vec<Value>) -> Value {
        let state: serde_json::Map<String, Value> = entries
            .into_iter()
            .enumerate()
            .map(|(index, data)| (index.to_string(), json!({ "data": data.to_string() })))
            .collect();
        json!({ "props": { "urqlState": state } })
    }

    #[test]
    fn extracts_listing_from_all_tab() {
        let page = page(vec![json!({
            "categoryPage": {
                "heading": "Filmer",
                "lazyLoadedTabs": [
                    { "slug": "popular", "modules": [{ "selection": { "items": [{ "item": {} }] } }] },
                    { "slug": "all", "modules": [{ "selection": { "items": [
                        { "item": { "__typename": "Single", "urls": { "svtplay": "/video/1/film" } } },
                        { "item": { "__typename": "TvSeries", "urls": { "svtplay": "/serie" } } }
                    ] } }] }
                ]
            }
        })]);

        let listing = category_listing(&page);
        assert_eq!(listing.len(), 2);
        let (id, single) = listing_entry(&listing[0]).unwrap();
        assert_eq!(id.as_str(), "https://www.svtplay.se/video/1/film");
        assert!(single);
        assert!(!listing_entry(&listing[1]).unwrap().1);
        assert_eq!(category_name(&page, DEFAULT_CATALOG_URL), "Filmer");
    }

    #[test]
    fn category_name_falls_back_to_url() {
        let empty = page(vec![]);
        assert_eq!(
            category_name(&empty, "https://www.svtplay.se/kategori/dokumentar-serier?tab=all"),
            "dokumentar serier"
        );
    }

    #[test]
    fn episode_urls_skip_clips_and_duplicates() {
        let details = json!({
            "item": { "parent": { "name": "Show" } },
            "modules": [
                { "id": "season-1", "selection": { "items": [
                    { "item": { "urls": { "svtplay": "/video/a" } } },
                    { "item": { "urls": { "svtplay": "/video/b" } } },
                    { "item": { "urls": { "svtplay": "/video/a" } } }
                ] } },
                { "id": "show-clips", "selection": { "items": [
                    { "item": { "urls": { "svtplay": "/video/clip" } } }
                ] } },
                { "id": "related", "selection": { "items": [
                    { "item": { "urls": { "svtplay": "/video/other" } } }
                ] } }
            ]
        });
        let urls: Vec<String> = episode_urls(&details)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            urls,
            vec!["https://www.svtplay.se/video/a", "https://www.svtplay.se/video/b"]
        );
        assert_eq!(series_name(&details).as_deref(), Some("Show"));
    }

    #[test]
    fn details_prefer_smart_start() {
        let page = page(vec![
            json!({ "detailsPageByPath": { "item": { "name": "plain" } } }),
            json!({ "detailsPageByPath": { "smartStart": {}, "item": { "name": "smart" } } }),
        ]);
        let details = find_details(&page).unwrap();
        assert_eq!(series_name(&details).as_deref(), Some("smart"));
    }

    #[test]
    fn next_data_is_extracted_from_html() {
        let catalog = SvtPlayCatalog::new().unwrap();
        let html = r#"<html><script id="__NEXT_DATA__" type="application/json">{"props":{}}</script></html>"#;
        assert_eq!(catalog.page_json(html), Some(json!({ "props": {} })));
        assert_eq!(catalog.page_json("<html></html>"), None);
    }
}
