use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{PileError, Result};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'`\]\)]+"#).unwrap());

static YOUTUBE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/)([a-zA-Z0-9_-]{11})")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkPreview {
    pub url: String,
    pub host: String,
    pub title: String,
    pub description: String,
    pub image: String,
    pub favicon: String,
}

/// http(s) links found in entry content, first occurrence order, no duplicates.
pub fn extract_links(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    URL_PATTERN
        .find_iter(content)
        .map(|m| {
            m.as_str()
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
                .to_string()
        })
        .filter(|url| url::Url::parse(url).is_ok())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Video id when `url` points at a YouTube video.
pub fn youtube_video_id(url: &str) -> Option<String> {
    YOUTUBE_PATTERN
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Preview metadata from a fetched page.
pub fn parse_link_preview(url: &str, html: &str) -> Result<LinkPreview> {
    let base_url = url::Url::parse(url).map_err(|e| PileError::InvalidPath(format!("{}: {}", url, e)))?;
    let document = Html::parse_document(html);

    let select_attr = |selector: &str, attr: &str| -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .next()?
            .value()
            .attr(attr)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let meta_property = |property: &str| select_attr(&format!("meta[property='{}']", property), "content");
    let meta_name = |name: &str| select_attr(&format!("meta[name='{}']", name), "content");

    let title = meta_property("og:title")
        .or_else(|| {
            let selector = Selector::parse("title").ok()?;
            let text: String = document.select(&selector).next()?.text().collect();
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| url.to_string());

    let description = meta_property("og:description")
        .or_else(|| meta_name("description"))
        .unwrap_or_default();

    let image = meta_property("og:image")
        .or_else(|| meta_name("twitter:image"))
        .or_else(|| meta_property("twitter:image"))
        .and_then(|src| base_url.join(&src).ok())
        .map(|u| u.to_string())
        .unwrap_or_default();

    let favicon = select_attr("link[rel*='icon']", "href")
        .and_then(|href| base_url.join(&href).ok())
        .or_else(|| base_url.join("/favicon.ico").ok())
        .map(|u| u.to_string())
        .unwrap_or_default();

    Ok(LinkPreview {
        url: url.to_string(),
        host: base_url.host_str().unwrap_or_default().to_string(),
        title,
        description,
        image,
        favicon,
    })
}

/// Fetch a page and build its preview. Blocks the calling thread.
pub fn fetch_link_preview(url: &str) -> Result<LinkPreview> {
    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()?;
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(PileError::Service(format!("{} returned {}", url, status)));
    }
    let html = response.text()?;
    log::debug!("[Preview] Fetched {} ({} bytes)", url, html.len());
    parse_link_preview(url, &html)
}
