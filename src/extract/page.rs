use async_trait::async_trait;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::{ExtractError, ExtractedStream, StreamExtractor};
use crate::fetch::HttpClient;

/// Browser-free extractor.
///
/// A URL that already points at an `.m3u8` is used as is. Anything else is
/// fetched as HTML and scanned for the first playlist reference (quoted
/// attribute or script value, or a bare absolute URL; JSON-escaped slashes
/// are undone first) and an `og:image` or `poster` thumbnail.
pub struct PageExtractor {
    http: HttpClient,
    quoted_playlist: Regex,
    bare_playlist: Regex,
    og_image: Regex,
    poster: Regex,
}

impl PageExtractor {
    pub fn new(http: HttpClient) -> Result<Self, regex::Error> {
        Ok(Self {
            http,
            quoted_playlist: Regex::new(r#"(?i)["']([^"'<>\s]+?\.m3u8(?:\?[^"'<>\s]*)?)["']"#)?,
            bare_playlist: Regex::new(r#"(?i)https?://[^"'<>\s]+?\.m3u8(?:\?[^"'<>\s]*)?"#)?,
            og_image: Regex::new(
                r#"(?i)<meta[^>]+property\s*=\s*["']og:image["'][^>]*content\s*=\s*["']([^"']+)["']"#,
            )?,
            poster: Regex::new(r#"(?i)poster\s*=\s*["']([^"']+)["']"#)?,
        })
    }

    fn find_playlist(&self, html: &str, page_url: &Url) -> Option<Url> {
        let quoted = self
            .quoted_playlist
            .captures_iter(html)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()));
        let bare = self.bare_playlist.find_iter(html).map(|m| m.as_str());

        quoted.chain(bare).find_map(|raw| resolve(raw, page_url))
    }

    fn find_thumbnail(&self, html: &str, page_url: &Url) -> Option<String> {
        [&self.og_image, &self.poster]
            .into_iter()
            .filter_map(|re| re.captures(html).and_then(|c| c.get(1)))
            .find_map(|m| resolve(m.as_str(), page_url))
            .map(String::from)
    }
}

fn is_playlist_url(url: &Url) -> bool {
    url.path().to_ascii_lowercase().ends_with(".m3u8")
}

fn resolve(raw: &str, base: &Url) -> Option<Url> {
    let cleaned = raw.trim().replace("&amp;", "&").replace("\\u0026", "&");
    if cleaned.is_empty() || cleaned.starts_with("data:") || cleaned.starts_with("blob:") {
        return None;
    }
    base.join(&cleaned).ok()
}

#[async_trait]
impl StreamExtractor for PageExtractor {
    async fn extract(&self, page_url: &Url) -> Result<ExtractedStream, ExtractError> {
        if is_playlist_url(page_url) {
            return Ok(ExtractedStream {
                playlist_url: page_url.clone(),
                thumbnail: None,
            });
        }

        let html = self.http.get_text(page_url).await?.replace("\\/", "/");

        let playlist_url = self
            .find_playlist(&html, page_url)
            .ok_or_else(|| ExtractError::NotFound(page_url.to_string()))?;
        let thumbnail = self.find_thumbnail(&html, page_url);
        debug!(%page_url, %playlist_url, ?thumbnail, "Extracted stream");

        Ok(ExtractedStream {
            playlist_url,
            thumbnail,
        })
    }
}
