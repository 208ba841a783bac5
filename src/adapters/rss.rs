//! RSS 2.0 source adapter.
//!
//! Fetches a feed over HTTP and maps each `<item>` to a raw record with
//! `title`, `link`, `guid`, `description`, `pubDate`, `categories` and
//! `images`. Conditional GET is used when the server supplies an `ETag`:
//! the tag travels as the fetch cursor and a 304 yields an empty batch.

use async_trait::async_trait;
use quick_xml::de::from_str;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{FetchBatch, SourceAdapter};
use crate::core::error::FetchError;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<Text>,
    enclosure: Option<Enclosure>,
}

/// Element whose text we want, ignoring attributes
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type", default)]
    mime: Option<String>,
}

/// Polls an RSS feed
pub struct RssSource {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl RssSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl SourceAdapter for RssSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchBatch, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(etag) = cursor {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            debug!(feed = %self.url, "Feed not modified");
            let batch = FetchBatch::default();
            return Ok(match cursor {
                Some(c) => batch.with_cursor(c),
                None => batch,
            });
        }
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), &self.url));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let body = response.text().await?;
        let items = parse_feed(&body)?;

        let batch = FetchBatch::new(items);
        Ok(match etag {
            Some(tag) => batch.with_cursor(tag),
            None => batch,
        })
    }
}

/// Parse an RSS document into raw records, in feed order
pub fn parse_feed(xml: &str) -> Result<Vec<Value>, FetchError> {
    let cleaned = scrub_html_entities(xml);
    let rss: Rss =
        from_str(&cleaned).map_err(|e| FetchError::permanent(format!("invalid RSS: {}", e)))?;

    Ok(rss.channel.item.into_iter().map(item_to_raw).collect())
}

fn item_to_raw(item: RssItem) -> Value {
    let mut obj = Map::new();
    let description = item.description.unwrap_or_default();

    let mut images = Vec::new();
    if let Some(enclosure) = &item.enclosure {
        let is_image = enclosure
            .mime
            .as_deref()
            .map(|m| m.starts_with("image/"))
            .unwrap_or(true);
        if is_image {
            images.push(enclosure.url.clone());
        }
    }
    images.extend(first_img_src(&description));

    if let Some(title) = item.title {
        obj.insert("title".into(), json!(strip_tags(&title)));
    }
    if let Some(link) = item.link {
        obj.insert("link".into(), json!(link.trim()));
    }
    if let Some(guid) = item.guid {
        obj.insert("guid".into(), json!(guid.value.trim()));
    }
    if !description.is_empty() {
        obj.insert("description".into(), json!(strip_tags(&description)));
    }
    if let Some(date) = item.pub_date {
        obj.insert("pubDate".into(), json!(date));
    }
    let categories: Vec<String> = item
        .categories
        .into_iter()
        .map(|c| c.value.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if !categories.is_empty() {
        obj.insert("categories".into(), json!(categories));
    }
    if !images.is_empty() {
        obj.insert("images".into(), json!(images));
    }

    Value::Object(obj)
}

/// Named HTML entities that are not valid XML
fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Remove markup from an HTML fragment, leaving its text
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `src` of the first `<img>` in an HTML fragment
fn first_img_src(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let tag_start = lower.find("<img")?;
    let tag_end = lower[tag_start..].find('>').map(|i| tag_start + i)?;
    let tag = &html[tag_start..tag_end];
    let tag_lower = &lower[tag_start..tag_end];

    let attr = tag_lower.find("src=")?;
    let rest = &tag[attr + 4..];
    let quote = rest.chars().next()?;
    let value = if quote == '"' || quote == '\'' {
        let inner = &rest[1..];
        &inner[..inner.find(quote)?]
    } else {
        rest.split_whitespace().next()?
    };

    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Local News</title>
    <item>
      <title>Fruita council approves budget</title>
      <link>https://news.example/fruita-budget</link>
      <guid isPermaLink="true">https://news.example/fruita-budget</guid>
      <description><![CDATA[<p>The council&nbsp;voted <b>5-2</b>.</p><img src="/img/budget.jpg">]]></description>
      <pubDate>Tue, 28 Oct 2025 14:00:00 +0000</pubDate>
      <category domain="tags">Local News</category>
      <category>Politics</category>
    </item>
    <item>
      <title>Second story</title>
      <link>https://news.example/second</link>
      <enclosure url="https://cdn.example/second.jpg" type="image/jpeg" length="0"/>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed_items_in_order() {
        let items = parse_feed(FEED).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first["title"], "Fruita council approves budget");
        assert_eq!(first["link"], "https://news.example/fruita-budget");
        assert_eq!(first["description"], "The council voted 5-2 .");
        assert_eq!(first["categories"], json!(["Local News", "Politics"]));
        assert_eq!(first["images"], json!(["/img/budget.jpg"]));

        assert_eq!(items[1]["images"], json!(["https://cdn.example/second.jpg"]));
    }

    #[test]
    fn test_empty_channel() {
        let items = parse_feed("<rss><channel><title>x</title></channel></rss>").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_garbage_is_permanent() {
        let err = parse_feed("<html><body>Not a feed</body></html>").unwrap_err();
        assert_eq!(err.kind, crate::core::error::FetchErrorKind::Permanent);
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<p>Hello &amp; <i>welcome</i></p>"), "Hello & welcome");
    }
}
