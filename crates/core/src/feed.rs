// crates/core/src/feed.rs
//! RSS 2.0 feed over completed episodes.
//!
//! Only jobs that reached [`JobStatus::Done`] with a public URL become
//! items; the URL doubles as the enclosure.

use chrono::{DateTime, Utc};

use crate::job::{JobSnapshot, JobStatus};

/// Object key the feed is uploaded under unless `RSS_FEED_PATH` says otherwise.
pub const DEFAULT_FEED_KEY: &str = "feed.rss";

pub const RSS_CONTENT_TYPE: &str = "application/rss+xml";

/// Channel metadata for the published feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub title: String,
    pub description: String,
    pub author: String,
    pub email: String,
    /// Public site the feed belongs to.
    pub base_url: String,
    /// Object key of the uploaded feed, relative to the bucket root.
    pub key: String,
    /// MIME type advertised on every enclosure.
    pub enclosure_type: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            title: "The Neural Narrative".to_string(),
            description: "An AI-generated podcast about technology.".to_string(),
            author: "AI Podcast Generator".to_string(),
            email: "ai@example.com".to_string(),
            base_url: "https://example.com/podcast".to_string(),
            key: DEFAULT_FEED_KEY.to_string(),
            enclosure_type: "audio/mpeg".to_string(),
        }
    }
}

impl FeedConfig {
    /// Where the feed itself is published.
    pub fn self_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.key)
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn element(xml: &mut String, indent: &str, name: &str, text: &str) {
    xml.push_str(&format!("{indent}<{name}>{}</{name}>\n", xml_escape(text)));
}

fn episode_title(job: &JobSnapshot) -> String {
    match job.params.get("topic").and_then(|t| t.as_str()) {
        Some(topic) if !topic.trim().is_empty() => topic.trim().to_string(),
        _ => format!("Episode {}", job.id),
    }
}

/// Render the feed. `jobs` may hold any mix of states; item order follows
/// the input, so pass them newest first.
pub fn render_feed(config: &FeedConfig, jobs: &[JobSnapshot], built_at: DateTime<Utc>) -> String {
    let mut xml = String::with_capacity(1024);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<rss version=\"2.0\" xmlns:atom=\"http://www.w3.org/2005/Atom\">\n");
    xml.push_str("  <channel>\n");
    element(&mut xml, "    ", "title", &config.title);
    element(&mut xml, "    ", "link", &config.base_url);
    xml.push_str(&format!(
        "    <atom:link href=\"{}\" rel=\"self\" type=\"{RSS_CONTENT_TYPE}\"/>\n",
        xml_escape(&config.self_url())
    ));
    element(&mut xml, "    ", "description", &config.description);
    element(&mut xml, "    ", "language", "en");
    element(
        &mut xml,
        "    ",
        "managingEditor",
        &format!("{} ({})", config.email, config.author),
    );
    element(&mut xml, "    ", "lastBuildDate", &built_at.to_rfc2822());

    for job in jobs.iter().filter(|j| j.status == JobStatus::Done) {
        let Some(url) = job.result_url.as_deref() else {
            continue;
        };
        let published = job.completed_at.unwrap_or(job.created_at);
        xml.push_str("    <item>\n");
        element(&mut xml, "      ", "title", &episode_title(job));
        element(&mut xml, "      ", "link", url);
        xml.push_str(&format!(
            "      <guid isPermaLink=\"false\">{}</guid>\n",
            xml_escape(job.id.as_str())
        ));
        element(
            &mut xml,
            "      ",
            "description",
            &format!("{} from {}", episode_title(job), config.title),
        );
        xml.push_str(&format!(
            "      <enclosure url=\"{}\" length=\"0\" type=\"{}\"/>\n",
            xml_escape(url),
            xml_escape(&config.enclosure_type)
        ));
        element(&mut xml, "      ", "pubDate", &published.to_rfc2822());
        xml.push_str("    </item>\n");
    }

    xml.push_str("  </channel>\n");
    xml.push_str("</rss>\n");
    xml
}
