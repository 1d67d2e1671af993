//! Direct email + RSS fetching that bypasses the source manager.
//!
//! Only used when the manager itself cannot produce a source list.

use research_shared::{AppConfig, ContentItem, Result};
use tracing::{info, instrument, warn};

use crate::email::{EmailClient, EmailSourceConfig};
use crate::rss::RssClient;

/// The two fixed clients of the pre-plugin pipeline.
#[derive(Debug, Clone)]
pub struct LegacyFetcher {
    email: Option<EmailClient>,
    rss: RssClient,
}

impl LegacyFetcher {
    /// Email comes from the `[email]` settings (skipped without a username),
    /// feeds from `rss_feeds.json`.
    pub fn from_settings(settings: &AppConfig) -> Result<Self> {
        let email = if settings.email.username.is_empty() {
            None
        } else {
            Some(EmailClient::new(EmailSourceConfig::from(&settings.email)))
        };
        let rss = RssClient::from_feeds_file(&settings.paths.rss_feeds_file())?;
        Ok(Self { email, rss })
    }

    pub fn new(email: Option<EmailClient>, rss: RssClient) -> Self {
        Self { email, rss }
    }

    /// Emails first, then podcast episodes. A failing mailbox fails the call.
    #[instrument(skip_all)]
    pub async fn fetch_all(&self) -> Result<Vec<ContentItem>> {
        let mut content = match &self.email {
            Some(client) => client.fetch_unread().await?,
            None => {
                warn!("no email account configured for legacy fetch");
                Vec::new()
            }
        };
        let emails = content.len();

        content.extend(self.rss.fetch_new_episodes().await);
        info!(emails, episodes = content.len() - emails, "legacy fetch finished");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rss_only_fetch_without_mailbox() {
        let server = wiremock::MockServer::start().await;
        let published = chrono::Utc::now().to_rfc2822();
        let body = format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Deep Dive</title>
            <item><title>Ep 1</title><link>https://pod.example/1</link>
            <description>Plenty of episode notes for the listener.</description>
            <pubDate>{published}</pubDate></item></channel></rss>"#
        );
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let feeds = vec![(
            "deep_dive".to_string(),
            serde_json::from_value(serde_json::json!({
                "name": "Deep Dive",
                "rss_url": format!("{}/feed", server.uri()),
            }))
            .unwrap(),
        )];
        let fetcher = LegacyFetcher::new(None, RssClient::new(feeds).unwrap());

        let items = fetcher.fetch_all().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, "Deep Dive Podcast");
        assert_eq!(items[0].source_type, "podcast");
    }

    #[test]
    fn mailbox_requires_username() {
        let mut settings = AppConfig::default();
        settings.paths.data_dir = std::env::temp_dir()
            .join(format!("legacy-test-{}", uuid::Uuid::now_v7()))
            .display()
            .to_string();
        assert!(LegacyFetcher::from_settings(&settings).unwrap().email.is_none());

        settings.email.username = "reader@example.com".into();
        let fetcher = LegacyFetcher::from_settings(&settings).unwrap();
        assert_eq!(fetcher.email.unwrap().config().port, 993);
    }
}
