//! Stage A: place page extraction

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::http::{self, HttpSettings};
use super::{Extractor, StageOutput};
use crate::error::ExtractError;
use crate::identity::Identity;
use crate::types::Stage;

/// Fields read from a place page's Open Graph metadata
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaceFields {
    /// `og:title`, trimmed
    pub title: Option<String>,
    /// `og:image`, resolved against the page URL
    pub image_url: Option<String>,
}

impl PlaceFields {
    /// Parse `html` served from `page_url`
    pub fn parse(html: &str, page_url: Option<&Url>) -> Self {
        let document = Html::parse_document(html);

        let title = meta_content(&document, "og:title");
        let image_url = meta_content(&document, "og:image").map(|raw| match page_url {
            Some(base) if Url::parse(&raw).is_err() => {
                base.join(&raw).map(String::from).unwrap_or(raw)
            }
            _ => raw,
        });

        Self { title, image_url }
    }
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!(r#"meta[property="{property}"]"#)).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(String::from)
}

/// Fetches a place page and extracts its address and image URL
#[derive(Clone, Debug)]
pub struct PageExtractor {
    http: HttpSettings,
    blocked_titles: Vec<String>,
}

impl PageExtractor {
    /// Create an extractor that rejects pages titled with any of `blocked_titles`
    pub fn new(http: HttpSettings, blocked_titles: Vec<String>) -> Self {
        Self {
            http,
            blocked_titles,
        }
    }

    /// Whether `title` is a challenge-page marker rather than a place
    pub fn is_blocked(&self, title: &str) -> bool {
        let title = title.trim();
        self.blocked_titles
            .iter()
            .any(|blocked| blocked.trim().eq_ignore_ascii_case(title))
    }

    /// Validate parsed fields into a Stage A result
    ///
    /// The blocked-title check runs before success is declared, whatever the
    /// response status was.
    pub fn evaluate(&self, fields: PlaceFields) -> Result<StageOutput, ExtractError> {
        let address = fields
            .title
            .ok_or(ExtractError::MissingField { field: "address" })?;
        if self.is_blocked(&address) {
            return Err(ExtractError::BlockedContent { title: address });
        }
        let image_url = fields
            .image_url
            .ok_or(ExtractError::MissingField { field: "image_url" })?;

        Ok(StageOutput::Page { address, image_url })
    }
}

#[async_trait]
impl Extractor for PageExtractor {
    fn stage(&self) -> Stage {
        Stage::Scrape
    }

    async fn extract(
        &self,
        target: &str,
        identity: &Identity,
    ) -> Result<StageOutput, ExtractError> {
        let client = http::build_client(identity, &self.http)?;
        let response = http::get(&client, target).await?;
        let page_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::from_reqwest(&e))?;

        self.evaluate(PlaceFields::parse(&body, Some(&page_url)))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ProxyRoute;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn place_html(title: &str, image: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html><head>
<meta property="og:title" content="{title}">
<meta property="og:image" content="{image}">
<title>ignored</title>
</head><body></body></html>"#
        )
    }

    fn extractor() -> PageExtractor {
        let http = HttpSettings {
            timeout: Duration::from_secs(2),
            use_proxy: false,
        };
        PageExtractor::new(http, vec!["Google Maps".to_string()])
    }

    fn identity() -> Identity {
        Identity {
            route: ProxyRoute::parse("127.0.0.1:9:user:pass").unwrap(),
            user_agent: "PlaceHarvestTest/1.0".into(),
        }
    }

    async fn serve(status: u16, body: String) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/place/1"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    #[test]
    fn parse_reads_open_graph_fields() {
        let html = place_html("12 Harbour Rd, Springfield", "https://cdn.example/p/1.jpg");
        let fields = PlaceFields::parse(&html, None);
        assert_eq!(fields.title.as_deref(), Some("12 Harbour Rd, Springfield"));
        assert_eq!(fields.image_url.as_deref(), Some("https://cdn.example/p/1.jpg"));
    }

    #[test]
    fn parse_resolves_relative_image_against_page() {
        let html = place_html("Cafe", "/photos/1.png");
        let base = Url::parse("https://maps.example/place/1").unwrap();
        let fields = PlaceFields::parse(&html, Some(&base));
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://maps.example/photos/1.png")
        );
    }

    #[test]
    fn blank_meta_counts_as_missing() {
        let html = place_html("   ", "https://cdn.example/p/1.jpg");
        let err = extractor()
            .evaluate(PlaceFields::parse(&html, None))
            .unwrap_err();
        assert_eq!(err, ExtractError::MissingField { field: "address" });
    }

    #[test]
    fn blocked_title_match_is_trimmed_and_case_insensitive() {
        let e = extractor();
        assert!(e.is_blocked("Google Maps"));
        assert!(e.is_blocked("  google maps "));
        assert!(!e.is_blocked("Google Maps Cafe"));
    }

    #[tokio::test]
    async fn extracts_address_and_image_url() {
        let mock_server = serve(
            200,
            place_html("12 Harbour Rd, Springfield", "https://cdn.example/p/1.jpg"),
        )
        .await;

        let output = extractor()
            .extract(&format!("{}/place/1", mock_server.uri()), &identity())
            .await
            .unwrap();
        assert_eq!(
            output,
            StageOutput::Page {
                address: "12 Harbour Rd, Springfield".into(),
                image_url: "https://cdn.example/p/1.jpg".into(),
            }
        );
    }

    #[tokio::test]
    async fn sentinel_title_with_success_status_is_blocked() {
        let mock_server = serve(200, place_html("Google Maps", "http://x/y.jpg")).await;

        let err = extractor()
            .extract(&format!("{}/place/1", mock_server.uri()), &identity())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExtractError::BlockedContent {
                title: "Google Maps".into()
            }
        );
        assert_eq!(err.kind(), crate::error::FailureKind::Extraction);
    }

    #[tokio::test]
    async fn missing_image_meta_is_extraction_error() {
        let html = r#"<html><head><meta property="og:title" content="Cafe"></head></html>"#;
        let mock_server = serve(200, html.to_string()).await;

        let err = extractor()
            .extract(&format!("{}/place/1", mock_server.uri()), &identity())
            .await
            .unwrap_err();
        assert_eq!(err, ExtractError::MissingField { field: "image_url" });
    }

    #[tokio::test]
    async fn server_error_is_response_error() {
        let mock_server = serve(503, String::new()).await;

        let err = extractor()
            .extract(&format!("{}/place/1", mock_server.uri()), &identity())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Response { status: 503, .. }));
    }

    #[tokio::test]
    async fn slow_response_is_transport_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/place/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(place_html("Cafe", "http://x/y.jpg"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let err = extractor()
            .extract(&format!("{}/place/1", mock_server.uri()), &identity())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Transport);
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        // bind then drop a listener so the port is known to be closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = extractor()
            .extract(&format!("http://{addr}/place/1"), &identity())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::Transport);
    }
}
