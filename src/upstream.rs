//! Client for the remote board service.
//!
//! Every board request carries the session cookie; all requests have a bounded
//! timeout.
//! Only message submission opts out of redirect following, so the caller can
//! relay the upstream redirect as-is.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{COOKIE, LOCATION};
use reqwest::{redirect, Client, RequestBuilder, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cookie the upstream expects before it renders board content.
pub const SESSION_COOKIE: &str = "yuki=True";

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL: {0}")]
    Url(String),
    #[error("client build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("instance list at {0} is empty")]
    EmptyInstance(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => UpstreamError::Status {
                status: status.as_u16(),
                url: e.url().map(Url::to_string).unwrap_or_default(),
            },
            None => UpstreamError::Network(e.to_string()),
        }
    }
}

/// Process-wide upstream base URL. Readers take a snapshot; a reload swaps
/// the whole value.
#[derive(Clone, Debug)]
pub struct BaseUrl(Arc<RwLock<Arc<str>>>);

impl BaseUrl {
    pub fn new(url: &str) -> Result<Self, UpstreamError> {
        Ok(Self(Arc::new(RwLock::new(normalize(url)?))))
    }

    pub fn snapshot(&self) -> Arc<str> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn replace(&self, url: &str) -> Result<Arc<str>, UpstreamError> {
        let url = normalize(url)?;
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = url.clone();
        Ok(url)
    }
}

fn normalize(url: &str) -> Result<Arc<str>, UpstreamError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(UpstreamError::Url("empty".to_string()));
    }
    Url::parse(url).map_err(|e| UpstreamError::Url(format!("{url}: {e}")))?;
    if url.ends_with('/') {
        Ok(Arc::from(url))
    } else {
        Ok(Arc::from(format!("{url}/")))
    }
}

/// Query parameters shared by the board page and the snapshot API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardQuery {
    pub name: String,
    pub seed: String,
    pub channel: String,
    pub verify: String,
}

/// A post forwarded to the board. `message` already has newlines turned
/// into `<br>`.
#[derive(Debug, Clone)]
pub struct Submission {
    pub name: String,
    pub message: String,
    pub seed: String,
    pub channel: String,
    pub verify: String,
    pub info: String,
}

/// Raw upstream reply to a submission, redirects included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relayed {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

#[derive(Clone)]
pub struct Upstream {
    base: BaseUrl,
    client: Client,
    submit_client: Client,
}

impl Upstream {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let build = |policy: redirect::Policy| {
            Client::builder()
                .connect_timeout(timeout)
                .timeout(timeout)
                .redirect(policy)
                .build()
                .map_err(|e| UpstreamError::Build(e.to_string()))
        };

        Ok(Self {
            base: BaseUrl::new(base)?,
            client: build(redirect::Policy::default())?,
            submit_client: build(redirect::Policy::none())?,
        })
    }

    pub fn base_url(&self) -> Arc<str> {
        self.base.snapshot()
    }

    fn get(&self, client: &Client, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base.snapshot(), path);
        debug!(%url, "upstream request");
        client.get(url).header(COOKIE, SESSION_COOKIE)
    }

    async fn text(request: RequestBuilder) -> Result<String, UpstreamError> {
        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "upstream unreachable");
            UpstreamError::from(e)
        })?;
        let response = response.error_for_status().map_err(|e| {
            warn!(error = %e, "upstream rejected request");
            UpstreamError::from(e)
        })?;
        Ok(response.text().await?)
    }

    /// Board page as the upstream renders it. `/bbs` serves the local
    /// template instead, so this is for callers that want the raw page.
    pub async fn fetch_index(&self, query: &BoardQuery) -> Result<String, UpstreamError> {
        let request = self.get(&self.client, "bbs").query(&[
            ("name", query.name.as_str()),
            ("seed", query.seed.as_str()),
            ("channel", query.channel.as_str()),
            ("verify", query.verify.as_str()),
        ]);
        Self::text(request).await
    }

    /// Snapshot markup consumed by the extractor.
    pub async fn fetch_api(&self, verify: &str, channel: &str) -> Result<String, UpstreamError> {
        let t = Utc::now().timestamp_millis().to_string();
        let request = self.get(&self.client, "bbs/api").query(&[
            ("t", t.as_str()),
            ("verify", verify),
            ("channel", channel),
        ]);
        Self::text(request).await
    }

    pub async fn fetch_info(&self) -> Result<String, UpstreamError> {
        Self::text(self.get(&self.client, "bbs/info")).await
    }

    pub async fn fetch_how(&self) -> Result<String, UpstreamError> {
        Self::text(self.get(&self.client, "bbs/how")).await
    }

    /// Posts a message without following redirects. 2xx and 3xx replies are
    /// relayed; anything else is an error.
    pub async fn submit(&self, submission: &Submission) -> Result<Relayed, UpstreamError> {
        let request = self.get(&self.submit_client, "bbs/result").query(&[
            ("name", submission.name.as_str()),
            ("message", submission.message.as_str()),
            ("seed", submission.seed.as_str()),
            ("channel", submission.channel.as_str()),
            ("verify", submission.verify.as_str()),
            ("info", submission.info.as_str()),
        ]);

        let response = request.send().await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            warn!(status = status.as_u16(), "upstream rejected submission");
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(Relayed {
            status: status.as_u16(),
            location,
            body,
        })
    }

    /// Fetches the instance list file and returns its trimmed contents.
    pub async fn fetch_instance(&self, instance_url: &str) -> Result<String, UpstreamError> {
        let body = Self::text(self.client.get(instance_url)).await?;
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Err(UpstreamError::EmptyInstance(instance_url.to_string()));
        }
        Ok(trimmed.to_string())
    }

    /// Replaces the base URL with the one named by the instance list. The old
    /// value is kept if the list cannot be fetched or is not a URL.
    pub async fn reload_base(&self, instance_url: &str) -> Result<Arc<str>, UpstreamError> {
        let next = self.fetch_instance(instance_url).await?;
        let previous = self.base.snapshot();
        let current = self.base.replace(&next)?;
        info!(%previous, %current, "upstream base URL reloaded");
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream(server: &MockServer) -> Upstream {
        Upstream::new(&server.uri(), Duration::from_secs(3)).unwrap()
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let base = BaseUrl::new("https://bbs.example.com").unwrap();
        assert_eq!(&*base.snapshot(), "https://bbs.example.com/");

        base.replace("  https://other.example.com/\n").unwrap();
        assert_eq!(&*base.snapshot(), "https://other.example.com/");
    }

    #[test]
    fn base_url_rejects_garbage() {
        let base = BaseUrl::new("https://bbs.example.com/").unwrap();
        assert!(base.replace("not a url").is_err());
        assert!(base.replace("   ").is_err());
        assert_eq!(&*base.snapshot(), "https://bbs.example.com/");
    }

    #[tokio::test]
    async fn api_fetch_sends_cookie_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bbs/api"))
            .and(header("cookie", SESSION_COOKIE))
            .and(query_param("verify", "true"))
            .and(query_param("channel", "雑談"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h3>board</h3>"))
            .expect(1)
            .mount(&server)
            .await;

        let body = upstream(&server).fetch_api("true", "雑談").await.unwrap();
        assert_eq!(body, "<h3>board</h3>");
    }

    #[tokio::test]
    async fn index_fetch_forwards_all_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bbs"))
            .and(query_param("name", "a b"))
            .and(query_param("seed", "s&d"))
            .and(query_param("channel", "main"))
            .and(query_param("verify", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_string("page"))
            .expect(1)
            .mount(&server)
            .await;

        let query = BoardQuery {
            name: "a b".to_string(),
            seed: "s&d".to_string(),
            channel: "main".to_string(),
            verify: "false".to_string(),
        };
        assert_eq!(upstream(&server).fetch_index(&query).await.unwrap(), "page");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(path("/bbs/how"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = upstream(&server).fetch_how().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn submit_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(path("/bbs/result"))
            .and(query_param("message", "hi<br>there"))
            .and(query_param("info", "{}"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/bbs?channel=main")
                    .set_body_string("redirecting"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/bbs"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let submission = Submission {
            name: String::new(),
            message: "hi<br>there".to_string(),
            seed: String::new(),
            channel: "main".to_string(),
            verify: "false".to_string(),
            info: "{}".to_string(),
        };
        let relayed = upstream(&server).submit(&submission).await.unwrap();
        assert_eq!(relayed.status, 302);
        assert_eq!(relayed.location.as_deref(), Some("/bbs?channel=main"));
        assert_eq!(relayed.body, "redirecting");
    }

    #[tokio::test]
    async fn reload_swaps_base_url() {
        let config = MockServer::start().await;
        let next = MockServer::start().await;
        Mock::given(path("/instance.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}\n", next.uri())))
            .mount(&config)
            .await;
        Mock::given(path("/bbs/info"))
            .respond_with(ResponseTemplate::new(200).set_body_string("from next"))
            .mount(&next)
            .await;

        let client = Upstream::new("https://unused.invalid/", Duration::from_secs(3)).unwrap();
        let current = client
            .reload_base(&format!("{}/instance.txt", config.uri()))
            .await
            .unwrap();

        assert_eq!(&*current, format!("{}/", next.uri()));
        assert_eq!(client.fetch_info().await.unwrap(), "from next");
    }

    #[tokio::test]
    async fn blank_instance_list_keeps_old_base() {
        let config = MockServer::start().await;
        Mock::given(path("/instance.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(" \n"))
            .mount(&config)
            .await;

        let client = Upstream::new("https://bbs.example.com/", Duration::from_secs(3)).unwrap();
        let err = client
            .reload_base(&format!("{}/instance.txt", config.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, UpstreamError::EmptyInstance(_)));
        assert_eq!(&*client.base_url(), "https://bbs.example.com/");
    }

    #[tokio::test]
    async fn instance_list_fetch_sends_no_session_cookie() {
        let config = MockServer::start().await;
        Mock::given(path("/instance.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("https://next.example.com/"))
            .expect(1)
            .mount(&config)
            .await;

        let client = Upstream::new("https://bbs.example.com/", Duration::from_secs(3)).unwrap();
        client
            .fetch_instance(&format!("{}/instance.txt", config.uri()))
            .await
            .unwrap();

        let requests = config.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].headers.get("cookie").is_none());
    }
}
