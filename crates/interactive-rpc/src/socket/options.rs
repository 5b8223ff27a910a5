//! Socket configuration and partial updates.

use crate::config::SocketConfig;
use crate::reconnect::{ExponentialReconnectionPolicy, ReconnectionPolicy};
use crate::transport::ConnectRequest;
use crate::{Result, SocketError};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Configuration for a [`Socket`](crate::Socket).
///
/// At most one of `auth_token` (sent as a bearer header) and `jwt` (sent as a
/// query parameter) may be set.
#[derive(Debug)]
pub struct SocketOptions {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Reconnect after an unexpected close.
    pub auto_reconnect: bool,
    pub reconnection_policy: Box<dyn ReconnectionPolicy>,
    /// Default time to wait for a reply once a method is sent.
    pub reply_timeout: Duration,
    pub auth_token: Option<String>,
    pub jwt: Option<String>,
    /// Merged into the connection headers after the built-in ones.
    pub extra_headers: BTreeMap<String, String>,
    /// Appended to the URL's query string.
    pub query_params: BTreeMap<String, String>,
    /// Keepalive ping interval. Zero disables pings.
    pub ping_interval: Duration,
    /// Start the reply timeout when a packet is queued rather than when it is
    /// first sent. Packets queued while disconnected then expire in the queue.
    pub timeout_while_queued: bool,
}

impl SocketOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            reconnection_policy: Box::new(ExponentialReconnectionPolicy::default()),
            reply_timeout: SocketConfig::REPLY_TIMEOUT,
            auth_token: None,
            jwt: None,
            extra_headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            ping_interval: SocketConfig::PING_INTERVAL,
            timeout_while_queued: false,
        }
    }

    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn with_reconnection_policy(mut self, policy: impl ReconnectionPolicy + 'static) -> Self {
        self.reconnection_policy = Box::new(policy);
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_timeout_while_queued(mut self, enabled: bool) -> Self {
        self.timeout_while_queued = enabled;
        self
    }

    /// Reject ambiguous or unusable configurations.
    pub fn validate(&self) -> Result<()> {
        validate_parts(&self.url, self.auth_token.as_deref(), self.jwt.as_deref())
    }

    /// Merge a partial update. Nothing changes if the merged result is invalid.
    pub fn apply(&mut self, patch: SocketOptionsPatch) -> Result<()> {
        let url = patch.url.as_deref().unwrap_or(&self.url);
        let auth_token = match &patch.auth_token {
            Some(token) => token.as_deref(),
            None => self.auth_token.as_deref(),
        };
        let jwt = match &patch.jwt {
            Some(jwt) => jwt.as_deref(),
            None => self.jwt.as_deref(),
        };
        validate_parts(url, auth_token, jwt)?;

        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(auth_token) = patch.auth_token {
            self.auth_token = auth_token;
        }
        if let Some(jwt) = patch.jwt {
            self.jwt = jwt;
        }
        if let Some(auto_reconnect) = patch.auto_reconnect {
            self.auto_reconnect = auto_reconnect;
        }
        if let Some(policy) = patch.reconnection_policy {
            self.reconnection_policy = policy;
        }
        if let Some(timeout) = patch.reply_timeout {
            self.reply_timeout = timeout;
        }
        if let Some(interval) = patch.ping_interval {
            self.ping_interval = interval;
        }
        if let Some(enabled) = patch.timeout_while_queued {
            self.timeout_while_queued = enabled;
        }
        self.extra_headers.extend(patch.extra_headers);
        self.query_params.extend(patch.query_params);
        Ok(())
    }

    /// Build the URL and headers for the next connection attempt.
    pub fn connect_request(&self) -> Result<ConnectRequest> {
        self.validate()?;
        let mut url = Url::parse(&self.url)?;

        if !self.query_params.is_empty() || self.jwt.is_some() {
            let mut query = url.query_pairs_mut();
            for (name, value) in &self.query_params {
                query.append_pair(name, value);
            }
            if let Some(jwt) = &self.jwt {
                query.append_pair(SocketConfig::JWT_QUERY_PARAM, &format!("JWT {}", jwt));
            }
        }

        let mut headers = vec![(
            SocketConfig::PROTOCOL_VERSION_HEADER.to_string(),
            SocketConfig::PROTOCOL_VERSION.to_string(),
        )];
        if let Some(token) = &self.auth_token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        for (name, value) in &self.extra_headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        Ok(ConnectRequest { url, headers })
    }
}

fn validate_parts(url: &str, auth_token: Option<&str>, jwt: Option<&str>) -> Result<()> {
    if auth_token.is_some() && jwt.is_some() {
        return Err(SocketError::config(
            "cannot use both an auth token and a JWT; choose one",
        ));
    }
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(SocketError::config(format!(
            "unsupported url scheme {}, expected ws or wss",
            other
        ))),
    }
}

/// Partial update for [`SocketOptions`]. Unset fields keep their value.
///
/// `auth_token` and `jwt` are doubly optional so a patch can clear them.
#[derive(Debug, Default)]
pub struct SocketOptionsPatch {
    pub url: Option<String>,
    pub auto_reconnect: Option<bool>,
    pub reconnection_policy: Option<Box<dyn ReconnectionPolicy>>,
    pub reply_timeout: Option<Duration>,
    pub auth_token: Option<Option<String>>,
    pub jwt: Option<Option<String>>,
    pub extra_headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub ping_interval: Option<Duration>,
    pub timeout_while_queued: Option<bool>,
}

impl SocketOptionsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = Some(auto_reconnect);
        self
    }

    pub fn reconnection_policy(mut self, policy: impl ReconnectionPolicy + 'static) -> Self {
        self.reconnection_policy = Some(Box::new(policy));
        self
    }

    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn jwt(mut self, jwt: Option<String>) -> Self {
        self.jwt = Some(jwt);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub fn timeout_while_queued(mut self, enabled: bool) -> Self {
        self.timeout_while_queued = Some(enabled);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_and_jwt_are_exclusive() {
        let options = SocketOptions::new("wss://example.com/gameClient")
            .with_auth_token("abc")
            .with_jwt("def");
        assert!(matches!(options.validate(), Err(SocketError::Config { .. })));
    }

    #[test]
    fn test_rejects_http_url() {
        let options = SocketOptions::new("https://example.com");
        assert!(options.validate().is_err());
        assert!(SocketOptions::new("not a url").validate().is_err());
    }

    #[test]
    fn test_bearer_token_header() {
        let request = SocketOptions::new("ws://localhost:3000/")
            .with_auth_token("secret")
            .connect_request()
            .unwrap();

        assert_eq!(request.header("Authorization"), Some("Bearer secret"));
        assert_eq!(request.header("X-Protocol-Version"), Some("2.0"));
        assert_eq!(request.url.query(), None);
    }

    #[test]
    fn test_jwt_and_query_params_in_url() {
        let request = SocketOptions::new("ws://localhost:3000/gameClient")
            .with_jwt("tok")
            .with_query_param("key", "value")
            .connect_request()
            .unwrap();

        assert_eq!(request.query_param("Authorization").as_deref(), Some("JWT tok"));
        assert_eq!(request.query_param("key").as_deref(), Some("value"));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn test_extra_headers_override_builtin() {
        let request = SocketOptions::new("ws://localhost/")
            .with_header("x-protocol-version", "3.0")
            .with_header("X-Interactive-Version", "1234")
            .connect_request()
            .unwrap();

        assert_eq!(request.header("X-Protocol-Version"), Some("3.0"));
        assert_eq!(request.header("X-Interactive-Version"), Some("1234"));
        assert_eq!(request.headers.len(), 2);
    }

    #[test]
    fn test_apply_patch_merges() {
        let mut options = SocketOptions::new("ws://localhost/").with_header("a", "1");
        options
            .apply(
                SocketOptionsPatch::new()
                    .reply_timeout(Duration::from_millis(5))
                    .auto_reconnect(false)
                    .header("b", "2"),
            )
            .unwrap();

        assert_eq!(options.reply_timeout, Duration::from_millis(5));
        assert!(!options.auto_reconnect);
        assert_eq!(options.extra_headers.len(), 2);
        assert_eq!(options.url, "ws://localhost/");
    }

    #[test]
    fn test_apply_ambiguous_patch_leaves_options_unchanged() {
        let mut options = SocketOptions::new("ws://localhost/").with_auth_token("abc");
        let result = options.apply(
            SocketOptionsPatch::new()
                .jwt(Some("def".into()))
                .reply_timeout(Duration::from_secs(1)),
        );

        assert!(result.is_err());
        assert_eq!(options.jwt, None);
        assert_eq!(options.reply_timeout, SocketConfig::REPLY_TIMEOUT);
    }

    #[test]
    fn test_patch_can_swap_credentials() {
        let mut options = SocketOptions::new("ws://localhost/").with_auth_token("abc");
        options
            .apply(
                SocketOptionsPatch::new()
                    .auth_token(None)
                    .jwt(Some("def".into())),
            )
            .unwrap();

        assert_eq!(options.auth_token, None);
        assert_eq!(options.jwt.as_deref(), Some("def"));
    }
}
