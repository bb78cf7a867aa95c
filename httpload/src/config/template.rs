use rama::{
    bytes::Bytes,
    http::{Body, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, header, request},
};

use super::ConfigError;
use crate::utils::env;

/// Immutable description of the request replayed by every worker.
///
/// Workers never share a request, each one gets
/// its own copy through [`RequestTemplate::to_request`].
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    parts: request::Parts,
    body: Bytes,
}

impl RequestTemplate {
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn to_request(&self) -> Request {
        Request::from_parts(self.parts.clone(), Body::from(self.body.clone()))
    }
}

/// Builds a [`RequestTemplate`] from raw operator input,
/// rejecting anything that could never be sent.
#[derive(Debug, Clone)]
pub struct RequestTemplateBuilder {
    url: String,
    method: String,
    headers: Option<String>,
    body: Bytes,
    accept: Option<String>,
    content_type: String,
    keep_alive: bool,
    compression: bool,
}

impl RequestTemplateBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_owned(),
            headers: None,
            body: Bytes::new(),
            accept: None,
            content_type: "text/html".to_owned(),
            keep_alive: true,
            compression: true,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Semicolon separated `name: value` pairs.
    pub fn with_headers(mut self, headers: impl Into<String>) -> Self {
        self.headers = Some(headers.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn build(self) -> Result<RequestTemplate, ConfigError> {
        let uri = parse_target_url(&self.url)?;

        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::InvalidMethod(self.method.clone()))?;

        let (mut parts, ()) = Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .map_err(|err| ConfigError::InvalidRequest(err.to_string()))?
            .into_parts();

        let headers = &mut parts.headers;

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&self.content_type)
                .map_err(|_| ConfigError::InvalidHeader(self.content_type.clone()))?,
        );

        if let Some(raw) = self.headers.as_deref() {
            for (name, value) in parse_headers(raw)? {
                headers.insert(name, value);
            }
        }

        if let Some(accept) = self.accept.as_deref().filter(|s| !s.is_empty()) {
            headers.insert(
                header::ACCEPT,
                HeaderValue::from_str(accept)
                    .map_err(|_| ConfigError::InvalidHeader(accept.to_owned()))?,
            );
        }

        if self.compression {
            headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        }

        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static(if self.keep_alive {
                "keep-alive"
            } else {
                "close"
            }),
        );

        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static(env::user_agent()),
            );
        }

        Ok(RequestTemplate {
            parts,
            body: self.body,
        })
    }
}

fn parse_target_url(url: &str) -> Result<Uri, ConfigError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ConfigError::MissingUrl);
    }

    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: url.to_owned(),
        reason: reason.to_owned(),
    };

    let uri = url
        .parse::<Uri>()
        .map_err(|err| invalid(&err.to_string()))?;

    match uri.scheme_str() {
        Some("http" | "https") => (),
        Some(_) => return Err(invalid("only http and https are supported")),
        None => return Err(invalid("missing scheme (e.g. http://)")),
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }

    Ok(uri)
}

/// Parse semicolon separated `name: value` pairs.
///
/// Names are restricted to word characters and dashes,
/// blank segments (e.g. a trailing `;`) are ignored.
pub fn parse_headers(input: &str) -> Result<Vec<(HeaderName, HeaderValue)>, ConfigError> {
    input
        .split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(parse_header)
        .collect()
}

fn parse_header(segment: &str) -> Result<(HeaderName, HeaderValue), ConfigError> {
    let invalid = || ConfigError::InvalidHeader(segment.to_owned());

    let (name, value) = segment.split_once(':').ok_or_else(invalid)?;
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(invalid());
    }

    let value = value.trim();
    if value.is_empty() {
        return Err(invalid());
    }

    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use rama::http::body::util::BodyExt as _;

    use super::*;

    #[test]
    fn parse_headers_accepts_multiple_pairs() {
        let headers = parse_headers("X-Api-Key: secret; x_trace:1;Cache-Control:  no-cache ;").unwrap();
        assert_eq!(3, headers.len());
        assert_eq!("x-api-key", headers[0].0.as_str());
        assert_eq!("secret", headers[0].1);
        assert_eq!("x_trace", headers[1].0.as_str());
        assert_eq!("1", headers[1].1);
        assert_eq!("cache-control", headers[2].0.as_str());
        assert_eq!("no-cache", headers[2].1);
    }

    #[test]
    fn parse_headers_rejects_malformed_pairs() {
        for input in [
            "no-colon",
            ": value",
            "name:",
            "name:   ",
            "bad name: value",
            "bad/name: value",
            "ok: 1; broken",
        ] {
            assert!(
                matches!(parse_headers(input), Err(ConfigError::InvalidHeader(_))),
                "input: {input}"
            );
        }
    }

    #[test]
    fn build_rejects_bad_urls() {
        assert_eq!(
            RequestTemplateBuilder::new("").build().unwrap_err(),
            ConfigError::MissingUrl
        );
        for url in ["localhost:8080/path", "ftp://example.com/", "not a url", "http://"] {
            assert!(
                matches!(
                    RequestTemplateBuilder::new(url).build(),
                    Err(ConfigError::InvalidUrl { .. })
                ),
                "url: {url}"
            );
        }
    }

    #[test]
    fn build_rejects_bad_method() {
        assert!(matches!(
            RequestTemplateBuilder::new("http://example.com")
                .with_method("GE T")
                .build(),
            Err(ConfigError::InvalidMethod(_))
        ));
    }

    #[test]
    fn build_applies_defaults() {
        let template = RequestTemplateBuilder::new("http://example.com/ping")
            .with_method("post")
            .build()
            .unwrap();

        assert_eq!(Method::POST, template.method());
        assert_eq!("http://example.com/ping", template.uri().to_string());

        let headers = template.headers();
        assert_eq!("text/html", headers[header::CONTENT_TYPE]);
        assert_eq!("gzip", headers[header::ACCEPT_ENCODING]);
        assert_eq!("keep-alive", headers[header::CONNECTION]);
        assert_eq!(env::user_agent(), headers[header::USER_AGENT]);
        assert!(!headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn build_applies_operator_input() {
        let template = RequestTemplateBuilder::new("https://example.com/api")
            .with_headers("User-Agent: tester; X-Id: 42; Content-Type: text/plain")
            .with_content_type("application/json")
            .with_accept("application/json")
            .with_keep_alive(false)
            .with_compression(false)
            .build()
            .unwrap();

        let headers = template.headers();
        // explicit headers win over the content-type flag
        assert_eq!("text/plain", headers[header::CONTENT_TYPE]);
        assert_eq!("application/json", headers[header::ACCEPT]);
        assert_eq!("close", headers[header::CONNECTION]);
        assert_eq!("tester", headers[header::USER_AGENT]);
        assert_eq!("42", headers["x-id"]);
        assert!(!headers.contains_key(header::ACCEPT_ENCODING));
    }

    #[tokio::test]
    async fn to_request_produces_independent_copies() {
        let template = RequestTemplateBuilder::new("http://example.com/")
            .with_method("PUT")
            .with_body("payload")
            .build()
            .unwrap();

        let mut first = template.to_request();
        first
            .headers_mut()
            .insert("x-mutated", HeaderValue::from_static("1"));

        let second = template.to_request();
        assert!(!second.headers().contains_key("x-mutated"));
        assert_eq!(Method::PUT, second.method());

        let payload = second.into_body().collect().await.unwrap().to_bytes();
        assert_eq!("payload", payload);
        assert_eq!(template.body(), "payload");
    }
}
