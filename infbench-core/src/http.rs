use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// URLs are supported for now: {0}")]
    OnlyHttpSupported(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("failed to encode request body: {0}")]
    BodyEncode(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// In-flight response whose body is consumed frame by frame. Used for
/// streamed (SSE) model server responses where per-chunk arrival times
/// matter.
pub struct StreamingResponse {
    pub status: u16,
    body: Incoming,
}

impl StreamingResponse {
    /// Next non-empty data frame, or `None` once the stream ends.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        while let Some(frame) = self.body.frame().await {
            let frame = frame?;
            if let Some(data) = frame.data_ref()
                && !data.is_empty()
            {
                return Ok(Some(data.clone()));
            }
        }
        Ok(None)
    }

    /// Drains the remaining body into one buffer (error-path reporting).
    pub async fn collect(self) -> Result<HttpResponse> {
        let body = self.body.collect().await?.to_bytes();
        Ok(HttpResponse {
            status: self.status,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpConnector, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);

        let inner = Client::builder(TokioExecutor::new()).build(connector);

        Self { inner }
    }
}

impl HttpClient {
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        let uri = parse_http_uri(url)?;
        let req: Request<Full<Bytes>> = Request::builder()
            .method(http::Method::GET)
            .uri(uri)
            .body(Full::new(Bytes::new()))?;

        let res = self.inner.request(req).await?;
        let status = res.status().as_u16();
        let body = res.into_body().collect().await?.to_bytes();
        Ok(HttpResponse { status, body })
    }

    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let res = self.post_json_streaming(url, body).await?;
        res.collect().await
    }

    /// Issues a JSON POST and hands back the response with its body still
    /// unread, so the caller can time individual chunks.
    pub async fn post_json_streaming(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<StreamingResponse> {
        let uri = parse_http_uri(url)?;
        let payload = serde_json::to_vec(body)?;

        let req: Request<Full<Bytes>> = Request::builder()
            .method(http::Method::POST)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(payload)))?;

        let res = self.inner.request(req).await?;
        let status = res.status().as_u16();
        Ok(StreamingResponse {
            status,
            body: res.into_body(),
        })
    }
}

fn parse_http_uri(url: &str) -> Result<hyper::Uri> {
    let parsed = url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    if parsed.scheme() != "http" {
        return Err(Error::OnlyHttpSupported(url.to_string()));
    }
    url.parse().map_err(|_| Error::InvalidUrl(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            parse_http_uri("https://example.com/v1/completions"),
            Err(Error::OnlyHttpSupported(_))
        ));
        assert!(matches!(
            parse_http_uri("not a url"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(parse_http_uri("http://localhost:8000/v1/completions").is_ok());
    }
}
