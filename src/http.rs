//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use retsio_client::{ClientConfig, Transport, TransportError, TransportResponse};
use std::error::Error;
use std::time::Duration;
use url::Url;

/// Header naming the protocol version the client speaks.
const RETS_VERSION_HEADER: &str = "RETS-Version";

/// Credentials sent with every request.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Issues GET requests with basic auth and a session cookie store.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    credentials: Credentials,
}

impl HttpTransport {
    pub fn new(
        config: &ClientConfig,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        let version = HeaderValue::from_str(&config.rets_version)
            .map_err(|e| TransportError::Other(format!("invalid RETS version: {}", e)))?;
        headers.insert(RETS_VERSION_HEADER, version);

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: config.server_url.clone(),
            credentials,
        })
    }

    /// Resolves a capability path against the server URL. Absolute URLs
    /// are used as given.
    pub fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        self.base
            .join(path)
            .map_err(|e| TransportError::Other(format!("invalid path {:?}: {}", path, e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let url = self.resolve(path)?;
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url).query(query);
        if let Some(ref username) = self.credentials.username {
            request = request.basic_auth(username, self.credentials.password.as_ref());
        }

        let response = request.send().await.map_err(map_error)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Body(e.to_string())))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if let Some(tls) = tls_error(&err) {
        TransportError::Tls(tls)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Finds a TLS failure in the source chain. The connector reports
/// handshake errors wrapped in `io::Error`.
fn tls_error(err: &(dyn Error + 'static)) -> Option<String> {
    let mut source = Some(err);
    while let Some(err) = source {
        if let Some(tls) = err.downcast_ref::<rustls::Error>() {
            return Some(tls.to_string());
        }
        if let Some(tls) = err
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return Some(tls.to_string());
        }
        source = err.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(url: &str) -> HttpTransport {
        let config = ClientConfig::new(url).unwrap();
        HttpTransport::new(&config, Credentials::default(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_resolve_relative() {
        let transport = transport("https://rets.example.com/Login.asmx/Login");
        assert_eq!(
            transport.resolve("/Search.asmx/Search").unwrap().as_str(),
            "https://rets.example.com/Search.asmx/Search"
        );
    }

    #[test]
    fn test_resolve_absolute() {
        let transport = transport("https://rets.example.com");
        assert_eq!(
            transport
                .resolve("https://search.example.com:6103/rets/Search")
                .unwrap()
                .as_str(),
            "https://search.example.com:6103/rets/Search"
        );
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: Some("jdoe".to_string()),
            password: Some("secret".to_string()),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("jdoe"));
        assert!(!debug.contains("secret"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error sending request")]
    struct Wrapped(#[source] std::io::Error);

    #[test]
    fn test_tls_error_found_in_chain() {
        let handshake = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::General("bad certificate".to_string()),
        );
        let err = Wrapped(handshake);
        assert_eq!(
            tls_error(&err).as_deref(),
            Some(rustls::Error::General("bad certificate".to_string()).to_string().as_str())
        );

        let direct = rustls::Error::DecryptError;
        assert!(tls_error(&direct).is_some());
    }

    #[test]
    fn test_plain_io_error_is_not_tls() {
        let refused = Wrapped(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(tls_error(&refused).is_none());
    }

    #[test]
    fn test_invalid_rets_version_rejected() {
        let config = ClientConfig::new("https://rets.example.com")
            .unwrap()
            .with_rets_version("bad\nvalue");
        assert!(HttpTransport::new(&config, Credentials::default(), Duration::from_secs(5)).is_err());
    }
}
