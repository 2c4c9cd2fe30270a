//! Resource locators, the uniform resource response and the live HTTP/1.1
//! client used for the network scheme.

mod client;
pub mod http;
mod locator;
mod response;
mod tls;

pub use client::FetchClient;
pub use client::FetchClientConfig;
pub use locator::LocatorScheme;
pub use locator::ResourceLocator;
pub use locator::VIRTUAL_PREFIX;
pub use locator::is_passthrough;
pub use locator::is_virtualized;
pub use locator::unwrap_virtual;
pub use response::ResourceResponse;
pub use response::content_type_for_path;
pub use tls::TrustStoreMode;
pub use url::Url;

use vf_core::VirtResult;

/// A request handed to the live network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl NetworkRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_owned(),
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_ascii_uppercase();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Performs real network fetches. The engine holds this as a trait object
/// so hosts and tests can substitute their own transport.
pub trait NetworkFetcher {
    fn fetch(&self, request: &NetworkRequest) -> VirtResult<ResourceResponse>;
}

#[cfg(test)]
mod tests {
    use super::NetworkRequest;
    use super::Url;

    #[test]
    fn request_builder_normalizes_method() {
        let url = match Url::parse("https://example.test/api") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        let request = NetworkRequest::get(url)
            .with_method("post")
            .with_header("Content-Type", "application/json")
            .with_body(b"{}".to_vec());

        assert_eq!(request.method, "POST");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.body, b"{}");
    }
}
