//! Blocking HTTP/1.1 client behind the network scheme.

use crate::NetworkFetcher;
use crate::NetworkRequest;
use crate::http::Header;
use crate::http::RawResponse;
use crate::http::encode_request;
use crate::http::parse_response;
use crate::http::status_is_redirect;
use crate::response::ResourceResponse;
use crate::response::content_type_for_path;
use crate::tls::BoxedIoStream;
use crate::tls::TlsConnector;
use crate::tls::TrustStoreMode;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tracing::debug;
use vf_core::VirtError;
use vf_core::VirtResult;

const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchClientConfig {
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub max_redirects: u8,
    pub user_agent: String,
    pub trust_store_mode: TrustStoreMode,
}

impl Default for FetchClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
            max_redirects: 5,
            user_agent: concat!("vframe/", env!("CARGO_PKG_VERSION")).to_owned(),
            trust_store_mode: TrustStoreMode::default(),
        }
    }
}

/// One connection per request, closed after the response.
#[derive(Debug, Clone)]
pub struct FetchClient {
    config: FetchClientConfig,
    tls: TlsConnector,
}

impl FetchClient {
    pub fn new(config: FetchClientConfig) -> VirtResult<Self> {
        let tls = TlsConnector::new(config.trust_store_mode)?;
        Ok(Self { config, tls })
    }

    pub fn config(&self) -> &FetchClientConfig {
        &self.config
    }

    fn round_trip(&self, request: &NetworkRequest) -> VirtResult<RawResponse> {
        let url = &request.url;
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(VirtError::new(
                    "net.http.scheme_unsupported",
                    format!("cannot fetch `{other}:` URLs over HTTP"),
                ));
            }
        };
        let host = url.host_str().ok_or_else(|| {
            VirtError::new("net.http.host_missing", format!("`{url}` has no host"))
        })?;
        let port = url.port_or_known_default().unwrap_or(if secure { 443 } else { 80 });

        let mut headers = vec![Header::new("User-Agent", self.config.user_agent.as_str())?];
        for (name, value) in &request.headers {
            headers.push(Header::new(name.as_str(), value.as_str())?);
        }
        let encoded = encode_request(&request.method, url, &headers, &request.body)?;

        let tcp = self.connect(host, port)?;
        let mut stream: BoxedIoStream = if secure {
            self.tls.connect(host, tcp)?
        } else {
            Box::new(tcp)
        };

        stream.write_all(&encoded).map_err(|error| {
            VirtError::new(
                "net.http.write_failed",
                format!("failed to send request to `{host}`: {error}"),
            )
        })?;
        stream.flush().map_err(|error| {
            VirtError::new(
                "net.http.write_failed",
                format!("failed to flush request to `{host}`: {error}"),
            )
        })?;

        let raw = read_until_close(&mut stream)?;
        parse_response(&raw, request.method == "HEAD")
    }

    fn connect(&self, host: &str, port: u16) -> VirtResult<TcpStream> {
        let addresses = (host, port).to_socket_addrs().map_err(|error| {
            VirtError::new(
                "net.dns.resolve_failed",
                format!("failed to resolve `{host}`: {error}"),
            )
        })?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, self.config.connect_timeout) {
                Ok(stream) => {
                    let configured = stream
                        .set_read_timeout(Some(self.config.io_timeout))
                        .and_then(|()| stream.set_write_timeout(Some(self.config.io_timeout)))
                        .and_then(|()| stream.set_nodelay(true));
                    if let Err(error) = configured {
                        last_error = Some(error.to_string());
                        continue;
                    }
                    return Ok(stream);
                }
                Err(error) => {
                    debug!(%address, %error, "connect attempt failed");
                    last_error = Some(error.to_string());
                }
            }
        }

        Err(VirtError::new(
            "net.transport.connect_failed",
            format!(
                "failed to connect to `{host}:{port}`: {}",
                last_error.unwrap_or_else(|| "no addresses".to_owned())
            ),
        ))
    }
}

impl NetworkFetcher for FetchClient {
    fn fetch(&self, request: &NetworkRequest) -> VirtResult<ResourceResponse> {
        let mut current = request.clone();

        for _ in 0..=self.config.max_redirects {
            let raw = self.round_trip(&current)?;

            if status_is_redirect(raw.status) {
                if let Some(location) = raw.header("location") {
                    let next = current.url.join(location).map_err(|error| {
                        VirtError::new(
                            "net.http.redirect_invalid",
                            format!("bad redirect target `{location}`: {error}"),
                        )
                    })?;
                    debug!(from = %current.url, to = %next, status = raw.status, "following redirect");
                    // 303 and the historical 301/302 behavior downgrade to GET.
                    if matches!(raw.status, 301..=303) && current.method != "HEAD" {
                        current.method = "GET".to_owned();
                        current.body.clear();
                    }
                    current.url = next;
                    continue;
                }
            }

            let content_type = raw
                .header("content-type")
                .map(str::to_owned)
                .unwrap_or_else(|| content_type_for_path(current.url.path()));
            return Ok(ResourceResponse {
                status: raw.status,
                body: raw.body,
                content_type,
            });
        }

        Err(VirtError::new(
            "net.http.redirect_limit",
            format!(
                "more than {} redirects starting at `{}`",
                self.config.max_redirects, request.url
            ),
        ))
    }
}

// TLS peers often close without close_notify once the body is complete;
// the HTTP framing check in `parse_response` catches real truncation.
fn read_until_close(stream: &mut BoxedIoStream) -> VirtResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 16 * 1024];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(buffer),
            Ok(read) => {
                buffer.extend_from_slice(&chunk[..read]);
                if buffer.len() > MAX_RESPONSE_BYTES {
                    return Err(VirtError::new(
                        "net.http.body_too_large",
                        format!("response exceeds {MAX_RESPONSE_BYTES} bytes"),
                    ));
                }
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) if error.kind() == ErrorKind::UnexpectedEof && !buffer.is_empty() => {
                return Ok(buffer);
            }
            Err(error) => {
                return Err(VirtError::new(
                    "net.http.read_failed",
                    format!("failed to read response: {error}"),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FetchClient;
    use super::FetchClientConfig;
    use crate::NetworkFetcher;
    use crate::NetworkRequest;
    use std::io::Read;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;
    use url::Url;

    fn serve(responses: Vec<&'static [u8]>) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(error) => panic!("{error}"),
        };
        let port = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => panic!("{error}"),
        };
        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for response in responses {
                let (mut socket, _) = match listener.accept() {
                    Ok(accepted) => accepted,
                    Err(error) => panic!("{error}"),
                };
                let mut request = Vec::new();
                let mut byte = [0_u8; 1];
                while !request.ends_with(b"\r\n\r\n") {
                    match socket.read(&mut byte) {
                        Ok(0) => break,
                        Ok(_) => request.push(byte[0]),
                        Err(error) => panic!("{error}"),
                    }
                }
                seen.push(String::from_utf8_lossy(&request).into_owned());
                assert!(socket.write_all(response).is_ok());
            }
            seen
        });
        (port, handle)
    }

    #[test]
    fn follows_redirects_over_plain_http() {
        let (port, server) = serve(vec![
            b"HTTP/1.1 302 Found\r\nLocation: /final.css\r\nContent-Length: 0\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 9\r\n\r\na{top:0}\n",
        ]);
        let client = match FetchClient::new(FetchClientConfig::default()) {
            Ok(client) => client,
            Err(error) => panic!("{error}"),
        };
        let url = match Url::parse(&format!("http://127.0.0.1:{port}/start.css")) {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };

        let response = match client.fetch(&NetworkRequest::get(url)) {
            Ok(response) => response,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "text/css");
        assert_eq!(response.body, b"a{top:0}\n");

        let seen = match server.join() {
            Ok(seen) => seen,
            Err(_) => panic!("server thread panicked"),
        };
        assert!(seen[0].starts_with("GET /start.css HTTP/1.1"));
        assert!(seen[1].starts_with("GET /final.css HTTP/1.1"));
    }

    #[test]
    fn rejects_non_http_schemes() {
        let client = match FetchClient::new(FetchClientConfig::default()) {
            Ok(client) => client,
            Err(error) => panic!("{error}"),
        };
        let url = match Url::parse("archive:/index.html") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        let outcome = client.fetch(&NetworkRequest::get(url));
        assert!(matches!(outcome, Err(error) if error.code == "net.http.scheme_unsupported"));
    }
}
