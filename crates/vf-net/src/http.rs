//! HTTP/1.1 message encoding and response decoding.

use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use std::io::Cursor;
use std::io::Read;
use url::Url;
use vf_core::VirtError;
use vf_core::VirtResult;

pub(crate) const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> VirtResult<Self> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(VirtError::new(
                "net.http.header_name_invalid",
                format!("invalid header name `{name}`"),
            ));
        }
        if value.contains(['\r', '\n']) {
            return Err(VirtError::new(
                "net.http.header_value_invalid",
                format!("header `{name}` value contains a line break"),
            ));
        }

        Ok(Self { name, value })
    }
}

/// A fully read and decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }
}

/// Serializes a request for a `Connection: close` exchange.
pub fn encode_request(
    method: &str,
    url: &Url,
    headers: &[Header],
    body: &[u8],
) -> VirtResult<Vec<u8>> {
    let host = url.host_str().ok_or_else(|| {
        VirtError::new(
            "net.http.host_missing",
            format!("request URL `{url}` has no host"),
        )
    })?;
    if method.is_empty() || !method.bytes().all(is_token_byte) {
        return Err(VirtError::new(
            "net.http.method_invalid",
            format!("invalid request method `{method}`"),
        ));
    }

    let mut target = url.path().to_owned();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = format!("{method} {target} HTTP/1.1\r\nHost: {host}");
    if let Some(port) = url.port() {
        head.push_str(&format!(":{port}"));
    }
    head.push_str("\r\n");

    let has = |name: &str| headers.iter().any(|header| header.name.eq_ignore_ascii_case(name));
    if !has("accept-encoding") {
        head.push_str("Accept-Encoding: gzip, deflate, br\r\n");
    }
    for header in headers {
        head.push_str(&header.name);
        head.push_str(": ");
        head.push_str(&header.value);
        head.push_str("\r\n");
    }
    if !body.is_empty() && !has("content-length") {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut encoded = head.into_bytes();
    encoded.extend_from_slice(body);
    Ok(encoded)
}

/// Parses a complete response read until connection close.
pub fn parse_response(bytes: &[u8], head_request: bool) -> VirtResult<RawResponse> {
    let head_end = find_header_end(bytes).ok_or_else(|| {
        VirtError::new(
            "net.http.head_incomplete",
            "connection closed before the response head ended",
        )
    })?;
    if head_end > MAX_RESPONSE_HEAD_BYTES {
        return Err(VirtError::new(
            "net.http.head_too_large",
            format!("response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
        ));
    }

    let head = std::str::from_utf8(&bytes[..head_end]).map_err(|error| {
        VirtError::new(
            "net.http.head_invalid",
            format!("response head is not UTF-8: {error}"),
        )
    })?;
    let mut lines = head.split("\r\n").filter(|line| !line.is_empty());
    let status_line = lines.next().unwrap_or_default();
    let status = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            VirtError::new(
                "net.http.header_invalid",
                format!("malformed header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let payload = &bytes[head_end..];
    let body = if head_request || status_disallows_body(status) {
        Vec::new()
    } else if is_chunked(&headers)? {
        decode_chunked(payload)?
    } else if let Some(length) = parse_content_length(&headers)? {
        let framed = payload.get(..length).ok_or_else(|| {
            VirtError::new(
                "net.http.body_truncated",
                format!("expected {length} body bytes, received {}", payload.len()),
            )
        })?;
        framed.to_vec()
    } else {
        payload.to_vec()
    };

    let body = decode_content_encoding(&headers, &body)?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

pub fn status_is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> VirtResult<u16> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(VirtError::new(
            "net.http.version_unsupported",
            format!("unsupported response version `{version}`"),
        ));
    }

    let code_text = parts.next().ok_or_else(|| {
        VirtError::new(
            "net.http.status_line_invalid",
            format!("missing status code in status line `{line}`"),
        )
    })?;
    let code = code_text.parse::<u16>().map_err(|error| {
        VirtError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;
    if !(100..=599).contains(&code) {
        return Err(VirtError::new(
            "net.http.status_invalid",
            format!("status code {code} is out of range"),
        ));
    }
    Ok(code)
}

fn status_disallows_body(status: u16) -> bool {
    (100..200).contains(&status) || status == 204 || status == 304
}

fn is_chunked(headers: &[Header]) -> VirtResult<bool> {
    let mut chunked = false;
    for header in headers {
        if !header.name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        for token in header.value.split(',') {
            match token.trim().to_ascii_lowercase().as_str() {
                "chunked" => chunked = true,
                "" | "identity" => {}
                other => {
                    return Err(VirtError::new(
                        "net.http.transfer_encoding_unsupported",
                        format!("unsupported transfer encoding `{other}`"),
                    ));
                }
            }
        }
    }
    Ok(chunked)
}

fn parse_content_length(headers: &[Header]) -> VirtResult<Option<usize>> {
    let mut value: Option<usize> = None;
    for header in headers {
        if !header.name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        let parsed = header.value.trim().parse::<usize>().map_err(|error| {
            VirtError::new(
                "net.http.content_length_invalid",
                format!("invalid Content-Length `{}`: {error}", header.value),
            )
        })?;
        if value.is_some_and(|existing| existing != parsed) {
            return Err(VirtError::new(
                "net.http.content_length_conflict",
                "conflicting Content-Length headers",
            ));
        }
        value = Some(parsed);
    }
    Ok(value)
}

fn decode_chunked(mut input: &[u8]) -> VirtResult<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = input
            .windows(2)
            .position(|window| window == b"\r\n")
            .ok_or_else(|| VirtError::new("net.http.chunk_truncated", "missing chunk size line"))?;
        let line = String::from_utf8_lossy(&input[..line_end]);
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|error| {
            VirtError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_text}`: {error}"),
            )
        })?;
        input = &input[line_end + 2..];

        // Trailers after the last chunk carry nothing we use.
        if size == 0 {
            return Ok(body);
        }

        let chunk = input
            .get(..size)
            .filter(|_| input.get(size..size + 2) == Some(b"\r\n".as_slice()))
            .ok_or_else(|| {
                VirtError::new(
                    "net.http.chunk_truncated",
                    format!("chunk of {size} bytes is incomplete"),
                )
            })?;
        body.extend_from_slice(chunk);
        input = &input[size + 2..];
    }
}

fn decode_content_encoding(headers: &[Header], body: &[u8]) -> VirtResult<Vec<u8>> {
    let mut decoded = body.to_vec();
    for encoding in content_encodings(headers).iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(&decoded)), "gzip")?,
            "deflate" => decode_deflate(&decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(&decoded), 4096), "brotli")?,
            _ => {
                return Err(VirtError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }
    Ok(decoded)
}

fn content_encodings(headers: &[Header]) -> Vec<String> {
    headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

// Servers send both zlib-wrapped and raw deflate under the same label.
fn decode_deflate(body: &[u8]) -> VirtResult<Vec<u8>> {
    match read_all(ZlibDecoder::new(Cursor::new(body)), "deflate") {
        Ok(decoded) => Ok(decoded),
        Err(_) => read_all(DeflateDecoder::new(Cursor::new(body)), "deflate"),
    }
}

fn read_all(mut reader: impl Read, label: &str) -> VirtResult<Vec<u8>> {
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded).map_err(|error| {
        VirtError::new(
            "net.http.decode_failed",
            format!("{label} decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::Header;
    use super::encode_request;
    use super::parse_response;
    use brotli::CompressorWriter;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use flate2::write::ZlibEncoder;
    use std::io::Write;
    use url::Url;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        assert!(encoder.write_all(data).is_ok());
        match encoder.finish() {
            Ok(encoded) => encoded,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn encodes_get_with_query_and_port() {
        let url = match Url::parse("http://cdn.example:8080/a/b.css?v=3#frag") {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        };
        let header = match Header::new("User-Agent", "vframe") {
            Ok(header) => header,
            Err(error) => panic!("{error}"),
        };
        let encoded = match encode_request("GET", &url, &[header], &[]) {
            Ok(encoded) => encoded,
            Err(error) => panic!("{error}"),
        };
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with("GET /a/b.css?v=3 HTTP/1.1\r\nHost: cdn.example:8080\r\n"));
        assert!(text.contains("User-Agent: vframe\r\n"));
        assert!(text.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn rejects_header_injection() {
        let outcome = Header::new("X-Test", "a\r\nInjected: yes");
        assert!(matches!(outcome, Err(error) if error.code == "net.http.header_value_invalid"));
    }

    #[test]
    fn parses_content_length_framing() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/css\r\nContent-Length: 5\r\n\r\nhello trailing";
        let response = match parse_response(raw, false) {
            Ok(response) => response,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert_eq!(response.body, b"hello");
    }

    #[test]
    fn parses_chunked_gzip_body() {
        let compressed = gzip(b"body { color: red }");
        let (first, second) = compressed.split_at(7);
        let mut raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Encoding: gzip\r\n\r\n".to_vec();
        raw.extend_from_slice(format!("{:x};ext=1\r\n", first.len()).as_bytes());
        raw.extend_from_slice(first);
        raw.extend_from_slice(b"\r\n");
        raw.extend_from_slice(format!("{:X}\r\n", second.len()).as_bytes());
        raw.extend_from_slice(second);
        raw.extend_from_slice(b"\r\n0\r\nX-Trailer: 1\r\n\r\n");

        let response = match parse_response(&raw, false) {
            Ok(response) => response,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(response.body, b"body { color: red }");
    }

    #[test]
    fn truncated_chunk_is_an_error() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nA\r\nshort";
        let outcome = parse_response(raw, false);
        assert!(matches!(outcome, Err(error) if error.code == "net.http.chunk_truncated"));
    }

    #[test]
    fn decodes_deflate_and_brotli() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        assert!(zlib.write_all(b"zlib body").is_ok());
        let zlib = match zlib.finish() {
            Ok(encoded) => encoded,
            Err(error) => panic!("{error}"),
        };
        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Encoding: deflate\r\n\r\n".to_vec();
        raw.extend_from_slice(&zlib);
        assert!(matches!(parse_response(&raw, false), Ok(response) if response.body == b"zlib body"));

        let mut brotli_body = Vec::new();
        {
            let mut writer = CompressorWriter::new(&mut brotli_body, 4096, 5, 22);
            assert!(writer.write_all(b"brotli body").is_ok());
        }
        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Encoding: br\r\n\r\n".to_vec();
        raw.extend_from_slice(&brotli_body);
        assert!(matches!(parse_response(&raw, false), Ok(response) if response.body == b"brotli body"));
    }

    #[test]
    fn bodyless_statuses_and_head_requests() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n";
        assert!(matches!(parse_response(raw, false), Ok(response) if response.body.is_empty()));

        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n";
        assert!(matches!(parse_response(raw, true), Ok(response) if response.body.is_empty()));
    }

    #[test]
    fn rejects_unknown_versions() {
        let outcome = parse_response(b"SPDY/3 200 OK\r\n\r\n", false);
        assert!(matches!(outcome, Err(error) if error.code == "net.http.version_unsupported"));
    }
}
