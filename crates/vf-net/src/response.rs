use encoding_rs::Encoding;
use encoding_rs::UTF_8;

/// The one response shape every scheme handler produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl ResourceResponse {
    pub fn ok(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            body: Vec::new(),
            content_type: "text/plain".to_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded with the declared charset, falling back to BOM sniffing
    /// and UTF-8.
    pub fn text(&self) -> String {
        let encoding = charset_label(&self.content_type)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(&self.body);
        text.into_owned()
    }

    /// Media type without parameters, lowercased.
    pub fn essence(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }
}

/// Content type guessed from the extension of a store path.
pub fn content_type_for_path(path: &str) -> String {
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let extension = path
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());

    // The guess tables disagree on a few web types; pin the ones pages
    // depend on.
    match extension.as_deref() {
        Some("js" | "mjs") => "text/javascript".to_owned(),
        Some("map" | "json") => "application/json".to_owned(),
        Some("woff2") => "font/woff2".to_owned(),
        _ => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_owned(),
    }
}

fn charset_label(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|parameter| {
        let (name, value) = parameter.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Some(value.trim().trim_matches('"').to_owned())
    })
}

#[cfg(test)]
mod tests {
    use super::ResourceResponse;
    use super::content_type_for_path;

    #[test]
    fn guesses_types_from_extensions() {
        assert_eq!(content_type_for_path("index.html"), "text/html");
        assert_eq!(content_type_for_path("css/site.css?v=1"), "text/css");
        assert_eq!(content_type_for_path("app.mjs"), "text/javascript");
        assert_eq!(content_type_for_path("img/logo.PNG"), "image/png");
        assert_eq!(content_type_for_path("bundle.js.map"), "application/json");
        assert_eq!(content_type_for_path("LICENSE"), "application/octet-stream");
    }

    #[test]
    fn decodes_declared_charset() {
        let response = ResourceResponse::ok(vec![0x63, 0x61, 0x66, 0xE9], "text/html; charset=\"ISO-8859-1\"");
        assert_eq!(response.text(), "café");
        assert_eq!(response.essence(), "text/html");
    }

    #[test]
    fn defaults_to_utf8() {
        let response = ResourceResponse::ok("naïve".as_bytes().to_vec(), "text/plain");
        assert_eq!(response.text(), "naïve");
        assert!(response.is_success());
        assert!(!ResourceResponse::not_found().is_success());
    }
}
