//! Scheme-tagged resource locators and their virtualized form.

use url::Url;
use vf_core::VirtError;
use vf_core::VirtResult;

/// Prefix of every virtualized resource URL written into markup.
pub const VIRTUAL_PREFIX: &str = "vframe://resource/";

const PASSTHROUGH_SCHEMES: [&str; 5] = ["data:", "blob:", "about:", "javascript:", "mailto:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorScheme {
    Archive,
    Vault,
    ProxiedApp,
    LocalFile,
    Network,
    Virtual,
}

impl LocatorScheme {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "archive" => Some(Self::Archive),
            "vault" => Some(Self::Vault),
            "app" => Some(Self::ProxiedApp),
            "file" => Some(Self::LocalFile),
            "http" | "https" => Some(Self::Network),
            "vframe" => Some(Self::Virtual),
            _ => None,
        }
    }

    /// Archive and vault lookups share the `.html` and percent-decoding
    /// fallbacks.
    pub fn has_path_fallbacks(self) -> bool {
        matches!(self, Self::Archive | Self::Vault)
    }
}

/// An absolute URL whose scheme the router can dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLocator {
    url: Url,
    scheme: LocatorScheme,
}

impl ResourceLocator {
    /// Parses an absolute locator. Relative input is rejected.
    pub fn parse(input: &str) -> VirtResult<Self> {
        let url = Url::parse(input.trim()).map_err(|error| {
            VirtError::new(
                "net.locator.unresolved",
                format!("`{input}` is not an absolute locator: {error}"),
            )
        })?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> VirtResult<Self> {
        let scheme = LocatorScheme::from_scheme(url.scheme()).ok_or_else(|| {
            VirtError::new(
                "net.locator.scheme_unsupported",
                format!("no handler for scheme `{}`", url.scheme()),
            )
        })?;
        Ok(Self { url, scheme })
    }

    /// Resolves `reference` against `context`.
    ///
    /// A virtualized context is unwrapped first so that relative references
    /// land in the resource's own scheme. Without a context only absolute
    /// references resolve.
    pub fn resolve(reference: &str, context: Option<&Url>) -> VirtResult<Self> {
        let reference = reference.trim();
        if let Ok(url) = Url::parse(reference) {
            return Self::from_url(url);
        }

        let Some(context) = context else {
            return Err(VirtError::new(
                "net.locator.unresolved",
                format!("relative reference `{reference}` has no context"),
            ));
        };

        let base = match unwrap_virtual(context.as_str()).map(|inner| Url::parse(&inner)) {
            Some(Ok(inner)) => inner,
            Some(Err(error)) => {
                return Err(VirtError::new(
                    "net.locator.unresolved",
                    format!("virtualized context `{context}` is malformed: {error}"),
                ));
            }
            None => context.clone(),
        };

        let url = base.join(reference).map_err(|error| {
            VirtError::new(
                "net.locator.unresolved",
                format!("cannot resolve `{reference}` against `{base}`: {error}"),
            )
        })?;
        Self::from_url(url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> LocatorScheme {
        self.scheme
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Store path used for archive and vault lookups: the URL path without
    /// its leading slash. Query and fragment never take part.
    pub fn store_path(&self) -> String {
        self.url.path().trim_start_matches('/').to_owned()
    }

    /// Lookup order for store-backed schemes: the path as written, with
    /// `.html` appended, percent-decoded, then decoded with `.html`.
    pub fn store_path_candidates(&self) -> Vec<String> {
        let path = self.store_path();
        let mut candidates = vec![path.clone(), format!("{path}.html")];
        if let Ok(decoded) = urlencoding::decode(&path) {
            if decoded != path {
                candidates.push(decoded.to_string());
                candidates.push(format!("{decoded}.html"));
            }
        }
        candidates
    }

    /// The form written into rewritten markup.
    pub fn virtualized(&self) -> String {
        match self.scheme {
            LocatorScheme::Virtual => self.url.as_str().to_owned(),
            _ => format!("{VIRTUAL_PREFIX}{}", urlencoding::encode(self.url.as_str())),
        }
    }

    /// Inner locator of a virtualized URL; `self` for every other scheme.
    pub fn unwrapped(&self) -> VirtResult<Self> {
        match unwrap_virtual(self.url.as_str()) {
            Some(inner) => Self::parse(&inner),
            None => Ok(self.clone()),
        }
    }
}

/// True for references that are never routed: inline data, script and
/// about URLs, fragment-only and empty references.
pub fn is_passthrough(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return true;
    }

    PASSTHROUGH_SCHEMES.iter().any(|scheme| {
        reference
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
    })
}

pub fn is_virtualized(reference: &str) -> bool {
    reference.trim().starts_with(VIRTUAL_PREFIX)
}

/// Decodes the absolute locator wrapped by a virtualized URL.
pub fn unwrap_virtual(url: &str) -> Option<String> {
    let encoded = url.trim().strip_prefix(VIRTUAL_PREFIX)?;
    urlencoding::decode(encoded).ok().map(|inner| inner.into_owned())
}

#[cfg(test)]
mod tests {
    use super::LocatorScheme;
    use super::ResourceLocator;
    use super::VIRTUAL_PREFIX;
    use super::is_passthrough;
    use super::unwrap_virtual;
    use url::Url;

    fn locator(input: &str) -> ResourceLocator {
        match ResourceLocator::parse(input) {
            Ok(locator) => locator,
            Err(error) => panic!("{error}"),
        }
    }

    fn url(input: &str) -> Url {
        match Url::parse(input) {
            Ok(url) => url,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn classifies_supported_schemes() {
        assert_eq!(locator("archive:/index.html").scheme(), LocatorScheme::Archive);
        assert_eq!(locator("vault:/notes/a.html").scheme(), LocatorScheme::Vault);
        assert_eq!(locator("app://vault/a").scheme(), LocatorScheme::ProxiedApp);
        assert_eq!(locator("file:///tmp/a.html").scheme(), LocatorScheme::LocalFile);
        assert_eq!(locator("https://cdn.example/a").scheme(), LocatorScheme::Network);

        let error = ResourceLocator::parse("ftp://host/file");
        assert!(matches!(error, Err(error) if error.code == "net.locator.scheme_unsupported"));
    }

    #[test]
    fn relative_references_need_a_context() {
        for reference in ["img/a.png", "//cdn.example/a.png", "/abs.png"] {
            let outcome = ResourceLocator::resolve(reference, None);
            assert!(
                matches!(&outcome, Err(error) if error.code == "net.locator.unresolved"),
                "{reference} resolved without context: {outcome:?}"
            );
        }
    }

    #[test]
    fn resolves_within_store_schemes() {
        let context = url("archive:/reader/index.html");
        let resolved = match ResourceLocator::resolve("../img/a.png?v=2#top", Some(&context)) {
            Ok(resolved) => resolved,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(resolved.as_str(), "archive:/img/a.png?v=2#top");
        assert_eq!(resolved.store_path(), "img/a.png");
    }

    #[test]
    fn store_path_fallback_order() {
        assert_eq!(
            locator("archive:/My%20Book/ch1").store_path_candidates(),
            vec![
                "My%20Book/ch1".to_owned(),
                "My%20Book/ch1.html".to_owned(),
                "My Book/ch1".to_owned(),
                "My Book/ch1.html".to_owned(),
            ]
        );
        assert_eq!(locator("vault:/a.html").store_path_candidates().len(), 2);
    }

    #[test]
    fn virtualized_context_resolves_in_inner_scheme() {
        let inner = locator("https://cdn.example/reader/");
        let context = url(&inner.virtualized());
        let resolved = match ResourceLocator::resolve("img/bg.png", Some(&context)) {
            Ok(resolved) => resolved,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(resolved.as_str(), "https://cdn.example/reader/img/bg.png");
    }

    #[test]
    fn virtualizing_is_stable() {
        let original = locator("archive:/css/site.css");
        let virtualized = original.virtualized();
        assert!(virtualized.starts_with(VIRTUAL_PREFIX));
        assert_eq!(
            unwrap_virtual(&virtualized).as_deref(),
            Some("archive:/css/site.css")
        );
        assert_eq!(locator(&virtualized).virtualized(), virtualized);

        let unwrapped = match locator(&virtualized).unwrapped() {
            Ok(unwrapped) => unwrapped,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(unwrapped, original);
    }

    #[test]
    fn passthrough_references() {
        for reference in [
            "",
            "#section",
            "data:image/png;base64,AAAA",
            "BLOB:https://x/1",
            "about:blank",
            "javascript:void(0)",
            "mailto:a@b.c",
        ] {
            assert!(is_passthrough(reference), "{reference}");
        }
        assert!(!is_passthrough("img/a.png"));
        assert!(!is_passthrough("https://cdn.example/a.png"));
    }
}
