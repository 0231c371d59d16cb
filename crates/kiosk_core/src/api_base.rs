//! Resolution of the origin every collaborator request is sent to.

use tracing::warn;
use url::{Origin, Url};

/// Hosts that only ever serve the kiosk's static bundle, never the APIs.
pub const DEFAULT_STATIC_HOST_SUFFIXES: &[&str] = &["azurestaticapps.net", "github.io"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBase {
    origin: Url,
    same_origin: bool,
}

impl ApiBase {
    /// Requests go to the origin the kiosk itself is served from.
    pub fn same_origin(hosting_origin: &Url) -> Self {
        Self {
            origin: origin_url(hosting_origin).unwrap_or_else(|| hosting_origin.clone()),
            same_origin: true,
        }
    }

    /// Picks the configured API origin when it is usable, else same-origin.
    ///
    /// The configured value is cut down to scheme, host and port. It is
    /// ignored when it does not parse, when it equals the hosting origin, or
    /// when its host is a known static-site host.
    pub fn resolve<S: AsRef<str>>(
        configured: Option<&str>,
        hosting_origin: &Url,
        static_host_suffixes: &[S],
    ) -> Self {
        let Some(raw) = configured.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Self::same_origin(hosting_origin);
        };

        let Some(origin) = Url::parse(raw).ok().as_ref().and_then(origin_url) else {
            warn!(api_base = raw, "invalid api base, using same-origin requests");
            return Self::same_origin(hosting_origin);
        };

        if Some(origin.origin()) == origin_url(hosting_origin).map(|u| u.origin()) {
            warn!(
                api_base = %origin,
                "api base equals the hosting origin, using same-origin requests"
            );
            return Self::same_origin(hosting_origin);
        }

        if is_static_host(&origin, static_host_suffixes) {
            warn!(
                api_base = %origin,
                "api base appears to be a static-site origin, using same-origin requests"
            );
            return Self::same_origin(hosting_origin);
        }

        Self {
            origin,
            same_origin: false,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn is_same_origin(&self) -> bool {
        self.same_origin
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        if path.starts_with('/') {
            self.origin.join(path)
        } else {
            self.origin.join(&format!("/{path}"))
        }
    }
}

/// `scheme://host[:port]/` for URLs with a tuple origin; `None` for opaque ones.
fn origin_url(url: &Url) -> Option<Url> {
    match url.origin() {
        origin @ Origin::Tuple(..) => Url::parse(&origin.ascii_serialization()).ok(),
        Origin::Opaque(_) => None,
    }
}

fn is_static_host<S: AsRef<str>>(origin: &Url, suffixes: &[S]) -> bool {
    let Some(host) = origin.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    suffixes.iter().any(|suffix| {
        let suffix = suffix.as_ref().trim_start_matches('.').to_ascii_lowercase();
        host == suffix || host.ends_with(&format!(".{suffix}"))
    })
}
