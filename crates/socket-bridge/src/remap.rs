use thiserror::Error;
use url::Url;

/// The port that forces the secure variant of a scheme when requested
/// explicitly.
pub const SECURE_PORT: u16 = 443;

#[derive(Debug, Error)]
pub enum RemapError {
    #[error("unsupported scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },
    #[error("url '{url}' has no host")]
    MissingHost { url: String },
    #[error("remapped url '{url}' is invalid: {source}")]
    InvalidTransportUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Static description of a requestable scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeInfo {
    pub scheme: &'static str,
    pub default_port: u16,
    /// Scheme to switch to when the caller asks for [`SECURE_PORT`].
    pub secure_variant: Option<&'static str>,
    /// Scheme the upstream transport actually dials.
    pub transport: &'static str,
}

const SCHEMES: &[SchemeInfo] = &[
    SchemeInfo {
        scheme: "rtmp",
        default_port: 1935,
        secure_variant: Some("rtmps"),
        transport: "http",
    },
    SchemeInfo {
        scheme: "rtmps",
        default_port: 443,
        secure_variant: None,
        transport: "https",
    },
    SchemeInfo {
        scheme: "http",
        default_port: 80,
        secure_variant: Some("https"),
        transport: "http",
    },
    SchemeInfo {
        scheme: "https",
        default_port: 443,
        secure_variant: None,
        transport: "https",
    },
    SchemeInfo {
        scheme: "ws",
        default_port: 80,
        secure_variant: Some("wss"),
        transport: "http",
    },
    SchemeInfo {
        scheme: "wss",
        default_port: 443,
        secure_variant: None,
        transport: "https",
    },
];

/// Look up a scheme (case-insensitive) in the remap table.
pub fn scheme_info(scheme: &str) -> Option<&'static SchemeInfo> {
    SCHEMES
        .iter()
        .find(|info| info.scheme.eq_ignore_ascii_case(scheme))
}

/// Result of remapping a requested URL onto the upstream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remapped {
    pub transport_url: Url,
    /// `true` when the requested port pushed a plaintext scheme onto its
    /// secure variant.
    pub forced_secure: bool,
}

/// Compute the URL the upstream transport should open for `requested`.
///
/// - The scheme is replaced by the table's transport scheme.
/// - An explicit port of [`SECURE_PORT`] on a scheme that has a secure
///   variant selects the variant's transport scheme instead.
/// - The resulting URL always carries an explicit port (the requested one or
///   the requested scheme's default), so the transport never falls back to
///   its own scheme default.
/// - Userinfo, host, path and query are preserved.
pub fn remap(requested: &Url) -> Result<Remapped, RemapError> {
    let info = scheme_info(requested.scheme()).ok_or_else(|| RemapError::UnsupportedScheme {
        scheme: requested.scheme().to_string(),
    })?;

    let host = requested
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| RemapError::MissingHost {
            url: requested.to_string(),
        })?;

    let port = requested.port().unwrap_or(info.default_port);

    let secure = match info.secure_variant {
        Some(variant) if requested.port() == Some(SECURE_PORT) => scheme_info(variant),
        _ => None,
    };
    let forced_secure = secure.is_some();
    let transport = secure.unwrap_or(info).transport;

    let mut raw = format!("{transport}://{host}:{port}{}", requested.path());
    if let Some(query) = requested.query() {
        raw.push('?');
        raw.push_str(query);
    }

    let mut transport_url = Url::parse(&raw).map_err(|source| RemapError::InvalidTransportUrl {
        url: raw.clone(),
        source,
    })?;
    // `Url` drops a port that equals the scheme default; put it back so
    // consumers can always read it.
    if transport_url.port().is_none() {
        // Only fails for cannot-be-a-base URLs, which http(s) never are.
        let _ = transport_url.set_port(Some(port));
    }
    // Already percent-encoded in `requested`; `%` passes through as-is.
    let _ = transport_url.set_username(requested.username());
    let _ = transport_url.set_password(requested.password());

    Ok(Remapped {
        transport_url,
        forced_secure,
    })
}
