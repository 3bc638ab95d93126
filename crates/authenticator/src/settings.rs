//! Field names, resource coordinates and the settings read from the destination Secret.
use std::{collections::BTreeMap, fmt::Display, time::Duration};

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use k8s_openapi::ByteString;
use sha2::{Digest as _, Sha256};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use url::Url;

/// Raw, user supplied Dex configuration blob.
pub const DEX_CONFIG_KEY: &str = "dex.config";

/// Externally reachable base URL of the dashboard.
pub const URL_KEY: &str = "url";

/// Plain text admin password, kept for one-time display.
pub const ADMIN_PASSWORD_KEY: &str = "admin.password";

pub const ADMIN_PASSWORD_HASH_KEY: &str = "admin.passwordHash";
pub const ADMIN_PASSWORD_MTIME_KEY: &str = "admin.passwordMtime";
pub const SERVER_SIGNATURE_KEY: &str = "server.secretkey";

/// Key of the admin password hash inside the legacy Secret.
pub const LEGACY_ADMIN_PASSWORD_HASH_KEY: &str = "admin.password";

/// Admin password field written by older releases into the destination Secret.
pub const LEGACY_ADMIN_PASSWORD_KEY: &str = "ACD_PASSWORD";

pub const CALLBACK_ENDPOINT: &str = "/auth/callback";
pub const DEX_CALLBACK_ENDPOINT: &str = "/api/dex/callback";
pub const DEX_PROXY_PATH: &str = "/api/dex";

pub const INITIAL_PASSWORD_LENGTH: usize = 16;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse base url {url:?}"))]
    ParseBaseUrl { source: url::ParseError, url: String },

    #[snafu(display("failed to parse Dex server address {address:?}"))]
    ParseServerAddress {
        source: url::ParseError,
        address: String,
    },

    #[snafu(display("Dex server address {address:?} has no port"))]
    ServerAddressPort { address: String },
}

/// Namespace and name of a namespaced Kubernetes object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identity of the supervised Dex server, constructed once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Address the Dex web listener is reached at, e.g. `http://127.0.0.1:5556`.
    pub dex_server_address: String,

    /// Id of the primary static OAuth client.
    pub dex_client_id: String,

    /// Lifetime of user sessions, which also bounds the lifetime of ID tokens issued by Dex.
    pub user_session_duration: Duration,
}

impl ServerIdentity {
    /// Returns the bind address of the Dex web listener, which listens on all interfaces using
    /// the port of [`Self::dex_server_address`].
    pub fn web_listen_address(&self) -> Result<String> {
        let address = Url::parse(&self.dex_server_address).context(ParseServerAddressSnafu {
            address: &self.dex_server_address,
        })?;
        let port = address
            .port_or_known_default()
            .context(ServerAddressPortSnafu {
                address: &self.dex_server_address,
            })?;

        Ok(format!("0.0.0.0:{port}"))
    }
}

/// Settings projected from the destination Secret during a single reconciliation pass.
///
/// Never cached, every pass reads the Secret again.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerSettings {
    pub url: String,
    pub dex_config_raw: String,
    pub server_signature: Vec<u8>,
    pub admin_password_hash: String,
    pub admin_password_mtime: Option<jiff::Timestamp>,
}

impl ServerSettings {
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Self {
        let text = |key: &str| {
            data.get(key)
                .map(|value| String::from_utf8_lossy(&value.0).into_owned())
                .unwrap_or_default()
        };

        Self {
            url: text(URL_KEY),
            dex_config_raw: text(DEX_CONFIG_KEY),
            server_signature: data
                .get(SERVER_SIGNATURE_KEY)
                .map(|value| value.0.clone())
                .unwrap_or_default(),
            admin_password_hash: text(ADMIN_PASSWORD_HASH_KEY),
            // An unparsable mtime is treated like a missing one
            admin_password_mtime: text(ADMIN_PASSWORD_MTIME_KEY).parse().ok(),
        }
    }

    pub fn admin_password_status(&self) -> AdminPasswordStatus {
        match (self.admin_password_hash.is_empty(), self.admin_password_mtime) {
            (true, _) => AdminPasswordStatus::Missing,
            (false, None) => AdminPasswordStatus::UnknownMtime,
            (false, Some(mtime)) => AdminPasswordStatus::Set { mtime },
        }
    }

    /// Redirect URL of the primary OAuth client, `<url>/auth/callback`.
    pub fn redirect_url(&self) -> Result<String> {
        append_url_path(&self.url, CALLBACK_ENDPOINT)
    }

    /// Redirect URL handed to upstream connectors, `<url>/api/dex/callback`.
    pub fn dex_redirect_url(&self) -> Result<String> {
        append_url_path(&self.url, DEX_CALLBACK_ENDPOINT)
    }

    /// Issuer URL of the proxied Dex server, `<url>/api/dex`.
    pub fn issuer_url(&self) -> Result<String> {
        append_url_path(&self.url, DEX_PROXY_PATH)
    }

    /// Secret of the primary OAuth client, derived from the server signing key.
    ///
    /// This is the first 40 characters of the URL-safe base64 encoded SHA-256 digest of the
    /// signing key.
    pub fn dex_oauth2_client_secret(&self) -> String {
        let digest = Sha256::digest(&self.server_signature);
        let mut encoded = URL_SAFE.encode(digest);
        encoded.truncate(40);
        encoded
    }
}

/// State of the admin password as recorded in the destination Secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminPasswordStatus {
    /// No hash is stored, local admin login is impossible.
    Missing,

    /// A hash is stored but its modification time is absent or unparsable.
    UnknownMtime,

    Set { mtime: jiff::Timestamp },
}

/// Appends `path` to the path of `base`, collapsing the slash between both.
fn append_url_path(base: &str, path: &str) -> Result<String> {
    let mut url = Url::parse(base).context(ParseBaseUrlSnafu { url: base })?;

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);

    Ok(url.to_string())
}
