//! Projects the destination Secret into the configuration document of the Dex server.
//!
//! The projection is a pure function of [`ServerSettings`] and [`ServerIdentity`]. Its
//! output is compared byte by byte between passes to decide whether Dex has to be
//! restarted, so it must be deterministic. All maps are ordered by key, see [`Node`].
use std::collections::BTreeMap;

use snafu::{OptionExt as _, ResultExt as _, Snafu};

use crate::settings::{self, ServerIdentity, ServerSettings};

pub use self::document::Node;

mod document;

/// Display name of the primary static client.
pub const STATIC_CLIENT_NAME: &str = "devtron";

pub const GRPC_LISTEN_ADDRESS: &str = "0.0.0.0:5557";
pub const TELEMETRY_LISTEN_ADDRESS: &str = "0.0.0.0:5558";

/// Connector types which receive the Dex callback URL as `config.redirectURI`.
pub const REDIRECT_URI_CONNECTOR_TYPES: [&str; 8] = [
    "oidc",
    "saml",
    "microsoft",
    "linkedin",
    "gitlab",
    "github",
    "bitbucket-cloud",
    "openshift",
];

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to infer redirect url from the configured base url"))]
    RedirectUrl { source: settings::Error },

    #[snafu(display("failed to infer issuer url from the configured base url"))]
    IssuerUrl { source: settings::Error },

    #[snafu(display("failed to infer connector redirect url from the configured base url"))]
    ConnectorRedirectUrl { source: settings::Error },

    #[snafu(display("failed to determine the Dex web listen address"))]
    WebListenAddress { source: settings::Error },

    #[snafu(display("failed to parse dex.config"))]
    ParseConfig { source: serde_yaml::Error },

    #[snafu(display("failed to convert dex.config"))]
    ConvertConfig { source: document::Error },

    #[snafu(display("dex.config must be a mapping"))]
    ConfigNotMapping,

    #[snafu(display("staticClients must be a list"))]
    MalformedStaticClients,

    #[snafu(display("connectors must be a list"))]
    MalformedConnectors,

    #[snafu(display("connector #{index} is not a mapping"))]
    ConnectorNotMapping { index: usize },

    #[snafu(display("connector #{index} has no type"))]
    ConnectorMissingType { index: usize },

    #[snafu(display("connector #{index} of type {connector_type:?} has no config mapping"))]
    ConnectorMissingConfig {
        index: usize,
        connector_type: String,
    },
}

/// Serialized Dex configuration.
///
/// An empty document means Dex is not configured and must not be started.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DexConfigDocument(Vec<u8>);

impl DexConfigDocument {
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Builds the Dex configuration from `settings`.
///
/// The raw `dex.config` blob is taken as the base. On top of it the storage, listener and
/// OAuth2 sections and the issuer are set, the primary static client is prepended to
/// `staticClients`, and every connector of a type in [`REDIRECT_URI_CONNECTOR_TYPES`]
/// gets its `config.redirectURI` pointed at the Dex callback. The ID token expiry
/// defaults to the user session duration unless the blob configures `expiry` itself.
///
/// A blank blob yields [`DexConfigDocument::unconfigured`].
pub fn project(settings: &ServerSettings, identity: &ServerIdentity) -> Result<DexConfigDocument> {
    if settings.dex_config_raw.trim().is_empty() {
        return Ok(DexConfigDocument::unconfigured());
    }

    let redirect_url = settings.redirect_url().context(RedirectUrlSnafu)?;

    let raw = serde_yaml::from_str::<serde_yaml::Value>(&settings.dex_config_raw)
        .context(ParseConfigSnafu)?;
    let mut root = Node::try_from(raw).context(ConvertConfigSnafu)?;
    if root.is_null() {
        return Ok(DexConfigDocument::unconfigured());
    }
    let config = root.as_map_mut().context(ConfigNotMappingSnafu)?;

    let web_address = identity
        .web_listen_address()
        .context(WebListenAddressSnafu)?;
    config.insert("storage".to_owned(), Node::from([("type", Node::from("memory"))]));
    config.insert("web".to_owned(), Node::from([("http", Node::from(web_address))]));
    config.insert(
        "grpc".to_owned(),
        Node::from([("addr", Node::from(GRPC_LISTEN_ADDRESS))]),
    );
    config.insert(
        "telemetry".to_owned(),
        Node::from([("http", Node::from(TELEMETRY_LISTEN_ADDRESS))]),
    );
    config.insert(
        "oauth2".to_owned(),
        Node::from([("skipApprovalScreen", Node::from(true))]),
    );

    let issuer = settings.issuer_url().context(IssuerUrlSnafu)?;
    config.insert("issuer".to_owned(), Node::from(issuer));

    let static_client = Node::from([
        ("id", Node::from(identity.dex_client_id.as_str())),
        ("name", Node::from(STATIC_CLIENT_NAME)),
        ("secret", Node::from(settings.dex_oauth2_client_secret())),
        ("redirectURIs", Node::List(vec![Node::from(redirect_url)])),
    ]);
    prepend_static_client(config, static_client)?;

    let connector_redirect_url = settings
        .dex_redirect_url()
        .context(ConnectorRedirectUrlSnafu)?;
    inject_connector_redirect_uris(config, &connector_redirect_url)?;

    config.entry("expiry".to_owned()).or_insert_with(|| {
        Node::from([(
            "idTokens",
            Node::from(format!("{}s", identity.user_session_duration.as_secs())),
        )])
    });

    Ok(DexConfigDocument(root.to_yaml().into_bytes()))
}

fn prepend_static_client(config: &mut BTreeMap<String, Node>, client: Node) -> Result<()> {
    let clients = config
        .entry("staticClients".to_owned())
        .or_insert_with(|| Node::List(Vec::new()));
    if clients.is_null() {
        *clients = Node::List(Vec::new());
    }

    clients
        .as_list_mut()
        .context(MalformedStaticClientsSnafu)?
        .insert(0, client);

    Ok(())
}

fn inject_connector_redirect_uris(
    config: &mut BTreeMap<String, Node>,
    redirect_uri: &str,
) -> Result<()> {
    let Some(connectors) = config.get_mut("connectors") else {
        return Ok(());
    };
    if connectors.is_null() {
        return Ok(());
    }

    let connectors = connectors.as_list_mut().context(MalformedConnectorsSnafu)?;
    for (index, connector) in connectors.iter_mut().enumerate() {
        let connector = connector
            .as_map_mut()
            .context(ConnectorNotMappingSnafu { index })?;
        let connector_type = connector
            .get("type")
            .and_then(Node::as_str)
            .context(ConnectorMissingTypeSnafu { index })?
            .to_owned();

        if !REDIRECT_URI_CONNECTOR_TYPES.contains(&connector_type.as_str()) {
            continue;
        }

        connector
            .get_mut("config")
            .and_then(Node::as_map_mut)
            .context(ConnectorMissingConfigSnafu {
                index,
                connector_type,
            })?
            .insert("redirectURI".to_owned(), Node::from(redirect_uri));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    const BASE_URL: &str = "https://devtron.example/orchestrator";

    fn identity() -> ServerIdentity {
        ServerIdentity {
            dex_server_address: "http://127.0.0.1:5556".to_owned(),
            dex_client_id: "argo-cd".to_owned(),
            user_session_duration: Duration::from_secs(10_000),
        }
    }

    fn settings(dex_config: &str) -> ServerSettings {
        ServerSettings {
            url: BASE_URL.to_owned(),
            dex_config_raw: dex_config.to_owned(),
            server_signature: b"c2lnbmF0dXJl".to_vec(),
            ..Default::default()
        }
    }

    fn project_yaml(dex_config: &str) -> serde_yaml::Value {
        let document = project(&settings(dex_config), &identity()).unwrap();
        serde_yaml::from_slice(document.as_bytes()).unwrap()
    }

    const CONNECTORS: &str = indoc! {"
        connectors:
          - type: github
            id: github
            name: GitHub
            config:
              clientID: client
              clientSecret: secret
              redirectURI: https://somewhere.else/callback
          - type: ldap
            id: ldap
            name: LDAP
            config:
              host: ldap.example:636
          - type: oidc
            id: google
            name: Google
            config:
              issuer: https://accounts.google.com
          - type: mockCallback
            id: mock
            name: Mock
    "};

    #[rstest]
    #[case("")]
    #[case("   \n")]
    #[case("~")]
    fn blank_config_is_unconfigured(#[case] dex_config: &str) {
        let document = project(&settings(dex_config), &identity()).unwrap();
        assert!(document.is_empty());
    }

    #[test]
    fn sets_fixed_sections() {
        let config = project_yaml(CONNECTORS);

        assert_eq!(config["storage"]["type"], "memory");
        assert_eq!(config["web"]["http"], "0.0.0.0:5556");
        assert_eq!(config["grpc"]["addr"], "0.0.0.0:5557");
        assert_eq!(config["telemetry"]["http"], "0.0.0.0:5558");
        assert_eq!(config["oauth2"]["skipApprovalScreen"], true);
        assert_eq!(config["issuer"], "https://devtron.example/orchestrator/api/dex");
        assert_eq!(config["expiry"]["idTokens"], "10000s");
    }

    #[test]
    fn fixed_sections_override_blob() {
        let config = project_yaml(indoc! {"
            storage:
              type: postgres
            issuer: https://evil.example
            expiry:
              idTokens: 1h
        "});

        assert_eq!(config["storage"]["type"], "memory");
        assert_eq!(config["issuer"], "https://devtron.example/orchestrator/api/dex");
        assert_eq!(config["expiry"]["idTokens"], "1h");
    }

    #[test]
    fn prepends_static_client() {
        let config = project_yaml(indoc! {"
            staticClients:
              - id: other
                name: Other
                secret: other-secret
        "});

        let clients = config["staticClients"].as_sequence().unwrap();
        assert_eq!(clients.len(), 2);
        assert_eq!(clients[0]["id"], "argo-cd");
        assert_eq!(clients[0]["name"], "devtron");
        assert_eq!(
            clients[0]["secret"].as_str(),
            Some(settings("").dex_oauth2_client_secret().as_str())
        );
        assert_eq!(
            clients[0]["redirectURIs"][0],
            "https://devtron.example/orchestrator/auth/callback"
        );
        assert_eq!(clients[1]["id"], "other");
    }

    #[test]
    fn injects_connector_redirect_uris() {
        let input: serde_yaml::Value = serde_yaml::from_str(CONNECTORS).unwrap();
        let config = project_yaml(CONNECTORS);
        let connectors = config["connectors"].as_sequence().unwrap();
        let callback = "https://devtron.example/orchestrator/api/dex/callback";

        assert_eq!(connectors[0]["config"]["redirectURI"], callback);
        assert_eq!(connectors[0]["config"]["clientID"], "client");
        assert_eq!(connectors[2]["config"]["redirectURI"], callback);

        // Other types pass through unchanged
        assert_eq!(connectors[1], input["connectors"][1]);
        assert_eq!(connectors[3], input["connectors"][3]);
    }

    #[test]
    fn projection_is_deterministic() {
        let reordered = indoc! {"
            connectors:
              - name: GitHub
                id: github
                config:
                  clientSecret: secret
                  redirectURI: https://somewhere.else/callback
                  clientID: client
                type: github
              - config:
                  host: ldap.example:636
                name: LDAP
                type: ldap
                id: ldap
              - id: google
                config:
                  issuer: https://accounts.google.com
                type: oidc
                name: Google
              - id: mock
                type: mockCallback
                name: Mock
        "};

        let first = project(&settings(CONNECTORS), &identity()).unwrap();
        let second = project(&settings(CONNECTORS), &identity()).unwrap();
        let third = project(&settings(reordered), &identity()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn yaml_1_1_keywords_stay_strings() {
        let document = project(
            &settings(indoc! {"
                connectors:
                  - type: github
                    id: github
                    name: \"yes\"
                    config:
                      clientID: \"off\"
                      clientSecret: \"on\"
                      org: \"y\"
            "}),
            &identity(),
        )
        .unwrap();
        let yaml = std::str::from_utf8(document.as_bytes()).unwrap();

        assert!(yaml.contains(r#"clientSecret: "on""#), "{yaml}");
        assert!(yaml.contains(r#"clientID: "off""#), "{yaml}");
        assert!(yaml.contains(r#"org: "y""#), "{yaml}");
        assert!(yaml.contains(r#"name: "yes""#), "{yaml}");

        let config: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config["connectors"][0]["config"]["clientSecret"], "on");
    }

    #[test]
    fn blob_changes_change_document() {
        let first = project(&settings(CONNECTORS), &identity()).unwrap();
        let second = project(
            &settings(&CONNECTORS.replace("client\n", "other-client\n")),
            &identity(),
        )
        .unwrap();

        assert_ne!(first, second);
    }

    #[rstest]
    #[case::not_yaml("connectors: [", "ParseConfig")]
    #[case::not_a_mapping("- a\n- b\n", "ConfigNotMapping")]
    #[case::connectors_not_list("connectors: github\n", "MalformedConnectors")]
    #[case::static_clients_not_list("staticClients: {id: x}\n", "MalformedStaticClients")]
    #[case::connector_not_mapping("connectors: [github]\n", "ConnectorNotMapping")]
    #[case::connector_without_type("connectors: [{id: x}]\n", "ConnectorMissingType")]
    #[case::connector_without_config("connectors: [{type: oidc, id: x}]\n", "ConnectorMissingConfig")]
    #[case::connector_config_not_mapping(
        "connectors: [{type: saml, config: x}]\n",
        "ConnectorMissingConfig"
    )]
    fn malformed_config(#[case] dex_config: &str, #[case] expected: &str) {
        let error = project(&settings(dex_config), &identity()).unwrap_err();
        assert!(
            format!("{error:?}").starts_with(expected),
            "expected {expected}, got {error:?}"
        );
    }

    #[test]
    fn invalid_base_url() {
        let settings = ServerSettings {
            url: "not a url".to_owned(),
            ..settings(CONNECTORS)
        };

        assert!(matches!(
            project(&settings, &identity()),
            Err(Error::RedirectUrl { .. })
        ));
    }

    #[test]
    fn missing_connectors_are_allowed() {
        let config = project_yaml("enablePasswordDB: true\n");
        assert!(config.get("connectors").is_none());
        assert_eq!(config["enablePasswordDB"], true);
    }
}
