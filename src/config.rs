use crate::error::UplinkError;
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

/// Duration literal as it appears in configuration: either a bare number of
/// milliseconds or a human-readable string such as `"30s"` or `"2m"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Interval {
    Millis(u64),
    Literal(String),
}

/// Single string or list of strings (`no_proxy` accepts both shapes).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    One(String),
    Many(Vec<String>),
}

impl StringOrVec {
    /// Flattens into entries, splitting single strings on `,`.
    pub fn entries(&self) -> Vec<String> {
        match self {
            Self::One(value) => value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect(),
            Self::Many(items) => items
                .iter()
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect(),
        }
    }
}

/// Either an environment variable name or a boolean opting into the
/// default `NPM_TOKEN` variable.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenEnv {
    Var(String),
    Default(bool),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<TokenEnv>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
}

impl AuthScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "Basic",
            Self::Bearer => "Bearer",
        }
    }
}

/// Where the credential comes from at request time.
#[derive(Debug, Clone)]
pub enum TokenSource {
    Literal(String),
    Env(String),
    DefaultEnv,
}

/// Auth config after validation. The raw `AuthConfig` shape is polymorphic;
/// everything downstream operates on this variant only.
#[derive(Debug, Clone)]
pub struct ResolvedAuth {
    pub scheme: AuthScheme,
    pub source: TokenSource,
}

impl AuthConfig {
    pub fn resolve(&self) -> Result<ResolvedAuth, UplinkError> {
        let scheme = match self.kind.to_ascii_lowercase().as_str() {
            "basic" => AuthScheme::Basic,
            "bearer" => AuthScheme::Bearer,
            _ => {
                return Err(UplinkError::AuthInvalid {
                    kind: self.kind.clone(),
                });
            }
        };

        let source = if let Some(token) = &self.token {
            TokenSource::Literal(token.clone())
        } else {
            match &self.token_env {
                Some(TokenEnv::Var(name)) => TokenSource::Env(name.clone()),
                Some(TokenEnv::Default(true)) => TokenSource::DefaultEnv,
                Some(TokenEnv::Default(false)) | None => return Err(UplinkError::TokenRequired),
            }
        };

        Ok(ResolvedAuth { scheme, source })
    }
}

/// Keep-alive tuning for the per-uplink connection pool. Key names follow
/// the registry config convention (camelCase).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentOptions {
    #[serde(default = "default_keep_alive", rename = "keepAlive")]
    pub keep_alive: bool,
    #[serde(default = "default_max_sockets", rename = "maxSockets")]
    pub max_sockets: usize,
    #[serde(default = "default_max_free_sockets", rename = "maxFreeSockets")]
    pub max_free_sockets: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            keep_alive: default_keep_alive(),
            max_sockets: default_max_sockets(),
            max_free_sockets: default_max_free_sockets(),
        }
    }
}

fn default_keep_alive() -> bool {
    true
}

fn default_max_sockets() -> usize {
    40
}

fn default_max_free_sockets() -> usize {
    10
}

fn default_strict_ssl() -> bool {
    true
}

/// One uplink entry as the enclosing server hands it over, already parsed
/// from its configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    pub url: String,
    #[serde(default)]
    pub ca: Option<PathBuf>,
    #[serde(default)]
    pub timeout: Option<Interval>,
    #[serde(default)]
    pub maxage: Option<Interval>,
    #[serde(default)]
    pub max_fails: Option<u32>,
    #[serde(default)]
    pub fail_timeout: Option<Interval>,
    #[serde(default = "default_strict_ssl")]
    pub strict_ssl: bool,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<StringOrVec>,
    #[serde(default)]
    pub agent_options: AgentOptions,
}

impl UplinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ca: None,
            timeout: None,
            maxage: None,
            max_fails: None,
            fail_timeout: None,
            strict_ssl: default_strict_ssl(),
            auth: None,
            headers: HashMap::new(),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            agent_options: AgentOptions::default(),
        }
    }
}

/// The slice of the main server configuration the uplink client consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct MainConfig {
    pub user_agent: String,
    pub server_id: String,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Option<StringOrVec>,
}

impl MainConfig {
    pub fn new(user_agent: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            server_id: server_id.into(),
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthConfig, AuthScheme, StringOrVec, TokenEnv, TokenSource, UplinkConfig};
    use crate::error::UplinkError;
    use std::collections::HashMap;

    #[test]
    fn parses_registry_style_uplink_block() {
        let yaml = r#"
npmjs:
  url: https://registry.npmjs.org/
  timeout: 30s
  maxage: 2m
  max_fails: 3
  fail_timeout: 5m
  strict_ssl: true
  auth:
    type: bearer
    token_env: REGISTRY_NPMJS_TOKEN
  headers:
    X-Custom: 'yes'
  agent_options:
    keepAlive: true
    maxSockets: 20
    maxFreeSockets: 5
"#;
        let uplinks: HashMap<String, UplinkConfig> =
            serde_yaml::from_str(yaml).expect("uplink block");
        let npmjs = uplinks.get("npmjs").expect("npmjs entry");

        assert_eq!(npmjs.url, "https://registry.npmjs.org/");
        assert_eq!(npmjs.max_fails, Some(3));
        assert!(npmjs.strict_ssl);
        assert_eq!(npmjs.headers.get("X-Custom").map(String::as_str), Some("yes"));
        assert_eq!(npmjs.agent_options.max_sockets, 20);
        assert_eq!(npmjs.agent_options.max_free_sockets, 5);

        let auth = npmjs.auth.as_ref().expect("auth").resolve().expect("resolve");
        assert_eq!(auth.scheme, AuthScheme::Bearer);
        assert!(matches!(auth.source, TokenSource::Env(ref name) if name == "REGISTRY_NPMJS_TOKEN"));
    }

    #[test]
    fn numeric_and_boolean_config_shapes() {
        let yaml = r#"
url: http://localhost:4873
timeout: 1000
auth:
  type: Basic
  token_env: true
"#;
        let cfg: UplinkConfig = serde_yaml::from_str(yaml).expect("uplink");
        assert!(matches!(cfg.timeout, Some(super::Interval::Millis(1000))));
        let auth = cfg.auth.expect("auth").resolve().expect("resolve");
        assert_eq!(auth.scheme, AuthScheme::Basic);
        assert!(matches!(auth.source, TokenSource::DefaultEnv));
    }

    #[test]
    fn auth_scheme_is_case_insensitive_and_capitalized() {
        let auth = AuthConfig {
            kind: "BEARER".to_string(),
            token: Some("t".to_string()),
            token_env: None,
        };
        let resolved = auth.resolve().expect("resolve");
        assert_eq!(resolved.scheme.as_str(), "Bearer");
    }

    #[test]
    fn literal_token_takes_precedence_over_env() {
        let auth = AuthConfig {
            kind: "bearer".to_string(),
            token: Some("literal".to_string()),
            token_env: Some(TokenEnv::Var("IGNORED".to_string())),
        };
        let resolved = auth.resolve().expect("resolve");
        assert!(matches!(resolved.source, TokenSource::Literal(ref t) if t == "literal"));
    }

    #[test]
    fn unknown_auth_type_is_rejected() {
        let auth = AuthConfig {
            kind: "digest".to_string(),
            token: Some("t".to_string()),
            token_env: None,
        };
        match auth.resolve() {
            Err(UplinkError::AuthInvalid { kind }) => assert_eq!(kind, "digest"),
            other => panic!("expected AuthInvalid, got {other:?}"),
        }
    }

    #[test]
    fn missing_token_source_is_rejected() {
        for token_env in [None, Some(TokenEnv::Default(false))] {
            let auth = AuthConfig {
                kind: "basic".to_string(),
                token: None,
                token_env,
            };
            assert!(matches!(auth.resolve(), Err(UplinkError::TokenRequired)));
        }
    }

    #[test]
    fn no_proxy_string_splits_on_commas() {
        let one = StringOrVec::One(".example.com, internal.test ,".to_string());
        assert_eq!(one.entries(), vec![".example.com", "internal.test"]);

        let many = StringOrVec::Many(vec!["a.com".to_string(), String::new()]);
        assert_eq!(many.entries(), vec!["a.com"]);
    }
}
