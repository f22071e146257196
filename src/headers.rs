use crate::config::{MainConfig, ResolvedAuth, TokenSource};
use crate::error::UplinkError;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, IF_NONE_MATCH,
    USER_AGENT, VIA,
};
use std::collections::HashMap;
use std::env;

const ACCEPT_JSON: &str = "application/json;";
const ENCODING_GZIP: &str = "gzip";
const DEFAULT_TOKEN_ENV: &str = "NPM_TOKEN";

pub(crate) const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Per-request inputs to header assembly.
#[derive(Debug, Default)]
pub struct RequestContext<'a> {
    /// Headers forwarded from the downstream request, if any.
    pub caller_headers: Option<&'a HeaderMap>,
    /// Cached etag; forces a conditional request.
    pub etag: Option<&'a str>,
    /// Downstream client address for X-Forwarded-For.
    pub remote_address: Option<&'a str>,
    /// Whether to inject configured credentials (the search path does not).
    pub inject_auth: bool,
}

impl<'a> RequestContext<'a> {
    pub fn authenticated() -> Self {
        Self {
            inject_auth: true,
            ..Self::default()
        }
    }
}

/// Assembles outgoing request headers for one uplink.
///
/// Construction parses the static pieces once (user agent, Via suffix,
/// config overrides); `build` layers the per-request parts on top in a
/// fixed order so config overrides can replace anything except the
/// conditional-request clamp and the forwarding headers.
#[derive(Debug)]
pub struct HeaderBuilder {
    user_agent: HeaderValue,
    via_suffix: String,
    auth: Option<ResolvedAuth>,
    overrides: Vec<(HeaderName, HeaderValue)>,
    behind_proxy: bool,
}

impl HeaderBuilder {
    pub fn new(
        main: &MainConfig,
        auth: Option<ResolvedAuth>,
        overrides: &HashMap<String, String>,
        behind_proxy: bool,
    ) -> Result<Self, UplinkError> {
        let user_agent = HeaderValue::from_str(&format!("npm ({})", main.user_agent))
            .map_err(|_| UplinkError::config("user_agent contains invalid header characters"))?;

        let mut parsed = Vec::with_capacity(overrides.len());
        for (name, value) in overrides {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| UplinkError::config(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| UplinkError::config(format!("invalid value for header '{name}'")))?;
            parsed.push((name, value));
        }

        Ok(Self {
            user_agent,
            via_suffix: format!("1.1 {} (Verdaccio)", main.server_id),
            auth,
            overrides: parsed,
            behind_proxy,
        })
    }

    pub fn build(&self, ctx: &RequestContext<'_>) -> Result<HeaderMap, UplinkError> {
        let mut headers = ctx.caller_headers.cloned().unwrap_or_default();

        // Base headers, only where the caller has not already spoken.
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        }
        if !headers.contains_key(ACCEPT_ENCODING) {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ENCODING_GZIP));
        }
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }

        if ctx.inject_auth && !headers.contains_key(AUTHORIZATION) {
            if let Some(auth) = &self.auth {
                let token = resolve_token(&auth.source)?;
                let value = HeaderValue::from_str(&format!("{} {token}", auth.scheme.as_str()))
                    .map_err(|_| {
                        UplinkError::config("auth token contains invalid header characters")
                    })?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        // Config overrides replace anything set so far, Authorization
        // included.
        for (name, value) in &self.overrides {
            headers.insert(name.clone(), value.clone());
        }

        // The conditional-request pair is not overridable.
        if let Some(etag) = ctx.etag {
            let value = HeaderValue::from_str(etag)
                .map_err(|_| UplinkError::config("etag contains invalid header characters"))?;
            headers.insert(IF_NONE_MATCH, value);
            headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        }

        self.apply_forwarding(&mut headers, ctx.remote_address)?;
        Ok(headers)
    }

    fn apply_forwarding(
        &self,
        headers: &mut HeaderMap,
        remote_address: Option<&str>,
    ) -> Result<(), UplinkError> {
        let via = match headers.get(VIA).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.is_empty() => {
                format!("{existing}, {}", self.via_suffix)
            }
            _ => self.via_suffix.clone(),
        };
        headers.insert(
            VIA,
            HeaderValue::from_str(&via)
                .map_err(|_| UplinkError::config("via chain contains invalid characters"))?,
        );

        // X-Forwarded-For is only added on direct connections.
        if self.behind_proxy {
            return Ok(());
        }
        if let Some(address) = remote_address {
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.is_empty() => format!("{existing}, {address}"),
                _ => address.to_string(),
            };
            headers.insert(
                X_FORWARDED_FOR,
                HeaderValue::from_str(&forwarded)
                    .map_err(|_| UplinkError::config("invalid remote address"))?,
            );
        }
        Ok(())
    }
}

fn resolve_token(source: &TokenSource) -> Result<String, UplinkError> {
    match source {
        TokenSource::Literal(token) => Ok(token.clone()),
        TokenSource::Env(name) => env_token(name),
        TokenSource::DefaultEnv => env_token(DEFAULT_TOKEN_ENV),
    }
}

fn env_token(name: &str) -> Result<String, UplinkError> {
    env::var(name)
        .ok()
        .filter(|token| !token.trim().is_empty())
        .ok_or(UplinkError::TokenRequired)
}
