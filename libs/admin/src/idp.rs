//! Identity provider configuration.
//!
//! The cluster stores identity provider settings as free-form `key=value`
//! blobs. Here they are explicit structs with known fields, validated before
//! being rendered to the wire form.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdminError;

/// Default configuration name for an identity provider.
pub const DEFAULT_IDP_NAME: &str = "_";

/// Identity provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdpKind {
    #[serde(rename = "openid")]
    OpenId,
    Ldap,
}

impl IdpKind {
    /// Path segment used by the admin API.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdpKind::OpenId => "openid",
            IdpKind::Ldap => "ldap",
        }
    }
}

impl fmt::Display for IdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_name() -> String {
    DEFAULT_IDP_NAME.to_string()
}

/// OpenID Connect provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenIdConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub config_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub claim_name: Option<String>,
    #[serde(default)]
    pub claim_prefix: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub redirect_uri_dynamic: Option<bool>,
    #[serde(default)]
    pub claim_userinfo: Option<bool>,
    #[serde(default)]
    pub role_policy: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// LDAP / Active Directory provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LdapConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub server_addr: String,
    pub lookup_bind_dn: String,
    #[serde(default)]
    pub lookup_bind_password: Option<String>,
    pub user_dn_search_base_dn: String,
    pub user_dn_search_filter: String,
    #[serde(default)]
    pub group_search_base_dn: Option<String>,
    #[serde(default)]
    pub group_search_filter: Option<String>,
    #[serde(default)]
    pub tls_skip_verify: Option<bool>,
    #[serde(default)]
    pub server_insecure: Option<bool>,
    #[serde(default)]
    pub server_starttls: Option<bool>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Identity provider configuration, tagged by kind.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdpConfig {
    #[serde(rename = "openid")]
    OpenId(OpenIdConfig),
    Ldap(LdapConfig),
}

/// One rendered `key=value` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: &'static str,
    pub value: String,
    /// Secret values are never echoed back by the cluster.
    pub secret: bool,
}

fn on_off(value: bool) -> String {
    if value { "on" } else { "off" }.to_string()
}

struct Entries(Vec<KvEntry>);

impl Entries {
    fn string(&mut self, key: &'static str, value: &str) {
        self.0.push(KvEntry {
            key,
            value: value.to_string(),
            secret: false,
        });
    }

    fn opt_string(&mut self, key: &'static str, value: &Option<String>) {
        if let Some(value) = value {
            self.string(key, value);
        }
    }

    fn opt_secret(&mut self, key: &'static str, value: &Option<String>) {
        if let Some(value) = value {
            self.0.push(KvEntry {
                key,
                value: value.clone(),
                secret: true,
            });
        }
    }

    fn opt_bool(&mut self, key: &'static str, value: Option<bool>) {
        if let Some(value) = value {
            self.string(key, &on_off(value));
        }
    }
}

fn require(kind: IdpKind, name: &str, field: &str, value: &str) -> Result<(), AdminError> {
    if value.trim().is_empty() {
        return Err(AdminError::Invalid(format!(
            "{kind} provider {name}: {field} is required"
        )));
    }
    Ok(())
}

impl IdpConfig {
    pub fn kind(&self) -> IdpKind {
        match self {
            IdpConfig::OpenId(_) => IdpKind::OpenId,
            IdpConfig::Ldap(_) => IdpKind::Ldap,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            IdpConfig::OpenId(c) => &c.name,
            IdpConfig::Ldap(c) => &c.name,
        }
    }

    /// Check field presence and cross-field constraints.
    pub fn validate(&self) -> Result<(), AdminError> {
        let kind = self.kind();
        let name = self.name();
        require(kind, name, "name", name)?;

        match self {
            IdpConfig::OpenId(c) => {
                require(kind, name, "config_url", &c.config_url)?;
                require(kind, name, "client_id", &c.client_id)?;
                if !(c.config_url.starts_with("https://") || c.config_url.starts_with("http://")) {
                    return Err(AdminError::Invalid(format!(
                        "openid provider {name}: config_url must be an http(s) URL"
                    )));
                }
                // A provider maps identities either through a claim or a fixed role policy.
                if c.role_policy.is_some() && c.claim_name.is_some() {
                    return Err(AdminError::Invalid(format!(
                        "openid provider {name}: role_policy and claim_name are mutually exclusive"
                    )));
                }
                if let Some(scope) = c.scopes.iter().find(|s| s.contains([',', ' '])) {
                    return Err(AdminError::Invalid(format!(
                        "openid provider {name}: invalid scope {scope:?}"
                    )));
                }
            }
            IdpConfig::Ldap(c) => {
                require(kind, name, "server_addr", &c.server_addr)?;
                require(kind, name, "lookup_bind_dn", &c.lookup_bind_dn)?;
                require(kind, name, "user_dn_search_base_dn", &c.user_dn_search_base_dn)?;
                require(kind, name, "user_dn_search_filter", &c.user_dn_search_filter)?;
                if c.group_search_filter.is_some() != c.group_search_base_dn.is_some() {
                    return Err(AdminError::Invalid(format!(
                        "ldap provider {name}: group_search_filter and group_search_base_dn must be set together"
                    )));
                }
                if c.tls_skip_verify == Some(true) && c.server_insecure == Some(true) {
                    return Err(AdminError::Invalid(format!(
                        "ldap provider {name}: tls_skip_verify has no effect with server_insecure"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Rendered entries, sorted by key.
    pub fn entries(&self) -> Vec<KvEntry> {
        let mut e = Entries(Vec::new());
        match self {
            IdpConfig::OpenId(c) => {
                e.string("config_url", &c.config_url);
                e.string("client_id", &c.client_id);
                e.opt_secret("client_secret", &c.client_secret);
                e.opt_string("claim_name", &c.claim_name);
                e.opt_string("claim_prefix", &c.claim_prefix);
                if !c.scopes.is_empty() {
                    e.string("scopes", &c.scopes.join(","));
                }
                e.opt_string("redirect_uri", &c.redirect_uri);
                e.opt_bool("redirect_uri_dynamic", c.redirect_uri_dynamic);
                e.opt_bool("claim_userinfo", c.claim_userinfo);
                e.opt_string("role_policy", &c.role_policy);
                e.opt_string("display_name", &c.display_name);
                e.opt_string("comment", &c.comment);
            }
            IdpConfig::Ldap(c) => {
                e.string("server_addr", &c.server_addr);
                e.string("lookup_bind_dn", &c.lookup_bind_dn);
                e.opt_secret("lookup_bind_password", &c.lookup_bind_password);
                e.string("user_dn_search_base_dn", &c.user_dn_search_base_dn);
                e.string("user_dn_search_filter", &c.user_dn_search_filter);
                e.opt_string("group_search_base_dn", &c.group_search_base_dn);
                e.opt_string("group_search_filter", &c.group_search_filter);
                e.opt_bool("tls_skip_verify", c.tls_skip_verify);
                e.opt_bool("server_insecure", c.server_insecure);
                e.opt_bool("server_starttls", c.server_starttls);
                e.opt_string("comment", &c.comment);
            }
        }
        e.0.sort_by_key(|entry| entry.key);
        e.0
    }

    /// Non-secret entries, comparable with what the cluster reports back.
    pub fn public_entries(&self) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.secret)
            .map(|e| (e.key.to_string(), e.value))
            .collect()
    }

    /// Render the `key=value` wire form. Validates first.
    pub fn to_kv_string(&self) -> Result<String, AdminError> {
        self.validate()?;
        Ok(self
            .entries()
            .iter()
            .map(|e| format!("{}={}", e.key, quote_value(&e.value)))
            .collect::<Vec<_>>()
            .join(" "))
    }
}

// Secrets stay out of logs and panics.
impl fmt::Debug for IdpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"type", &self.kind().as_str());
        map.entry(&"name", &self.name());
        for entry in self.entries() {
            if entry.secret {
                map.entry(&entry.key, &"<redacted>");
            } else {
                map.entry(&entry.key, &entry.value);
            }
        }
        map.finish()
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && !value.contains(|c: char| c.is_whitespace() || c == '"' || c == '=') {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Identity provider configuration as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpConfigInfo {
    pub kind: IdpKind,
    pub name: String,
    /// Non-secret entries.
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openid() -> OpenIdConfig {
        OpenIdConfig {
            name: DEFAULT_IDP_NAME.to_string(),
            config_url: "https://accounts.example.com/.well-known/openid-configuration"
                .to_string(),
            client_id: "objsync".to_string(),
            client_secret: Some("s3cr3t".to_string()),
            claim_name: Some("policy".to_string()),
            claim_prefix: None,
            scopes: vec!["openid".to_string(), "email".to_string()],
            redirect_uri: None,
            redirect_uri_dynamic: Some(true),
            claim_userinfo: None,
            role_policy: None,
            display_name: Some("Example SSO".to_string()),
            comment: None,
        }
    }

    fn ldap() -> LdapConfig {
        LdapConfig {
            name: "corp".to_string(),
            server_addr: "ldap.corp.example:636".to_string(),
            lookup_bind_dn: "cn=admin,dc=corp,dc=example".to_string(),
            lookup_bind_password: Some("pw".to_string()),
            user_dn_search_base_dn: "ou=people,dc=corp,dc=example".to_string(),
            user_dn_search_filter: "(uid=%s)".to_string(),
            group_search_base_dn: None,
            group_search_filter: None,
            tls_skip_verify: None,
            server_insecure: Some(false),
            server_starttls: None,
            comment: None,
        }
    }

    #[test]
    fn test_openid_kv_string_sorted_and_quoted() {
        let kv = IdpConfig::OpenId(openid()).to_kv_string().unwrap();
        assert_eq!(
            kv,
            "claim_name=policy \
             client_id=objsync \
             client_secret=s3cr3t \
             config_url=https://accounts.example.com/.well-known/openid-configuration \
             display_name=\"Example SSO\" \
             redirect_uri_dynamic=on \
             scopes=openid,email"
        );
    }

    #[test]
    fn test_ldap_filter_with_equals_is_quoted() {
        let kv = IdpConfig::Ldap(ldap()).to_kv_string().unwrap();
        assert!(kv.contains("lookup_bind_dn=\"cn=admin,dc=corp,dc=example\""));
        assert!(kv.contains("user_dn_search_filter=\"(uid=%s)\""));
        assert!(kv.contains("server_insecure=off"));
    }

    #[test]
    fn test_role_policy_and_claim_are_exclusive() {
        let mut config = openid();
        config.role_policy = Some("readonly".to_string());
        let err = IdpConfig::OpenId(config).validate().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_ldap_group_search_fields_paired() {
        let mut config = ldap();
        config.group_search_filter = Some("(member=%d)".to_string());
        assert!(IdpConfig::Ldap(config).validate().is_err());
    }

    #[test]
    fn test_public_entries_skip_secrets() {
        let entries = IdpConfig::Ldap(ldap()).public_entries();
        assert!(!entries.contains_key("lookup_bind_password"));
        assert_eq!(entries["server_addr"], "ldap.corp.example:636");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", IdpConfig::OpenId(openid()));
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_tagged_deserialization() {
        let config: IdpConfig = serde_json::from_str(
            r#"{"type":"openid","config_url":"https://id.example/.well-known","client_id":"c"}"#,
        )
        .unwrap();
        assert_eq!(config.kind(), IdpKind::OpenId);
        assert_eq!(config.name(), "_");
    }
}
