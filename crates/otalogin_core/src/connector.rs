//! Per-channel login form descriptors.
//!
//! A descriptor says where a channel's login page lives, which selectors
//! locate its fields, and which element only appears after a successful
//! login. Descriptors carry no behaviour; the field filler interprets them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginSelectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    pub success_indicator: String,
}

/// An additional input some channels require, keyed like
/// [`crate::JobCredentials::extra_fields`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraField {
    pub key: String,
    pub label: String,
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub code: String,
    pub name: String,
    pub login_url: String,
    /// Hostname suffixes identifying the channel's pages.
    #[serde(default)]
    pub hosts: Vec<String>,
    pub selectors: LoginSelectors,
    #[serde(default)]
    pub extra_fields: Vec<ExtraField>,
}

impl ConnectorDescriptor {
    /// Declared extra fields that have a non-empty value, in declaration
    /// order. Keys the descriptor does not declare are never yielded.
    pub fn extra_field_values<'a>(
        &'a self,
        values: &'a BTreeMap<String, String>,
    ) -> impl Iterator<Item = (&'a ExtraField, &'a str)> + 'a {
        self.extra_fields.iter().filter_map(move |field| {
            values
                .get(&field.key)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
                .map(|value| (field, value))
        })
    }

    fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|suffix| {
            let suffix = suffix.to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        })
    }
}

/// Lookup table from channel code to descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<String, ConnectorDescriptor>,
}

impl ConnectorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The partner sites supported out of the box.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.insert(ConnectorDescriptor {
            code: "rakuten".to_string(),
            name: "Rakuten Travel".to_string(),
            login_url: "https://hotel.travel.rakuten.co.jp/extranet/login".to_string(),
            hosts: vec!["rakuten.co.jp".to_string()],
            selectors: LoginSelectors {
                username: "#username".to_string(),
                password: "#password".to_string(),
                submit: "#login-button".to_string(),
                success_indicator: ".dashboard-header".to_string(),
            },
            extra_fields: Vec::new(),
        });
        registry.insert(ConnectorDescriptor {
            code: "jalan".to_string(),
            name: "Jalan".to_string(),
            login_url: "https://www.jalan.net/jalan/doc/howto/innkanri/".to_string(),
            hosts: vec!["jalan.net".to_string()],
            selectors: LoginSelectors {
                username: "#login_id".to_string(),
                password: "#password".to_string(),
                submit: "button[type=\"submit\"]".to_string(),
                success_indicator: ".main-content".to_string(),
            },
            extra_fields: Vec::new(),
        });
        registry.insert(ConnectorDescriptor {
            code: "neppan".to_string(),
            name: "Neppan".to_string(),
            login_url: "https://asp.hotel-story.ne.jp/ver3/ASPU0201.asp".to_string(),
            hosts: vec!["hotel-story.ne.jp".to_string()],
            selectors: LoginSelectors {
                username: "input[name=\"txtHotelID\"]".to_string(),
                password: "input[name=\"txtPwd\"]".to_string(),
                submit: "input[type=\"submit\"]".to_string(),
                success_indicator: "#main-menu".to_string(),
            },
            extra_fields: vec![ExtraField {
                key: "hotel_id".to_string(),
                label: "Facility ID".to_string(),
                selector: "input[name=\"txtHotelCD\"]".to_string(),
            }],
        });
        registry
    }

    /// Adds a descriptor, replacing any existing one with the same code.
    pub fn insert(&mut self, descriptor: ConnectorDescriptor) -> Option<ConnectorDescriptor> {
        self.connectors.insert(descriptor.code.clone(), descriptor)
    }

    pub fn get(&self, code: &str) -> Option<&ConnectorDescriptor> {
        self.connectors.get(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectorDescriptor> {
        self.connectors.values()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Guesses the channel a page belongs to from its hostname.
    pub fn detect_channel(&self, url: &str) -> Option<&ConnectorDescriptor> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        self.connectors.values().find(|c| c.matches_host(host))
    }

    pub fn is_target_url(&self, url: &str) -> bool {
        self.detect_channel(url).is_some()
    }
}

impl FromIterator<ConnectorDescriptor> for ConnectorRegistry {
    fn from_iter<I: IntoIterator<Item = ConnectorDescriptor>>(iter: I) -> Self {
        let mut registry = Self::empty();
        for descriptor in iter {
            registry.insert(descriptor);
        }
        registry
    }
}

impl Extend<ConnectorDescriptor> for ConnectorRegistry {
    fn extend<I: IntoIterator<Item = ConnectorDescriptor>>(&mut self, iter: I) {
        for descriptor in iter {
            self.insert(descriptor);
        }
    }
}
