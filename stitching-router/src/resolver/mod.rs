//! Resolvers: the entry points a location offers to fetch entities by key.

pub mod arguments;
pub mod key;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

pub use self::arguments::Argument;
pub use self::arguments::ArgumentValue;
pub use self::arguments::ArgumentsParser;
pub use self::key::Key;

/// Computes resolver versions from their canonical serialization.
pub trait VersionHasher: Send + Sync {
    fn hash(&self, canonical: &str) -> String;
}

/// Hex-encoded SHA-256, the default [`VersionHasher`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256Hasher;

impl VersionHasher for Sha256Hasher {
    fn hash(&self, canonical: &str) -> String {
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

/// Stable identifier of a resolver, derived from its content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolverVersion(String);

impl ResolverVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a location fetches an entity type given a key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolver {
    location: String,
    type_name: String,
    field: String,
    list: bool,
    key: Key,
    arguments: Vec<Argument>,
    version: ResolverVersion,
}

#[buildstructor::buildstructor]
impl Resolver {
    /// Returns a builder for a resolver versioned with [`Sha256Hasher`].
    #[builder(visibility = "pub")]
    fn new(
        location: String,
        type_name: String,
        field: String,
        list: Option<bool>,
        key: Key,
        arguments: Vec<Argument>,
    ) -> Self {
        Self::with_hasher(
            location,
            type_name,
            field,
            list.unwrap_or_default(),
            key,
            arguments,
            &Sha256Hasher,
        )
    }
}

impl Resolver {
    /// Creates a resolver whose version is computed by `hasher`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_hasher(
        location: String,
        type_name: String,
        field: String,
        list: bool,
        key: Key,
        arguments: Vec<Argument>,
        hasher: &dyn VersionHasher,
    ) -> Self {
        let canonical = serde_json::json!([
            location,
            type_name,
            field,
            list,
            key.definition(),
            arguments.iter().map(Argument::print).collect::<Vec<_>>(),
        ])
        .to_string();
        let version = ResolverVersion(hasher.hash(&canonical));
        Self {
            location,
            type_name,
            field,
            list,
            key,
            arguments,
            version,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// The type returned by the resolver field, which may be abstract.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Whether the resolver receives every key of a batch at once.
    pub fn list(&self) -> bool {
        self.list
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn version(&self) -> &ResolverVersion {
        &self.version
    }
}
