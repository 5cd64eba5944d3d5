//! Container image reference parsing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Parsed image reference: `registry.example.com/shop/api:v1.2`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host, e.g. `registry.example.com` or `localhost:5000`.
    pub registry: Option<String>,
    /// Repository path, e.g. `shop/api` or `nginx`.
    pub name: String,
    /// Tag, defaulting to `latest` when omitted.
    pub tag: String,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid image reference: {0}")]
    Invalid(String),
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageError::Empty);
        }
        // The tag separator is the last ':' after the last '/'; a ':' inside
        // the first segment belongs to a registry port.
        let (repo, tag) = match reference.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (reference, "latest"),
        };
        if repo.is_empty() || tag.is_empty() {
            return Err(ImageError::Invalid(reference.to_string()));
        }
        let (registry, name) = match repo.split_once('/') {
            Some((head, rest))
                if head.contains('.') || head.contains(':') || head == "localhost" =>
            {
                (Some(head.to_string()), rest.to_string())
            }
            _ => (None, repo.to_string()),
        };
        if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
            return Err(ImageError::Invalid(reference.to_string()));
        }
        Ok(ImageRef {
            registry,
            name,
            tag: tag.to_string(),
        })
    }

    /// Canonical string form: registry/name:tag with the tag always present.
    pub fn canonical(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}:{}", registry, self.name, self.tag),
            None => format!("{}:{}", self.name, self.tag),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Short content fingerprint of an image reference, used in instance IDs.
pub fn revision(image: &str) -> String {
    let digest = Sha256::digest(image.as_bytes());
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry_and_tag() {
        let image = ImageRef::parse("registry.example.com/shop/api:v1.2").unwrap();
        assert_eq!(image.registry.as_deref(), Some("registry.example.com"));
        assert_eq!(image.name, "shop/api");
        assert_eq!(image.tag, "v1.2");
        assert_eq!(image.canonical(), "registry.example.com/shop/api:v1.2");
    }

    #[test]
    fn test_parse_bare_name_defaults_latest() {
        let image = ImageRef::parse("nginx").unwrap();
        assert!(image.registry.is_none());
        assert_eq!(image.tag, "latest");
        assert_eq!(image.canonical(), "nginx:latest");
    }

    #[test]
    fn test_parse_registry_port() {
        let image = ImageRef::parse("localhost:5000/api").unwrap();
        assert_eq!(image.registry.as_deref(), Some("localhost:5000"));
        assert_eq!(image.name, "api");
        assert_eq!(image.tag, "latest");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("   ").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        // Empty tag and empty repository.
        assert!(ImageRef::parse("api:").is_err());
        assert!(ImageRef::parse(":v1").is_err());
    }

    #[test]
    fn test_revision_is_stable_and_short() {
        let a = revision("shop/api:v1");
        let b = revision("shop/api:v1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_ne!(a, revision("shop/api:v2"));
    }
}
