use std::fmt;
use thiserror::Error;

pub const DEFAULT_TAG: &str = "latest";
const DOCKER_HUB_REGISTRY: &str = "docker.io";

/// Image reference following the `repository[:tag][@digest]` grammar.
/// `repository` keeps the registry host, e.g. `some.registry.com/image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("image reference is empty")]
    Empty,
    #[error("repository is missing")]
    MissingRepository,
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),
    #[error("invalid tag: {0}")]
    InvalidTag(String),
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => {
                if !is_digest(digest) {
                    return Err(ParseError::InvalidDigest(digest.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A colon only starts a tag when it comes after the last slash, otherwise it
        // belongs to a registry port (localhost:5000/image).
        let last_slash = name.rfind('/');
        let (repository, tag) = match name.rfind(':') {
            Some(pos) if last_slash.is_none_or(|slash| pos > slash) => {
                (&name[..pos], Some(name[pos + 1..].to_string()))
            }
            _ => (name, None),
        };

        if repository.is_empty() {
            return Err(ParseError::MissingRepository);
        }
        if repository
            .split('/')
            .any(|c| c.is_empty() || c.chars().any(char::is_whitespace))
        {
            return Err(ParseError::InvalidRepository(repository.to_string()));
        }
        if let Some(tag) = &tag {
            if !is_tag(tag) {
                return Err(ParseError::InvalidTag(tag.clone()));
            }
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Registry host the repository lives on. Names without an explicit host
    /// belong to Docker Hub.
    pub fn registry(&self) -> &str {
        match self.repository.split_once('/') {
            Some((host, _)) if is_registry_host(host) => host,
            _ => DOCKER_HUB_REGISTRY,
        }
    }

    /// Repository path below the registry host.
    pub fn path(&self) -> String {
        match self.repository.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => rest.to_string(),
            Some(_) => self.repository.clone(),
            None => format!("library/{}", self.repository),
        }
    }

    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with(['.', '-'])
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// `<algorithm>:<hex>`, e.g. `sha256:7ece13a0...`.
pub fn is_digest(digest: &str) -> bool {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return false;
    };
    !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
        && hex.len() >= 32
        && hex.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DIGEST: &str = "sha256:7ece13a07a20c77a31cc36906a10ebc90bd47970905ee61e8ed491b7f4c5d62f";

    #[rstest]
    #[case("some.registry.com/image:1.2.3", "some.registry.com/image", Some("1.2.3"), None)]
    #[case("some.registry.com:1.2.3", "some.registry.com", Some("1.2.3"), None)]
    #[case("localhost:5000/team/image", "localhost:5000/team/image", None, None)]
    #[case("localhost:5000/image:v1", "localhost:5000/image", Some("v1"), None)]
    #[case("nginx", "nginx", None, None)]
    fn test_parse_tagged(
        #[case] input: &str,
        #[case] repository: &str,
        #[case] tag: Option<&str>,
        #[case] digest: Option<&str>,
    ) {
        let reference = ImageReference::parse(input).unwrap();
        assert_eq!(reference.repository, repository);
        assert_eq!(reference.tag.as_deref(), tag);
        assert_eq!(reference.digest.as_deref(), digest);
        assert_eq!(reference.to_string(), input);
    }

    #[test]
    fn test_parse_digest_pinned() {
        let input = format!("some.registry.com/image@{}", DIGEST);
        let reference = ImageReference::parse(&input).unwrap();
        assert_eq!(reference.repository, "some.registry.com/image");
        assert_eq!(reference.tag, None);
        assert_eq!(reference.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let input = format!("some.registry.com/image:1.0@{}", DIGEST);
        let reference = ImageReference::parse(&input).unwrap();
        assert_eq!(reference.tag.as_deref(), Some("1.0"));
        assert_eq!(reference.digest.as_deref(), Some(DIGEST));
    }

    #[rstest]
    #[case("", ParseError::Empty)]
    #[case(":1.0", ParseError::MissingRepository)]
    #[case("registry.com//image", ParseError::InvalidRepository("registry.com//image".to_string()))]
    #[case("registry.com/image:", ParseError::InvalidTag(String::new()))]
    #[case("registry.com/image@sha256:abc", ParseError::InvalidDigest("sha256:abc".to_string()))]
    fn test_parse_errors(#[case] input: &str, #[case] expected: ParseError) {
        assert_eq!(ImageReference::parse(input).unwrap_err(), expected);
    }

    #[test]
    fn test_registry_and_path() {
        let reference = ImageReference::parse("some.registry.com/team/image:1").unwrap();
        assert_eq!(reference.registry(), "some.registry.com");
        assert_eq!(reference.path(), "team/image");

        let reference = ImageReference::parse("team/image").unwrap();
        assert_eq!(reference.registry(), "docker.io");
        assert_eq!(reference.path(), "team/image");
        assert_eq!(reference.tag_or_default(), DEFAULT_TAG);

        let reference = ImageReference::parse("nginx").unwrap();
        assert_eq!(reference.path(), "library/nginx");
    }
}
