use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("invalid topic filter, {0}")]
    InvalidFilter(String),
    #[error("invalid topic name, {0}")]
    InvalidName(String),
}

#[derive(Debug, Eq, PartialEq, Clone, Hash, Ord, PartialOrd)]
pub enum Level {
    Normal(String),
    Metadata(String), // $SYS
    Blank,
    SingleWildcard, // Single level wildcard +
    MultiWildcard,  // Multi-level wildcard #
}

impl Level {
    #[inline]
    pub fn parse<T: AsRef<str>>(s: T) -> Level {
        match s.as_ref() {
            "+" => Level::SingleWildcard,
            "#" => Level::MultiWildcard,
            "" => Level::Blank,
            s if s.starts_with('$') => Level::Metadata(String::from(s)),
            s => Level::Normal(String::from(s)),
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        match self {
            Level::Normal(s) | Level::Metadata(s) => !s.contains(['+', '#']),
            _ => true,
        }
    }

    #[inline]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Level::SingleWildcard | Level::MultiWildcard)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Normal(s) | Level::Metadata(s) => f.write_str(s),
            Level::Blank => Ok(()),
            Level::SingleWildcard => f.write_str("+"),
            Level::MultiWildcard => f.write_str("#"),
        }
    }
}

/// A parsed topic filter.
///
/// `+` matches exactly one level and `#` matches the remaining levels, including the
/// parent level itself (`a/#` matches `a`). Topics starting with `$` are only matched by
/// filters whose first level names them literally.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct Topic(Vec<Level>);

impl Topic {
    #[inline]
    pub fn levels(&self) -> &[Level] {
        &self.0
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.iter().all(Level::is_valid)
            && self.0.iter().position(|l| *l == Level::MultiWildcard).is_none_or(|pos| pos == self.0.len() - 1)
    }

    #[inline]
    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(Level::is_wildcard)
    }

    /// Whether the concrete topic name `topic` is selected by this filter.
    pub fn matches_str(&self, topic: &str) -> bool {
        let metadata = topic.starts_with('$');
        let mut names = topic.split('/');
        for (pos, level) in self.0.iter().enumerate() {
            match level {
                Level::MultiWildcard => return !(pos == 0 && metadata),
                Level::SingleWildcard => match names.next() {
                    Some(_) if pos == 0 && metadata => return false,
                    Some(_) => {}
                    None => return false,
                },
                Level::Blank => {
                    if names.next() != Some("") {
                        return false;
                    }
                }
                Level::Normal(s) | Level::Metadata(s) => {
                    if names.next() != Some(s.as_str()) {
                        return false;
                    }
                }
            }
        }
        names.next().is_none()
    }

    /// Whether every topic selected by `other` is also selected by this filter.
    ///
    /// For filters without wildcards this is the same as `matches_str`.
    pub fn covers(&self, other: &Topic) -> bool {
        let metadata = matches!(other.0.first(), Some(Level::Metadata(_)));
        let mut others = other.0.iter();
        for (pos, level) in self.0.iter().enumerate() {
            match (level, others.next()) {
                (Level::MultiWildcard, _) => return !(pos == 0 && metadata),
                (_, None) => return false,
                (Level::SingleWildcard, Some(Level::MultiWildcard)) => return false,
                (Level::SingleWildcard, Some(_)) => {
                    if pos == 0 && metadata {
                        return false;
                    }
                }
                (l, Some(o)) => {
                    if l != o {
                        return false;
                    }
                }
            }
        }
        others.next().is_none()
    }
}

impl FromStr for Topic {
    type Err = TopicError;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TopicError::InvalidFilter(s.into()));
        }
        let topic = Topic(s.split('/').map(Level::parse).collect());
        if topic.is_valid() {
            Ok(topic)
        } else {
            Err(TopicError::InvalidFilter(s.into()))
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("/"))
    }
}

/// A topic name a message is published to: non-empty and without wildcards.
#[inline]
pub fn check_topic_name(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        Err(TopicError::InvalidName(topic.into()))
    } else {
        Ok(())
    }
}
