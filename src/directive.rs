//! Decoding of discovery annotations into typed directives.
//!
//! A directive value is written in one of two encodings:
//!
//! * **pair list**: `t=redis,c=redis,tt=img,tm=contains`
//! * **dotted**: `t_redis.c_redis.tt_img.tm_contains`, for label values
//!   whose charset forbids `,` and `=` (Kubernetes annotations).
//!
//! Field tokens: `t` target, `c` config name, `r` reverse flag, `tt`
//! target type (`cname` or `img`), `tm` match mode, `ip` ip mode and
//! `p` port override.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use regex::Regex;

use crate::types::IpMode;

/// What a directive's target string is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetType {
    /// Container names and the Kubernetes container name label.
    ContainerName,
    #[default]
    Image,
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cname" => Ok(TargetType::ContainerName),
            "img" => Ok(TargetType::Image),
            other => Err(format!("unknown target type '{other}'")),
        }
    }
}

/// How a candidate value is compared with a directive's target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    #[default]
    Contains,
    Equal,
    Prefix,
    Suffix,
    /// Target is a regular expression searched in the candidate.
    Regex,
}

impl MatchMode {
    pub fn matches(self, candidate: &str, target: &str) -> bool {
        match self {
            MatchMode::Contains => candidate.contains(target),
            MatchMode::Equal => candidate == target,
            MatchMode::Prefix => candidate.starts_with(target),
            MatchMode::Suffix => candidate.ends_with(target),
            MatchMode::Regex => match Regex::new(target) {
                Ok(re) => re.is_match(candidate),
                Err(e) => {
                    debug!("invalid target regex {}: {}", target, e);
                    false
                }
            },
        }
    }
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(MatchMode::Contains),
            "equal" => Ok(MatchMode::Equal),
            "prefix" => Ok(MatchMode::Prefix),
            "suffix" => Ok(MatchMode::Suffix),
            "regex" => Ok(MatchMode::Regex),
            other => Err(format!("unknown match mode '{other}'")),
        }
    }
}

/// Identifies a directive within a pass: the container carrying it and
/// the annotation key it was read from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectiveId {
    pub origin: String,
    pub key: String,
}

impl fmt::Display for DirectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.origin)
    }
}

/// A parsed discovery advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub id: DirectiveId,
    pub target: String,
    /// Template name without the `.yml` extension.
    pub config_name: String,
    pub reverse: bool,
    pub target_type: TargetType,
    pub match_mode: MatchMode,
    /// `None` defers to the process-wide default.
    pub ip_mode: Option<IpMode>,
    pub port: Option<String>,
}

impl Directive {
    /// Builds a directive from an annotation entry.  Returns `None` when
    /// the value carries no target or names an unknown target type or
    /// match mode.
    pub fn parse(origin: &str, key: &str, value: &str) -> Option<Self> {
        let fields = parse_fields(value);
        let target = fields.get("t").filter(|t| !t.is_empty())?.clone();

        let target_type = match fields.get("tt").map(|tt| tt.parse()) {
            None => TargetType::default(),
            Some(Ok(tt)) => tt,
            Some(Err(e)) => {
                debug!("discarding directive {}: {}", key, e);
                return None;
            }
        };
        let match_mode = match fields.get("tm").map(|tm| tm.parse()) {
            None => MatchMode::default(),
            Some(Ok(tm)) => tm,
            Some(Err(e)) => {
                debug!("discarding directive {}: {}", key, e);
                return None;
            }
        };
        let ip_mode = fields.get("ip").and_then(|ip| match ip.parse() {
            Ok(mode) => Some(mode),
            Err(e) => {
                debug!("directive {}: {}, using default", key, e);
                None
            }
        });

        Some(Directive {
            id: DirectiveId {
                origin: origin.to_string(),
                key: key.to_string(),
            },
            config_name: fields.get("c").cloned().unwrap_or_else(|| target.clone()),
            target,
            reverse: fields.get("r").is_some_and(|r| r == "true"),
            target_type,
            match_mode,
            ip_mode,
            port: fields.get("p").filter(|p| !p.is_empty()).cloned(),
        })
    }

    /// File name of the template this directive materializes.
    pub fn template_file_name(&self) -> String {
        format!("{}.yml", self.config_name)
    }
}

/// Decodes a directive value into its raw field map.
pub fn parse_fields(value: &str) -> BTreeMap<String, String> {
    if value.contains('=') {
        split_pairs(value, ',', '=')
    } else if value.contains('.') {
        split_pairs(value, '.', '_')
    } else {
        BTreeMap::new()
    }
}

fn split_pairs(value: &str, separator: char, assign: char) -> BTreeMap<String, String> {
    value
        .split(separator)
        .filter_map(|segment| {
            let mut parts = segment.split(assign);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(k), Some(v), None) => Some((k.to_string(), v.to_string())),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_list_and_dotted_encodings_agree() {
        let pairs = parse_fields("t=redis,c=redis,tt=img,tm=contains");
        let dotted = parse_fields("t_redis.c_redis.tt_img.tm_contains");
        assert_eq!(pairs, dotted);
        assert_eq!(pairs["t"], "redis");
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let fields = parse_fields("t=redis,broken,p=1=2,c=cache");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["c"], "cache");

        let fields = parse_fields("t_my_redis.c_cache");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["c"], "cache");
    }

    #[test]
    fn value_without_separators_yields_nothing() {
        assert!(parse_fields("redis").is_empty());
        assert!(Directive::parse("c1", "flexDiscoveryRedis", "redis").is_none());
    }

    #[test]
    fn missing_target_discards_directive() {
        assert!(Directive::parse("c1", "flexDiscoveryRedis", "c=redis,tt=img").is_none());
        assert!(Directive::parse("c1", "flexDiscoveryRedis", "t=,c=redis").is_none());
    }

    #[test]
    fn defaults_are_applied() {
        let d = Directive::parse("c1", "flexDiscoveryRedis", "t=redis").unwrap();
        assert_eq!(d.config_name, "redis");
        assert_eq!(d.template_file_name(), "redis.yml");
        assert!(!d.reverse);
        assert_eq!(d.target_type, TargetType::Image);
        assert_eq!(d.match_mode, MatchMode::Contains);
        assert_eq!(d.ip_mode, None);
        assert_eq!(d.port, None);
        assert_eq!(d.id.to_string(), "flexDiscoveryRedis@c1");
    }

    #[test]
    fn explicit_fields_are_honoured() {
        let d = Directive::parse(
            "c1",
            "flexDiscoveryCache",
            "t=cache,c=memcached,r=true,tt=cname,tm=prefix,ip=public,p=11211",
        )
        .unwrap();
        assert_eq!(d.config_name, "memcached");
        assert!(d.reverse);
        assert_eq!(d.target_type, TargetType::ContainerName);
        assert_eq!(d.match_mode, MatchMode::Prefix);
        assert_eq!(d.ip_mode, Some(IpMode::Public));
        assert_eq!(d.port.as_deref(), Some("11211"));
    }

    #[test]
    fn unknown_tokens() {
        assert!(Directive::parse("c1", "k", "t=redis,tt=pod").is_none());
        assert!(Directive::parse("c1", "k", "t=redis,tm=fuzzy").is_none());
        let d = Directive::parse("c1", "k", "t=redis,ip=bridge").unwrap();
        assert_eq!(d.ip_mode, None);
    }

    #[test]
    fn match_modes() {
        assert!(MatchMode::Contains.matches("redis:6.2", "redis"));
        assert!(!MatchMode::Contains.matches("postgres:14", "redis"));
        assert!(MatchMode::Equal.matches("redis", "redis"));
        assert!(!MatchMode::Equal.matches("redis:6.2", "redis"));
        assert!(MatchMode::Prefix.matches("cache-1", "cache"));
        assert!(MatchMode::Suffix.matches("my-cache", "cache"));
        assert!(MatchMode::Regex.matches("cache-12", r"^cache-\d+$"));
        assert!(!MatchMode::Regex.matches("cache-12", "("));
    }
}
