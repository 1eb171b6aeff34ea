//! Core domain types shared by every subsystem: views, commands, record
//! types, domains and records as they travel over the bus and into the
//! database layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The wildcard domain name accepted in permission patterns.
pub const DOMAIN_NAME_ANY: &str = "*";

/// A logical separation between authoritative zone datasets, realized as
/// distinct databases behind the same zone names. `Any` is the wildcard
/// used both in permission patterns and in requests that address every
/// configured view at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum View {
    #[serde(rename = "public")]
    Public,
    #[serde(rename = "private")]
    Private,
    #[serde(rename = "*")]
    Any,
}

impl View {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            View::Public => "public",
            View::Private => "private",
            View::Any => "*",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for View {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(View::Public),
            "private" => Ok(View::Private),
            "*" => Ok(View::Any),
            _ => Err(()),
        }
    }
}

/// The closed set of operations a caller may request. Envelopes carrying
/// anything else fail to decode; `Any` is only meaningful inside
/// permission specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "create_domain")]
    CreateDomain,
    #[serde(rename = "create_record")]
    CreateRecord,
    #[serde(rename = "delete_record")]
    DeleteRecord,
    #[serde(rename = "replace_record")]
    ReplaceRecord,
    #[serde(rename = "list_records")]
    ListRecords,
    #[serde(rename = "list_own")]
    ListOwn,
    #[serde(rename = "list_domains")]
    ListDomains,
    #[serde(rename = "search_record")]
    SearchRecord,
    #[serde(rename = "replace_owner")]
    ReplaceOwner,
    #[serde(rename = "*")]
    Any,
}

impl Command {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Command::CreateDomain => "create_domain",
            Command::CreateRecord => "create_record",
            Command::DeleteRecord => "delete_record",
            Command::ReplaceRecord => "replace_record",
            Command::ListRecords => "list_records",
            Command::ListOwn => "list_own",
            Command::ListDomains => "list_domains",
            Command::SearchRecord => "search_record",
            Command::ReplaceOwner => "replace_owner",
            Command::Any => "*",
        }
    }

    /// Read commands fan out per view and merge result sets; everything
    /// else mutates and replies with a row count.
    #[must_use]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Command::ListRecords | Command::ListOwn | Command::ListDomains | Command::SearchRecord
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_domain" => Ok(Command::CreateDomain),
            "create_record" => Ok(Command::CreateRecord),
            "delete_record" => Ok(Command::DeleteRecord),
            "replace_record" => Ok(Command::ReplaceRecord),
            "list_records" => Ok(Command::ListRecords),
            "list_own" => Ok(Command::ListOwn),
            "list_domains" => Ok(Command::ListDomains),
            "search_record" => Ok(Command::SearchRecord),
            "replace_owner" => Ok(Command::ReplaceOwner),
            "*" => Ok(Command::Any),
            _ => Err(()),
        }
    }
}

/// Record types managed by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    TXT,
    SRV,
    MX,
    NS,
    PTR,
    SOA,
}

impl RecordType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::TXT => "TXT",
            RecordType::SRV => "SRV",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::PTR => "PTR",
            RecordType::SOA => "SOA",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = ();

    /// Case-insensitive: the records table is not consistent about casing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "TXT" => Ok(RecordType::TXT),
            "SRV" => Ok(RecordType::SRV),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "PTR" => Ok(RecordType::PTR),
            "SOA" => Ok(RecordType::SOA),
            _ => Err(()),
        }
    }
}

/// A zone addressed by name within one view. Doubles as the pattern type
/// in permissions, where `name` may be `*` or carry a leading-label
/// wildcard and `view` may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "v")]
    pub view: View,
}

impl Domain {
    /// Pattern match with `self` as the pattern. The view matches on
    /// equality or a `*` pattern view; the name matches on equality, the
    /// `*` sentinel, or a suffix wildcard at position 0 only
    /// (`*1.test.com` matches `31.test.com` but nothing matches
    /// `test.*.com`).
    #[must_use]
    pub fn matches(&self, other: &Domain) -> bool {
        let view_ok = self.view == other.view || self.view == View::Any;
        let name_ok = self.name == other.name
            || self.name == DOMAIN_NAME_ANY
            || (self.name.starts_with('*') && other.name.ends_with(&self.name[1..]));
        view_ok && name_ok
    }

    /// Compose the fully qualified record name for a leaf label. The
    /// empty label, `.` and `@` all address the zone apex.
    #[must_use]
    pub fn record_fqn(&self, leaf: &str) -> String {
        if leaf.is_empty() || leaf == "." || leaf == "@" {
            self.name.clone()
        } else {
            format!("{leaf}.{}", self.name)
        }
    }
}

/// A record as submitted by a caller or returned by a listing. `name` is
/// the leaf label relative to its zone on the way in, and the stripped
/// name on the way out of `list_records`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "n", default)]
    pub name: String,
    #[serde(rename = "t")]
    pub rtype: RecordType,
    #[serde(rename = "d", default)]
    pub data: Vec<String>,
    #[serde(rename = "l", default)]
    pub ttl: i32,
}

/// Long-field-name rendering of a [`Record`], selected by the envelope's
/// pretty flag.
#[derive(Debug, Clone, Serialize)]
pub struct RecordPretty {
    pub name: String,
    #[serde(rename = "type")]
    pub rtype: RecordType,
    pub data: Vec<String>,
    pub ttl: i32,
}

impl From<Record> for RecordPretty {
    fn from(r: Record) -> Self {
        RecordPretty {
            name: r.name,
            rtype: r.rtype,
            data: r.data,
            ttl: r.ttl,
        }
    }
}

/// Long-field-name rendering of a [`Domain`]. The view serializes under
/// the key `type`, which is what callers of the pretty shape expect.
#[derive(Debug, Clone, Serialize)]
pub struct DomainPretty {
    pub name: String,
    #[serde(rename = "type")]
    pub view: View,
}

impl From<Domain> for DomainPretty {
    fn from(d: Domain) -> Self {
        DomainPretty {
            name: d.name,
            view: d.view,
        }
    }
}

/// Authentication header of a request. `priority` is never on the wire;
/// it is filled in by the authorizer on a successful check and carried
/// for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthHeader {
    #[serde(rename = "t")]
    pub token: String,
    #[serde(rename = "x")]
    pub sum: String,
    #[serde(skip)]
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(name: &str, view: View) -> Domain {
        Domain {
            name: name.to_string(),
            view,
        }
    }

    #[test]
    fn match_requires_both_view_and_name() {
        let pattern = domain("test.com", View::Public);
        assert!(pattern.matches(&domain("test.com", View::Public)));
        assert!(!pattern.matches(&domain("test.com", View::Private)));
        assert!(!pattern.matches(&domain("other.com", View::Public)));
    }

    #[test]
    fn wildcard_view_matches_everything() {
        let pattern = domain("test.com", View::Any);
        assert!(pattern.matches(&domain("test.com", View::Public)));
        assert!(pattern.matches(&domain("test.com", View::Private)));
        // A request view of `*` does not make a concrete pattern view match.
        let concrete = domain("test.com", View::Public);
        assert!(!concrete.matches(&domain("test.com", View::Any)));
    }

    #[test]
    fn name_wildcard_only_at_position_zero() {
        let pattern = domain("*1.test.com", View::Any);
        assert!(pattern.matches(&domain("31.test.com", View::Public)));
        assert!(pattern.matches(&domain("1.test.com", View::Public)));
        assert!(!pattern.matches(&domain("test.com", View::Public)));
        assert!(!pattern.matches(&domain("31.test.org", View::Public)));

        let infix = domain("test.*.com", View::Any);
        assert!(!infix.matches(&domain("test.31.com", View::Public)));
    }

    #[test]
    fn any_name_matches_all() {
        let pattern = domain(DOMAIN_NAME_ANY, View::Any);
        assert!(pattern.matches(&domain("anything.example", View::Private)));
    }

    #[test]
    fn record_fqn_apex_aliases() {
        let zone = domain("example.com", View::Public);
        assert_eq!(zone.record_fqn(""), "example.com");
        assert_eq!(zone.record_fqn("."), "example.com");
        assert_eq!(zone.record_fqn("@"), "example.com");
        assert_eq!(zone.record_fqn("www"), "www.example.com");
    }

    #[test]
    fn wire_names_are_short() {
        let record = Record {
            name: "www".to_string(),
            rtype: RecordType::A,
            data: vec!["192.0.2.1".to_string()],
            ttl: 300,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"n": "www", "t": "A", "d": ["192.0.2.1"], "l": 300})
        );
    }

    #[test]
    fn pretty_domain_view_serializes_as_type() {
        let pretty = DomainPretty::from(domain("example.com", View::Private));
        let value = serde_json::to_value(&pretty).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"name": "example.com", "type": "private"})
        );
    }

    #[test]
    fn record_type_parses_case_insensitively() {
        assert_eq!("cname".parse::<RecordType>(), Ok(RecordType::CNAME));
        assert_eq!("Mx".parse::<RecordType>(), Ok(RecordType::MX));
        assert!("NAPTR".parse::<RecordType>().is_err());
    }
}
