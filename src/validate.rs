//! Per-type DNS record validation.
//!
//! Runs after authorization and before execution. Checks are deliberately
//! conservative: a record that fails here never reaches a transaction.
//! NS and SOA checks resolve host names and therefore suspend.

use crate::error::Error;
use crate::model::{Domain, Record, RecordType};
use crate::serial::minimum_serial;
use lazy_static::lazy_static;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

lazy_static! {
    // Hostname grammar: underscore-friendly labels of up to 63 octets,
    // optionally ending in a bare dot.
    static ref DNS_NAME: Regex =
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]{0,62}(\.[A-Za-z0-9_][A-Za-z0-9_-]{0,62})*[._]?$")
            .unwrap();
}

/// Validate every record of a request against the rules for its type,
/// coercing a zero TTL to the 600 second default in place.
pub async fn check_request(domain: &Domain, records: &mut [Record]) -> Result<(), Error> {
    for record in records.iter_mut() {
        if record.ttl < 0 {
            return Err(Error::Rfc1034("ttl can't be lesser than 0".to_string()));
        }
        if record.ttl == 0 {
            record.ttl = 600;
        }
        let mut fqn = domain.record_fqn(&record.name);
        if let Some(rest) = fqn.strip_prefix("*.") {
            // A wildcard is one label and only the leftmost one.
            if rest.contains('*') {
                return Err(Error::Rfc1034("insufficient use of wildcard".to_string()));
            }
            fqn = rest.to_string();
        }
        if !is_dns_name(&fqn) {
            return Err(Error::Rfc1034(format!("{fqn}: not a valid DNS name")));
        }
        match record.rtype {
            RecordType::A => check_a(record)?,
            RecordType::AAAA => check_aaaa(record)?,
            RecordType::CNAME => check_cname(record)?,
            RecordType::TXT => check_txt(record)?,
            RecordType::SRV => check_srv(record)?,
            RecordType::MX => check_mx(record)?,
            RecordType::NS => check_ns(record).await?,
            RecordType::PTR => check_ptr(record)?,
            RecordType::SOA => check_soa(record).await?,
        }
    }
    Ok(())
}

/// Hostname syntax check. IP literals are not host names.
pub(crate) fn is_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    if name.parse::<IpAddr>().is_ok() {
        return false;
    }
    DNS_NAME.is_match(name)
}

async fn resolves(host: &str) -> bool {
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(_) => false,
    }
}

fn check_a(record: &Record) -> Result<(), Error> {
    if record.data.is_empty() {
        return Err(Error::Rfc1034(
            "A record must have at least one argument".to_string(),
        ));
    }
    for value in &record.data {
        if value.parse::<Ipv4Addr>().is_err() {
            return Err(Error::Rfc1034(format!("{value}: not an ipv4")));
        }
    }
    Ok(())
}

fn check_aaaa(record: &Record) -> Result<(), Error> {
    if record.data.is_empty() {
        return Err(Error::Rfc1034(
            "AAAA record must have at least one argument".to_string(),
        ));
    }
    for value in &record.data {
        if value.parse::<Ipv6Addr>().is_err() {
            return Err(Error::Rfc1034(format!("{value}: not an ipv6")));
        }
    }
    Ok(())
}

fn check_cname(record: &Record) -> Result<(), Error> {
    if record.data.len() != 1 {
        return Err(Error::Rfc1034("CNAME must have single value".to_string()));
    }
    if record.name.is_empty() {
        return Err(Error::Rfc1034(
            "CNAME can't be root domain record".to_string(),
        ));
    }
    let target = &record.data[0];
    if target.ends_with('.') {
        return Err(Error::Rfc1034(
            "CNAME mustn't end with '.', it's always a full domain name only".to_string(),
        ));
    }
    if !is_dns_name(target) {
        return Err(Error::Rfc1034(format!(
            "{target} is not a valid domain name"
        )));
    }
    Ok(())
}

fn check_txt(record: &Record) -> Result<(), Error> {
    if record.data.is_empty() {
        return Err(Error::Rfc1034(
            "TXT record must have at least one argument".to_string(),
        ));
    }
    for value in &record.data {
        if value.len() > 255 {
            return Err(Error::Rfc1034(
                "TXT records can't be > 255 characters length".to_string(),
            ));
        }
        if !value.is_ascii() {
            return Err(Error::Rfc1034(
                "TXT records can't contain non-ascii characters".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_srv(record: &Record) -> Result<(), Error> {
    if record.data.is_empty() {
        return Err(Error::Rfc1034(
            "SRV record must have at least one argument".to_string(),
        ));
    }
    let labels: Vec<&str> = record.name.split('.').collect();
    if labels.len() < 3 || !labels[0].starts_with('_') || !labels[1].starts_with('_') {
        return Err(Error::Rfc1034(
            "SRV record name must match `_service._proto.name` pattern".to_string(),
        ));
    }
    for value in &record.data {
        let parts: Vec<&str> = value.split(' ').collect();
        if parts.len() != 4 {
            return Err(Error::Rfc1034(
                "SRV record data must match `priority weight port target` pattern".to_string(),
            ));
        }
        if parts[0].parse::<i64>().is_err() {
            return Err(Error::Rfc1034(
                "SRV record data(priority) must be a number".to_string(),
            ));
        }
        if parts[1].parse::<i64>().is_err() {
            return Err(Error::Rfc1034(
                "SRV record data(weight) must be a number".to_string(),
            ));
        }
        match parts[2].parse::<i64>() {
            Ok(port) if (0..=65535).contains(&port) => {}
            Ok(_) => {
                return Err(Error::Rfc1034(
                    "SRV record data(port) must be a number between 0 and 65535".to_string(),
                ));
            }
            Err(_) => {
                return Err(Error::Rfc1034(
                    "SRV record data(port) must be a number".to_string(),
                ));
            }
        }
        if !is_dns_name(parts[3]) {
            return Err(Error::Rfc1034(
                "SRV record data(target) must be a valid domain name".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_mx(record: &Record) -> Result<(), Error> {
    if record.data.is_empty() {
        return Err(Error::Rfc1034(
            "MX record must have at least one argument".to_string(),
        ));
    }
    for value in &record.data {
        let parts: Vec<&str> = value.split(' ').collect();
        if parts.len() != 2 {
            return Err(Error::Rfc1034(
                "MX record data must match `priority target` pattern".to_string(),
            ));
        }
        if parts[0].parse::<i64>().is_err() {
            return Err(Error::Rfc1034(
                "MX record data(priority) must be a number".to_string(),
            ));
        }
        if !is_dns_name(parts[1]) {
            return Err(Error::Rfc1034(
                "MX record data(target) must be a valid domain name".to_string(),
            ));
        }
    }
    Ok(())
}

async fn check_ns(record: &Record) -> Result<(), Error> {
    if record.data.is_empty() {
        return Err(Error::Rfc1034(
            "NS record must have at least one argument".to_string(),
        ));
    }
    for value in &record.data {
        if !is_dns_name(value) {
            return Err(Error::Rfc1034(format!("{value} is not a valid domain name")));
        }
        if !resolves(value).await {
            return Err(Error::Rfc1034(format!("can't lookup {value}")));
        }
    }
    Ok(())
}

fn check_ptr(record: &Record) -> Result<(), Error> {
    if record.data.len() != 1 {
        return Err(Error::Rfc1034(
            "only one PTR is allowed for one ip".to_string(),
        ));
    }
    let target = &record.data[0];
    if !is_dns_name(target) {
        return Err(Error::Rfc1034(format!(
            "{target} is not a valid domain name"
        )));
    }
    Ok(())
}

async fn check_soa(record: &Record) -> Result<(), Error> {
    if !record.name.is_empty() {
        return Err(Error::Rfc1034("SOA record must have empty name".to_string()));
    }
    if record.data.len() != 1 {
        return Err(Error::Rfc1034(
            "SOA records must have single value".to_string(),
        ));
    }
    let fields: Vec<&str> = record.data[0].split_whitespace().collect();
    if fields.len() != 7 {
        return Err(Error::Rfc1034(
            "SOA record must have 7 fields: MNAME RNAME SERIAL REFRESH RETRY EXPIRE TTL"
                .to_string(),
        ));
    }
    if !is_dns_name(fields[0]) {
        return Err(Error::Rfc1034(
            "SOA record MNAME field is not a valid hostname".to_string(),
        ));
    }
    if !resolves(fields[0]).await {
        return Err(Error::Rfc1034(
            "SOA record MNAME field can't be resolved".to_string(),
        ));
    }
    let serial: i64 = fields[2].parse().map_err(|_| {
        Error::Rfc1034("SOA record SERIAL field must be in format: YYYYMMDDXX".to_string())
    })?;
    let min_serial = minimum_serial();
    if serial < min_serial {
        return Err(Error::Rfc1034(format!(
            "SOA record SERIAL field minimum value is: {min_serial}"
        )));
    }
    let refresh = parse_ranged(fields[3], 86400, "REFRESH")?;
    let retry = parse_ranged(fields[4], 86400, "RETRY")?;
    if retry >= refresh {
        return Err(Error::Rfc1034(
            "SOA record RETRY field must be lesser than REFRESH".to_string(),
        ));
    }
    let expire = parse_ranged(fields[5], 172_800, "EXPIRE")?;
    if expire <= refresh + retry {
        return Err(Error::Rfc1034(
            "SOA record EXPIRE field must be greater than (REFRESH+RETRY)".to_string(),
        ));
    }
    parse_ranged(fields[6], 86400, "TTL")?;
    Ok(())
}

fn parse_ranged(value: &str, max: i64, field: &str) -> Result<i64, Error> {
    let parsed: Option<i64> = value.parse().ok().filter(|v| (0..=max).contains(v));
    parsed.ok_or_else(|| {
        Error::Rfc1034(format!(
            "SOA record {field} field must be INT between 0 and {max}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::View;

    fn zone() -> Domain {
        Domain {
            name: "example.com".to_string(),
            view: View::Private,
        }
    }

    fn record(name: &str, rtype: RecordType, data: &[&str]) -> Record {
        Record {
            name: name.to_string(),
            rtype,
            data: data.iter().map(ToString::to_string).collect(),
            ttl: 0,
        }
    }

    async fn check_one(record: Record) -> Result<(), Error> {
        let mut records = vec![record];
        check_request(&zone(), &mut records).await
    }

    #[tokio::test]
    async fn ttl_rules() {
        let mut negative = vec![record("www", RecordType::A, &["192.0.2.1"])];
        negative[0].ttl = -1;
        assert!(check_request(&zone(), &mut negative).await.is_err());

        let mut coerced = vec![record("www", RecordType::A, &["192.0.2.1"])];
        check_request(&zone(), &mut coerced).await.unwrap();
        assert_eq!(coerced[0].ttl, 600);

        let mut kept = vec![record("www", RecordType::A, &["192.0.2.1"])];
        kept[0].ttl = 42;
        check_request(&zone(), &mut kept).await.unwrap();
        assert_eq!(kept[0].ttl, 42);
    }

    #[tokio::test]
    async fn wildcard_only_leftmost() {
        assert!(check_one(record("*.test1", RecordType::A, &["192.0.2.1"]))
            .await
            .is_ok());
        assert!(check_one(record("test1.*", RecordType::A, &["192.0.2.1"]))
            .await
            .is_err());
        assert!(check_one(record("*.te.*", RecordType::A, &["192.0.2.1"]))
            .await
            .is_err());
    }

    #[test]
    fn dns_name_grammar() {
        assert!(is_dns_name("example.com"));
        assert!(is_dns_name("_dmarc.example.com"));
        assert!(is_dns_name("localhost"));
        assert!(is_dns_name("example.com."));
        assert!(!is_dns_name(""));
        assert!(!is_dns_name("192.168.0.1"));
        assert!(!is_dns_name("::1"));
        assert!(!is_dns_name("---aaccaa.com"));
        assert!(!is_dns_name(&"a.".repeat(200)));
    }

    #[tokio::test]
    async fn a_record_values() {
        assert!(check_one(record("www", RecordType::A, &[])).await.is_err());
        assert!(check_one(record("www", RecordType::A, &["192.168.0.1"]))
            .await
            .is_ok());
        assert!(check_one(record("www", RecordType::A, &["192.168.256.1"]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn aaaa_record_values() {
        assert!(check_one(record("www", RecordType::AAAA, &[])).await.is_err());
        assert!(check_one(record("www", RecordType::AAAA, &["::1"])).await.is_ok());
        assert!(
            check_one(record("www", RecordType::AAAA, &["fe80::50a3:ddcb:6e94:3aax"]))
                .await
                .is_err()
        );
        assert!(check_one(record("www", RecordType::AAAA, &["192.168.0.1"]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn cname_rules() {
        assert!(check_one(record("a", RecordType::CNAME, &["test.com"]))
            .await
            .is_ok());
        assert!(check_one(record("a", RecordType::CNAME, &[])).await.is_err());
        assert!(check_one(record("", RecordType::CNAME, &["test.com"]))
            .await
            .is_err());
        assert!(check_one(record("a", RecordType::CNAME, &["test.com."]))
            .await
            .is_err());
        assert!(check_one(record("a", RecordType::CNAME, &["192.168.0.1"]))
            .await
            .is_err());
        assert!(
            check_one(record("a", RecordType::CNAME, &["test.com", "test2.com"]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn txt_rules() {
        assert!(check_one(record("t", RecordType::TXT, &[])).await.is_err());
        assert!(check_one(record("t", RecordType::TXT, &["hello world"]))
            .await
            .is_ok());
        let long = "a".repeat(256);
        assert!(check_one(record("t", RecordType::TXT, &[&long])).await.is_err());
        assert!(check_one(record("t", RecordType::TXT, &["héllo"])).await.is_err());
    }

    #[tokio::test]
    async fn srv_rules() {
        let ok = record("_sip._tcp.pbx", RecordType::SRV, &["10 60 5060 sip.example.com"]);
        assert!(check_one(ok).await.is_ok());
        // The name needs `_service._proto.` plus at least one more label.
        assert!(
            check_one(record("_sip._tcp", RecordType::SRV, &["10 60 5060 sip.example.com"]))
                .await
                .is_err()
        );
        assert!(
            check_one(record("sip._tcp.pbx", RecordType::SRV, &["10 60 5060 sip.example.com"]))
                .await
                .is_err()
        );
        assert!(check_one(record("_sip._tcp.pbx", RecordType::SRV, &["10 60 5060"]))
            .await
            .is_err());
        assert!(
            check_one(record("_sip._tcp.pbx", RecordType::SRV, &["x 60 5060 sip.example.com"]))
                .await
                .is_err()
        );
        assert!(
            check_one(record("_sip._tcp.pbx", RecordType::SRV, &["10 60 70000 sip.example.com"]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn mx_rules() {
        assert!(check_one(record("", RecordType::MX, &["10 mail.example.com"]))
            .await
            .is_ok());
        assert!(check_one(record("", RecordType::MX, &["mail.example.com"]))
            .await
            .is_err());
        assert!(check_one(record("", RecordType::MX, &["x mail.example.com"]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn ptr_rules() {
        assert!(check_one(record("1", RecordType::PTR, &["host.example.com"]))
            .await
            .is_ok());
        assert!(
            check_one(record("1", RecordType::PTR, &["a.example.com", "b.example.com"]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn soa_structure() {
        // MNAME resolution uses the hosts file, so localhost keeps these hermetic.
        let serial = minimum_serial();
        let good = format!("localhost admins.example.com {serial} 900 600 86400 600");
        assert!(check_one(record("", RecordType::SOA, &[&good])).await.is_ok());

        assert!(check_one(record("sub", RecordType::SOA, &[&good])).await.is_err());
        assert!(check_one(record("", RecordType::SOA, &[&good, "second"]))
            .await
            .is_err());
        assert!(check_one(record("", RecordType::SOA, &["a b c d e"])).await.is_err());

        let stale = format!("localhost admins.example.com {} 900 600 86400 600", serial - 100);
        assert!(check_one(record("", RecordType::SOA, &[&stale])).await.is_err());

        let retry = format!("localhost admins.example.com {serial} 600 900 86400 600");
        assert!(check_one(record("", RecordType::SOA, &[&retry])).await.is_err());

        let expire = format!("localhost admins.example.com {serial} 600 300 800 600");
        assert!(check_one(record("", RecordType::SOA, &[&expire])).await.is_err());

        let ttl = format!("localhost admins.example.com {serial} 900 600 86400 6000000");
        assert!(check_one(record("", RecordType::SOA, &[&ttl])).await.is_err());

        let bad_mname = format!("---bad admins.example.com {serial} 900 600 86400 600");
        assert!(check_one(record("", RecordType::SOA, &[&bad_mname])).await.is_err());
    }
}
