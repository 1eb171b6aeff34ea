//! One database view worth of transactional operations.

use crate::config::PsqlConfig;
use crate::error::Error;
use crate::model::{Domain, Record, RecordType, View};
use crate::serial::generate_new_serial;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;

/// A raw row off the records tables, before grouping.
struct RecordRow {
    name: String,
    rtype: RecordType,
    content: String,
    ttl: i32,
    prio: i32,
}

pub struct StorageAdapter {
    view: View,
    host: String,
    pool: PgPool,
}

impl StorageAdapter {
    /// Connect eagerly; a database that cannot be reached at startup is a
    /// fatal configuration problem.
    pub async fn connect(config: &PsqlConfig) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_with(config.connect_options())
            .await?;
        tracing::info!(host = %config.host, view = %config.view, "found database");
        Ok(StorageAdapter {
            view: config.view,
            host: config.host.clone(),
            pool,
        })
    }

    #[must_use]
    pub fn view(&self) -> View {
        self.view
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, Error> {
        Ok(self.pool.begin().await?)
    }

    /// Idempotent: an existing domain is left alone and reported as zero
    /// rows.
    pub async fn create_domain(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        name: &str,
    ) -> Result<u64, Error> {
        let existing = sqlx::query("SELECT id FROM domains WHERE name=$1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        if existing.is_some() {
            return Ok(0);
        }
        let done = sqlx::query("INSERT INTO domains(name,type) VALUES($1,'NATIVE')")
            .bind(name)
            .execute(&mut **tx)
            .await?;
        Ok(done.rows_affected())
    }

    pub async fn create_record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        zone: &Domain,
        record: &Record,
        owner: &str,
    ) -> Result<u64, Error> {
        let domain_id = self.domain_id(tx, &zone.name).await?;
        let record_name = zone.record_fqn(&record.name);
        if record.data.is_empty() {
            return Err(Error::Sql("create_record: data is empty".to_string()));
        }
        self.check_name_conflicts(tx, domain_id, &record_name, record.rtype)
            .await?;
        let mut rows = 0;
        for value in &record.data {
            let (prio, content) = split_priority(record.rtype, value);
            tracing::info!(
                host = %self.host,
                name = %record_name,
                rtype = %record.rtype,
                content = %content,
                owner,
                "creating record"
            );
            let done = sqlx::query(
                "INSERT INTO records_api(domain_id,name,type,content,ttl,prio,disabled,auth,owner) \
                 VALUES($1,$2,$3,$4,$5,$6,false,true,$7)",
            )
            .bind(domain_id)
            .bind(&record_name)
            .bind(record.rtype.as_str())
            .bind(&content)
            .bind(record.ttl)
            .bind(prio)
            .bind(owner)
            .execute(&mut **tx)
            .await?;
            rows += done.rows_affected();
        }
        Ok(rows)
    }

    /// Delete caller-owned rows at (type, name). With values, only rows
    /// whose content (and priority, when one was supplied) match are
    /// removed; without values, every row at the key goes. Any row at the
    /// key owned by someone else fails the whole operation.
    pub async fn delete_record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        zone: &Domain,
        record: &Record,
        owner: &str,
    ) -> Result<u64, Error> {
        let domain_id = self.domain_id(tx, &zone.name).await?;
        let record_name = zone.record_fqn(&record.name);
        let rows = sqlx::query(
            "SELECT id,content,prio,owner FROM records_api \
             WHERE domain_id=$1 AND type=$2 AND name=$3",
        )
        .bind(domain_id)
        .bind(record.rtype.as_str())
        .bind(&record_name)
        .fetch_all(&mut **tx)
        .await?;

        let mut delete_ids: Vec<i64> = Vec::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            let content: String = row.try_get("content")?;
            let row_prio: i32 = row.try_get::<Option<i32>, _>("prio")?.unwrap_or(0);
            let row_owner: String = row.try_get::<Option<String>, _>("owner")?.unwrap_or_default();
            if row_owner != owner {
                return Err(Error::Sql(format!(
                    "you're not an owner of record {record_name} [{id}/{content}/{row_owner}]"
                )));
            }
            if record.data.is_empty() {
                delete_ids.push(id);
                continue;
            }
            for value in &record.data {
                let (prio, wanted) = split_priority(record.rtype, value);
                if content != wanted {
                    continue;
                }
                if prio > 0 && prio != row_prio {
                    continue;
                }
                delete_ids.push(id);
            }
        }
        if !delete_ids.is_empty() {
            sqlx::query("DELETE FROM records_api WHERE id = ANY($1)")
                .bind(&delete_ids)
                .execute(&mut **tx)
                .await?;
        }
        tracing::debug!(
            host = %self.host,
            name = %record_name,
            rtype = %record.rtype,
            rows = delete_ids.len(),
            owner,
            "deleted records"
        );
        Ok(delete_ids.len() as u64)
    }

    /// Delete-then-create of the full target set. Refuses to create a
    /// record that was not there before.
    pub async fn replace_record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        zone: &Domain,
        record: &Record,
        owner: &str,
    ) -> Result<u64, Error> {
        if record.data.is_empty() {
            return Err(Error::Sql("replace_record: data is empty".to_string()));
        }
        let mut cleared = record.clone();
        cleared.data = Vec::new();
        let deleted = self.delete_record(tx, zone, &cleared, owner).await?;
        if deleted == 0 {
            return Err(Error::Sql(
                "you're trying to replace a record that doesn't exists, use create instead"
                    .to_string(),
            ));
        }
        self.create_record(tx, zone, record, owner).await
    }

    /// Hand every caller-owned row at (type, name) over to `new_token`.
    /// The caller of this method has already checked that the new token
    /// exists in the auth store.
    pub async fn replace_owner(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        zone: &Domain,
        record: &Record,
        owner: &str,
        new_token: &str,
    ) -> Result<u64, Error> {
        let domain_id = self.domain_id(tx, &zone.name).await?;
        let record_name = zone.record_fqn(&record.name);
        let done = sqlx::query(
            "UPDATE records_api SET owner=$1 \
             WHERE domain_id=$2 AND type=$3 AND name=$4 AND owner=$5",
        )
        .bind(new_token)
        .bind(domain_id)
        .bind(record.rtype.as_str())
        .bind(&record_name)
        .bind(owner)
        .execute(&mut **tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::Sql("replace_owner: record not found".to_string()));
        }
        Ok(done.rows_affected())
    }

    pub async fn list_domains(
        &self,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<Vec<Domain>, Error> {
        let rows = sqlx::query("SELECT name FROM domains")
            .fetch_all(&mut **tx)
            .await?;
        let mut domains = Vec::with_capacity(rows.len());
        for row in rows {
            domains.push(Domain {
                name: row.try_get("name")?,
                view: self.view,
            });
        }
        Ok(domains)
    }

    /// Records of one zone, optionally kept to names starting with any of
    /// the filter leaves, grouped and with the zone suffix stripped.
    pub async fn list_records(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        zone: &Domain,
        filters: &[Record],
    ) -> Result<Vec<Record>, Error> {
        let domain_id = self.domain_id(tx, &zone.name).await?;
        let rows = sqlx::query("SELECT name,type,content,ttl,prio FROM records WHERE domain_id=$1")
            .bind(domain_id)
            .fetch_all(&mut **tx)
            .await?;
        let mut raw = Vec::new();
        for row in rows {
            let Some(record_row) = decode_record_row(&row)? else {
                continue;
            };
            if !filters.is_empty()
                && !filters.iter().any(|f| record_row.name.starts_with(&f.name))
            {
                continue;
            }
            raw.push(record_row);
        }
        Ok(group_rows(raw, Some(&zone.name)))
    }

    /// Every record owned by the calling token, across all zones of this
    /// database. Names stay fully qualified since there is no zone
    /// context to strip.
    pub async fn list_own(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        token: &str,
    ) -> Result<Vec<Record>, Error> {
        let rows = sqlx::query("SELECT name,type,content,ttl,prio FROM records_api WHERE owner=$1")
            .bind(token)
            .fetch_all(&mut **tx)
            .await?;
        let mut raw = Vec::new();
        for row in rows {
            if let Some(record_row) = decode_record_row(&row)? {
                raw.push(record_row);
            }
        }
        Ok(group_rows(raw, None))
    }

    /// Exact-name match across the whole records table, with no zone
    /// scoping.
    pub async fn search_record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        name: &str,
    ) -> Result<Vec<Record>, Error> {
        let rows = sqlx::query("SELECT name,type,content,ttl,prio FROM records WHERE name=$1")
            .bind(name)
            .fetch_all(&mut **tx)
            .await?;
        let mut raw = Vec::new();
        for row in rows {
            if let Some(record_row) = decode_record_row(&row)? {
                raw.push(record_row);
            }
        }
        Ok(group_rows(raw, None))
    }

    /// Bump the zone serial inside the caller's transaction. A zone
    /// without an SOA row fails the surrounding write.
    pub async fn bump_soa(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        zone_name: &str,
    ) -> Result<(), Error> {
        let domain_id = self.domain_id(tx, zone_name).await?;
        let row = sqlx::query("SELECT id,content FROM records WHERE type='SOA' AND domain_id=$1")
            .bind(domain_id)
            .fetch_optional(&mut **tx)
            .await?;
        let Some(row) = row else {
            return Err(Error::Sql(
                "SOA record not found - create SOA record first".to_string(),
            ));
        };
        let soa_id: i64 = row.try_get("id")?;
        let content: String = row.try_get("content")?;
        let mut fields: Vec<String> = content.split_whitespace().map(String::from).collect();
        if fields.len() != 7 {
            return Err(Error::Sql(format!("malformed SOA content for zone {zone_name}")));
        }
        fields[2] = generate_new_serial(&fields[2]);
        sqlx::query("UPDATE records SET content=$1 WHERE id=$2")
            .bind(fields.join(" "))
            .bind(soa_id)
            .execute(&mut **tx)
            .await?;
        tracing::info!(zone = zone_name, serial = %fields[2], "updated zone serial");
        Ok(())
    }

    async fn domain_id(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        name: &str,
    ) -> Result<i32, Error> {
        let row = sqlx::query("SELECT id FROM domains WHERE name=$1")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        match row {
            Some(row) => Ok(row.try_get("id")?),
            None => Err(Error::Sql(format!("domain {name} not found"))),
        }
    }

    /// The uniqueness rules live at the name level: a CNAME tolerates no
    /// neighbours in either direction, and PTR/SOA exist at most once per
    /// name.
    async fn check_name_conflicts(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        domain_id: i32,
        record_name: &str,
        rtype: RecordType,
    ) -> Result<(), Error> {
        let rows = sqlx::query("SELECT name,type FROM records WHERE domain_id=$1 AND name=$2")
            .bind(domain_id)
            .bind(record_name)
            .fetch_all(&mut **tx)
            .await?;
        for row in rows {
            let existing_type: String = row.try_get("type")?;
            let existing_type = existing_type.to_ascii_uppercase();
            if existing_type == "CNAME" {
                return Err(Error::Sql("(sql) multiple CNAME declaration".to_string()));
            }
            if rtype == RecordType::CNAME {
                return Err(Error::Sql("(json) multiple CNAME declaration".to_string()));
            }
            if existing_type == rtype.as_str() && rtype == RecordType::PTR {
                return Err(Error::Sql("(sql) multiple PTR declaration".to_string()));
            }
            if existing_type == rtype.as_str() && rtype == RecordType::SOA {
                return Err(Error::Sql("(sql) multiple SOA declaration".to_string()));
            }
        }
        Ok(())
    }
}

fn decode_record_row(row: &sqlx::postgres::PgRow) -> Result<Option<RecordRow>, Error> {
    let type_name: String = row.try_get("type")?;
    // Types outside the managed set (DNSKEY, NSEC, …) may live in the
    // table but are invisible to this API.
    let Ok(rtype) = RecordType::from_str(&type_name) else {
        tracing::debug!(rtype = %type_name, "skipping unmanaged record type");
        return Ok(None);
    };
    Ok(Some(RecordRow {
        name: row.try_get("name")?,
        rtype,
        content: row.try_get("content")?,
        ttl: row.try_get::<Option<i32>, _>("ttl")?.unwrap_or(0),
        prio: row.try_get::<Option<i32>, _>("prio")?.unwrap_or(0),
    }))
}

/// Split the wire representation of an MX/SRV value into its priority
/// column and stored content. Other types store the value verbatim.
fn split_priority(rtype: RecordType, value: &str) -> (i32, String) {
    match rtype {
        RecordType::MX | RecordType::SRV => {
            let mut parts = value.split(' ');
            let prio = parts
                .next()
                .and_then(|p| p.parse().ok())
                .unwrap_or(0);
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                (0, value.to_string())
            } else {
                (prio, rest.join(" "))
            }
        }
        _ => (0, value.to_string()),
    }
}

/// Regroup raw rows into records: one entry per (name, type, ttl) with
/// the contents aggregated, MX/SRV priorities rejoined into the data
/// strings, and the zone suffix stripped when a zone is given.
fn group_rows(rows: Vec<RecordRow>, strip_zone: Option<&str>) -> Vec<Record> {
    let mut order: Vec<(String, RecordType, i32)> = Vec::new();
    let mut grouped: HashMap<(String, RecordType, i32), Vec<String>> = HashMap::new();
    for row in rows {
        let content = match row.rtype {
            RecordType::MX | RecordType::SRV => format!("{} {}", row.prio, row.content),
            _ => row.content,
        };
        let key = (row.name, row.rtype, row.ttl);
        match grouped.get_mut(&key) {
            Some(data) => data.push(content),
            None => {
                grouped.insert(key.clone(), vec![content]);
                order.push(key);
            }
        }
    }
    order
        .into_iter()
        .map(|key| {
            let data = grouped.remove(&key).unwrap_or_default();
            let (name, rtype, ttl) = key;
            let name = match strip_zone {
                Some(zone) => strip_zone_suffix(&name, zone),
                None => name,
            };
            Record {
                name,
                rtype,
                data,
                ttl,
            }
        })
        .collect()
}

fn strip_zone_suffix(name: &str, zone: &str) -> String {
    let mut out = name.strip_suffix(zone).unwrap_or(name);
    while let Some(trimmed) = out.strip_suffix('.') {
        out = trimmed;
    }
    out.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_split() {
        assert_eq!(
            split_priority(RecordType::MX, "10 mail.example.com"),
            (10, "mail.example.com".to_string())
        );
        assert_eq!(
            split_priority(RecordType::SRV, "10 60 5060 sip.example.com"),
            (10, "60 5060 sip.example.com".to_string())
        );
        assert_eq!(
            split_priority(RecordType::A, "192.0.2.1"),
            (0, "192.0.2.1".to_string())
        );
        // A bare value stays intact rather than losing its only token.
        assert_eq!(split_priority(RecordType::MX, "mail"), (0, "mail".to_string()));
    }

    #[test]
    fn zone_suffix_stripping() {
        assert_eq!(strip_zone_suffix("www.test.com", "test.com"), "www");
        assert_eq!(strip_zone_suffix("test.com", "test.com"), "");
        assert_eq!(strip_zone_suffix("a.b.test.com", "test.com"), "a.b");
        assert_eq!(strip_zone_suffix("www.other.org", "test.com"), "www.other.org");
    }

    fn row(name: &str, rtype: RecordType, content: &str, ttl: i32, prio: i32) -> RecordRow {
        RecordRow {
            name: name.to_string(),
            rtype,
            content: content.to_string(),
            ttl,
            prio,
        }
    }

    #[test]
    fn grouping_aggregates_by_name_type_ttl() {
        let rows = vec![
            row("www.test.com", RecordType::A, "192.0.2.1", 600, 0),
            row("www.test.com", RecordType::A, "192.0.2.2", 600, 0),
            row("www.test.com", RecordType::A, "192.0.2.3", 300, 0),
            row("test.com", RecordType::MX, "mail.test.com", 600, 10),
        ];
        let grouped = group_rows(rows, Some("test.com"));
        assert_eq!(grouped.len(), 3);

        let short = grouped
            .iter()
            .find(|r| r.name == "www" && r.ttl == 600)
            .unwrap();
        assert_eq!(short.data, vec!["192.0.2.1", "192.0.2.2"]);

        let apex_mx = grouped.iter().find(|r| r.rtype == RecordType::MX).unwrap();
        assert_eq!(apex_mx.name, "");
        assert_eq!(apex_mx.data, vec!["10 mail.test.com"]);
    }

    #[test]
    fn create_then_list_round_trips_the_leaf() {
        // What goes in as leaf `www` must come out of a listing as `www`.
        let zone = Domain {
            name: "test.com".to_string(),
            view: View::Public,
        };
        let stored_name = zone.record_fqn("www");
        let rows = vec![row(&stored_name, RecordType::A, "192.0.2.1", 600, 0)];
        let grouped = group_rows(rows, Some(&zone.name));
        assert_eq!(grouped[0].name, "www");
    }
}
