//! Fan-out of one request across every storage adapter matching its view.
//!
//! Writes follow a best-effort two-phase pattern: begin a transaction on
//! every matching adapter, run the command on each, and only commit when
//! all of them succeeded. A crash between commits can still leave views
//! diverged; there is deliberately no coordinator.

use crate::bus::{Entity, Envelope};
use crate::config::PsqlConfig;
use crate::error::Error;
use crate::model::{Command, View};
use crate::store::StorageAdapter;
use std::collections::HashMap;

pub struct Executor {
    adapters: Vec<StorageAdapter>,
}

impl Executor {
    pub async fn connect(configs: &[PsqlConfig]) -> Result<Self, Error> {
        let mut adapters = Vec::with_capacity(configs.len());
        for config in configs {
            adapters.push(StorageAdapter::connect(config).await?);
        }
        Ok(Executor { adapters })
    }

    fn matching(&self, view: View) -> Vec<&StorageAdapter> {
        self.adapters
            .iter()
            .filter(|adapter| view_matches(adapter.view(), view))
            .collect()
    }

    /// Run a read command on every matching adapter inside one
    /// transaction each, merging results per view.
    pub async fn execute_read(
        &self,
        envelope: &Envelope,
    ) -> Result<HashMap<View, Vec<Entity>>, Error> {
        let domain = envelope
            .domain
            .as_ref()
            .ok_or_else(|| Error::Security("invalid (null) request".to_string()))?;
        let token = envelope.auth.as_ref().map(|a| a.token.as_str()).unwrap_or("");
        let adapters = self.matching(domain.view);
        let mut transactions = Vec::with_capacity(adapters.len());
        for adapter in &adapters {
            transactions.push(adapter.begin().await?);
        }

        let mut merged: HashMap<View, Vec<Entity>> = HashMap::new();
        for (adapter, tx) in adapters.iter().zip(transactions.iter_mut()) {
            let entities: Vec<Entity> = match envelope.command {
                Command::ListDomains => adapter
                    .list_domains(tx)
                    .await?
                    .into_iter()
                    .map(|d| Entity::domain(d, envelope.pretty))
                    .collect(),
                Command::ListRecords => adapter
                    .list_records(tx, domain, &envelope.records)
                    .await?
                    .into_iter()
                    .map(|r| Entity::record(r, envelope.pretty))
                    .collect(),
                Command::ListOwn => adapter
                    .list_own(tx, token)
                    .await?
                    .into_iter()
                    .map(|r| Entity::record(r, envelope.pretty))
                    .collect(),
                Command::SearchRecord => {
                    let name = envelope
                        .records
                        .first()
                        .map(|r| r.name.as_str())
                        .unwrap_or("");
                    adapter
                        .search_record(tx, name)
                        .await?
                        .into_iter()
                        .map(|r| Entity::record(r, envelope.pretty))
                        .collect()
                }
                _ => return Err(Error::NotImplemented),
            };
            merged.entry(adapter.view()).or_default().extend(entities);
        }

        for tx in transactions {
            tx.commit().await?;
        }
        Ok(merged)
    }

    /// Run a write command across every matching adapter and sum row
    /// counts. Any failure drops all open transactions, rolling every
    /// database back.
    pub async fn execute_write(&self, envelope: &Envelope) -> Result<u64, Error> {
        let domain = envelope
            .domain
            .as_ref()
            .ok_or_else(|| Error::Security("invalid (null) request".to_string()))?;
        let owner = envelope.auth.as_ref().map(|a| a.token.as_str()).unwrap_or("");
        let adapters = self.matching(domain.view);
        let mut transactions = Vec::with_capacity(adapters.len());
        for adapter in &adapters {
            transactions.push(adapter.begin().await?);
        }

        let mut total = 0u64;
        for (adapter, tx) in adapters.iter().zip(transactions.iter_mut()) {
            let rows = match envelope.command {
                Command::CreateDomain => adapter.create_domain(tx, &domain.name).await?,
                Command::CreateRecord => {
                    let mut rows = 0;
                    for record in &envelope.records {
                        rows += adapter.create_record(tx, domain, record, owner).await?;
                    }
                    if rows > 0 {
                        adapter.bump_soa(tx, &domain.name).await?;
                    }
                    rows
                }
                Command::DeleteRecord => {
                    let mut rows = 0;
                    for record in &envelope.records {
                        rows += adapter.delete_record(tx, domain, record, owner).await?;
                    }
                    if rows > 0 {
                        adapter.bump_soa(tx, &domain.name).await?;
                    }
                    rows
                }
                Command::ReplaceRecord => {
                    let mut rows = 0;
                    for record in &envelope.records {
                        rows += adapter.replace_record(tx, domain, record, owner).await?;
                    }
                    if rows > 0 {
                        adapter.bump_soa(tx, &domain.name).await?;
                    }
                    rows
                }
                Command::ReplaceOwner => {
                    let mut rows = 0;
                    for record in &envelope.records {
                        rows += adapter
                            .replace_owner(tx, domain, record, owner, &envelope.new_token)
                            .await?;
                    }
                    rows
                }
                _ => return Err(Error::NotImplemented),
            };
            total += rows;
        }

        for tx in transactions {
            tx.commit().await?;
        }
        Ok(total)
    }
}

/// An adapter participates when its view equals the requested one, or
/// when the request addresses every view at once.
fn view_matches(adapter_view: View, requested: View) -> bool {
    adapter_view == requested || requested == View::Any
}
