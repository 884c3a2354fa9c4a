//! Ordered queue of network transactions.
//!
//! Applications register a [`TxVerifier`] per transaction type. Adds and
//! removals are gossiped, verified asynchronously, and folded into a running
//! tx list ordered by `(cycle, priority, hash)`. Every record carries the
//! hash of the list after its changes; a node whose list hashes differently
//! on digest has diverged.
//!
//! Verification runs in two phases so the engine lock is not held while a
//! verifier awaits: [`Submodule::handle_gossip`] marks the tx in flight and
//! [`ServiceQueue::take_pending`] hands out the work, then
//! [`ServiceQueue::commit_verified`] applies the outcome.

use async_trait::async_trait;
use serde_json::Value;
use shoal_crypto::{hash_obj, CryptoError};
use shoal_messages::schema::{FieldKind, FieldSpec};
use shoal_messages::{routes, GossipPayload, SchemaError};
use shoal_types::{CycleRecord, Hash256, NetworkTx, TxListEntry};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::ConsensusError;
use crate::nodelist::list_hash;
use crate::submodule::{validate_fields, CycleContext, CycleTxs, GossipVerdict, Submodule};

const RECORD_FIELDS: &[FieldSpec] = &[
    FieldSpec::req("txadd", FieldKind::Arr),
    FieldSpec::req("txremove", FieldKind::Arr),
    FieldSpec::req("txlisthash", FieldKind::Hex(32)),
];

const ROUTES: &[&str] = &[routes::GOSSIP_ADDTX, routes::GOSSIP_REMOVETX];

/// Application hook deciding whether a tx may enter or leave the list.
#[async_trait]
pub trait TxVerifier: Send + Sync {
    async fn verify_add(&self, tx: &NetworkTx) -> bool;

    async fn verify_remove(&self, _tx: &NetworkTx) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PendingKind {
    Add(TxListEntry),
    Remove(TxListEntry),
}

/// A tx waiting on its verifier.
#[derive(Clone)]
pub struct PendingTx {
    pub kind: PendingKind,
    verifier: Arc<dyn TxVerifier>,
}

impl PendingTx {
    pub fn hash(&self) -> Hash256 {
        match &self.kind {
            PendingKind::Add(e) | PendingKind::Remove(e) => e.hash,
        }
    }

    /// Run the verifier. Call without holding the engine lock.
    pub async fn verify(&self) -> bool {
        match &self.kind {
            PendingKind::Add(e) => self.verifier.verify_add(&e.tx).await,
            PendingKind::Remove(e) => self.verifier.verify_remove(&e.tx).await,
        }
    }
}

impl fmt::Debug for PendingTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTx").field("kind", &self.kind).finish()
    }
}

/// Content hash of a network tx.
pub fn tx_hash(tx: &NetworkTx) -> Result<Hash256, CryptoError> {
    hash_obj(tx)
}

#[derive(Default)]
pub struct ServiceQueue {
    tx_list: Vec<TxListEntry>,
    verifiers: HashMap<String, Arc<dyn TxVerifier>>,

    // per cycle
    adds: BTreeMap<Hash256, TxListEntry>,
    removes: BTreeSet<Hash256>,
    in_flight: HashMap<Hash256, PendingKind>,

    queued: Vec<GossipPayload>,
}

impl ServiceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_verifier(&mut self, tx_type: impl Into<String>, verifier: Arc<dyn TxVerifier>) {
        self.verifiers.insert(tx_type.into(), verifier);
    }

    pub fn tx_list(&self) -> &[TxListEntry] {
        &self.tx_list
    }

    pub fn tx_list_hash(&self) -> Result<Hash256, CryptoError> {
        list_hash(&self.tx_list)
    }

    /// Replace the list with one fetched during sync.
    pub fn install_tx_list(&mut self, mut list: Vec<TxListEntry>) {
        list.sort_by_key(|e| e.order_key());
        list.dedup_by(|a, b| a.hash == b.hash);
        self.tx_list = list;
    }

    fn listed(&self, hash: &Hash256) -> Option<&TxListEntry> {
        self.tx_list.iter().find(|e| &e.hash == hash)
    }

    /// The verification work for a payload [`Submodule::handle_gossip`]
    /// marked in flight.
    pub fn take_pending(&self, payload: &GossipPayload) -> Option<PendingTx> {
        let hash = match payload {
            GossipPayload::AddTx(req) => tx_hash(&req.body).ok()?,
            GossipPayload::RemoveTx(req) => req.body.tx_hash,
            _ => return None,
        };
        let kind = self.in_flight.get(&hash)?.clone();
        let tx_type = match &kind {
            PendingKind::Add(e) | PendingKind::Remove(e) => &e.tx.tx_type,
        };
        let verifier = Arc::clone(self.verifiers.get(tx_type)?);
        Some(PendingTx { kind, verifier })
    }

    /// Apply a verifier outcome. Returns whether the tx was admitted.
    pub fn commit_verified(&mut self, pending: &PendingTx, ok: bool) -> bool {
        let hash = pending.hash();
        if self.in_flight.remove(&hash).is_none() || !ok {
            return false;
        }
        match &pending.kind {
            PendingKind::Add(entry) => {
                if self.listed(&hash).is_some() || self.adds.contains_key(&hash) {
                    return false;
                }
                self.adds.insert(hash, entry.clone());
                true
            }
            PendingKind::Remove(_) => self.listed(&hash).is_some() && self.removes.insert(hash),
        }
    }

    /// The tx list as it will be once `record` is digested.
    pub fn list_after(&self, record: &CycleRecord) -> Vec<TxListEntry> {
        let removed: HashSet<&Hash256> = record.txremove.iter().collect();
        let mut next: Vec<TxListEntry> = self
            .tx_list
            .iter()
            .filter(|e| !removed.contains(&e.hash))
            .cloned()
            .collect();
        for entry in &record.txadd {
            if !next.iter().any(|e| e.hash == entry.hash) {
                next.push(entry.clone());
            }
        }
        next.sort_by_key(|e| e.order_key());
        next
    }
}

/// Proposals name the cycle in progress or the one before it.
fn in_cycle_window(cycle: u64, counter: u64) -> bool {
    cycle <= counter && cycle.saturating_add(1) >= counter
}

impl Submodule for ServiceQueue {
    fn name(&self) -> &'static str {
        "service-queue"
    }

    fn routes(&self) -> &'static [&'static str] {
        ROUTES
    }

    fn reset(&mut self, _counter: u64) {
        self.adds.clear();
        self.removes.clear();
        self.in_flight.clear();
    }

    fn queue_request(&mut self, payload: GossipPayload) {
        self.queued.push(payload);
    }

    fn send_requests(&mut self) -> Vec<GossipPayload> {
        std::mem::take(&mut self.queued)
    }

    fn handle_gossip(&mut self, payload: &GossipPayload, ctx: &CycleContext<'_>) -> GossipVerdict {
        if ctx.nodes.get_by_pubkey(payload.signer()).is_none() {
            return GossipVerdict::rejected("tx not signed by a known node");
        }
        match payload {
            GossipPayload::AddTx(req) => {
                let tx = &req.body;
                let Ok(hash) = tx_hash(tx) else {
                    return GossipVerdict::rejected("tx does not encode");
                };
                if self.listed(&hash).is_some()
                    || self.adds.contains_key(&hash)
                    || self.in_flight.contains_key(&hash)
                {
                    return GossipVerdict::ignored("tx already known");
                }
                if !self.verifiers.contains_key(&tx.tx_type) {
                    return GossipVerdict::rejected(format!("no verifier for tx type {}", tx.tx_type));
                }
                if !in_cycle_window(tx.cycle, ctx.counter) {
                    return GossipVerdict::rejected("tx for another cycle");
                }
                self.in_flight.insert(
                    hash,
                    PendingKind::Add(TxListEntry {
                        hash,
                        tx: tx.clone(),
                    }),
                );
                GossipVerdict::NeedsVerification
            }
            GossipPayload::RemoveTx(req) => {
                let hash = req.body.tx_hash;
                if self.removes.contains(&hash) || self.in_flight.contains_key(&hash) {
                    return GossipVerdict::ignored("removal already known");
                }
                if !in_cycle_window(req.body.cycle, ctx.counter) {
                    return GossipVerdict::rejected("removal for another cycle");
                }
                let Some(entry) = self.listed(&hash).cloned() else {
                    return GossipVerdict::ignored("tx not in list");
                };
                if !self.verifiers.contains_key(&entry.tx.tx_type) {
                    return GossipVerdict::rejected("no verifier for tx type");
                }
                self.in_flight.insert(hash, PendingKind::Remove(entry));
                GossipVerdict::NeedsVerification
            }
            _ => GossipVerdict::rejected("unexpected route"),
        }
    }

    fn get_txs(&self, txs: &mut CycleTxs) {
        let mut adds: Vec<TxListEntry> = self.adds.values().cloned().collect();
        adds.sort_by_key(|e| e.order_key());
        txs.txadd = adds;
        txs.txremove = self.removes.iter().copied().collect();
    }

    fn update_record(
        &self,
        txs: &CycleTxs,
        record: &mut CycleRecord,
        _prev: Option<&CycleRecord>,
        _ctx: &CycleContext<'_>,
    ) -> Result<(), ConsensusError> {
        record.txadd = txs
            .txadd
            .iter()
            .filter(|e| self.listed(&e.hash).is_none())
            .cloned()
            .collect();
        record.txremove = txs
            .txremove
            .iter()
            .filter(|h| self.listed(h).is_some())
            .copied()
            .collect();
        record.txlisthash = list_hash(&self.list_after(record))?;
        Ok(())
    }

    fn validate_record_types(&self, record: &Value) -> Result<(), SchemaError> {
        validate_fields(record, RECORD_FIELDS)
    }

    fn digest(&mut self, record: &CycleRecord, _ctx: &CycleContext<'_>) -> Result<(), ConsensusError> {
        let next = self.list_after(record);
        if list_hash(&next)? != record.txlisthash {
            tracing::error!(counter = record.counter, "tx list hash mismatch");
            return Err(ConsensusError::TxListHashMismatch(record.counter));
        }
        self.tx_list = next;
        Ok(())
    }
}
