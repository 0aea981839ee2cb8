//! Entity replica state.
//!
//! Everything in [`EntityState`] either changes through committed entity
//! frames or advances in lockstep across replicas (the account machines,
//! which every replica ticks identically). Its canonical hash is what
//! validators compare against a proposer's claimed post state.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use xln_account::AccountMachine;
use xln_codec::{keccak256, CanonicalEncode, Encoder};
use xln_core::constants::{FAILED_TX_RING, MAX_MESSAGES};
use xln_core::tx::{AccountTx, EntityTx, ProposalAction, VoteChoice};
use xln_core::types::{Amount, EntityId, Nonce, SignerId, StateHash, Timestamp, TokenId};

// ── Consensus configuration ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusMode {
    /// One rotating proposer per height; weighted precommits to threshold.
    ProposerBased,
}

/// The entity's validator set and commit rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsensusConfig {
    /// Rotation order; `validators[height % len]` proposes that height.
    pub validators: Vec<SignerId>,
    pub weights: BTreeMap<SignerId, u64>,
    /// Minimum precommit weight required to commit a frame.
    pub threshold: u64,
    pub mode: ConsensusMode,
}

impl ConsensusConfig {
    /// Single-signer configuration: the signer commits alone.
    pub fn solo(signer: SignerId) -> Self {
        let mut weights = BTreeMap::new();
        weights.insert(signer.clone(), 1);
        Self {
            validators: vec![signer],
            weights,
            threshold: 1,
            mode: ConsensusMode::ProposerBased,
        }
    }

    pub fn proposer_for(&self, height: u64) -> &SignerId {
        &self.validators[(height as usize) % self.validators.len()]
    }

    pub fn weight_of(&self, signer: &SignerId) -> u64 {
        self.weights.get(signer).copied().unwrap_or(0)
    }

    pub fn total_weight(&self) -> u64 {
        self.weights.values().sum()
    }
}

// ── Proposals ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalStatus {
    Open,
    Executed,
}

/// A governance proposal with its weighted votes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub id: u64,
    pub action: ProposalAction,
    pub proposer: SignerId,
    pub votes: BTreeMap<SignerId, (VoteChoice, Option<String>)>,
    pub status: ProposalStatus,
}

impl Proposal {
    /// Sum of validator weights behind Yes votes.
    pub fn yes_weight(&self, config: &ConsensusConfig) -> u64 {
        self.votes
            .iter()
            .filter(|(_, (choice, _))| matches!(choice, VoteChoice::Yes))
            .map(|(signer, _)| config.weight_of(signer))
            .sum()
    }
}

// ── Failure diagnostics ──────────────────────────────────────────────────────

/// What failed: an entity-level tx or a bilateral account tx of ours.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailedItem {
    Entity(EntityTx),
    Account(AccountTx),
}

/// One entry of the bounded failed-tx ring, polled by UIs and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedTx {
    pub item: FailedItem,
    pub error: String,
    pub timestamp: Timestamp,
}

// ── EntityState ──────────────────────────────────────────────────────────────

/// One replica's quorum-agreed view of its entity.
#[derive(Clone, Debug)]
pub struct EntityState {
    pub entity_id: EntityId,
    pub height: u64,
    pub timestamp: Timestamp,
    /// Highest committed tx nonce per signer (replay protection).
    pub nonces: BTreeMap<SignerId, Nonce>,
    pub config: ConsensusConfig,
    /// Chat log, bounded to `MAX_MESSAGES`.
    pub messages: VecDeque<String>,
    pub proposals: BTreeMap<u64, Proposal>,
    pub next_proposal_id: u64,
    /// Mirror of the on-chain reserves.
    pub reserves: BTreeMap<TokenId, Amount>,
    /// Governance token pair, once enabled on chain.
    pub governance: Option<(TokenId, TokenId)>,
    /// Bilateral accounts, one per counterparty.
    pub accounts: BTreeMap<EntityId, AccountMachine>,
    /// Bounded diagnostics ring of rejected txs.
    pub failed_txs: VecDeque<FailedTx>,
    /// Jurisdiction events already applied, by `(tx_hash, log_index)`.
    pub seen_events: BTreeSet<([u8; 32], u32)>,
    /// Stale-nonce and duplicate-event drops.
    pub replay_drops: u64,
}

impl EntityState {
    pub fn new(entity_id: EntityId, config: ConsensusConfig) -> Self {
        Self {
            entity_id,
            height: 0,
            timestamp: 0,
            nonces: BTreeMap::new(),
            config,
            messages: VecDeque::new(),
            proposals: BTreeMap::new(),
            next_proposal_id: 1,
            reserves: BTreeMap::new(),
            governance: None,
            accounts: BTreeMap::new(),
            failed_txs: VecDeque::new(),
            seen_events: BTreeSet::new(),
            replay_drops: 0,
        }
    }

    pub fn push_message(&mut self, message: String) {
        self.messages.push_back(message);
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }

    pub fn push_failed(&mut self, item: FailedItem, error: String, timestamp: Timestamp) {
        self.failed_txs.push_back(FailedTx {
            item,
            error,
            timestamp,
        });
        while self.failed_txs.len() > FAILED_TX_RING {
            self.failed_txs.pop_front();
        }
    }

    /// Canonical encoding of everything consensus-relevant. Validators hash
    /// this to check a proposer's claimed post state; a fresh replica built
    /// from genesis plus the log must reproduce it bit for bit.
    pub fn encode(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.entity_id.encode(&mut enc);

        enc.put_count(self.nonces.len());
        for (signer, nonce) in &self.nonces {
            signer.encode(&mut enc);
            enc.put_uint(*nonce);
        }

        enc.put_count(self.config.validators.len());
        for v in &self.config.validators {
            v.encode(&mut enc);
        }
        enc.put_count(self.config.weights.len());
        for (signer, weight) in &self.config.weights {
            signer.encode(&mut enc);
            enc.put_uint(*weight);
        }
        enc.put_uint(self.config.threshold);

        enc.put_count(self.messages.len());
        for m in &self.messages {
            enc.put_bytes(m.as_bytes());
        }

        enc.put_count(self.proposals.len());
        for (id, p) in &self.proposals {
            enc.put_uint(*id);
            p.action.encode(&mut enc);
            p.proposer.encode(&mut enc);
            enc.put_count(p.votes.len());
            for (signer, (choice, comment)) in &p.votes {
                signer.encode(&mut enc);
                choice.encode(&mut enc);
                enc.put_option(comment);
            }
            enc.put_discriminant(match p.status {
                ProposalStatus::Open => 0,
                ProposalStatus::Executed => 1,
            });
        }
        enc.put_uint(self.next_proposal_id);

        enc.put_count(self.reserves.len());
        for (token, amount) in &self.reserves {
            enc.put_uint(*token);
            enc.put_bigint(amount);
        }
        match &self.governance {
            None => enc.put_bool(false),
            Some((control, dividend)) => {
                enc.put_bool(true);
                enc.put_uint(*control);
                enc.put_uint(*dividend);
            }
        }

        // Only the committed part of each account is hashed. Mempools and
        // pending frames are protocol transients that advance in the account
        // tick, outside entity frames; hashing them would make the replay
        // check sensitive to tick phase.
        enc.put_count(self.accounts.len());
        for (counterparty, machine) in &self.accounts {
            counterparty.encode(&mut enc);
            enc.put_uint(machine.frame_id);
            enc.put_uint(machine.cooperative_nonce);
            enc.put_bytes(&machine.state.encode());
        }

        enc.put_count(self.seen_events.len());
        for (tx_hash, log_index) in &self.seen_events {
            enc.put_bytes(tx_hash);
            enc.put_uint(*log_index as u64);
        }

        enc.finish()
    }

    /// Keccak-256 of the canonical state encoding.
    pub fn state_hash(&self) -> StateHash {
        StateHash::from_bytes(keccak256(&self.encode()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(b: u8) -> EntityId {
        EntityId::from_bytes([b; 32])
    }

    #[test]
    fn fresh_states_hash_identically() {
        let a = EntityState::new(eid(1), ConsensusConfig::solo(SignerId::new("s1")));
        let b = EntityState::new(eid(1), ConsensusConfig::solo(SignerId::new("s1")));
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn hash_tracks_messages_and_reserves() {
        let mut s = EntityState::new(eid(1), ConsensusConfig::solo(SignerId::new("s1")));
        let h0 = s.state_hash();
        s.push_message("hello".into());
        let h1 = s.state_hash();
        assert_ne!(h0, h1);
        s.reserves.insert(1, Amount::from(42));
        assert_ne!(h1, s.state_hash());
    }

    #[test]
    fn message_log_is_bounded() {
        let mut s = EntityState::new(eid(1), ConsensusConfig::solo(SignerId::new("s1")));
        for i in 0..(MAX_MESSAGES + 10) {
            s.push_message(format!("m{i}"));
        }
        assert_eq!(s.messages.len(), MAX_MESSAGES);
        assert_eq!(s.messages.front().unwrap(), "m10");
    }

    #[test]
    fn proposer_rotates_by_height() {
        let s1 = SignerId::new("s1");
        let s2 = SignerId::new("s2");
        let mut weights = BTreeMap::new();
        weights.insert(s1.clone(), 2);
        weights.insert(s2.clone(), 1);
        let config = ConsensusConfig {
            validators: vec![s1.clone(), s2.clone()],
            weights,
            threshold: 2,
            mode: ConsensusMode::ProposerBased,
        };
        assert_eq!(config.proposer_for(0), &s1);
        assert_eq!(config.proposer_for(1), &s2);
        assert_eq!(config.proposer_for(2), &s1);
        assert_eq!(config.total_weight(), 3);
    }
}
