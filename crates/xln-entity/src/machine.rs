//! Proposer-based weighted consensus over entity frames.
//!
//! One [`EntityMachine`] per `(entityId, signerId)` replica. The proposer
//! for a height frames its mempool, every validator replays the txs and
//! answers with a signed precommit, and the frame commits once the weighted
//! precommit sum reaches the configured threshold. A replica whose replay
//! disagrees with the proposer's post-state hash dumps both encoded states
//! and halts; silent recovery is forbidden.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use xln_codec::entity_frame_hash;
use xln_core::frame::{EntityFrame, Precommit};
use xln_core::jurisdiction::JurisdictionIntent;
use xln_core::tx::{sort_entity_txs, EntityOp, EntityTx};
use xln_core::types::{
    Ed25519PublicKey, EntityId, Nonce, SignerId, StateHash, Timestamp,
};
use xln_crypto::{verify, KeyPair};

use crate::apply::{apply_entity_txs, collect_effect, ApplyCtx, Outbox};
use crate::state::{ConsensusConfig, EntityState};

// ── Consensus wire messages ──────────────────────────────────────────────────

/// Messages exchanged between replicas of one entity.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntityMessage {
    /// Proposer → validators: a frame with the proposer's own precommit.
    Propose {
        frame: EntityFrame,
        precommit: Precommit,
    },
    /// Validator → proposer: signed agreement after deterministic replay.
    Precommit(Precommit),
    /// Proposer → validators: threshold reached, install the frame.
    Commit {
        frame: EntityFrame,
        precommits: Vec<Precommit>,
    },
}

/// Where the machine stands with respect to an in-flight frame.
///
/// No post state is cached: committing re-applies the frame's txs to the
/// live state (with the frame's own timestamp), so account-protocol
/// transients that advanced between propose and commit are preserved.
#[derive(Debug)]
enum Stage {
    Idle,
    /// We proposed `frame` and are collecting precommits.
    Proposing {
        frame: EntityFrame,
        frame_hash: StateHash,
        precommits: BTreeMap<SignerId, Precommit>,
    },
    /// We validated a proposal and answered; awaiting the commit broadcast.
    AwaitingCommit { frame_hash: StateHash },
}

/// One tick's worth of output from a replica.
#[derive(Debug, Default)]
pub struct StepOutput {
    /// Consensus messages addressed to sibling replicas by signer.
    pub consensus: Vec<(SignerId, EntityMessage)>,
    /// Bilateral messages to counterparty entities (proposer replica only).
    pub account_msgs: Vec<(EntityId, xln_core::frame::AccountMessage)>,
    /// Jurisdiction intents (proposer replica only).
    pub intents: Vec<JurisdictionIntent>,
}

impl StepOutput {
    fn absorb_outbox(&mut self, outbox: Outbox) {
        self.account_msgs.extend(outbox.account_msgs);
        self.intents.extend(outbox.intents);
    }
}

// ── EntityMachine ────────────────────────────────────────────────────────────

/// One validator replica of one entity.
pub struct EntityMachine {
    pub entity_id: EntityId,
    pub signer_id: SignerId,
    pub state: EntityState,
    pub mempool: Vec<EntityTx>,
    /// Set after a divergence dump; the replica refuses all further frames.
    pub halted: bool,
    stage: Stage,
    inbox: Vec<EntityMessage>,
    /// The entity's bilateral account key, identical on every replica.
    account_key: KeyPair,
    /// This replica's precommit signing key.
    signer_key: KeyPair,
    /// Precommit verification keys of all validators.
    validator_keys: BTreeMap<SignerId, Ed25519PublicKey>,
    /// Account keys of counterparty entities.
    pub peer_account_keys: BTreeMap<EntityId, Ed25519PublicKey>,
    /// Frames committed since the runtime last drained this log.
    pub committed_log: Vec<EntityFrame>,
    next_nonce: Nonce,
}

impl EntityMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_id: EntityId,
        signer_id: SignerId,
        config: ConsensusConfig,
        account_key: KeyPair,
        signer_key: KeyPair,
        validator_keys: BTreeMap<SignerId, Ed25519PublicKey>,
    ) -> Self {
        Self {
            entity_id,
            signer_id,
            state: EntityState::new(entity_id, config),
            mempool: Vec::new(),
            halted: false,
            stage: Stage::Idle,
            inbox: Vec::new(),
            account_key,
            signer_key,
            validator_keys,
            peer_account_keys: BTreeMap::new(),
            committed_log: Vec::new(),
            next_nonce: 0,
        }
    }

    /// Stamp an op with this replica's signer and next nonce and queue it.
    pub fn submit_op(&mut self, op: EntityOp) {
        self.next_nonce += 1;
        self.mempool.push(EntityTx {
            signer: self.signer_id.clone(),
            nonce: self.next_nonce,
            op,
        });
    }

    /// Queue an inbound consensus message for the next `advance`.
    pub fn enqueue(&mut self, msg: EntityMessage) {
        self.inbox.push(msg);
    }

    /// Whether this replica currently carries the proposer role (and with it
    /// the duty to emit outbound side effects exactly once).
    pub fn is_current_proposer(&self) -> bool {
        self.state.config.proposer_for(self.state.height + 1) == &self.signer_id
    }

    // ── Consensus advance (runtime tick step 2) ──────────────────────────────

    /// Advance consensus one step: handle queued messages, or propose.
    pub fn advance(&mut self, now: Timestamp) -> StepOutput {
        let mut out = StepOutput::default();
        if self.halted {
            return out;
        }

        let inbox: Vec<_> = self.inbox.drain(..).collect();
        if !inbox.is_empty() {
            for msg in inbox {
                self.handle_consensus(msg, now, &mut out);
                if self.halted {
                    return out;
                }
            }
            return out;
        }

        // Nothing inbound: maybe propose.
        if matches!(self.stage, Stage::Idle)
            && self.is_current_proposer()
            && !self.mempool.is_empty()
        {
            self.propose(now, &mut out);
        }
        out
    }

    fn propose(&mut self, now: Timestamp, out: &mut StepOutput) {
        let mut txs = self.mempool.clone();
        sort_entity_txs(&mut txs);

        // Dry-run on a clone to learn the post-state hash; the real
        // application happens once, at commit.
        let mut dry_run = self.state.clone();
        let ctx = ApplyCtx {
            account_key: &self.account_key,
            peer_account_keys: &self.peer_account_keys,
            now,
        };
        let _ = apply_entity_txs(&mut dry_run, &txs, &ctx);

        let frame = EntityFrame {
            height: self.state.height + 1,
            timestamp: now,
            prev_state_hash: self.state.state_hash(),
            txs,
            post_state_hash: dry_run.state_hash(),
            proposer: self.signer_id.clone(),
        };
        let frame_hash = entity_frame_hash(&frame);
        let own = self.precommit_for(&frame, frame_hash);

        debug!(
            entity = %self.entity_id,
            height = frame.height,
            txs = frame.txs.len(),
            "proposing entity frame"
        );

        let mut precommits = BTreeMap::new();
        precommits.insert(self.signer_id.clone(), own.clone());
        self.stage = Stage::Proposing {
            frame: frame.clone(),
            frame_hash,
            precommits,
        };

        // Solo quorum: commit without a round trip.
        if self.precommit_weight() >= self.state.config.threshold {
            self.commit_as_proposer(out);
            return;
        }

        for signer in self.state.config.validators.clone() {
            if signer != self.signer_id {
                out.consensus.push((
                    signer,
                    EntityMessage::Propose {
                        frame: frame.clone(),
                        precommit: own.clone(),
                    },
                ));
            }
        }
    }

    fn precommit_for(&self, frame: &EntityFrame, frame_hash: StateHash) -> Precommit {
        Precommit {
            signer: self.signer_id.clone(),
            height: frame.height,
            frame_hash,
            sig: self.signer_key.sign(frame_hash.as_bytes()),
        }
    }

    fn precommit_weight(&self) -> u64 {
        match &self.stage {
            Stage::Proposing { precommits, .. } => precommits
                .keys()
                .map(|s| self.state.config.weight_of(s))
                .sum(),
            _ => 0,
        }
    }

    fn handle_consensus(&mut self, msg: EntityMessage, now: Timestamp, out: &mut StepOutput) {
        match msg {
            EntityMessage::Propose { frame, precommit } => {
                self.on_propose(frame, precommit, now, out)
            }
            EntityMessage::Precommit(p) => self.on_precommit(p, out),
            EntityMessage::Commit { frame, precommits } => {
                self.on_commit(frame, precommits, now, out)
            }
        }
    }

    // ── Validator side ───────────────────────────────────────────────────────

    fn on_propose(
        &mut self,
        frame: EntityFrame,
        precommit: Precommit,
        now: Timestamp,
        out: &mut StepOutput,
    ) {
        let expected_height = self.state.height + 1;
        if frame.height != expected_height {
            debug!(
                got = frame.height,
                expected = expected_height,
                "proposal at unexpected height, dropping"
            );
            return;
        }
        let expected_proposer = self.state.config.proposer_for(frame.height).clone();
        if frame.proposer != expected_proposer || precommit.signer != expected_proposer {
            warn!(proposer = %frame.proposer, "proposal from wrong proposer, dropping");
            return;
        }
        let frame_hash = entity_frame_hash(&frame);
        let Some(key) = self.validator_keys.get(&frame.proposer) else {
            warn!(proposer = %frame.proposer, "no key for proposer, dropping");
            return;
        };
        if !verify(key, frame_hash.as_bytes(), &precommit.sig) {
            warn!("proposal precommit signature invalid, dropping");
            return;
        }
        if frame.prev_state_hash != self.state.state_hash() {
            // Our replay base differs from the proposer's. Treat like a
            // divergence: dump and halt rather than guess.
            self.dump_and_halt(&frame, self.state.state_hash());
            return;
        }

        // Deterministic replay against the proposer's claimed post state.
        // The frame's own timestamp drives the replay so every replica
        // reaches the same verdict regardless of local tick phase.
        let _ = now;
        let mut dry_run = self.state.clone();
        let ctx = ApplyCtx {
            account_key: &self.account_key,
            peer_account_keys: &self.peer_account_keys,
            now: frame.timestamp,
        };
        let _ = apply_entity_txs(&mut dry_run, &frame.txs, &ctx);
        let local_hash = dry_run.state_hash();
        if local_hash != frame.post_state_hash {
            self.dump_and_halt(&frame, local_hash);
            return;
        }

        let own = self.precommit_for(&frame, frame_hash);
        self.stage = Stage::AwaitingCommit { frame_hash };
        out.consensus
            .push((frame.proposer.clone(), EntityMessage::Precommit(own)));
    }

    /// Consensus divergence: dump both encoded views and refuse the frame.
    fn dump_and_halt(&mut self, frame: &EntityFrame, local_hash: StateHash) {
        error!(
            entity = %self.entity_id,
            signer = %self.signer_id,
            height = frame.height,
            proposer_hash = %frame.post_state_hash,
            local_hash = %local_hash,
            local_state = %hex::encode(self.state.encode()),
            "entity state diverged; dumping state and halting this replica"
        );
        self.halted = true;
    }

    // ── Proposer side ────────────────────────────────────────────────────────

    fn on_precommit(&mut self, p: Precommit, out: &mut StepOutput) {
        let Stage::Proposing {
            frame_hash,
            precommits,
            ..
        } = &mut self.stage
        else {
            debug!(signer = %p.signer, "precommit while not proposing, dropping");
            return;
        };
        if p.frame_hash != *frame_hash {
            debug!(signer = %p.signer, "precommit for a different frame, dropping");
            return;
        }
        let Some(key) = self.validator_keys.get(&p.signer) else {
            warn!(signer = %p.signer, "precommit from unknown signer, dropping");
            return;
        };
        if !verify(key, p.frame_hash.as_bytes(), &p.sig) {
            warn!(signer = %p.signer, "precommit signature invalid, dropping");
            return;
        }
        precommits.insert(p.signer.clone(), p);

        if self.precommit_weight() >= self.state.config.threshold {
            self.commit_as_proposer(out);
        }
    }

    fn commit_as_proposer(&mut self, out: &mut StepOutput) {
        let Stage::Proposing {
            frame, precommits, ..
        } = std::mem::replace(&mut self.stage, Stage::Idle)
        else {
            unreachable!("commit_as_proposer requires Proposing stage");
        };

        info!(
            entity = %self.entity_id,
            height = frame.height,
            txs = frame.txs.len(),
            "entity frame committed (proposer)"
        );
        let outbox = self.commit_frame(frame.clone());
        // The proposer is the one replica that releases side effects.
        out.absorb_outbox(outbox);

        let precommits: Vec<Precommit> = precommits.into_values().collect();
        for signer in self.state.config.validators.clone() {
            if signer != self.signer_id {
                out.consensus.push((
                    signer,
                    EntityMessage::Commit {
                        frame: frame.clone(),
                        precommits: precommits.clone(),
                    },
                ));
            }
        }
    }

    fn on_commit(
        &mut self,
        frame: EntityFrame,
        precommits: Vec<Precommit>,
        now: Timestamp,
        _out: &mut StepOutput,
    ) {
        if frame.height != self.state.height + 1 {
            debug!(height = frame.height, "commit at unexpected height, dropping");
            return;
        }
        let frame_hash = entity_frame_hash(&frame);
        let mut weight = 0u64;
        for p in &precommits {
            if p.frame_hash != frame_hash {
                continue;
            }
            let Some(key) = self.validator_keys.get(&p.signer) else {
                continue;
            };
            if verify(key, frame_hash.as_bytes(), &p.sig) {
                weight += self.state.config.weight_of(&p.signer);
            }
        }
        if weight < self.state.config.threshold {
            warn!(
                weight,
                threshold = self.state.config.threshold,
                "commit below threshold, dropping"
            );
            return;
        }

        let _ = now;
        self.stage = Stage::Idle;

        info!(
            entity = %self.entity_id,
            height = frame.height,
            "entity frame committed (validator)"
        );
        // Validators suppress the outbox; the proposer already released it.
        let post_state_hash = frame.post_state_hash;
        let _ = self.commit_frame(frame);
        if self.state.state_hash() != post_state_hash {
            error!(
                entity = %self.entity_id,
                signer = %self.signer_id,
                expected = %post_state_hash,
                local = %self.state.state_hash(),
                local_state = %hex::encode(self.state.encode()),
                "post-commit state diverged; halting this replica"
            );
            self.halted = true;
        }
    }

    /// Apply a committed frame to the live state, advance the height, let
    /// every account machine frame up whatever the commit put in its
    /// mempool, and clear the frame's txs from the local mempool (matching
    /// by op, since each replica stamps its own signer onto externally
    /// submitted ops).
    fn commit_frame(&mut self, frame: EntityFrame) -> Outbox {
        let ctx = ApplyCtx {
            account_key: &self.account_key,
            peer_account_keys: &self.peer_account_keys,
            now: frame.timestamp,
        };
        let mut outbox = apply_entity_txs(&mut self.state, &frame.txs, &ctx);
        self.advance_accounts(frame.timestamp, &mut outbox);
        self.state.height = frame.height;
        self.state.timestamp = frame.timestamp;
        for tx in &frame.txs {
            if let Some(pos) = self.mempool.iter().position(|m| m.op == tx.op) {
                self.mempool.remove(pos);
            }
        }
        self.committed_log.push(frame);
        outbox
    }

    /// Bilateral proposals happen at commit points only, so protocol state
    /// advances at the same consensus height on every replica.
    fn advance_accounts(&mut self, now: Timestamp, outbox: &mut Outbox) {
        let entity_id = self.entity_id;
        let counterparties: Vec<EntityId> = self.state.accounts.keys().copied().collect();
        for counterparty in counterparties {
            let Some(their_key) = self.peer_account_keys.get(&counterparty) else {
                continue;
            };
            let proto = xln_account::ProtocolCtx {
                our_key: &self.account_key,
                their_key,
                now,
            };
            let machine = self
                .state
                .accounts
                .get_mut(&counterparty)
                .expect("account exists");
            let (msgs, effects) = machine.advance(&proto);
            for m in msgs {
                outbox.account_msgs.push((counterparty, m));
            }
            for effect in effects {
                collect_effect(&mut self.state, entity_id, counterparty, effect, now, outbox);
            }
        }
    }

    // ── Account advance (runtime tick step 3) ────────────────────────────────

    /// Per-tick account maintenance: resend pending frames whose ack timed
    /// out. Proposals happen at commit points (see `commit_frame`); resends
    /// are idempotent, so every replica tracks the timer but only the
    /// proposer-role replica's copies are released.
    pub fn account_tick(&mut self, now: Timestamp) -> StepOutput {
        let mut out = StepOutput::default();
        if self.halted {
            return out;
        }
        let release = self.is_current_proposer();
        let counterparties: Vec<EntityId> = self.state.accounts.keys().copied().collect();
        for counterparty in counterparties {
            let Some(their_key) = self.peer_account_keys.get(&counterparty) else {
                continue;
            };
            let proto = xln_account::ProtocolCtx {
                our_key: &self.account_key,
                their_key,
                now,
            };
            let machine = self
                .state
                .accounts
                .get_mut(&counterparty)
                .expect("account exists");
            let msgs = machine.resend_due(&proto);
            if release {
                for m in msgs {
                    out.account_msgs.push((counterparty, m));
                }
            }
        }
        out
    }

    /// Pending work check used by `process_until_empty`.
    pub fn has_pending_work(&self) -> bool {
        if self.halted {
            return false;
        }
        !self.inbox.is_empty()
            || !self.mempool.is_empty()
            || !matches!(self.stage, Stage::Idle)
            || self
                .state
                .accounts
                .values()
                .any(|a| !a.mempool.is_empty() || a.pending.is_some())
    }
}
