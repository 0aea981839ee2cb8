//! The deterministic global scheduler.
//!
//! One tick is indivisible: drain the inbox into replica mempools, advance
//! every replica's consensus one step in ascending `(entityId, signerId)`
//! order, let every account machine advance one protocol step, then collect
//! outputs and append a snapshot. Equal inputs always produce equal
//! snapshots; there is no other source of time or ordering.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use xln_codec::keccak256;
use xln_core::constants::MAX_PROCESS_ITERATIONS;
use xln_core::frame::AccountMessage;
use xln_core::jurisdiction::ObservedEvent;
use xln_core::tx::EntityOp;
use xln_core::types::{EntityId, SignerId, StateHash, Timestamp};
use xln_entity::{EntityMachine, EntityMessage, StepOutput};

use crate::context::RuntimeContext;
use crate::snapshot::{CommittedAccountRecord, CommittedEntityRecord, Snapshot};

// ── Inputs ───────────────────────────────────────────────────────────────────

/// Everything the runtime can receive, external or self-routed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Input {
    /// External user intent, delivered to every replica of the entity.
    Submit { entity: EntityId, op: EntityOp },
    /// External jurisdiction event for one entity.
    Jurisdiction {
        entity: EntityId,
        event: ObservedEvent,
    },
    /// Bilateral message between two entities (self-routed or remote).
    AccountMsg {
        from: EntityId,
        to: EntityId,
        message: AccountMessage,
    },
    /// Consensus message between replicas of one entity (self-routed).
    Consensus {
        entity: EntityId,
        to_signer: SignerId,
        msg: EntityMessage,
    },
}

impl Input {
    /// Whether this input originates outside the runtime. Replays re-inject
    /// only external inputs; everything else regenerates deterministically.
    pub fn is_external(&self) -> bool {
        matches!(self, Input::Submit { .. } | Input::Jurisdiction { .. })
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Clock injected at construction; tests use a deterministic counter.
pub type Clock = Box<dyn FnMut() -> Timestamp>;

pub struct Runtime {
    replicas: BTreeMap<(EntityId, SignerId), EntityMachine>,
    inbox: VecDeque<Input>,
    pub history: Vec<Snapshot>,
    pub ctx: RuntimeContext,
    clock: Clock,
    tick_height: u64,
}

impl Runtime {
    pub fn new(seed: u64, clock: Clock) -> Self {
        Self {
            replicas: BTreeMap::new(),
            inbox: VecDeque::new(),
            history: Vec::new(),
            ctx: RuntimeContext::new(seed),
            clock,
            tick_height: 0,
        }
    }

    /// Register a replica. Counterparty account keys must be wired by the
    /// caller before the entities talk (`link_entities`).
    pub fn add_replica(&mut self, machine: EntityMachine) {
        let key = (machine.entity_id, machine.signer_id.clone());
        self.replicas.insert(key, machine);
    }

    /// Exchange account keys between two entities so their replicas can
    /// verify each other's bilateral frames.
    pub fn link_entities(
        &mut self,
        a: EntityId,
        a_key: xln_core::types::Ed25519PublicKey,
        b: EntityId,
        b_key: xln_core::types::Ed25519PublicKey,
    ) {
        for ((entity, _), machine) in self.replicas.iter_mut() {
            if *entity == a {
                machine.peer_account_keys.insert(b, b_key.clone());
            } else if *entity == b {
                machine.peer_account_keys.insert(a, a_key.clone());
            }
        }
    }

    pub fn replica(&self, entity: &EntityId, signer: &SignerId) -> Option<&EntityMachine> {
        self.replicas.get(&(*entity, signer.clone()))
    }

    pub fn replica_mut(
        &mut self,
        entity: &EntityId,
        signer: &SignerId,
    ) -> Option<&mut EntityMachine> {
        self.replicas.get_mut(&(*entity, signer.clone()))
    }

    /// Enqueue an input for the next tick.
    pub fn enqueue(&mut self, input: Input) {
        self.inbox.push_back(input);
    }

    /// Global state hash: Keccak-256 over every replica's canonical state
    /// encoding in ascending `(entityId, signerId)` order.
    pub fn global_state_hash(&self) -> StateHash {
        let mut bytes = Vec::new();
        for machine in self.replicas.values() {
            bytes.extend_from_slice(&machine.state.encode());
        }
        StateHash::from_bytes(keccak256(&bytes))
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// One indivisible tick.
    pub fn tick(&mut self) -> &Snapshot {
        self.tick_height += 1;
        self.ctx.now = (self.clock)();
        let now = self.ctx.now;

        // 1. Drain the inbox into replica mempools, in arrival order.
        let inbound: Vec<Input> = self.inbox.drain(..).collect();
        for input in &inbound {
            self.dispatch(input.clone());
        }

        // 2. Advance each replica's consensus exactly one step.
        let keys: Vec<(EntityId, SignerId)> = self.replicas.keys().cloned().collect();
        let mut intents = Vec::new();
        for key in &keys {
            let out = self
                .replicas
                .get_mut(key)
                .expect("replica exists")
                .advance(now);
            self.route(key.0, out, &mut intents);
        }

        // 3. Let every account machine advance one protocol step.
        for key in &keys {
            let out = self
                .replicas
                .get_mut(key)
                .expect("replica exists")
                .account_tick(now);
            self.route(key.0, out, &mut intents);
        }

        // 4. Collect commits and snapshot.
        let mut committed_entity_frames = Vec::new();
        let mut committed_account_frames = Vec::new();
        for (key, machine) in self.replicas.iter_mut() {
            for frame in machine.committed_log.drain(..) {
                committed_entity_frames.push(CommittedEntityRecord {
                    entity: key.0,
                    signer: key.1.clone(),
                    frame,
                });
            }
            for (counterparty, account) in machine.state.accounts.iter_mut() {
                for frame in account.fresh_committed.drain(..) {
                    committed_account_frames.push(CommittedAccountRecord {
                        entity: key.0,
                        signer: key.1.clone(),
                        counterparty: *counterparty,
                        frame,
                    });
                }
            }
        }

        let snapshot = Snapshot {
            height: self.tick_height,
            timestamp: now,
            inbound,
            committed_entity_frames,
            committed_account_frames,
            outbound_intents: intents,
            state_hash: self.global_state_hash(),
        };
        debug!(
            height = snapshot.height,
            inbound = snapshot.inbound.len(),
            hash = %snapshot.state_hash,
            "tick complete"
        );
        self.history.push(snapshot);
        self.history.last().expect("snapshot just pushed")
    }

    fn dispatch(&mut self, input: Input) {
        match input {
            Input::Submit { entity, op } => {
                for ((e, _), machine) in self.replicas.iter_mut() {
                    if *e == entity {
                        machine.submit_op(op.clone());
                    }
                }
            }
            Input::Jurisdiction { entity, event } => {
                for ((e, _), machine) in self.replicas.iter_mut() {
                    if *e == entity {
                        machine.submit_op(EntityOp::ObserveJurisdiction {
                            event: event.clone(),
                        });
                    }
                }
            }
            Input::AccountMsg { from, to, message } => {
                for ((e, _), machine) in self.replicas.iter_mut() {
                    if *e == to {
                        machine.submit_op(EntityOp::AccountInput {
                            from,
                            message: message.clone(),
                        });
                    }
                }
            }
            Input::Consensus {
                entity,
                to_signer,
                msg,
            } => {
                if let Some(machine) = self.replicas.get_mut(&(entity, to_signer)) {
                    machine.enqueue(msg);
                }
            }
        }
    }

    /// Feed a replica's outputs back into the inbox for the next tick.
    fn route(
        &mut self,
        entity: EntityId,
        out: StepOutput,
        intents: &mut Vec<xln_core::jurisdiction::JurisdictionIntent>,
    ) {
        for (to_signer, msg) in out.consensus {
            self.inbox.push_back(Input::Consensus {
                entity,
                to_signer,
                msg,
            });
        }
        for (to, message) in out.account_msgs {
            self.inbox.push_back(Input::AccountMsg {
                from: entity,
                to,
                message,
            });
        }
        intents.extend(out.intents);
    }

    // ── Draining ─────────────────────────────────────────────────────────────

    fn has_pending_work(&self) -> bool {
        !self.inbox.is_empty() || self.replicas.values().any(|m| m.has_pending_work())
    }

    /// Tick until no replica has pending work. Hitting the iteration bound
    /// means the machines are not quiescing; that is a broken invariant and
    /// aborts rather than recovering silently.
    pub fn process_until_empty(&mut self) {
        let mut iterations = 0usize;
        while self.has_pending_work() {
            iterations += 1;
            if iterations > MAX_PROCESS_ITERATIONS {
                panic!(
                    "process_until_empty exceeded {MAX_PROCESS_ITERATIONS} iterations; \
                     machines are not quiescing"
                );
            }
            self.tick();
        }
        info!(iterations, "runtime drained");
    }

    // ── Replay ───────────────────────────────────────────────────────────────

    /// Rebuild a fresh runtime from genesis plus a snapshot log: re-inject
    /// the external inputs of each snapshot at its tick and re-run. Internal
    /// routing regenerates deterministically. Returns the final global hash.
    pub fn replay(build: impl FnOnce() -> Runtime, history: &[Snapshot]) -> StateHash {
        let mut fresh = build();
        for snapshot in history {
            for input in snapshot.inbound.iter().filter(|i| i.is_external()) {
                fresh.enqueue(input.clone());
            }
            fresh.tick();
        }
        fresh.global_state_hash()
    }
}
