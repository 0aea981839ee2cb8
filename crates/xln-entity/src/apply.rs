//! Deterministic application of entity txs.
//!
//! Every replica replays the same committed frames through this module; the
//! proposer replica additionally releases the resulting outbox (bilateral
//! messages and jurisdiction intents). Failures never abort a frame: the
//! offending tx lands in the failed-tx ring and the rest of the frame
//! applies. Only stale nonces and duplicate jurisdiction events are dropped
//! silently, with an observable counter.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use xln_account::{AccountEffect, AccountMachine, ProtocolCtx};
use xln_core::frame::AccountMessage;
use xln_core::jurisdiction::{JurisdictionEvent, JurisdictionIntent, ObservedEvent};
use xln_core::tx::{EntityOp, EntityTx, ProposalAction};
use xln_core::types::{Ed25519PublicKey, EntityId, Timestamp};
use xln_core::{Delta, XlnError};
use xln_crypto::KeyPair;

use crate::state::{EntityState, FailedItem, Proposal, ProposalStatus};

/// Context threaded through tx application.
pub struct ApplyCtx<'a> {
    /// The entity's bilateral account key (identical on every replica).
    pub account_key: &'a KeyPair,
    /// Counterparty entities' account keys.
    pub peer_account_keys: &'a BTreeMap<EntityId, Ed25519PublicKey>,
    /// The committing frame's timestamp.
    pub now: Timestamp,
}

/// Messages and intents produced while applying txs. Released only by the
/// proposer replica; other replicas compute and discard them.
#[derive(Debug, Default)]
pub struct Outbox {
    pub account_msgs: Vec<(EntityId, AccountMessage)>,
    pub intents: Vec<JurisdictionIntent>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.account_msgs.is_empty() && self.intents.is_empty()
    }
}

/// Apply an ordered tx batch to `state`.
pub fn apply_entity_txs(state: &mut EntityState, txs: &[EntityTx], ctx: &ApplyCtx) -> Outbox {
    let mut outbox = Outbox::default();
    for tx in txs {
        apply_entity_tx(state, tx, ctx, &mut outbox);
    }
    outbox
}

fn apply_entity_tx(state: &mut EntityState, tx: &EntityTx, ctx: &ApplyCtx, outbox: &mut Outbox) {
    // Unknown signers cannot enter the log.
    if state.config.weight_of(&tx.signer) == 0 {
        state.push_failed(
            FailedItem::Entity(tx.clone()),
            XlnError::UnknownSigner(tx.signer.to_string()).to_string(),
            ctx.now,
        );
        return;
    }

    // Replay protection: committed nonces per signer are strictly increasing.
    let last = state.nonces.get(&tx.signer).copied().unwrap_or(0);
    if tx.nonce <= last {
        state.replay_drops += 1;
        debug!(signer = %tx.signer, nonce = tx.nonce, "stale nonce, dropping tx");
        return;
    }
    state.nonces.insert(tx.signer.clone(), tx.nonce);

    if let Err(e) = apply_op(state, tx, ctx, outbox) {
        warn!(signer = %tx.signer, error = %e, "entity tx rejected");
        state.push_failed(FailedItem::Entity(tx.clone()), e.to_string(), ctx.now);
    }
}

fn apply_op(
    state: &mut EntityState,
    tx: &EntityTx,
    ctx: &ApplyCtx,
    outbox: &mut Outbox,
) -> Result<(), XlnError> {
    match &tx.op {
        // ── Chat ─────────────────────────────────────────────────────────
        EntityOp::Chat { message } => {
            if message.len() > xln_core::MAX_CHAT_BYTES {
                return Err(XlnError::ChatTooLong {
                    max: xln_core::MAX_CHAT_BYTES,
                });
            }
            state.push_message(message.clone());
            Ok(())
        }

        // ── Governance ───────────────────────────────────────────────────
        EntityOp::Propose { action } => {
            let id = state.next_proposal_id;
            state.next_proposal_id += 1;
            state.proposals.insert(
                id,
                Proposal {
                    id,
                    action: action.clone(),
                    proposer: tx.signer.clone(),
                    votes: BTreeMap::new(),
                    status: ProposalStatus::Open,
                },
            );
            Ok(())
        }

        EntityOp::Vote {
            proposal_id,
            choice,
            comment,
        } => {
            let proposal = state
                .proposals
                .get_mut(proposal_id)
                .ok_or(XlnError::UnknownProposal(*proposal_id))?;
            if proposal.status != ProposalStatus::Open {
                return Err(XlnError::ProposalNotOpen(*proposal_id));
            }
            proposal
                .votes
                .insert(tx.signer.clone(), (*choice, comment.clone()));
            Ok(())
        }

        EntityOp::Execute { proposal_id } => {
            let proposal = state
                .proposals
                .get(proposal_id)
                .ok_or(XlnError::UnknownProposal(*proposal_id))?;
            if proposal.status != ProposalStatus::Open {
                return Err(XlnError::ProposalNotOpen(*proposal_id));
            }
            if proposal.yes_weight(&state.config) < state.config.threshold {
                return Err(XlnError::ProposalThresholdNotMet(*proposal_id));
            }
            let action = proposal.action.clone();
            execute_action(state, &action);
            state
                .proposals
                .get_mut(proposal_id)
                .expect("proposal exists")
                .status = ProposalStatus::Executed;
            info!(proposal = proposal_id, "proposal executed");
            Ok(())
        }

        // ── Accounts ─────────────────────────────────────────────────────
        EntityOp::OpenAccount { counterparty } => {
            if *counterparty == state.entity_id {
                return Err(XlnError::UnknownAccount("self".into()));
            }
            // Idempotent: an existing machine is left untouched.
            if !state.accounts.contains_key(counterparty) {
                let machine = AccountMachine::new(&state.entity_id, *counterparty);
                state.accounts.insert(*counterparty, machine);
                info!(counterparty = %counterparty, "account machine created");
            }
            Ok(())
        }

        EntityOp::Account { counterparty, op } => {
            let machine = state
                .accounts
                .get_mut(counterparty)
                .ok_or_else(|| XlnError::UnknownAccount(counterparty.to_string()))?;
            machine.submit(op.clone())
        }

        EntityOp::AccountInput { from, message } => {
            let Some(their_key) = ctx.peer_account_keys.get(from) else {
                return Err(XlnError::UnknownAccount(from.to_string()));
            };
            let machine = state
                .accounts
                .get_mut(from)
                .ok_or_else(|| XlnError::UnknownAccount(from.to_string()))?;
            let proto = ProtocolCtx {
                our_key: ctx.account_key,
                their_key,
                now: ctx.now,
            };
            let (msgs, effects) = machine.handle_message(message.clone(), &proto);
            for m in msgs {
                outbox.account_msgs.push((*from, m));
            }
            let entity_id = state.entity_id;
            for effect in effects {
                collect_effect(state, entity_id, *from, effect, ctx.now, outbox);
            }
            Ok(())
        }

        // ── Jurisdiction events ──────────────────────────────────────────
        EntityOp::ObserveJurisdiction { event } => observe(state, event, ctx.now),
    }
}

fn execute_action(state: &mut EntityState, action: &ProposalAction) {
    match action {
        ProposalAction::SetThreshold { threshold } => {
            state.config.threshold = *threshold;
        }
        ProposalAction::AddValidator { signer, weight } => {
            if !state.config.validators.contains(signer) {
                state.config.validators.push(signer.clone());
            }
            state.config.weights.insert(signer.clone(), *weight);
        }
        ProposalAction::RemoveValidator { signer } => {
            state.config.validators.retain(|v| v != signer);
            state.config.weights.remove(signer);
        }
        ProposalAction::Note { text } => {
            state.push_message(format!("note: {text}"));
        }
    }
}

/// Turn an account effect into a jurisdiction intent or a diagnostics entry.
pub fn collect_effect(
    state: &mut EntityState,
    entity_id: EntityId,
    counterparty: EntityId,
    effect: AccountEffect,
    now: Timestamp,
    outbox: &mut Outbox,
) {
    let (left_entity, right_entity) = if entity_id.is_left_of(&counterparty) {
        (entity_id, counterparty)
    } else {
        (counterparty, entity_id)
    };
    match effect {
        AccountEffect::CooperativeClose { diffs } => {
            let cooperative_nonce = state
                .accounts
                .get(&counterparty)
                .map(|m| m.cooperative_nonce)
                .unwrap_or(0);
            outbox.intents.push(JurisdictionIntent::CooperativeUpdate {
                left_entity,
                right_entity,
                diffs,
                cooperative_nonce,
                insurance: Vec::new(),
                forgiven_debts: Vec::new(),
            });
        }
        AccountEffect::Dispute { proof } => {
            outbox.intents.push(JurisdictionIntent::Dispute {
                left_entity,
                right_entity,
                proof,
            });
        }
        AccountEffect::TxsRejected { txs, reason } => {
            for t in txs {
                state.push_failed(FailedItem::Account(t), reason.clone(), now);
            }
        }
    }
}

fn observe(state: &mut EntityState, event: &ObservedEvent, now: Timestamp) -> Result<(), XlnError> {
    // Idempotent by (tx_hash, log_index): duplicates are counted and dropped,
    // not errors.
    let key = (event.tx_hash, event.log_index);
    if state.seen_events.contains(&key) {
        state.replay_drops += 1;
        debug!(
            tx_hash = %hex::encode(event.tx_hash),
            log_index = event.log_index,
            "duplicate jurisdiction event dropped"
        );
        return Ok(());
    }
    state.seen_events.insert(key);
    let _ = now;

    match &event.event {
        JurisdictionEvent::EntityRegistered {
            entity_number,
            board_hash,
        } => {
            info!(
                entity_number,
                board_hash = %hex::encode(board_hash),
                "entity registered on chain"
            );
            Ok(())
        }
        JurisdictionEvent::GovernanceEnabled {
            entity_id,
            control_token_id,
            dividend_token_id,
        } => {
            if *entity_id == state.entity_id {
                state.governance = Some((*control_token_id, *dividend_token_id));
            }
            Ok(())
        }
        JurisdictionEvent::ReserveUpdated {
            entity_id,
            token_id,
            new_amount,
        } => {
            if *entity_id == state.entity_id {
                state.reserves.insert(*token_id, new_amount.clone());
            }
            Ok(())
        }
        JurisdictionEvent::SettlementProcessed {
            left_entity,
            right_entity,
            token_id,
            new_collateral,
            new_ondelta,
        } => {
            let counterparty = if *left_entity == state.entity_id {
                *right_entity
            } else if *right_entity == state.entity_id {
                *left_entity
            } else {
                debug!("settlement event for a foreign pair, ignoring");
                return Ok(());
            };
            let machine = state
                .accounts
                .get_mut(&counterparty)
                .ok_or_else(|| XlnError::UnknownAccount(counterparty.to_string()))?;
            let delta = machine
                .state
                .deltas
                .entry(*token_id)
                .or_insert_with(|| Delta::new(*token_id));
            delta.collateral = new_collateral.clone();
            delta.ondelta = new_ondelta.clone();
            info!(
                counterparty = %counterparty,
                token = token_id,
                "settlement applied to account"
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConsensusConfig;
    use num_bigint::BigInt;
    use xln_core::tx::VoteChoice;
    use xln_core::types::SignerId;

    fn eid(b: u8) -> EntityId {
        EntityId::from_bytes([b; 32])
    }

    fn setup() -> (EntityState, KeyPair, BTreeMap<EntityId, Ed25519PublicKey>) {
        let state = EntityState::new(eid(1), ConsensusConfig::solo(SignerId::new("s1")));
        let key = KeyPair::from_seed([0x11; 32]);
        (state, key, BTreeMap::new())
    }

    fn tx(nonce: u64, op: EntityOp) -> EntityTx {
        EntityTx {
            signer: SignerId::new("s1"),
            nonce,
            op,
        }
    }

    #[test]
    fn chat_appends_and_rejects_oversized() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        apply_entity_txs(
            &mut state,
            &[tx(1, EntityOp::Chat { message: "hi".into() })],
            &ctx,
        );
        assert_eq!(state.messages.len(), 1);

        let long = "x".repeat(xln_core::MAX_CHAT_BYTES + 1);
        apply_entity_txs(&mut state, &[tx(2, EntityOp::Chat { message: long })], &ctx);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.failed_txs.len(), 1);
    }

    #[test]
    fn stale_nonce_is_dropped_with_counter() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        apply_entity_txs(
            &mut state,
            &[
                tx(1, EntityOp::Chat { message: "a".into() }),
                tx(1, EntityOp::Chat { message: "b".into() }),
            ],
            &ctx,
        );
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.replay_drops, 1);
    }

    #[test]
    fn proposal_lifecycle_executes_at_threshold() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        apply_entity_txs(
            &mut state,
            &[
                tx(
                    1,
                    EntityOp::Propose {
                        action: ProposalAction::SetThreshold { threshold: 3 },
                    },
                ),
                tx(
                    2,
                    EntityOp::Vote {
                        proposal_id: 1,
                        choice: VoteChoice::Yes,
                        comment: None,
                    },
                ),
                tx(3, EntityOp::Execute { proposal_id: 1 }),
            ],
            &ctx,
        );
        assert_eq!(state.config.threshold, 3);
        assert_eq!(
            state.proposals[&1].status,
            ProposalStatus::Executed
        );
    }

    #[test]
    fn execute_without_votes_fails() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        apply_entity_txs(
            &mut state,
            &[
                tx(
                    1,
                    EntityOp::Propose {
                        action: ProposalAction::Note { text: "n".into() },
                    },
                ),
                tx(2, EntityOp::Execute { proposal_id: 1 }),
            ],
            &ctx,
        );
        assert_eq!(state.proposals[&1].status, ProposalStatus::Open);
        assert_eq!(state.failed_txs.len(), 1);
    }

    #[test]
    fn open_account_is_idempotent() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        apply_entity_txs(
            &mut state,
            &[
                tx(1, EntityOp::OpenAccount { counterparty: eid(2) }),
                tx(2, EntityOp::OpenAccount { counterparty: eid(2) }),
            ],
            &ctx,
        );
        assert_eq!(state.accounts.len(), 1);
        assert!(state.accounts[&eid(2)].is_left);
    }

    #[test]
    fn duplicate_jurisdiction_event_is_replay() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        let event = ObservedEvent {
            tx_hash: [0xAB; 32],
            log_index: 0,
            event: JurisdictionEvent::ReserveUpdated {
                entity_id: eid(1),
                token_id: 1,
                new_amount: BigInt::from(1_000),
            },
        };
        apply_entity_txs(
            &mut state,
            &[
                tx(1, EntityOp::ObserveJurisdiction { event: event.clone() }),
                tx(2, EntityOp::ObserveJurisdiction { event }),
            ],
            &ctx,
        );
        assert_eq!(state.reserves[&1], BigInt::from(1_000));
        assert_eq!(state.replay_drops, 1);
    }

    #[test]
    fn settlement_event_updates_account_collateral() {
        let (mut state, key, peers) = setup();
        let ctx = ApplyCtx {
            account_key: &key,
            peer_account_keys: &peers,
            now: 1,
        };
        apply_entity_txs(
            &mut state,
            &[
                tx(1, EntityOp::OpenAccount { counterparty: eid(2) }),
                tx(
                    2,
                    EntityOp::ObserveJurisdiction {
                        event: ObservedEvent {
                            tx_hash: [0xCD; 32],
                            log_index: 1,
                            event: JurisdictionEvent::SettlementProcessed {
                                left_entity: eid(1),
                                right_entity: eid(2),
                                token_id: 1,
                                new_collateral: BigInt::from(500),
                                new_ondelta: BigInt::from(100),
                            },
                        },
                    },
                ),
            ],
            &ctx,
        );
        let machine = &state.accounts[&eid(2)];
        assert_eq!(machine.state.deltas[&1].collateral, BigInt::from(500));
        assert_eq!(machine.state.deltas[&1].ondelta, BigInt::from(100));
    }
}
