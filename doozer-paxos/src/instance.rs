//! Single-decree Paxos for one seqn. Proposer, acceptor, and learner roles
//! are colocated in one `Instance`: every node runs the same state machine
//! for a given seqn, and the wire messages it exchanges with the other
//! members' instances are what drives the three roles forward.

use std::collections::{BTreeMap, BTreeSet};

use doozer_net::{Msg, NodeId};

/// Messages to send as a side effect of a state transition, plus a learned
/// value if this transition is the one that reached quorum.
#[derive(Default)]
pub struct Outbox {
    pub sends: Vec<(NodeId, Msg)>,
    pub decided: Option<String>,
}

impl Outbox {
    fn broadcast(members: &[NodeId], msg: Msg) -> Outbox {
        Outbox { sends: members.iter().cloned().map(|m| (m, msg.clone())).collect(), decided: None }
    }
}

pub struct Instance {
    seqn: u64,
    members: Vec<NodeId>,
    slot: u64,
    attempt: u64,
    round: u64,
    proposing_value: Option<String>,
    rsvps: BTreeMap<NodeId, (u64, Option<String>)>,
    votes: BTreeMap<(u64, String), BTreeSet<NodeId>>,
    promised_round: u64,
    accepted: Option<(u64, String)>,
    decided: Option<String>,
}

impl Instance {
    /// `slot` is this node's index in the acceptor set for this seqn; round
    /// numbers are `slot + attempt * members.len()`, which keeps every
    /// proposer's rounds disjoint from every other's.
    pub fn new(seqn: u64, members: Vec<NodeId>, slot: u64) -> Instance {
        Instance {
            seqn,
            members,
            slot,
            attempt: 0,
            round: 0,
            proposing_value: None,
            rsvps: BTreeMap::new(),
            votes: BTreeMap::new(),
            promised_round: 0,
            accepted: None,
            decided: None,
        }
    }

    pub fn seqn(&self) -> u64 {
        self.seqn
    }

    pub fn decided_value(&self) -> Option<&str> {
        self.decided.as_deref()
    }

    fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    fn round_for(&self, attempt: u64) -> u64 {
        self.slot + attempt * self.members.len() as u64
    }

    /// Starts (or restarts, from a clean attempt 0) a proposal for `value`.
    pub fn propose(&mut self, value: String) -> Outbox {
        self.proposing_value = Some(value);
        self.attempt = 0;
        self.round = self.round_for(0);
        self.rsvps.clear();
        Outbox::broadcast(&self.members, Msg::Invite { seqn: self.seqn, round: self.round })
    }

    /// Called by the manager when a proposal has stalled (no quorum within
    /// a retry window). Bumps to the next disjoint round and re-invites.
    pub fn retry(&mut self) -> Outbox {
        if self.proposing_value.is_none() || self.decided.is_some() {
            return Outbox::default();
        }
        self.attempt += 1;
        self.round = self.round_for(self.attempt);
        self.rsvps.clear();
        Outbox::broadcast(&self.members, Msg::Invite { seqn: self.seqn, round: self.round })
    }

    pub fn receive(&mut self, from: NodeId, msg: Msg) -> Outbox {
        match msg {
            Msg::Invite { round, .. } => self.on_invite(from, round),
            Msg::Rsvp { round, voted_round, voted_value, .. } => self.on_rsvp(from, round, voted_round, voted_value),
            Msg::Nominate { round, value, .. } => self.on_nominate(round, value),
            Msg::Vote { round, value, .. } => self.on_vote(from, round, value),
            Msg::Learn { value, .. } => {
                self.decided = Some(value.clone());
                Outbox { sends: Vec::new(), decided: Some(value) }
            }
        }
    }

    fn on_invite(&mut self, from: NodeId, round: u64) -> Outbox {
        if round < self.promised_round {
            return Outbox::default();
        }
        self.promised_round = round;
        let (voted_round, voted_value) = match &self.accepted {
            Some((r, v)) => (*r, Some(v.clone())),
            None => (0, None),
        };
        Outbox { sends: vec![(from, Msg::Rsvp { seqn: self.seqn, round, voted_round, voted_value })], decided: None }
    }

    fn on_rsvp(&mut self, from: NodeId, round: u64, voted_round: u64, voted_value: Option<String>) -> Outbox {
        if round != self.round || self.proposing_value.is_none() {
            return Outbox::default();
        }
        self.rsvps.insert(from, (voted_round, voted_value));
        if self.rsvps.len() < self.quorum() {
            return Outbox::default();
        }
        let chosen = self
            .rsvps
            .values()
            .filter_map(|(r, v)| v.clone().map(|val| (*r, val)))
            .max_by_key(|(r, _)| *r)
            .map(|(_, v)| v)
            .unwrap_or_else(|| self.proposing_value.clone().expect("checked above"));
        Outbox::broadcast(&self.members, Msg::Nominate { seqn: self.seqn, round: self.round, value: chosen })
    }

    fn on_nominate(&mut self, round: u64, value: String) -> Outbox {
        if round < self.promised_round {
            return Outbox::default();
        }
        self.promised_round = round;
        self.accepted = Some((round, value.clone()));
        Outbox::broadcast(&self.members, Msg::Vote { seqn: self.seqn, round, value })
    }

    fn on_vote(&mut self, from: NodeId, round: u64, value: String) -> Outbox {
        if self.decided.is_some() {
            return Outbox::default();
        }
        let tally = self.votes.entry((round, value.clone())).or_default();
        tally.insert(from);
        if tally.len() < self.quorum() {
            return Outbox::default();
        }
        self.decided = Some(value.clone());
        Outbox { sends: Vec::new(), decided: Some(value) }
    }
}
