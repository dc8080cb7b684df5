//! The iterative lookup engine: `Search` state plus the pure step functions
//! that drive an alpha-parallel `findNode`/`findValue` lookup.
//!
//! Message dispatch is asynchronous and belongs to the transport, so this
//! module never calls it directly: `iteration_step` computes which messages
//! to send and to whom, and the caller (`crate::dht::Dht`) is responsible for
//! actually sending them and routing replies back into `handle_response`.

use crate::contact::Contact;
use crate::guid::Guid;
use crate::peer_table::PeerTable;
use crate::protocol::{FindNodeMsg, FindResult};
use crate::routing_table::RoutingTable;
use crate::value_store::Payload;
use crate::{DhtError, Result, ALPHA};

/// Whether a search is resolving a node or a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupKind {
    FindNode,
    FindValue,
}

/// The terminal result handed to a lookup's caller.
#[derive(Clone, Debug)]
pub enum LookupOutcome {
    FoundValue(Payload),
    FoundNode(Contact),
    /// The search converged (or was a bootstrap with an empty shortlist)
    /// without a direct hit; callers receive the final shortlist.
    Converged(Vec<Contact>),
}

/// Result of [`Search::start`].
pub enum StartOutcome {
    Started(Search),
    /// The lookup resolved without needing an iteration (already-known
    /// active peer, or an empty bootstrap shortlist).
    Immediate(LookupOutcome),
}

/// What an iteration step produced.
pub enum StepOutcome {
    /// Send these `findNode` messages to these contacts.
    Probe(Vec<(Contact, FindNodeMsg)>),
    Done(LookupOutcome),
}

/// What handling an inbound `findNodeResponse` produced.
pub enum ResponseOutcome {
    Done(LookupOutcome),
    /// The shortlist grew; run another iteration. Newly-discovered contacts
    /// not yet in the peer table are listed so the caller can upsert them.
    Continue { to_upsert: Vec<Contact> },
}

/// Order-sensitive tuple equality: two shortlist entries are the same
/// candidate only if address, guid, and nickname all agree (not merely the
/// same *set* of components).
fn tuple_eq(a: &Contact, b: &Contact) -> bool {
    a.address == b.address && a.guid == b.guid && a.nickname == b.nickname
}

/// A single in-flight iterative lookup.
pub struct Search {
    find_id: Guid,
    key: Guid,
    kind: LookupKind,
    shortlist: Vec<Contact>,
    already_contacted: Vec<Contact>,
    active_probes: Vec<Contact>,
    previous_closest: Option<Guid>,
}

impl Search {
    pub fn find_id(&self) -> Guid {
        self.find_id
    }

    pub fn key(&self) -> Guid {
        self.key
    }

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn shortlist(&self) -> &[Contact] {
        &self.shortlist
    }

    pub fn already_contacted(&self) -> &[Contact] {
        &self.already_contacted
    }

    pub fn active_probes(&self) -> &[Contact] {
        &self.active_probes
    }

    /// Begin a lookup: populate the initial shortlist and validate the
    /// request.
    ///
    /// `startup_shortlist`, when given, is adopted as-is; otherwise the
    /// shortlist is populated with the α closest routing-table contacts to
    /// `key` and the target bucket is touched.
    pub fn start(
        kind: LookupKind,
        key: Guid,
        local_guid: Guid,
        routing_table: &mut RoutingTable,
        peer_table: &PeerTable,
        startup_shortlist: Option<Vec<Contact>>,
    ) -> Result<StartOutcome> {
        if kind == LookupKind::FindNode && key == local_guid {
            return Err(DhtError::LookingForYourself);
        }
        Self::start_impl(kind, key, local_guid, routing_table, peer_table, startup_shortlist)
    }

    /// Begin the self-targeted lookup a node runs once at `join` time to
    /// populate its routing table from a seed list. Unlike [`Search::start`],
    /// a `key == local_guid` lookup is the whole point here rather than a
    /// caller error.
    pub fn start_join(
        local_guid: Guid,
        routing_table: &mut RoutingTable,
        peer_table: &PeerTable,
        seeds: Vec<Contact>,
    ) -> Result<StartOutcome> {
        Self::start_impl(
            LookupKind::FindNode,
            local_guid,
            local_guid,
            routing_table,
            peer_table,
            Some(seeds),
        )
    }

    fn start_impl(
        kind: LookupKind,
        key: Guid,
        local_guid: Guid,
        routing_table: &mut RoutingTable,
        peer_table: &PeerTable,
        startup_shortlist: Option<Vec<Contact>>,
    ) -> Result<StartOutcome> {
        if kind == LookupKind::FindNode && key != local_guid {
            if let Some(active) = peer_table.get_by_guid(&key) {
                return Ok(StartOutcome::Immediate(LookupOutcome::FoundNode(
                    active.clone(),
                )));
            }
        }

        let shortlist = match startup_shortlist {
            Some(list) => list,
            None => {
                routing_table.touch(&key);
                routing_table.find_close_nodes(&key, ALPHA, &local_guid)
            }
        };

        if shortlist.is_empty() {
            return Ok(StartOutcome::Immediate(LookupOutcome::Converged(
                Vec::new(),
            )));
        }

        Ok(StartOutcome::Started(Search {
            find_id: Guid::random(),
            key,
            kind,
            shortlist,
            already_contacted: Vec::new(),
            active_probes: Vec::new(),
            previous_closest: None,
        }))
    }

    fn dedupe_shortlist(&mut self) {
        let mut seen: Vec<Contact> = Vec::with_capacity(self.shortlist.len());
        self.shortlist.retain(|c| {
            if seen.iter().any(|s| tuple_eq(s, c)) {
                false
            } else {
                seen.push(c.clone());
                true
            }
        });
    }

    /// `_searchIteration`: re-sort, dedupe, and dispatch up to α probes to
    /// not-yet-contacted shortlist candidates.
    pub fn iteration_step(
        &mut self,
        local_contact: &Contact,
        routing_table: &RoutingTable,
        peer_table: &mut PeerTable,
    ) -> StepOutcome {
        let slow_node_count = self.active_probes.len();
        tracing::debug!(
            find_id = %self.find_id,
            slow_node_count,
            "starting search iteration"
        );

        peer_table.sort_by_distance(&self.key);
        self.dedupe_shortlist();
        self.shortlist
            .sort_by_key(|c| c.guid.distance(&self.key));

        self.previous_closest = self.shortlist.first().map(|c| c.guid);

        let mut probes = Vec::new();
        for candidate in self.shortlist.clone() {
            if probes.len() >= ALPHA {
                break;
            }
            if candidate.guid == local_contact.guid {
                continue;
            }
            if self
                .already_contacted
                .iter()
                .any(|c| c.guid == candidate.guid)
            {
                continue;
            }

            let resolved = match routing_table.get(&candidate.guid) {
                Some(c) => c.clone(),
                None => {
                    tracing::debug!(
                        guid = %candidate.guid,
                        "shortlist candidate has no route, skipping"
                    );
                    continue;
                }
            };

            self.active_probes.push(resolved.clone());
            self.already_contacted.push(resolved.clone());

            let msg = FindNodeMsg {
                sender_guid: local_contact.guid,
                sender_nick: local_contact.nickname.clone(),
                uri: local_contact.address.clone(),
                pubkey: local_contact.public_key.clone(),
                key: self.key,
                find_value: matches!(self.kind, LookupKind::FindValue),
                find_id: self.find_id,
            };
            probes.push((resolved, msg));
        }

        if probes.is_empty() {
            StepOutcome::Done(LookupOutcome::Converged(self.shortlist.clone()))
        } else {
            StepOutcome::Probe(probes)
        }
    }

    /// `extendShortlist`: merge newly-learned candidates in, skipping self
    /// and exact duplicates; returns those not already an active peer so the
    /// caller can upsert them.
    fn extend_shortlist(
        &mut self,
        local_guid: &Guid,
        peer_table: &PeerTable,
        nodes: Vec<Contact>,
    ) -> Vec<Contact> {
        let mut to_upsert = Vec::new();
        for node in nodes {
            if node.guid == *local_guid {
                continue;
            }
            if self.shortlist.iter().any(|c| tuple_eq(c, &node)) {
                continue;
            }
            if peer_table.get_by_guid(&node.guid).is_none() {
                to_upsert.push(node.clone());
            }
            self.shortlist.push(node);
        }
        to_upsert
    }

    /// Handle an inbound `findNodeResponse` for this search's `find_id`.
    pub fn handle_response(
        &mut self,
        from: &Contact,
        result: FindResult,
        local_guid: &Guid,
        peer_table: &mut PeerTable,
    ) -> ResponseOutcome {
        self.active_probes.retain(|c| c.guid != from.guid);
        if !self
            .already_contacted
            .iter()
            .any(|c| c.guid == from.guid)
        {
            self.already_contacted.push(from.clone());
        }

        match result {
            FindResult::FoundKey(payload) => {
                ResponseOutcome::Done(LookupOutcome::FoundValue(payload))
            }
            FindResult::FoundNode(node) => {
                let contact = Contact::new(node.guid, node.address, node.pubkey);
                ResponseOutcome::Done(LookupOutcome::FoundNode(contact))
            }
            FindResult::FoundNodes(nodes) => {
                let candidates: Vec<Contact> = nodes
                    .into_iter()
                    .filter(|n| n.guid != *local_guid)
                    .map(|n| {
                        let mut c = Contact::new(n.guid, n.address, n.pubkey);
                        if let Some(nick) = n.nickname {
                            c = c.with_nickname(nick);
                        }
                        c
                    })
                    .collect();

                let before = self.shortlist.len();
                let to_upsert = self.extend_shortlist(local_guid, peer_table, candidates);
                let grew = self.shortlist.len() > before;

                if grew {
                    ResponseOutcome::Continue { to_upsert }
                } else {
                    ResponseOutcome::Done(LookupOutcome::Converged(self.shortlist.clone()))
                }
            }
        }
    }
}
