//! Link arena used while a plan is being generated.
//!
//! Links are stored in creation order, so a rollback is a truncation. At most
//! one link may join any unordered portal pair.

use std::collections::HashMap;

use crate::config::LinkLimits;
use crate::error::PlanError;
use crate::portal::{Link, LinkId, PortalId, PortalSet};

fn pair_key(a: PortalId, b: PortalId) -> (PortalId, PortalId) {
    if a < b { (a, b) } else { (b, a) }
}

/// Directed link graph with per-portal outbound capacity.
#[derive(Debug, Clone)]
pub struct LinkGraph {
    links: Vec<Link>,
    capacity: Vec<usize>,
    out_degree: Vec<usize>,
    in_degree: Vec<usize>,
    by_pair: HashMap<(PortalId, PortalId), LinkId>,
}

impl LinkGraph {
    pub fn new(portals: &PortalSet, limits: &LinkLimits) -> Self {
        let n = portals.len();
        Self {
            links: Vec::new(),
            capacity: (0..n).map(|p| portals.max_out_links(p, limits)).collect(),
            out_degree: vec![0; n],
            in_degree: vec![0; n],
            by_pair: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Links in creation order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn into_links(self) -> Vec<Link> {
        self.links
    }

    pub fn has_link(&self, a: PortalId, b: PortalId) -> bool {
        self.by_pair.contains_key(&pair_key(a, b))
    }

    /// The link joining `a` and `b` in either direction.
    pub fn link_between(&self, a: PortalId, b: PortalId) -> Option<&Link> {
        self.by_pair.get(&pair_key(a, b)).map(|&id| &self.links[id])
    }

    pub fn out_degree(&self, portal: PortalId) -> usize {
        self.out_degree[portal]
    }

    pub fn in_degree(&self, portal: PortalId) -> usize {
        self.in_degree[portal]
    }

    pub fn can_add_outbound(&self, portal: PortalId) -> bool {
        self.out_degree[portal] < self.capacity[portal]
    }

    /// Add a link from `from` to `to`, making room if the origin is saturated.
    ///
    /// In order: throw it as asked; throw it backwards if `reversible`; flip
    /// one of `from`'s reversible links to free a slot; if `reversible`, flip
    /// one of `to`'s reversible links and throw it backwards. Existing pairs
    /// are left untouched.
    pub fn add_link(
        &mut self,
        from: PortalId,
        to: PortalId,
        reversible: bool,
    ) -> Result<(), PlanError> {
        if from == to {
            return Err(PlanError::InvalidGeometry(format!(
                "link from portal {from} to itself"
            )));
        }
        if self.has_link(from, to) {
            return Ok(());
        }

        if self.can_add_outbound(from) {
            self.push(from, to, reversible);
            return Ok(());
        }
        if reversible && self.can_add_outbound(to) {
            self.push(to, from, reversible);
            return Ok(());
        }
        if let Some(id) = self.flippable_outbound(from) {
            self.reverse(id);
            self.push(from, to, reversible);
            return Ok(());
        }
        if reversible && let Some(id) = self.flippable_outbound(to) {
            self.reverse(id);
            self.push(to, from, reversible);
            return Ok(());
        }

        Err(PlanError::ResourceExceeded {
            portal: from,
            limit: self.capacity[from],
        })
    }

    /// Drop every link created after the first `len`.
    ///
    /// Reversals applied to surviving links are kept; they remain valid.
    pub fn truncate(&mut self, len: usize) {
        while self.links.len() > len {
            if let Some(link) = self.links.pop() {
                self.out_degree[link.origin] -= 1;
                self.in_degree[link.destination] -= 1;
                self.by_pair.remove(&pair_key(link.origin, link.destination));
            }
        }
    }

    fn push(&mut self, origin: PortalId, destination: PortalId, reversible: bool) {
        let id = self.links.len();
        self.links.push(Link {
            id,
            origin,
            destination,
            reversible,
        });
        self.out_degree[origin] += 1;
        self.in_degree[destination] += 1;
        self.by_pair.insert(pair_key(origin, destination), id);
    }

    fn flippable_outbound(&self, portal: PortalId) -> Option<LinkId> {
        self.links
            .iter()
            .find(|l| l.origin == portal && l.reversible && self.can_add_outbound(l.destination))
            .map(|l| l.id)
    }

    fn reverse(&mut self, id: LinkId) {
        let link = &mut self.links[id];
        self.out_degree[link.origin] -= 1;
        self.in_degree[link.destination] -= 1;
        std::mem::swap(&mut link.origin, &mut link.destination);
        self.out_degree[link.origin] += 1;
        self.in_degree[link.destination] += 1;
    }
}
