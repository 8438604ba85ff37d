//! Link precedence and ordering.
//!
//! The precedence relation says which links must exist before another link
//! may be thrown. The sequencer linearizes it greedily, then shortens the
//! single-agent walk by moving blocks of links while keeping every
//! precedence edge pointing forward.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use field_kernel::{
    FieldId, Link, LinkId, PlanError, PortalId, PortalSet, SequencerConfig, TravelAnchor,
};

use crate::plan::Plan;

/// Strict partial order over a plan's links, as index-based edge lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedenceGraph {
    predecessors: Vec<Vec<LinkId>>,
    successors: Vec<Vec<LinkId>>,
}

impl PrecedenceGraph {
    /// Derive the relation from the plan's field structure.
    ///
    /// The link completing a field waits for the field's other links (the
    /// link opposite the anchor only, for exterior fields), and for every
    /// link thrown from a portal inside the field.
    pub fn from_plan(plan: &Plan) -> Self {
        let n = plan.links.len();
        let mut predecessors: Vec<Vec<LinkId>> = vec![Vec::new(); n];

        let mut outbound: Vec<Vec<LinkId>> = Vec::new();
        for link in &plan.links {
            if outbound.len() <= link.origin {
                outbound.resize(link.origin + 1, Vec::new());
            }
            outbound[link.origin].push(link.id);
        }

        for field in &plan.fields {
            let completing = field.completing_link;
            let deps = &mut predecessors[completing];
            if !field.exterior {
                deps.extend(field.links.iter().copied().filter(|&l| l != completing));
            } else if !field.children.is_empty() {
                let [anchor, _, _] = field.vertices;
                deps.extend(
                    field
                        .links
                        .iter()
                        .copied()
                        .filter(|&l| l != completing && !plan.links[l].touches(anchor)),
                );
            }
            for &portal in &field.contents {
                if let Some(links) = outbound.get(portal) {
                    deps.extend(links.iter().copied());
                }
            }
        }

        let mut successors: Vec<Vec<LinkId>> = vec![Vec::new(); n];
        for (link, deps) in predecessors.iter_mut().enumerate() {
            deps.sort_unstable();
            deps.dedup();
            deps.retain(|&d| d != link);
            for &d in deps.iter() {
                successors[d].push(link);
            }
        }
        Self {
            predecessors,
            successors,
        }
    }

    pub fn len(&self) -> usize {
        self.predecessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predecessors.is_empty()
    }

    pub fn predecessors(&self, link: LinkId) -> &[LinkId] {
        &self.predecessors[link]
    }

    pub fn successors(&self, link: LinkId) -> &[LinkId] {
        &self.successors[link]
    }

    /// Every `(before, after)` pair.
    pub fn edges(&self) -> impl Iterator<Item = (LinkId, LinkId)> + '_ {
        self.predecessors
            .iter()
            .enumerate()
            .flat_map(|(after, deps)| deps.iter().map(move |&before| (before, after)))
    }
}

/// A concrete creation order for a plan's links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    /// Link ids in creation order.
    pub order: Vec<LinkId>,
    /// Position of each link in `order`, indexed by link id.
    pub position: Vec<usize>,
    /// Per position: the link could be thrown earlier without breaking precedence.
    pub early_eligible: Vec<bool>,
    /// Per position: fields that close when the link lands.
    pub completes: Vec<Vec<FieldId>>,
    pub precedence: PrecedenceGraph,
    /// Single-agent walking length of `order` (metres).
    pub walk_length: u64,
}

impl Sequence {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Linearizes a plan's precedence relation.
pub struct LinkSequencer<'a> {
    portals: &'a PortalSet,
    config: SequencerConfig,
    anchor: TravelAnchor,
}

impl<'a> LinkSequencer<'a> {
    pub fn new(portals: &'a PortalSet, config: SequencerConfig, anchor: TravelAnchor) -> Self {
        Self {
            portals,
            config,
            anchor,
        }
    }

    /// Order the plan's links, then refine the order.
    pub fn sequence(&self, plan: &Plan) -> Result<Sequence, PlanError> {
        let precedence = PrecedenceGraph::from_plan(plan);
        let mut order = self.linearize(plan, &precedence)?;

        let before = self.walk_length(&plan.links, &order);
        let mut passes = 0;
        while passes < self.config.reorder_passes
            && self.improve_once(&plan.links, &precedence, &mut order)
        {
            passes += 1;
        }
        let walk_length = self.walk_length(&plan.links, &order);
        debug!(
            links = order.len(),
            passes,
            greedy_length = before,
            walk_length,
            "Sequenced links"
        );

        let mut position = vec![0; order.len()];
        for (pos, &link) in order.iter().enumerate() {
            position[link] = pos;
        }
        let early_eligible = order
            .iter()
            .enumerate()
            .map(|(pos, &link)| {
                let latest = precedence.predecessors(link).iter().map(|&p| position[p]).max();
                match latest {
                    Some(latest) => pos > latest + 1,
                    None => pos > 0,
                }
            })
            .collect();

        let mut completes = vec![Vec::new(); order.len()];
        for field in &plan.fields {
            if let Some(closing) = field.links.iter().map(|&l| position[l]).max() {
                completes[closing].push(field.id);
            }
        }

        Ok(Sequence {
            order,
            position,
            early_eligible,
            completes,
            precedence,
            walk_length,
        })
    }

    fn anchor_of(&self, link: &Link) -> PortalId {
        match self.anchor {
            TravelAnchor::Destination => link.destination,
            TravelAnchor::Origin => link.origin,
        }
    }

    /// Metres walked after making `from` to reach the origin of `to`.
    fn step(&self, links: &[Link], from: LinkId, to: LinkId) -> u64 {
        self.portals
            .distance(self.anchor_of(&links[from]), links[to].origin)
    }

    pub fn walk_length(&self, links: &[Link], order: &[LinkId]) -> u64 {
        order.windows(2).map(|w| self.step(links, w[0], w[1])).sum()
    }

    /// Greedy topological order: among ready links, prefer the one closing
    /// the most fields, then the shortest step from the previous link, then
    /// the lowest id.
    fn linearize(
        &self,
        plan: &Plan,
        precedence: &PrecedenceGraph,
    ) -> Result<Vec<LinkId>, PlanError> {
        let links = &plan.links;
        let n = links.len();

        let mut link_fields: Vec<Vec<FieldId>> = vec![Vec::new(); n];
        for field in &plan.fields {
            for &l in &field.links {
                link_fields[l].push(field.id);
            }
        }
        let mut missing: Vec<u8> = vec![3; plan.fields.len()];
        let mut waiting: Vec<usize> = (0..n).map(|l| precedence.predecessors(l).len()).collect();
        let mut ready: Vec<LinkId> = (0..n).filter(|&l| waiting[l] == 0).collect();
        let mut scheduled = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut previous: Option<LinkId> = None;

        while order.len() < n {
            let pick = ready
                .iter()
                .enumerate()
                .min_by_key(|&(_, &l)| {
                    let closes = link_fields[l].iter().filter(|&&f| missing[f] == 1).count();
                    let step = previous.map_or(0, |p| self.step(links, p, l));
                    (std::cmp::Reverse(closes), step, l)
                })
                .map(|(slot, _)| slot);
            let Some(slot) = pick else {
                return Err(PlanError::CyclicPrecedence {
                    unscheduled: n - order.len(),
                    links: n,
                });
            };
            let link = ready.swap_remove(slot);

            let l = &links[link];
            if let Some(other) = links.iter().find(|o| {
                !scheduled[o.id]
                    && o.id != link
                    && self
                        .portals
                        .links_cross(l.origin, l.destination, o.origin, o.destination)
            }) {
                return Err(PlanError::InvalidGeometry(format!(
                    "link {link} crosses unscheduled link {}",
                    other.id
                )));
            }

            scheduled[link] = true;
            for &f in &link_fields[link] {
                missing[f] -= 1;
            }
            for &next in precedence.successors(link) {
                waiting[next] -= 1;
                if waiting[next] == 0 {
                    ready.push(next);
                }
            }
            order.push(link);
            previous = Some(link);
        }
        Ok(order)
    }

    /// Apply the best improving block move of the smallest block size that
    /// has one. Returns whether the order changed.
    fn improve_once(
        &self,
        links: &[Link],
        precedence: &PrecedenceGraph,
        order: &mut Vec<LinkId>,
    ) -> bool {
        let n = order.len();
        if n < 3 {
            return false;
        }
        let mut position = vec![0; n];
        for (pos, &link) in order.iter().enumerate() {
            position[link] = pos;
        }

        for size in 1..=(n / 4).max(1) {
            for i in 0..=(n - size) {
                let block = &order[i..i + size];
                let in_block = |p: usize| (i..i + size).contains(&p);

                // Earliest and latest insertion points in the order with the
                // block removed.
                let lo = block
                    .iter()
                    .flat_map(|&l| precedence.predecessors(l))
                    .map(|&p| position[p])
                    .filter(|&p| !in_block(p))
                    .max()
                    .map_or(0, |p| p + 1);
                let hi = block
                    .iter()
                    .flat_map(|&l| precedence.successors(l))
                    .map(|&s| position[s])
                    .filter(|&p| !in_block(p))
                    .min()
                    .map_or(n - size, |p| p - size);

                let mut best: Option<(i64, usize)> = None;
                for k in lo..=hi {
                    if k == i {
                        continue;
                    }
                    let delta = self.move_delta(links, order, i, size, k);
                    if delta < 0 && best.is_none_or(|(d, _)| delta < d) {
                        best = Some((delta, k));
                    }
                }

                if let Some((delta, k)) = best {
                    trace!(block = i, size, to = k, delta, "Moving link block");
                    let moved: Vec<LinkId> = order.drain(i..i + size).collect();
                    order.splice(k..k, moved);
                    return true;
                }
            }
        }
        false
    }

    /// Change in walk length from moving `order[i..i + size]` so it starts
    /// at index `k` of the order with the block removed.
    fn move_delta(&self, links: &[Link], order: &[LinkId], i: usize, size: usize, k: usize) -> i64 {
        let n = order.len();
        let step = |a: LinkId, b: LinkId| self.step(links, a, b) as i64;
        let first = order[i];
        let last = order[i + size - 1];
        // The order with the block removed
        let rest = |idx: usize| if idx < i { order[idx] } else { order[idx + size] };
        let rest_len = n - size;

        let mut delta = 0;
        if i > 0 {
            delta -= step(order[i - 1], first);
        }
        if i + size < n {
            delta -= step(last, order[i + size]);
        }
        if i > 0 && i + size < n {
            delta += step(order[i - 1], order[i + size]);
        }

        if k > 0 && k < rest_len {
            delta -= step(rest(k - 1), rest(k));
        }
        if k > 0 {
            delta += step(rest(k - 1), first);
        }
        if k < rest_len {
            delta += step(last, rest(k));
        }
        delta
    }
}
