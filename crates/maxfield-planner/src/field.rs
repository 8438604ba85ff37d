//! Recursive field subdivision.
//!
//! A [`FieldNode`] is a triangle of portals with `vertices[0]` as its anchor.
//! Splitting on an interior pivot yields three children: the exterior child
//! anchored on the pivot and facing the anchor's opposite edge, and two
//! inner children sharing the anchor. Links are laid down in an order that
//! lets every field be closed by a single agent without throwing a link out
//! from under an existing field.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::trace;

use field_kernel::{Field, FieldId, LinkGraph, PlanError, PortalId, PortalSet};

/// Why an attempt to lay down a field tree was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub enum DeadEnd {
    /// A required link found no outbound slot at either end.
    Capacity(PlanError),
    /// Both anchor edges already exist, so the field would be closed early.
    ClosedByNeighbour,
    /// The attempt used up its pivot rollbacks.
    RollbacksExhausted,
}

impl From<PlanError> for DeadEnd {
    fn from(err: PlanError) -> Self {
        DeadEnd::Capacity(err)
    }
}

/// Mutable state threaded through one build attempt.
pub struct BuildContext<'a> {
    pub portals: &'a PortalSet,
    pub graph: &'a mut LinkGraph,
    pub rng: &'a mut ChaCha8Rng,
    /// Candidate pivots tried per sub-triangle.
    pub pivot_retries: usize,
    pub rollbacks_left: usize,
}

#[derive(Debug, Clone)]
pub struct FieldNode {
    pub vertices: [PortalId; 3],
    pub exterior: bool,
    /// Portals strictly inside the triangle.
    pub contents: Vec<PortalId>,
    /// Empty, or exactly three children after a split.
    pub children: Vec<FieldNode>,
}

impl FieldNode {
    /// A field on `vertices` whose contents are drawn from `candidates`.
    pub fn new(
        vertices: [PortalId; 3],
        exterior: bool,
        candidates: &[PortalId],
        portals: &PortalSet,
    ) -> Self {
        let contents = candidates
            .iter()
            .copied()
            .filter(|&p| portals.is_inside(p, vertices))
            .collect();
        Self {
            vertices,
            exterior,
            contents,
            children: Vec::new(),
        }
    }

    fn split(&mut self, pivot: PortalId, portals: &PortalSet) {
        let [v0, v1, v2] = self.vertices;
        self.children = vec![
            FieldNode::new([pivot, v1, v2], true, &self.contents, portals),
            FieldNode::new([v0, v1, pivot], false, &self.contents, portals),
            FieldNode::new([v0, v2, pivot], false, &self.contents, portals),
        ];
    }

    /// Lay down every link of this field except the two anchor ("jet") links.
    ///
    /// Interior fields are split on a random pivot. When the subtree under a
    /// pivot cannot be built, the graph is rolled back and another pivot is
    /// tried, up to `pivot_retries` candidates.
    pub fn build_links(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), DeadEnd> {
        let [v0, v1, v2] = self.vertices;
        if ctx.graph.has_link(v0, v1) && ctx.graph.has_link(v0, v2) {
            return Err(DeadEnd::ClosedByNeighbour);
        }

        self.children.clear();
        if self.contents.is_empty() {
            ctx.graph.add_link(v2, v1, true)?;
            return Ok(());
        }

        let mut pivots = self.contents.clone();
        pivots.shuffle(&mut *ctx.rng);
        pivots.truncate(ctx.pivot_retries.max(1));

        let checkpoint = ctx.graph.len();
        let mut last = DeadEnd::RollbacksExhausted;
        for pivot in pivots {
            self.split(pivot, ctx.portals);
            match self.build_children(ctx) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    trace!(pivot, ?err, "Rolling back pivot");
                    ctx.graph.truncate(checkpoint);
                    self.children.clear();
                    if ctx.rollbacks_left == 0 {
                        return Err(DeadEnd::RollbacksExhausted);
                    }
                    ctx.rollbacks_left -= 1;
                    last = err;
                }
            }
        }
        Err(last)
    }

    fn build_children(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), DeadEnd> {
        let [outer, left, right] = self.children.as_mut_slice() else {
            return Ok(());
        };
        outer.build_links(ctx)?;
        outer.build_final_links(ctx)?;
        left.build_links(ctx)?;
        right.build_links(ctx)
    }

    /// Lay down the anchor links that close this field and its inner children.
    pub fn build_final_links(&self, ctx: &mut BuildContext<'_>) -> Result<(), DeadEnd> {
        let [v0, v1, v2] = self.vertices;
        if self.exterior {
            ctx.graph.add_link(v1, v0, true)?;
            ctx.graph.add_link(v2, v0, true)?;
        } else {
            ctx.graph.add_link(v0, v1, false)?;
            ctx.graph.add_link(v0, v2, false)?;
        }
        if let [_, left, right] = self.children.as_slice() {
            left.build_final_links(ctx)?;
            right.build_final_links(ctx)?;
        }
        Ok(())
    }

    /// Append this tree to `out` in pre-order, returning this node's id.
    pub fn flatten(
        &self,
        graph: &LinkGraph,
        parent: Option<FieldId>,
        depth: usize,
        out: &mut Vec<Field>,
    ) -> Result<FieldId, PlanError> {
        let [v0, v1, v2] = self.vertices;
        let mut links = [0; 3];
        for (slot, (a, b)) in links.iter_mut().zip([(v0, v1), (v0, v2), (v1, v2)]) {
            *slot = graph
                .link_between(a, b)
                .map(|link| link.id)
                .ok_or_else(|| {
                    PlanError::InvalidGeometry(format!(
                        "field {:?} is missing its link between {a} and {b}",
                        self.vertices
                    ))
                })?;
        }
        let completing_link = links.iter().copied().max().unwrap_or_default();

        let id = out.len();
        out.push(Field {
            id,
            vertices: self.vertices,
            links,
            completing_link,
            exterior: self.exterior,
            parent,
            children: Vec::with_capacity(self.children.len()),
            contents: self.contents.clone(),
            depth,
        });
        for child in &self.children {
            let child_id = child.flatten(graph, Some(id), depth + 1, out)?;
            out[id].children.push(child_id);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_kernel::{LinkLimits, Portal};

    fn triangle_with_interior() -> PortalSet {
        PortalSet::new(vec![
            Portal::new("A", 0.0, 0.0),
            Portal::new("B", 0.0, 0.02),
            Portal::new("C", 0.02, 0.01),
            Portal::new("D", 0.006, 0.01),
            Portal::new("E", 0.01, 0.009),
        ])
        .unwrap()
    }

    fn build(
        set: &PortalSet,
        limits: LinkLimits,
        seed: u64,
    ) -> (Result<(), DeadEnd>, FieldNode, LinkGraph) {
        let all: Vec<PortalId> = (0..set.len()).collect();
        let mut root = FieldNode::new([0, 1, 2], true, &all, set);
        let mut graph = LinkGraph::new(set, &limits);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut ctx = BuildContext {
            portals: set,
            graph: &mut graph,
            rng: &mut rng,
            pivot_retries: 3,
            rollbacks_left: 16,
        };
        let result = root
            .build_links(&mut ctx)
            .and_then(|()| root.build_final_links(&mut ctx));
        (result, root, graph)
    }

    #[test]
    fn test_contents_are_strict_interior() {
        let set = triangle_with_interior();
        let all: Vec<PortalId> = (0..set.len()).collect();
        let node = FieldNode::new([0, 1, 2], true, &all, &set);
        assert_eq!(node.contents, vec![3, 4]);
    }

    #[test]
    fn test_leaf_field_makes_three_links() {
        let set = triangle_with_interior();
        let mut root = FieldNode::new([0, 1, 2], true, &[], &set);
        let mut graph = LinkGraph::new(&set, &LinkLimits::default());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = BuildContext {
            portals: &set,
            graph: &mut graph,
            rng: &mut rng,
            pivot_retries: 3,
            rollbacks_left: 0,
        };
        root.build_links(&mut ctx).unwrap();
        root.build_final_links(&mut ctx).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.links()[0].origin, 2);
        assert!(graph.links()[1..].iter().all(|l| l.destination == 0));
    }

    #[test]
    fn test_split_tree_fields_every_portal() {
        let set = triangle_with_interior();
        for seed in 0..8 {
            let (result, root, graph) = build(&set, LinkLimits::default(), seed);
            result.unwrap();
            // Two interior portals: 3 + 3 + 3 links, 1 + 3 + 3 fields
            assert_eq!(graph.len(), 9);

            let mut fields = Vec::new();
            root.flatten(&graph, None, 0, &mut fields).unwrap();
            assert_eq!(fields.len(), 7);
            assert_eq!(fields[0].children.len(), 3);
            for field in &fields {
                let max = field.links.iter().copied().max().unwrap();
                assert_eq!(field.completing_link, max);
                if field.children.is_empty() {
                    assert!(field.contents.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_closed_by_neighbour_is_a_dead_end() {
        let set = triangle_with_interior();
        let mut graph = LinkGraph::new(&set, &LinkLimits::default());
        graph.add_link(0, 1, false).unwrap();
        graph.add_link(2, 0, false).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut ctx = BuildContext {
            portals: &set,
            graph: &mut graph,
            rng: &mut rng,
            pivot_retries: 3,
            rollbacks_left: 0,
        };
        let mut node = FieldNode::new([0, 1, 2], false, &[], &set);
        assert_eq!(node.build_links(&mut ctx), Err(DeadEnd::ClosedByNeighbour));
    }

    #[test]
    fn test_starved_capacity_fails_cleanly() {
        let set = triangle_with_interior();
        let limits = LinkLimits {
            normal_out_links: 1,
            boosted_out_links: 1,
        };
        // Fielding 5 portals takes 9 links; 5 portals with one outbound
        // link each can hold at most 5.
        for seed in 0..4 {
            let (result, _, graph) = build(&set, limits, seed);
            assert!(result.is_err(), "seed {seed} built past capacity");
            for p in 0..set.len() {
                assert!(graph.out_degree(p) <= 1);
            }
        }
    }
}
