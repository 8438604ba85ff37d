//! Plans and their scores.
//!
//! A [`Plan`] is the link and field set produced by one generator trial,
//! with its derived aggregates. Plans are compared by [`PlanScore`], a total
//! order, so the best of many trials does not depend on completion order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use field_kernel::{
    Field, FieldId, Link, LinkLimits, PlanError, PortalId, PortalSet, ScoringConfig,
};

/// Namespace UUID for deterministic plan ids.
const PLAN_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3c, 0x51, 0x9e, 0x0b, 0x6d, 0x24, 0x5f, 0x8a, 0xa1, 0x7e, 0x42, 0xc9, 0x13, 0x08, 0xbd, 0x66,
]);

/// Deterministic id of the plan built by `trial` under `seed`.
pub fn plan_id(seed: u64, trial: u64) -> Uuid {
    Uuid::new_v5(&PLAN_NAMESPACE, format!("plan:{seed}:{trial}").as_bytes())
}

/// AP earned by a plan, by source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApBreakdown {
    pub portals: u64,
    pub links: u64,
    pub fields: u64,
}

impl ApBreakdown {
    pub fn compute(portals: usize, links: usize, fields: usize, scoring: &ScoringConfig) -> Self {
        Self {
            portals: portals as u64 * scoring.ap_per_portal,
            links: links as u64 * scoring.ap_per_link,
            fields: fields as u64 * scoring.ap_per_field,
        }
    }

    pub fn total(&self) -> u64 {
        self.portals + self.links + self.fields
    }
}

/// Keys a portal needs against the keys already in hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequirement {
    pub portal: PortalId,
    pub name: String,
    pub needed: u32,
    pub have: u32,
    /// Keys still to farm before the operation.
    pub remaining: u32,
}

/// One trial's complete link and field set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub seed: u64,
    pub trial: u64,
    /// Links in creation order; `links[i].id == i`.
    pub links: Vec<Link>,
    /// Fields in pre-order of their trees.
    pub fields: Vec<Field>,
    /// Roots of the first-generation field trees.
    pub roots: Vec<FieldId>,
    /// Portals no link touches.
    pub unused: Vec<PortalId>,
    pub ap: ApBreakdown,
    /// Incoming links per portal, indexed by portal id.
    pub keys_needed: Vec<u32>,
    pub max_keys: u32,
    /// Single-agent walk of the sequenced links from the travel anchor
    /// (metres); zero until the plan has been sequenced.
    pub walk_length: u64,
}

impl Plan {
    pub fn new(
        portals: &PortalSet,
        scoring: &ScoringConfig,
        seed: u64,
        trial: u64,
        links: Vec<Link>,
        fields: Vec<Field>,
        roots: Vec<FieldId>,
    ) -> Self {
        let mut keys_needed = vec![0u32; portals.len()];
        let mut touched = vec![false; portals.len()];
        for link in &links {
            keys_needed[link.destination] += 1;
            touched[link.origin] = true;
            touched[link.destination] = true;
        }
        let unused: Vec<PortalId> = (0..portals.len()).filter(|&p| !touched[p]).collect();
        let used = portals.len() - unused.len();

        Self {
            id: plan_id(seed, trial),
            seed,
            trial,
            ap: ApBreakdown::compute(used, links.len(), fields.len(), scoring),
            max_keys: keys_needed.iter().copied().max().unwrap_or(0),
            keys_needed,
            unused,
            walk_length: 0,
            links,
            fields,
            roots,
        }
    }

    pub fn total_ap(&self) -> u64 {
        self.ap.total()
    }

    pub fn score(&self) -> PlanScore {
        PlanScore {
            ap: self.total_ap(),
            fields: self.fields.len(),
            max_keys: self.max_keys,
            links: self.links.len(),
            walk_length: self.walk_length,
            trial: self.trial,
        }
    }

    /// Key needs of every used portal, sorted by portal name.
    pub fn key_requirements(&self, portals: &PortalSet) -> Vec<KeyRequirement> {
        let mut reqs: Vec<KeyRequirement> = portals
            .portals()
            .iter()
            .filter(|p| !self.unused.contains(&p.id))
            .map(|p| {
                let needed = self.keys_needed[p.id];
                KeyRequirement {
                    portal: p.id,
                    name: p.name.clone(),
                    needed,
                    have: p.keys,
                    remaining: needed.saturating_sub(p.keys),
                }
            })
            .collect();
        reqs.sort_by(|a, b| a.name.cmp(&b.name));
        reqs
    }

    /// Fields whose completing link is `link`.
    pub fn fields_completed_by(&self, link: usize) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.completing_link == link)
    }

    /// Check every structural invariant a generated plan must hold.
    pub fn validate(&self, portals: &PortalSet, limits: &LinkLimits) -> Result<(), PlanError> {
        let fault = |msg: String| Err(PlanError::InvalidGeometry(msg));

        let mut out_degree = vec![0usize; portals.len()];
        for (idx, link) in self.links.iter().enumerate() {
            if link.id != idx {
                return fault(format!("link at position {idx} has id {}", link.id));
            }
            if link.origin == link.destination {
                return fault(format!("link {idx} starts and ends at portal {}", link.origin));
            }
            out_degree[link.origin] += 1;
        }
        for (portal, &degree) in out_degree.iter().enumerate() {
            let limit = portals.max_out_links(portal, limits);
            if degree > limit {
                return fault(format!(
                    "portal {portal} has {degree} outbound links, limit {limit}"
                ));
            }
        }

        for (i, a) in self.links.iter().enumerate() {
            for b in &self.links[i + 1..] {
                if a.joins(b.origin, b.destination) {
                    return fault(format!("links {} and {} join the same portals", a.id, b.id));
                }
                if portals.links_cross(a.origin, a.destination, b.origin, b.destination) {
                    return fault(format!("links {} and {} cross", a.id, b.id));
                }
            }
        }

        for field in &self.fields {
            let [v0, v1, v2] = field.vertices;
            for (&id, (a, b)) in field.links.iter().zip([(v0, v1), (v0, v2), (v1, v2)]) {
                match self.links.get(id) {
                    Some(link) if link.joins(a, b) => {}
                    _ => {
                        return fault(format!(
                            "field {} has no link between {a} and {b}",
                            field.id
                        ));
                    }
                }
            }
            let covered: Vec<PortalId> = field
                .children
                .iter()
                .flat_map(|&c| {
                    let child = &self.fields[c];
                    child.vertices.iter().chain(child.contents.iter()).copied()
                })
                .collect();
            for portal in 0..portals.len() {
                if portals.is_inside(portal, field.vertices) && !covered.contains(&portal) {
                    return fault(format!(
                        "portal {portal} lies inside field {} but no smaller field uses it",
                        field.id
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Comparison key for plans; the greater score is the better plan.
///
/// Higher total AP wins, then more fields, then fewer keys at the busiest
/// portal, then fewer links, then a shorter walk. The lower trial index
/// breaks any remaining tie, which makes the order total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanScore {
    pub ap: u64,
    pub fields: usize,
    pub max_keys: u32,
    pub links: usize,
    pub walk_length: u64,
    pub trial: u64,
}

impl Ord for PlanScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ap
            .cmp(&other.ap)
            .then(self.fields.cmp(&other.fields))
            .then(other.max_keys.cmp(&self.max_keys))
            .then(other.links.cmp(&self.links))
            .then(other.walk_length.cmp(&self.walk_length))
            .then(other.trial.cmp(&self.trial))
    }
}

impl PartialOrd for PlanScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use field_kernel::Portal;

    fn triangle() -> PortalSet {
        PortalSet::new(vec![
            Portal::new("Alpha", 0.0, 0.0).with_keys(1),
            Portal::new("Bravo", 0.0, 0.01),
            Portal::new("Charlie", 0.01, 0.005),
            Portal::new("Far", 1.0, 1.0),
        ])
        .unwrap()
    }

    fn link(id: usize, origin: PortalId, destination: PortalId) -> Link {
        Link {
            id,
            origin,
            destination,
            reversible: false,
        }
    }

    fn one_field_plan(set: &PortalSet) -> Plan {
        let links = vec![link(0, 2, 1), link(1, 1, 0), link(2, 2, 0)];
        let fields = vec![Field {
            id: 0,
            vertices: [0, 1, 2],
            links: [1, 2, 0],
            completing_link: 2,
            exterior: true,
            parent: None,
            children: vec![],
            contents: vec![],
            depth: 0,
        }];
        Plan::new(set, &ScoringConfig::default(), 7, 0, links, fields, vec![0])
    }

    #[test]
    fn test_aggregates() {
        let set = triangle();
        let plan = one_field_plan(&set);
        assert_eq!(plan.unused, vec![3]);
        assert_eq!(plan.total_ap(), 3 * 1750 + 3 * 313 + 1250);
        assert_eq!(plan.keys_needed, vec![2, 1, 0, 0]);
        assert_eq!(plan.max_keys, 2);
        assert!(plan.validate(&set, &LinkLimits::default()).is_ok());
    }

    #[test]
    fn test_scoring_ignores_link_order() {
        use crate::generator::PlanGenerator;
        use crate::scenario::{PortalScenario, PortalScenarioConfig};
        use field_kernel::PlannerConfig;

        let set = PortalSet::new(PortalScenario::new(PortalScenarioConfig::medium(), 4).generate())
            .unwrap();
        let config = PlannerConfig::default();
        let plan = PlanGenerator::new(&set, &config).generate(4, 0).unwrap();

        let mut links = plan.links.clone();
        links.reverse();
        let mut fields = plan.fields.clone();
        let mid = fields.len() / 2;
        fields.rotate_left(mid);
        let rebuilt = Plan::new(
            &set,
            &config.scoring,
            plan.seed,
            plan.trial,
            links,
            fields,
            plan.roots.clone(),
        );

        assert_eq!(rebuilt.ap, plan.ap);
        assert_eq!(rebuilt.keys_needed, plan.keys_needed);
        assert_eq!(rebuilt.max_keys, plan.max_keys);
        assert_eq!(rebuilt.unused, plan.unused);
        assert_eq!(rebuilt.score(), plan.score());
    }

    #[test]
    fn test_key_requirements_sorted_by_name() {
        let set = triangle();
        let plan = one_field_plan(&set);
        let reqs = plan.key_requirements(&set);
        let names: Vec<&str> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Bravo", "Charlie"]);
        assert_eq!(reqs[0].needed, 2);
        assert_eq!(reqs[0].have, 1);
        assert_eq!(reqs[0].remaining, 1);
        assert_eq!(reqs[2].remaining, 0);
    }

    #[test]
    fn test_validate_rejects_capacity_overrun() {
        let set = triangle();
        let plan = one_field_plan(&set);
        let limits = LinkLimits {
            normal_out_links: 1,
            boosted_out_links: 1,
        };
        assert!(matches!(
            plan.validate(&set, &limits),
            Err(PlanError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_validate_rejects_unfielded_interior_portal() {
        let set = PortalSet::new(vec![
            Portal::new("A", 0.0, 0.0),
            Portal::new("B", 0.0, 0.02),
            Portal::new("C", 0.02, 0.01),
            Portal::new("Inside", 0.005, 0.01),
        ])
        .unwrap();
        let plan = one_field_plan(&set);
        assert!(plan.validate(&set, &LinkLimits::default()).is_err());
    }

    #[test]
    fn test_score_order() {
        let base = PlanScore {
            ap: 10_000,
            fields: 4,
            max_keys: 3,
            links: 9,
            walk_length: 500,
            trial: 2,
        };
        let more_ap = PlanScore { ap: 10_001, ..base };
        let fewer_keys = PlanScore { max_keys: 2, ..base };
        let earlier = PlanScore { trial: 1, ..base };
        assert!(more_ap > base);
        assert!(fewer_keys > base);
        assert!(earlier > base);
        assert_eq!([base, earlier, more_ap].iter().max(), Some(&more_ap));
    }

    #[test]
    fn test_plan_id_is_deterministic() {
        assert_eq!(plan_id(1, 2), plan_id(1, 2));
        assert_ne!(plan_id(1, 2), plan_id(1, 3));
    }
}
