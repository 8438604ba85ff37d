//! Portal, link and field records: the nodes and edges every plan is built from.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::LinkLimits;
use crate::error::PlanError;
use crate::geometry::{self, LatLng, Point};

/// Dense index of a portal within its [`PortalSet`].
pub type PortalId = usize;

/// Index of a link within a plan, in creation order.
pub type LinkId = usize;

/// Index of a field within a plan.
pub type FieldId = usize;

/// A fixed geographic point that links are thrown between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portal {
    /// Reassigned to the load position by [`PortalSet::new`].
    #[serde(default)]
    pub id: PortalId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Keys already in the team's inventory.
    #[serde(default)]
    pub keys: u32,
    /// Fully deployed link amps raise the outbound link capacity.
    #[serde(default)]
    pub boosted: bool,
}

impl Portal {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            latitude,
            longitude,
            keys: 0,
            boosted: false,
        }
    }

    pub fn with_keys(mut self, keys: u32) -> Self {
        self.keys = keys;
        self
    }

    pub fn boosted(mut self) -> Self {
        self.boosted = true;
        self
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Outbound link capacity of this portal.
    pub fn max_out_links(&self, limits: &LinkLimits) -> usize {
        if self.boosted {
            limits.boosted_out_links
        } else {
            limits.normal_out_links
        }
    }
}

/// A directed link from `origin` to `destination`.
///
/// Creating it spends one key of the destination and one outbound slot of
/// the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub origin: PortalId,
    pub destination: PortalId,
    /// Whether the generator was free to throw this link in either direction.
    pub reversible: bool,
}

impl Link {
    /// Whether this link joins `a` and `b`, in either direction.
    pub fn joins(&self, a: PortalId, b: PortalId) -> bool {
        (self.origin == a && self.destination == b) || (self.origin == b && self.destination == a)
    }

    pub fn touches(&self, portal: PortalId) -> bool {
        self.origin == portal || self.destination == portal
    }
}

/// A triangle closed by three links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    /// `vertices[0]` is the anchor the field was built from.
    pub vertices: [PortalId; 3],
    /// The three links bounding the field.
    pub links: [LinkId; 3],
    /// The latest-created of `links`; the field scores when it lands.
    pub completing_link: LinkId,
    /// Exterior fields may be closed from any corner.
    pub exterior: bool,
    pub parent: Option<FieldId>,
    pub children: Vec<FieldId>,
    /// Portals strictly inside the triangle.
    pub contents: Vec<PortalId>,
    pub depth: usize,
}

/// The immutable portal collection of one run, with derived geometry.
#[derive(Debug, Clone)]
pub struct PortalSet {
    portals: Vec<Portal>,
    points: Vec<Point>,
    /// Great-circle distances rounded to whole metres.
    distances: Vec<Vec<u64>>,
    hull: Vec<PortalId>,
}

impl PortalSet {
    /// Index portals, drop duplicate coordinates and derive projections,
    /// distances and the convex hull.
    pub fn new(portals: Vec<Portal>) -> Result<Self, PlanError> {
        let mut kept: Vec<Portal> = Vec::with_capacity(portals.len());

        for portal in portals {
            if !portal.position().is_valid() {
                return Err(PlanError::InvalidInput(format!(
                    "portal '{}' has invalid coordinates ({}, {})",
                    portal.name, portal.latitude, portal.longitude
                )));
            }
            if kept.iter().any(|p| p.name == portal.name) {
                return Err(PlanError::InvalidInput(format!(
                    "duplicate portal name '{}'",
                    portal.name
                )));
            }
            if let Some(dup) = kept
                .iter()
                .find(|p| p.latitude == portal.latitude && p.longitude == portal.longitude)
            {
                warn!(
                    portal = %portal.name,
                    duplicate_of = %dup.name,
                    "Skipping portal with duplicate coordinates"
                );
                continue;
            }
            kept.push(portal);
        }

        for (idx, portal) in kept.iter_mut().enumerate() {
            portal.id = idx;
        }

        let coords: Vec<LatLng> = kept.iter().map(Portal::position).collect();
        let points = geometry::gnomonic_projection(&coords);
        let distances = coords
            .iter()
            .map(|a| {
                coords
                    .iter()
                    .map(|b| geometry::spherical_distance(*a, *b).round() as u64)
                    .collect()
            })
            .collect();
        let hull = geometry::convex_hull(&points);

        Ok(Self {
            portals: kept,
            points,
            distances,
            hull,
        })
    }

    pub fn len(&self) -> usize {
        self.portals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portals.is_empty()
    }

    pub fn portals(&self) -> &[Portal] {
        &self.portals
    }

    pub fn portal(&self, id: PortalId) -> &Portal {
        &self.portals[id]
    }

    pub fn point(&self, id: PortalId) -> Point {
        self.points[id]
    }

    pub fn triangle(&self, vertices: [PortalId; 3]) -> [Point; 3] {
        vertices.map(|v| self.points[v])
    }

    /// Distance in metres between two portals.
    pub fn distance(&self, a: PortalId, b: PortalId) -> u64 {
        self.distances[a][b]
    }

    /// Hull vertices in counter-clockwise order.
    pub fn hull(&self) -> &[PortalId] {
        &self.hull
    }

    /// Whether `portal` lies strictly inside the triangle on `vertices`.
    pub fn is_inside(&self, portal: PortalId, vertices: [PortalId; 3]) -> bool {
        !vertices.contains(&portal)
            && geometry::strictly_inside(self.points[portal], self.triangle(vertices))
    }

    /// Whether links `a -> b` and `c -> d` cross.
    pub fn links_cross(&self, a: PortalId, b: PortalId, c: PortalId, d: PortalId) -> bool {
        if a == c || a == d || b == c || b == d {
            return false;
        }
        geometry::segments_cross(self.points[a], self.points[b], self.points[c], self.points[d])
    }

    pub fn max_out_links(&self, id: PortalId, limits: &LinkLimits) -> usize {
        self.portals[id].max_out_links(limits)
    }
}
