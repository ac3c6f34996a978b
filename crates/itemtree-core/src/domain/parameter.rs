//! Job parameters: what to crawl and how deep.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ValidationError;
use super::ids::NodeId;

/// Maximum traversal depth requested for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Depth {
    Bounded(u32),
    Unbounded,
}

impl Depth {
    /// The bound actually enforced; `Unbounded` is capped at `max`.
    pub fn effective(&self, max: u32) -> u32 {
        match *self {
            Depth::Bounded(n) => n.min(max),
            Depth::Unbounded => max,
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Bounded(1)
    }
}

/// Lifecycle view of the bill of materials.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum BomLifecycle {
    #[default]
    AsBuilt,
    AsPlanned,
    AsSpecified,
}

/// Which way the tree is walked from the root.
///
/// `Downward` follows bill-of-materials edges to children, `Upward` follows
/// usage edges to the parents that built the root in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Downward,
    Upward,
}

impl Direction {
    const ALL: [Direction; 2] = [Direction::Downward, Direction::Upward];
}

impl BomLifecycle {
    const ALL: [BomLifecycle; 3] = [
        BomLifecycle::AsBuilt,
        BomLifecycle::AsPlanned,
        BomLifecycle::AsSpecified,
    ];

    /// Name of the relationship aspect that carries the edges for this view.
    pub fn relationship_aspect_name(&self, direction: Direction) -> &'static str {
        match (self, direction) {
            (BomLifecycle::AsBuilt, Direction::Downward) => "SingleLevelBomAsBuilt",
            (BomLifecycle::AsPlanned, Direction::Downward) => "SingleLevelBomAsPlanned",
            (BomLifecycle::AsSpecified, Direction::Downward) => "SingleLevelBomAsSpecified",
            (BomLifecycle::AsBuilt, Direction::Upward) => "SingleLevelUsageAsBuilt",
            (BomLifecycle::AsPlanned, Direction::Upward) => "SingleLevelUsageAsPlanned",
            (BomLifecycle::AsSpecified, Direction::Upward) => "SingleLevelUsageAsSpecified",
        }
    }

    pub fn relationship_aspect(&self, direction: Direction) -> AspectType {
        AspectType::new(self.relationship_aspect_name(direction))
    }
}

/// Name of a submodel/aspect type, e.g. `SerialPart` or `SingleLevelBomAsBuilt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AspectType(String);

/// Flat classification of an aspect reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectKind {
    /// Parent/child edges for one lifecycle view, read in one direction.
    Relationship(BomLifecycle, Direction),
    /// Any other payload collected as-is.
    Data,
}

impl AspectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> AspectKind {
        BomLifecycle::ALL
            .into_iter()
            .flat_map(|lc| Direction::ALL.map(|dir| (lc, dir)))
            .find(|(lc, dir)| lc.relationship_aspect_name(*dir) == self.0)
            .map_or(AspectKind::Data, |(lc, dir)| AspectKind::Relationship(lc, dir))
    }
}

impl fmt::Display for AspectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// JobParameter is attached to a job at creation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParameter {
    pub root: NodeId,
    #[serde(default)]
    pub depth: Depth,
    /// Empty means every aspect found on a descriptor.
    #[serde(default)]
    pub aspects: BTreeSet<AspectType>,
    #[serde(default)]
    pub lifecycle: BomLifecycle,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub lookup_party_names: bool,
    #[serde(default = "default_true")]
    pub collect_aspects: bool,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub action: String,
}

fn default_true() -> bool {
    true
}

impl JobParameter {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            depth: Depth::default(),
            aspects: BTreeSet::new(),
            lifecycle: BomLifecycle::default(),
            direction: Direction::default(),
            lookup_party_names: false,
            collect_aspects: true,
            owner: String::new(),
            action: String::new(),
        }
    }

    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_aspects<I, S>(mut self, aspects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aspects = aspects.into_iter().map(AspectType::new).collect();
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: BomLifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_party_names(mut self, enabled: bool) -> Self {
        self.lookup_party_names = enabled;
        self
    }

    pub fn with_collect_aspects(mut self, enabled: bool) -> Self {
        self.collect_aspects = enabled;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Checks the parameters against the configured maximum tree depth.
    pub fn validate(&self, max_depth: u32) -> Result<(), ValidationError> {
        if let Depth::Bounded(requested) = self.depth {
            if requested == 0 {
                return Err(ValidationError::ZeroDepth);
            }
            if requested > max_depth {
                return Err(ValidationError::DepthExceeded {
                    requested,
                    max: max_depth,
                });
            }
        }
        if self.aspects.iter().any(|a| a.as_str().trim().is_empty()) {
            return Err(ValidationError::BlankAspect);
        }
        Ok(())
    }

    /// Whether a data aspect should be collected for this job.
    pub fn wants_aspect(&self, aspect: &AspectType) -> bool {
        self.collect_aspects && (self.aspects.is_empty() || self.aspects.contains(aspect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn root() -> NodeId {
        NodeId::parse("urn:uuid:00000000-0000-0000-0000-000000000001").unwrap()
    }

    #[rstest]
    #[case(Depth::Bounded(1), Ok(()))]
    #[case(Depth::Bounded(10), Ok(()))]
    #[case(Depth::Unbounded, Ok(()))]
    #[case(Depth::Bounded(0), Err(ValidationError::ZeroDepth))]
    #[case(Depth::Bounded(11), Err(ValidationError::DepthExceeded { requested: 11, max: 10 }))]
    fn validates_depth(#[case] depth: Depth, #[case] expected: Result<(), ValidationError>) {
        let param = JobParameter::new(root()).with_depth(depth);
        assert_eq!(param.validate(10), expected);
    }

    #[test]
    fn rejects_blank_aspect() {
        let param = JobParameter::new(root()).with_aspects(["SerialPart", "  "]);
        assert_eq!(param.validate(10), Err(ValidationError::BlankAspect));
    }

    #[test]
    fn unbounded_depth_is_capped() {
        assert_eq!(Depth::Unbounded.effective(100), 100);
        assert_eq!(Depth::Bounded(3).effective(100), 3);
    }

    #[rstest]
    #[case("SingleLevelBomAsBuilt", AspectKind::Relationship(BomLifecycle::AsBuilt, Direction::Downward))]
    #[case("SingleLevelBomAsPlanned", AspectKind::Relationship(BomLifecycle::AsPlanned, Direction::Downward))]
    #[case("SingleLevelBomAsSpecified", AspectKind::Relationship(BomLifecycle::AsSpecified, Direction::Downward))]
    #[case("SingleLevelUsageAsBuilt", AspectKind::Relationship(BomLifecycle::AsBuilt, Direction::Upward))]
    #[case("SingleLevelUsageAsPlanned", AspectKind::Relationship(BomLifecycle::AsPlanned, Direction::Upward))]
    #[case("SerialPart", AspectKind::Data)]
    fn classifies_aspects(#[case] name: &str, #[case] kind: AspectKind) {
        assert_eq!(AspectType::new(name).kind(), kind);
    }

    #[test]
    fn empty_filter_wants_everything() {
        let param = JobParameter::new(root());
        assert!(param.wants_aspect(&AspectType::new("SerialPart")));

        let param = param.with_aspects(["Batch"]);
        assert!(!param.wants_aspect(&AspectType::new("SerialPart")));
        assert!(param.wants_aspect(&AspectType::new("Batch")));

        let param = param.with_collect_aspects(false);
        assert!(!param.wants_aspect(&AspectType::new("Batch")));
    }

    #[test]
    fn deserializes_with_defaults() {
        let param: JobParameter = serde_json::from_str(
            r#"{"root": "urn:uuid:00000000-0000-0000-0000-000000000001"}"#,
        )
        .unwrap();
        assert_eq!(param.depth, Depth::Bounded(1));
        assert_eq!(param.lifecycle, BomLifecycle::AsBuilt);
        assert_eq!(param.direction, Direction::Downward);
        assert!(param.collect_aspects);
        assert!(!param.lookup_party_names);
    }

    #[test]
    fn direction_uses_lowercase_names() {
        let param: JobParameter = serde_json::from_str(
            r#"{"root": "urn:uuid:00000000-0000-0000-0000-000000000001", "direction": "upward"}"#,
        )
        .unwrap();
        assert_eq!(param.direction, Direction::Upward);
        assert_eq!(
            param.lifecycle.relationship_aspect_name(param.direction),
            "SingleLevelUsageAsBuilt"
        );
    }
}
