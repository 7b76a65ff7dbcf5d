//! Core identifiers: actor kinds, composite actor ids, feature ids.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Logical actor categories.
///
/// The numeric value is load-bearing: kinds greater than [`ActorKind::Separator`]
/// are process-wide singletons with a fixed id, kinds below it are per-entity
/// actors. [`ActorKind::Role`] is the per-player kind and the only one that is
/// auto-recycled when idle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u16)]
pub enum ActorKind {
    /// Per-player actor, one per connected player, auto-recycled.
    Role = 1,
    /// Per-guild actor.
    Guild = 2,
    /// Per-room actor (battles, dungeons).
    Room = 3,
    /// Ordering sentinel between per-entity and singleton kinds. Never
    /// instantiated.
    Separator = 64,
    /// Server-wide driver actor (open-server day counter and friends).
    Server = 65,
    /// Account directory singleton.
    Account = 66,
    /// World chat singleton.
    Chat = 67,
    /// Ranking singleton.
    Rank = 68,
}

impl ActorKind {
    /// Singleton kinds live above the separator.
    pub fn is_global(self) -> bool {
        self > ActorKind::Separator
    }

    pub fn is_role(self) -> bool {
        self == ActorKind::Role
    }
}

/// 64-bit composite actor identity: kind in the high 16 bits, instance
/// discriminator in the low 48.
///
/// Globals use instance 0, so their id is derived from the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

const KIND_SHIFT: u32 = 48;
const INSTANCE_MASK: u64 = (1 << KIND_SHIFT) - 1;

impl ActorId {
    pub fn new(kind: ActorKind, instance: u64) -> Self {
        debug_assert!(instance <= INSTANCE_MASK, "instance overflows 48 bits");
        ActorId((u16::from(kind) as u64) << KIND_SHIFT | (instance & INSTANCE_MASK))
    }

    /// The fixed id of a singleton actor.
    pub fn global(kind: ActorKind) -> Self {
        ActorId::new(kind, 0)
    }

    pub fn kind(self) -> ActorKind {
        // Ids are only minted through `new`, so the discriminant is valid.
        ActorKind::try_from((self.0 >> KIND_SHIFT) as u16).unwrap_or(ActorKind::Separator)
    }

    pub fn instance(self) -> u64 {
        self.0 & INSTANCE_MASK
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_global(self) -> bool {
        self.kind().is_global()
    }

    pub fn is_role(self) -> bool {
        self.kind().is_role()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind(), self.instance())
    }
}

/// Feature grouping for role components (bag, mail, quest, ...). Assigned by
/// the game plugin at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId(pub u16);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feature-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ordering_around_separator() {
        assert!(ActorKind::Server.is_global());
        assert!(ActorKind::Chat.is_global());
        assert!(!ActorKind::Role.is_global());
        assert!(!ActorKind::Guild.is_global());
        assert!(!ActorKind::Separator.is_global());
        assert!(ActorKind::Role.is_role());
    }

    #[test]
    fn id_packing_round_trip() {
        let id = ActorId::new(ActorKind::Role, 42_000_000_007);
        assert_eq!(id.kind(), ActorKind::Role);
        assert_eq!(id.instance(), 42_000_000_007);

        let g = ActorId::global(ActorKind::Server);
        assert_eq!(g.kind(), ActorKind::Server);
        assert_eq!(g.instance(), 0);
        // Fixed id derived from the kind alone.
        assert_eq!(g, ActorId::global(ActorKind::Server));
    }

    #[test]
    fn id_display() {
        let id = ActorId::new(ActorKind::Guild, 9);
        assert_eq!(id.to_string(), "Guild:9");
    }
}
