//! Component registry: the static wiring between actor kinds, component
//! state types, agent types, and role features.
//!
//! The game plugin populates a [`RegistryBuilder`] at load time (and again on
//! every hotfix reload); `build` validates the table and any problem is fatal
//! for startup. Runtime lookups are read-only.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::component::{ActorState, Agent, PersistentState};
use crate::error::{RegistryError, StoreError};
use crate::types::{ActorKind, FeatureId};

/// Everything the runtime needs to instantiate and persist one component
/// type. Factories are plain `fn` pointers so a hotfix reload swaps them
/// atomically with the registry.
#[derive(Clone)]
pub struct ComponentSpec {
    pub name: &'static str,
    pub kind: ActorKind,
    pub feature: Option<FeatureId>,
    pub component_type: TypeId,
    pub make_agent: fn() -> Arc<dyn Agent>,
    pub new_state: fn(u64) -> Box<dyn ActorState>,
    pub decode_state: fn(&[u8]) -> Result<Box<dyn ActorState>, StoreError>,
}

impl std::fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("feature", &self.feature)
            .finish()
    }
}

#[derive(Default, Debug)]
pub struct RegistryBuilder {
    specs: HashMap<TypeId, ComponentSpec>,
    agent_to_component: HashMap<TypeId, TypeId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers component state `S` with agent `A` on actor kind `kind`.
    ///
    /// `feature` groups role components for feature-level lookups and is only
    /// valid on [`ActorKind::Role`].
    pub fn register<S, A>(
        &mut self,
        kind: ActorKind,
        feature: Option<FeatureId>,
    ) -> Result<&mut Self, RegistryError>
    where
        S: PersistentState,
        A: Agent + Default,
    {
        let component_type = TypeId::of::<S>();
        let agent_type = TypeId::of::<A>();

        if self.specs.contains_key(&component_type) {
            return Err(RegistryError::DuplicateComponent { component: S::NAME });
        }
        if self.agent_to_component.contains_key(&agent_type) {
            return Err(RegistryError::DuplicateAgentBinding { component: S::NAME });
        }
        if let Some(feature) = feature {
            if !kind.is_role() {
                return Err(RegistryError::FeatureOnNonRole {
                    component: S::NAME,
                    feature: feature.0,
                    kind,
                });
            }
        }

        self.specs.insert(
            component_type,
            ComponentSpec {
                name: S::NAME,
                kind,
                feature,
                component_type,
                make_agent: || Arc::new(A::default()),
                new_state: |state_id| Box::new(S::new(state_id)),
                decode_state: |bytes| S::decode(bytes).map(|s| Box::new(s) as Box<dyn ActorState>),
            },
        );
        self.agent_to_component.insert(agent_type, component_type);
        Ok(self)
    }

    pub fn build(self) -> Result<Arc<ComponentRegistry>, RegistryError> {
        let mut by_kind: HashMap<ActorKind, Vec<TypeId>> = HashMap::new();
        let mut by_feature: HashMap<FeatureId, Vec<TypeId>> = HashMap::new();
        for spec in self.specs.values() {
            by_kind.entry(spec.kind).or_default().push(spec.component_type);
            if let Some(feature) = spec.feature {
                by_feature.entry(feature).or_default().push(spec.component_type);
            }
        }
        info!(
            components = self.specs.len(),
            kinds = by_kind.len(),
            "component registry built"
        );
        Ok(Arc::new(ComponentRegistry {
            specs: self.specs,
            agent_to_component: self.agent_to_component,
            by_kind,
            by_feature,
        }))
    }
}

pub struct ComponentRegistry {
    specs: HashMap<TypeId, ComponentSpec>,
    agent_to_component: HashMap<TypeId, TypeId>,
    by_kind: HashMap<ActorKind, Vec<TypeId>>,
    by_feature: HashMap<FeatureId, Vec<TypeId>>,
}

impl ComponentRegistry {
    /// Empty registry; useful before the plugin surface has loaded.
    pub fn empty() -> Arc<ComponentRegistry> {
        Arc::new(ComponentRegistry {
            specs: HashMap::new(),
            agent_to_component: HashMap::new(),
            by_kind: HashMap::new(),
            by_feature: HashMap::new(),
        })
    }

    pub fn spec(&self, component_type: TypeId) -> Option<&ComponentSpec> {
        self.specs.get(&component_type)
    }

    /// Resolves the agent type's declared component binding.
    pub fn component_of_agent(&self, agent_type: TypeId) -> Result<TypeId, RegistryError> {
        self.agent_to_component
            .get(&agent_type)
            .copied()
            .ok_or(RegistryError::UnknownAgent)
    }

    pub fn components_of(&self, kind: ActorKind) -> &[TypeId] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn components_of_feature(&self, feature: FeatureId) -> &[TypeId] {
        self.by_feature
            .get(&feature)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn feature_of(&self, component_type: TypeId) -> Option<FeatureId> {
        self.specs.get(&component_type).and_then(|s| s.feature)
    }

    /// Spec lookup guarded by the owning actor's kind; components are only
    /// ever instantiated on actors of their registered kind.
    pub(crate) fn spec_for_actor(
        &self,
        component_type: TypeId,
        kind: ActorKind,
    ) -> Result<&ComponentSpec, RegistryError> {
        let spec = self
            .specs
            .get(&component_type)
            .ok_or(RegistryError::UnknownAgent)?;
        if spec.kind != kind {
            return Err(RegistryError::KindMismatch {
                component: spec.name,
                registered: spec.kind,
                requested: kind,
            });
        }
        Ok(spec)
    }
}
