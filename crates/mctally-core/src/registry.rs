//! Entity registry: which geometric regions a tally scores in, and their
//! normalization constants.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{TallyError, TallyId};

/// Opaque identifier of a cell, surface, or mesh element.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map from entity to normalization constant (volume, area, or 1.0).
///
/// Populated at tally construction and read-only afterwards.
#[derive(Debug, Clone)]
pub struct EntityRegistry {
    owner: TallyId,
    order: Vec<EntityId>,
    constants: HashMap<EntityId, f64>,
    total: f64,
}

impl EntityRegistry {
    pub fn new(owner: TallyId) -> Self {
        Self {
            owner,
            order: Vec::new(),
            constants: HashMap::new(),
            total: 0.0,
        }
    }

    /// Register `entity` with its normalization constant.
    ///
    /// Returns `Ok(false)` and logs a warning for a duplicate id; the first
    /// registration wins.
    pub fn assign(&mut self, entity: EntityId, normalization: f64) -> Result<bool, TallyError> {
        if !normalization.is_finite() || normalization <= 0.0 {
            return Err(TallyError::InvalidNormalizationConstant {
                tally: self.owner,
                entity,
                value: normalization,
            });
        }
        if self.constants.contains_key(&entity) {
            log::warn!(
                "tally {}: entity {} assigned more than once, keeping the first normalization constant",
                self.owner,
                entity
            );
            return Ok(false);
        }
        self.constants.insert(entity, normalization);
        self.order.push(entity);
        self.total += normalization;
        Ok(true)
    }

    pub fn is_assigned(&self, entity: EntityId) -> bool {
        self.constants.contains_key(&entity)
    }

    pub fn normalization_constant(&self, entity: EntityId) -> Result<f64, TallyError> {
        self.constants
            .get(&entity)
            .copied()
            .ok_or(TallyError::UnassignedEntity {
                tally: self.owner,
                entity,
            })
    }

    /// Sum of every assigned entity's normalization constant.
    pub fn total_normalization_constant(&self) -> f64 {
        self.total
    }

    /// Assigned entities in registration order.
    pub fn ids(&self) -> &[EntityId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
