//! Material snapshots and the material lookup table.

use glam::Vec4;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Shading model a draw is rendered with.
///
/// The set is closed; hit shaders switch on the discriminant stored in the
/// shading-data table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MaterialKind {
    #[default]
    Standard = 0,
    Additive = 1,
    Coat = 2,
    Glass = 3,
    Headlight = 4,
    Emissive = 5,
}

impl MaterialKind {
    /// Returns true if geometry drawn with this material must be traced as non-opaque.
    #[inline]
    pub const fn forces_non_opaque(self) -> bool {
        matches!(self, Self::Glass | Self::Additive)
    }

    /// Discriminant written into GPU tables.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Material state captured from a draw call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Diffuse albedo (RGBA)
    pub albedo: Vec4,
    /// Specular color (RGBA)
    pub specular: Vec4,
    /// Roughness (0.0 = mirror, 1.0 = diffuse)
    pub roughness: f32,
    /// Shading model
    pub kind: MaterialKind,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec4::ONE,
            specular: Vec4::splat(0.04),
            roughness: 0.5,
            kind: MaterialKind::Standard,
        }
    }
}

impl Material {
    /// Apply a table override on top of the captured state.
    #[must_use]
    pub fn with_override(mut self, over: &MaterialOverride) -> Self {
        self.kind = over.kind;
        if let Some(roughness) = over.roughness {
            self.roughness = roughness;
        }
        self
    }
}

/// Per-key adjustments applied to captured materials.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialOverride {
    pub kind: MaterialKind,
    pub roughness: Option<f32>,
}

impl MaterialOverride {
    pub const fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            roughness: None,
        }
    }

    #[must_use]
    pub const fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = Some(roughness);
        self
    }
}

/// Lookup from a draw's material key (shader or texture hash) to an override.
///
/// Built once at startup and handed to the components that need it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MaterialTable {
    overrides: HashMap<u64, MaterialOverride>,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override, replacing any previous one for the same key.
    pub fn insert(&mut self, key: u64, over: MaterialOverride) -> &mut Self {
        self.overrides.insert(key, over);
        self
    }

    /// Builder-style variant of [`Self::insert`].
    #[must_use]
    pub fn with(mut self, key: u64, over: MaterialOverride) -> Self {
        self.overrides.insert(key, over);
        self
    }

    pub fn get(&self, key: u64) -> Option<&MaterialOverride> {
        self.overrides.get(&key)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Resolve the material for a draw, applying the override for `key` if present.
    pub fn resolve(&self, material: Material, key: Option<u64>) -> Material {
        match key.and_then(|k| self.overrides.get(&k)) {
            Some(over) => material.with_override(over),
            None => material,
        }
    }
}
