//! Data-block Identity
//!
//! A [`DataBlockId`] is the opaque handle the graph uses to address a
//! persistent scene object. The graph never looks inside the data-block it
//! names; the handle is only ever used as a lookup key.
//!
//! Working copies produced by the copy-on-write binding get their own handle,
//! derived from the original by flipping its copy flag. The full `u64` key
//! space stays available to the embedder.

use std::fmt;

/// Category of a data-block.
///
/// Categories drive per-category behavior such as working-copy teardown
/// ordering. They carry no other meaning inside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataCategory {
    Object,
    Mesh,
    Curve,
    Material,
    Texture,
    Armature,
    Action,
    ShapeKey,
    Camera,
    Light,
    World,
    Scene,
    ParticleSettings,
    NodeTree,
}

impl DataCategory {
    /// Two-letter code used when printing handles.
    pub fn code(self) -> &'static str {
        match self {
            Self::Object => "OB",
            Self::Mesh => "ME",
            Self::Curve => "CU",
            Self::Material => "MA",
            Self::Texture => "TE",
            Self::Armature => "AR",
            Self::Action => "AC",
            Self::ShapeKey => "KE",
            Self::Camera => "CA",
            Self::Light => "LA",
            Self::World => "WO",
            Self::Scene => "SC",
            Self::ParticleSettings => "PA",
            Self::NodeTree => "NT",
        }
    }
}

/// Opaque, stable handle to a data-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataBlockId {
    raw: u64,
    category: DataCategory,
    working_copy: bool,
}

impl DataBlockId {
    /// Create a handle for an original data-block.
    pub fn new(category: DataCategory, raw: u64) -> Self {
        Self {
            raw,
            category,
            working_copy: false,
        }
    }

    /// The category this data-block belongs to.
    pub fn category(&self) -> DataCategory {
        self.category
    }

    /// Raw key shared by the original and its working copy.
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Whether this handle names a working copy rather than an original.
    pub fn is_working_copy(&self) -> bool {
        self.working_copy
    }

    /// Handle of the working copy derived from this data-block.
    pub fn working_copy(self) -> Self {
        Self {
            working_copy: true,
            ..self
        }
    }

    /// Handle of the original data-block.
    pub fn original(self) -> Self {
        Self {
            working_copy: false,
            ..self
        }
    }
}

impl fmt::Display for DataBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.category.code(), self.raw())?;
        if self.is_working_copy() {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_copy_handles_are_distinct() {
        let original = DataBlockId::new(DataCategory::Mesh, 7);
        let copy = original.working_copy();

        assert_ne!(original, copy);
        assert!(copy.is_working_copy());
        assert!(!original.is_working_copy());
        assert_eq!(copy.original(), original);
        assert_eq!(copy.raw(), 7);
    }

    #[test]
    fn display_includes_category_code() {
        let id = DataBlockId::new(DataCategory::Object, 42);
        assert_eq!(id.to_string(), "OB42");
        assert_eq!(id.working_copy().to_string(), "OB42*");
    }

    #[test]
    fn full_key_space_is_available() {
        let low = DataBlockId::new(DataCategory::Object, 5);
        let high = DataBlockId::new(DataCategory::Object, (1 << 63) | 5);

        assert_ne!(low, high);
        assert!(!high.is_working_copy());
        assert_eq!(high.raw(), (1 << 63) | 5);
        assert_ne!(high.working_copy(), low.working_copy());
        assert_eq!(high.working_copy().original(), high);
    }
}
