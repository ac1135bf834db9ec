//! Serde model of the on-disk chunk and space-settings documents.
//!
//! Keys follow the historical section names (`boundary`, `portal`, `point`,
//! `uAxis`, `boundingBox`) so hand-written files stay readable.

use chunkspace_common::BoundingBox;
use glam::{Affine3A, Mat3A, Vec3};
use serde::{Deserialize, Serialize};

/// Version written into `space.settings` by this crate.
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

fn default_true() -> bool {
    true
}

fn default_format_version() -> u32 {
    SETTINGS_FORMAT_VERSION
}

/// A 4x3 rigid placement matrix: three basis rows plus a translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformDoc {
    pub x_axis: Vec3,
    pub y_axis: Vec3,
    pub z_axis: Vec3,
    pub translation: Vec3,
}

impl TransformDoc {
    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_mat3_translation(
            glam::Mat3::from_cols(self.x_axis, self.y_axis, self.z_axis),
            self.translation,
        )
    }

    pub fn from_affine(m: &Affine3A) -> Self {
        let Mat3A {
            x_axis,
            y_axis,
            z_axis,
        } = m.matrix3;
        Self {
            x_axis: Vec3::from(x_axis),
            y_axis: Vec3::from(y_axis),
            z_axis: Vec3::from(z_axis),
            translation: Vec3::from(m.translation),
        }
    }
}

/// Primary geometry of an inside chunk. Only its extent matters here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellDoc {
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalDoc {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default)]
    pub internal: bool,
    #[serde(default = "default_true")]
    pub permissive: bool,
    /// Empty, a sentinel (`heaven`, `earth`, `invasive`, `extern`) or a
    /// chunk identifier in the owner's mapping.
    #[serde(default)]
    pub chunk: String,
    pub u_axis: Vec3,
    /// Polygon in (u, v) coordinates; the z component is unused.
    #[serde(rename = "point", default)]
    pub points: Vec<Vec3>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryDoc {
    pub normal: Vec3,
    pub d: f32,
    #[serde(rename = "portal", default, skip_serializing_if = "Vec::is_empty")]
    pub portals: Vec<PortalDoc>,
}

/// One `.chunk` file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformDoc>,
    #[serde(default, alias = "model", skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellDoc>,
    #[serde(rename = "boundary", default)]
    pub boundaries: Vec<BoundaryDoc>,
    /// Inside chunks overlapping this outside chunk.
    #[serde(rename = "overlapper", default, skip_serializing_if = "Vec::is_empty")]
    pub overlappers: Vec<String>,
    /// Declared world-independent (mapping-local) extent, used when this
    /// chunk is looked up as an overlapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Inclusive grid bounds of a mapping, in its own local grid space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl GridBounds {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        self.min_x <= x && x <= self.max_x && self.min_y <= z && z <= self.max_y
    }

    pub fn cell_count(&self) -> usize {
        let w = (self.max_x - self.min_x + 1).max(0) as usize;
        let h = (self.max_y - self.min_y + 1).max(0) as usize;
        w * h
    }
}

/// The `space.settings` document of a mapping directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceSettings {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub bounds: GridBounds,
    #[serde(default)]
    pub single_dir: bool,
}

impl SpaceSettings {
    pub fn new(bounds: GridBounds) -> Self {
        Self {
            format_version: SETTINGS_FORMAT_VERSION,
            bounds,
            single_dir: true,
        }
    }
}
