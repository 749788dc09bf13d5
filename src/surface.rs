//! Radiative surfaces and their Radiance scene-text serialization.
//!
//! A [`Surface`] is an immutable polygon record: an identifier, an ordered
//! vertex loop and an optional role tag. The only geometric operations this
//! crate needs are area (to reject degenerate polygons) and centroid (for
//! scenario construction); everything else — meshing, normals, visibility —
//! is the concern of whatever produced the vertices.

use serde::{Deserialize, Serialize};

use crate::error::{Result, VfError};

/// Polygons with area below this are rejected at serialization time.
pub const AREA_EPS: f64 = 1e-12;

/// Identifier of a surface, unique within a registry.
#[derive(Eq, PartialEq, Hash, Debug, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(String);

impl From<&str> for SurfaceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SurfaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl SurfaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Variant of the id safe to embed in a file name.
    pub(crate) fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a surface may participate in pair computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Role {
    /// May emit and receive (the default).
    #[default]
    Both,
    /// Only ever the sender side of a computation.
    EmitterOnly,
    /// Only ever the receiving side (e.g. context geometry sampled against).
    ReceiverOnly,
}

impl Role {
    pub fn can_emit(&self) -> bool {
        matches!(self, Role::Both | Role::EmitterOnly)
    }

    pub fn can_receive(&self) -> bool {
        matches!(self, Role::Both | Role::ReceiverOnly)
    }
}

/// A vertex of a surface polygon, in world coordinates (meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for Vertex {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// An immutable radiative surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    id: SurfaceId,
    vertices: Vec<Vertex>,
    role: Role,
    /// Longwave emissivity, carried for downstream consumers; the raw view
    /// factor does not depend on it.
    emissivity: Option<f64>,
}

impl Surface {
    pub fn new(id: impl Into<SurfaceId>, vertices: Vec<Vertex>) -> Self {
        Self {
            id: id.into(),
            vertices,
            role: Role::Both,
            emissivity: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_emissivity(mut self, emissivity: f64) -> Self {
        self.emissivity = Some(emissivity);
        self
    }

    pub fn id(&self) -> &SurfaceId {
        &self.id
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn emissivity(&self) -> Option<f64> {
        self.emissivity
    }

    /// Polygon area from the Newell normal (valid for planar, possibly
    /// non-convex loops).
    pub fn area(&self) -> f64 {
        let n = self.vertices.len();
        if n < 3 {
            return 0.0;
        }
        let (mut nx, mut ny, mut nz) = (0.0, 0.0, 0.0);
        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            nx += (a.y - b.y) * (a.z + b.z);
            ny += (a.z - b.z) * (a.x + b.x);
            nz += (a.x - b.x) * (a.y + b.y);
        }
        0.5 * (nx * nx + ny * ny + nz * nz).sqrt()
    }

    /// Vertex centroid of the loop.
    pub fn centroid(&self) -> Vertex {
        let n = self.vertices.len().max(1) as f64;
        let (mut cx, mut cy, mut cz) = (0.0, 0.0, 0.0);
        for v in &self.vertices {
            cx += v.x;
            cy += v.y;
            cz += v.z;
        }
        Vertex::new(cx / n, cy / n, cz / n)
    }

    /// Serializes the surface to a Radiance scene-description block:
    /// a `glow` material followed by a `polygon` primitive listing the
    /// vertex loop. The output is deterministic for identical input.
    pub fn to_rad_string(&self) -> Result<String> {
        if self.vertices.len() < 3 {
            return Err(VfError::GeometrySerialization {
                id: self.id.to_string(),
                reason: format!("polygon has {} vertices, need at least 3", self.vertices.len()),
            });
        }
        if self.area() <= AREA_EPS {
            return Err(VfError::GeometrySerialization {
                id: self.id.to_string(),
                reason: "polygon area is zero".to_string(),
            });
        }

        let id = &self.id;
        let mut rad = String::new();
        rad.push_str(&format!("void glow sur_{id}\n"));
        rad.push_str("0\n");
        rad.push_str("0\n");
        rad.push_str("4 1 1 1 0\n");
        rad.push_str(&format!("sur_{id} polygon surface.{id}\n"));
        rad.push_str("0\n");
        rad.push_str("0\n");
        rad.push_str(&format!("{}", 3 * self.vertices.len()));
        for v in &self.vertices {
            rad.push_str(&format!(" {} {} {}\n", v.x, v.y, v.z));
        }
        Ok(rad)
    }
}
