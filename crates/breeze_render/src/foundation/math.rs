//! Math utilities and types
//!
//! Provides the math types used by perspectives and controllers, plus the
//! plane and sphere primitives used for frustum culling.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and scale
    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// World-space up axis of this transform
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::y()
    }
}

/// Plane in Hessian normal form: `normal · p + d = 0`
///
/// Points with a positive distance lie on the side the normal points to.
/// Frustum planes always face inward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit plane normal
    pub normal: Vec3,
    /// Signed offset from the origin
    pub d: f32,
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            normal: Vec3::y(),
            d: 0.0,
        }
    }
}

impl Plane {
    /// Create a plane from a normal and an offset
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Create a plane from a point on the plane and a normal
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        let d = -normal.dot(&point);
        Self { normal, d }
    }

    /// Create a plane from raw `(a, b, c, d)` coefficients, normalizing them
    pub fn from_coefficients(coefficients: Vec4) -> Self {
        let normal = coefficients.xyz();
        let length = normal.norm();
        if length <= f32::EPSILON {
            return Self { normal, d: coefficients.w };
        }
        Self {
            normal: normal / length,
            d: coefficients.w / length,
        }
    }

    /// Signed distance from the plane to a point
    pub fn distance(&self, point: &Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Mirror a point across the plane
    pub fn reflect_point(&self, point: &Vec3) -> Vec3 {
        point - self.normal * (2.0 * self.distance(point))
    }

    /// Mirror a direction across the plane
    pub fn reflect_vector(&self, vector: &Vec3) -> Vec3 {
        vector - self.normal * (2.0 * self.normal.dot(vector))
    }

    /// Affine matrix mirroring world space across the plane
    pub fn reflection_matrix(&self) -> Mat4 {
        let n = self.normal;
        let d = self.d;
        Mat4::new(
            1.0 - 2.0 * n.x * n.x, -2.0 * n.x * n.y, -2.0 * n.x * n.z, -2.0 * d * n.x,
            -2.0 * n.y * n.x, 1.0 - 2.0 * n.y * n.y, -2.0 * n.y * n.z, -2.0 * d * n.y,
            -2.0 * n.z * n.x, -2.0 * n.z * n.y, 1.0 - 2.0 * n.z * n.z, -2.0 * d * n.z,
            0.0, 0.0, 0.0, 1.0,
        )
    }
}

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Sphere center
    pub center: Vec3,
    /// Sphere radius
    pub radius: f32,
}

impl Default for Sphere {
    fn default() -> Self {
        Self {
            center: Vec3::zeros(),
            radius: 0.0,
        }
    }
}

impl Sphere {
    /// Create a new bounding sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Test the sphere against a set of inward-facing planes
    pub fn intersects_planes(&self, planes: &[Plane]) -> bool {
        planes
            .iter()
            .all(|plane| plane.distance(&self.center) >= -self.radius)
    }

    /// Smallest sphere enclosing both spheres
    pub fn merged(&self, other: &Sphere) -> Sphere {
        let offset = other.center - self.center;
        let distance = offset.norm();
        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }
        let radius = (distance + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / distance);
        Sphere { center, radius }
    }
}

/// Extract the six inward-facing frustum planes of a view-projection matrix
///
/// Order: left, right, bottom, top, near, far. Expects the `[-1, 1]` clip
/// depth range produced by [`Mat4::new_perspective`].
pub fn frustum_planes(view_proj: &Mat4) -> [Plane; 6] {
    let row = |i: usize| -> Vec4 { view_proj.row(i).transpose() };
    let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

    [
        Plane::from_coefficients(r3 + r0),
        Plane::from_coefficients(r3 - r0),
        Plane::from_coefficients(r3 + r1),
        Plane::from_coefficients(r3 - r1),
        Plane::from_coefficients(r3 + r2),
        Plane::from_coefficients(r3 - r2),
    ]
}
