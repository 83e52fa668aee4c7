//! # Perspectives
//!
//! A perspective is one viewpoint rendered in a frame: the main camera, a
//! shadow map face, a planar reflection. It pairs an immutable
//! [`PerspectiveDesc`] with a [`FrameHeap`] that renderables allocate their
//! per-perspective transient data from.
//!
//! ## Lifecycle
//!
//! - Created once, then recycled by the pipeline's perspective pool
//! - [`Perspective::reset`] installs the description for the new use and
//!   frees the heap
//! - Heap handles are valid until the next reset or [`Perspective::free_data`]

use bitflags::bitflags;

use crate::foundation::math::{frustum_planes, Mat4, Plane, Point3, Vec3};
use crate::foundation::memory::{FrameHeap, HeapSlice};

bitflags! {
    /// Properties of a viewpoint
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PerspectiveFlags: u32 {
        /// Renders in all directions (cube map faces)
        const OMNIDIRECTIONAL = 1 << 0;
        /// Mirror image of another perspective
        const REFLECTION = 1 << 1;
        /// Depth-only shadow viewpoint
        const SHADOW = 1 << 2;
    }
}

/// Camera and frame description of a perspective
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveDesc {
    /// Camera position
    pub cam_pos: Vec3,
    /// Camera right axis
    pub cam_right: Vec3,
    /// Camera up axis
    pub cam_up: Vec3,
    /// Camera viewing direction
    pub cam_look: Vec3,

    /// World-to-view matrix
    pub view_mat: Mat4,
    /// View-to-clip matrix
    pub proj_mat: Mat4,
    /// World-to-clip matrix
    pub view_proj_mat: Mat4,

    /// Inward-facing frustum planes: left, right, bottom, top, near, far
    pub planes: [Plane; 6],

    /// Near plane distance
    pub near_plane: f32,
    /// Far plane distance
    pub far_plane: f32,

    /// Winding is mirrored (reflection cameras)
    pub flipped: bool,

    /// Frame time in seconds
    pub time: f32,
    /// Duration of the last frame in seconds
    pub time_step: f32,

    /// Array or cube slice the perspective renders into
    pub output_index: u32,

    /// Viewpoint properties
    pub flags: PerspectiveFlags,
}

impl PerspectiveDesc {
    /// Build a description from explicit camera parts
    ///
    /// The view-projection matrix and frustum planes are derived.
    pub fn new(
        cam_pos: Vec3,
        cam_right: Vec3,
        cam_up: Vec3,
        cam_look: Vec3,
        view_mat: Mat4,
        proj_mat: Mat4,
        near_plane: f32,
        far_plane: f32,
        flipped: bool,
    ) -> Self {
        let view_proj_mat = proj_mat * view_mat;
        Self {
            cam_pos,
            cam_right,
            cam_up,
            cam_look,
            view_mat,
            proj_mat,
            view_proj_mat,
            planes: frustum_planes(&view_proj_mat),
            near_plane,
            far_plane,
            flipped,
            time: 0.0,
            time_step: 0.0,
            output_index: 0,
            flags: PerspectiveFlags::empty(),
        }
    }

    /// Right-handed perspective camera looking from `eye` at `target`
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near_plane: f32,
        far_plane: f32,
    ) -> Self {
        let view = Mat4::look_at_rh(&Point3::from(eye), &Point3::from(target), &up);
        let proj = Mat4::new_perspective(aspect, fov_y, near_plane, far_plane);

        let look = (target - eye).normalize();
        let right = look.cross(&up).normalize();
        let up = right.cross(&look);

        Self::new(eye, right, up, look, view, proj, near_plane, far_plane, false)
    }

    /// Set frame timing
    pub fn with_time(mut self, time: f32, time_step: f32) -> Self {
        self.time = time;
        self.time_step = time_step;
        self
    }

    /// Set viewpoint flags
    pub fn with_flags(mut self, flags: PerspectiveFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the output slice
    pub fn with_output_index(mut self, output_index: u32) -> Self {
        self.output_index = output_index;
        self
    }

    /// Mirror image of this perspective across `plane`
    ///
    /// The result is flagged as a reflection and has its winding flipped.
    pub fn mirrored(&self, plane: &Plane) -> Self {
        let view = self.view_mat * plane.reflection_matrix();
        let mut desc = Self::new(
            plane.reflect_point(&self.cam_pos),
            plane.reflect_vector(&self.cam_right),
            plane.reflect_vector(&self.cam_up),
            plane.reflect_vector(&self.cam_look),
            view,
            self.proj_mat,
            self.near_plane,
            self.far_plane,
            !self.flipped,
        );
        desc.time = self.time;
        desc.time_step = self.time_step;
        desc.output_index = self.output_index;
        desc.flags = self.flags | PerspectiveFlags::REFLECTION;
        desc
    }

    /// Squared distance from the camera to a point
    pub fn distance_squared(&self, point: &Vec3) -> f32 {
        (point - self.cam_pos).norm_squared()
    }
}

/// Identity of a perspective instance, stable across pool recycling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerspectiveId(u64);

impl PerspectiveId {
    /// Create an id from a raw value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A viewpoint with its per-frame data heap
#[derive(Debug)]
pub struct Perspective {
    id: PerspectiveId,
    desc: PerspectiveDesc,
    heap: FrameHeap,
}

impl Perspective {
    /// Create a perspective whose heap chunks hold `chunk_size` bytes
    pub fn new(id: PerspectiveId, desc: PerspectiveDesc, chunk_size: usize) -> Self {
        Self {
            id,
            desc,
            heap: FrameHeap::new(chunk_size),
        }
    }

    /// Instance identity
    pub fn id(&self) -> PerspectiveId {
        self.id
    }

    /// Description captured at construction or the last reset
    pub fn desc(&self) -> &PerspectiveDesc {
        &self.desc
    }

    /// Install a new description and free all data
    pub fn reset(&mut self, desc: PerspectiveDesc) {
        self.desc = desc;
        self.free_data();
    }

    /// Allocate zeroed transient data valid until the next free
    pub fn allocate_data(&mut self, size: usize) -> HeapSlice {
        self.heap.allocate(size)
    }

    /// Allocate transient data initialized with `bytes`
    pub fn store_data(&mut self, bytes: &[u8]) -> HeapSlice {
        self.heap.allocate_from(bytes)
    }

    /// Resolve transient data
    pub fn data(&self, slice: HeapSlice) -> Option<&[u8]> {
        self.heap.bytes(slice)
    }

    /// Resolve transient data mutably
    pub fn data_mut(&mut self, slice: HeapSlice) -> Option<&mut [u8]> {
        self.heap.bytes_mut(slice)
    }

    /// Release all transient data, keeping the high-watermark reserved
    ///
    /// Every handle returned by earlier allocations stops resolving.
    pub fn free_data(&mut self) {
        self.heap.free();
    }

    /// The data heap
    pub fn heap(&self) -> &FrameHeap {
        &self.heap
    }
}
