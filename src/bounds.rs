use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Slack applied to every plane test so rounding never culls a touching volume.
pub const CULL_EPSILON: f32 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    Disjoint,
    Intersects,
    Contains,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;

        Some(points.iter().fold(Self::new(first, first), |aabb, p| Self {
            min: aabb.min.min(*p),
            max: aabb.max.max(*p),
        }))
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    /// Centered on the box of `points`, so it is loose but cheap to build.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let center = Aabb::from_points(points)?.center();
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0f32, f32::max);

        Some(Self { center, radius })
    }
}

/// Box and sphere bounds of a mesh in its local space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingVolume {
    pub aabb: Option<Aabb>,
    pub sphere: Option<Sphere>,
}

impl BoundingVolume {
    pub fn from_positions(positions: &[Vec3]) -> Self {
        Self {
            aabb: Aabb::from_points(positions),
            sphere: Sphere::from_points(positions),
        }
    }

    pub fn from_aabb(aabb: Aabb) -> Self {
        Self {
            aabb: Some(aabb),
            sphere: None,
        }
    }

    pub fn from_sphere(sphere: Sphere) -> Self {
        Self {
            aabb: None,
            sphere: Some(sphere),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.aabb.is_none() && self.sphere.is_none()
    }
}

/// A plane `n·p + d = 0` stored as `(n, d)`; points with a positive distance
/// are inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane(pub Vec4);

impl Plane {
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self(normal.extend(d)).normalized()
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        self.0.xyz()
    }

    #[inline]
    pub fn distance(&self, point: Vec3) -> f32 {
        self.0.dot(point.extend(1.0))
    }

    fn normalized(self) -> Self {
        let len = self.0.xyz().length();

        if len > f32::EPSILON {
            Self(self.0 / len)
        } else {
            self
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// View-space frustum of a left-handed projection with `[0, 1]` depth.
    pub fn from_projection(proj: Mat4) -> Self {
        let r0 = proj.row(0);
        let r1 = proj.row(1);
        let r2 = proj.row(2);
        let r3 = proj.row(3);

        Self {
            planes: [
                Plane(r3 + r0).normalized(),
                Plane(r3 - r0).normalized(),
                Plane(r3 + r1).normalized(),
                Plane(r3 - r1).normalized(),
                Plane(r2).normalized(),
                Plane(r3 - r2).normalized(),
            ],
        }
    }

    /// Moves the frustum by `matrix`, which maps points from the frustum's
    /// current space into the target space.
    pub fn transform(&self, matrix: Mat4) -> Self {
        let planes_to_target = matrix.inverse().transpose();

        Self {
            planes: self
                .planes
                .map(|plane| Plane(planes_to_target * plane.0).normalized()),
        }
    }

    pub fn contains_aabb(&self, aabb: &Aabb) -> Containment {
        let center = aabb.center();
        let extents = aabb.extents();
        let mut result = Containment::Contains;

        for plane in &self.planes {
            let reach = extents.dot(plane.normal().abs());
            let distance = plane.distance(center);

            if distance < -reach - CULL_EPSILON {
                return Containment::Disjoint;
            }

            if distance < reach {
                result = Containment::Intersects;
            }
        }

        result
    }

    pub fn contains_sphere(&self, sphere: &Sphere) -> Containment {
        let mut result = Containment::Contains;

        for plane in &self.planes {
            let distance = plane.distance(sphere.center);

            if distance < -sphere.radius - CULL_EPSILON {
                return Containment::Disjoint;
            }

            if distance < sphere.radius {
                result = Containment::Intersects;
            }
        }

        result
    }

    /// Both bounds are conservative, so either one being disjoint is enough.
    /// A volume without bounds is always drawn.
    pub fn contains(&self, volume: &BoundingVolume) -> Containment {
        let sphere = volume
            .sphere
            .map(|sphere| self.contains_sphere(&sphere))
            .unwrap_or(Containment::Intersects);

        if sphere == Containment::Disjoint {
            return sphere;
        }

        match volume.aabb {
            Some(aabb) => self.contains_aabb(&aabb),
            None if volume.sphere.is_some() => sphere,
            None => Containment::Intersects,
        }
    }
}
