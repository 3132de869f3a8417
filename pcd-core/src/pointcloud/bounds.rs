/// Axis-aligned bounding box in the internal metric frame, with cached
/// midpoints. Invariant: `*min <= *mid <= *max` and `*mid = (*min + *max) / 2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub zmin: f64,
    pub zmax: f64,
    pub xmid: f64,
    pub ymid: f64,
    pub zmid: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64, zmin: f64, zmax: f64) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
            zmin,
            zmax,
            xmid: (xmin + xmax) / 2.0,
            ymid: (ymin + ymax) / 2.0,
            zmid: (zmin + zmax) / 2.0,
        }
    }

    /// The bounding box of one of the eight octants, addressed by a 3-bit
    /// code: bit 0 selects the upper x half, bit 1 the upper y half, bit 2
    /// the upper z half.
    pub fn octant(&self, index: u8) -> Self {
        let (xmin, xmax) = if index & 1 == 0 {
            (self.xmin, self.xmid)
        } else {
            (self.xmid, self.xmax)
        };
        let (ymin, ymax) = if index & 2 == 0 {
            (self.ymin, self.ymid)
        } else {
            (self.ymid, self.ymax)
        };
        let (zmin, zmax) = if index & 4 == 0 {
            (self.zmin, self.zmid)
        } else {
            (self.zmid, self.zmax)
        };
        Self::new(xmin, xmax, ymin, ymax, zmin, zmax)
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(
            self.xmin.min(other.xmin),
            self.xmax.max(other.xmax),
            self.ymin.min(other.ymin),
            self.ymax.max(other.ymax),
            self.zmin.min(other.zmin),
            self.zmax.max(other.zmax),
        )
    }

    /// Containment check, inclusive on every face.
    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        x >= self.xmin
            && x <= self.xmax
            && y >= self.ymin
            && y <= self.ymax
            && z >= self.zmin
            && z <= self.zmax
    }

    pub fn diagonal(&self) -> f64 {
        let w = self.xmax - self.xmin;
        let l = self.ymax - self.ymin;
        let h = self.zmax - self.zmin;
        (w * w + l * l + h * h).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midpoints_are_halfway() {
        let bbox = BoundingBox::new(0.0, 2.0, -4.0, 4.0, 1.0, 3.0);
        assert_eq!(bbox.xmid, 1.0);
        assert_eq!(bbox.ymid, 0.0);
        assert_eq!(bbox.zmid, 2.0);
    }

    #[test]
    fn octants_partition_the_box() {
        let bbox = BoundingBox::new(0.0, 2.0, 0.0, 2.0, 0.0, 2.0);
        let low = bbox.octant(0);
        assert_eq!((low.xmax, low.ymax, low.zmax), (1.0, 1.0, 1.0));
        let high = bbox.octant(7);
        assert_eq!((high.xmin, high.ymin, high.zmin), (1.0, 1.0, 1.0));
        let x_only = bbox.octant(1);
        assert_eq!((x_only.xmin, x_only.ymax, x_only.zmax), (1.0, 1.0, 1.0));
    }

    #[test]
    fn union_covers_both() {
        let a = BoundingBox::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        let b = BoundingBox::new(-1.0, 0.5, 0.5, 2.0, -3.0, 0.0);
        let u = a.union(&b);
        assert_eq!((u.xmin, u.xmax), (-1.0, 1.0));
        assert_eq!((u.ymin, u.ymax), (0.0, 2.0));
        assert_eq!((u.zmin, u.zmax), (-3.0, 1.0));
    }

    #[test]
    fn contains_is_inclusive() {
        let bbox = BoundingBox::new(0.0, 1.0, 0.0, 1.0, 0.0, 1.0);
        assert!(bbox.contains(0.0, 0.0, 0.0));
        assert!(bbox.contains(1.0, 1.0, 1.0));
        assert!(!bbox.contains(1.0, 1.0, 1.0001));
    }
}
