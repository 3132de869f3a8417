use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::pointcloud::point::Point;

/// Padding applied to a degenerate bounding box axis, in meters.
const DEGENERATE_AXIS_PADDING: f64 = 0.001;

#[derive(Debug)]
struct Buffer {
    points: Vec<Point>,
    min: [f64; 3],
    max: [f64; 3],
}

impl Buffer {
    fn new() -> Self {
        Self {
            points: Vec::new(),
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }
}

/// Thread-safe ingestion buffer that hands points out in insertion order.
///
/// Fill it with [`add`](Self::add), freeze it with
/// [`initialize`](Self::initialize), then drain it from any number of
/// threads with [`next`](Self::next). After the freeze each point is
/// returned exactly once.
#[derive(Debug)]
pub struct SequentialLoader {
    buffer: Mutex<Buffer>,
    ready: Vec<Point>,
    cursor: AtomicUsize,
}

impl Default for SequentialLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialLoader {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Buffer::new()),
            ready: Vec::new(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn add(&self, point: Point) {
        let mut buffer = self.buffer.lock().unwrap();
        for (axis, value) in [point.x, point.y, point.z].into_iter().enumerate() {
            buffer.min[axis] = buffer.min[axis].min(value);
            buffer.max[axis] = buffer.max[axis].max(value);
        }
        buffer.points.push(point);
    }

    /// Freezes the buffer for retrieval. Must be called after the last
    /// `add` and before the first `next`.
    pub fn initialize(&mut self) {
        let mut buffer = self.buffer.lock().unwrap();
        self.ready = std::mem::take(&mut buffer.points);
        self.cursor.store(0, Ordering::SeqCst);
    }

    /// Hands out the next point. The boolean signals whether more calls may
    /// yield points; callers must treat `(None, true)` as "try again".
    pub fn next(&self) -> (Option<Point>, bool) {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        match self.ready.get(index) {
            Some(point) => (Some(*point), true),
            None => (None, false),
        }
    }

    pub fn len(&self) -> usize {
        let buffer = self.buffer.lock().unwrap();
        buffer.points.len() + self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Min/max extremes of all points added so far, as
    /// `[xmin, xmax, ymin, ymax, zmin, zmax]`. Degenerate axes are expanded
    /// by the padding on both sides so the tree never starts from a
    /// zero-volume box.
    pub fn bounds(&self) -> [f64; 6] {
        let buffer = self.buffer.lock().unwrap();
        let mut bounds = [0.0f64; 6];
        for axis in 0..3 {
            let (mut min, mut max) = (buffer.min[axis], buffer.max[axis]);
            if !min.is_finite() || !max.is_finite() {
                min = 0.0;
                max = 0.0;
            }
            if (max - min).abs() < DEGENERATE_AXIS_PADDING {
                min -= DEGENERATE_AXIS_PADDING;
                max += DEGENERATE_AXIS_PADDING;
            }
            bounds[axis * 2] = min;
            bounds[axis * 2 + 1] = max;
        }
        bounds
    }

    /// Releases the backing storage once the tree has been built.
    pub fn clear(&mut self) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.points = Vec::new();
        self.ready = Vec::new();
        self.cursor.store(0, Ordering::SeqCst);
    }
}
