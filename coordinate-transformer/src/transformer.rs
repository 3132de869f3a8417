use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::CStr;
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

use proj_sys as proj;

use crate::error::ProjError;

/// EPSG code type alias
pub type EpsgCode = u16;

/// WGS84 Geographic 2D (EPSG:4326)
pub const EPSG_WGS84_GEOGRAPHIC: EpsgCode = 4326;

/// WGS84 Geographic 3D (EPSG:4979)
pub const EPSG_WGS84_GEOGRAPHIC_3D: EpsgCode = 4979;

/// WGS84 Geocentric / Earth-Centered Earth-Fixed (EPSG:4978)
pub const EPSG_WGS84_GEOCENTRIC: EpsgCode = 4978;

/// World Mercator (EPSG:3395), the internal metric frame of the octree
pub const EPSG_WORLD_MERCATOR: EpsgCode = 3395;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// EPSG-to-EPSG coordinate converter backed by PROJ, with one cached,
/// axis-normalized transformation object per `(source, target)` pair.
///
/// Geographic coordinates cross this interface in degrees, lon/lat order.
/// An undefined (NaN) z is carried through: the transform runs with z = 0
/// and the output z is set back to NaN.
///
/// A PROJ context must only ever be used by one thread at a time, so the
/// converter is deliberately not `Sync`; spawn one instance per worker.
#[derive(Debug)]
pub struct CrsTransformer {
    ctx: *mut proj::PJ_CONTEXT,
    transforms: RefCell<HashMap<(EpsgCode, EpsgCode), *mut proj::PJ>>,
}

impl CrsTransformer {
    pub fn new() -> Result<Self, ProjError> {
        let ctx = unsafe { proj::proj_context_create() };
        if ctx.is_null() {
            return Err(ProjError::Init {
                context: "proj_context_create",
                message: "returned NULL".to_string(),
            });
        }
        Ok(Self {
            ctx,
            transforms: RefCell::new(HashMap::new()),
        })
    }

    /// Converts a coordinate between the given reference systems. Same-SRID
    /// conversion is the identity.
    pub fn convert(
        &self,
        src: EpsgCode,
        dst: EpsgCode,
        coord: Coordinate,
    ) -> Result<Coordinate, ProjError> {
        if src == dst {
            return Ok(coord);
        }
        let pj = self.transform_for(src, dst)?;

        let z_undefined = coord.z.is_nan();
        let z = if z_undefined { 0.0 } else { coord.z };

        unsafe {
            proj::proj_errno_reset(pj);
            let input = proj::proj_coord(coord.x, coord.y, z, 0.0);
            let output = proj::proj_trans(pj, proj::PJ_DIRECTION_PJ_FWD, input);
            let errno = proj::proj_errno(pj);
            if errno != 0 {
                return Err(ProjError::Transform {
                    src,
                    dst,
                    message: self.error_message(errno),
                });
            }
            Ok(Coordinate {
                x: output.xyz.x,
                y: output.xyz.y,
                z: if z_undefined { f64::NAN } else { output.xyz.z },
            })
        }
    }

    /// Converts planar bounds in the source system into a WGS84 region
    /// `[west, south, east, north, min_z, max_z]`, angles in radians and
    /// z values carried through unchanged.
    pub fn bbox_to_wgs84_region(
        &self,
        min: (f64, f64),
        max: (f64, f64),
        z_min: f64,
        z_max: f64,
        src: EpsgCode,
    ) -> Result<[f64; 6], ProjError> {
        let lower = self.convert(src, EPSG_WGS84_GEOGRAPHIC, Coordinate::new(min.0, min.1, 0.0))?;
        let upper = self.convert(src, EPSG_WGS84_GEOGRAPHIC, Coordinate::new(max.0, max.1, 0.0))?;
        Ok([
            lower.x.to_radians(),
            lower.y.to_radians(),
            upper.x.to_radians(),
            upper.y.to_radians(),
            z_min,
            z_max,
        ])
    }

    /// Converts a coordinate from the given system into the earth-centered
    /// earth-fixed frame tiles are emitted in.
    pub fn to_ecef(&self, coord: Coordinate, src: EpsgCode) -> Result<Coordinate, ProjError> {
        if src == EPSG_WGS84_GEOCENTRIC {
            return Ok(coord);
        }
        let geographic = self.convert(src, EPSG_WGS84_GEOGRAPHIC_3D, coord)?;
        self.convert(EPSG_WGS84_GEOGRAPHIC_3D, EPSG_WGS84_GEOCENTRIC, geographic)
    }

    /// Returns the cached transformation for the pair, creating and
    /// normalizing it on first use.
    fn transform_for(&self, src: EpsgCode, dst: EpsgCode) -> Result<*mut proj::PJ, ProjError> {
        if let Some(&pj) = self.transforms.borrow().get(&(src, dst)) {
            return Ok(pj);
        }

        let source = epsg_cstring(src)?;
        let target = epsg_cstring(dst)?;

        let pj = unsafe {
            proj::proj_create_crs_to_crs(self.ctx, source.as_ptr(), target.as_ptr(), ptr::null_mut())
        };
        if pj.is_null() {
            return Err(ProjError::UnknownCrs {
                src,
                dst,
                message: self.context_error_message(),
            });
        }

        // Normalize axis order (e.g. EPSG:4326 is lat,lon by definition)
        // so callers always see lon,lat / x,y.
        let normalized = unsafe { proj::proj_normalize_for_visualization(self.ctx, pj) };
        unsafe {
            proj::proj_destroy(pj);
        }
        if normalized.is_null() {
            return Err(ProjError::Init {
                context: "proj_normalize_for_visualization",
                message: self.context_error_message(),
            });
        }

        self.transforms.borrow_mut().insert((src, dst), normalized);
        Ok(normalized)
    }

    fn context_error_message(&self) -> String {
        let code = unsafe { proj::proj_context_errno(self.ctx) };
        self.error_message(code)
    }

    fn error_message(&self, code: i32) -> String {
        let c_msg = unsafe { proj::proj_context_errno_string(self.ctx, code) };
        if c_msg.is_null() {
            return "unknown error".to_string();
        }
        unsafe { CStr::from_ptr(c_msg as *const c_char) }
            .to_string_lossy()
            .into_owned()
    }
}

fn epsg_cstring(code: EpsgCode) -> Result<CString, ProjError> {
    CString::new(format!("EPSG:{code}")).map_err(|_| ProjError::Init {
        context: "epsg_cstring",
        message: "CRS name contains NUL byte".to_string(),
    })
}

impl Drop for CrsTransformer {
    fn drop(&mut self) {
        unsafe {
            for (_, pj) in self.transforms.borrow_mut().drain() {
                if !pj.is_null() {
                    proj::proj_destroy(pj);
                }
            }
            if !self.ctx.is_null() {
                proj::proj_context_destroy(self.ctx);
                self.ctx = ptr::null_mut();
            }
        }
    }
}

// The context and its transforms are only touched through &self from a
// single thread at a time; moving the whole converter between threads is
// safe.
unsafe impl Send for CrsTransformer {}
