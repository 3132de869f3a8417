pub mod cell;
pub mod node;
pub mod tree;

/// EPSG code of the internal frame: World Mercator, a cartesian metric
/// reference system the whole tree is indexed in.
pub const INTERNAL_CRS_EPSG: u16 = 3395;
