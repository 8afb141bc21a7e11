//! Core constants of the EPSG:3857 tile pyramid and engine-wide defaults.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Half the width of the Web Mercator world in metres.
pub const HALF_WORLD: f64 = 20_037_508.342_789_244;

/// Width of the whole pyramid at zoom 0 (one tile) in metres.
pub const BASE_SPAN: f64 = 2.0 * HALF_WORLD;

/// Top-left corner of the pyramid; tile `y` grows southwards from here.
pub const ORIGIN: (f64, f64) = (-HALF_WORLD, HALF_WORLD);

/// Spherical Mercator radius used by EPSG:3857.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Deepest zoom the pyramid supports.
pub const MAX_ZOOM: u8 = 30;

/// Distance transforms above this zoom are coarsened first.
pub const DEFAULT_MAX_DISTANCE_ZOOM: u8 = 20;

/// Tile budget used when deriving a project zoom from its extent.
pub const DEFAULT_ZOOM_TILE_BUDGET: u64 = 1_000_000;

/// Square metres per square kilometre.
pub const M2_PER_KM2: f64 = 1_000_000.0;
