use zerocopy::byteorder::little_endian::F32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const RECORD_SIZE: usize = 32;

// Raw per-field values as parsed from the PLY body. Optional groups are
// None when the header does not declare them; scales stay in the log
// domain and alphas in the logit domain until decoding.
#[derive(Debug, Default, Clone)]
pub struct PointCloud {
    pub num_points: usize,
    pub positions: Vec<f32>,
    pub scales: Option<Vec<f32>>,
    pub rotations: Option<Vec<f32>>,
    pub alphas: Option<Vec<f32>>,
    pub colors: Option<Vec<f32>>,
}

// One decoded splat: everything finite, scale linear, color and opacity
// in [0, 1], rotation a unit quaternion stored w-first.
#[derive(Debug, Clone, Copy)]
pub struct DecodedPoint {
    pub position: [f32; 3],
    pub scale: [f32; 3],
    pub color: [f32; 3],
    pub opacity: f32,
    pub rotation: [f32; 4],
    pub importance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointOrder {
    // Linear volume times opacity, largest first.
    #[default]
    Importance,
    // Ascending by the transformed Z coordinate.
    Depth,
}

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub order: PointOrder,
    pub flip_y: bool,
    pub flip_z: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub input_count: usize,
    pub output_count: usize,
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
}

// The 32-byte wire record. The output stream is the raw concatenation
// of these with no header, padding, or delimiters; field order, widths,
// and little-endian byte order are a frozen contract.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SplatRecord {
    pub position: [F32; 3],
    pub scale: [F32; 3],
    pub color: [u8; 4],
    pub rotation: [u8; 4],
}
