pub mod common;
pub mod error;
mod structures;

use common::all_finite;
use common::clamp_u8;
use common::normalize_quat;
use common::sigmoid;
use common::DEFAULT_OPACITY;
use common::DEFAULT_SCALE;
use common::IDENTITY_QUAT;
use common::NEUTRAL_GRAY;
use common::SH_C0;
use error::SplatError;
use foldhash::HashMap;
use foldhash::HashMapExt;
use std::fs;
use std::path::Path;
use structures::DecodedPoint;
use structures::PointCloud;
use zerocopy::byteorder::little_endian::F32;
use zerocopy::IntoBytes;

pub use structures::{ConvertOptions, PointOrder, SplatRecord, Summary, RECORD_SIZE};

// Body encodings declared by the PLY format line. Each one selects a
// dedicated body decoder over the same header-derived field layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFormat {
    BinaryLittleEndian,
    Ascii,
}

// Property indices resolved from the header. Position is required;
// every other group may be absent and falls back to its default.
struct FieldLayout {
    fields: usize,
    position: [usize; 3],
    scale: Option<[usize; 3]>,
    rotation: Option<[usize; 4]>,
    opacity: Option<usize>,
    f_dc: Option<[usize; 3]>,
}

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

#[inline]
fn next_header_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    loop {
        let line = next_line(buffer, offset)?;
        if line.starts_with(b"comment") || line.starts_with(b"obj_info") {
            continue;
        }
        return Some(line);
    }
}

#[inline(always)]
fn idx_of(hm: &HashMap<&str, usize>, name: &str) -> Result<usize, SplatError> {
    hm.get(name)
        .cloned()
        .ok_or_else(|| SplatError::ParsePly(format!("Missing required field: {}", name)))
}

// A group counts as present only when every one of its fields is
// declared; a partially declared group is a malformed header.
fn group_of<const N: usize>(
    hm: &HashMap<&str, usize>,
    names: [&str; N],
) -> Result<Option<[usize; N]>, SplatError> {
    let mut indices = [0usize; N];
    let mut found = 0;
    for (slot, name) in indices.iter_mut().zip(names.iter()) {
        if let Some(&idx) = hm.get(name) {
            *slot = idx;
            found += 1;
        }
    }
    match found {
        0 => Ok(None),
        n if n == N => Ok(Some(indices)),
        _ => Err(SplatError::ParsePly(format!(
            "Incomplete field group: {}..{}",
            names[0],
            names[N - 1]
        ))),
    }
}

#[inline(always)]
fn bytes_to_f32(data: &[u8]) -> Result<f32, SplatError> {
    Ok(f32::from_le_bytes(data.try_into().map_err(|e| {
        SplatError::ParsePly(format!("Byte conversion error: {}", e))
    })?))
}

fn push_vertex(values: &[f32], layout: &FieldLayout, cloud: &mut PointCloud) {
    let [ix, iy, iz] = layout.position;
    cloud
        .positions
        .extend_from_slice(&[values[ix], values[iy], values[iz]]);

    if let (Some(idx), Some(scales)) = (&layout.scale, cloud.scales.as_mut()) {
        scales.extend(idx.iter().map(|&i| values[i]));
    }
    if let (Some(idx), Some(rotations)) = (&layout.rotation, cloud.rotations.as_mut()) {
        rotations.extend(idx.iter().map(|&i| values[i]));
    }
    if let (Some(i), Some(alphas)) = (layout.opacity, cloud.alphas.as_mut()) {
        alphas.push(values[i]);
    }
    if let (Some(idx), Some(colors)) = (&layout.f_dc, cloud.colors.as_mut()) {
        colors.extend(idx.iter().map(|&i| values[i]));
    }
}

// The declared count is only trusted for allocation once the body is
// known to be large enough to hold it.
fn empty_cloud(num_points: usize, layout: &FieldLayout, capacity: usize) -> PointCloud {
    PointCloud {
        num_points,
        positions: Vec::with_capacity(capacity * 3),
        scales: layout.scale.map(|_| Vec::with_capacity(capacity * 3)),
        rotations: layout.rotation.map(|_| Vec::with_capacity(capacity * 4)),
        alphas: layout.opacity.map(|_| Vec::with_capacity(capacity)),
        colors: layout.f_dc.map(|_| Vec::with_capacity(capacity * 3)),
    }
}

fn parse_binary_body(
    data: &[u8],
    layout: &FieldLayout,
    num_points: usize,
) -> Result<PointCloud, SplatError> {
    let expected_bytes = num_points
        .checked_mul(layout.fields)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| SplatError::ParsePly("Overflow in byte calculation".to_string()))?;

    // Trailing bytes are tolerated, non-vertex elements may follow.
    if data.len() < expected_bytes {
        return Err(SplatError::ParsePly(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            data.len()
        )));
    }

    let mut cloud = empty_cloud(num_points, layout, num_points);
    let stride = layout.fields * 4;
    let mut values = vec![0.0f32; layout.fields];
    for vertex_data in data[..expected_bytes].chunks_exact(stride) {
        for (value, bytes) in values.iter_mut().zip(vertex_data.chunks_exact(4)) {
            *value = bytes_to_f32(bytes)?;
        }
        push_vertex(&values, layout, &mut cloud);
    }
    Ok(cloud)
}

fn parse_ascii_body(
    raw_data: &[u8],
    offset: &mut usize,
    layout: &FieldLayout,
    num_points: usize,
) -> Result<PointCloud, SplatError> {
    // Every row takes at least two bytes per value, which bounds how much
    // a lying count can make us reserve.
    let max_rows = raw_data.len().saturating_sub(*offset) / (2 * layout.fields);
    let mut cloud = empty_cloud(num_points, layout, num_points.min(max_rows));

    let mut values = Vec::with_capacity(layout.fields);
    for row in 0..num_points {
        let line = next_line(raw_data, offset).ok_or_else(|| {
            SplatError::ParsePly(format!(
                "Vertex data ends early at row {} of {}",
                row, num_points
            ))
        })?;
        let text = std::str::from_utf8(line)
            .map_err(|e| SplatError::ParsePly(format!("UTF-8 error in vertex row {}: {}", row, e)))?;

        values.clear();
        for token in text.split_ascii_whitespace() {
            let value: f32 = token.parse().map_err(|e| {
                SplatError::ParsePly(format!("Bad value {:?} in vertex row {}: {}", token, row, e))
            })?;
            values.push(value);
        }
        if values.len() != layout.fields {
            return Err(SplatError::ParsePly(format!(
                "Vertex row {} has {} values, expected {}",
                row,
                values.len(),
                layout.fields
            )));
        }
        push_vertex(&values, layout, &mut cloud);
    }
    Ok(cloud)
}

#[inline(never)]
fn parse_ply(raw_data: &[u8]) -> Result<PointCloud, SplatError> {
    let mut offset = 0;

    // Line #1: "ply"
    let line1 = next_line(raw_data, &mut offset)
        .ok_or_else(|| SplatError::ParsePly("No 'ply' line".to_string()))?;
    if line1 != b"ply" {
        return Err(SplatError::ParsePly(
            "Not a .ply file (missing 'ply' header)".to_string(),
        ));
    }

    // Line #2: the format line selects the body decoder.
    let line2 = next_header_line(raw_data, &mut offset)
        .ok_or_else(|| SplatError::ParsePly("Missing format line".to_string()))?;
    let format = if line2 == b"format binary_little_endian 1.0" {
        BodyFormat::BinaryLittleEndian
    } else if line2 == b"format ascii 1.0" {
        BodyFormat::Ascii
    } else {
        return Err(SplatError::ParsePly(
            "Unsupported .ply format (only binary_little_endian 1.0 and ascii 1.0 are supported)"
                .to_string(),
        ));
    };

    // "element vertex N"; the vertex element must come first so that the
    // vertex data starts right after the header.
    let line3 = next_header_line(raw_data, &mut offset)
        .ok_or_else(|| SplatError::ParsePly("Missing 'element vertex' line".to_string()))?;
    if !line3.starts_with(b"element vertex ") {
        return Err(SplatError::ParsePly(
            "Missing 'element vertex' definition".to_string(),
        ));
    }
    let num_str = &line3[b"element vertex ".len()..];
    let num_points: usize = {
        let s = std::str::from_utf8(num_str)
            .map_err(|e| SplatError::ParsePly(format!("UTF-8 error: {}", e)))?
            .trim();
        s.parse()
            .map_err(|e| SplatError::ParsePly(format!("Parse error: {}", e)))?
    };
    // If there are 0 vertices, return an empty PointCloud
    if num_points == 0 {
        return Ok(PointCloud::default());
    }

    let mut field_names = Vec::new();
    let mut in_vertex = true;
    loop {
        let line = match next_header_line(raw_data, &mut offset) {
            Some(l) => l,
            None => {
                return Err(SplatError::ParsePly(
                    "No 'end_header' found before EOF".to_string(),
                ))
            }
        };

        if line.starts_with(b"end_header") {
            break;
        }

        // Properties of later elements (faces etc.) do not contribute to
        // the vertex layout.
        if line.starts_with(b"element ") {
            in_vertex = false;
            continue;
        }
        if !in_vertex {
            continue;
        }

        // Only "property float <name>" is supported on the vertex element
        if !line.starts_with(b"property float ") {
            return Err(SplatError::ParsePly(format!(
                "Unsupported property line: {:?}",
                line
            )));
        }

        let raw_name = &line[b"property float ".len()..];
        field_names.push(raw_name);
    }

    // Build field map
    let mut field_map: HashMap<&str, usize> = HashMap::with_capacity(field_names.len());
    for (i, &f_bytes) in field_names.iter().enumerate() {
        let s = std::str::from_utf8(f_bytes)
            .map_err(|e| SplatError::ParsePly(format!("UTF-8 error in field name: {}", e)))?;
        field_map.insert(s, i);
    }

    let layout = FieldLayout {
        fields: field_names.len(),
        position: [
            idx_of(&field_map, "x")?,
            idx_of(&field_map, "y")?,
            idx_of(&field_map, "z")?,
        ],
        scale: group_of(&field_map, ["scale_0", "scale_1", "scale_2"])?,
        rotation: group_of(&field_map, ["rot_0", "rot_1", "rot_2", "rot_3"])?,
        opacity: field_map.get("opacity").cloned(),
        f_dc: group_of(&field_map, ["f_dc_0", "f_dc_1", "f_dc_2"])?,
    };

    match format {
        BodyFormat::BinaryLittleEndian => parse_binary_body(&raw_data[offset..], &layout, num_points),
        BodyFormat::Ascii => parse_ascii_body(raw_data, &mut offset, &layout, num_points),
    }
}

// Per-point decode is independent of input order. A non-finite position
// drops the point; a non-finite value in any other group after its
// transform falls back to that group's default.
fn decode_points(cloud: &PointCloud, options: &ConvertOptions) -> (Vec<DecodedPoint>, usize) {
    let mut points = Vec::with_capacity(cloud.num_points);
    let mut dropped = 0usize;

    for i in 0..cloud.num_points {
        let mut position = [
            cloud.positions[i * 3],
            cloud.positions[i * 3 + 1],
            cloud.positions[i * 3 + 2],
        ];
        if !all_finite(&position) {
            dropped += 1;
            continue;
        }
        if options.flip_y {
            position[1] = -position[1];
        }
        if options.flip_z {
            position[2] = -position[2];
        }

        let mut scale = match cloud.scales.as_deref() {
            Some(s) => [
                s[i * 3].exp(),
                s[i * 3 + 1].exp(),
                s[i * 3 + 2].exp(),
            ],
            None => [DEFAULT_SCALE; 3],
        };
        if !all_finite(&scale) {
            scale = [DEFAULT_SCALE; 3];
        }

        let mut color = match cloud.colors.as_deref() {
            Some(c) => [
                (NEUTRAL_GRAY + SH_C0 * c[i * 3]).clamp(0.0, 1.0),
                (NEUTRAL_GRAY + SH_C0 * c[i * 3 + 1]).clamp(0.0, 1.0),
                (NEUTRAL_GRAY + SH_C0 * c[i * 3 + 2]).clamp(0.0, 1.0),
            ],
            None => [NEUTRAL_GRAY; 3],
        };
        if !all_finite(&color) {
            color = [NEUTRAL_GRAY; 3];
        }

        let mut opacity = match cloud.alphas.as_deref() {
            Some(a) => sigmoid(a[i]),
            None => DEFAULT_OPACITY,
        };
        if !opacity.is_finite() {
            opacity = DEFAULT_OPACITY;
        }

        // Zero or non-finite quaternions collapse to the identity inside
        // normalize_quat, never a division by zero.
        let rotation = match cloud.rotations.as_deref() {
            Some(r) => normalize_quat([r[i * 4], r[i * 4 + 1], r[i * 4 + 2], r[i * 4 + 3]]),
            None => IDENTITY_QUAT,
        };

        let importance = scale[0] * scale[1] * scale[2] * opacity;

        points.push(DecodedPoint {
            position,
            scale,
            color,
            opacity,
            rotation,
            importance,
        });
    }

    (points, dropped)
}

// Both orderings are stable total orders: total_cmp never panics on the
// key and the stable sort breaks ties by original input index.
fn order_points(points: &mut [DecodedPoint], order: PointOrder) {
    match order {
        PointOrder::Importance => {
            points.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        }
        PointOrder::Depth => {
            points.sort_by(|a, b| a.position[2].total_cmp(&b.position[2]));
        }
    }
}

fn pack_points(points: &[DecodedPoint], output: &mut Vec<u8>) {
    output.reserve(points.len() * RECORD_SIZE);
    for point in points {
        let record = SplatRecord {
            position: point.position.map(F32::new),
            scale: point.scale.map(F32::new),
            color: [
                clamp_u8(point.color[0] * 255.0),
                clamp_u8(point.color[1] * 255.0),
                clamp_u8(point.color[2] * 255.0),
                clamp_u8(point.opacity * 255.0),
            ],
            rotation: point.rotation.map(|q| clamp_u8(q * 128.0 + 128.0)),
        };
        output.extend_from_slice(record.as_bytes());
    }
}

pub fn transcode(
    raw_data: &[u8],
    options: &ConvertOptions,
    output: &mut Vec<u8>,
) -> Result<Summary, SplatError> {
    let cloud = parse_ply(raw_data)?;
    if cloud.num_points == 0 {
        return Err(SplatError::EmptyPointCloud);
    }

    let (mut points, dropped) = decode_points(&cloud, options);
    if points.is_empty() {
        return Err(SplatError::NoRenderablePoints);
    }
    if dropped > 0 {
        log::info!("Dropped {} points with non-finite positions", dropped);
    }
    log::debug!(
        "Decoded {} of {} points, ordering by {:?}",
        points.len(),
        cloud.num_points,
        options.order
    );

    order_points(&mut points, options.order);

    output.clear();
    pack_points(&points, output);

    Ok(Summary {
        input_count: cloud.num_points,
        output_count: points.len(),
        input_size_bytes: raw_data.len(),
        output_size_bytes: output.len(),
    })
}

pub fn convert(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    options: &ConvertOptions,
) -> Result<Summary, SplatError> {
    let raw_data = fs::read(input_path.as_ref()).map_err(SplatError::IoError)?;
    let mut packed = Vec::new();
    let summary = transcode(&raw_data, options, &mut packed)?;
    if let Err(e) = fs::write(output_path.as_ref(), &packed) {
        // A half-written file must not be left looking like a valid stream
        let _ = fs::remove_file(output_path.as_ref());
        return Err(SplatError::IoError(e));
    }
    Ok(summary)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    pub async fn convert_async(
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        options: &ConvertOptions,
    ) -> Result<Summary, SplatError> {
        let raw_data = tokio::fs::read(input_path.as_ref())
            .await
            .map_err(SplatError::IoError)?;
        let mut packed = Vec::new();
        let summary = transcode(&raw_data, options, &mut packed)?;
        if let Err(e) = tokio::fs::write(output_path.as_ref(), &packed).await {
            let _ = tokio::fs::remove_file(output_path.as_ref()).await;
            return Err(SplatError::IoError(e));
        }
        Ok(summary)
    }
}
}
