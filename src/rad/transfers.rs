//! Form-factor transfers and the bounce loop.
//!
//! For every patch the transfer list stores the patches it receives
//! light from, as sorted indices plus a packed factor array. Factors
//! are normalized per receiver so a patch never gathers more energy
//! than arrives, which keeps the bounce iteration stable. The list
//! can be cached in `<map>.inc` between runs.

use std::{io::Read, path::Path};

use glam::DVec3;

use crate::threads::run_threads_on;

use super::{
    compress::{float_compress, float_decompress, vector_compress, vector_decompress, FloatFormat, VectorFormat},
    patch::{PatchArena, StyleLights},
    vismatrix::VisMatrix,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    /// One packed scalar per transfer; color transport is uniform.
    Scalar(FloatFormat),
    /// A packed RGB triple per transfer; opaque colored shadows feed
    /// color into the transport itself.
    Rgb(VectorFormat),
}

impl TransferFormat {
    pub fn entry_size(self) -> usize {
        match self {
            Self::Scalar(f) => f.size(),
            Self::Rgb(v) => v.size(),
        }
    }
}

pub struct PatchTransfers {
    /// Ascending source-patch indices.
    pub indices: Vec<u32>,
    /// Packed factors, `entry_size` bytes each.
    pub data: Vec<u8>,
}

pub struct Transfers {
    pub format: TransferFormat,
    pub per_patch: Vec<PatchTransfers>,
}

fn pack_scalar(format: FloatFormat, value: f32, out: &mut Vec<u8>) {
    let packed = float_compress(format, value);
    out.extend_from_slice(&packed.to_le_bytes()[..format.size()]);
}

fn unpack_scalar(format: FloatFormat, data: &[u8]) -> f32 {
    let mut bytes = [0u8; 4];
    bytes[..format.size()].copy_from_slice(&data[..format.size()]);
    float_decompress(format, u32::from_le_bytes(bytes))
}

fn pack_rgb(format: VectorFormat, value: [f32; 3], out: &mut Vec<u8>) {
    let packed = vector_compress(format, value);
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&packed[0].to_le_bytes());
    bytes[4..8].copy_from_slice(&packed[1].to_le_bytes());
    bytes[8..12].copy_from_slice(&packed[2].to_le_bytes());
    out.extend_from_slice(&bytes[..format.size()]);
}

fn unpack_rgb(format: VectorFormat, data: &[u8]) -> [f32; 3] {
    let mut bytes = [0u8; 12];
    bytes[..format.size()].copy_from_slice(&data[..format.size()]);
    let words = [
        u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
    ];
    vector_decompress(format, words)
}

/// Geometric coupling between two mutually visible patches: the disc
/// form factor, scaled by the sender's area.
fn form_factor(a: &super::patch::Patch, b: &super::patch::Patch) -> f64 {
    let delta = b.origin - a.origin;
    let dist_squared = delta.length_squared().max(1.0);
    let dist = dist_squared.sqrt();
    let dir = delta / dist;

    let cos_a = dir.dot(a.normal).max(0.0);
    let cos_b = (-dir).dot(b.normal).max(0.0);

    cos_a * cos_b / (std::f64::consts::PI * dist_squared)
}

/// Builds every patch's incoming transfer list from the visibility
/// matrix. Factors normalize per receiver when they sum past one.
pub fn make_transfers(
    arena: &PatchArena,
    matrix: &VisMatrix,
    format: TransferFormat,
    threads: usize,
    estimate: bool,
) -> Transfers {
    let patch_count = arena.patches.len();

    let per_patch: Vec<PatchTransfers> = run_threads_on(threads, patch_count, estimate, |i| {
        let patch = &arena.patches[i];

        let mut raw: Vec<(u32, f64)> = Vec::new();
        for (j, other) in arena.patches.iter().enumerate() {
            if j == i || !matrix.check(i, j) {
                continue;
            }
            let factor = form_factor(patch, other) * other.area;
            if factor > 0.0 {
                raw.push((j as u32, factor));
            }
        }

        // energy cap: never gather more than arrives
        let total: f64 = raw.iter().map(|(_, f)| f).sum();
        if total > 1.0 {
            for (_, f) in raw.iter_mut() {
                *f /= total;
            }
        }

        let mut indices = Vec::with_capacity(raw.len());
        let mut data = Vec::with_capacity(raw.len() * format.entry_size());
        for (j, factor) in raw {
            indices.push(j);
            match format {
                TransferFormat::Scalar(f) => pack_scalar(f, factor as f32, &mut data),
                TransferFormat::Rgb(v) => {
                    pack_rgb(v, [factor as f32, factor as f32, factor as f32], &mut data)
                }
            }
        }

        PatchTransfers { indices, data }
    });

    Transfers { format, per_patch }
}

impl Transfers {
    pub fn total_entries(&self) -> usize {
        self.per_patch.iter().map(|t| t.indices.len()).sum()
    }

    /// Gathered incoming light for one patch given everybody's
    /// current emission.
    fn gather(&self, patch: usize, emit: &[StyleLights]) -> StyleLights {
        let transfers = &self.per_patch[patch];
        let entry_size = self.format.entry_size();
        let mut gathered = StyleLights::default();

        for (slot, &j) in transfers.indices.iter().enumerate() {
            let data = &transfers.data[slot * entry_size..];
            let factor = match self.format {
                TransferFormat::Scalar(f) => {
                    let s = unpack_scalar(f, data) as f64;
                    DVec3::splat(s)
                }
                TransferFormat::Rgb(v) => {
                    let [r, g, b] = unpack_rgb(v, data);
                    DVec3::new(r as f64, g as f64, b as f64)
                }
            };

            for (style, light) in emit[j as usize].iter() {
                gathered.add(style, light * factor);
            }
        }

        gathered
    }
}

/// Runs the bounce iterations. Patches must already carry their direct
/// light; afterwards `total` holds the bounced light alone (the
/// lightmap pass samples direct light at finer resolution itself).
pub fn bounce_light(
    arena: &mut PatchArena,
    transfers: &Transfers,
    bounces: usize,
    threads: usize,
    estimate: bool,
) {
    for patch in arena.patches.iter_mut() {
        patch.total = StyleLights::default();
    }

    let mut emit: Vec<StyleLights> = arena.patches.iter().map(|p| p.direct.clone()).collect();

    for _bounce in 0..bounces {
        let gathered: Vec<StyleLights> = run_threads_on(
            threads,
            arena.patches.len(),
            estimate,
            |i| transfers.gather(i, &emit),
        );

        // reflect and accumulate, in patch order for determinism
        let mut next_emit = Vec::with_capacity(arena.patches.len());
        for (patch, incoming) in arena.patches.iter_mut().zip(gathered) {
            let mut reflected = StyleLights::default();
            for (style, light) in incoming.iter() {
                reflected.add(style, light * patch.reflectivity);
            }
            for (style, light) in reflected.iter() {
                patch.total.add(style, light);
            }
            next_emit.push(reflected);
        }
        emit = next_emit;
    }
}

const INC_MAGIC: &[u8; 4] = b"HLTI";

/// Writes the `<map>.inc` incremental cache.
pub fn write_transfer_cache(path: &Path, transfers: &Transfers) -> std::io::Result<()> {
    let mut out = Vec::new();
    out.extend_from_slice(INC_MAGIC);

    let tag: u8 = match transfers.format {
        TransferFormat::Scalar(FloatFormat::Float32) => 0,
        TransferFormat::Scalar(FloatFormat::Float16) => 1,
        TransferFormat::Scalar(FloatFormat::Float8) => 2,
        TransferFormat::Rgb(VectorFormat::Vector96) => 3,
        TransferFormat::Rgb(VectorFormat::Vector48) => 4,
        TransferFormat::Rgb(VectorFormat::Vector32) => 5,
        TransferFormat::Rgb(VectorFormat::Vector24) => 6,
    };
    out.push(tag);
    out.extend_from_slice(&(transfers.per_patch.len() as u32).to_le_bytes());

    for patch in &transfers.per_patch {
        out.extend_from_slice(&(patch.indices.len() as u32).to_le_bytes());
        for &index in &patch.indices {
            out.extend_from_slice(&index.to_le_bytes());
        }
        out.extend_from_slice(&patch.data);
    }

    std::fs::write(path, out)
}

/// Reads the cache back; None when missing, stale or mismatched.
pub fn read_transfer_cache(path: &Path, expected_patches: usize) -> Option<Transfers> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).ok()?;
    drop(file);

    let mut at = 0usize;
    let mut take = |n: usize| -> Option<&[u8]> {
        let slice = bytes.get(at..at + n)?;
        at += n;
        Some(slice)
    };

    if take(4)? != INC_MAGIC {
        return None;
    }
    let format = match take(1)?[0] {
        0 => TransferFormat::Scalar(FloatFormat::Float32),
        1 => TransferFormat::Scalar(FloatFormat::Float16),
        2 => TransferFormat::Scalar(FloatFormat::Float8),
        3 => TransferFormat::Rgb(VectorFormat::Vector96),
        4 => TransferFormat::Rgb(VectorFormat::Vector48),
        5 => TransferFormat::Rgb(VectorFormat::Vector32),
        6 => TransferFormat::Rgb(VectorFormat::Vector24),
        _ => return None,
    };

    let patch_count = u32::from_le_bytes(take(4)?.try_into().ok()?) as usize;
    if patch_count != expected_patches {
        return None;
    }

    let entry_size = format.entry_size();
    let mut per_patch = Vec::with_capacity(patch_count);
    for _ in 0..patch_count {
        let count = u32::from_le_bytes(take(4)?.try_into().ok()?) as usize;
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(u32::from_le_bytes(take(4)?.try_into().ok()?));
        }
        let data = take(count * entry_size)?.to_vec();
        per_patch.push(PatchTransfers { indices, data });
    }

    Some(Transfers { format, per_patch })
}

/// Removes a stale cache; errors are not interesting.
pub fn remove_transfer_cache(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rad::patch::Patch;
    use crate::winding::Winding;

    fn patch_at(origin: DVec3, normal: DVec3, area: f64) -> Patch {
        Patch {
            face: 0,
            winding: Winding::default(),
            area,
            origin,
            normal,
            leaf: 1,
            reflectivity: DVec3::splat(0.5),
            base_light: DVec3::ZERO,
            emit_style: 0,
            emitter_range: area.sqrt(),
            direct: StyleLights::default(),
            total: StyleLights::default(),
        }
    }

    #[test]
    fn form_factor_follows_inverse_square() {
        let a = patch_at(DVec3::ZERO, DVec3::Z, 64.0);
        let near = patch_at(DVec3::new(0.0, 0.0, 100.0), -DVec3::Z, 64.0);
        let far = patch_at(DVec3::new(0.0, 0.0, 200.0), -DVec3::Z, 64.0);

        let f_near = form_factor(&a, &near);
        let f_far = form_factor(&a, &far);
        assert!((f_near / f_far - 4.0).abs() < 1e-9);
    }

    #[test]
    fn facing_away_transfers_nothing() {
        let a = patch_at(DVec3::ZERO, DVec3::Z, 64.0);
        let behind = patch_at(DVec3::new(0.0, 0.0, -100.0), DVec3::Z, 64.0);
        assert_eq!(form_factor(&a, &behind), 0.0);
    }

    #[test]
    fn cache_round_trip() {
        let transfers = Transfers {
            format: TransferFormat::Scalar(FloatFormat::Float16),
            per_patch: vec![
                PatchTransfers {
                    indices: vec![1, 2],
                    data: {
                        let mut d = Vec::new();
                        pack_scalar(FloatFormat::Float16, 0.25, &mut d);
                        pack_scalar(FloatFormat::Float16, 0.125, &mut d);
                        d
                    },
                },
                PatchTransfers {
                    indices: vec![],
                    data: vec![],
                },
            ],
        };

        let dir = std::env::temp_dir().join("hlt_inc_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.inc");

        write_transfer_cache(&path, &transfers).unwrap();

        let back = read_transfer_cache(&path, 2).unwrap();
        assert_eq!(back.format, transfers.format);
        assert_eq!(back.per_patch[0].indices, vec![1, 2]);
        assert!((unpack_scalar(FloatFormat::Float16, &back.per_patch[0].data) - 0.25).abs() < 1e-3);

        // mismatched patch count invalidates the cache
        assert!(read_transfer_cache(&path, 3).is_none());
    }

    #[test]
    fn scalar_pack_widths() {
        for format in [FloatFormat::Float32, FloatFormat::Float16, FloatFormat::Float8] {
            let mut data = Vec::new();
            pack_scalar(format, 0.5, &mut data);
            assert_eq!(data.len(), format.size());
            let back = unpack_scalar(format, &data);
            assert!((back - 0.5).abs() < 0.05);
        }
    }
}
