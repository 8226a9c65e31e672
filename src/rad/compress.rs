//! Packed storage for form-factor transfers.
//!
//! A bounce matrix over tens of thousands of patches dwarfs every
//! other allocation in the compiler, so scalar transfers pack into 16
//! or 8 bits and RGB transfers into 24/32/48/96. The packing keeps a
//! slice of the float's mantissa at a fixed exponent window: values in
//! [2^-30, 2.0) survive with bounded relative error, smaller flush to
//! zero and bigger saturate.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatFormat {
    Float32,
    Float16,
    Float8,
}

impl FloatFormat {
    pub fn size(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 => 2,
            Self::Float8 => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "32" => Self::Float32,
            "16" => Self::Float16,
            "8" => Self::Float8,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorFormat {
    Vector96,
    Vector48,
    Vector32,
    Vector24,
}

impl VectorFormat {
    pub fn size(self) -> usize {
        match self {
            Self::Vector96 => 12,
            Self::Vector48 => 6,
            Self::Vector32 => 4,
            Self::Vector24 => 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "96" => Self::Vector96,
            "48" => Self::Vector48,
            "32" => Self::Vector32,
            "24" => Self::Vector24,
            _ => return None,
        })
    }
}

fn bitget(i: u32, start: u32, end: u32) -> u32 {
    let mask = if end >= 32 { u32::MAX } else { !(u32::MAX << end) };
    (i & mask) >> start
}

fn bitput(i: u32, start: u32) -> u32 {
    i.checked_shl(start).unwrap_or(0)
}

fn is_wrong(bits: u32) -> bool {
    bits >= 0x7F80_0000 // NaN, inf, or negative
}

fn is_too_big(bits: u32) -> bool {
    bits >= 0x4000_0000 // >= 2.0
}

fn is_too_small(bits: u32) -> bool {
    bits < 0x3080_0000 // < 2^-30
}

pub fn float_compress(format: FloatFormat, value: f32) -> u32 {
    let bits = value.to_bits();
    match format {
        FloatFormat::Float32 => bits,
        FloatFormat::Float16 => {
            if is_wrong(bits) || is_too_small(bits) {
                0
            } else if is_too_big(bits) {
                bitget(u32::MAX, 0, 16)
            } else {
                bitget(bits, 12, 28)
            }
        }
        FloatFormat::Float8 => {
            if is_wrong(bits) || is_too_small(bits) {
                0
            } else if is_too_big(bits) {
                bitget(u32::MAX, 0, 8)
            } else {
                bitget(bits, 20, 28)
            }
        }
    }
}

pub fn float_decompress(format: FloatFormat, packed: u32) -> f32 {
    match format {
        FloatFormat::Float32 => f32::from_bits(packed),
        FloatFormat::Float16 => {
            let bits = bitget(packed, 0, 16);
            if bits == 0 {
                return 0.0;
            }
            f32::from_bits(bitput(1, 11) | bitput(bits, 12) | bitput(3, 28))
        }
        FloatFormat::Float8 => {
            let bits = bitget(packed, 0, 8);
            if bits == 0 {
                return 0.0;
            }
            f32::from_bits(bitput(1, 19) | bitput(bits, 20) | bitput(3, 28))
        }
    }
}

/// Packs an RGB triple into the format's byte width. The 32/24-bit
/// forms share one exponent across all three channels.
pub fn vector_compress(format: VectorFormat, rgb: [f32; 3]) -> [u32; 3] {
    let bits = rgb.map(f32::to_bits);

    match format {
        VectorFormat::Vector96 => bits,
        VectorFormat::Vector48 => {
            let pack = |b: u32| {
                if is_wrong(b) || is_too_small(b) {
                    0
                } else if is_too_big(b) {
                    bitget(u32::MAX, 0, 16)
                } else {
                    bitget(b, 12, 28)
                }
            };
            let (r, g, b) = (pack(bits[0]), pack(bits[1]), pack(bits[2]));
            [r | bitput(g, 16), b, 0]
        }
        VectorFormat::Vector32 | VectorFormat::Vector24 => {
            let (max, i): (u32, [u32; 3]) =
                if bits.iter().any(|&b| is_wrong(b)) {
                    (0, [0; 3])
                } else {
                    let raw_max = bits.iter().copied().max().unwrap();
                    let max = if is_too_big(raw_max) {
                        0x7F
                    } else if is_too_small(raw_max) {
                        0x60
                    } else {
                        bitget(raw_max, 23, 31)
                    };
                    let mantissa = |b: u32| {
                        if is_too_big(b) {
                            u32::MAX
                        } else {
                            // implicit leading 1, shifted down to the
                            // shared exponent
                            (bitget(b, 0, 23) | bitput(1, 23))
                                >> ((1 + max - bitget(b, 23, 31)) % 32)
                        }
                    };
                    (max, [mantissa(bits[0]), mantissa(bits[1]), mantissa(bits[2])])
                };

            if format == VectorFormat::Vector32 {
                [
                    bitput(bitget(i[0], 14, 23), 0)
                        | bitput(bitget(i[1], 14, 23), 9)
                        | bitput(bitget(i[2], 14, 23), 18)
                        | bitput(bitget(max, 0, 5), 27),
                    0,
                    0,
                ]
            } else {
                [
                    bitput(bitget(i[0], 17, 23), 0)
                        | bitput(bitget(i[1], 17, 23), 6)
                        | bitput(bitget(i[2], 17, 23), 12)
                        | bitput(bitget(max, 0, 5), 18),
                    0,
                    0,
                ]
            }
        }
    }
}

pub fn vector_decompress(format: VectorFormat, packed: [u32; 3]) -> [f32; 3] {
    match format {
        VectorFormat::Vector96 => packed.map(f32::from_bits),
        VectorFormat::Vector48 => {
            let unpack = |bits: u32| {
                if bits == 0 {
                    0.0
                } else {
                    f32::from_bits(bitput(1, 11) | bitput(bits, 12) | bitput(3, 28))
                }
            };
            [
                unpack(bitget(packed[0], 0, 16)),
                unpack(bitget(packed[0], 16, 32)),
                unpack(bitget(packed[1], 0, 16)),
            ]
        }
        VectorFormat::Vector32 | VectorFormat::Vector24 => {
            let m = packed[0];
            let (fields, exponent_at, mantissa_at) = if format == VectorFormat::Vector32 {
                ([bitget(m, 0, 9), bitget(m, 9, 18), bitget(m, 18, 27)], bitget(m, 27, 32), 14)
            } else {
                ([bitget(m, 0, 6), bitget(m, 6, 12), bitget(m, 12, 18)], bitget(m, 18, 23), 17)
            };

            let base = f32::from_bits(bitput(exponent_at, 23) | bitput(3, 28));
            fields.map(|field| {
                let value = f32::from_bits(
                    bitput(1, mantissa_at - 1)
                        | bitput(field, mantissa_at)
                        | bitput(exponent_at, 23)
                        | bitput(3, 28),
                );
                (value - base) * 2.0
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn float16_round_trip_error_is_bounded() {
        for value in [0.123f32, 1.0, 0.5, 0.001, 1.9] {
            let packed = float_compress(FloatFormat::Float16, value);
            let back = float_decompress(FloatFormat::Float16, packed);
            assert!(
                (back - value).abs() / value < 1.0 / 4096.0,
                "{value} -> {back}"
            );
        }
    }

    #[test]
    fn float16_matches_reference_values() {
        // the reference implementation's compatibility vector
        let packed = float_compress(FloatFormat::Float16, 0.123);
        let back = float_decompress(FloatFormat::Float16, packed);
        assert!((back - 0.123001).abs() < 1e-5);

        assert_eq!(float_decompress(FloatFormat::Float16, 0), 0.0);
    }

    #[test]
    fn out_of_range_saturates() {
        // too big clamps near 2.0, too small flushes to zero
        let big = float_decompress(
            FloatFormat::Float16,
            float_compress(FloatFormat::Float16, 100.0),
        );
        assert!(big > 1.9);

        let tiny = float_decompress(
            FloatFormat::Float16,
            float_compress(FloatFormat::Float16, 1e-12),
        );
        assert_eq!(tiny, 0.0);

        let nan = float_decompress(
            FloatFormat::Float16,
            float_compress(FloatFormat::Float16, f32::NAN),
        );
        assert_eq!(nan, 0.0);
    }

    #[test]
    fn float8_coarser_than_float16() {
        let value = 0.7f32;
        let fine = float_decompress(
            FloatFormat::Float16,
            float_compress(FloatFormat::Float16, value),
        );
        let coarse = float_decompress(
            FloatFormat::Float8,
            float_compress(FloatFormat::Float8, value),
        );
        assert!((fine - value).abs() <= (coarse - value).abs() + 1e-6);
        assert!((coarse - value).abs() / value < 1.0 / 16.0);
    }

    #[test]
    fn vector24_reference_values() {
        // 0.123, 1.0, 0.0 -> 0.109375, 1.015625, 0.015625 in the
        // original's shared-exponent packing
        let packed = vector_compress(VectorFormat::Vector24, [0.123, 1.0, 0.0]);
        let back = vector_decompress(VectorFormat::Vector24, packed);

        assert!((back[0] - 0.109375).abs() < 1e-5);
        assert!((back[1] - 1.015625).abs() < 1e-5);
        assert!((back[2] - 0.015625).abs() < 1e-5);
    }

    #[test]
    fn vector48_round_trip() {
        let rgb = [0.25f32, 0.5, 0.75];
        let packed = vector_compress(VectorFormat::Vector48, rgb);
        let back = vector_decompress(VectorFormat::Vector48, packed);
        for (a, b) in rgb.iter().zip(back) {
            assert!((a - b).abs() / a < 1.0 / 4096.0);
        }
    }

    #[test]
    fn vector96_is_lossless() {
        let rgb = [0.123f32, 456.789, 1e-20];
        let packed = vector_compress(VectorFormat::Vector96, rgb);
        assert_eq!(vector_decompress(VectorFormat::Vector96, packed), rgb);
    }

    #[test]
    fn vector32_tighter_than_vector24() {
        let rgb = [0.3f32, 0.6, 0.9];
        let p32 = vector_decompress(
            VectorFormat::Vector32,
            vector_compress(VectorFormat::Vector32, rgb),
        );
        let p24 = vector_decompress(
            VectorFormat::Vector24,
            vector_compress(VectorFormat::Vector24, rgb),
        );

        for c in 0..3 {
            assert!((p32[c] - rgb[c]).abs() <= (p24[c] - rgb[c]).abs() + 1e-6);
        }
    }
}
