//! Sample-level μ-law companding
//!
//! Standard G.711 μ-law: the 16-bit sample is reduced to 14 bits, biased,
//! and split into a 3-bit segment (exponent) and 4-bit mantissa. The code
//! byte is stored inverted, as on the wire in every G.711 implementation.

const BIAS: i16 = 0x84;
const CLIP: i16 = 8159;

/// Upper bound of each segment, in biased 14-bit magnitude
const SEGMENT_END: [i16; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

static DECODE_TABLE: [i16; 256] = build_decode_table();

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut code = 0;
    while code < 256 {
        table[code] = expand(code as u8);
        code += 1;
    }
    table
}

const fn expand(code: u8) -> i16 {
    let u = !code;
    let mut t = (((u & 0x0F) as i16) << 3) + BIAS;
    t <<= (u & 0x70) >> 4;
    if u & 0x80 != 0 {
        BIAS - t
    } else {
        t - BIAS
    }
}

/// Compress one linear sample to its μ-law code
pub const fn encode_sample(sample: i16) -> u8 {
    // 16 -> 14 bit; arithmetic shift keeps negatives negative
    let mut pcm = sample >> 2;
    let mask: u8 = if pcm < 0 {
        pcm = -pcm;
        0x7F
    } else {
        0xFF
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS >> 2;

    let mut segment = 0;
    while segment < 8 && pcm > SEGMENT_END[segment] {
        segment += 1;
    }
    if segment >= 8 {
        return 0x7F ^ mask;
    }

    let code = ((segment as u8) << 4) | (((pcm >> (segment + 1)) & 0x0F) as u8);
    code ^ mask
}

/// Expand one μ-law code back to a linear sample
#[inline]
pub fn decode_sample(code: u8) -> i16 {
    DECODE_TABLE[code as usize]
}

/// Encode `pcm` into `out`, returning the number of bytes written.
///
/// Processes `min(pcm.len(), out.len())` samples; a short slice simply
/// yields a short result.
pub fn encode(pcm: &[i16], out: &mut [u8]) -> usize {
    let count = pcm.len().min(out.len());
    for (dst, &sample) in out[..count].iter_mut().zip(pcm) {
        *dst = encode_sample(sample);
    }
    count
}

/// Decode `ulaw` into `out`, returning the number of samples written.
pub fn decode(ulaw: &[u8], out: &mut [i16]) -> usize {
    let count = ulaw.len().min(out.len());
    for (dst, &code) in out[..count].iter_mut().zip(ulaw) {
        *dst = decode_sample(code);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(sample: i16) -> i16 {
        decode_sample(encode_sample(sample))
    }

    #[test]
    fn test_zero_is_exact() {
        assert_eq!(encode_sample(0), 0xFF);
        assert_eq!(round_trip(0), 0);
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(encode_sample(i16::MAX), 0x80);
        assert_eq!(encode_sample(i16::MIN), 0x00);
        assert_eq!(decode_sample(0x80), 32124);
        assert_eq!(decode_sample(0x00), -32124);
        assert_eq!(round_trip(1000), 988);
    }

    #[test]
    fn test_monotonic_over_full_range() {
        let mut previous = round_trip(i16::MIN);
        for sample in (i16::MIN as i32 + 1)..=(i16::MAX as i32) {
            let current = round_trip(sample as i16);
            assert!(
                current >= previous,
                "decode(encode({})) = {} < {}",
                sample,
                current,
                previous
            );
            previous = current;
        }
    }

    #[test]
    fn test_never_flips_sign() {
        for sample in i16::MIN..=i16::MAX {
            let decoded = round_trip(sample) as i32;
            assert!(decoded.signum() * (sample as i32).signum() >= 0);
        }
    }

    #[test]
    fn test_short_output_is_clamped() {
        let pcm = [100i16, -100, 2000, -2000];
        let mut out = [0u8; 2];
        assert_eq!(encode(&pcm, &mut out), 2);

        let mut decoded = [0i16; 8];
        assert_eq!(decode(&out, &mut decoded), 2);
        assert!(decoded[0] > 0);
        assert!(decoded[1] < 0);
        assert_eq!(&decoded[2..], &[0; 6]);
    }

    #[test]
    fn test_empty_input() {
        let mut out = [0u8; 4];
        assert_eq!(encode(&[], &mut out), 0);
        let mut decoded = [0i16; 4];
        assert_eq!(decode(&[], &mut decoded), 0);
    }

    proptest! {
        #[test]
        fn prop_frame_keeps_sign_pattern(frame in prop::collection::vec(any::<i16>(), 1..512)) {
            let mut encoded = vec![0u8; frame.len()];
            let mut decoded = vec![0i16; frame.len()];
            let written = encode(&frame, &mut encoded);
            prop_assert_eq!(decode(&encoded[..written], &mut decoded), frame.len());

            for (&original, &restored) in frame.iter().zip(&decoded) {
                // Magnitudes below the first quantization step collapse to zero.
                if original.unsigned_abs() >= 4 {
                    prop_assert_eq!(original.signum(), restored.signum());
                }
            }
        }

        #[test]
        fn prop_frame_keeps_ordering(a in any::<i16>(), b in any::<i16>()) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(round_trip(lo) <= round_trip(hi));
        }

        #[test]
        fn prop_error_is_bounded(sample in -32000i16..32000) {
            let restored = round_trip(sample) as i32;
            let error = (restored - sample as i32).abs();
            // Quantization step in the top segment is 1024.
            prop_assert!(error <= 1024 + 132, "sample {} restored {}", sample, restored);
        }
    }
}
