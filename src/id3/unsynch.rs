//! Syncsafe integers and the ID3v2 unsynchronisation scheme.
//!
//! Unsynchronisation prevents byte patterns that look like MPEG frame sync (`0xFF` followed by a
//! byte with its three top bits set) from appearing inside a tag: a zero byte is stuffed after
//! every `0xFF` that precedes such a byte or a zero. Syncsafe integers keep the most significant
//! bit of every byte clear for the same reason.

/// Packs a 28-bit value into the 4-byte syncsafe layout used by ID3v2.4 sizes.
pub fn encode_syncsafe(n: u32) -> u32 {
    let mut out = 0;
    for i in 0..4 {
        out |= ((n >> (7 * i)) & 0x7F) << (8 * i);
    }
    out
}

/// Unpacks a 4-byte syncsafe layout into the 28-bit value it encodes.
pub fn decode_syncsafe(n: u32) -> u32 {
    let mut out = 0;
    for i in 0..4 {
        out |= ((n >> (8 * i)) & 0x7F) << (7 * i);
    }
    out
}

/// Applies the unsynchronisation scheme.
pub fn apply(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().peekable();
    while let Some(byte) = iter.next() {
        out.push(*byte);
        if *byte == 0xFF {
            if let Some(next) = iter.peek() {
                if **next == 0x00 || **next >= 0xE0 {
                    out.push(0x00);
                }
            }
        }
    }
    out
}

/// Reverses the unsynchronisation scheme: drops the zero byte stuffed after every `0xFF`.
pub fn strip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut skip_zero = false;
    for byte in data {
        if skip_zero && *byte == 0x00 {
            skip_zero = false;
            continue;
        }
        skip_zero = *byte == 0xFF;
        out.push(*byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syncsafe_round_trip() {
        assert_eq!(681_570, encode_syncsafe(176_994));
        assert_eq!(176_994, decode_syncsafe(681_570));
        for n in [0, 1, 0x7F, 0x80, 0x0FFF_FFFF] {
            assert_eq!(n, decode_syncsafe(encode_syncsafe(n)));
        }
    }

    #[test]
    fn unsynchronisation_round_trip() {
        let cases: [&[u8]; 4] = [
            &[66, 0, 255, 0, 255, 0, 0, 255, 66],
            &[0xFF, 0xE0, 0xFF],
            &[0xFF, 0xFB, 0x90],
            &[],
        ];
        for case in cases {
            let encoded = apply(case);
            assert!(!encoded.windows(2).any(|w| w[0] == 0xFF && w[1] >= 0xE0));
            assert_eq!(case.to_vec(), strip(&encoded), "{:?}", case);
        }
    }

    #[test]
    fn stuffed_zero_is_dropped() {
        assert_eq!(vec![0xFF, 0x00], strip(&[0xFF, 0x00, 0x00]));
        assert_eq!(vec![0xFF, 0xD8], strip(&[0xFF, 0x00, 0xD8]));
    }
}
