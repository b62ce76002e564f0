//! Checksum primitives shared by the NMEA and RTCM parsers.

/// NMEA-0183 checksum: XOR of every byte between `$` and `*`.
pub fn nmea_xor(sentence_body: &[u8]) -> u8 {
    sentence_body.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Check a raw sentence (with or without the trailing `\r\n`) against its
/// trailing `*hh` checksum. Returns `false` for anything malformed.
pub fn nmea_checksum_ok(sentence: &str) -> bool {
    let sentence = sentence.trim_end_matches(['\r', '\n']);
    let body = match sentence.strip_prefix('$') {
        Some(rest) => rest,
        None => return false,
    };
    let star = match body.find('*') {
        Some(idx) => idx,
        None => return false,
    };
    let (payload, tail) = body.split_at(star);
    let hex = &tail[1..];
    if hex.len() != 2 {
        return false;
    }
    let expected = match u8::from_str_radix(hex, 16) {
        Ok(v) => v,
        Err(_) => return false,
    };
    nmea_xor(payload.as_bytes()) == expected
}

const CRC24_POLY: u32 = 0x1864_CFB;

/// CRC-24Q over an RTCM-3 frame (preamble + length + payload), initial value 0.
pub fn crc24q(data: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &byte in data {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_gga_checksum_validates() {
        let sentence =
            "$GPGGA,123519.00,3013.2000,N,12021.6000,E,1,08,0.9,50.0,M,0.0,M,,*60\r\n";
        assert!(nmea_checksum_ok(sentence));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut sentence =
            "$GPGGA,123519.00,3013.2000,N,12021.6000,E,1,08,0.9,50.0,M,0.0,M,,*60".to_string();
        sentence.replace_range(10..11, "9");
        assert!(!nmea_checksum_ok(&sentence));
    }

    #[test]
    fn missing_star_fails_cleanly() {
        assert!(!nmea_checksum_ok("$GPGGA,no,checksum,here"));
    }

    #[test]
    fn crc24q_of_empty_is_zero() {
        assert_eq!(crc24q(&[]), 0);
    }

    #[test]
    fn crc24q_is_stable_for_nonempty_input() {
        let a = crc24q(b"\xd3\x00\x04\x00\x01\x02\x03");
        let b = crc24q(b"\xd3\x00\x04\x00\x01\x02\x03");
        assert_eq!(a, b);
        let c = crc24q(b"\xd3\x00\x04\x00\x01\x02\x04");
        assert_ne!(a, c);
    }
}
