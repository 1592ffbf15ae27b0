use std::net::Ipv4Addr;

/// One's-complement Internet checksum support (RFC 1071), plus the
/// incremental update used when a translator replaces a small range of an
/// already-checksummed packet (RFC 1631 style).

/// Sums `data` as big-endian 16-bit words into a running 32-bit accumulator.
/// An odd trailing byte is treated as the high byte of a final word.
pub fn sum_words(data: &[u8], initial: u32) -> u32 {
    let mut sum = initial;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

/// Folds the carries of a running sum back into the low 16 bits and
/// complements the result.
pub fn finalize(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// The standard Internet checksum over a byte range.
pub fn checksum(data: &[u8]) -> u16 {
    finalize(sum_words(data, 0))
}

/// Partial sum of the IPv4 pseudo header used by the TCP and UDP checksums.
pub fn pseudo_header_sum(src: Ipv4Addr, dest: Ipv4Addr, protocol: u8, length: u16) -> u32 {
    let mut sum = sum_words(&src.octets(), 0);
    sum = sum_words(&dest.octets(), sum);
    sum += u32::from(protocol);
    sum += u32::from(length);
    sum
}

/// Produces the checksum of a buffer in which `old_bytes` were replaced by
/// `new_bytes` (possibly of different length), given only the checksum of
/// the unmodified buffer. Both ranges are conceptually zero-padded to an
/// even length. The result is bit-identical to recomputing `checksum()`
/// over the modified buffer.
pub fn adjust_checksum(old_checksum: u16, old_bytes: &[u8], new_bytes: &[u8]) -> u16 {
    let mut x = i32::from(!old_checksum);

    let mut i = 0;
    while i < old_bytes.len() {
        x -= i32::from(word_at(old_bytes, i));
        if x < 0 {
            // End-around borrow. An exact zero is not an underflow.
            x -= 1;
            x &= 0xFFFF;
        }
        i += 2;
    }

    let mut i = 0;
    while i < new_bytes.len() {
        x += i32::from(word_at(new_bytes, i));
        if x & 0x10000 != 0 {
            // End-around carry.
            x += 1;
            x &= 0xFFFF;
        }
        i += 2;
    }

    !(x as u16)
}

// Big-endian word starting at `i`, zero-padded if `i` is the last byte.
fn word_at(data: &[u8], i: usize) -> u16 {
    let hi = data[i];
    let lo = if i + 1 < data.len() { data[i + 1] } else { 0 };
    u16::from_be_bytes([hi, lo])
}
