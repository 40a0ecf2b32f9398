//! MurmurHash3 (x86 32-bit, x86 128-bit, x64 128-bit).
//!
//! The algorithm is Austin Appleby's public-domain MurmurHash3, carried
//! in-crate so routing tokens are identical on every build of the stage.

#[inline]
fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[inline]
fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ])
}

pub fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let nblocks = data.len() / 4;
    let mut h1 = seed;

    for block in 0..nblocks {
        let mut k1 = read_u32(data, block * 4);
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = &data[nblocks * 4..];
    let mut k1: u32 = 0;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    fmix32(h1)
}

pub fn murmur3_x86_128(data: &[u8], seed: u32) -> [u32; 4] {
    const C1: u32 = 0x239b_961b;
    const C2: u32 = 0xab0e_9789;
    const C3: u32 = 0x38b3_4ae5;
    const C4: u32 = 0xa1e3_8b93;

    let nblocks = data.len() / 16;
    let mut h1 = seed;
    let mut h2 = seed;
    let mut h3 = seed;
    let mut h4 = seed;

    for block in 0..nblocks {
        let base = block * 16;
        let mut k1 = read_u32(data, base);
        let mut k2 = read_u32(data, base + 4);
        let mut k3 = read_u32(data, base + 8);
        let mut k4 = read_u32(data, base + 12);

        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(19).wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x561c_cd1b);

        k2 = k2.wrapping_mul(C2).rotate_left(16).wrapping_mul(C3);
        h2 ^= k2;
        h2 = h2.rotate_left(17).wrapping_add(h3);
        h2 = h2.wrapping_mul(5).wrapping_add(0x0bca_a747);

        k3 = k3.wrapping_mul(C3).rotate_left(17).wrapping_mul(C4);
        h3 ^= k3;
        h3 = h3.rotate_left(15).wrapping_add(h4);
        h3 = h3.wrapping_mul(5).wrapping_add(0x96cd_1c35);

        k4 = k4.wrapping_mul(C4).rotate_left(18).wrapping_mul(C1);
        h4 ^= k4;
        h4 = h4.rotate_left(13).wrapping_add(h1);
        h4 = h4.wrapping_mul(5).wrapping_add(0x32ac_3b17);
    }

    let tail = &data[nblocks * 16..];
    let mut k1: u32 = 0;
    let mut k2: u32 = 0;
    let mut k3: u32 = 0;
    let mut k4: u32 = 0;

    let len = tail.len();
    if len >= 15 {
        k4 ^= (tail[14] as u32) << 16;
    }
    if len >= 14 {
        k4 ^= (tail[13] as u32) << 8;
    }
    if len >= 13 {
        k4 ^= tail[12] as u32;
        k4 = k4.wrapping_mul(C4).rotate_left(18).wrapping_mul(C1);
        h4 ^= k4;
    }
    if len >= 12 {
        k3 ^= (tail[11] as u32) << 24;
    }
    if len >= 11 {
        k3 ^= (tail[10] as u32) << 16;
    }
    if len >= 10 {
        k3 ^= (tail[9] as u32) << 8;
    }
    if len >= 9 {
        k3 ^= tail[8] as u32;
        k3 = k3.wrapping_mul(C3).rotate_left(17).wrapping_mul(C4);
        h3 ^= k3;
    }
    if len >= 8 {
        k2 ^= (tail[7] as u32) << 24;
    }
    if len >= 7 {
        k2 ^= (tail[6] as u32) << 16;
    }
    if len >= 6 {
        k2 ^= (tail[5] as u32) << 8;
    }
    if len >= 5 {
        k2 ^= tail[4] as u32;
        k2 = k2.wrapping_mul(C2).rotate_left(16).wrapping_mul(C3);
        h2 ^= k2;
    }
    if len >= 4 {
        k1 ^= (tail[3] as u32) << 24;
    }
    if len >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if len >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if len >= 1 {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    let total = data.len() as u32;
    h1 ^= total;
    h2 ^= total;
    h3 ^= total;
    h4 ^= total;

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    h1 = fmix32(h1);
    h2 = fmix32(h2);
    h3 = fmix32(h3);
    h4 = fmix32(h4);

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    [h1, h2, h3, h4]
}

pub fn murmur3_x64_128(data: &[u8], seed: u32) -> [u64; 2] {
    const C1: u64 = 0x87c3_7b91_1142_53d5;
    const C2: u64 = 0x4cf5_ad43_2745_937f;

    let nblocks = data.len() / 16;
    let mut h1 = seed as u64;
    let mut h2 = seed as u64;

    for block in 0..nblocks {
        let base = block * 16;
        let mut k1 = read_u64(data, base);
        let mut k2 = read_u64(data, base + 8);

        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(27).wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
        h2 = h2.rotate_left(31).wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = &data[nblocks * 16..];
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;

    let len = tail.len();
    if len >= 15 {
        k2 ^= (tail[14] as u64) << 48;
    }
    if len >= 14 {
        k2 ^= (tail[13] as u64) << 40;
    }
    if len >= 13 {
        k2 ^= (tail[12] as u64) << 32;
    }
    if len >= 12 {
        k2 ^= (tail[11] as u64) << 24;
    }
    if len >= 11 {
        k2 ^= (tail[10] as u64) << 16;
    }
    if len >= 10 {
        k2 ^= (tail[9] as u64) << 8;
    }
    if len >= 9 {
        k2 ^= tail[8] as u64;
        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        h2 ^= k2;
    }
    if len >= 8 {
        k1 ^= (tail[7] as u64) << 56;
    }
    if len >= 7 {
        k1 ^= (tail[6] as u64) << 48;
    }
    if len >= 6 {
        k1 ^= (tail[5] as u64) << 40;
    }
    if len >= 5 {
        k1 ^= (tail[4] as u64) << 32;
    }
    if len >= 4 {
        k1 ^= (tail[3] as u64) << 24;
    }
    if len >= 3 {
        k1 ^= (tail[2] as u64) << 16;
    }
    if len >= 2 {
        k1 ^= (tail[1] as u64) << 8;
    }
    if len >= 1 {
        k1 ^= tail[0] as u64;
        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        h1 ^= k1;
    }

    let total = data.len() as u64;
    h1 ^= total;
    h2 ^= total;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    [h1, h2]
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors computed with the canonical C++ implementation.
    #[test]
    fn x86_32_known_vectors() {
        assert_eq!(murmur3_x86_32(b"", 0), 0);
        assert_eq!(murmur3_x86_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_x86_32(b"hello", 0), 0x248b_fa47);
        assert_eq!(murmur3_x86_32(b"hello, world", 0), 0x149b_bb7f);
    }

    #[test]
    fn hashes_are_deterministic() {
        let message = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
        assert_eq!(murmur3_x86_32(&message, 42), murmur3_x86_32(&message, 42));
        assert_eq!(murmur3_x86_128(&message, 42), murmur3_x86_128(&message, 42));
        assert_eq!(murmur3_x64_128(&message, 42), murmur3_x64_128(&message, 42));
    }

    #[test]
    fn seed_changes_the_hash() {
        let message = b"classifier";
        assert_ne!(murmur3_x86_32(message, 0), murmur3_x86_32(message, 42));
    }

    #[test]
    fn empty_key_is_hashable() {
        // Zero active classifiers still produce a stable token.
        assert_eq!(murmur3_x86_32(b"", 42), murmur3_x86_32(b"", 42));
        assert_eq!(murmur3_x64_128(b"", 42), murmur3_x64_128(b"", 42));
    }
}
