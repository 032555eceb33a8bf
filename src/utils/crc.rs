//! CRC-32 (IEEE 802.3, reflected) over group images.

/// Computes the CRC-32 of `data` with the reflected polynomial `0xEDB88320`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Splits an image into its payload and the little-endian CRC trailer
/// stored in its last four bytes.
///
/// Returns `None` when the image is too short to carry a trailer.
#[must_use]
pub fn split_trailer(image: &[u8]) -> Option<(&[u8], u32)> {
    let split = image.len().checked_sub(4)?;
    let (payload, trailer) = image.split_at(split);
    let trailer: [u8; 4] = trailer.try_into().ok()?;
    Some((payload, u32::from_le_bytes(trailer)))
}
