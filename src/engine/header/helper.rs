use crate::engine::error::{Result, TarError};

/// Marks a GNU base-256 numeric field.
const BASE256_FLAG: u8 = 0x80;
const BASE256_NEGATIVE: u8 = 0x40;

// Helper to extract null-terminated strings
pub(crate) fn get_str(buf: &[u8]) -> String {
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..nul]).into_owned()
}

// Helper to parse octal or GNU base-256 numeric fields
pub(crate) fn parse_numeric<T>(buf: &[u8], field: &'static str) -> Result<T>
where
    T: num_traits::Num + num_traits::NumCast,
{
    if buf.first().is_some_and(|b| b & BASE256_FLAG != 0) {
        return parse_base256(buf, field);
    }
    let digits = buf
        .iter()
        .skip_while(|&&b| b == b' ' || b == 0)
        .take_while(|&&b| b != b' ' && b != 0)
        .copied()
        .collect::<Vec<u8>>();
    if digits.is_empty() {
        return Ok(T::zero());
    }
    let s = std::str::from_utf8(&digits)
        .map_err(|_| TarError::CorruptHeader(format!("invalid octal in {}: {:?}", field, digits)))?;
    T::from_str_radix(s, 8)
        .map_err(|_| TarError::CorruptHeader(format!("invalid octal in {}: {:?}", field, s)))
}

fn parse_base256<T>(buf: &[u8], field: &'static str) -> Result<T>
where
    T: num_traits::NumCast,
{
    if buf[0] & BASE256_NEGATIVE != 0 {
        return Err(TarError::CorruptHeader(format!("negative value in {}", field)));
    }
    let mut value: u64 = (buf[0] & !(BASE256_FLAG | BASE256_NEGATIVE)) as u64;
    for &b in &buf[1..] {
        value = value
            .checked_mul(256)
            .and_then(|v| v.checked_add(b as u64))
            .ok_or_else(|| TarError::CorruptHeader(format!("value overflow in {}", field)))?;
    }
    <T as num_traits::NumCast>::from(value).ok_or_else(|| TarError::CorruptHeader(format!("value out of range in {}", field)))
}

// Helper to write a string (null-terminated when shorter than the field)
pub(crate) fn put_str(dst: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(dst.len());
    dst[..len].copy_from_slice(&bytes[..len]);
    if len < dst.len() {
        dst[len..].fill(0);
    }
}

// Helper to write octal numbers as zero-padded, null-terminated strings
pub(crate) fn put_octal(dst: &mut [u8], value: u64) -> bool {
    let width = dst.len() - 1;
    let s = format!("{:0width$o}", value, width = width);
    if s.len() > width {
        return false;
    }
    dst[..width].copy_from_slice(s.as_bytes());
    dst[width] = b'\0';
    true
}

// Helper to write a numeric field, falling back to GNU base-256 when the
// value does not fit in octal
pub(crate) fn put_numeric(dst: &mut [u8], value: u64, field: &'static str) -> Result<()> {
    if put_octal(dst, value) {
        return Ok(());
    }
    let bytes = value.to_be_bytes();
    let room = dst.len() - 1;
    let significant = bytes.iter().skip_while(|b| **b == 0).count();
    if significant > room {
        return Err(TarError::CorruptHeader(format!("value {} does not fit in {}", value, field)));
    }
    dst.fill(0);
    dst[0] = BASE256_FLAG;
    let tail = dst.len() - significant;
    dst[tail..].copy_from_slice(&bytes[bytes.len() - significant..]);
    Ok(())
}

/// Unsigned sum of the header bytes with the checksum field read as spaces.
pub(crate) fn checksum(buf: &[u8], chksum_field: std::ops::Range<usize>) -> u32 {
    buf.iter()
        .enumerate()
        .map(|(i, b)| if chksum_field.contains(&i) { b' ' as u32 } else { *b as u32 })
        .sum()
}

/// Longest prefix of `value` no longer than `max` bytes that ends on a char
/// boundary.
pub(crate) fn truncate_str(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut cut = max;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    &value[..cut]
}
