//! Fixed-width bitfield extraction and packing.
//!
//! A field is `(position, width)` with position counted from the LSB.
//! Composite layouts list the physical fields of one logical value in
//! most-significant-first order; RISC-V scatters branch and jump
//! immediates this way, and the sign bit is the top of the logical value.

/// A physical bitfield inside a 32-bit word.
pub type Field = (u32, u32);

/// imm[11:0] of I-type words.
pub const I_IMM: &[Field] = &[(20, 12)];
/// imm[11:5] then imm[4:0] of S-type words.
pub const S_IMM: &[Field] = &[(25, 7), (7, 5)];
/// imm[12|11|10:5|4:1] of B-type words.
pub const B_IMM: &[Field] = &[(31, 1), (7, 1), (25, 6), (8, 4)];
/// imm[31:12] of U-type words.
pub const U_IMM: &[Field] = &[(12, 20)];
/// imm[20|19:12|11|10:1] of J-type words.
pub const J_IMM: &[Field] = &[(31, 1), (12, 8), (20, 1), (21, 10)];

#[inline]
fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Unsigned value of `width` bits starting at `pos`.
#[inline]
pub fn extract(word: u32, pos: u32, width: u32) -> u32 {
    (word >> pos) & mask(width)
}

/// Sign-extend the low `width` bits of `value`.
#[inline]
pub fn sign_extend(value: u32, width: u32) -> i32 {
    if width == 0 {
        return 0;
    }
    if width >= 32 {
        return value as i32;
    }
    let s = 32 - width;
    ((value << s) as i32) >> s
}

/// Signed value of `width` bits starting at `pos`.
#[inline]
pub fn extract_signed(word: u32, pos: u32, width: u32) -> i32 {
    sign_extend(extract(word, pos, width), width)
}

/// OR `value`, masked to `width`, into `acc` at `pos`.
#[inline]
pub fn insert(acc: u32, value: u32, pos: u32, width: u32) -> u32 {
    acc | ((value & mask(width)) << pos)
}

/// Total logical width of a composite layout.
pub fn total_width(fields: &[Field]) -> u32 {
    fields.iter().map(|&(_, w)| w).sum()
}

/// Concatenate the listed fields, first field most significant.
pub fn extract_fields(word: u32, fields: &[Field]) -> u32 {
    fields
        .iter()
        .fold(0u32, |acc, &(pos, width)| (acc << width) | extract(word, pos, width))
}

/// Like [`extract_fields`], sign-extended at the combined width.
pub fn extract_fields_signed(word: u32, fields: &[Field]) -> i32 {
    sign_extend(extract_fields(word, fields), total_width(fields))
}

/// Scatter the low bits of `value` across `fields` and OR them into `acc`.
pub fn insert_fields(acc: u32, value: u32, fields: &[Field]) -> u32 {
    let mut shift = total_width(fields);
    let mut out = acc;
    for &(pos, width) in fields {
        shift -= width;
        out = insert(out, value >> shift, pos, width);
    }
    out
}

/// Clear every bit covered by `fields`.
pub fn clear_fields(word: u32, fields: &[Field]) -> u32 {
    fields
        .iter()
        .fold(word, |acc, &(pos, width)| acc & !(mask(width) << pos))
}

/// True when `value` fits a signed immediate of `width` bits.
pub fn fits_signed(value: i64, width: u32) -> bool {
    let lo = -(1i64 << (width - 1));
    let hi = (1i64 << (width - 1)) - 1;
    (lo..=hi).contains(&value)
}
