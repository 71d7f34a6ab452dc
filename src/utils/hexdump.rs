/// Formats bytes as upper-case pairs separated by spaces, e.g. `00 05 0A`.
pub fn to_hex_string(data: &[u8]) -> String {
    let encoded = hex::encode_upper(data);
    let mut out = String::with_capacity(data.len() * 3);
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}

/// Same as [`to_hex_string`] but stops after `limit` bytes.
pub fn to_hex_string_limited(data: &[u8], limit: usize) -> String {
    to_hex_string(&data[..data.len().min(limit)])
}
