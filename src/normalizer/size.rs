/// Parses tool size tokens such as `100B`, `1.2K`, `3MB` into bytes.
///
/// Multipliers are base 1024. Anything that does not look like a size
/// yields 0.
pub fn parse_size(token: &str) -> u64 {
    let token = token.trim();
    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(split);
    if number.is_empty() {
        return 0;
    }
    let value: f64 = match number.parse() {
        Ok(v) => v,
        Err(_) => return 0,
    };
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return 0,
    };
    let bytes = (value * multiplier as f64).round();
    if bytes.is_finite() && bytes >= 0.0 {
        bytes as u64
    } else {
        0
    }
}
