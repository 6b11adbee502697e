//! Formatting helpers for operator-facing output.

/// Render a duration as `MM:SS`; minutes grow past two digits when needed.
///
/// ```
/// use parklink_parking::format_elapsed;
///
/// assert_eq!(format_elapsed(0), "00:00");
/// assert_eq!(format_elapsed(754), "12:34");
/// assert_eq!(format_elapsed(6_000), "100:00");
/// ```
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Render an amount with `,` as thousands separator.
///
/// ```
/// use parklink_parking::format_amount;
///
/// assert_eq!(format_amount(999), "999");
/// assert_eq!(format_amount(1_234_567), "1,234,567");
/// ```
pub fn format_amount(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
