//! Fractional indexing for sibling order.

/// Base-62 charset for fractional indexing (0-9, A-Z, a-z).
/// Lexicographically ordered: '0' < '9' < 'A' < 'Z' < 'a' < 'z'.
pub const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Key handed to the first child of an empty parent.
pub const FIRST_KEY: &str = "V";

fn base62_index(c: u8) -> usize {
    BASE62.iter().position(|&b| b == c).unwrap_or(0)
}

/// Compute a lexicographic midpoint between two base-62 strings.
///
/// Empty string `""` sorts before everything. Requires `a < b`; the result
/// satisfies `a < result < b`. Generated keys never end in `'0'`, so there is
/// always room to insert in front of one.
pub fn order_midpoint(a: &str, b: &str) -> String {
    let lo: Vec<usize> = a.bytes().map(base62_index).collect();
    let hi: Vec<usize> = b.bytes().map(base62_index).collect();
    let mut key = String::with_capacity(lo.len().max(hi.len()) + 1);
    split_digits(&mut key, &lo, Some(&hi));
    key
}

/// Append to `key` the digits of a string strictly between `lo` and `hi`.
/// `hi == None` means the open upper end.
fn split_digits(key: &mut String, mut lo: &[usize], mut hi: Option<&[usize]>) {
    let push = |key: &mut String, digit: usize| key.push(BASE62[digit] as char);
    loop {
        if let Some(upper) = hi {
            // A missing digit of `lo` reads as '0'.
            let shared = upper
                .iter()
                .enumerate()
                .take_while(|&(i, &d)| lo.get(i).copied().unwrap_or(0) == d)
                .count();
            for &d in &upper[..shared] {
                push(key, d);
            }
            lo = lo.get(shared..).unwrap_or(&[]);
            hi = Some(&upper[shared..]);
        }

        let lo_digit = lo.first().copied().unwrap_or(0);
        let hi_digit = hi.and_then(|h| h.first().copied()).unwrap_or(BASE62.len());

        if hi_digit > lo_digit + 1 {
            push(key, (lo_digit + hi_digit) / 2);
            return;
        }
        match hi {
            // The leading digit of a longer `hi` already sorts between.
            Some(upper) if upper.len() > 1 => {
                push(key, upper[0]);
                return;
            }
            _ => {
                push(key, lo_digit);
                lo = lo.get(1..).unwrap_or(&[]);
                hi = None;
            }
        }
    }
}

/// Key sorting after `last`.
pub fn order_after(last: &str) -> String {
    format!("{last}{FIRST_KEY}")
}
