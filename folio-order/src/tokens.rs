use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

const TOKEN_BYTES: usize = 32;

/// `ORD-{yyyymmddHHMMSSmmm}-{XXXX}`. The store's unique index is the real guarantee.
pub fn order_number(now: DateTime<Utc>) -> String {
    let suffix = OsRng.next_u32() as u16;
    format!("ORD-{}-{:04X}", now.format("%Y%m%d%H%M%S%3f"), suffix)
}

/// 256 bits from the OS RNG, base64url without padding.
pub fn download_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn order_number_is_time_based() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        let number = order_number(at);
        assert!(number.starts_with("ORD-20240309140507042-"), "{}", number);
        assert_eq!(number.len(), "ORD-20240309140507042-".len() + 4);
    }

    #[test]
    fn download_tokens_are_url_safe_and_distinct() {
        let tokens: HashSet<String> = (0..100).map(|_| download_token()).collect();
        assert_eq!(tokens.len(), 100);
        for token in &tokens {
            assert_eq!(token.len(), 43);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }
}
