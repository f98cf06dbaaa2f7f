use sha2::{Digest, Sha256};

use crate::domain::customer::CustomerId;
use crate::domain::interaction::Mode;

/// Derives a stable request id when the caller did not send one.
///
/// Normalization (trim, collapse runs of whitespace, lowercase) means
/// cosmetic retypes of the same message collapse to the same key. It is
/// best-effort: any wording change produces a fresh key.
pub fn derive_request_id(customer_id: &CustomerId, message: &str, mode: Mode) -> String {
    let normalized = normalize_message(message);
    let mut hasher = Sha256::new();
    hasher.update(customer_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(mode.as_str().as_bytes());

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex[..24].to_string()
}

fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{derive_request_id, normalize_message};
    use crate::domain::customer::CustomerId;
    use crate::domain::interaction::Mode;

    #[test]
    fn whitespace_and_case_variations_collapse_to_one_key() {
        let customer = CustomerId("cus_1".to_string());
        let a = derive_request_id(&customer, "Please refund my  invoice", Mode::Live);
        let b = derive_request_id(&customer, "  please REFUND my invoice ", Mode::Live);
        assert_eq!(a, b);
    }

    #[test]
    fn key_varies_by_customer_message_and_mode() {
        let customer = CustomerId("cus_1".to_string());
        let other = CustomerId("cus_2".to_string());
        let base = derive_request_id(&customer, "refund please", Mode::Live);

        assert_ne!(base, derive_request_id(&other, "refund please", Mode::Live));
        assert_ne!(base, derive_request_id(&customer, "refund now", Mode::Live));
        assert_ne!(base, derive_request_id(&customer, "refund please", Mode::Shadow));
    }

    #[test]
    fn key_is_24_hex_chars() {
        let customer = CustomerId("cus_1".to_string());
        let key = derive_request_id(&customer, "hello", Mode::Live);
        assert_eq!(key.len(), 24);
        assert!(key.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn normalization_collapses_inner_whitespace() {
        assert_eq!(normalize_message("  A \t b\n  C "), "a b c");
    }
}
