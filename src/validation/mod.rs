use std::fmt;

pub const TRON_ADDRESS_LEN: usize = 34;
pub const IDEMPOTENCY_KEY_MAX_LEN: usize = 255;
pub const PURPOSE_MAX_LEN: usize = 140;
pub const COUNTRY_CODE_LEN: usize = 2;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Shape check for a TRON (TRC-20) address: base58, 34 characters, `T` prefix.
/// The checksum is left to the exchange.
pub fn validate_tron_address(address: &str) -> ValidationResult {
    let address = sanitize_string(address);
    validate_required("destination_address", &address)?;

    if address.len() != TRON_ADDRESS_LEN {
        return Err(ValidationError::new(
            "destination_address",
            format!("must be exactly {} characters", TRON_ADDRESS_LEN),
        ));
    }

    if !address.starts_with('T') {
        return Err(ValidationError::new(
            "destination_address",
            "must start with 'T'",
        ));
    }

    if !address.chars().all(|ch| BASE58_ALPHABET.contains(ch)) {
        return Err(ValidationError::new(
            "destination_address",
            "must contain only base58 characters",
        ));
    }

    Ok(())
}

/// Address check for the given withdrawal network.
pub fn validate_destination_address(network: &str, address: &str) -> ValidationResult {
    if network.eq_ignore_ascii_case("TRON") {
        validate_tron_address(address)
    } else {
        Err(ValidationError::new(
            "network",
            format!("unsupported network '{}'", network),
        ))
    }
}

pub fn validate_country_code(field: &'static str, code: &str) -> ValidationResult {
    if code.len() != COUNTRY_CODE_LEN || !code.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            field,
            "must be an ISO 3166-1 alpha-2 code",
        ));
    }

    Ok(())
}

pub fn validate_idempotency_key(key: &str) -> ValidationResult {
    validate_required("idempotency_key", key)?;
    validate_max_len("idempotency_key", key, IDEMPOTENCY_KEY_MAX_LEN)?;

    if key.chars().any(|ch| ch.is_control() || ch.is_whitespace()) {
        return Err(ValidationError::new(
            "idempotency_key",
            "must not contain whitespace or control characters",
        ));
    }

    Ok(())
}

pub fn validate_purpose(purpose: &str) -> ValidationResult {
    let purpose = sanitize_string(purpose);
    validate_required("purpose", &purpose)?;
    validate_max_len("purpose", &purpose, PURPOSE_MAX_LEN)
}

pub fn validate_positive_amount(field: &'static str, amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_tron_address() -> String {
        "T".to_owned() + &"R".repeat(33)
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_tron_address() {
        assert!(validate_tron_address(&valid_tron_address()).is_ok());
        assert!(validate_tron_address("TSHORT").is_err());
        assert!(validate_tron_address(&("A".to_owned() + &"R".repeat(33))).is_err());
        // 0, O, I and l are outside the base58 alphabet
        assert!(validate_tron_address(&("T".to_owned() + &"0".repeat(33))).is_err());
        assert!(validate_tron_address(&("T".to_owned() + &"l".repeat(33))).is_err());
        assert!(validate_tron_address(&format!(" {} ", valid_tron_address())).is_ok());
        assert!(validate_tron_address("TLa2f6VPqDgRE67v1736s7bJ8Ray5wYjU7").is_ok());
    }

    #[test]
    fn only_tron_destinations_are_accepted() {
        assert!(validate_destination_address("TRON", &valid_tron_address()).is_ok());
        assert!(validate_destination_address("tron", &valid_tron_address()).is_ok());
        assert!(validate_destination_address("ETHEREUM", &valid_tron_address()).is_err());
    }

    #[test]
    fn validates_country_code() {
        assert!(validate_country_code("country", "ZA").is_ok());
        assert!(validate_country_code("country", "za").is_err());
        assert!(validate_country_code("country", "ZAF").is_err());
    }

    #[test]
    fn validates_idempotency_key() {
        assert!(validate_idempotency_key("send-2024-0001").is_ok());
        assert!(validate_idempotency_key("").is_err());
        assert!(validate_idempotency_key("has space").is_err());
        assert!(validate_idempotency_key(&"k".repeat(256)).is_err());
    }

    #[test]
    fn validates_purpose() {
        assert!(validate_purpose("Family support").is_ok());
        assert!(validate_purpose("  ").is_err());
        assert!(validate_purpose(&"p".repeat(141)).is_err());
    }

    #[test]
    fn validates_positive_amount() {
        assert!(validate_positive_amount("amount", 1).is_ok());
        assert!(validate_positive_amount("amount", 0).is_err());
        assert!(validate_positive_amount("amount", -1).is_err());
    }
}
