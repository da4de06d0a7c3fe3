//! # Validation Module
//!
//! Input checks run by the optimistic write path before anything is stored.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI forms                                                     │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Optimistic write path                                        │
//! │  └── THIS MODULE: reject bad input before it is queued offline         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Server                                                       │
//! │  └── Business rules; a rejection becomes a conflict                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Anything caught here never reaches the queue, so it can never turn into a
//! conflict hours later when the device is back online.

use crate::error::ValidationError;
use crate::types::{CustomerInput, LineItemInput, QuoteInput, QuotePatch};
use crate::{MAX_BLOB_BYTES, MAX_LINE_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_TITLE_LEN: usize = 200;
const MAX_NAME_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 2_000;

// =============================================================================
// String Validators
// =============================================================================

fn required(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

/// Validates a quote title.
///
/// ## Example
/// ```rust
/// use fieldquote_core::validation::validate_title;
///
/// assert!(validate_title("Boiler replacement").is_ok());
/// assert!(validate_title("   ").is_err());
/// ```
pub fn validate_title(title: &str) -> ValidationResult<()> {
    required("title", title, MAX_TITLE_LEN)
}

/// Validates a customer name.
pub fn validate_customer_name(name: &str) -> ValidationResult<()> {
    required("name", name, MAX_NAME_LEN)
}

/// Loose email check: one `@` with text on both sides and a dot in the domain.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let invalid = |reason: &str| ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: reason.to_string(),
    };

    let email = email.trim();
    let (local, domain) = email.split_once('@').ok_or_else(|| invalid("missing @"))?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(invalid("must look like name@domain"));
    }
    if !domain.contains('.') {
        return Err(invalid("domain must contain a dot"));
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line item quantity (1..=MAX_LINE_ITEM_QUANTITY).
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if quantity > MAX_LINE_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_LINE_ITEM_QUANTITY,
        });
    }
    Ok(())
}

/// Prices may be zero (free items) but never negative.
pub fn validate_price_cents(price_cents: i64) -> ValidationResult<()> {
    if price_cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: "unit_price_cents".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

// =============================================================================
// Input Validators
// =============================================================================

pub fn validate_quote_input(input: &QuoteInput) -> ValidationResult<()> {
    validate_title(&input.title)?;
    if let Some(description) = &input.description {
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ValidationError::TooLong {
                field: "description".to_string(),
                max: MAX_DESCRIPTION_LEN,
            });
        }
    }
    Ok(())
}

pub fn validate_quote_patch(patch: &QuotePatch) -> ValidationResult<()> {
    if patch.is_empty() {
        return Err(ValidationError::Required {
            field: "patch".to_string(),
        });
    }
    if let Some(title) = &patch.title {
        validate_title(title)?;
    }
    Ok(())
}

pub fn validate_customer_input(input: &CustomerInput) -> ValidationResult<()> {
    validate_customer_name(&input.name)?;
    if let Some(email) = &input.email {
        validate_email(email)?;
    }
    Ok(())
}

pub fn validate_line_item(input: &LineItemInput) -> ValidationResult<()> {
    required("description", &input.description, MAX_TITLE_LEN)?;
    validate_quantity(input.quantity)?;
    validate_price_cents(input.unit_price_cents)
}

/// Validates captured media before it is cached.
pub fn validate_blob(content_type: &str, data: &[u8]) -> ValidationResult<()> {
    if data.is_empty() {
        return Err(ValidationError::Required {
            field: "data".to_string(),
        });
    }
    if data.len() > MAX_BLOB_BYTES {
        return Err(ValidationError::OutOfRange {
            field: "data".to_string(),
            min: 1,
            max: MAX_BLOB_BYTES as i64,
        });
    }
    let Some((top, sub)) = content_type.split_once('/') else {
        return Err(ValidationError::InvalidFormat {
            field: "content_type".to_string(),
            reason: "must be a MIME type like image/jpeg".to_string(),
        });
    };
    if top.is_empty() || sub.is_empty() {
        return Err(ValidationError::InvalidFormat {
            field: "content_type".to_string(),
            reason: "must be a MIME type like image/jpeg".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_title() {
        assert!(validate_title("Boiler replacement").is_ok());
        assert!(validate_title("").is_err());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"A".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("ada.example.com").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("ada@localhost").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(9_999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(10_000).is_err());
    }

    #[test]
    fn test_validate_price_cents() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(1099).is_ok());
        assert!(validate_price_cents(-100).is_err());
    }

    #[test]
    fn test_validate_inputs() {
        let customer = CustomerInput {
            name: "Ada".to_string(),
            email: Some("not-an-email".to_string()),
            ..Default::default()
        };
        assert!(validate_customer_input(&customer).is_err());

        let item = LineItemInput {
            description: "Labour".to_string(),
            quantity: 3,
            unit_price_cents: 4500,
        };
        assert!(validate_line_item(&item).is_ok());

        assert!(validate_quote_patch(&QuotePatch::default()).is_err());
    }

    #[test]
    fn test_validate_blob() {
        assert!(validate_blob("image/jpeg", &[1, 2, 3]).is_ok());
        assert!(validate_blob("image/jpeg", &[]).is_err());
        assert!(validate_blob("jpeg", &[1]).is_err());
        assert!(validate_blob("audio/", &[1]).is_err());
    }
}
