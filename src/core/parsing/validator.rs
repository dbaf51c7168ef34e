use crate::core::adapters::adagio;
use crate::core::models::bidder::BidderName;
use anyhow::anyhow;
use serde_json::Value;
use std::collections::HashMap;

/// Checks the params a request supplies for a bidder before the
/// request is allowed into the auction
pub trait BidderParamValidator: Send + Sync {
    fn validate(&self, bidder: &BidderName, params: &Value) -> Result<(), anyhow::Error>;
}

pub type ParamsCheck = fn(&Value) -> Result<(), anyhow::Error>;

/// Validator dispatching to a per bidder check function
#[derive(Default)]
pub struct ParamsValidator {
    checks: HashMap<BidderName, ParamsCheck>,
}

impl ParamsValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator preloaded with every adapter shipped in this crate
    pub fn builtin() -> Self {
        Self::new().with(BidderName::adagio(), adagio::validate_params)
    }

    pub fn with(mut self, bidder: BidderName, check: ParamsCheck) -> Self {
        self.checks.insert(bidder, check);
        self
    }
}

impl BidderParamValidator for ParamsValidator {
    fn validate(&self, bidder: &BidderName, params: &Value) -> Result<(), anyhow::Error> {
        let check = self
            .checks
            .get(bidder)
            .ok_or_else(|| anyhow!("no params validator registered for bidder {}", bidder))?;

        check(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_validates_adagio() {
        let validator = ParamsValidator::builtin();
        let good = json!({"organizationId": "1000", "site": "site-name", "placement": "ban_atf"});

        assert!(validator.validate(&BidderName::adagio(), &good).is_ok());
        assert!(validator.validate(&BidderName::adagio(), &json!({})).is_err());
    }

    #[test]
    fn test_unregistered_bidder_fails() {
        let validator = ParamsValidator::builtin();
        let err = validator
            .validate(&BidderName::new("other"), &json!({}))
            .unwrap_err();

        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn test_custom_check() {
        fn always_ok(_: &Value) -> Result<(), anyhow::Error> {
            Ok(())
        }

        let validator = ParamsValidator::new().with(BidderName::new("open"), always_ok);
        assert!(validator.validate(&BidderName::new("open"), &json!(null)).is_ok());
    }
}
