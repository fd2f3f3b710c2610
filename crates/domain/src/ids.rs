//! Identifier value objects shared by topics, devices, and topology.
//!
//! Per the data model, tenant/site/device identifiers are lowercase
//! alphanumeric plus `-`, 20-40 characters. Device ids are additionally
//! globally unique and immutable once assigned (enforced by the
//! registries that hold them, not by this type).

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate(label: &str, kind: &'static str) -> Result<(), CoreError> {
    let len = label.len();
    if !(20..=40).contains(&len) {
        return Err(CoreError::protocol(format!(
            "{kind} '{label}' must be 20-40 chars, got {len}"
        )));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(CoreError::protocol(format!(
            "{kind} '{label}' must be lowercase alphanumeric plus '-'"
        )));
    }
    Ok(())
}

macro_rules! label_id {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(label: impl Into<String>) -> Result<Self, CoreError> {
                let label = label.into();
                validate(&label, $kind)?;
                Ok(Self(label))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

label_id!(TenantId, "tenant");
label_id!(SiteId, "site");
label_id!(DeviceId, "device_id");
label_id!(GroupId, "group_id");

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "router-floor3-east-42";

    #[test]
    fn accepts_valid_label() {
        assert!(TenantId::new(VALID).is_ok());
        assert_eq!(TenantId::new(VALID).unwrap().as_str(), VALID);
    }

    #[test]
    fn rejects_too_short() {
        assert!(DeviceId::new("short-id").is_err());
    }

    #[test]
    fn rejects_too_long() {
        let too_long = "a".repeat(41);
        assert!(DeviceId::new(too_long).is_err());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(SiteId::new("Router-Floor3-East-42").is_err());
    }

    #[test]
    fn rejects_invalid_chars() {
        assert!(GroupId::new("router_floor3_east_42").is_err());
    }

    #[test]
    fn boundary_lengths_are_inclusive() {
        let twenty = "a".repeat(20);
        let forty = "a".repeat(40);
        assert!(TenantId::new(twenty).is_ok());
        assert!(TenantId::new(forty).is_ok());
    }
}
