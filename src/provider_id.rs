//! ProviderID codec
//!
//! Pool members are keyed by `aws:///<availability-zone>/<instance-id>`.
//! The same string is written to `AWSMachine.spec.providerID` and to the
//! pool's `providerIDList`, so formatting must round-trip exactly.

use std::fmt;
use std::str::FromStr;

use crate::Error;

const SCHEME: &str = "aws:///";

/// Identity of one pool member
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId {
    /// Availability zone the instance runs in
    pub availability_zone: String,
    /// EC2 instance ID
    pub instance_id: String,
}

impl ProviderId {
    /// Build a ProviderID from its parts
    pub fn new(availability_zone: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            availability_zone: availability_zone.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Parse `aws:///<az>/<instance-id>`
    pub fn parse(s: &str) -> Result<Self, Error> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::validation(format!("providerID {s:?} must start with {SCHEME}")))?;
        match rest.split_once('/') {
            Some((az, id)) if !az.is_empty() && !id.is_empty() && !id.contains('/') => {
                Ok(Self::new(az, id))
            }
            _ => Err(Error::validation(format!(
                "providerID {s:?} must have the form {SCHEME}<availability-zone>/<instance-id>"
            ))),
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.availability_zone, self.instance_id)
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn formats_aws_scheme() {
        let id = ProviderId::new("us-east-1a", "i-0123456789abcdef0");
        assert_eq!(id.to_string(), "aws:///us-east-1a/i-0123456789abcdef0");
    }

    #[rstest]
    #[case::wrong_scheme("gce:///us-east-1a/i-1")]
    #[case::missing_instance("aws:///us-east-1a/")]
    #[case::missing_zone("aws:////i-1")]
    #[case::no_separator("aws:///i-1")]
    #[case::extra_segment("aws:///us-east-1a/i-1/x")]
    fn rejects_malformed(#[case] raw: &str) {
        assert!(ProviderId::parse(raw).is_err());
    }

    proptest! {
        #[test]
        fn parse_inverts_format(az in "[a-z]{2}-[a-z]{4,9}-[1-9][a-f]", id in "i-[0-9a-f]{8,17}") {
            let formatted = ProviderId::new(az.clone(), id.clone()).to_string();
            let parsed: ProviderId = formatted.parse().unwrap();
            prop_assert_eq!(parsed.availability_zone, az);
            prop_assert_eq!(parsed.instance_id, id);
        }
    }
}
