use core::fmt;

use crate::error::Result;
use crate::headers::SipHeaderParse;
use crate::message::Params;
use crate::parser::Parser;

const EXPIRES_PARAM: &str = "expires";
const REASON_PARAM: &str = "reason";

/// The `Subscription-State` header (RFC 6665).
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState {
    pub state: String,
    pub expires: Option<u32>,
    pub reason: Option<String>,
    pub params: Params,
}

impl SubscriptionState {
    pub fn active(expires: u32) -> Self {
        SubscriptionState {
            state: "active".to_string(),
            expires: Some(expires),
            reason: None,
            params: Params::new(),
        }
    }

    pub fn terminated(reason: &str) -> Self {
        SubscriptionState {
            state: "terminated".to_string(),
            expires: None,
            reason: Some(reason.to_string()),
            params: Params::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.eq_ignore_ascii_case("terminated")
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", SubscriptionState::NAME, self.state)?;
        if let Some(expires) = &self.expires {
            write!(f, ";expires={expires}")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ";reason={reason}")?;
        }
        if !self.params.is_empty() {
            write!(f, ";{}", self.params)?;
        }
        Ok(())
    }
}

impl SipHeaderParse for SubscriptionState {
    const NAME: &'static str = "Subscription-State";

    fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let state = parser.parse_token()?.to_string();
        let mut params = parser.parse_param_list()?;
        let expires = params
            .remove(EXPIRES_PARAM)
            .and_then(|p| p.value)
            .and_then(|v| v.parse().ok());
        let reason = params.remove(REASON_PARAM).and_then(|p| p.value);

        Ok(SubscriptionState {
            state,
            expires,
            reason,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_terminated() {
        let state = SubscriptionState::from_value("terminated;reason=noresource").unwrap();
        assert!(state.is_terminated());
        assert_eq!(state.reason.as_deref(), Some("noresource"));
    }

    #[test]
    fn test_active_display() {
        let state = SubscriptionState::active(60);
        assert_eq!(state.to_string(), "Subscription-State: active;expires=60");
    }
}
