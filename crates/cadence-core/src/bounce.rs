//! Bounce classification
//!
//! Transport error strings are categorized by case-insensitive substring
//! match. Hard bounces are permanent (never retried, counted toward the
//! campaign bounce rate); soft bounces are transient and retried.
//! Unmatched errors default to soft.

/// Classification of a transport-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceClass {
    Hard,
    Soft,
    Unknown,
}

impl BounceClass {
    /// Whether this failure should be retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BounceClass::Hard)
    }

    /// Whether this failure counts toward the bounce rate
    pub fn is_bounce(&self) -> bool {
        matches!(self, BounceClass::Hard)
    }
}

const HARD_TRIGGERS: &[&str] = &[
    "user unknown",
    "no such user",
    "invalid recipient",
    "recipient address rejected",
    "user not found",
    "domain not found",
    "no mx record",
    "domain does not exist",
];

const SOFT_TRIGGERS: &[&str] = &[
    "mailbox full",
    "quota exceeded",
    "insufficient storage",
    "temporarily deferred",
    "try again later",
    "temporary failure",
    "rate limit",
    "too many emails",
    "sending quota",
];

/// Classify a transport error string
pub fn classify(error: &str) -> BounceClass {
    let lower = error.to_lowercase();

    if HARD_TRIGGERS.iter().any(|t| lower.contains(t)) {
        return BounceClass::Hard;
    }
    if SOFT_TRIGGERS.iter().any(|t| lower.contains(t)) {
        return BounceClass::Soft;
    }
    BounceClass::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_triggers() {
        assert_eq!(classify("550 user unknown"), BounceClass::Hard);
        assert_eq!(classify("550 5.1.1 No Such User here"), BounceClass::Hard);
        assert_eq!(classify("Invalid Recipient"), BounceClass::Hard);
        assert_eq!(
            classify("554 recipient address rejected: access denied"),
            BounceClass::Hard
        );
        assert_eq!(classify("user not found"), BounceClass::Hard);
        assert_eq!(classify("domain not found"), BounceClass::Hard);
        assert_eq!(classify("no MX record for host"), BounceClass::Hard);
        assert_eq!(classify("domain does not exist"), BounceClass::Hard);
    }

    #[test]
    fn test_soft_triggers() {
        assert_eq!(classify("452 mailbox full"), BounceClass::Soft);
        assert_eq!(classify("Quota Exceeded for user"), BounceClass::Soft);
        assert_eq!(classify("insufficient storage"), BounceClass::Soft);
        assert_eq!(classify("421 temporarily deferred"), BounceClass::Soft);
        assert_eq!(classify("please try again later"), BounceClass::Soft);
        assert_eq!(classify("temporary failure in name resolution"), BounceClass::Soft);
        assert_eq!(classify("rate limit reached"), BounceClass::Soft);
        assert_eq!(classify("too many emails sent"), BounceClass::Soft);
        assert_eq!(classify("sending quota reached"), BounceClass::Soft);
    }

    #[test]
    fn test_unmatched_defaults_to_unknown() {
        assert_eq!(classify("connection reset by peer"), BounceClass::Unknown);
        assert_eq!(classify(""), BounceClass::Unknown);
        assert!(classify("connection reset by peer").is_retryable());
        assert!(!classify("connection reset by peer").is_bounce());
    }

    #[test]
    fn test_hard_wins_over_soft() {
        // both substrings present; hard triggers are checked first
        assert_eq!(
            classify("user unknown and mailbox full"),
            BounceClass::Hard
        );
    }

    #[test]
    fn test_retry_and_bounce_flags() {
        assert!(!BounceClass::Hard.is_retryable());
        assert!(BounceClass::Hard.is_bounce());
        assert!(BounceClass::Soft.is_retryable());
        assert!(!BounceClass::Soft.is_bounce());
    }
}
