/// Checks a voter's one-time password before a token is issued.
///
/// OTP delivery and verification belong to an external authority; the
/// election only asks it for a verdict.
pub trait OtpValidator: Send + Sync {
    fn validate(&self, voter_id: &str, otp: &str) -> bool;
}

/// Trusts that the OTP was already verified upstream and accepts any code.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedOtp;

impl OtpValidator for TrustedOtp {
    fn validate(&self, _voter_id: &str, _otp: &str) -> bool {
        true
    }
}
