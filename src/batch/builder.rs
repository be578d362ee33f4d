//! Batch construction from user-entered calls

use super::types::{BatchRequest, Call, PaymasterServiceDirective, RequestCapabilities};
use crate::config::{CallConfig, MAX_CALLS};
use crate::error::{RelayerError, RelayerResult};
use crate::wallet::chain_id_hex;

use ethers::types::{Address, U256};
use ethers::utils::parse_ether;
use lazy_static::lazy_static;
use regex::Regex;

/// Protocol version sent with every batch
pub const BATCH_VERSION: &str = "2.0.0";

/// Native currency decimals assumed for every chain
pub const NATIVE_DECIMALS: usize = 18;

lazy_static! {
    static ref AMOUNT: Regex =
        Regex::new(r"^(?P<int>\d*)(?:\.(?P<frac>\d*))?$").expect("valid amount pattern");
}

/// One call as entered by the user: destination and human-readable amount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallInput {
    pub to: String,
    pub amount: String,
}

impl CallInput {
    pub fn new(to: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            amount: amount.into(),
        }
    }

    fn has_destination(&self) -> bool {
        !self.to.trim().is_empty()
    }
}

impl From<&CallConfig> for CallInput {
    fn from(config: &CallConfig) -> Self {
        Self::new(config.to.clone(), config.amount.clone())
    }
}

/// Builds `wallet_sendCalls` requests
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    version: String,
}

impl BatchBuilder {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Build an atomic batch from up to three calls.
    ///
    /// The first call must have a destination. Later calls are kept only when
    /// their destination is filled in, whatever their amount.
    pub fn build(
        &self,
        chain_id: u64,
        from: Address,
        inputs: &[CallInput],
        sponsor: bool,
    ) -> RelayerResult<BatchRequest> {
        if inputs.is_empty() || inputs.len() > MAX_CALLS {
            return Err(RelayerError::InvalidCall {
                index: inputs.len(),
                message: format!("a batch holds between 1 and {} calls", MAX_CALLS),
            });
        }

        if !inputs[0].has_destination() {
            return Err(RelayerError::InvalidCall {
                index: 1,
                message: "destination address is required".to_string(),
            });
        }

        let calls = inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.has_destination())
            .map(|(i, input)| build_call(i + 1, input))
            .collect::<RelayerResult<Vec<_>>>()?;

        let capabilities = sponsor.then(|| RequestCapabilities {
            paymaster_service: PaymasterServiceDirective::default(),
        });

        Ok(BatchRequest {
            version: self.version.clone(),
            chain_id: chain_id_hex(chain_id),
            from,
            atomic_required: true,
            calls,
            capabilities,
        })
    }
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(BATCH_VERSION)
    }
}

fn build_call(index: usize, input: &CallInput) -> RelayerResult<Call> {
    let to: Address = input
        .to
        .trim()
        .parse()
        .map_err(|e| RelayerError::InvalidCall {
            index,
            message: format!("invalid destination {:?}: {}", input.to, e),
        })?;

    let value = parse_amount(&input.amount).map_err(|message| RelayerError::InvalidCall {
        index,
        message,
    })?;

    Ok(Call::new(to, value))
}

/// Convert a non-negative decimal amount of native currency to wei
pub fn parse_amount(amount: &str) -> Result<U256, String> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Ok(U256::zero());
    }

    let caps = AMOUNT
        .captures(amount)
        .ok_or_else(|| format!("amount {:?} is not a non-negative number", amount))?;

    let int = caps.name("int").map(|m| m.as_str()).unwrap_or("");
    let frac = caps.name("frac").map(|m| m.as_str()).unwrap_or("");

    if int.is_empty() && frac.is_empty() {
        return Err(format!("amount {:?} is not a non-negative number", amount));
    }
    if frac.len() > NATIVE_DECIMALS {
        return Err(format!(
            "amount {:?} has more than {} decimals",
            amount, NATIVE_DECIMALS
        ));
    }

    let int = if int.is_empty() { "0" } else { int };
    let normalized = if frac.is_empty() {
        int.to_string()
    } else {
        format!("{}.{}", int, frac)
    };

    parse_ether(normalized).map_err(|e| format!("amount {:?} out of range: {}", amount, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ACCOUNT, RECIPIENT};

    const SECOND: &str = "0x4444444444444444444444444444444444444444";

    fn from() -> Address {
        ACCOUNT.parse().unwrap()
    }

    #[test]
    fn test_amount_conversion() {
        assert_eq!(parse_amount("0").unwrap(), U256::zero());
        assert_eq!(parse_amount("").unwrap(), U256::zero());
        assert_eq!(parse_amount("1").unwrap(), U256::exp10(18));
        assert_eq!(parse_amount("1.5").unwrap(), U256::from(1_500_000_000_000_000_000u64));
        assert_eq!(parse_amount(".25").unwrap(), U256::from(250_000_000_000_000_000u64));
        assert_eq!(parse_amount("0.000000000000000001").unwrap(), U256::one());
    }

    #[test]
    fn test_amount_rejects_invalid() {
        assert!(parse_amount("-1").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount(".").is_err());
        assert!(parse_amount("1e18").is_err());
        assert!(parse_amount("0.0000000000000000001").is_err());
    }

    #[test]
    fn test_single_call_values() {
        let builder = BatchBuilder::default();

        let zero = builder
            .build(100, from(), &[CallInput::new(RECIPIENT, "0")], false)
            .unwrap();
        assert_eq!(zero.calls[0].value, "0x0");

        let one = builder
            .build(100, from(), &[CallInput::new(RECIPIENT, "1")], false)
            .unwrap();
        assert_eq!(one.calls[0].value, "0xde0b6b3a7640000");
        assert_eq!(one.chain_id, "0x64");
        assert_eq!(one.version, "2.0.0");
        assert!(one.atomic_required);
        assert!(one.capabilities.is_none());
    }

    #[test]
    fn test_optional_calls_follow_destination() {
        let builder = BatchBuilder::default();

        let request = builder
            .build(
                1,
                from(),
                &[
                    CallInput::new(RECIPIENT, "0.1"),
                    CallInput::new("", "5"),
                    CallInput::new(SECOND, "0"),
                ],
                false,
            )
            .unwrap();

        assert_eq!(request.calls.len(), 2);
        assert_eq!(request.calls[0].to, RECIPIENT.parse::<Address>().unwrap());
        assert_eq!(request.calls[1].to, SECOND.parse::<Address>().unwrap());
        assert_eq!(request.calls[1].value, "0x0");
    }

    #[test]
    fn test_first_destination_required() {
        let err = BatchBuilder::default()
            .build(1, from(), &[CallInput::new("  ", "1"), CallInput::new(SECOND, "1")], false)
            .unwrap_err();
        assert!(matches!(err, RelayerError::InvalidCall { index: 1, .. }));
    }

    #[test]
    fn test_optional_call_amount_still_validated() {
        let err = BatchBuilder::default()
            .build(
                1,
                from(),
                &[CallInput::new(RECIPIENT, "1"), CallInput::new(SECOND, "lots")],
                false,
            )
            .unwrap_err();
        assert!(matches!(err, RelayerError::InvalidCall { index: 2, .. }));
    }

    #[test]
    fn test_invalid_destination() {
        let err = BatchBuilder::default()
            .build(1, from(), &[CallInput::new("0x1234", "1")], false)
            .unwrap_err();
        assert!(matches!(err, RelayerError::InvalidCall { index: 1, .. }));
    }

    #[test]
    fn test_sponsorship_directive() {
        let request = BatchBuilder::default()
            .build(1, from(), &[CallInput::new(RECIPIENT, "1")], true)
            .unwrap();
        let capabilities = request.capabilities.unwrap();
        assert_eq!(capabilities.paymaster_service.url, None);
    }

    #[test]
    fn test_rejects_more_than_three_calls() {
        let inputs = vec![CallInput::new(RECIPIENT, "1"); 4];
        assert!(BatchBuilder::default().build(1, from(), &inputs, false).is_err());
    }
}
