//! Payment decisions that do not need IO.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use tally_core::{DomainError, DomainResult, OwnerId};

use crate::document::PaymentStatus;

/// Currencies whose minor unit equals the major unit.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// `payment_status` of a processor checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl SessionPaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPaymentStatus::Paid => "paid",
            SessionPaymentStatus::Unpaid => "unpaid",
            SessionPaymentStatus::NoPaymentRequired => "no_payment_required",
        }
    }
}

/// Outcome of comparing the processor's view with the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentDecision {
    /// Processor says paid, local does not: write the paid transition.
    MarkPaid,
    /// Both sides agree the invoice is paid. No write.
    AlreadyPaid,
    /// Processor has not collected the money yet. No write.
    AwaitingPayment(SessionPaymentStatus),
}

impl PaymentDecision {
    pub fn next_status(self, current: PaymentStatus) -> PaymentStatus {
        match self {
            PaymentDecision::MarkPaid => PaymentStatus::Paid,
            PaymentDecision::AlreadyPaid | PaymentDecision::AwaitingPayment(_) => current,
        }
    }
}

/// The single convergence rule shared by the pull and push reconciliation paths.
pub fn decide_payment(session: SessionPaymentStatus, local: PaymentStatus) -> PaymentDecision {
    match (session, local) {
        (SessionPaymentStatus::Paid, PaymentStatus::Paid) => PaymentDecision::AlreadyPaid,
        (SessionPaymentStatus::Paid, _) => PaymentDecision::MarkPaid,
        (other, _) => PaymentDecision::AwaitingPayment(other),
    }
}

/// Convert a major-unit amount into the processor's integer minor units.
pub fn to_minor_units(amount: Decimal, currency: &str) -> DomainResult<i64> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::validation(format!("invalid currency code: {currency}")));
    }
    if amount < Decimal::ZERO {
        return Err(DomainError::validation("amount must not be negative"));
    }

    let upper = currency.to_ascii_uppercase();
    let scaled = if ZERO_DECIMAL_CURRENCIES.contains(&upper.as_str()) {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };

    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| DomainError::invariant("amount exceeds minor-unit range"))
}

/// Billing settings of an account, including its connected merchant sub-account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantProfile {
    pub owner_id: OwnerId,
    /// ISO 4217, lowercase as the processor expects.
    pub currency: String,
    pub connected_account_id: Option<String>,
    pub charges_enabled: bool,
    pub notification_email: Option<String>,
}

impl MerchantProfile {
    /// The sub-account to charge under, if it exists and can accept charges.
    pub fn charge_capable_account(&self) -> DomainResult<&str> {
        let account = self
            .connected_account_id
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| DomainError::validation("no connected merchant account on file"))?;
        if !self.charges_enabled {
            return Err(DomainError::validation(
                "connected merchant account cannot accept charges yet",
            ));
        }
        Ok(account)
    }
}
