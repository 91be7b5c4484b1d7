//! Finance: payments out of the vault
//!
//! One-shot payments that are due immediately are paid on creation.
//! Everything else becomes a scheduled payment: `max_repeats` installments
//! of `amount`, the first at `initial_payment_time` and then every
//! `interval` seconds. Installments accumulate when not executed on time
//! and are paid together by the next `execute_payment`.
//!
//! Income and expenses are accounted per fixed-length period.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use orgkit_acl::roles;
use orgkit_core::{
    decode_call, downcast_image, encode_call, encode_return, Address, AppKind, Application, CallContext,
    CallError, RevertError, Revertible, StateImage, Timestamp,
};
use orgkit_kernel::InstallEnv;

use crate::vault::VaultCall;
use crate::{authorize, AppError, AppResult};

/// Calls accepted by finance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FinanceCall {
    /// Deposit the caller's funds into the vault
    Deposit { amount: u128, reference: String },
    /// Create a payment; requires `CREATE_PAYMENTS`
    NewPayment {
        receiver: Address,
        amount: u128,
        initial_payment_time: Timestamp,
        interval: u64,
        max_repeats: u64,
        reference: String,
    },
    /// Pay every due installment; requires `EXECUTE_PAYMENTS` unless called by the receiver
    ExecutePayment { payment_id: u64 },
    /// Activate or deactivate a payment; requires `MANAGE_PAYMENTS`
    SetPaymentStatus { payment_id: u64, active: bool },
    /// Look up a payment
    GetPayment { payment_id: u64 },
}

/// A scheduled payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub receiver: Address,
    pub amount: u128,
    pub initial_payment_time: Timestamp,
    pub interval: u64,
    pub max_repeats: u64,
    /// Installments paid so far
    pub repeats: u64,
    pub reference: String,
    pub active: bool,
    pub created_by: Address,
}

impl Payment {
    /// Installments due at `now` and not yet paid
    fn due_installments(&self, now: Timestamp) -> u64 {
        if now < self.initial_payment_time {
            return 0;
        }
        let elapsed = (now - self.initial_payment_time) / self.interval;
        let reached = elapsed.saturating_add(1).min(self.max_repeats);
        reached.saturating_sub(self.repeats)
    }

    /// When the next unpaid installment falls due
    pub fn next_payment_time(&self) -> Option<Timestamp> {
        if self.repeats >= self.max_repeats {
            return None;
        }
        self.repeats
            .checked_mul(self.interval)
            .and_then(|offset| self.initial_payment_time.checked_add(offset))
    }
}

/// Income and expenses of one accounting period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub income: u128,
    pub expenses: u128,
}

#[derive(Debug, Clone, Default)]
struct FinanceState {
    payments: BTreeMap<u64, Payment>,
    next_payment_id: u64,
    periods: BTreeMap<u64, PeriodTotals>,
}

/// Disburses the vault's funds
pub struct Finance {
    env: InstallEnv,
    vault: Address,
    period_duration: u64,
    start_time: Timestamp,
    state: RwLock<FinanceState>,
}

impl Finance {
    /// Create a finance app paying out of `vault`
    pub fn new(env: InstallEnv, vault: Address, period_duration: u64, start_time: Timestamp) -> Self {
        Self {
            env,
            vault,
            period_duration: period_duration.max(1),
            start_time,
            state: RwLock::new(FinanceState {
                next_payment_id: 1,
                ..Default::default()
            }),
        }
    }

    /// The vault funds are paid from
    pub fn vault(&self) -> Address {
        self.vault
    }

    /// Accounting period containing `now`
    pub fn period_at(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.start_time) / self.period_duration
    }

    /// Totals of an accounting period
    pub async fn period_totals(&self, period: u64) -> PeriodTotals {
        self.state.read().await.periods.get(&period).cloned().unwrap_or_default()
    }

    /// Look up a payment
    pub async fn payment(&self, payment_id: u64) -> AppResult<Payment> {
        self.state
            .read()
            .await
            .payments
            .get(&payment_id)
            .cloned()
            .ok_or(AppError::UnknownPayment(payment_id))
    }

    /// Deposit the caller's funds into the vault
    pub async fn deposit(&self, ctx: &CallContext, amount: u128, reference: &str) -> AppResult<()> {
        self.env.bank.transfer(ctx.sender, self.vault, amount).await?;
        let period = self.period_at(ctx.timestamp);
        self.state.write().await.periods.entry(period).or_default().income += amount;
        info!(finance = %self.env.address, from = %ctx.sender, amount, reference, "Deposit");
        Ok(())
    }

    /// Create a payment; returns its id, or 0 when it was paid immediately
    pub async fn new_payment(
        &self,
        ctx: &CallContext,
        receiver: Address,
        amount: u128,
        initial_payment_time: Timestamp,
        interval: u64,
        max_repeats: u64,
        reference: &str,
    ) -> AppResult<u64> {
        authorize(&self.env, ctx.sender, roles::CREATE_PAYMENTS).await?;

        if amount == 0 {
            return Err(AppError::InvalidPayment("amount must be positive".to_string()));
        }

        if initial_payment_time <= ctx.timestamp && max_repeats == 1 {
            self.pay(ctx, receiver, amount, reference).await?;
            return Ok(0);
        }

        if interval == 0 || max_repeats == 0 {
            return Err(AppError::InvalidPayment(
                "scheduled payments need a positive interval and repeat count".to_string(),
            ));
        }

        let payment_id = {
            let mut state = self.state.write().await;
            let payment_id = state.next_payment_id;
            state.next_payment_id += 1;
            state.payments.insert(
                payment_id,
                Payment {
                    id: payment_id,
                    receiver,
                    amount,
                    initial_payment_time,
                    interval,
                    max_repeats,
                    repeats: 0,
                    reference: reference.to_string(),
                    active: true,
                    created_by: ctx.sender,
                },
            );
            payment_id
        };
        info!(finance = %self.env.address, payment_id, receiver = %receiver, amount, "Payment scheduled");

        if initial_payment_time <= ctx.timestamp {
            self.execute_due(ctx, payment_id).await?;
        }
        Ok(payment_id)
    }

    /// Pay every due installment of a payment
    ///
    /// The receiver may always execute their own payment.
    pub async fn execute_payment(&self, ctx: &CallContext, payment_id: u64) -> AppResult<u64> {
        let payment = self.payment(payment_id).await?;
        if ctx.sender != payment.receiver {
            authorize(&self.env, ctx.sender, roles::EXECUTE_PAYMENTS).await?;
        }
        self.execute_due(ctx, payment_id).await
    }

    /// Activate or deactivate a payment
    pub async fn set_payment_status(&self, ctx: &CallContext, payment_id: u64, active: bool) -> AppResult<()> {
        authorize(&self.env, ctx.sender, roles::MANAGE_PAYMENTS).await?;
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(AppError::UnknownPayment(payment_id))?;
        payment.active = active;
        info!(finance = %self.env.address, payment_id, active, "Payment status changed");
        Ok(())
    }

    async fn execute_due(&self, ctx: &CallContext, payment_id: u64) -> AppResult<u64> {
        let payment = self.payment(payment_id).await?;
        if !payment.active {
            return Err(AppError::PaymentInactive(payment_id));
        }
        let installments = payment.due_installments(ctx.timestamp);
        if installments == 0 {
            return Err(AppError::NothingDue(payment_id));
        }
        let total = payment
            .amount
            .checked_mul(installments as u128)
            .ok_or_else(|| AppError::InvalidPayment("payout overflows".to_string()))?;

        self.pay(ctx, payment.receiver, total, &payment.reference).await?;

        if let Some(stored) = self.state.write().await.payments.get_mut(&payment_id) {
            stored.repeats += installments;
        }
        debug!(finance = %self.env.address, payment_id, installments, "Payment executed");
        Ok(installments)
    }

    // Must not hold the state lock: the vault call saves this app's state
    async fn pay(&self, ctx: &CallContext, receiver: Address, amount: u128, reference: &str) -> AppResult<()> {
        let calldata = encode_call(&VaultCall::Transfer { to: receiver, amount }).map_err(|e| {
            AppError::InvalidPayment(e.to_string())
        })?;
        self.env.call(ctx, self.vault, calldata).await?;

        let period = self.period_at(ctx.timestamp);
        self.state.write().await.periods.entry(period).or_default().expenses += amount;
        info!(finance = %self.env.address, receiver = %receiver, amount, reference, "Payment sent");
        Ok(())
    }
}

#[async_trait]
impl Revertible for Finance {
    async fn save_state(&self) -> StateImage {
        Box::new(self.state.read().await.clone())
    }

    async fn restore_state(&self, image: StateImage) -> Result<(), RevertError> {
        *self.state.write().await = downcast_image(image, "finance")?;
        Ok(())
    }
}

#[async_trait]
impl Application for Finance {
    fn kind(&self) -> AppKind {
        AppKind::Finance
    }

    fn address(&self) -> Address {
        self.env.address
    }

    async fn invoke(&self, ctx: &CallContext, calldata: &[u8]) -> Result<Vec<u8>, CallError> {
        match decode_call(calldata)? {
            FinanceCall::Deposit { amount, reference } => encode_return(&self.deposit(ctx, amount, &reference).await?),
            FinanceCall::NewPayment {
                receiver,
                amount,
                initial_payment_time,
                interval,
                max_repeats,
                reference,
            } => encode_return(
                &self
                    .new_payment(ctx, receiver, amount, initial_payment_time, interval, max_repeats, &reference)
                    .await?,
            ),
            FinanceCall::ExecutePayment { payment_id } => encode_return(&self.execute_payment(ctx, payment_id).await?),
            FinanceCall::SetPaymentStatus { payment_id, active } => {
                encode_return(&self.set_payment_status(ctx, payment_id, active).await?)
            }
            FinanceCall::GetPayment { payment_id } => encode_return(&self.payment(payment_id).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(initial: Timestamp, interval: u64, max_repeats: u64) -> Payment {
        Payment {
            id: 1,
            receiver: Address::from_label("receiver"),
            amount: 10,
            initial_payment_time: initial,
            interval,
            max_repeats,
            repeats: 0,
            reference: String::new(),
            active: true,
            created_by: Address::from_label("voting"),
        }
    }

    #[test]
    fn test_due_installments_accumulate() {
        let p = payment(100, 10, 5);
        assert_eq!(p.due_installments(99), 0);
        assert_eq!(p.due_installments(100), 1);
        assert_eq!(p.due_installments(125), 3);
        assert_eq!(p.due_installments(10_000), 5);
    }

    #[test]
    fn test_due_installments_exclude_paid() {
        let mut p = payment(100, 10, 5);
        p.repeats = 3;
        assert_eq!(p.due_installments(125), 0);
        assert_eq!(p.due_installments(130), 1);
        assert_eq!(p.next_payment_time(), Some(130));
        p.repeats = 5;
        assert_eq!(p.next_payment_time(), None);
    }
}
