// token-sale/src/sale.rs

use crate::{
    config::SaleConfig,
    events::{EventLog, SaleEvent},
    lifecycle::{Lifecycle, SaleState},
    policy::{RatePhase, SalePolicy},
    settlement::Settlement,
    Guard, SaleError, SaleResult,
};
use sale_core::{Address, Amount, BlockNumber, ExchangeRate, Ledger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Host-supplied call metadata: who is calling, with how much value, at which height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    pub caller: Address,
    #[serde(default)]
    pub value: Amount,
    pub block: BlockNumber,
}

impl CallContext {
    /// Call with no attached value
    pub fn new(caller: Address, block: BlockNumber) -> Self {
        Self {
            caller,
            value: Amount::zero(),
            block,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }
}

/// Callable surface of the sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Contribute,
    Finalize,
    StartRedeeming,
    Refund,
    Transfer { to: Address, amount: Amount },
    Pause,
    Unpause,
}

/// Outcome of an accepted action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Contributed {
        tokens: Amount,
        rate: ExchangeRate,
        phase: RatePhase,
    },
    Finalized {
        released: Amount,
    },
    RedeemingStarted,
    Refunded {
        burned: Amount,
        returned: Amount,
    },
    Transferred {
        to: Address,
        amount: Amount,
    },
    Paused,
    Unpaused,
}

/// Wei paid in and tokens issued to one contributor, kept for refunds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub wei: Amount,
    pub tokens: Amount,
}

/// Read-only summary of the sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSnapshot {
    pub lifecycle: Lifecycle,
    pub state_code: u8,
    pub paused: bool,
    pub total_wei_received: Amount,
    pub total_tokens_issued: Amount,
    pub token_headroom: Amount,
    pub wei_headroom: Amount,
    pub minimum_reached: bool,
    pub cap_reached: bool,
    pub holders: usize,
    pub contributors: usize,
    pub finalized_at: Option<BlockNumber>,
    pub redeeming_at: Option<BlockNumber>,
}

/// The sale aggregate: config, lifecycle state, token ledger and contribution records.
///
/// Each action checks every guard before asking the settlement layer to move
/// value, and only writes its own state once that movement succeeded. A
/// rejected action therefore leaves both the sale and the settlement untouched.
///
/// Calls must arrive in block order: an action at a block below the highest
/// one already accepted is rejected with [`Guard::BlockInPast`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSale {
    config: SaleConfig,
    state: SaleState,
    ledger: Ledger,
    contributions: BTreeMap<Address, Contribution>,
    #[serde(skip)]
    events: EventLog,
}

impl TokenSale {
    /// Create a sale in Fundraising with zero totals
    pub fn new(config: SaleConfig) -> SaleResult<Self> {
        config.validate()?;

        tracing::info!(
            "Token sale created: funding blocks {}..{}, rate change at {}, fund deposit {}",
            config.funding_start_block,
            config.funding_end_block,
            config.exchange_rate_changes_block,
            config.fund_deposit
        );

        Ok(Self {
            config,
            state: SaleState::new(),
            ledger: Ledger::new(),
            contributions: BTreeMap::new(),
            events: EventLog::default(),
        })
    }

    /// Re-check invariants of a sale loaded from storage
    pub fn validate_restored(&self) -> SaleResult<()> {
        self.config.validate()?;

        if !self.ledger.is_consistent() {
            return Err(SaleError::InconsistentState(
                "ledger supply does not match balances".into(),
            ));
        }
        let totals = self.state.totals();
        if self.ledger.total_supply() != &totals.tokens_issued {
            return Err(SaleError::InconsistentState(format!(
                "ledger supply {} differs from tokens issued {}",
                self.ledger.total_supply(),
                totals.tokens_issued
            )));
        }
        if totals.tokens_issued > self.config.token_creation_cap {
            return Err(SaleError::InconsistentState(
                "tokens issued exceed the creation cap".into(),
            ));
        }
        if self.state.is_paused() && self.state.lifecycle() != Lifecycle::Fundraising {
            return Err(SaleError::InconsistentState(
                "paused outside of fundraising".into(),
            ));
        }
        Ok(())
    }

    // ----- queries -----

    pub fn config(&self) -> &SaleConfig {
        &self.config
    }

    /// Current lifecycle
    pub fn state(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    pub fn sale_state(&self) -> &SaleState {
        &self.state
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    pub fn balance_of(&self, holder: &Address) -> Amount {
        self.ledger.balance_of(holder)
    }

    pub fn total_wei_received(&self) -> &Amount {
        &self.state.totals().wei_received
    }

    pub fn total_tokens_issued(&self) -> &Amount {
        &self.state.totals().tokens_issued
    }

    pub fn contribution_of(&self, contributor: &Address) -> Option<&Contribution> {
        self.contributions.get(contributor)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn policy(&self) -> SalePolicy<'_> {
        SalePolicy::new(&self.config)
    }

    /// Whether a contributor could refund at `block`
    pub fn refunds_open(&self, block: BlockNumber) -> bool {
        self.state.lifecycle() == Lifecycle::Fundraising
            && self.config.funding_ended(block)
            && !self.policy().minimum_reached(self.state.totals())
    }

    pub fn snapshot(&self) -> SaleSnapshot {
        let policy = self.policy();
        let totals = self.state.totals();
        SaleSnapshot {
            lifecycle: self.state.lifecycle(),
            state_code: self.state.lifecycle().code(),
            paused: self.state.is_paused(),
            total_wei_received: totals.wei_received.clone(),
            total_tokens_issued: totals.tokens_issued.clone(),
            token_headroom: policy.remaining_token_headroom(totals),
            wei_headroom: policy.remaining_wei_headroom(totals),
            minimum_reached: policy.minimum_reached(totals),
            cap_reached: policy.cap_reached(totals),
            holders: self.ledger.holder_count(),
            contributors: self.contributions.len(),
            finalized_at: self.state.finalized_at(),
            redeeming_at: self.state.redeeming_at(),
        }
    }

    // ----- actions -----

    /// Dispatch `action`, logging rejections
    pub fn execute<S: Settlement + ?Sized>(
        &mut self,
        ctx: &CallContext,
        action: &Action,
        settlement: &mut S,
    ) -> SaleResult<Effect> {
        let result = match action {
            Action::Contribute => self.contribute(ctx, settlement),
            Action::Finalize => self.finalize(ctx, settlement),
            Action::StartRedeeming => self.start_redeeming(ctx),
            Action::Refund => self.refund(ctx, settlement),
            Action::Transfer { to, amount } => self.transfer(ctx, to, amount),
            Action::Pause => self.pause(ctx),
            Action::Unpause => self.unpause(ctx),
        };

        if let Err(err) = &result {
            tracing::debug!(
                "Rejected {:?} from {} at block {}: {}",
                action,
                ctx.caller,
                ctx.block,
                err
            );
        }
        result
    }

    /// Buy tokens with the attached value
    pub fn contribute<S: Settlement + ?Sized>(
        &mut self,
        ctx: &CallContext,
        settlement: &mut S,
    ) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        if ctx.value.is_zero() {
            return Err(SaleError::rejected(Guard::ZeroValue));
        }
        self.require_lifecycle(Lifecycle::Fundraising, Guard::NotFundraising)?;
        if self.state.is_paused() {
            return Err(SaleError::rejected(Guard::Paused));
        }
        if ctx.block < self.config.funding_start_block {
            return Err(SaleError::rejected(Guard::BeforeFundingStart));
        }
        if self.config.funding_ended(ctx.block) {
            return Err(SaleError::rejected(Guard::FundingEnded));
        }

        let issuance = self
            .policy()
            .quote(self.state.totals(), &ctx.value, ctx.block)?;

        settlement.pull(&ctx.caller, &ctx.value)?;

        self.ledger.issue(&ctx.caller, &issuance.tokens);
        self.state.record_contribution(&ctx.value, &issuance.tokens);
        let record = self.contributions.entry(ctx.caller).or_default();
        record.wei = record.wei.clone() + ctx.value.clone();
        record.tokens = record.tokens.clone() + issuance.tokens.clone();

        tracing::debug!(
            "Contribution of {} wei from {} at block {} issued {} tokens (rate {})",
            ctx.value,
            ctx.caller,
            ctx.block,
            issuance.tokens,
            issuance.rate
        );

        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::Contributed {
            contributor: ctx.caller,
            wei: ctx.value.clone(),
            tokens: issuance.tokens.clone(),
            phase: issuance.phase,
            block: ctx.block,
        });

        Ok(Effect::Contributed {
            tokens: issuance.tokens,
            rate: issuance.rate,
            phase: issuance.phase,
        })
    }

    /// Close the sale and release the raise to the fund deposit
    pub fn finalize<S: Settlement + ?Sized>(
        &mut self,
        ctx: &CallContext,
        settlement: &mut S,
    ) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        self.require_no_value(ctx)?;
        self.require_fund_deposit(ctx, "finalize")?;
        self.require_lifecycle(Lifecycle::Fundraising, Guard::NotFundraising)?;

        let policy = self.policy();
        let totals = self.state.totals();
        if !self.config.funding_ended(ctx.block) && !policy.cap_reached(totals) {
            return Err(SaleError::rejected(Guard::FundingNotEnded));
        }
        if !policy.minimum_reached(totals) {
            return Err(SaleError::rejected(Guard::MinimumNotReached));
        }

        let released = totals.wei_received.clone();
        let tokens_issued = totals.tokens_issued.clone();
        settlement.push(&self.config.fund_deposit, &released)?;

        self.state.advance(Lifecycle::Finalized, ctx.block);

        tracing::info!(
            "Sale finalized at block {}. Released {} wei to {}; {} tokens issued",
            ctx.block,
            released,
            self.config.fund_deposit,
            tokens_issued
        );

        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::Finalized {
            released: released.clone(),
            tokens_issued,
            block: ctx.block,
        });

        Ok(Effect::Finalized { released })
    }

    /// Enter the terminal redeeming phase
    pub fn start_redeeming(&mut self, ctx: &CallContext) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        self.require_no_value(ctx)?;
        self.require_fund_deposit(ctx, "start_redeeming")?;
        self.require_lifecycle(Lifecycle::Finalized, Guard::NotFinalized)?;

        self.state.advance(Lifecycle::Redeeming, ctx.block);

        tracing::info!("Redeeming started at block {}", ctx.block);
        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::RedeemingStarted { block: ctx.block });

        Ok(Effect::RedeemingStarted)
    }

    /// Burn the caller's tokens and return their share of the escrowed wei.
    /// Open to every holder once funding has ended without reaching the minimum.
    pub fn refund<S: Settlement + ?Sized>(
        &mut self,
        ctx: &CallContext,
        settlement: &mut S,
    ) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        self.require_no_value(ctx)?;
        self.require_lifecycle(Lifecycle::Fundraising, Guard::NotFundraising)?;
        if !self.config.funding_ended(ctx.block) {
            return Err(SaleError::rejected(Guard::FundingNotEnded));
        }
        if self.policy().minimum_reached(self.state.totals()) {
            return Err(SaleError::rejected(Guard::MinimumReached));
        }

        let balance = self.ledger.balance_of(&ctx.caller);
        if balance.is_zero() {
            return Err(SaleError::rejected(Guard::NoBalance));
        }

        // every outstanding token backs the same share of escrow, so the
        // last holder to refund drains it exactly
        let totals = self.state.totals();
        let returned = totals
            .wei_received
            .mul_div_floor(&balance, &totals.tokens_issued)
            .ok_or_else(|| {
                SaleError::InconsistentState("tokens held but none issued".into())
            })?;
        let remaining = totals.after_refund(&returned, &balance)?;

        if !returned.is_zero() {
            settlement.push(&ctx.caller, &returned)?;
        }

        let burned = self.ledger.burn_all(&ctx.caller)?;
        self.state.record_refund(remaining);
        self.contributions.remove(&ctx.caller);

        tracing::debug!(
            "Refunded {} wei to {} at block {}, burned {} tokens",
            returned,
            ctx.caller,
            ctx.block,
            burned
        );

        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::Refunded {
            contributor: ctx.caller,
            burned: burned.clone(),
            returned: returned.clone(),
            block: ctx.block,
        });

        Ok(Effect::Refunded { burned, returned })
    }

    /// Move tokens from the caller to `to`
    pub fn transfer(&mut self, ctx: &CallContext, to: &Address, amount: &Amount) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        self.require_no_value(ctx)?;

        let balance = self.ledger.balance_of(&ctx.caller);
        if balance.is_zero() {
            return Err(SaleError::rejected(Guard::NoBalance));
        }
        if &balance < amount {
            return Err(SaleError::InsufficientBalance {
                required: amount.clone(),
                available: balance,
            });
        }

        self.ledger.transfer(&ctx.caller, to, amount)?;

        tracing::debug!(
            "Transferred {} tokens from {} to {} at block {}",
            amount,
            ctx.caller,
            to,
            ctx.block
        );

        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::Transferred {
            from: ctx.caller,
            to: *to,
            amount: amount.clone(),
            block: ctx.block,
        });

        Ok(Effect::Transferred {
            to: *to,
            amount: amount.clone(),
        })
    }

    /// Stop accepting contributions
    pub fn pause(&mut self, ctx: &CallContext) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        self.require_no_value(ctx)?;
        self.require_fund_deposit(ctx, "pause")?;
        self.require_lifecycle(Lifecycle::Fundraising, Guard::NotFundraising)?;
        if self.state.is_paused() {
            return Err(SaleError::rejected(Guard::AlreadyPaused));
        }

        self.state.set_paused(true);
        tracing::info!("Sale paused at block {}", ctx.block);
        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::Paused { block: ctx.block });

        Ok(Effect::Paused)
    }

    /// Resume accepting contributions
    pub fn unpause(&mut self, ctx: &CallContext) -> SaleResult<Effect> {
        self.require_block_order(ctx)?;
        self.require_no_value(ctx)?;
        self.require_fund_deposit(ctx, "unpause")?;
        self.require_lifecycle(Lifecycle::Fundraising, Guard::NotFundraising)?;
        if !self.state.is_paused() {
            return Err(SaleError::rejected(Guard::NotPaused));
        }

        self.state.set_paused(false);
        tracing::info!("Sale unpaused at block {}", ctx.block);
        self.state.observe_block(ctx.block);
        self.events.push(SaleEvent::Unpaused { block: ctx.block });

        Ok(Effect::Unpaused)
    }

    // ----- guards -----

    fn require_block_order(&self, ctx: &CallContext) -> SaleResult<()> {
        match self.state.last_block() {
            Some(last) if ctx.block < last => Err(SaleError::rejected(Guard::BlockInPast)),
            _ => Ok(()),
        }
    }

    fn require_no_value(&self, ctx: &CallContext) -> SaleResult<()> {
        if ctx.value.is_zero() {
            Ok(())
        } else {
            Err(SaleError::rejected(Guard::UnexpectedValue))
        }
    }

    fn require_fund_deposit(&self, ctx: &CallContext, action: &str) -> SaleResult<()> {
        if ctx.caller == self.config.fund_deposit {
            return Ok(());
        }
        tracing::warn!(
            "Unauthorized {} attempt by {} at block {}",
            action,
            ctx.caller,
            ctx.block
        );
        Err(SaleError::Unauthorized)
    }

    fn require_lifecycle(&self, expected: Lifecycle, guard: Guard) -> SaleResult<()> {
        if self.state.lifecycle() == expected {
            Ok(())
        } else {
            Err(SaleError::rejected(guard))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::{InMemorySettlement, SettlementError, SettlementResult};
    use crate::CapKind;

    fn fund_deposit() -> Address {
        SaleConfig::default().fund_deposit
    }

    fn alice() -> Address {
        Address::from_low_u64(1)
    }

    fn bob() -> Address {
        Address::from_low_u64(2)
    }

    fn setup() -> (TokenSale, InMemorySettlement) {
        let sale = TokenSale::new(SaleConfig::default()).unwrap();
        let mut settlement = InMemorySettlement::new();
        settlement.fund(alice(), Amount::ether(1_000_000));
        settlement.fund(bob(), Amount::ether(1_000_000));
        (sale, settlement)
    }

    fn pay(caller: Address, block: BlockNumber, ether: u64) -> CallContext {
        CallContext::new(caller, block).with_value(Amount::ether(ether))
    }

    /// Settlement that refuses every movement
    struct RefusingSettlement;

    impl Settlement for RefusingSettlement {
        fn pull(&mut self, _from: &Address, _amount: &Amount) -> SettlementResult<()> {
            Err(SettlementError::Refused("offline".into()))
        }

        fn push(&mut self, _to: &Address, _amount: &Amount) -> SettlementResult<()> {
            Err(SettlementError::Refused("offline".into()))
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = SaleConfig::default();
        config.rate_first = 0;
        assert!(matches!(
            TokenSale::new(config),
            Err(SaleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_contribute_requires_value() {
        let (mut sale, mut settlement) = setup();
        let err = sale
            .contribute(&CallContext::new(alice(), 10), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::ZeroValue));
    }

    #[test]
    fn test_contribute_window() {
        let (mut sale, mut settlement) = setup();

        let err = sale.contribute(&pay(alice(), 9, 1), &mut settlement).unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::BeforeFundingStart));

        let err = sale.contribute(&pay(alice(), 20, 1), &mut settlement).unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::FundingEnded));

        assert!(sale.contribute(&pay(alice(), 19, 1), &mut settlement).is_ok());
        assert_eq!(settlement.escrow_balance(), &Amount::ether(1));
    }

    #[test]
    fn test_contribute_records_refund_basis() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 2), &mut settlement).unwrap();
        sale.contribute(&pay(alice(), 16, 1), &mut settlement).unwrap();

        let record = sale.contribution_of(&alice()).unwrap();
        assert_eq!(record.wei, Amount::ether(3));
        assert_eq!(record.tokens, Amount::ether(2 * 500 + 400));
        assert_eq!(sale.balance_of(&alice()), record.tokens);
    }

    #[test]
    fn test_paused_sale_rejects_contributions() {
        let (mut sale, mut settlement) = setup();
        sale.pause(&CallContext::new(fund_deposit(), 10)).unwrap();
        assert!(sale.is_paused());

        let err = sale.contribute(&pay(alice(), 11, 1), &mut settlement).unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::Paused));

        assert_eq!(
            sale.pause(&CallContext::new(fund_deposit(), 11)).unwrap_err(),
            SaleError::rejected(Guard::AlreadyPaused)
        );

        sale.unpause(&CallContext::new(fund_deposit(), 12)).unwrap();
        assert!(sale.contribute(&pay(alice(), 12, 1), &mut settlement).is_ok());
        assert_eq!(
            sale.unpause(&CallContext::new(fund_deposit(), 12)).unwrap_err(),
            SaleError::rejected(Guard::NotPaused)
        );
    }

    #[test]
    fn test_pause_requires_fund_deposit() {
        let (mut sale, _) = setup();
        assert_eq!(
            sale.pause(&CallContext::new(alice(), 10)).unwrap_err(),
            SaleError::Unauthorized
        );
        assert!(!sale.is_paused());
    }

    #[test]
    fn test_admin_actions_reject_attached_value() {
        let (mut sale, mut settlement) = setup();
        let ctx = pay(fund_deposit(), 25, 1);
        assert_eq!(
            sale.finalize(&ctx, &mut settlement).unwrap_err(),
            SaleError::rejected(Guard::UnexpectedValue)
        );
        assert_eq!(
            sale.pause(&ctx).unwrap_err(),
            SaleError::rejected(Guard::UnexpectedValue)
        );
    }

    #[test]
    fn test_finalize_after_end_with_minimum() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 10_000), &mut settlement).unwrap();

        let err = sale
            .finalize(&CallContext::new(fund_deposit(), 19), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::FundingNotEnded));

        let effect = sale
            .finalize(&CallContext::new(fund_deposit(), 20), &mut settlement)
            .unwrap();
        assert_eq!(
            effect,
            Effect::Finalized {
                released: Amount::ether(10_000)
            }
        );
        assert_eq!(sale.state(), Lifecycle::Finalized);
        assert_eq!(settlement.balance_of(&fund_deposit()), Amount::ether(10_000));
        assert!(settlement.escrow_balance().is_zero());
    }

    #[test]
    fn test_finalize_below_minimum_is_rejected() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 9_999), &mut settlement).unwrap();

        let err = sale
            .finalize(&CallContext::new(fund_deposit(), 20), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::MinimumNotReached));
        assert_eq!(sale.state(), Lifecycle::Fundraising);
        assert_eq!(settlement.escrow_balance(), &Amount::ether(9_999));
        assert!(sale.refunds_open(20));
    }

    #[test]
    fn test_finalize_clears_pause() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 10_000), &mut settlement).unwrap();
        sale.pause(&CallContext::new(fund_deposit(), 11)).unwrap();

        sale.finalize(&CallContext::new(fund_deposit(), 21), &mut settlement)
            .unwrap();
        assert!(!sale.is_paused());
        assert!(sale.validate_restored().is_ok());
    }

    #[test]
    fn test_start_redeeming_requires_finalized() {
        let (mut sale, mut settlement) = setup();
        let ctx = CallContext::new(fund_deposit(), 25);
        assert_eq!(
            sale.start_redeeming(&ctx).unwrap_err(),
            SaleError::rejected(Guard::NotFinalized)
        );

        sale.contribute(&pay(alice(), 10, 10_000), &mut settlement).unwrap();
        sale.finalize(&ctx, &mut settlement).unwrap();

        assert_eq!(
            sale.start_redeeming(&CallContext::new(alice(), 25)).unwrap_err(),
            SaleError::Unauthorized
        );
        assert_eq!(sale.start_redeeming(&ctx).unwrap(), Effect::RedeemingStarted);
        assert_eq!(sale.state(), Lifecycle::Redeeming);
        assert_eq!(sale.sale_state().redeeming_at(), Some(25));

        assert_eq!(
            sale.start_redeeming(&ctx).unwrap_err(),
            SaleError::rejected(Guard::NotFinalized)
        );
        assert_eq!(
            sale.finalize(&ctx, &mut settlement).unwrap_err(),
            SaleError::rejected(Guard::NotFundraising)
        );
    }

    #[test]
    fn test_transfer_guards() {
        let (mut sale, mut settlement) = setup();
        let amount = Amount::from_u64(10);

        let err = sale
            .transfer(&CallContext::new(alice(), 10), &bob(), &amount)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::NoBalance));

        sale.contribute(&CallContext::new(alice(), 10).with_value(Amount::from_u64(1)), &mut settlement)
            .unwrap();
        let err = sale
            .transfer(&CallContext::new(alice(), 10), &bob(), &Amount::from_u64(501))
            .unwrap_err();
        assert!(matches!(err, SaleError::InsufficientBalance { .. }));

        sale.transfer(&CallContext::new(alice(), 11), &bob(), &amount)
            .unwrap();
        assert_eq!(sale.balance_of(&alice()), Amount::from_u64(490));
        assert_eq!(sale.balance_of(&bob()), amount);
        assert_eq!(sale.total_tokens_issued(), &Amount::from_u64(500));
    }

    #[test]
    fn test_refund_guards() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 100), &mut settlement).unwrap();

        let err = sale
            .refund(&CallContext::new(alice(), 19), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::FundingNotEnded));

        let err = sale
            .refund(&CallContext::new(bob(), 20), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::NoBalance));

        let err = sale
            .refund(&pay(alice(), 20, 1), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::UnexpectedValue));
    }

    #[test]
    fn test_refund_returns_contribution() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 100), &mut settlement).unwrap();
        sale.contribute(&pay(alice(), 15, 50), &mut settlement).unwrap();

        let effect = sale
            .refund(&CallContext::new(alice(), 20), &mut settlement)
            .unwrap();
        assert_eq!(
            effect,
            Effect::Refunded {
                burned: Amount::ether(100 * 500 + 50 * 400),
                returned: Amount::ether(150),
            }
        );
        assert!(sale.total_tokens_issued().is_zero());
        assert!(sale.total_wei_received().is_zero());
        assert_eq!(settlement.balance_of(&alice()), Amount::ether(1_000_000));
        assert!(sale.contribution_of(&alice()).is_none());

        let err = sale
            .refund(&CallContext::new(alice(), 21), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::NoBalance));
    }

    #[test]
    fn test_refund_after_partial_transfer_is_proportional() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 100), &mut settlement).unwrap();

        let quarter = Amount::ether(100 * 500 / 4);
        sale.transfer(&CallContext::new(alice(), 11), &bob(), &quarter)
            .unwrap();

        let effect = sale
            .refund(&CallContext::new(alice(), 20), &mut settlement)
            .unwrap();
        assert_eq!(
            effect,
            Effect::Refunded {
                burned: Amount::ether(100 * 500 * 3 / 4),
                returned: Amount::ether(75),
            }
        );

        // bob paid nothing but his tokens carry the rest of the escrow
        let effect = sale
            .refund(&CallContext::new(bob(), 20), &mut settlement)
            .unwrap();
        assert_eq!(
            effect,
            Effect::Refunded {
                burned: quarter,
                returned: Amount::ether(25),
            }
        );
        assert!(sale.total_tokens_issued().is_zero());
        assert!(sale.total_wei_received().is_zero());
        assert!(settlement.escrow_balance().is_zero());
    }

    #[test]
    fn test_recipient_of_all_tokens_can_refund() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 100), &mut settlement).unwrap();
        let all = sale.balance_of(&alice());
        sale.transfer(&CallContext::new(alice(), 11), &bob(), &all)
            .unwrap();

        let err = sale
            .refund(&CallContext::new(alice(), 20), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::NoBalance));

        let effect = sale
            .refund(&CallContext::new(bob(), 20), &mut settlement)
            .unwrap();
        assert_eq!(
            effect,
            Effect::Refunded {
                burned: all,
                returned: Amount::ether(100),
            }
        );
        assert!(settlement.escrow_balance().is_zero());
        assert_eq!(settlement.balance_of(&bob()), Amount::ether(1_000_100));
        assert!(sale.ledger().total_supply().is_zero());
    }

    #[test]
    fn test_refunds_across_both_rates_drain_escrow() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 100), &mut settlement).unwrap();
        sale.contribute(&pay(bob(), 15, 100), &mut settlement).unwrap();

        // 200 ether backs 50k + 40k tokens
        let first = match sale.refund(&CallContext::new(alice(), 20), &mut settlement) {
            Ok(Effect::Refunded { returned, .. }) => returned,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(first, Amount::from_u128(111_111_111_111_111_111_111));

        let second = match sale.refund(&CallContext::new(bob(), 21), &mut settlement) {
            Ok(Effect::Refunded { returned, .. }) => returned,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(first + second, Amount::ether(200));
        assert!(settlement.escrow_balance().is_zero());
        assert!(sale.total_wei_received().is_zero());
    }

    #[test]
    fn test_actions_before_last_block_are_rejected() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 1), &mut settlement).unwrap();
        sale.refund(&CallContext::new(alice(), 20), &mut settlement)
            .unwrap();
        assert_eq!(sale.sale_state().last_block(), Some(20));

        let before = sale.snapshot();
        let err = sale
            .contribute(&pay(alice(), 12, 1), &mut settlement)
            .unwrap_err();
        assert_eq!(err, SaleError::rejected(Guard::BlockInPast));
        assert_eq!(sale.snapshot(), before);
        assert!(settlement.escrow_balance().is_zero());

        // same block is still fine
        assert!(sale.pause(&CallContext::new(fund_deposit(), 20)).is_ok());
    }

    #[test]
    fn test_rejected_action_does_not_advance_block() {
        let (mut sale, mut settlement) = setup();
        assert!(sale
            .contribute(&pay(alice(), 25, 1), &mut settlement)
            .is_err());
        assert_eq!(sale.sale_state().last_block(), None);
        assert!(sale.contribute(&pay(alice(), 10, 1), &mut settlement).is_ok());
    }

    #[test]
    fn test_failed_settlement_leaves_state_untouched() {
        let (mut sale, _) = setup();
        let before = sale.snapshot();

        let err = sale
            .contribute(&pay(alice(), 10, 1), &mut RefusingSettlement)
            .unwrap_err();
        assert!(matches!(err, SaleError::Settlement(SettlementError::Refused(_))));
        assert_eq!(sale.snapshot(), before);
        assert!(sale.balance_of(&alice()).is_zero());
        assert!(sale.events().is_empty());
    }

    #[test]
    fn test_cap_rejection_is_total() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 10), &mut settlement).unwrap();
        let balance = sale.balance_of(&alice());

        let err = sale
            .contribute(&pay(alice(), 10, 100_000), &mut settlement)
            .unwrap_err();
        assert_eq!(
            err,
            SaleError::CapExceeded {
                kind: CapKind::TokenCreationCap
            }
        );
        assert_eq!(sale.balance_of(&alice()), balance);
        assert_eq!(settlement.escrow_balance(), &Amount::ether(10));
    }

    #[test]
    fn test_execute_dispatch_and_events() {
        let (mut sale, mut settlement) = setup();
        let effect = sale
            .execute(&pay(alice(), 10, 1), &Action::Contribute, &mut settlement)
            .unwrap();
        assert!(matches!(effect, Effect::Contributed { rate: 500, .. }));

        let transfer = Action::Transfer {
            to: bob(),
            amount: Amount::from_u64(1),
        };
        sale.execute(&CallContext::new(alice(), 12), &transfer, &mut settlement)
            .unwrap();

        assert!(sale
            .execute(&CallContext::new(alice(), 12), &Action::Pause, &mut settlement)
            .is_err());

        assert_eq!(sale.events().len(), 2);
        assert_eq!(sale.events().last().map(SaleEvent::block), Some(12));
    }

    #[test]
    fn test_action_json_shape() {
        let action: Action =
            serde_json::from_str(r#"{"type":"transfer","to":"0x0000000000000000000000000000000000000002","amount":"10"}"#)
                .unwrap();
        assert_eq!(
            action,
            Action::Transfer {
                to: bob(),
                amount: Amount::from_u64(10)
            }
        );
        let action: Action = serde_json::from_str(r#"{"type":"start_redeeming"}"#).unwrap();
        assert_eq!(action, Action::StartRedeeming);
    }

    #[test]
    fn test_bincode_round_trip_keeps_invariants() {
        let (mut sale, mut settlement) = setup();
        sale.contribute(&pay(alice(), 10, 3), &mut settlement).unwrap();

        let bytes = bincode::serialize(&sale).unwrap();
        let restored: TokenSale = bincode::deserialize(&bytes).unwrap();

        assert!(restored.validate_restored().is_ok());
        assert_eq!(restored.snapshot(), sale.snapshot());
        assert_eq!(restored.balance_of(&alice()), sale.balance_of(&alice()));
        assert!(restored.events().is_empty());
    }
}
