//! Contract verification: the rules every signer and recipient re-checks.
//!
//! The flows only depend on the [`ContractVerifier`] trait.
//! [`CrowdFundingContract`] is the rule set shipped for campaigns and pledges.

use std::fmt;
use thiserror::Error;

use crate::states::{Campaign, Pledge};
use crate::transaction::{CommandData, LedgerTransaction};

/// A contract rule that a proposed transaction breaks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contract rule violated: {0}")]
pub struct RuleViolation(pub String);

/// Decides whether a resolved transaction is well formed.
pub trait ContractVerifier: Send + Sync {
    /// Returns `Ok(())` when every rule holds.
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), RuleViolation>;

    /// Human-friendly label for logging.
    fn name(&self) -> &'static str;
}

impl fmt::Debug for dyn ContractVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractVerifier({})", self.name())
    }
}

fn require(condition: bool, rule: &str) -> Result<(), RuleViolation> {
    if condition {
        Ok(())
    } else {
        Err(RuleViolation(rule.to_string()))
    }
}

/// Campaign and pledge rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrowdFundingContract;

impl ContractVerifier for CrowdFundingContract {
    fn verify(&self, tx: &LedgerTransaction) -> Result<(), RuleViolation> {
        if tx.command(CommandData::StartCampaign).is_some() {
            verify_start(tx)
        } else if tx.command(CommandData::AcceptPledge).is_some() {
            verify_pledge(tx)
        } else {
            Err(RuleViolation("no recognised command".into()))
        }
    }

    fn name(&self) -> &'static str {
        "crowdfunding"
    }
}

fn verify_deadline(tx: &LedgerTransaction, campaign: &Campaign) -> Result<(), RuleViolation> {
    let until = tx.time_window.and_then(|window| window.until_ms);
    require(until.is_some(), "a time window with an upper bound is required")?;
    require(
        until.is_some_and(|until| until <= campaign.deadline_ms),
        "the time window must close no later than the campaign deadline",
    )
}

fn verify_start(tx: &LedgerTransaction) -> Result<(), RuleViolation> {
    require(tx.commands.len() == 1, "campaign start carries a single command")?;
    require(tx.inputs.is_empty(), "no inputs are consumed when starting a campaign")?;
    require(tx.outputs.len() == 1, "exactly one output is produced")?;
    let campaign = match tx.outputs_of_type::<Campaign>().as_slice() {
        [campaign] => *campaign,
        _ => return Err(RuleViolation("the output must be a campaign".into())),
    };
    require(!campaign.name.trim().is_empty(), "the campaign must be named")?;
    require(campaign.target.is_positive(), "the target must be positive")?;
    require(
        !campaign.raised_so_far.is_positive()
            && campaign.raised_so_far.currency == campaign.target.currency,
        "a new campaign has raised nothing in its target currency",
    )?;
    let signers = tx
        .command(CommandData::StartCampaign)
        .map(|command| command.signers.as_slice())
        .unwrap_or_default();
    require(
        signers == [campaign.manager.owning_key],
        "only the manager signs a campaign start",
    )?;
    verify_deadline(tx, campaign)
}

fn verify_pledge(tx: &LedgerTransaction) -> Result<(), RuleViolation> {
    let input = match tx.inputs_of_type::<Campaign>().as_slice() {
        [campaign] if tx.inputs.len() == 1 => *campaign,
        _ => return Err(RuleViolation("exactly one campaign input is consumed".into())),
    };
    let output = match tx.outputs_of_type::<Campaign>().as_slice() {
        [campaign] => *campaign,
        _ => return Err(RuleViolation("exactly one campaign output is produced".into())),
    };
    let pledge = match tx.outputs_of_type::<Pledge>().as_slice() {
        [pledge] => *pledge,
        _ => return Err(RuleViolation("exactly one pledge output is produced".into())),
    };
    require(tx.outputs.len() == 2, "a pledge produces a campaign and a pledge only")?;
    require(
        tx.command(CommandData::CreatePledge).is_some(),
        "a pledge transaction carries a create-pledge command",
    )?;

    require(output.linear_id == input.linear_id, "the campaign id is unchanged")?;
    require(
        output.name == input.name
            && output.target == input.target
            && output.manager == input.manager
            && output.deadline_ms == input.deadline_ms,
        "only the raised total of a campaign may change",
    )?;

    require(
        pledge.campaign_reference == input.linear_id,
        "the pledge references the consumed campaign",
    )?;
    require(pledge.amount.is_positive(), "the pledge amount must be positive")?;
    require(
        pledge.amount.currency == input.target.currency,
        "the pledge is in the campaign's currency",
    )?;
    let expected = input
        .raised_so_far
        .checked_add(&pledge.amount)
        .map_err(|err| RuleViolation(err.to_string()))?;
    require(
        output.raised_so_far == expected,
        "the raised total grows by exactly the pledged amount",
    )?;

    let required = [input.manager.owning_key, pledge.pledger.owning_key];
    for command in &tx.commands {
        require(
            required.iter().all(|key| command.signers.contains(key)),
            "the manager and the pledger sign every pledge command",
        )?;
    }
    verify_deadline(tx, input)
}
