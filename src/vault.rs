// Wallet-level libraries for bitcoin protocol by LNP/BP Association
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// This software is distributed without any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

//! Sequential time-locked vault chain: cold storage drains towards hot
//! storage one delayed step at a time, with the whole remaining value
//! recallable to cold storage at every point.
//!
//! Every [`vault`] instance registers two continuations:
//!
//! - `step` releases one `amount_step` after `timeout` into a
//!   [`recallable_send`] airlock (which reaches hot storage only after an
//!   additional `mature` delay, and can be recalled to cold storage until
//!   then), carrying the rest of the value into a sub-vault with one step
//!   less;
//! - `to_cold` redirects the entire remaining `n_steps * amount_step` into
//!   a freshly parameterized cold-storage contract at once.
//!
//! Sub-vaults compile the same descriptor, so both continuations are
//! reachable at every depth of the chain.

use bitcoin::Amount;

use crate::compiler::CompileError;
use crate::contract::{Contract, ContractFactory, Descriptor, FieldKind, FieldValue};
use crate::template::TemplateBuilder;
use crate::timelocks::SeqNo;

/// Airlock contract releasing its value to `to` only after `delay`, while
/// allowing immediate recall to `recall` before the delay matures.
pub fn recallable_send(
    to: Contract,
    recall: Contract,
    delay: SeqNo,
    amount: Amount,
) -> Result<Contract, CompileError> {
    let contract = Descriptor::new("recallable_send")
        .field("to", FieldKind::Contract)
        .field("recall", FieldKind::Contract)
        .field("delay", FieldKind::Sequence)
        .field("amount", FieldKind::Amount)
        .guarantee("complete", |contract| {
            Ok(TemplateBuilder::new()
                .set_sequence(contract.sequence("delay"))
                .add_output(contract.amount("amount"), contract.contract("to")))
        })
        .guarantee("undo", |contract| {
            Ok(TemplateBuilder::new()
                .add_output(contract.amount("amount"), contract.contract("recall")))
        })
        .bind(bmap! {
            s!("to") => FieldValue::Contract(to),
            s!("recall") => FieldValue::Contract(recall),
            s!("delay") => FieldValue::Sequence(delay),
            s!("amount") => FieldValue::Amount(amount)
        })?;
    Ok(contract)
}

/// Parameters of a vault chain instance.
#[derive(Clone, Debug)]
pub struct VaultParams {
    /// Factory of cold-storage contracts, parameterized by the amount they
    /// must hold
    pub cold_storage: ContractFactory,
    /// Hot storage contract receiving matured steps
    pub hot_storage: Contract,
    /// Remaining withdrawal steps
    pub n_steps: u64,
    /// Value released per step
    pub amount_step: Amount,
    /// Relative delay before each step release
    pub timeout: SeqNo,
    /// Additional relative delay before a released step reaches hot storage
    pub mature: SeqNo,
}

/// Binds a vault chain contract over the given parameters.
///
/// A vault with zero remaining steps has nothing left to release and can
/// not be constructed.
pub fn vault(params: VaultParams) -> Result<Contract, CompileError> {
    if params.n_steps == 0 {
        return Err(CompileError::NoVaultSteps);
    }
    let VaultParams {
        cold_storage,
        hot_storage,
        n_steps,
        amount_step,
        timeout,
        mature,
    } = params;

    let contract = Descriptor::new("vault")
        .field("cold_storage", FieldKind::Factory)
        .field("hot_storage", FieldKind::Contract)
        .field("n_steps", FieldKind::Count)
        .field("amount_step", FieldKind::Amount)
        .field("timeout", FieldKind::Sequence)
        .field("mature", FieldKind::Sequence)
        .guarantee("step", |contract| {
            let amount_step = contract.amount("amount_step");
            let n_steps = contract.count("n_steps");
            let airlock = recallable_send(
                contract.contract("hot_storage"),
                contract.factory("cold_storage").build(amount_step)?,
                contract.sequence("mature"),
                amount_step,
            )?;
            let mut builder = TemplateBuilder::new()
                .set_sequence(contract.sequence("timeout"))
                .add_output(amount_step, airlock);
            if n_steps > 1 {
                let rest = amount_step.checked_mul(n_steps - 1).ok_or(
                    CompileError::VaultAmountOverflow {
                        steps: n_steps,
                        amount_step,
                    },
                )?;
                let sub_vault = vault(VaultParams {
                    cold_storage: contract.factory("cold_storage"),
                    hot_storage: contract.contract("hot_storage"),
                    n_steps: n_steps - 1,
                    amount_step,
                    timeout: contract.sequence("timeout"),
                    mature: contract.sequence("mature"),
                })?;
                builder = builder.add_output(rest, sub_vault);
            }
            Ok(builder)
        })
        .guarantee("to_cold", |contract| {
            let amount_step = contract.amount("amount_step");
            let n_steps = contract.count("n_steps");
            let remaining =
                amount_step
                    .checked_mul(n_steps)
                    .ok_or(CompileError::VaultAmountOverflow {
                        steps: n_steps,
                        amount_step,
                    })?;
            Ok(TemplateBuilder::new()
                .add_output(remaining, contract.factory("cold_storage").build(remaining)?))
        })
        .bind(bmap! {
            s!("cold_storage") => FieldValue::Factory(cold_storage),
            s!("hot_storage") => FieldValue::Contract(hot_storage),
            s!("n_steps") => FieldValue::Count(n_steps),
            s!("amount_step") => FieldValue::Amount(amount_step),
            s!("timeout") => FieldValue::Sequence(timeout),
            s!("mature") => FieldValue::Sequence(mature)
        })?;
    Ok(contract)
}
