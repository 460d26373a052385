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

//! Unsigned transaction skeletons produced by contract continuations.
//!
//! A [`TemplateBuilder`] collects ordered outputs and time lock parameters;
//! it is append-only, since a continuation constructs its follow-up
//! transaction exactly once per compilation. Output destinations may be raw
//! addresses or further [`Contract`]s, which stay uncompiled until the
//! builder is materialized into a [`Template`] by [`crate::Compiler`] — at
//! that point contract destinations are replaced by their [`ContractId`]s
//! and land in the compiler's arena.
//!
//! Whether a template is affordable is the funding collaborator's decision,
//! not the builder's: the available value is a property of the spent UTXO,
//! unknown to the template alone. [`Template::check_funding`] exposes the
//! check; the compiler never applies it.

use bitcoin::{Address, Amount};

use crate::contract::{Contract, ContractId};
use crate::timelocks::{LockTime, SeqNo};

/// Error indicating that template outputs spend more than the value
/// available to the compiling contract.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, Error)]
#[display("template outputs spend {spent} while only {available} is available")]
pub struct AmountError {
    /// Value available to the contract instance
    pub available: Amount,
    /// Total value of the template outputs
    pub spent: Amount,
}

/// Destination of a not-yet-materialized template output.
#[derive(Clone, PartialEq, Eq, Debug, From)]
pub enum Destination {
    /// Raw address, used verbatim
    #[from]
    Address(Address),

    /// Contract compiled on demand at template materialization
    #[from]
    Contract(Contract),
}

/// Single output of a not-yet-materialized template.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Output {
    /// Output value
    pub amount: Amount,
    /// Output destination
    pub destination: Destination,
}

/// Append-only builder of a follow-up transaction skeleton.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TemplateBuilder {
    outputs: Vec<Output>,
    seq_no: SeqNo,
    lock_time: LockTime,
}

impl Default for TemplateBuilder {
    fn default() -> Self { TemplateBuilder::new() }
}

impl TemplateBuilder {
    /// Creates a template skeleton with no outputs and no time locks.
    pub fn new() -> Self {
        TemplateBuilder {
            outputs: vec![],
            seq_no: SeqNo::unencumbered(true),
            lock_time: LockTime::anytime(),
        }
    }

    /// Appends an output. Outputs can not be removed once added.
    pub fn add_output(mut self, amount: Amount, destination: impl Into<Destination>) -> Self {
        self.outputs.push(Output {
            amount,
            destination: destination.into(),
        });
        self
    }

    /// Encodes a relative time lock into the template input sequence.
    pub fn set_sequence(mut self, seq_no: SeqNo) -> Self {
        self.seq_no = seq_no;
        self
    }

    /// Sets the absolute lock time of the template.
    pub fn set_lock_time(mut self, lock_time: LockTime) -> Self {
        self.lock_time = lock_time;
        self
    }

    /// Ordered outputs added so far.
    pub fn outputs(&self) -> &[Output] { &self.outputs }

    /// Relative time lock encoded into the template.
    pub fn seq_no(&self) -> SeqNo { self.seq_no }

    /// Absolute lock time of the template.
    pub fn lock_time(&self) -> LockTime { self.lock_time }

    /// Total value of all outputs.
    pub fn total_value(&self) -> Amount {
        self.outputs
            .iter()
            .fold(Amount::ZERO, |sum, output| sum + output.amount)
    }

    /// Verifies the template against the value available to the compiling
    /// contract.
    pub fn check_funding(&self, available: Amount) -> Result<(), AmountError> {
        let spent = self.total_value();
        if spent > available {
            Err(AmountError { available, spent })
        } else {
            Ok(())
        }
    }
}

/// Materialized output payee: contract destinations are reduced to their
/// arena ids.
#[derive(Clone, PartialEq, Eq, Debug, From)]
pub enum Payee {
    /// Raw address
    #[from]
    Address(Address),

    /// Compiled contract, stored in the compiler arena
    #[from]
    Contract(ContractId),
}

/// Single output of a materialized template.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TemplateOutput {
    /// Output value
    pub amount: Amount,
    /// Output payee
    pub payee: Payee,
}

/// Materialized follow-up transaction skeleton: ordered outputs plus time
/// lock parameters, ready for a signing/broadcast collaborator.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Template {
    /// Ordered transaction outputs
    pub outputs: Vec<TemplateOutput>,
    /// Relative time lock (`nSeq`) of the spending input
    pub seq_no: SeqNo,
    /// Absolute lock time (`nLockTime`) of the transaction
    pub lock_time: LockTime,
}

impl Template {
    /// Total value of all outputs.
    pub fn total_value(&self) -> Amount {
        self.outputs
            .iter()
            .fold(Amount::ZERO, |sum, output| sum + output.amount)
    }

    /// Verifies the template against the value available to the compiling
    /// contract.
    pub fn check_funding(&self, available: Amount) -> Result<(), AmountError> {
        let spent = self.total_value();
        if spent > available {
            Err(AmountError { available, spent })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn beneficiary() -> Address {
        Address::from_str("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq").unwrap()
    }

    #[test]
    fn builder_accumulates_outputs() {
        let builder = TemplateBuilder::new()
            .add_output(Amount::from_sat(50_000), beneficiary())
            .add_output(Amount::from_sat(25_000), beneficiary())
            .set_sequence(SeqNo::from_height(144));

        assert_eq!(builder.outputs().len(), 2);
        assert_eq!(builder.total_value(), Amount::from_sat(75_000));
        assert_eq!(builder.seq_no(), SeqNo::from_height(144));
        assert_eq!(builder.lock_time(), LockTime::anytime());
    }

    #[test]
    fn funding_check() {
        let builder = TemplateBuilder::new().add_output(Amount::from_sat(75_000), beneficiary());
        assert_eq!(builder.check_funding(Amount::from_sat(75_000)), Ok(()));
        assert_eq!(
            builder.check_funding(Amount::from_sat(74_999)),
            Err(AmountError {
                available: Amount::from_sat(74_999),
                spent: Amount::from_sat(75_000),
            })
        );
    }
}
