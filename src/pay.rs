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

//! Terminal payment contracts: the leaves recursive contract graphs pay
//! into.

use bitcoin::{Address, Amount, PublicKey};

use crate::clause::Clause;
use crate::compiler::CompileError;
use crate::contract::{Contract, Descriptor, FieldKind, FieldValue};
use crate::template::TemplateBuilder;

/// Contract spendable by a signature of the given key.
pub fn pay_to_pubkey(key: PublicKey, amount: Amount) -> Result<Contract, CompileError> {
    let contract = Descriptor::new("p2pk")
        .field("key", FieldKind::Key)
        .field("amount", FieldKind::Amount)
        .unlock("sign", |contract| Ok(Clause::signed(contract.key("key"))))
        .bind(bmap! {
            s!("key") => FieldValue::Key(key),
            s!("amount") => FieldValue::Amount(amount)
        })?;
    Ok(contract)
}

/// Contract whose sole spend path forwards the whole amount to a raw
/// address.
pub fn pay_to_address(address: Address, amount: Amount) -> Result<Contract, CompileError> {
    let contract = Descriptor::new("p2addr")
        .field("address", FieldKind::Address)
        .field("amount", FieldKind::Amount)
        .guarantee("forward", |contract| {
            Ok(TemplateBuilder::new()
                .add_output(contract.amount("amount"), contract.address("address")))
        })
        .bind(bmap! {
            s!("address") => FieldValue::Address(address),
            s!("amount") => FieldValue::Amount(amount)
        })?;
    Ok(contract)
}
