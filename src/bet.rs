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

//! Price-oracle bet ladder: a balanced binary decision tree routing funds to
//! one of many priced outcomes via successive preimage reveals.
//!
//! Each [`binary_bet`] node commits to two oracle hashes: the oracle reveals
//! the preimage of `h_hi` when the observed price exceeds the node
//! threshold, of `h_lo` otherwise. One reveal per tree level narrows the
//! outcome, so [`generate`] resolves `n` priced outcomes in `⌈log2 n⌉`
//! reveals.

use std::fmt::{self, Display, Formatter};

use bitcoin::{Amount, PublicKey};

use crate::clause::Clause;
use crate::compiler::CompileError;
use crate::contract::{Contract, Descriptor, FieldKind, FieldValue};
use crate::hlc::HashLock;
use crate::template::TemplateBuilder;

/// Destination of a resolved bet branch.
///
/// The closed set of supported outcome kinds; anything else fails with
/// [`CompileError::UnsupportedOutcome`] when converted from a generic field
/// value, rather than silently dropping the branch clause.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// Branch value becomes spendable by the key holder
    Key(PublicKey),

    /// Branch value is paid into the contract
    Contract(Contract),
}

impl From<Outcome> for FieldValue {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Key(key) => FieldValue::Key(key),
            Outcome::Contract(contract) => FieldValue::Contract(contract),
        }
    }
}

impl TryFrom<FieldValue> for Outcome {
    type Error = CompileError;

    fn try_from(value: FieldValue) -> Result<Self, Self::Error> {
        match value {
            FieldValue::Key(key) => Ok(Outcome::Key(key)),
            FieldValue::Contract(contract) => Ok(Outcome::Contract(contract)),
            other => Err(CompileError::UnsupportedOutcome(other.kind())),
        }
    }
}

/// Single decision node of a bet ladder.
///
/// Revealing the preimage of `h_hi` routes to the high outcome, of `h_lo`
/// to the low one; the two commitments must differ, otherwise one reveal
/// would open both branches at once.
pub fn binary_bet(
    price: u64,
    h_hi: HashLock,
    h_lo: HashLock,
    amount: Amount,
    hi_outcome: Outcome,
    lo_outcome: Outcome,
) -> Result<Contract, CompileError> {
    if h_hi == h_lo {
        return Err(CompileError::CommitmentReuse(h_hi));
    }

    let mut descriptor = Descriptor::new("binary_bet")
        .field("price", FieldKind::Count)
        .field("h_hi", FieldKind::Hash)
        .field("h_lo", FieldKind::Hash)
        .field("amount", FieldKind::Amount);

    descriptor = register_branch(descriptor, "hi_outcome", "h_hi", "pay_hi", &hi_outcome);
    descriptor = register_branch(descriptor, "lo_outcome", "h_lo", "pay_lo", &lo_outcome);

    let contract = descriptor.bind(bmap! {
        s!("price") => FieldValue::Count(price),
        s!("h_hi") => FieldValue::Hash(h_hi),
        s!("h_lo") => FieldValue::Hash(h_lo),
        s!("amount") => FieldValue::Amount(amount),
        s!("hi_outcome") => hi_outcome.into(),
        s!("lo_outcome") => lo_outcome.into()
    })?;
    Ok(contract)
}

fn register_branch(
    descriptor: Descriptor,
    field: &'static str,
    commitment: &'static str,
    condition: &'static str,
    outcome: &Outcome,
) -> Descriptor {
    match outcome {
        Outcome::Key(_) => descriptor.field(field, FieldKind::Key).unlock(
            condition,
            move |contract| {
                Ok(Clause::all(vec![
                    Clause::reveal(contract.hash(commitment)),
                    Clause::signed(contract.key(field)),
                ])?)
            },
        ),
        Outcome::Contract(_) => descriptor.field(field, FieldKind::Contract).guarantee_under(
            condition,
            move |contract| Ok(Clause::reveal(contract.hash(commitment))),
            move |contract| {
                Ok(TemplateBuilder::new()
                    .add_output(contract.amount("amount"), contract.contract(field)))
            },
        ),
    }
}

/// Single row of the bet table consumed by [`generate`]: a priced outcome
/// with the oracle commitments attached to its price level.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BetEntry {
    /// Price threshold of the entry
    pub price: u64,
    /// Commitment revealed when the observed price is above the threshold
    pub reveal_hi: HashLock,
    /// Commitment revealed when the observed price is at or below the
    /// threshold
    pub reveal_lo: HashLock,
    /// Outcome contract of the entry
    pub outcome: Contract,
}

impl Display for BetEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.price, self.outcome)
    }
}

/// Generates a balanced bet ladder resolving the given priced outcomes.
///
/// Entries are processed in canonical order: descending by price, with
/// equal prices ordered by their high commitment. Ordering happens on an
/// internal copy, never mutating the caller's slice, so any permutation of
/// the same table generates the identical tree. Splitting happens at the
/// midpoint, with the node threshold and commitments taken from the last
/// element of the high half, yielding a tree of depth `⌈log2 n⌉` with one
/// reachable leaf per entry.
pub fn generate(entries: &[BetEntry], amount: Amount) -> Result<Contract, CompileError> {
    if entries.is_empty() {
        return Err(CompileError::EmptyBetTable);
    }
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        b.price
            .cmp(&a.price)
            .then_with(|| a.reveal_hi.cmp(&b.reveal_hi))
    });
    bisect(&sorted, amount)
}

fn bisect(entries: &[BetEntry], amount: Amount) -> Result<Contract, CompileError> {
    if entries.len() == 1 {
        return Ok(entries[0].outcome.clone());
    }
    let middle = entries.len() / 2;
    let pivot = &entries[middle - 1];
    let hi_outcome = bisect(&entries[..middle], amount)?;
    let lo_outcome = bisect(&entries[middle..], amount)?;
    binary_bet(
        pivot.price,
        pivot.reveal_hi,
        pivot.reveal_lo,
        amount,
        Outcome::Contract(hi_outcome),
        Outcome::Contract(lo_outcome),
    )
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::clause::Witness;
    use crate::compiler::Compiler;
    use crate::hlc::HashPreimage;
    use crate::pay::pay_to_pubkey;
    use crate::template::Payee;

    fn key(hex: &str) -> PublicKey { PublicKey::from_str(hex).unwrap() }

    fn keys() -> Vec<PublicKey> {
        vec![
            key("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"),
            key("02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5"),
            key("02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9"),
            key("02e493dbf1c10d80f3581e4904930b1404cc6c13900ee0758474fa94abe8c4cd13"),
        ]
    }

    fn preimage(no: u8, side: u8) -> HashPreimage {
        let mut secret = [0u8; 32];
        secret[0] = no;
        secret[1] = side;
        HashPreimage::with(secret)
    }

    fn entries(prices: &[u64]) -> Vec<BetEntry> {
        let amount = Amount::from_sat(1_000_000);
        prices
            .iter()
            .zip(keys().into_iter().cycle())
            .enumerate()
            .map(|(no, (price, key))| BetEntry {
                price: *price,
                reveal_hi: HashLock::from(preimage(no as u8, 1)),
                reveal_lo: HashLock::from(preimage(no as u8, 0)),
                outcome: pay_to_pubkey(key, amount).unwrap(),
            })
            .collect()
    }

    fn depth(contract: &Contract) -> u32 {
        if contract.name() != "binary_bet" {
            return 0;
        }
        1 + depth(&contract.contract("hi_outcome")).max(depth(&contract.contract("lo_outcome")))
    }

    fn leaves(contract: &Contract) -> u32 {
        if contract.name() != "binary_bet" {
            return 1;
        }
        leaves(&contract.contract("hi_outcome")) + leaves(&contract.contract("lo_outcome"))
    }

    #[test]
    fn empty_table_fails() {
        assert_eq!(
            generate(&[], Amount::from_sat(1)).unwrap_err(),
            CompileError::EmptyBetTable
        );
    }

    #[test]
    fn commitment_reuse_fails() {
        let lock = HashLock::from(preimage(0, 0));
        let outcome = pay_to_pubkey(keys()[0], Amount::from_sat(1)).unwrap();
        assert_eq!(
            binary_bet(
                100,
                lock,
                lock,
                Amount::from_sat(1),
                Outcome::Contract(outcome.clone()),
                Outcome::Contract(outcome),
            )
            .unwrap_err(),
            CompileError::CommitmentReuse(lock)
        );
    }

    #[test]
    fn unsupported_outcome_kind_fails() {
        assert_eq!(
            Outcome::try_from(FieldValue::Count(7)).unwrap_err(),
            CompileError::UnsupportedOutcome(FieldKind::Count)
        );
        assert!(Outcome::try_from(FieldValue::Key(keys()[0])).is_ok());
    }

    #[test]
    fn single_entry_returns_outcome() {
        let table = entries(&[100]);
        let contract = generate(&table, Amount::from_sat(1_000_000)).unwrap();
        assert_eq!(contract, table[0].outcome);
    }

    #[test]
    fn four_entry_scenario() {
        // Entries [(100, h1, C1), (80, h2, C2), (50, h3, C3), (20, h4, C4)],
        // already descending: split at index 2, root threshold price 80,
        // each half a 2-leaf bisection node.
        let table = entries(&[100, 80, 50, 20]);
        let root = generate(&table, Amount::from_sat(1_000_000)).unwrap();

        assert_eq!(root.name(), "binary_bet");
        assert_eq!(root.count("price"), 80);
        assert_eq!(root.hash("h_hi"), table[1].reveal_hi);
        assert_eq!(root.hash("h_lo"), table[1].reveal_lo);

        let hi = root.contract("hi_outcome");
        let lo = root.contract("lo_outcome");
        assert_eq!(hi.name(), "binary_bet");
        assert_eq!(hi.count("price"), 100);
        assert_eq!(lo.name(), "binary_bet");
        assert_eq!(lo.count("price"), 50);
        assert_eq!(hi.contract("hi_outcome"), table[0].outcome);
        assert_eq!(hi.contract("lo_outcome"), table[1].outcome);
        assert_eq!(lo.contract("hi_outcome"), table[2].outcome);
        assert_eq!(lo.contract("lo_outcome"), table[3].outcome);
    }

    #[test]
    fn compiled_root_is_preimage_gated() {
        let table = entries(&[100, 80, 50, 20]);
        let root = generate(&table, Amount::from_sat(1_000_000)).unwrap();
        let compiler = Compiler::new();
        let compiled = compiler.compile(&root).unwrap();

        // Two continuation paths, each gated by exactly one reveal
        assert_eq!(compiled.paths.len(), 2);
        for path in &compiled.paths {
            assert_eq!(path.terms.terms().len(), 1);
            assert!(path.template.is_some());
        }

        // Revealing the high commitment satisfies the root and routes the
        // full amount into the high sub-node
        let witness = Witness {
            preimages: [preimage(1, 1)].into_iter().collect(),
            ..Witness::default()
        };
        assert!(compiled.policy.evaluate(&witness));
        let template = compiled.template_for("pay_hi").unwrap();
        assert_eq!(template.total_value(), Amount::from_sat(1_000_000));
        let hi_id = root.contract("hi_outcome").id();
        assert_eq!(template.outputs[0].payee, Payee::Contract(hi_id));

        // The high sub-node is itself a 2-leaf preimage-gated bet
        let sub = compiler.find(hi_id).unwrap();
        assert_eq!(sub.paths.len(), 2);
    }

    #[test]
    fn tree_depth_is_logarithmic() {
        for (n, expected) in [(1u64, 0), (2, 1), (3, 2), (4, 2), (5, 3), (8, 3), (9, 4)] {
            let prices = (1..=n).rev().map(|price| price * 10).collect::<Vec<_>>();
            let contract = generate(&entries(&prices), Amount::from_sat(1_000)).unwrap();
            assert_eq!(depth(&contract), expected, "depth mismatch for n={}", n);
            assert_eq!(leaves(&contract), n as u32, "leaf mismatch for n={}", n);
        }
    }

    #[test]
    fn permutation_invariance() {
        let sorted = entries(&[100, 80, 50, 20]);
        let mut shuffled = sorted.clone();
        shuffled.swap(0, 3);
        shuffled.swap(1, 2);

        let reference = generate(&sorted, Amount::from_sat(1_000_000)).unwrap();
        let permuted = generate(&shuffled, Amount::from_sat(1_000_000)).unwrap();
        assert_eq!(reference.id(), permuted.id());

        // The caller's table is left untouched
        assert_eq!(shuffled[0].price, 20);
        assert_eq!(shuffled[3].price, 100);
    }

    #[test]
    fn tied_prices_generate_one_tree() {
        // Two entries share the price threshold; their order in the input
        // must not leak into the tree shape
        let table = entries(&[100, 50, 50, 20]);
        let mut swapped = table.clone();
        swapped.swap(1, 2);

        let reference = generate(&table, Amount::from_sat(1_000_000)).unwrap();
        let permuted = generate(&swapped, Amount::from_sat(1_000_000)).unwrap();
        assert_eq!(reference.id(), permuted.id());
        assert_eq!(leaves(&reference), 4);
    }

    #[test]
    fn key_outcomes_require_signature_after_reveal() {
        let [hi_key, lo_key] = [keys()[0], keys()[1]];
        let h_hi = HashLock::from(preimage(0, 1));
        let h_lo = HashLock::from(preimage(0, 0));
        let contract = binary_bet(
            50,
            h_hi,
            h_lo,
            Amount::from_sat(500),
            Outcome::Key(hi_key),
            Outcome::Key(lo_key),
        )
        .unwrap();
        let compiled = Compiler::new().compile(&contract).unwrap();

        assert!(compiled.templates.is_empty());
        let mut witness = Witness {
            preimages: [preimage(0, 1)].into_iter().collect(),
            ..Witness::default()
        };
        assert!(!compiled.policy.evaluate(&witness));
        witness.signatures.insert(hi_key);
        assert!(compiled.policy.evaluate(&witness));
    }
}
