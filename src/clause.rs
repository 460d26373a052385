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

//! Spending condition algebra.
//!
//! A [`Clause`] is a tree of primitive spend conditions (signature by a key,
//! reveal of a hash preimage, relative or absolute time lock, the trivially
//! satisfied condition) combined with `and`/`or`/`threshold` operators.
//! Clause trees normalize into a set of mutually alternative [`Path`]s, each
//! a conjunction of leaf [`Term`]s sufficient to spend; path order follows
//! combinator declaration order, so enumerating equal trees always yields
//! identical results.
//!
//! Combinator invariants are enforced at construction time: the tree can not
//! be built with an unsatisfiable threshold or a childless combinator, and
//! neither [`Clause::evaluate`] nor [`Clause::paths`] can fail.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use bitcoin::PublicKey;

use crate::hlc::{HashLock, HashPreimage};
use crate::timelocks::{LockTime, SeqNo, TimeLockInterval};

/// Errors constructing clause combinators.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ClauseError {
    /// threshold of {k} is outside the satisfiable range for {n} child
    /// clauses
    ThresholdBounds { k: usize, n: usize },

    /// combinator requires at least one child clause
    NoChildren,
}

/// Leaf spending condition: the requirement a witness must meet on a single
/// satisfying path.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Term {
    /// Signature by the given key must be present
    Signature(PublicKey),

    /// Preimage of the given hash must be revealed
    Preimage(HashLock),

    /// Chain must have reached the given absolute height or timestamp
    After(LockTime),

    /// The spent output must have aged by the given relative lock
    Older(SeqNo),
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Term::Signature(key) => write!(f, "pk({})", key),
            Term::Preimage(lock) => write!(f, "sha256({})", lock),
            Term::After(lock_time) => write!(f, "after({})", lock_time),
            Term::Older(seq_no) => write!(f, "older({})", seq_no),
        }
    }
}

/// Conjunction of leaf terms sufficient to satisfy a clause tree.
///
/// Terms keep first-occurrence order and are de-duplicated; the empty path
/// is the trivially satisfied one.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Path(Vec<Term>);

impl Path {
    /// Terms of the conjunction, in declaration order.
    pub fn terms(&self) -> &[Term] { &self.0 }

    /// Detects the trivially satisfied path.
    pub fn is_trivial(&self) -> bool { self.0.is_empty() }

    fn conjoin(&self, other: &Path) -> Path {
        let mut terms = self.0.clone();
        for term in &other.0 {
            if !terms.contains(term) {
                terms.push(term.clone());
            }
        }
        Path(terms)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("true");
        }
        for (no, term) in self.0.iter().enumerate() {
            if no > 0 {
                f.write_str(" & ")?;
            }
            Display::fmt(term, f)?;
        }
        Ok(())
    }
}

/// Candidate spending context evaluated against a clause tree.
///
/// Chain data (`height`, `timestamp`, ages) describe the moment the spend
/// would confirm; the compiler itself never consults chain state.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Witness {
    /// Keys for which a valid signature is available
    pub signatures: BTreeSet<PublicKey>,
    /// Revealed hash preimages
    pub preimages: BTreeSet<HashPreimage>,
    /// Current chain height
    pub height: u32,
    /// Current chain median timestamp
    pub timestamp: u32,
    /// Confirmations of the spent output, in blocks
    pub age_blocks: u16,
    /// Age of the spent output, in 512-second intervals
    pub age_intervals: u16,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Node {
    Leaf(Term),
    Satisfied,
    And(Vec<Clause>),
    Or(Vec<Clause>),
    Threshold(usize, Vec<Clause>),
}

/// Tree of spending conditions. See the module documentation for details.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Clause(Node);

impl Clause {
    /// Condition satisfied by a signature matching the given key.
    pub fn signed(key: PublicKey) -> Clause { Clause(Node::Leaf(Term::Signature(key))) }

    /// Condition satisfied by revealing the preimage of the given hash lock.
    pub fn reveal(lock: HashLock) -> Clause { Clause(Node::Leaf(Term::Preimage(lock))) }

    /// Condition satisfied once the chain passes an absolute height or
    /// timestamp.
    pub fn after(lock_time: LockTime) -> Clause { Clause(Node::Leaf(Term::After(lock_time))) }

    /// Condition satisfied once the spent output ages past a relative lock.
    pub fn older(seq_no: SeqNo) -> Clause { Clause(Node::Leaf(Term::Older(seq_no))) }

    /// Unconditionally satisfied condition.
    pub fn satisfied() -> Clause { Clause(Node::Satisfied) }

    /// Conjunction of child clauses. A single child collapses to itself.
    pub fn all(children: Vec<Clause>) -> Result<Clause, ClauseError> {
        match children.len() {
            0 => Err(ClauseError::NoChildren),
            1 => Ok(children.into_iter().next().expect("len checked")),
            _ => Ok(Clause(Node::And(children))),
        }
    }

    /// Disjunction of child clauses. A single child collapses to itself.
    pub fn any(children: Vec<Clause>) -> Result<Clause, ClauseError> {
        match children.len() {
            0 => Err(ClauseError::NoChildren),
            1 => Ok(children.into_iter().next().expect("len checked")),
            _ => Ok(Clause(Node::Or(children))),
        }
    }

    /// Condition requiring any `k` of the child clauses.
    ///
    /// Fails with [`ClauseError::ThresholdBounds`] unless `1 <= k <= n`;
    /// malformed thresholds can never reach evaluation or path enumeration.
    pub fn threshold(k: usize, children: Vec<Clause>) -> Result<Clause, ClauseError> {
        let n = children.len();
        if n == 0 {
            return Err(ClauseError::NoChildren);
        }
        if k == 0 || k > n {
            return Err(ClauseError::ThresholdBounds { k, n });
        }
        Ok(Clause(Node::Threshold(k, children)))
    }

    /// Evaluates the clause tree against a candidate witness.
    pub fn evaluate(&self, witness: &Witness) -> bool {
        match &self.0 {
            Node::Leaf(Term::Signature(key)) => witness.signatures.contains(key),
            Node::Leaf(Term::Preimage(lock)) => witness
                .preimages
                .iter()
                .any(|preimage| HashLock::from(*preimage) == *lock),
            Node::Leaf(Term::After(lock_time)) => {
                if lock_time.is_height_based() {
                    witness.height >= lock_time.into_consensus()
                } else {
                    witness.timestamp >= lock_time.into_consensus()
                }
            }
            Node::Leaf(Term::Older(seq_no)) => match seq_no.time_lock_interval() {
                Some(TimeLockInterval::Height(blocks)) => witness.age_blocks >= blocks,
                Some(TimeLockInterval::Time(intervals)) => witness.age_intervals >= intervals,
                // No relative lock encoded means no constraint
                None => true,
            },
            Node::Satisfied => true,
            Node::And(children) => children.iter().all(|child| child.evaluate(witness)),
            Node::Or(children) => children.iter().any(|child| child.evaluate(witness)),
            Node::Threshold(k, children) => {
                children
                    .iter()
                    .filter(|child| child.evaluate(witness))
                    .count()
                    >= *k
            }
        }
    }

    /// Enumerates the minimal set of alternative leaf conjunctions
    /// satisfying the tree.
    ///
    /// `and` produces the pairwise union of child alternatives, `or`
    /// concatenates them, and a `k`-of-`n` threshold contributes one
    /// alternative per `k`-combination of children (in declaration order).
    pub fn paths(&self) -> Vec<Path> {
        match &self.0 {
            Node::Leaf(term) => vec![Path(vec![term.clone()])],
            Node::Satisfied => vec![Path::default()],
            Node::And(children) => {
                let factors = children.iter().map(Clause::paths).collect::<Vec<_>>();
                product(&factors)
            }
            Node::Or(children) => children.iter().flat_map(Clause::paths).collect(),
            Node::Threshold(k, children) => {
                let factors = children.iter().map(Clause::paths).collect::<Vec<_>>();
                let mut paths = vec![];
                for combination in k_combinations(children.len(), *k) {
                    let selected = combination
                        .into_iter()
                        .map(|index| factors[index].clone())
                        .collect::<Vec<_>>();
                    paths.extend(product(&selected));
                }
                paths
            }
        }
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn comma_list(f: &mut Formatter<'_>, children: &[Clause]) -> fmt::Result {
            for (no, child) in children.iter().enumerate() {
                if no > 0 {
                    f.write_str(",")?;
                }
                Display::fmt(child, f)?;
            }
            f.write_str(")")
        }
        match &self.0 {
            Node::Leaf(term) => Display::fmt(term, f),
            Node::Satisfied => f.write_str("true"),
            Node::And(children) => {
                f.write_str("and(")?;
                comma_list(f, children)
            }
            Node::Or(children) => {
                f.write_str("or(")?;
                comma_list(f, children)
            }
            Node::Threshold(k, children) => {
                write!(f, "thresh({},", k)?;
                comma_list(f, children)
            }
        }
    }
}

/// Pairwise conjunction of alternative sets, preserving declaration order.
fn product(factors: &[Vec<Path>]) -> Vec<Path> {
    factors.iter().fold(vec![Path::default()], |acc, alternatives| {
        let mut paths = Vec::with_capacity(acc.len() * alternatives.len());
        for base in &acc {
            for alternative in alternatives {
                paths.push(base.conjoin(alternative));
            }
        }
        paths
    })
}

/// All `k`-element index combinations out of `n`, in lexicographic order.
fn k_combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    fn recurse(start: usize, n: usize, k: usize, stack: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if k == 0 {
            out.push(stack.clone());
            return;
        }
        for index in start..=(n - k) {
            stack.push(index);
            recurse(index + 1, n, k - 1, stack, out);
            stack.pop();
        }
    }
    debug_assert!(k >= 1 && k <= n);
    let mut out = vec![];
    recurse(0, n, k, &mut vec![], &mut out);
    out
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn key(hex: &str) -> PublicKey { PublicKey::from_str(hex).unwrap() }

    fn alice() -> PublicKey {
        key("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
    }

    fn bob() -> PublicKey {
        key("02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5")
    }

    fn carol() -> PublicKey {
        key("02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9")
    }

    #[test]
    fn threshold_bounds() {
        let children = vec![Clause::signed(alice()), Clause::signed(bob())];
        assert_eq!(
            Clause::threshold(0, children.clone()),
            Err(ClauseError::ThresholdBounds { k: 0, n: 2 })
        );
        assert_eq!(
            Clause::threshold(3, children.clone()),
            Err(ClauseError::ThresholdBounds { k: 3, n: 2 })
        );
        assert_eq!(Clause::threshold(1, vec![]), Err(ClauseError::NoChildren));
        assert!(Clause::threshold(2, children).is_ok());
    }

    #[test]
    fn combinators_require_children() {
        assert_eq!(Clause::all(vec![]), Err(ClauseError::NoChildren));
        assert_eq!(Clause::any(vec![]), Err(ClauseError::NoChildren));
        // A single child collapses to the child itself
        assert_eq!(
            Clause::all(vec![Clause::signed(alice())]).unwrap(),
            Clause::signed(alice())
        );
    }

    #[test]
    fn path_enumeration_and_or() {
        let clause = Clause::any(vec![
            Clause::all(vec![
                Clause::signed(alice()),
                Clause::older(SeqNo::from_height(144)),
            ])
            .unwrap(),
            Clause::signed(bob()),
        ])
        .unwrap();

        let paths = clause.paths();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].terms(), &[
            Term::Signature(alice()),
            Term::Older(SeqNo::from_height(144))
        ]);
        assert_eq!(paths[1].terms(), &[Term::Signature(bob())]);
    }

    #[test]
    fn path_enumeration_threshold() {
        let clause = Clause::threshold(2, vec![
            Clause::signed(alice()),
            Clause::signed(bob()),
            Clause::signed(carol()),
        ])
        .unwrap();

        let paths = clause.paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].terms(), &[
            Term::Signature(alice()),
            Term::Signature(bob())
        ]);
        assert_eq!(paths[1].terms(), &[
            Term::Signature(alice()),
            Term::Signature(carol())
        ]);
        assert_eq!(paths[2].terms(), &[
            Term::Signature(bob()),
            Term::Signature(carol())
        ]);
    }

    #[test]
    fn path_enumeration_dedup() {
        // The same key required by both branches of an `and` appears once
        let clause = Clause::all(vec![
            Clause::signed(alice()),
            Clause::any(vec![Clause::signed(alice()), Clause::signed(bob())]).unwrap(),
        ])
        .unwrap();

        let paths = clause.paths();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].terms(), &[Term::Signature(alice())]);
        assert_eq!(paths[1].terms(), &[
            Term::Signature(alice()),
            Term::Signature(bob())
        ]);
    }

    #[test]
    fn path_enumeration_deterministic() {
        let build = || {
            Clause::threshold(2, vec![
                Clause::signed(alice()),
                Clause::reveal(HashLock::from(HashPreimage::with([1; 32]))),
                Clause::older(SeqNo::from_intervals(6)),
            ])
            .unwrap()
        };
        assert_eq!(build().paths(), build().paths());
    }

    #[test]
    fn evaluation() {
        let preimage = HashPreimage::with([42; 32]);
        let clause = Clause::any(vec![
            Clause::all(vec![
                Clause::signed(alice()),
                Clause::reveal(HashLock::from(preimage)),
            ])
            .unwrap(),
            Clause::all(vec![
                Clause::signed(bob()),
                Clause::older(SeqNo::from_height(144)),
            ])
            .unwrap(),
        ])
        .unwrap();

        let mut witness = Witness::default();
        assert!(!clause.evaluate(&witness));

        witness.signatures.insert(alice());
        assert!(!clause.evaluate(&witness));
        witness.preimages.insert(preimage);
        assert!(clause.evaluate(&witness));

        let mut witness = Witness {
            signatures: [bob()].into_iter().collect(),
            age_blocks: 100,
            ..Witness::default()
        };
        assert!(!clause.evaluate(&witness));
        witness.age_blocks = 144;
        assert!(clause.evaluate(&witness));
    }

    #[test]
    fn evaluation_absolute_locks() {
        let clause = Clause::after(LockTime::from_height(650000).unwrap());
        assert!(!clause.evaluate(&Witness {
            height: 649999,
            ..Witness::default()
        }));
        assert!(clause.evaluate(&Witness {
            height: 650000,
            ..Witness::default()
        }));

        let clause = Clause::after(LockTime::from_unix_timestamp(1617656160).unwrap());
        assert!(clause.evaluate(&Witness {
            timestamp: 1617656161,
            ..Witness::default()
        }));
    }

    #[test]
    fn display() {
        let clause = Clause::any(vec![
            Clause::signed(alice()),
            Clause::all(vec![
                Clause::older(SeqNo::from_height(16)),
                Clause::satisfied(),
            ])
            .unwrap(),
        ])
        .unwrap();
        assert_eq!(
            clause.to_string(),
            format!("or(pk({}),and(older(height(16)),true))", alice())
        );
    }
}
