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

//! Compilation of bound contract instances into spending predicates and
//! follow-up transaction templates.
//!
//! Compilation is synchronous, single-threaded and pure: a [`Compiled`]
//! artifact is a function of the bound field values alone, which allows the
//! [`Compiler`] to memoize artifacts in an arena keyed by [`ContractId`].
//! Recursive contract graphs (bet ladders, vault chains) re-use arena
//! entries whenever structurally identical sub-contracts recur.
//!
//! All errors in this crate surface at construction or compile time; none
//! are retryable. Whatever would fail at broadcast time must have already
//! failed here.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bitcoin::Amount;

use crate::clause::{Clause, ClauseError, Path};
use crate::contract::{BindError, Contract, ContractId, FieldKind};
use crate::hlc::HashLock;
use crate::template::{AmountError, Destination, Payee, Template, TemplateBuilder, TemplateOutput};

/// Compile-time error taxonomy.
///
/// Every variant indicates a programming or data error in contract
/// construction; retrying the same compilation can not succeed.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum CompileError {
    /// Malformed clause combinator parameters.
    #[from]
    #[display(inner)]
    Clause(ClauseError),

    /// Invalid field binding.
    #[from]
    #[display(inner)]
    Binding(BindError),

    /// Template outputs inconsistent with the available value.
    #[from]
    #[display(inner)]
    Funding(AmountError),

    /// contract "{0}" does not register any spending condition
    NoConditions(String),

    /// bet ladder generation requires at least one priced outcome
    EmptyBetTable,

    /// bet node high and low commitments must differ, but both are {0}
    CommitmentReuse(HashLock),

    /// bet outcome must be a public key or a contract; a {0} value is not
    /// supported
    UnsupportedOutcome(FieldKind),

    /// vault chain requires at least one withdrawal step
    NoVaultSteps,

    /// vault value of {steps} steps of {amount_step} each overflows the
    /// representable amount
    VaultAmountOverflow {
        /// Number of withdrawal steps
        steps: u64,
        /// Value released per step
        amount_step: Amount,
    },
}

/// Single alternative way of satisfying a compiled contract.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SpendPath {
    /// Name of the registration (unlock or guarantee) the path derives from
    pub condition: String,
    /// Leaf requirements of the path
    pub terms: Path,
    /// Index into [`Compiled::templates`] for continuation paths
    pub template: Option<usize>,
}

/// Compilation artifact of a bound contract instance: the spend predicate
/// plus materialized continuation templates.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Compiled {
    /// Contract shape name
    pub name: String,
    /// Identity of the compiled instance
    pub id: ContractId,
    /// All registered clauses merged under an implicit `or`
    pub policy: Clause,
    /// Alternative satisfying paths, in registration order
    pub paths: Vec<SpendPath>,
    /// Follow-up transaction templates required by continuation paths
    pub templates: Vec<Template>,
}

impl Compiled {
    /// Looks up the template a named guarantee materialized into.
    pub fn template_for(&self, condition: &str) -> Option<&Template> {
        self.paths
            .iter()
            .find(|path| path.condition == condition)
            .and_then(|path| path.template)
            .map(|index| &self.templates[index])
    }
}

/// Contract compiler holding the arena of memoized compilation artifacts.
#[derive(Debug, Default)]
pub struct Compiler {
    arena: RefCell<BTreeMap<ContractId, Rc<Compiled>>>,
}

impl Compiler {
    /// Creates a compiler with an empty arena.
    pub fn new() -> Self { Compiler::default() }

    /// Compiles a bound contract instance, reusing the arena entry when the
    /// same binding was compiled before.
    ///
    /// Contract destinations inside continuation templates are compiled
    /// recursively through the same arena and referenced by id.
    pub fn compile(&self, contract: &Contract) -> Result<Rc<Compiled>, CompileError> {
        if let Some(compiled) = self.arena.borrow().get(&contract.id()) {
            return Ok(compiled.clone());
        }

        let mut clauses = vec![];
        let mut paths = vec![];
        let mut templates = vec![];

        for (name, clause_fn) in contract.unlocks() {
            let clause = clause_fn(contract)?;
            for terms in clause.paths() {
                paths.push(SpendPath {
                    condition: name.clone(),
                    terms,
                    template: None,
                });
            }
            clauses.push(clause);
        }

        for guarantee in contract.guarantees() {
            let clause = match &guarantee.clause {
                Some(clause_fn) => clause_fn(contract)?,
                None => Clause::satisfied(),
            };
            let template = self.materialize((guarantee.template)(contract)?)?;
            let index = templates.len();
            templates.push(template);
            for terms in clause.paths() {
                paths.push(SpendPath {
                    condition: guarantee.name.clone(),
                    terms,
                    template: Some(index),
                });
            }
            clauses.push(clause);
        }

        if clauses.is_empty() {
            return Err(CompileError::NoConditions(contract.name().to_owned()));
        }
        let policy = Clause::any(clauses)?;

        let compiled = Rc::new(Compiled {
            name: contract.name().to_owned(),
            id: contract.id(),
            policy,
            paths,
            templates,
        });
        self.arena
            .borrow_mut()
            .insert(contract.id(), compiled.clone());
        Ok(compiled)
    }

    /// Retrieves a previously compiled artifact from the arena.
    pub fn find(&self, id: ContractId) -> Option<Rc<Compiled>> {
        self.arena.borrow().get(&id).cloned()
    }

    /// Number of distinct contract instances compiled so far.
    pub fn compiled_count(&self) -> usize { self.arena.borrow().len() }

    fn materialize(&self, builder: TemplateBuilder) -> Result<Template, CompileError> {
        let mut outputs = Vec::with_capacity(builder.outputs().len());
        for output in builder.outputs() {
            let payee = match &output.destination {
                Destination::Address(address) => Payee::Address(address.clone()),
                Destination::Contract(contract) => Payee::Contract(self.compile(contract)?.id),
            };
            outputs.push(TemplateOutput {
                amount: output.amount,
                payee,
            });
        }
        Ok(Template {
            outputs,
            seq_no: builder.seq_no(),
            lock_time: builder.lock_time(),
        })
    }
}
