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

// Coding conventions
#![recursion_limit = "256"]
#![deny(dead_code, /* missing_docs, */ unused_must_use)]

//! Declarative compiler turning bound contract instances into spending
//! predicates and follow-up transaction templates.
//!
//! General workflow for working with contracts:
//! ```text
//! Descriptor -> bind -> Contract -> compile -> Compiled
//!                                                |- policy (Clause -> Paths)
//!                                                |- templates -> ContractId -> ...
//! ```
//!
//! A [`Descriptor`] declares typed fields and registers spending conditions;
//! [`Descriptor::bind`] produces an immutable [`Contract`];
//! [`Compiler::compile`] reduces it to a [`Compiled`] artifact holding the
//! spend predicate and the transaction templates its continuations must
//! produce. Signing, fee handling, broadcasting and chain validation belong
//! to downstream collaborators.
//!
//! On top of the model the crate ships two recursive contract algorithms:
//! the price-oracle bet ladder ([`bet`]) and the time-locked vault chain
//! ([`vault`]).

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod bet;
mod clause;
mod compiler;
mod contract;
mod hlc;
pub mod pay;
mod template;
pub mod timelocks;
pub mod vault;

pub use clause::{Clause, ClauseError, Path, Term, Witness};
pub use compiler::{CompileError, Compiled, Compiler, SpendPath};
pub use contract::{
    BindError, Contract, ContractFactory, ContractId, Descriptor, FieldKind, FieldValue,
};
pub use hlc::{HashLock, HashPreimage};
pub use template::{
    AmountError, Destination, Output, Payee, Template, TemplateBuilder, TemplateOutput,
};
pub use timelocks::{LockTime, SeqNo};
