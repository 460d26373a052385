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

//! Contract model: typed field declarations, binding and immutable bound
//! instances.
//!
//! A [`Descriptor`] declares the shape of a contract — its typed fields and
//! the registered spending conditions, both plain unlocks and
//! template-producing guarantees. [`Descriptor::bind`] validates a concrete
//! field map against the declaration and produces an immutable [`Contract`]
//! identified by a [`ContractId`], the sha256 commitment to its bound field
//! values. Compilation of bound instances lives in [`crate::Compiler`].

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash as StdHash, Hasher};
use std::rc::Rc;

use amplify::hex::{Error, FromHex};
use amplify::{Slice32, Wrapper};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Address, Amount, PublicKey};
#[cfg(feature = "serde")]
use serde_with::{As, DisplayFromStr};

use crate::clause::Clause;
use crate::compiler::CompileError;
use crate::hlc::HashLock;
use crate::template::TemplateBuilder;
use crate::timelocks::{LockTime, SeqNo};

/// Unique identifier of a bound contract instance: sha256 commitment to the
/// descriptor name and the canonically encoded field values.
///
/// Equal bindings always produce equal ids, which makes the id usable as a
/// memoization key for compilation artifacts.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[derive(
    Wrapper, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, From
)]
#[derive(StrictEncode, StrictDecode)]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct ContractId(
    #[cfg_attr(feature = "serde", serde(with = "As::<DisplayFromStr>"))] Slice32,
);

impl FromHex for ContractId {
    fn from_byte_iter<I>(iter: I) -> Result<Self, Error>
    where
        I: Iterator<Item = Result<u8, Error>> + ExactSizeIterator + DoubleEndedIterator,
    {
        Ok(Self(Slice32::from_byte_iter(iter)?))
    }
}

impl AsRef<[u8]> for ContractId {
    fn as_ref(&self) -> &[u8] { &self.0[..] }
}

/// Kind of a declared contract field.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum FieldKind {
    /// Monetary amount
    #[display("amount")]
    Amount,

    /// Public key
    #[display("key")]
    Key,

    /// Hash lock commitment
    #[display("hash")]
    Hash,

    /// Raw bitcoin address
    #[display("address")]
    Address,

    /// Nested contract instance
    #[display("contract")]
    Contract,

    /// Relative time lock (`nSeq` encoding)
    #[display("sequence")]
    Sequence,

    /// Absolute time lock (`nLockTime` encoding)
    #[display("locktime")]
    LockTime,

    /// Plain non-negative counter
    #[display("count")]
    Count,

    /// Amount-parameterized contract factory
    #[display("factory")]
    Factory,
}

/// Amount-parameterized contract constructor used as a field value.
///
/// Closures have no canonical encoding, so every factory carries a
/// caller-supplied `tag` identifying the construction; the tag is what the
/// containing contract commits to in its [`ContractId`]. Two factories with
/// the same tag are treated as the same construction.
#[derive(Clone)]
pub struct ContractFactory {
    tag: String,
    make: Rc<dyn Fn(Amount) -> Result<Contract, CompileError>>,
}

impl ContractFactory {
    /// Wraps a construction function under the given identity tag.
    pub fn new(
        tag: impl ToString,
        make: impl Fn(Amount) -> Result<Contract, CompileError> + 'static,
    ) -> Self {
        ContractFactory {
            tag: tag.to_string(),
            make: Rc::new(make),
        }
    }

    /// Identity tag of the construction.
    pub fn tag(&self) -> &str { &self.tag }

    /// Instantiates a contract sized for the given amount.
    pub fn build(&self, amount: Amount) -> Result<Contract, CompileError> { (self.make)(amount) }
}

impl Debug for ContractFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ContractFactory({})", self.tag)
    }
}

/// Value bound to a declared contract field.
#[derive(Clone, Debug)]
pub enum FieldValue {
    /// Monetary amount
    Amount(Amount),
    /// Public key
    Key(PublicKey),
    /// Hash lock commitment
    Hash(HashLock),
    /// Raw bitcoin address
    Address(Address),
    /// Nested contract instance
    Contract(Contract),
    /// Relative time lock
    Sequence(SeqNo),
    /// Absolute time lock
    LockTime(LockTime),
    /// Plain non-negative counter
    Count(u64),
    /// Amount-parameterized contract factory
    Factory(ContractFactory),
}

impl FieldValue {
    /// Kind of the value, matched against the field declaration at bind
    /// time.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Amount(_) => FieldKind::Amount,
            FieldValue::Key(_) => FieldKind::Key,
            FieldValue::Hash(_) => FieldKind::Hash,
            FieldValue::Address(_) => FieldKind::Address,
            FieldValue::Contract(_) => FieldKind::Contract,
            FieldValue::Sequence(_) => FieldKind::Sequence,
            FieldValue::LockTime(_) => FieldKind::LockTime,
            FieldValue::Count(_) => FieldKind::Count,
            FieldValue::Factory(_) => FieldKind::Factory,
        }
    }

    fn commit(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind() as u8);
        match self {
            FieldValue::Amount(amount) => buf.extend_from_slice(&amount.to_sat().to_le_bytes()),
            FieldValue::Key(key) => buf.extend_from_slice(&key.to_bytes()),
            FieldValue::Hash(lock) => buf.extend_from_slice(lock.as_ref()),
            FieldValue::Address(address) => {
                let s = address.to_string();
                buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            FieldValue::Contract(contract) => buf.extend_from_slice(contract.id().as_ref()),
            FieldValue::Sequence(seq_no) => {
                buf.extend_from_slice(&seq_no.into_consensus().to_le_bytes())
            }
            FieldValue::LockTime(lock_time) => {
                buf.extend_from_slice(&lock_time.into_consensus().to_le_bytes())
            }
            FieldValue::Count(count) => buf.extend_from_slice(&count.to_le_bytes()),
            FieldValue::Factory(factory) => {
                let tag = factory.tag().as_bytes();
                buf.extend_from_slice(&(tag.len() as u16).to_le_bytes());
                buf.extend_from_slice(tag);
            }
        }
    }
}

/// Errors validating a field map against a contract declaration.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum BindError {
    /// contract "{0}" requires field "{1}" which is not provided
    MissingField(String, String),

    /// field "{field}" of contract "{contract}" must hold a {expected}
    /// value, but a {provided} value is provided
    FieldType {
        contract: String,
        field: String,
        expected: FieldKind,
        provided: FieldKind,
    },

    /// contract "{0}" does not declare field "{1}"
    UnknownField(String, String),
}

pub(crate) type ClauseFn = Rc<dyn Fn(&Contract) -> Result<Clause, CompileError>>;
pub(crate) type TemplateFn = Rc<dyn Fn(&Contract) -> Result<TemplateBuilder, CompileError>>;

pub(crate) struct Guarantee {
    pub name: String,
    pub clause: Option<ClauseFn>,
    pub template: TemplateFn,
}

/// Declaration of a contract shape: named typed fields plus registered
/// spending conditions.
///
/// The descriptor name doubles as the identity of the registration set:
/// contracts sharing a name must share registrations, otherwise the
/// [`ContractId`]-keyed compilation cache would conflate them.
pub struct Descriptor {
    name: String,
    fields: BTreeMap<String, FieldKind>,
    unlocks: Vec<(String, ClauseFn)>,
    guarantees: Vec<Guarantee>,
}

impl Debug for Descriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl Descriptor {
    /// Starts a new contract declaration under the given name.
    pub fn new(name: impl ToString) -> Self {
        Descriptor {
            name: name.to_string(),
            fields: bmap! {},
            unlocks: vec![],
            guarantees: vec![],
        }
    }

    /// Declares a typed field.
    pub fn field(mut self, name: impl ToString, kind: FieldKind) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    /// Registers a leaf spending condition with no follow-up transaction.
    ///
    /// The clause is computed lazily from the bound instance, so different
    /// bindings of the same shape produce differently parameterized clauses.
    pub fn unlock(
        mut self,
        name: impl ToString,
        clause: impl Fn(&Contract) -> Result<Clause, CompileError> + 'static,
    ) -> Self {
        self.unlocks.push((name.to_string(), Rc::new(clause)));
        self
    }

    /// Registers a continuation: an unconditionally available spend path
    /// which must produce exactly the returned follow-up transaction.
    pub fn guarantee(
        mut self,
        name: impl ToString,
        template: impl Fn(&Contract) -> Result<TemplateBuilder, CompileError> + 'static,
    ) -> Self {
        self.guarantees.push(Guarantee {
            name: name.to_string(),
            clause: None,
            template: Rc::new(template),
        });
        self
    }

    /// Registers a continuation gated by an additional clause: the clause
    /// must be satisfied and the returned follow-up transaction produced.
    pub fn guarantee_under(
        mut self,
        name: impl ToString,
        clause: impl Fn(&Contract) -> Result<Clause, CompileError> + 'static,
        template: impl Fn(&Contract) -> Result<TemplateBuilder, CompileError> + 'static,
    ) -> Self {
        self.guarantees.push(Guarantee {
            name: name.to_string(),
            clause: Some(Rc::new(clause)),
            template: Rc::new(template),
        });
        self
    }

    /// Binds concrete field values, validating them against the declaration.
    ///
    /// Every declared field must be provided with a matching kind and no
    /// undeclared field may be present; the resulting [`Contract`] is
    /// immutable.
    pub fn bind(self, fields: BTreeMap<String, FieldValue>) -> Result<Contract, BindError> {
        for (name, kind) in &self.fields {
            match fields.get(name) {
                None => {
                    return Err(BindError::MissingField(self.name.clone(), name.clone()));
                }
                Some(value) if value.kind() != *kind => {
                    return Err(BindError::FieldType {
                        contract: self.name.clone(),
                        field: name.clone(),
                        expected: *kind,
                        provided: value.kind(),
                    });
                }
                Some(_) => {}
            }
        }
        if let Some(name) = fields.keys().find(|name| !self.fields.contains_key(*name)) {
            return Err(BindError::UnknownField(self.name.clone(), name.clone()));
        }

        let id = commit_to_fields(&self.name, &fields);
        Ok(Contract {
            descriptor: Rc::new(self),
            fields,
            id,
        })
    }
}

fn commit_to_fields(name: &str, fields: &BTreeMap<String, FieldValue>) -> ContractId {
    let mut buf = vec![];
    buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
    buf.extend_from_slice(name.as_bytes());
    for (field, value) in fields {
        buf.extend_from_slice(&(field.len() as u16).to_le_bytes());
        buf.extend_from_slice(field.as_bytes());
        value.commit(&mut buf);
    }
    // Qualified: both the hashing and the std `Hash` traits are in scope
    let hash = <sha256::Hash as Hash>::hash(&buf);
    ContractId::from_inner(Slice32::from_inner(hash.into_inner()))
}

/// Immutable bound contract instance.
///
/// Instances are cheaply clonable (the descriptor is shared) and safe to
/// share read-only; identity, equality and hashing all follow
/// [`Contract::id`].
#[derive(Clone)]
pub struct Contract {
    descriptor: Rc<Descriptor>,
    fields: BTreeMap<String, FieldValue>,
    id: ContractId,
}

impl PartialEq for Contract {
    fn eq(&self, other: &Self) -> bool { self.id == other.id }
}

impl Eq for Contract {}

impl StdHash for Contract {
    fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state) }
}

impl Debug for Contract {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("name", &self.descriptor.name)
            .field("fields", &self.fields)
            .field("id", &self.id)
            .finish()
    }
}

impl Display for Contract {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.descriptor.name, self.id)
    }
}

impl Contract {
    /// Contract shape name.
    pub fn name(&self) -> &str { &self.descriptor.name }

    /// Canonical identity of the bound instance.
    pub fn id(&self) -> ContractId { self.id }

    pub(crate) fn unlocks(&self) -> &[(String, ClauseFn)] { &self.descriptor.unlocks }

    pub(crate) fn guarantees(&self) -> &[Guarantee] { &self.descriptor.guarantees }

    fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or_else(|| {
            panic!(
                "access to unbound field \"{}\" of contract \"{}\"",
                name,
                self.name()
            )
        })
    }

    fn kind_violation(&self, name: &str, kind: FieldKind) -> ! {
        panic!(
            "field \"{}\" of contract \"{}\" accessed as {}, but holds a {} value",
            name,
            self.name(),
            kind,
            self.field(name).kind()
        )
    }

    /// Amount bound to the given field.
    ///
    /// # Panics
    ///
    /// If the field is unbound or holds a different kind: after a successful
    /// [`Descriptor::bind`] this indicates a descriptor programming error.
    pub fn amount(&self, name: &str) -> Amount {
        match self.field(name) {
            FieldValue::Amount(amount) => *amount,
            _ => self.kind_violation(name, FieldKind::Amount),
        }
    }

    /// Public key bound to the given field. Panics as [`Contract::amount`].
    pub fn key(&self, name: &str) -> PublicKey {
        match self.field(name) {
            FieldValue::Key(key) => *key,
            _ => self.kind_violation(name, FieldKind::Key),
        }
    }

    /// Hash lock bound to the given field. Panics as [`Contract::amount`].
    pub fn hash(&self, name: &str) -> HashLock {
        match self.field(name) {
            FieldValue::Hash(lock) => *lock,
            _ => self.kind_violation(name, FieldKind::Hash),
        }
    }

    /// Address bound to the given field. Panics as [`Contract::amount`].
    pub fn address(&self, name: &str) -> Address {
        match self.field(name) {
            FieldValue::Address(address) => address.clone(),
            _ => self.kind_violation(name, FieldKind::Address),
        }
    }

    /// Sub-contract bound to the given field. Panics as [`Contract::amount`].
    pub fn contract(&self, name: &str) -> Contract {
        match self.field(name) {
            FieldValue::Contract(contract) => contract.clone(),
            _ => self.kind_violation(name, FieldKind::Contract),
        }
    }

    /// Relative lock bound to the given field. Panics as
    /// [`Contract::amount`].
    pub fn sequence(&self, name: &str) -> SeqNo {
        match self.field(name) {
            FieldValue::Sequence(seq_no) => *seq_no,
            _ => self.kind_violation(name, FieldKind::Sequence),
        }
    }

    /// Absolute lock bound to the given field. Panics as
    /// [`Contract::amount`].
    pub fn lock_time(&self, name: &str) -> LockTime {
        match self.field(name) {
            FieldValue::LockTime(lock_time) => *lock_time,
            _ => self.kind_violation(name, FieldKind::LockTime),
        }
    }

    /// Counter bound to the given field. Panics as [`Contract::amount`].
    pub fn count(&self, name: &str) -> u64 {
        match self.field(name) {
            FieldValue::Count(count) => *count,
            _ => self.kind_violation(name, FieldKind::Count),
        }
    }

    /// Contract factory bound to the given field. Panics as
    /// [`Contract::amount`].
    pub fn factory(&self, name: &str) -> ContractFactory {
        match self.field(name) {
            FieldValue::Factory(factory) => factory.clone(),
            _ => self.kind_violation(name, FieldKind::Factory),
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    fn alice() -> PublicKey {
        PublicKey::from_str("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
            .unwrap()
    }

    fn declaration() -> Descriptor {
        Descriptor::new("test")
            .field("key", FieldKind::Key)
            .field("amount", FieldKind::Amount)
            .unlock("sign", |contract| Ok(Clause::signed(contract.key("key"))))
    }

    #[test]
    fn bind_validates_fields() {
        let contract = declaration()
            .bind(bmap! {
                s!("key") => FieldValue::Key(alice()),
                s!("amount") => FieldValue::Amount(Amount::from_sat(100_000))
            })
            .unwrap();
        assert_eq!(contract.name(), "test");
        assert_eq!(contract.key("key"), alice());
        assert_eq!(contract.amount("amount"), Amount::from_sat(100_000));
    }

    #[test]
    fn bind_missing_field() {
        let err = declaration()
            .bind(bmap! { s!("key") => FieldValue::Key(alice()) })
            .unwrap_err();
        assert_eq!(err, BindError::MissingField(s!("test"), s!("amount")));
    }

    #[test]
    fn bind_field_type_mismatch() {
        let err = declaration()
            .bind(bmap! {
                s!("key") => FieldValue::Key(alice()),
                s!("amount") => FieldValue::Count(100_000)
            })
            .unwrap_err();
        assert_eq!(err, BindError::FieldType {
            contract: s!("test"),
            field: s!("amount"),
            expected: FieldKind::Amount,
            provided: FieldKind::Count,
        });
    }

    #[test]
    fn bind_unknown_field() {
        let err = declaration()
            .bind(bmap! {
                s!("key") => FieldValue::Key(alice()),
                s!("amount") => FieldValue::Amount(Amount::from_sat(1)),
                s!("extra") => FieldValue::Count(0)
            })
            .unwrap_err();
        assert_eq!(err, BindError::UnknownField(s!("test"), s!("extra")));
    }

    #[test]
    fn id_commits_to_bound_values() {
        let bind = |sats| {
            declaration()
                .bind(bmap! {
                    s!("key") => FieldValue::Key(alice()),
                    s!("amount") => FieldValue::Amount(Amount::from_sat(sats))
                })
                .unwrap()
        };
        assert_eq!(bind(100).id(), bind(100).id());
        assert_ne!(bind(100).id(), bind(101).id());
    }

    #[test]
    fn factory_identity_is_tag() {
        let factory = |tag: &str| {
            FieldValue::Factory(ContractFactory::new(tag, |amount| {
                crate::pay::pay_to_pubkey(alice(), amount)
            }))
        };
        let bind = |value: FieldValue| {
            Descriptor::new("holder")
                .field("make", FieldKind::Factory)
                .unlock("sign", |_| Ok(Clause::signed(alice())))
                .bind(bmap! { s!("make") => value })
                .unwrap()
        };
        assert_eq!(bind(factory("cold")).id(), bind(factory("cold")).id());
        assert_ne!(bind(factory("cold")).id(), bind(factory("warm")).id());
    }

    #[test]
    #[should_panic(expected = "accessed as key")]
    fn kind_violation_panics() {
        let contract = declaration()
            .bind(bmap! {
                s!("key") => FieldValue::Key(alice()),
                s!("amount") => FieldValue::Amount(Amount::from_sat(1))
            })
            .unwrap();
        contract.key("amount");
    }
}
