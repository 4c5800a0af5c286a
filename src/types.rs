//! Type model: immutable description of the shape of a value.
//!
//! A `Type` is a tagged kind plus a `nullable` flag. Unions always hold at
//! least two members and are nullable iff one of them is `null`. The
//! `Display` form is canonical and feeds cache keys, so it must stay
//! deterministic for a given input.
pub mod generics;
pub mod parse;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

pub use generics::{extract_generics, split_top_level, substitute_generics};
pub use parse::{ClassKind, ClassLookup, TypeResolver};

/// Class names treated as date/time values without registration.
pub const DATE_TIME_CLASSES: &[&str] = &["DateTime", "DateTimeImmutable", "DateTimeInterface"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Int,
    Float,
    Bool,
    String,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TypeKind {
    Scalar(ScalarKind),
    Null,
    Mixed,
    List(Box<Type>),
    Dict { key: Box<Type>, value: Box<Type> },
    Object { class: String, generics: Vec<Type> },
    Enum { class: String, backing: ScalarKind },
    Union(Vec<Type>),
    /// Unbound template parameter (`T` inside a generic class).
    Template(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Type {
    kind: TypeKind,
    nullable: bool,
}

// ------------------------------ Constructors ------------------------------ //

impl Type {
    fn new(kind: TypeKind) -> Self {
        Self { kind, nullable: false }
    }

    pub fn scalar(kind: ScalarKind) -> Self { Self::new(TypeKind::Scalar(kind)) }
    pub fn int() -> Self { Self::scalar(ScalarKind::Int) }
    pub fn float() -> Self { Self::scalar(ScalarKind::Float) }
    pub fn bool() -> Self { Self::scalar(ScalarKind::Bool) }
    pub fn string() -> Self { Self::scalar(ScalarKind::String) }
    pub fn null() -> Self { Self { kind: TypeKind::Null, nullable: true } }
    pub fn mixed() -> Self { Self { kind: TypeKind::Mixed, nullable: true } }

    pub fn list(item: Type) -> Self {
        Self::new(TypeKind::List(Box::new(item)))
    }

    pub fn dict(key: Type, value: Type) -> Self {
        Self::new(TypeKind::Dict { key: Box::new(key), value: Box::new(value) })
    }

    pub fn object(class: impl Into<String>) -> Self {
        Self::generic(class, Vec::new())
    }

    pub fn generic(class: impl Into<String>, generics: Vec<Type>) -> Self {
        Self::new(TypeKind::Object { class: class.into(), generics })
    }

    pub fn enumeration(class: impl Into<String>, backing: ScalarKind) -> Self {
        Self::new(TypeKind::Enum { class: class.into(), backing })
    }

    pub fn template(name: impl Into<String>) -> Self {
        Self::new(TypeKind::Template(name.into()))
    }

    /// Build a union. Nested unions are flattened, nullable members split into
    /// `X|null`, duplicates dropped; fewer than two distinct members is an error.
    pub fn union(members: Vec<Type>) -> Result<Self, ConfigurationError> {
        let flat = flatten_members(members);
        if flat.len() < 2 {
            let input = flat.iter().map(|t| t.to_string()).collect::<Vec<_>>().join("|");
            return Err(ConfigurationError::InvalidType {
                input,
                reason: "a union needs at least two distinct members".into(),
            });
        }
        Ok(Self::union_unchecked(flat))
    }

    /// Like `union` but collapses to the single remaining member instead of
    /// failing. Used after substitution, where `T|int` with `T = int` is legal.
    pub(crate) fn union_lossy(members: Vec<Type>) -> Self {
        let mut flat = flatten_members(members);
        match flat.len() {
            0 => Type::mixed(),
            1 => flat.remove(0),
            _ => Self::union_unchecked(flat),
        }
    }

    fn union_unchecked(flat: Vec<Type>) -> Self {
        let nullable = flat.iter().any(|t| matches!(t.kind, TypeKind::Null));
        Self { kind: TypeKind::Union(flat), nullable }
    }

    /// Same type, accepting `null` as well.
    pub fn or_null(self) -> Self {
        match self.kind {
            TypeKind::Union(mut members) => {
                if !members.iter().any(|m| matches!(m.kind, TypeKind::Null)) {
                    members.push(Type::null());
                }
                Self::union_unchecked(members)
            }
            kind => Self { kind, nullable: true },
        }
    }

    pub(crate) fn nullable_if(self, flag: bool) -> Self {
        if flag { self.or_null() } else { self }
    }

    /// Same type with `null` removed.
    pub fn non_null(&self) -> Self {
        match &self.kind {
            TypeKind::Union(members) => Self::union_lossy(
                members.iter().filter(|m| !matches!(m.kind, TypeKind::Null)).cloned().collect(),
            ),
            TypeKind::Null | TypeKind::Mixed => self.clone(),
            kind => Self { kind: kind.clone(), nullable: false },
        }
    }
}

fn flatten_members(members: Vec<Type>) -> Vec<Type> {
    let mut flat: Vec<Type> = Vec::with_capacity(members.len());
    let push = |t: Type, flat: &mut Vec<Type>| {
        if !flat.contains(&t) {
            flat.push(t);
        }
    };
    for member in members {
        match member.kind {
            TypeKind::Union(inner) => {
                for t in flatten_members(inner) {
                    push(t, &mut flat);
                }
            }
            TypeKind::Null | TypeKind::Mixed => push(member, &mut flat),
            kind if member.nullable => {
                push(Type { kind, nullable: false }, &mut flat);
                push(Type::null(), &mut flat);
            }
            kind => push(Type { kind, nullable: false }, &mut flat),
        }
    }
    flat
}

// ------------------------------- Queries ---------------------------------- //

impl Type {
    pub fn kind(&self) -> &TypeKind { &self.kind }

    pub fn is_nullable(&self) -> bool { self.nullable }

    pub fn is_null(&self) -> bool { matches!(self.kind, TypeKind::Null) }

    pub fn members(&self) -> &[Type] {
        match &self.kind {
            TypeKind::Union(members) => members,
            _ => std::slice::from_ref(self),
        }
    }

    pub fn is_date_time(&self) -> bool {
        matches!(&self.kind, TypeKind::Object { class, .. } if DATE_TIME_CLASSES.contains(&class.as_str()))
    }

    /// True when no template parameter remains anywhere in the type.
    pub fn is_closed(&self) -> bool {
        match &self.kind {
            TypeKind::Template(_) => false,
            TypeKind::List(item) => item.is_closed(),
            TypeKind::Dict { key, value } => key.is_closed() && value.is_closed(),
            TypeKind::Object { generics, .. } => generics.iter().all(Type::is_closed),
            TypeKind::Union(members) => members.iter().all(Type::is_closed),
            _ => true,
        }
    }

    /// Object classes reachable from this type (not through other classes).
    pub fn referenced_classes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_classes(&mut out);
        out
    }

    fn collect_classes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match &self.kind {
            TypeKind::Object { class, generics } => {
                if !out.contains(&class.as_str()) {
                    out.push(class);
                }
                generics.iter().for_each(|g| g.collect_classes(out));
            }
            TypeKind::List(item) => item.collect_classes(out),
            TypeKind::Dict { value, .. } => value.collect_classes(out),
            TypeKind::Union(members) => members.iter().for_each(|m| m.collect_classes(out)),
            _ => {}
        }
    }
}

// ---------------------------- Equality / Hash ----------------------------- //

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        if self.nullable != other.nullable {
            return false;
        }
        match (&self.kind, &other.kind) {
            (TypeKind::Scalar(a), TypeKind::Scalar(b)) => a == b,
            (TypeKind::Null, TypeKind::Null) | (TypeKind::Mixed, TypeKind::Mixed) => true,
            (TypeKind::List(a), TypeKind::List(b)) => a == b,
            (TypeKind::Dict { key: ka, value: va }, TypeKind::Dict { key: kb, value: vb }) => {
                ka == kb && va == vb
            }
            (
                TypeKind::Object { class: ca, generics: ga },
                TypeKind::Object { class: cb, generics: gb },
            ) => ca == cb && ga == gb,
            (
                TypeKind::Enum { class: ca, backing: ba },
                TypeKind::Enum { class: cb, backing: bb },
            ) => ca == cb && ba == bb,
            // order-insensitive; members are deduplicated on construction
            (TypeKind::Union(a), TypeKind::Union(b)) => {
                a.len() == b.len() && a.iter().all(|m| b.contains(m))
            }
            (TypeKind::Template(a), TypeKind::Template(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nullable.hash(state);
        std::mem::discriminant(&self.kind).hash(state);
        match &self.kind {
            TypeKind::Scalar(k) => k.hash(state),
            TypeKind::List(item) => item.hash(state),
            TypeKind::Dict { key, value } => {
                key.hash(state);
                value.hash(state);
            }
            TypeKind::Object { class, generics } => {
                class.hash(state);
                generics.hash(state);
            }
            TypeKind::Enum { class, backing } => {
                class.hash(state);
                backing.hash(state);
            }
            TypeKind::Union(members) => {
                let mut acc = 0u64;
                for m in members {
                    let mut h = DefaultHasher::new();
                    m.hash(&mut h);
                    acc = acc.wrapping_add(h.finish());
                }
                acc.hash(state);
            }
            TypeKind::Template(name) => name.hash(state),
            TypeKind::Null | TypeKind::Mixed => {}
        }
    }
}

// ------------------------------- Display ---------------------------------- //

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Union(members) => {
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{m}")?;
                }
                return Ok(());
            }
            TypeKind::Null => return f.write_str("null"),
            TypeKind::Mixed => return f.write_str("mixed"),
            _ => {}
        }
        if self.nullable {
            f.write_str("?")?;
        }
        match &self.kind {
            TypeKind::Scalar(k) => f.write_str(k.name()),
            TypeKind::List(item) => write!(f, "list<{item}>"),
            TypeKind::Dict { key, value } => write!(f, "dict<{key}, {value}>"),
            TypeKind::Object { class, generics } => {
                f.write_str(class)?;
                if !generics.is_empty() {
                    f.write_str("<")?;
                    for (i, g) in generics.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{g}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            TypeKind::Enum { class, .. } => f.write_str(class),
            TypeKind::Template(name) => f.write_str(name),
            TypeKind::Union(_) | TypeKind::Null | TypeKind::Mixed => Ok(()),
        }
    }
}

// ------------------------------- Tests ------------------------------------ //
