//! Generic parameter extraction and substitution.
use indexmap::IndexMap;

use super::{Type, TypeKind};
use crate::error::ConfigurationError;

fn unbalanced(input: &str) -> ConfigurationError {
    ConfigurationError::InvalidType {
        input: input.to_string(),
        reason: "unbalanced angle brackets".into(),
    }
}

/// Split `input` on `sep` wherever the `<...>` nesting depth is zero.
pub fn split_top_level(input: &str, sep: char) -> Result<Vec<&str>, ConfigurationError> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth < 0 {
                    return Err(unbalanced(input));
                }
            }
            c if c == sep && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(unbalanced(input));
    }
    parts.push(&input[start..]);
    Ok(parts)
}

/// `"Foo<int, Bar<string>>"` → `("Foo", ["int", "Bar<string>"])`.
///
/// Nested brackets are tracked; anything unbalanced or trailing after the
/// closing bracket is an `InvalidType` for this input only.
pub fn extract_generics(input: &str) -> Result<(String, Vec<String>), ConfigurationError> {
    let input = input.trim();
    let Some(open) = input.find('<') else {
        if input.contains('>') {
            return Err(unbalanced(input));
        }
        return Ok((input.to_string(), Vec::new()));
    };
    if !input.ends_with('>') {
        return Err(ConfigurationError::InvalidType {
            input: input.to_string(),
            reason: "unexpected characters after generic parameters".into(),
        });
    }
    let base = input[..open].trim();
    let inner = &input[open + 1..input.len() - 1];
    let params = split_top_level(inner, ',').map_err(|_| unbalanced(input))?;
    let mut out = Vec::with_capacity(params.len());
    for p in params {
        let p = p.trim();
        if p.is_empty() {
            return Err(ConfigurationError::InvalidType {
                input: input.to_string(),
                reason: "empty generic parameter".into(),
            });
        }
        out.push(p.to_string());
    }
    Ok((base.to_string(), out))
}

/// Replace template names by their bindings in every structural position.
///
/// Names without a binding are left as they are, so substituting into a
/// closed type returns an equal type.
pub fn substitute_generics(ty: &Type, bindings: &IndexMap<String, Type>) -> Type {
    if bindings.is_empty() {
        return ty.clone();
    }
    let nullable = ty.is_nullable();
    match ty.kind() {
        TypeKind::Template(name) => match bindings.get(name) {
            Some(bound) => bound.clone().nullable_if(nullable),
            None => ty.clone(),
        },
        // a bare class-like name may still be a template parameter
        TypeKind::Object { class, generics } if generics.is_empty() => match bindings.get(class) {
            Some(bound) => bound.clone().nullable_if(nullable),
            None => ty.clone(),
        },
        TypeKind::Object { class, generics } => Type::generic(
            class.clone(),
            generics.iter().map(|g| substitute_generics(g, bindings)).collect(),
        )
        .nullable_if(nullable),
        TypeKind::List(item) => Type::list(substitute_generics(item, bindings)).nullable_if(nullable),
        TypeKind::Dict { key, value } => Type::dict(
            substitute_generics(key, bindings),
            substitute_generics(value, bindings),
        )
        .nullable_if(nullable),
        TypeKind::Union(members) => {
            Type::union_lossy(members.iter().map(|m| substitute_generics(m, bindings)).collect())
        }
        TypeKind::Scalar(_) | TypeKind::Null | TypeKind::Mixed | TypeKind::Enum { .. } => ty.clone(),
    }
}

// ------------------------------- Tests ------------------------------------ //
