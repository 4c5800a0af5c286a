//! The standard metadata stages, in pipeline order.
use super::{Direction, MetadataStage, PropertyMap, PropertyMetadata, StageInput};
use crate::config::CircularReferencePolicy;
use crate::error::ConfigurationError;
use crate::formatter::{check_date_time_format, FormatterRef};
use crate::registry::{AttributeSource, Directive, TypeExtractor};
use crate::types::{substitute_generics, Type};

/// One entry per declared property, named as declared.
pub struct BaseStage;

impl MetadataStage for BaseStage {
    fn name(&self) -> &'static str { "base" }

    fn apply(&self, input: &StageInput<'_>, _: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        let mut out = PropertyMap::new();
        for name in input.registry.extract_property_names(input.class)? {
            let ty = input.registry.extract_from_property(input.class, &name)?;
            out.insert(name.clone(), PropertyMetadata::field(name, ty));
        }
        Ok(out)
    }
}

/// `Directive::Rename` sets the encoded name.
pub struct RenameStage;

impl MetadataStage for RenameStage {
    fn name(&self) -> &'static str { "rename" }

    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        Ok(properties
            .into_iter()
            .map(|(key, mut meta)| {
                for directive in input.registry.property_directives(input.class, &key) {
                    if let Directive::Rename(name) = directive {
                        meta.encoded_name = name.clone();
                    }
                }
                (key, meta)
            })
            .collect())
    }
}

/// Attaches the direction's formatter and retypes the property to what the
/// formatter produces (encode) or consumes (decode).
pub struct FormatterStage;

impl MetadataStage for FormatterStage {
    fn name(&self) -> &'static str { "formatter" }

    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        let mut out = PropertyMap::with_capacity(properties.len());
        for (key, mut meta) in properties {
            let wanted = input.registry.property_directives(input.class, &key).iter().find_map(|d| {
                match (d, input.direction) {
                    (Directive::EncodeFormatter(name), Direction::Encode)
                    | (Directive::DecodeFormatter(name), Direction::Decode) => Some(name),
                    _ => None,
                }
            });
            if let Some(name) = wanted {
                input.registry.formatters().resolve(name)?;
                let ty = match input.direction {
                    Direction::Encode => input.registry.extract_from_return_type(name)?,
                    Direction::Decode => input.registry.extract_from_function_parameter(name, 0)?,
                };
                meta.ty = ty.ok_or_else(|| ConfigurationError::InvalidFormatter {
                    name: name.clone(),
                    reason: "signature has no value type".into(),
                })?;
                meta.formatters.push(FormatterRef::Named(name.clone()));
            }
            out.insert(key, meta);
        }
        Ok(out)
    }
}

/// Date-time properties travel as strings.
pub struct DateTimeStage;

impl MetadataStage for DateTimeStage {
    fn name(&self) -> &'static str { "date_time" }

    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        if let Some(format) = input.config.date_time_format.as_deref() {
            check_date_time_format(format)?;
        }
        Ok(properties
            .into_iter()
            .map(|(key, mut meta)| {
                if meta.ty.non_null().is_date_time() {
                    let format = input.config.date_time_format.clone();
                    meta.ty = Type::string().nullable_if(meta.ty.is_nullable());
                    meta.formatters.push(match input.direction {
                        Direction::Encode => FormatterRef::DateTimeFormat(format),
                        Direction::Decode => FormatterRef::DateTimeParse(format),
                    });
                }
                (key, meta)
            })
            .collect())
    }
}

/// Substitutes the object's template bindings into every property type.
pub struct GenericsStage;

impl MetadataStage for GenericsStage {
    fn name(&self) -> &'static str { "generics" }

    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        if input.context.generics.is_empty() {
            return Ok(properties);
        }
        Ok(properties
            .into_iter()
            .map(|(key, mut meta)| {
                meta.ty = substitute_generics(&meta.ty, &input.context.generics);
                (key, meta)
            })
            .collect())
    }
}

/// Under the max-depth policy, cuts properties that would enter a class
/// already nested `limit` times. The depth formatter replaces the value when
/// encoding; without one the property is dropped.
pub struct MaxDepthStage;

impl MetadataStage for MaxDepthStage {
    fn name(&self) -> &'static str { "max_depth" }

    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        let CircularReferencePolicy::MaxDepth(default_limit) = input.config.circular_policy()? else {
            return Ok(properties);
        };
        let mut out = PropertyMap::with_capacity(properties.len());
        for (key, mut meta) in properties {
            let directive = input.registry.property_directives(input.class, &key).iter().find_map(|d| match d {
                Directive::MaxDepth { max, formatter } => Some((*max, formatter.as_ref())),
                _ => None,
            });
            let limit = directive.map(|(max, _)| max).unwrap_or(default_limit);
            let reached = meta
                .ty
                .referenced_classes()
                .iter()
                .any(|class| input.context.depth_of(class) >= limit);
            if !reached {
                out.insert(key, meta);
                continue;
            }
            let formatter = directive
                .and_then(|(_, f)| f)
                .or(input.config.max_depth_formatter.as_ref());
            let Some(name) = formatter else {
                continue;
            };
            let (_, _, output) = input.registry.formatters().resolve(name)?;
            meta.ty = output.nullable_if(meta.ty.is_nullable());
            if input.direction == Direction::Encode {
                meta.formatters.push(FormatterRef::Named(name.clone()));
            }
            out.insert(key, meta);
        }
        Ok(out)
    }
}

/// With active groups, keeps untagged properties and those sharing a group.
pub struct GroupsStage;

impl MetadataStage for GroupsStage {
    fn name(&self) -> &'static str { "groups" }

    fn apply(&self, input: &StageInput<'_>, properties: PropertyMap) -> Result<PropertyMap, ConfigurationError> {
        let active = &input.config.groups;
        if active.is_empty() {
            return Ok(properties);
        }
        Ok(properties
            .into_iter()
            .filter(|(key, _)| {
                let mut tags = input
                    .registry
                    .property_directives(input.class, key)
                    .iter()
                    .filter_map(|d| match d {
                        Directive::Groups(groups) => Some(groups),
                        _ => None,
                    })
                    .peekable();
                tags.peek().is_none() || tags.any(|groups| groups.iter().any(|g| active.contains(g)))
            })
            .collect())
    }
}

// ------------------------------- Tests ------------------------------------ //
