//! Row mapping: one result row to one freshly constructed entity.

use crate::Result;
use crate::entity::Entity;
use crate::error::{Error, MappingError, MappingFailure};
use crate::metadata::EntityDescriptor;
use crate::row::Row;

/// Build a new `E` from `row`.
///
/// Starts from `E::default()` and assigns every declared field from the
/// column of the same name, coercing to the field's type. Columns in the
/// row that the entity does not declare are ignored.
pub fn map_row<E: Entity>(row: &Row, descriptor: &EntityDescriptor<E>) -> Result<E> {
    let mut entity = E::default();

    for (index, field) in descriptor.fields().iter().enumerate() {
        let mapping_error = |reason| {
            Error::Mapping(MappingError {
                entity: descriptor.entity_name().to_string(),
                field: field.name.to_string(),
                column: field.column_name.to_string(),
                reason,
            })
        };

        let Some(value) = row.get_by_name_ignore_case(field.column_name) else {
            return Err(mapping_error(MappingFailure::MissingColumn));
        };

        match descriptor.write(&mut entity, index, value) {
            Ok(()) => {}
            Err(Error::Type(type_error)) => {
                return Err(mapping_error(MappingFailure::Coercion(type_error)));
            }
            Err(other) => return Err(other),
        }
    }

    tracing::trace!(
        entity = descriptor.entity_name(),
        columns = descriptor.fields().len(),
        "Mapped row"
    );
    Ok(entity)
}
