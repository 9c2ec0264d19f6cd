pub mod builder;
pub mod executor;
pub mod plan;
pub mod sql;

pub use builder::{BuilderKind, QueryBuilder};
pub use plan::{
    FieldFilter, FieldProjections, FilterOperator, ProjectedField, SingleStateRequest,
    StateRequest,
};
