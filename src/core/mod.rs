// Core primitives: errors, keyset ordering, bounded queries, pagination, exclusions.
pub mod error;
pub mod exclusion;
pub mod keyset;
pub mod paginate;
pub mod query;
