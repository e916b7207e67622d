//! UBL document wire format: one schema table, one serializer, one
//! deserializer. See [`schema`] for the namespace contract.

pub mod deserializer;
pub mod schema;
pub mod serializer;

pub use deserializer::deserialize;
pub use serializer::serialize;
