// Core modules implementing storage, record validation, and error modeling.
pub mod error;
pub mod record;
pub mod store;
