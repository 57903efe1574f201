extern crate core;

pub mod error;
pub mod parser;
pub mod schema;

pub use error::ParseError;
pub use parser::{parse, DemoParser, DemoSource, ParserConfig};

pub type Result<T> = core::result::Result<T, ParseError>;
