pub mod format;
pub mod reader;
pub mod writer;

pub use reader::read_variable;
pub use writer::MatWriter;
