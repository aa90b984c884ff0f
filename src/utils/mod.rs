pub mod command;
pub mod definitive;
pub mod file;
pub mod ids;
pub mod merge;
pub mod table;
