//! Integration tests: full scan runs against real files in a temp
//! directory and against an in-memory series source.

mod memory_source;
mod pipeline;
