// Library interface for feedscope modules
// This allows tests and other binaries to import modules

pub mod canonical;
pub mod catalog;
pub mod collector;
pub mod feedparse;
pub mod fetch;
pub mod ident;
pub mod processing;
pub mod redirect;
pub mod status;
pub mod storage;
