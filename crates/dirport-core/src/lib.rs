pub mod audit;
pub mod builder;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod directory;
pub mod dn;
pub mod entry;
pub mod error;
pub mod export;
pub mod fields;
pub mod filter;
pub mod import;
pub mod ldap_store;
pub mod merge;
pub mod offline;
pub mod password;
pub mod plugins;
pub mod result;
pub mod template;
pub mod validate;
